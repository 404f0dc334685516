mod marker;
mod store;

pub use marker::{IconRef, Marker, MarkerKind, PointMarker, RegionMarker, Rgba};
pub use store::{poi_key, region_key, MarkerSink, MarkerStore};
