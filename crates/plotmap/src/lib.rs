//! Keeps a rendered map's overlay markers in lockstep with a live plot
//! system: point markers per plot, region polygons per merged plot group,
//! updated incrementally from lifecycle events and bootstrapped by a
//! time-sliced initial sweep that never stalls the host loop.

pub mod geometry;
pub mod map;
pub mod parcel;
pub mod settings;
pub mod sync;

pub use geometry::{tile, CellSize, GridPos, Region};
pub use map::{
    poi_key, region_key, IconRef, Marker, MarkerKind, MarkerSink, MarkerStore, PointMarker,
    RegionMarker, Rgba,
};
pub use parcel::{
    BlockPos, OwnerId, OwnerProfile, Plot, PlotEvent, PlotId, PlotProvider, WorldId,
};
pub use settings::{OverlaySettings, SettingsError, WorldSettings};
pub use sync::{EngineConfig, EventIntake, OverlayEngine, PendingOps, PlotSweep, SweepStatus};
