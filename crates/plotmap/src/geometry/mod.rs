mod tiler;

pub use tiler::{tile, CellSize, GridPos, Region};
