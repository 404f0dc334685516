use std::fmt;

use chrono::{DateTime, Utc};

use crate::geometry::CellSize;

/// Name of a world as known to both the parcel system and the render target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorldId(String);

impl WorldId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorldId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Grid coordinate of a plot. Plot ids are 1-based in the parcel system;
/// `(1;1)` is the plot whose cell sits at the grid origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlotId {
    pub x: i32,
    pub z: i32,
}

impl PlotId {
    pub fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }
}

impl fmt::Display for PlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{};{}", self.x, self.z)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OwnerId(String);

impl OwnerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }
}

/// Read-only snapshot of a parcel. The parcel system remains the sole source
/// of truth; the engine never writes these back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plot {
    pub world: WorldId,
    pub id: PlotId,
    pub owner: Option<OwnerId>,
    pub bottom: BlockPos,
    pub top: BlockPos,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerProfile {
    pub name: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: Option<DateTime<Utc>>,
}

/// Lifecycle notifications raised by the parcel system. Destructive
/// operations are announced twice: a begin event while the pre-state is
/// still resolvable, and a completed event carrying only the residual base
/// identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlotEvent {
    Claimed { world: WorldId, id: PlotId },
    OwnerChanged { world: WorldId, id: PlotId },
    MergeCompleted { world: WorldId, base: PlotId },
    UnlinkBegin { world: WorldId, base: PlotId },
    UnlinkCompleted { world: WorldId, base: PlotId },
    DeleteBegin { world: WorldId, base: PlotId },
    DeleteCompleted { world: WorldId, base: PlotId },
    PlayerDeparted { owner: OwnerId },
}

/// Interface to the parcel source of truth. Implementations live in the host
/// glue; everything returned is an already-resolved in-memory value, so no
/// call here may block on I/O.
pub trait PlotProvider: Send + Sync {
    fn all_plots(&self) -> Vec<Plot>;

    fn plot(&self, world: &WorldId, id: PlotId) -> Option<Plot>;

    /// Canonical representative of the group `id` belongs to.
    fn base_id(&self, world: &WorldId, id: PlotId) -> Option<PlotId>;

    /// All member ids of the group rooted at `base`, including `base` itself.
    /// A plot that is not merged reports only itself.
    fn connected_ids(&self, world: &WorldId, base: PlotId) -> Vec<PlotId>;

    fn plots_owned_by(&self, owner: &OwnerId) -> Vec<Plot>;

    fn owner_profile(&self, owner: &OwnerId) -> Option<OwnerProfile>;

    /// Edge length of one plot cell (plot size plus road width) for a world,
    /// if the world is managed by the parcel system.
    fn plot_cell_size(&self, world: &WorldId) -> Option<CellSize>;
}
