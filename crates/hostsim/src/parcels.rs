use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::Utc;
use tracing::debug;

use plotmap::{
    BlockPos, CellSize, Marker, MarkerSink, OwnerId, OwnerProfile, Plot, PlotId, PlotProvider,
    WorldId,
};

const CELL_EDGE: f64 = 38.0; // 32 block plots plus a 6 block road

struct State {
    plots: BTreeMap<(WorldId, PlotId), Plot>,
    group_of: BTreeMap<(WorldId, PlotId), PlotId>,
    profiles: BTreeMap<OwnerId, OwnerProfile>,
}

/// In-memory stand-in for the parcel system, mutated by the scenario thread
/// and read by the engine.
pub struct MemoryParcels {
    state: Mutex<State>,
}

impl MemoryParcels {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                plots: BTreeMap::new(),
                group_of: BTreeMap::new(),
                profiles: BTreeMap::new(),
            }),
        }
    }

    pub fn claim(&self, world: &WorldId, id: PlotId, owner: &str) {
        let mut state = self.state.lock().expect("parcel state");
        let base_x = (id.x - 1) * CELL_EDGE as i32;
        let base_z = (id.z - 1) * CELL_EDGE as i32;
        state.plots.insert(
            (world.clone(), id),
            Plot {
                world: world.clone(),
                id,
                owner: Some(OwnerId::new(owner)),
                bottom: BlockPos::new(base_x, 0, base_z),
                top: BlockPos::new(base_x + 31, 127, base_z + 31),
            },
        );
        state
            .profiles
            .entry(OwnerId::new(owner))
            .or_insert_with(|| OwnerProfile {
                name: Some(owner.to_string()),
                first_seen: Utc::now(),
                last_seen: None,
            });
    }

    pub fn set_owner(&self, world: &WorldId, id: PlotId, owner: &str) {
        let mut state = self.state.lock().expect("parcel state");
        if let Some(plot) = state.plots.get_mut(&(world.clone(), id)) {
            plot.owner = Some(OwnerId::new(owner));
        }
        state
            .profiles
            .entry(OwnerId::new(owner))
            .or_insert_with(|| OwnerProfile {
                name: Some(owner.to_string()),
                first_seen: Utc::now(),
                last_seen: None,
            });
    }

    pub fn merge(&self, world: &WorldId, base: PlotId, members: &[PlotId]) {
        let mut state = self.state.lock().expect("parcel state");
        for &member in members {
            state.group_of.insert((world.clone(), member), base);
        }
    }

    pub fn unlink(&self, world: &WorldId, base: PlotId) {
        let mut state = self.state.lock().expect("parcel state");
        state
            .group_of
            .retain(|(member_world, _), b| !(member_world == world && *b == base));
    }

    pub fn delete(&self, world: &WorldId, base: PlotId) {
        let mut state = self.state.lock().expect("parcel state");
        let members: Vec<PlotId> = state
            .group_of
            .iter()
            .filter(|((member_world, _), b)| member_world == world && **b == base)
            .map(|((_, member), _)| *member)
            .collect();
        let members = if members.is_empty() { vec![base] } else { members };
        for member in members {
            state.plots.remove(&(world.clone(), member));
            state.group_of.remove(&(world.clone(), member));
        }
    }
}

impl PlotProvider for MemoryParcels {
    fn all_plots(&self) -> Vec<Plot> {
        self.state
            .lock()
            .expect("parcel state")
            .plots
            .values()
            .cloned()
            .collect()
    }

    fn plot(&self, world: &WorldId, id: PlotId) -> Option<Plot> {
        self.state
            .lock()
            .expect("parcel state")
            .plots
            .get(&(world.clone(), id))
            .cloned()
    }

    fn base_id(&self, world: &WorldId, id: PlotId) -> Option<PlotId> {
        let state = self.state.lock().expect("parcel state");
        if let Some(base) = state.group_of.get(&(world.clone(), id)) {
            return Some(*base);
        }
        state.plots.contains_key(&(world.clone(), id)).then_some(id)
    }

    fn connected_ids(&self, world: &WorldId, base: PlotId) -> Vec<PlotId> {
        let state = self.state.lock().expect("parcel state");
        let mut members: Vec<PlotId> = state
            .group_of
            .iter()
            .filter(|((member_world, _), b)| member_world == world && **b == base)
            .map(|((_, member), _)| *member)
            .collect();
        if members.is_empty() {
            members.push(base);
        }
        members.sort();
        members
    }

    fn plots_owned_by(&self, owner: &OwnerId) -> Vec<Plot> {
        self.state
            .lock()
            .expect("parcel state")
            .plots
            .values()
            .filter(|plot| plot.owner.as_ref() == Some(owner))
            .cloned()
            .collect()
    }

    fn owner_profile(&self, owner: &OwnerId) -> Option<OwnerProfile> {
        self.state
            .lock()
            .expect("parcel state")
            .profiles
            .get(owner)
            .cloned()
    }

    fn plot_cell_size(&self, _world: &WorldId) -> Option<CellSize> {
        Some(CellSize::square(CELL_EDGE))
    }
}

/// Render target stand-in: accepts every configured world and logs traffic.
pub struct LoggingSink {
    worlds: Vec<WorldId>,
}

impl LoggingSink {
    pub fn new(worlds: Vec<WorldId>) -> Self {
        Self { worlds }
    }
}

impl MarkerSink for LoggingSink {
    fn supports_world(&self, world: &WorldId) -> bool {
        self.worlds.contains(world)
    }

    fn put(&mut self, world: &WorldId, key: &str, marker: &Marker) {
        debug!(%world, key, label = marker.label(), "sink_put");
    }

    fn remove(&mut self, world: &WorldId, key: &str) {
        debug!(%world, key, "sink_remove");
    }
}
