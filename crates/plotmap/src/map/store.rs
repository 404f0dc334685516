use std::collections::HashMap;

use tracing::debug;

use crate::parcel::{PlotId, WorldId};

use super::marker::Marker;

/// Per-world marker collection on the render target. `put` fully replaces any
/// marker already stored under the key.
pub trait MarkerSink: Send {
    fn supports_world(&self, world: &WorldId) -> bool;
    fn put(&mut self, world: &WorldId, key: &str, marker: &Marker);
    fn remove(&mut self, world: &WorldId, key: &str);
}

/// Key of the point marker for one plot.
pub fn poi_key(world: &WorldId, id: PlotId) -> String {
    format!("poi:{world}:{id}")
}

/// Key of the `index`-th region marker of the group rooted at `base`. A group
/// normally produces a single polygon, so index 0 carries no suffix and
/// removal can probe upward until a key is absent.
pub fn region_key(world: &WorldId, base: PlotId, index: usize) -> String {
    if index == 0 {
        format!("region:{world}:{base}")
    } else {
        format!("region:{world}:{base}:{index}")
    }
}

/// Owns every marker the engine has published, keyed per world, and mirrors
/// each mutation synchronously into the render target. A world the render
/// target does not know is a logged no-op, never an error.
pub struct MarkerStore {
    sink: Box<dyn MarkerSink>,
    worlds: HashMap<WorldId, HashMap<String, Marker>>,
}

impl MarkerStore {
    pub fn new(sink: Box<dyn MarkerSink>) -> Self {
        Self {
            sink,
            worlds: HashMap::new(),
        }
    }

    pub fn supports_world(&self, world: &WorldId) -> bool {
        self.sink.supports_world(world)
    }

    pub fn upsert(&mut self, world: &WorldId, key: &str, marker: Marker) {
        if !self.sink.supports_world(world) {
            debug!(%world, key, "marker_world_unmapped");
            return;
        }
        self.sink.put(world, key, &marker);
        self.worlds
            .entry(world.clone())
            .or_default()
            .insert(key.to_string(), marker);
    }

    /// Removes the marker if present; reports whether anything was removed.
    pub fn remove(&mut self, world: &WorldId, key: &str) -> bool {
        let removed = self
            .worlds
            .get_mut(world)
            .is_some_and(|markers| markers.remove(key).is_some());
        if removed {
            self.sink.remove(world, key);
        }
        removed
    }

    pub fn count(&self, world: &WorldId) -> usize {
        self.worlds.get(world).map_or(0, HashMap::len)
    }

    pub fn get(&self, world: &WorldId, key: &str) -> Option<&Marker> {
        self.worlds.get(world)?.get(key)
    }

    pub fn keys(&self, world: &WorldId) -> Vec<String> {
        let mut keys: Vec<String> = self
            .worlds
            .get(world)
            .map(|markers| markers.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }
}
