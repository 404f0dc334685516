use std::collections::{HashMap, VecDeque};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::map::{MarkerSink, MarkerStore};
use crate::parcel::{Plot, PlotEvent, PlotId, PlotProvider, WorldId};
use crate::settings::OverlaySettings;

use super::pending::PendingOps;
use super::poi::PoiManager;
use super::region::RegionManager;
use super::sweep::{PlotSweep, SweepStatus};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Per-slice time budget for bulk sweeps.
    pub slice_budget: Duration,
    /// How long a departure refresh waits before touching the departed
    /// player's markers.
    pub departure_grace: Duration,
    /// Age after which an unconsumed pending record is flushed and reported.
    pub pending_max_age: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            slice_budget: Duration::from_millis(10),
            departure_grace: Duration::from_millis(200),
            pending_max_age: Duration::from_secs(30),
        }
    }
}

/// Thread-safe entry point for lifecycle notifications. Clone one per
/// subscription; events are marshalled onto the engine's worker thread.
///
/// Begin events of destructive operations are the exception: their pre-state
/// is gone by the time the completed event fires, so the member list is
/// resolved and recorded here, on the raising thread, before anything is
/// queued.
#[derive(Clone)]
pub struct EventIntake {
    provider: Arc<dyn PlotProvider>,
    pending_unlink: Arc<PendingOps>,
    pending_delete: Arc<PendingOps>,
    tx: Sender<PlotEvent>,
}

impl EventIntake {
    pub fn submit(&self, event: PlotEvent) {
        match &event {
            PlotEvent::UnlinkBegin { world, base } => {
                self.record(&self.pending_unlink, world, *base);
            }
            PlotEvent::DeleteBegin { world, base } => {
                self.record(&self.pending_delete, world, *base);
            }
            _ => {}
        }
        if self.tx.send(event).is_err() {
            warn!("event_dropped_engine_gone");
        }
    }

    fn record(&self, pending: &PendingOps, world: &WorldId, base: PlotId) {
        let base = self.provider.base_id(world, base).unwrap_or(base);
        let members = self.provider.connected_ids(world, base);
        pending.begin(world.clone(), base, members, Instant::now());
    }
}

/// Single-threaded worker that keeps the marker overlay consistent with the
/// parcel system. Construction captures every collaborator input up front
/// (configured worlds, cell sizes, the full plot list); after that `tick`
/// is the only entry point and is driven by the host's scheduling loop.
pub struct OverlayEngine {
    provider: Arc<dyn PlotProvider>,
    store: MarkerStore,
    poi: PoiManager,
    region: RegionManager,
    config: EngineConfig,
    worlds: Vec<WorldId>,
    rx: Receiver<PlotEvent>,
    pending_unlink: Arc<PendingOps>,
    pending_delete: Arc<PendingOps>,
    initial_sync: Option<PlotSweep>,
    refresh_sweeps: Vec<PlotSweep>,
    queued: VecDeque<PlotEvent>,
}

impl OverlayEngine {
    pub fn new(
        provider: Arc<dyn PlotProvider>,
        sink: Box<dyn MarkerSink>,
        settings: OverlaySettings,
        config: EngineConfig,
    ) -> (Self, EventIntake) {
        let store = MarkerStore::new(sink);
        let worlds: Vec<WorldId> = settings.world_ids().collect();

        let mut cell_sizes = HashMap::new();
        for world in &worlds {
            if !store.supports_world(world) {
                warn!(%world, "render_world_unmapped");
            }
            match provider.plot_cell_size(world) {
                Some(size) => {
                    cell_sizes.insert(world.clone(), size);
                }
                None => warn!(%world, "parcel_world_unknown"),
            }
        }

        let initial_sync = PlotSweep::new(provider.all_plots(), config.slice_budget);
        info!(plots = initial_sync.remaining(), "initial_sync_planned");

        let poi = PoiManager::new(Arc::clone(&provider), settings.clone());
        let region = RegionManager::new(Arc::clone(&provider), settings, cell_sizes);

        let pending_unlink = Arc::new(PendingOps::new("unlink"));
        let pending_delete = Arc::new(PendingOps::new("delete"));
        let (tx, rx) = channel();

        let intake = EventIntake {
            provider: Arc::clone(&provider),
            pending_unlink: Arc::clone(&pending_unlink),
            pending_delete: Arc::clone(&pending_delete),
            tx,
        };
        let engine = Self {
            provider,
            store,
            poi,
            region,
            config,
            worlds,
            rx,
            pending_unlink,
            pending_delete,
            initial_sync: Some(initial_sync),
            refresh_sweeps: Vec::new(),
            queued: VecDeque::new(),
        };
        (engine, intake)
    }

    /// One cooperative slice of work. While the initial sweep is unfinished,
    /// live events accumulate and replay strictly after it, so a stale sweep
    /// entry can never overwrite a newer update.
    pub fn tick(&mut self, now: Instant) {
        while let Ok(event) = self.rx.try_recv() {
            self.queued.push_back(event);
        }

        if let Some(mut sweep) = self.initial_sync.take() {
            let status = {
                let store = &mut self.store;
                let poi = &self.poi;
                let region = &self.region;
                let provider = self.provider.as_ref();
                sweep.step(now, |plot| refresh_plot(store, poi, region, provider, plot))
            };
            if status == SweepStatus::Finished {
                for world in &self.worlds {
                    info!(
                        %world,
                        markers = self.store.count(world),
                        "initial_sync_world_complete"
                    );
                }
                info!(processed = sweep.processed(), "initial_sync_complete");
            } else {
                self.initial_sync = Some(sweep);
                return;
            }
        }

        while let Some(event) = self.queued.pop_front() {
            self.dispatch(event, now);
        }

        let mut sweeps = std::mem::take(&mut self.refresh_sweeps);
        sweeps.retain_mut(|sweep| {
            let store = &mut self.store;
            let poi = &self.poi;
            let region = &self.region;
            let provider = self.provider.as_ref();
            let status = sweep.step(now, |plot| refresh_plot(store, poi, region, provider, plot));
            status != SweepStatus::Finished
        });
        self.refresh_sweeps = sweeps;

        for pending in [&self.pending_unlink, &self.pending_delete] {
            for ((world, base), record) in pending.take_stale(now, self.config.pending_max_age) {
                warn!(
                    label = pending.label(),
                    %world,
                    %base,
                    members = record.members.len(),
                    "pending_record_expired"
                );
            }
        }
    }

    fn dispatch(&mut self, event: PlotEvent, now: Instant) {
        match event {
            PlotEvent::Claimed { world, id } | PlotEvent::OwnerChanged { world, id } => {
                match self.provider.plot(&world, id) {
                    Some(plot) => self.poi.refresh(&mut self.store, &plot),
                    None => warn!(%world, %id, "plot_event_stale"),
                }
                if let Some(base) = self.provider.base_id(&world, id) {
                    self.region.refresh_group(&mut self.store, &world, base);
                }
            }
            PlotEvent::MergeCompleted { world, base } => {
                let base = self.provider.base_id(&world, base).unwrap_or(base);
                for member in self.provider.connected_ids(&world, base) {
                    self.region.remove(&mut self.store, &world, member);
                }
                self.region.refresh_group(&mut self.store, &world, base);
            }
            PlotEvent::UnlinkBegin { world, base } | PlotEvent::DeleteBegin { world, base } => {
                // Already recorded by the intake while the pre-state was
                // still resolvable.
                debug!(%world, %base, "begin_event_passthrough");
            }
            PlotEvent::UnlinkCompleted { world, base } => {
                match self.pending_unlink.complete(&world, base) {
                    Some(members) => {
                        for member in members {
                            self.region.refresh_group(&mut self.store, &world, member);
                        }
                    }
                    None => warn!(%world, %base, "pending_unlink_missing"),
                }
            }
            PlotEvent::DeleteCompleted { world, base } => {
                match self.pending_delete.complete(&world, base) {
                    Some(members) => {
                        for member in members {
                            self.poi.remove(&mut self.store, &world, member);
                            self.region.remove(&mut self.store, &world, member);
                        }
                    }
                    None => warn!(%world, %base, "pending_delete_missing"),
                }
            }
            PlotEvent::PlayerDeparted { owner } => {
                let plots = self.provider.plots_owned_by(&owner);
                debug!(%owner, plots = plots.len(), "departure_refresh_scheduled");
                self.refresh_sweeps.push(PlotSweep::delayed(
                    plots,
                    self.config.slice_budget,
                    now + self.config.departure_grace,
                ));
            }
        }
    }

    pub fn marker_store(&self) -> &MarkerStore {
        &self.store
    }

    pub fn initial_sync_pending(&self) -> bool {
        self.initial_sync.is_some()
    }

    pub fn active_refreshes(&self) -> usize {
        self.refresh_sweeps.len()
    }

    pub fn pending_operations(&self) -> usize {
        self.pending_unlink.len() + self.pending_delete.len()
    }

    /// True once every queue, sweep, and pending record has drained.
    pub fn is_idle(&self) -> bool {
        self.initial_sync.is_none()
            && self.queued.is_empty()
            && self.refresh_sweeps.is_empty()
            && self.pending_operations() == 0
    }
}

fn refresh_plot(
    store: &mut MarkerStore,
    poi: &PoiManager,
    region: &RegionManager,
    provider: &dyn PlotProvider,
    plot: &Plot,
) {
    poi.refresh(store, plot);
    // Region markers are keyed per group; only the base plot carries one.
    if provider.base_id(&plot.world, plot.id) == Some(plot.id) {
        region.refresh_group(store, &plot.world, plot.id);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use std::thread;

    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::geometry::CellSize;
    use crate::map::{Marker, MarkerSink};
    use crate::parcel::{BlockPos, OwnerId, OwnerProfile};

    const CELL: f64 = 16.0;

    struct TestState {
        plots: BTreeMap<(WorldId, PlotId), Plot>,
        group_of: BTreeMap<(WorldId, PlotId), PlotId>,
        profiles: BTreeMap<OwnerId, OwnerProfile>,
    }

    struct TestParcels {
        state: Mutex<TestState>,
    }

    impl TestParcels {
        fn new() -> Self {
            Self {
                state: Mutex::new(TestState {
                    plots: BTreeMap::new(),
                    group_of: BTreeMap::new(),
                    profiles: BTreeMap::new(),
                }),
            }
        }

        fn add_plot(&self, world: &WorldId, id: PlotId, owner: &str) {
            let mut state = self.state.lock().expect("state");
            state.plots.insert(
                (world.clone(), id),
                Plot {
                    world: world.clone(),
                    id,
                    owner: Some(OwnerId::new(owner)),
                    bottom: BlockPos::new((id.x - 1) * CELL as i32, 0, (id.z - 1) * CELL as i32),
                    top: BlockPos::new(
                        (id.x - 1) * CELL as i32 + 15,
                        127,
                        (id.z - 1) * CELL as i32 + 15,
                    ),
                },
            );
            state.profiles.entry(OwnerId::new(owner)).or_insert(OwnerProfile {
                name: Some(owner.to_string()),
                first_seen: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
                last_seen: None,
            });
        }

        fn set_owner(&self, world: &WorldId, id: PlotId, owner: &str) {
            let mut state = self.state.lock().expect("state");
            if let Some(plot) = state.plots.get_mut(&(world.clone(), id)) {
                plot.owner = Some(OwnerId::new(owner));
            }
            state.profiles.entry(OwnerId::new(owner)).or_insert(OwnerProfile {
                name: Some(owner.to_string()),
                first_seen: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
                last_seen: None,
            });
        }

        fn merge(&self, world: &WorldId, base: PlotId, members: &[PlotId]) {
            let mut state = self.state.lock().expect("state");
            for &member in members {
                state.group_of.insert((world.clone(), member), base);
            }
        }

        fn unlink(&self, world: &WorldId, base: PlotId) {
            let mut state = self.state.lock().expect("state");
            state.group_of.retain(|(w, _), b| !(w == world && *b == base));
        }

        fn remove_group(&self, world: &WorldId, base: PlotId) {
            let mut state = self.state.lock().expect("state");
            let members: Vec<PlotId> = state
                .group_of
                .iter()
                .filter(|((w, _), b)| w == world && **b == base)
                .map(|((_, member), _)| *member)
                .collect();
            let members = if members.is_empty() { vec![base] } else { members };
            for member in members {
                state.plots.remove(&(world.clone(), member));
                state.group_of.remove(&(world.clone(), member));
            }
        }
    }

    impl PlotProvider for TestParcels {
        fn all_plots(&self) -> Vec<Plot> {
            self.state
                .lock()
                .expect("state")
                .plots
                .values()
                .cloned()
                .collect()
        }

        fn plot(&self, world: &WorldId, id: PlotId) -> Option<Plot> {
            self.state
                .lock()
                .expect("state")
                .plots
                .get(&(world.clone(), id))
                .cloned()
        }

        fn base_id(&self, world: &WorldId, id: PlotId) -> Option<PlotId> {
            let state = self.state.lock().expect("state");
            if let Some(base) = state.group_of.get(&(world.clone(), id)) {
                return Some(*base);
            }
            state.plots.contains_key(&(world.clone(), id)).then_some(id)
        }

        fn connected_ids(&self, world: &WorldId, base: PlotId) -> Vec<PlotId> {
            let state = self.state.lock().expect("state");
            let mut members: Vec<PlotId> = state
                .group_of
                .iter()
                .filter(|((w, _), b)| w == world && **b == base)
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
                .expect("state")
                .plots
                .values()
                .filter(|plot| plot.owner.as_ref() == Some(owner))
                .cloned()
                .collect()
        }

        fn owner_profile(&self, owner: &OwnerId) -> Option<OwnerProfile> {
            self.state
                .lock()
                .expect("state")
                .profiles
                .get(owner)
                .cloned()
        }

        fn plot_cell_size(&self, _world: &WorldId) -> Option<CellSize> {
            Some(CellSize::square(CELL))
        }
    }

    struct OpenSink;

    impl MarkerSink for OpenSink {
        fn supports_world(&self, world: &WorldId) -> bool {
            world.as_str() == "plotworld"
        }

        fn put(&mut self, _world: &WorldId, _key: &str, _marker: &Marker) {}

        fn remove(&mut self, _world: &WorldId, _key: &str) {}
    }

    fn world() -> WorldId {
        WorldId::from("plotworld")
    }

    fn settings() -> OverlaySettings {
        OverlaySettings::from_json_str(r#"{"worlds": {"plotworld": {}}}"#).expect("settings")
    }

    fn engine_with(
        parcels: &Arc<TestParcels>,
        config: EngineConfig,
    ) -> (OverlayEngine, EventIntake) {
        let provider: Arc<dyn PlotProvider> = Arc::clone(parcels) as Arc<dyn PlotProvider>;
        OverlayEngine::new(provider, Box::new(OpenSink), settings(), config)
    }

    fn keys_with_prefix(engine: &OverlayEngine, prefix: &str) -> Vec<String> {
        engine
            .marker_store()
            .keys(&world())
            .into_iter()
            .filter(|key| key.starts_with(prefix))
            .collect()
    }

    fn run_until_synced(engine: &mut OverlayEngine) {
        while engine.initial_sync_pending() {
            engine.tick(Instant::now());
        }
    }

    #[test]
    fn initial_sync_creates_point_and_region_markers() {
        let parcels = Arc::new(TestParcels::new());
        parcels.add_plot(&world(), PlotId::new(1, 1), "alice");
        parcels.add_plot(&world(), PlotId::new(3, 3), "bob");

        let (mut engine, _intake) = engine_with(&parcels, EngineConfig::default());
        run_until_synced(&mut engine);

        assert_eq!(keys_with_prefix(&engine, "poi:").len(), 2);
        assert_eq!(keys_with_prefix(&engine, "region:").len(), 2);
    }

    #[test]
    fn events_during_initial_sync_replay_after_it() {
        let parcels = Arc::new(TestParcels::new());
        for x in 1..=3 {
            parcels.add_plot(&world(), PlotId::new(x, 1), "alice");
        }

        let config = EngineConfig {
            slice_budget: Duration::ZERO,
            ..EngineConfig::default()
        };
        let (mut engine, intake) = engine_with(&parcels, config);

        // First slice processes exactly one plot; the ownership change lands
        // while the sweep still holds a stale snapshot of plot 1;1.
        engine.tick(Instant::now());
        assert!(engine.initial_sync_pending());
        parcels.set_owner(&world(), PlotId::new(1, 1), "bob");
        intake.submit(PlotEvent::OwnerChanged {
            world: world(),
            id: PlotId::new(1, 1),
        });

        engine.tick(Instant::now());
        assert!(engine.initial_sync_pending());

        run_until_synced(&mut engine);
        engine.tick(Instant::now());

        let marker = engine
            .marker_store()
            .get(&world(), "poi:plotworld:1;1")
            .expect("marker");
        assert_eq!(marker.label(), "bob");
    }

    #[test]
    fn merge_collapses_member_regions_into_one() {
        let parcels = Arc::new(TestParcels::new());
        let base = PlotId::new(1, 1);
        let other = PlotId::new(2, 1);
        parcels.add_plot(&world(), base, "alice");
        parcels.add_plot(&world(), other, "alice");

        let (mut engine, intake) = engine_with(&parcels, EngineConfig::default());
        run_until_synced(&mut engine);
        assert_eq!(keys_with_prefix(&engine, "region:").len(), 2);

        parcels.merge(&world(), base, &[base, other]);
        intake.submit(PlotEvent::MergeCompleted {
            world: world(),
            base,
        });
        engine.tick(Instant::now());

        assert_eq!(
            keys_with_prefix(&engine, "region:"),
            vec!["region:plotworld:1;1".to_string()]
        );
        // Point markers survive the merge, one per member.
        assert_eq!(keys_with_prefix(&engine, "poi:").len(), 2);
    }

    #[test]
    fn merge_then_unlink_restores_individual_regions() {
        let parcels = Arc::new(TestParcels::new());
        let base = PlotId::new(1, 1);
        let other = PlotId::new(2, 1);
        parcels.add_plot(&world(), base, "alice");
        parcels.add_plot(&world(), other, "alice");

        let (mut engine, intake) = engine_with(&parcels, EngineConfig::default());
        run_until_synced(&mut engine);

        parcels.merge(&world(), base, &[base, other]);
        intake.submit(PlotEvent::MergeCompleted {
            world: world(),
            base,
        });
        engine.tick(Instant::now());

        intake.submit(PlotEvent::UnlinkBegin {
            world: world(),
            base,
        });
        parcels.unlink(&world(), base);
        intake.submit(PlotEvent::UnlinkCompleted {
            world: world(),
            base,
        });
        engine.tick(Instant::now());

        let mut region_keys = keys_with_prefix(&engine, "region:");
        region_keys.sort();
        assert_eq!(
            region_keys,
            vec![
                "region:plotworld:1;1".to_string(),
                "region:plotworld:2;1".to_string()
            ]
        );
        assert_eq!(engine.pending_operations(), 0);
    }

    #[test]
    fn delete_removes_markers_for_every_member() {
        let parcels = Arc::new(TestParcels::new());
        let base = PlotId::new(1, 1);
        let other = PlotId::new(2, 1);
        parcels.add_plot(&world(), base, "alice");
        parcels.add_plot(&world(), other, "alice");
        parcels.merge(&world(), base, &[base, other]);

        let (mut engine, intake) = engine_with(&parcels, EngineConfig::default());
        run_until_synced(&mut engine);

        intake.submit(PlotEvent::DeleteBegin {
            world: world(),
            base,
        });
        parcels.remove_group(&world(), base);
        intake.submit(PlotEvent::DeleteCompleted {
            world: world(),
            base,
        });
        engine.tick(Instant::now());

        assert_eq!(engine.marker_store().count(&world()), 0);
        assert_eq!(engine.pending_operations(), 0);
    }

    #[test]
    fn completed_event_without_begin_changes_nothing() {
        let parcels = Arc::new(TestParcels::new());
        parcels.add_plot(&world(), PlotId::new(1, 1), "alice");

        let (mut engine, intake) = engine_with(&parcels, EngineConfig::default());
        run_until_synced(&mut engine);
        let before = engine.marker_store().count(&world());

        intake.submit(PlotEvent::UnlinkCompleted {
            world: world(),
            base: PlotId::new(9, 9),
        });
        intake.submit(PlotEvent::DeleteCompleted {
            world: world(),
            base: PlotId::new(9, 9),
        });
        engine.tick(Instant::now());

        assert_eq!(engine.marker_store().count(&world()), before);
    }

    #[test]
    fn unlink_record_with_vanished_member_skips_just_that_member() {
        let parcels = Arc::new(TestParcels::new());
        let base = PlotId::new(1, 1);
        let ghost = PlotId::new(2, 1);
        parcels.add_plot(&world(), base, "alice");
        parcels.add_plot(&world(), ghost, "alice");
        parcels.merge(&world(), base, &[base, ghost]);

        let (mut engine, intake) = engine_with(&parcels, EngineConfig::default());
        run_until_synced(&mut engine);

        intake.submit(PlotEvent::UnlinkBegin {
            world: world(),
            base,
        });
        parcels.unlink(&world(), base);
        parcels.remove_group(&world(), ghost);
        intake.submit(PlotEvent::UnlinkCompleted {
            world: world(),
            base,
        });
        engine.tick(Instant::now());

        let region_keys = keys_with_prefix(&engine, "region:");
        assert_eq!(region_keys, vec!["region:plotworld:1;1".to_string()]);
    }

    #[test]
    fn departure_refresh_waits_out_the_grace_period() {
        let parcels = Arc::new(TestParcels::new());
        parcels.add_plot(&world(), PlotId::new(1, 1), "alice");

        let (mut engine, intake) = engine_with(&parcels, EngineConfig::default());
        run_until_synced(&mut engine);

        parcels.set_owner(&world(), PlotId::new(1, 1), "bob");
        intake.submit(PlotEvent::PlayerDeparted {
            owner: OwnerId::new("bob"),
        });
        let scheduled_at = Instant::now();
        engine.tick(scheduled_at);

        assert_eq!(engine.active_refreshes(), 1);
        let marker = engine
            .marker_store()
            .get(&world(), "poi:plotworld:1;1")
            .expect("marker");
        assert_eq!(marker.label(), "alice");

        engine.tick(scheduled_at + Duration::from_secs(1));
        assert_eq!(engine.active_refreshes(), 0);
        let marker = engine
            .marker_store()
            .get(&world(), "poi:plotworld:1;1")
            .expect("marker");
        assert_eq!(marker.label(), "bob");
    }

    #[test]
    fn stale_pending_records_are_flushed() {
        let parcels = Arc::new(TestParcels::new());
        parcels.add_plot(&world(), PlotId::new(1, 1), "alice");

        let (mut engine, intake) = engine_with(&parcels, EngineConfig::default());
        run_until_synced(&mut engine);

        intake.submit(PlotEvent::DeleteBegin {
            world: world(),
            base: PlotId::new(1, 1),
        });
        engine.tick(Instant::now());
        assert_eq!(engine.pending_operations(), 1);

        engine.tick(Instant::now() + Duration::from_secs(120));
        assert_eq!(engine.pending_operations(), 0);
    }

    #[test]
    fn events_submitted_from_another_thread_are_applied() {
        let parcels = Arc::new(TestParcels::new());
        let (mut engine, intake) = engine_with(&parcels, EngineConfig::default());
        run_until_synced(&mut engine);

        parcels.add_plot(&world(), PlotId::new(4, 4), "carol");
        let remote = intake.clone();
        thread::spawn(move || {
            remote.submit(PlotEvent::Claimed {
                world: WorldId::from("plotworld"),
                id: PlotId::new(4, 4),
            });
        })
        .join()
        .expect("submitter thread");

        engine.tick(Instant::now());
        assert!(engine
            .marker_store()
            .get(&world(), "poi:plotworld:4;4")
            .is_some());
        assert!(engine.is_idle());
    }
}
