mod parcels;

use std::env;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use plotmap::{
    EngineConfig, EventIntake, OverlayEngine, OverlaySettings, PlotEvent, PlotId, WorldId,
};

use parcels::{LoggingSink, MemoryParcels};

const DEFAULT_SETTINGS: &str = r##"{
    "date_format": "%Y-%m-%d",
    "worlds": {
        "plotworld": {
            "y_override": 63.0,
            "fill_color": "#3366cc",
            "fill_opacity": 0.3,
            "line_color": "#3366cc",
            "line_opacity": 1.0,
            "line_width": 2
        }
    }
}"##;

const TICK_INTERVAL: Duration = Duration::from_millis(50);

fn main() {
    init_tracing();
    info!("=== plot overlay host simulation ===");

    let settings_path = env::args().nth(1).unwrap_or_else(|| "settings.json".to_string());
    let settings = load_settings(Path::new(&settings_path));
    let worlds: Vec<WorldId> = settings.world_ids().collect();

    let parcels = Arc::new(MemoryParcels::new());
    seed_plots(&parcels);

    let (mut engine, intake) = OverlayEngine::new(
        Arc::clone(&parcels) as Arc<dyn plotmap::PlotProvider>,
        Box::new(LoggingSink::new(worlds.clone())),
        settings,
        EngineConfig::default(),
    );

    let scenario_parcels = Arc::clone(&parcels);
    let scenario = thread::spawn(move || run_scenario(&scenario_parcels, &intake));

    while !scenario.is_finished() || !engine.is_idle() {
        engine.tick(Instant::now());
        thread::sleep(TICK_INTERVAL);
    }
    engine.tick(Instant::now());
    if let Err(payload) = scenario.join() {
        std::panic::resume_unwind(payload);
    }

    for world in &worlds {
        info!(%world, markers = engine.marker_store().count(world), "final_marker_count");
    }
    info!("shutdown");
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .compact()
        .init();
}

fn load_settings(path: &Path) -> OverlaySettings {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(_) => {
            info!(path = %path.display(), "settings_file_absent_using_defaults");
            DEFAULT_SETTINGS.to_string()
        }
    };
    let mut deserializer = serde_json::Deserializer::from_str(&raw);
    match serde_path_to_error::deserialize::<_, OverlaySettings>(&mut deserializer) {
        Ok(settings) => settings,
        Err(err) => {
            error!(
                path = %path.display(),
                at = %err.path(),
                error = %err,
                "settings_parse_failed_using_defaults"
            );
            OverlaySettings::from_json_str(DEFAULT_SETTINGS).expect("built-in settings parse")
        }
    }
}

fn seed_plots(parcels: &MemoryParcels) {
    let world = WorldId::from("plotworld");
    parcels.claim(&world, PlotId::new(1, 1), "alice");
    parcels.claim(&world, PlotId::new(2, 1), "alice");
    parcels.claim(&world, PlotId::new(3, 3), "bob");
}

/// Scripted lifecycle traffic: each step mutates the parcel state first, then
/// raises the matching event, the same order the real parcel system uses.
fn run_scenario(parcels: &MemoryParcels, intake: &EventIntake) {
    let world = WorldId::from("plotworld");
    let step = Duration::from_millis(120);

    thread::sleep(step);
    parcels.claim(&world, PlotId::new(4, 2), "carol");
    intake.submit(PlotEvent::Claimed {
        world: world.clone(),
        id: PlotId::new(4, 2),
    });

    thread::sleep(step);
    parcels.set_owner(&world, PlotId::new(3, 3), "dave");
    intake.submit(PlotEvent::OwnerChanged {
        world: world.clone(),
        id: PlotId::new(3, 3),
    });

    thread::sleep(step);
    let base = PlotId::new(1, 1);
    parcels.merge(&world, base, &[base, PlotId::new(2, 1)]);
    intake.submit(PlotEvent::MergeCompleted {
        world: world.clone(),
        base,
    });

    thread::sleep(step);
    intake.submit(PlotEvent::UnlinkBegin {
        world: world.clone(),
        base,
    });
    parcels.unlink(&world, base);
    intake.submit(PlotEvent::UnlinkCompleted {
        world: world.clone(),
        base,
    });

    thread::sleep(step);
    intake.submit(PlotEvent::DeleteBegin {
        world: world.clone(),
        base: PlotId::new(3, 3),
    });
    parcels.delete(&world, PlotId::new(3, 3));
    intake.submit(PlotEvent::DeleteCompleted {
        world: world.clone(),
        base: PlotId::new(3, 3),
    });

    thread::sleep(step);
    intake.submit(PlotEvent::PlayerDeparted {
        owner: plotmap::OwnerId::new("carol"),
    });
}
