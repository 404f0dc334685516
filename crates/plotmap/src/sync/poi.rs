use std::sync::Arc;

use tracing::debug;

use crate::map::{poi_key, Marker, MarkerStore, PointMarker};
use crate::parcel::{Plot, PlotId, PlotProvider, WorldId};
use crate::settings::OverlaySettings;

use super::describe::marker_text;

/// Keeps one point marker per plot. Every plot of a merged group keeps its
/// own point marker; only region markers collapse on merge.
pub struct PoiManager {
    provider: Arc<dyn PlotProvider>,
    settings: OverlaySettings,
    date_format: String,
}

impl PoiManager {
    pub fn new(provider: Arc<dyn PlotProvider>, settings: OverlaySettings) -> Self {
        let date_format = settings.checked_date_format();
        Self {
            provider,
            settings,
            date_format,
        }
    }

    pub fn refresh(&self, store: &mut MarkerStore, plot: &Plot) {
        let Some(world_settings) = self.settings.world(&plot.world) else {
            debug!(world = %plot.world, id = %plot.id, "poi_world_unconfigured");
            return;
        };
        let Some(owner) = &plot.owner else {
            debug!(world = %plot.world, id = %plot.id, "poi_plot_unowned");
            return;
        };

        let text = marker_text(self.provider.as_ref(), owner, plot.id, &self.date_format);
        let x = f64::from(plot.top.x + plot.bottom.x) / 2.0 + 0.5;
        let z = f64::from(plot.top.z + plot.bottom.z) / 2.0 + 0.5;
        let y = world_settings
            .y_override
            .unwrap_or_else(|| f64::from(plot.top.y + plot.bottom.y) / 2.0);

        store.upsert(
            &plot.world,
            &poi_key(&plot.world, plot.id),
            Marker::Point(PointMarker {
                position: [x, y, z],
                label: text.label,
                detail: text.detail,
                icon: world_settings.icon_ref(),
            }),
        );
    }

    pub fn remove(&self, store: &mut MarkerStore, world: &WorldId, id: PlotId) {
        store.remove(world, &poi_key(world, id));
    }
}
