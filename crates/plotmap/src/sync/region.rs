use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::geometry::{tile, CellSize, GridPos};
use crate::map::{region_key, Marker, MarkerStore, RegionMarker};
use crate::parcel::{PlotId, PlotProvider, WorldId};
use crate::settings::OverlaySettings;

use super::describe::marker_text;

/// Keeps the region markers for plot groups: one filled polygon (with holes
/// where the group encloses unclaimed cells) per connected component of the
/// group's cell set.
pub struct RegionManager {
    provider: Arc<dyn PlotProvider>,
    settings: OverlaySettings,
    date_format: String,
    cell_sizes: HashMap<WorldId, CellSize>,
}

impl RegionManager {
    pub fn new(
        provider: Arc<dyn PlotProvider>,
        settings: OverlaySettings,
        cell_sizes: HashMap<WorldId, CellSize>,
    ) -> Self {
        let date_format = settings.checked_date_format();
        Self {
            provider,
            settings,
            date_format,
            cell_sizes,
        }
    }

    /// Recomputes and republishes the region markers for the group rooted at
    /// `base`, clearing any stale extra polygons from a previous shape.
    pub fn refresh_group(&self, store: &mut MarkerStore, world: &WorldId, base: PlotId) {
        let Some(world_settings) = self.settings.world(world) else {
            debug!(%world, %base, "region_world_unconfigured");
            return;
        };
        let Some(cell_size) = self.cell_sizes.get(world).copied() else {
            warn!(%world, %base, "region_cell_size_unknown");
            return;
        };
        let Some(base_plot) = self.provider.plot(world, base) else {
            warn!(%world, %base, "region_plot_missing");
            return;
        };
        let Some(owner) = base_plot.owner.as_ref() else {
            debug!(%world, %base, "region_plot_unowned");
            return;
        };

        let members = self.provider.connected_ids(world, base);
        let cells: Vec<GridPos> = members
            .iter()
            // Plot ids are 1-based; the cell grid starts at the origin.
            .map(|id| GridPos::new(id.x - 1, id.z - 1))
            .collect();
        let regions = tile(cell_size, &cells);

        let text = marker_text(self.provider.as_ref(), owner, base, &self.date_format);
        let y = world_settings
            .y_override
            .unwrap_or_else(|| f64::from(base_plot.top.y + base_plot.bottom.y) / 2.0);
        let fill_color = world_settings.fill();
        let line_color = world_settings.line();

        let mut index = 0;
        for region in regions {
            store.upsert(
                world,
                &region_key(world, base, index),
                Marker::Region(RegionMarker {
                    outline: region.outline,
                    holes: region.holes,
                    y,
                    label: text.label.clone(),
                    detail: text.detail.clone(),
                    line_width: world_settings.line_width,
                    fill_color,
                    line_color,
                }),
            );
            index += 1;
        }
        while store.remove(world, &region_key(world, base, index)) {
            index += 1;
        }
    }

    /// Removes every region marker keyed to `base`, probing index suffixes
    /// until one is absent.
    pub fn remove(&self, store: &mut MarkerStore, world: &WorldId, base: PlotId) {
        let mut index = 0;
        while store.remove(world, &region_key(world, base, index)) {
            index += 1;
        }
    }
}
