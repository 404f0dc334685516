use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::format::{Item, StrftimeItems};
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use crate::map::{IconRef, Rgba};
use crate::parcel::WorldId;

pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d";
pub const DEFAULT_COLOR: Rgba = Rgba {
    r: 0x33,
    g: 0x66,
    b: 0xcc,
    a: 1.0,
};
pub const DEFAULT_FILL_OPACITY: f32 = 0.3;
pub const DEFAULT_LINE_OPACITY: f32 = 1.0;
pub const DEFAULT_LINE_WIDTH: u32 = 2;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse settings: {0}")]
    Parse(#[source] serde_json::Error),
}

/// Engine-wide settings. Only worlds listed here get markers at all.
#[derive(Debug, Clone, Deserialize)]
pub struct OverlaySettings {
    #[serde(default = "default_date_format")]
    pub date_format: String,
    #[serde(default)]
    pub worlds: BTreeMap<String, WorldSettings>,
}

impl Default for OverlaySettings {
    fn default() -> Self {
        Self {
            date_format: default_date_format(),
            worlds: BTreeMap::new(),
        }
    }
}

impl OverlaySettings {
    pub fn from_json_str(raw: &str) -> Result<Self, SettingsError> {
        serde_json::from_str(raw).map_err(SettingsError::Parse)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, SettingsError> {
        let raw = fs::read_to_string(path).map_err(|source| SettingsError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn world(&self, world: &WorldId) -> Option<&WorldSettings> {
        self.worlds.get(world.as_str())
    }

    pub fn world_ids(&self) -> impl Iterator<Item = WorldId> + '_ {
        self.worlds.keys().map(|name| WorldId::new(name.clone()))
    }

    /// The configured date format if chrono can render it, otherwise the
    /// documented default. A broken format string must not take down marker
    /// creation.
    pub fn checked_date_format(&self) -> String {
        let has_error = StrftimeItems::new(&self.date_format).any(|item| matches!(item, Item::Error));
        if has_error {
            warn!(
                date_format = %self.date_format,
                fallback = DEFAULT_DATE_FORMAT,
                "settings_bad_date_format"
            );
            DEFAULT_DATE_FORMAT.to_string()
        } else {
            self.date_format.clone()
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorldSettings {
    /// Fixed marker height; `None` places markers at the average of the
    /// plot's vertical bounds.
    pub y_override: Option<f64>,
    pub icon: Option<IconSettings>,
    pub fill_color: String,
    pub fill_opacity: f32,
    pub line_color: String,
    pub line_opacity: f32,
    pub line_width: u32,
}

impl Default for WorldSettings {
    fn default() -> Self {
        Self {
            y_override: None,
            icon: None,
            fill_color: format_hex(DEFAULT_COLOR),
            fill_opacity: DEFAULT_FILL_OPACITY,
            line_color: format_hex(DEFAULT_COLOR),
            line_opacity: DEFAULT_LINE_OPACITY,
            line_width: DEFAULT_LINE_WIDTH,
        }
    }
}

impl WorldSettings {
    pub fn fill(&self) -> Rgba {
        parse_hex_color(&self.fill_color).with_alpha(self.fill_opacity)
    }

    pub fn line(&self) -> Rgba {
        parse_hex_color(&self.line_color).with_alpha(self.line_opacity)
    }

    pub fn icon_ref(&self) -> Option<IconRef> {
        self.icon.as_ref().map(|icon| IconRef {
            path: icon.path.clone(),
            anchor_x: icon.anchor_x,
            anchor_y: icon.anchor_y,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IconSettings {
    pub path: String,
    #[serde(default)]
    pub anchor_x: i32,
    #[serde(default)]
    pub anchor_y: i32,
}

fn default_date_format() -> String {
    DEFAULT_DATE_FORMAT.to_string()
}

fn format_hex(color: Rgba) -> String {
    format!("#{:02x}{:02x}{:02x}", color.r, color.g, color.b)
}

/// Parses `#RRGGBB` (the `#` is optional). An unparseable value falls back to
/// the documented default color and is logged, never an error.
fn parse_hex_color(raw: &str) -> Rgba {
    let digits = raw.trim().trim_start_matches('#');
    if digits.len() == 6 {
        if let Ok(packed) = u32::from_str_radix(digits, 16) {
            return Rgba::new(
                ((packed >> 16) & 0xff) as u8,
                ((packed >> 8) & 0xff) as u8,
                (packed & 0xff) as u8,
                1.0,
            );
        }
    }
    warn!(color = raw, "settings_bad_color");
    DEFAULT_COLOR
}
