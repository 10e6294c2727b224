//! Renderer configuration.
//!
//! [`RendererConfig`] holds the values fixed for the lifetime of a renderer
//! and can be read from the `[renderer]` section of an INI file:
//!
//! ```ini
//! [renderer]
//! max_tile_uploads = 8
//! fade_time_ms = 500
//! placeholder_headroom = 16
//! zoom_above = 2
//! zoom_below = 4
//! overdraw_color = 0x00000000
//! alpha = 1.0
//! ```
//!
//! [`RenderSettings`] are the values that may change every frame.

use std::path::Path;

use ini::Ini;
use thiserror::Error;

use crate::tile::DEFAULT_PLACEHOLDER_HEADROOM;

/// Default number of tile uploads per frame.
///
/// Uploading is the expensive part of a frame; capping it keeps frame times
/// bounded while new tiles stream in.
pub const DEFAULT_MAX_TILE_UPLOADS: usize = 8;

/// Default fade-in duration for newly drawn tiles, in milliseconds.
pub const DEFAULT_FADE_TIME_MS: u64 = 500;

/// Tile zooms more than this many levels above the camera zoom are not
/// scanned for visibility.
pub const DEFAULT_ZOOM_ABOVE: u8 = 2;

/// Tile zooms more than this many levels below the camera zoom are not
/// scanned for visibility.
pub const DEFAULT_ZOOM_BELOW: u8 = 4;

const SECTION: &str = "renderer";

/// Errors raised while loading renderer configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read or parse the config file
    #[error("Failed to read config file: {0}")]
    Read(#[from] ini::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {section}.{key} = '{value}' - {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(key: &str, value: &str, reason: &str) -> Self {
        ConfigError::InvalidValue {
            section: SECTION.to_string(),
            key: key.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Static renderer configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RendererConfig {
    /// Maximum tile uploads per frame. Always at least 1.
    pub max_tile_uploads: usize,
    /// Fade-in duration in milliseconds.
    pub fade_time_ms: u64,
    /// Draw-set slots reserved for antimeridian placeholders.
    pub placeholder_headroom: usize,
    /// See [`DEFAULT_ZOOM_ABOVE`].
    pub zoom_above: u8,
    /// See [`DEFAULT_ZOOM_BELOW`].
    pub zoom_below: u8,
    /// Initial runtime settings.
    pub settings: RenderSettings,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            max_tile_uploads: DEFAULT_MAX_TILE_UPLOADS,
            fade_time_ms: DEFAULT_FADE_TIME_MS,
            placeholder_headroom: DEFAULT_PLACEHOLDER_HEADROOM,
            zoom_above: DEFAULT_ZOOM_ABOVE,
            zoom_below: DEFAULT_ZOOM_BELOW,
            settings: RenderSettings::default(),
        }
    }
}

impl RendererConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-frame upload budget. Values below 1 are raised to 1.
    pub fn with_max_tile_uploads(mut self, max: usize) -> Self {
        self.max_tile_uploads = max.max(1);
        self
    }

    pub fn with_fade_time_ms(mut self, fade_time_ms: u64) -> Self {
        self.fade_time_ms = fade_time_ms;
        self
    }

    pub fn with_placeholder_headroom(mut self, headroom: usize) -> Self {
        self.placeholder_headroom = headroom;
        self
    }

    /// Set the zoom window scanned for visibility around the camera zoom.
    pub fn with_zoom_window(mut self, above: u8, below: u8) -> Self {
        self.zoom_above = above;
        self.zoom_below = below;
        self
    }

    pub fn with_settings(mut self, settings: RenderSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Load from an INI file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let ini = Ini::load_from_file(path)?;
        Self::from_ini(&ini)
    }

    /// Read the `[renderer]` section, starting from the defaults.
    pub fn from_ini(ini: &Ini) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let Some(section) = ini.section(Some(SECTION)) else {
            return Ok(config);
        };

        if let Some(v) = section.get("max_tile_uploads") {
            let max: usize = v.trim().parse().map_err(|_| {
                ConfigError::invalid("max_tile_uploads", v, "must be a positive integer")
            })?;
            if max == 0 {
                return Err(ConfigError::invalid(
                    "max_tile_uploads",
                    v,
                    "must be at least 1",
                ));
            }
            config.max_tile_uploads = max;
        }
        if let Some(v) = section.get("fade_time_ms") {
            config.fade_time_ms = v.trim().parse().map_err(|_| {
                ConfigError::invalid("fade_time_ms", v, "must be a non-negative integer (ms)")
            })?;
        }
        if let Some(v) = section.get("placeholder_headroom") {
            config.placeholder_headroom = v.trim().parse().map_err(|_| {
                ConfigError::invalid("placeholder_headroom", v, "must be a non-negative integer")
            })?;
        }
        if let Some(v) = section.get("zoom_above") {
            config.zoom_above = v
                .trim()
                .parse()
                .map_err(|_| ConfigError::invalid("zoom_above", v, "must be 0-255"))?;
        }
        if let Some(v) = section.get("zoom_below") {
            config.zoom_below = v
                .trim()
                .parse()
                .map_err(|_| ConfigError::invalid("zoom_below", v, "must be 0-255"))?;
        }
        if let Some(v) = section.get("overdraw_color") {
            config.settings.overdraw_color = parse_color(v).ok_or_else(|| {
                ConfigError::invalid("overdraw_color", v, "expected hex ARGB like 0xff000000")
            })?;
        }
        if let Some(v) = section.get("alpha") {
            let alpha: f32 = v
                .trim()
                .parse()
                .map_err(|_| ConfigError::invalid("alpha", v, "must be a number"))?;
            if !(0.0..=1.0).contains(&alpha) {
                return Err(ConfigError::invalid("alpha", v, "must be between 0 and 1"));
            }
            config.settings.alpha = alpha;
        }

        Ok(config)
    }
}

fn parse_color(value: &str) -> Option<u32> {
    let v = value.trim();
    let hex = v
        .strip_prefix("0x")
        .or_else(|| v.strip_prefix("0X"))
        .or_else(|| v.strip_prefix('#'))?;
    u32::from_str_radix(hex, 16).ok()
}

/// Settings that may change between frames.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderSettings {
    /// Packed ARGB color drawn behind tiles.
    pub overdraw_color: u32,
    /// Tile layer opacity. At exactly 0 the renderer releases its tiles.
    pub alpha: f32,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            overdraw_color: 0,
            alpha: 1.0,
        }
    }
}
