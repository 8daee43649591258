//! Configuration management for osrview
//!
//! This module handles loading, parsing, and validating configuration
//! from TOML files. It covers the initial surface properties, the frame
//! pacing policy, capture output, and general settings.

use crate::renderer::bitmap::Color;
use crate::renderer::frame_pacing::{
    DEFAULT_ESTIMATED_COMPOSITE_FRACTION, DEFAULT_FRAME_RATE, DEFAULT_IMMEDIATE_DELIVERY_DIVISOR,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration struct containing all osrview settings
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct OsrConfig {
    /// Initial properties of the top-level surface
    #[serde(default)]
    pub surface: SurfaceConfig,

    /// Frame pacing and capture retry policy
    #[serde(default)]
    pub pacing: PacingConfig,

    /// Where captured frames go
    #[serde(default)]
    pub capture: CaptureConfig,

    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,
}

/// Initial surface properties
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SurfaceConfig {
    /// Logical width (pixels at scale 1.0)
    pub width: u32,

    /// Logical height (pixels at scale 1.0)
    pub height: u32,

    /// Device scale factor
    pub scale_factor: f32,

    /// Frames per second; values outside 1-240 are clamped when applied
    pub frame_rate: i32,

    /// Start with a fully transparent background
    pub transparent: bool,

    /// Deliver frames to the embedder
    pub painting: bool,

    /// Background colour ("#RRGGBB" or "#RRGGBBAA")
    pub background_color: String,
}

/// Frame pacing policy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PacingConfig {
    /// Failed captures re-issued before a frame is dropped
    pub retry_limit: u32,

    /// Captures landing within `interval / divisor` of their slot are
    /// delivered immediately
    pub immediate_delivery_divisor: u32,

    /// Estimated browser composite time is `1s / (fraction * 60)`
    pub estimated_composite_fraction: u32,
}

/// Capture output settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CaptureConfig {
    /// Compositor draws straight into CPU memory instead of being read back
    pub software_output: bool,

    /// Directory for PNG dumps of delivered frames
    pub output_dir: Option<PathBuf>,

    /// Stop after this many delivered frames (0 = run until interrupted)
    pub max_frames: u32,

    /// Headless backend fault injection: every Nth capture fails (0 = never)
    pub fail_every: u32,
}

/// General settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct GeneralConfig {
    /// Enable debug logging
    pub debug: bool,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            scale_factor: 1.0,
            frame_rate: DEFAULT_FRAME_RATE as i32,
            transparent: false,
            painting: true,
            background_color: "#FFFFFF".to_string(),
        }
    }
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            retry_limit: crate::capture::FRAME_RETRY_LIMIT,
            immediate_delivery_divisor: DEFAULT_IMMEDIATE_DELIVERY_DIVISOR,
            estimated_composite_fraction: DEFAULT_ESTIMATED_COMPOSITE_FRACTION,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            software_output: false,
            output_dir: None,
            max_frames: 0,
            fail_every: 0,
        }
    }
}

impl SurfaceConfig {
    /// Parsed background colour. Transparent surfaces always start clear.
    pub fn background(&self) -> Option<Color> {
        if self.transparent {
            return Some(Color::TRANSPARENT);
        }
        Color::from_hex(&self.background_color)
    }
}

impl OsrConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        // Expand ~ to home directory
        let expanded_path = if path.to_string_lossy().starts_with('~') {
            let home = std::env::var("HOME").context("Failed to get HOME environment variable")?;
            Path::new(&home).join(path.strip_prefix("~").unwrap_or(path))
        } else {
            path.to_path_buf()
        };

        let contents = fs::read_to_string(&expanded_path)
            .with_context(|| format!("Failed to read config file: {}", expanded_path.display()))?;

        let config: OsrConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", expanded_path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Default `env_logger` filter, before `RUST_LOG` is applied
    pub fn log_filter(&self, debug_flag: bool) -> &'static str {
        if debug_flag || self.general.debug {
            "debug"
        } else {
            "info"
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.surface.width == 0 || self.surface.height == 0 {
            anyhow::bail!(
                "Invalid surface size {}x{}: both dimensions must be non-zero",
                self.surface.width,
                self.surface.height
            );
        }

        if !(self.surface.scale_factor > 0.0 && self.surface.scale_factor.is_finite()) {
            anyhow::bail!("Invalid scale_factor: must be a positive number");
        }

        if Color::from_hex(&self.surface.background_color).is_none() {
            anyhow::bail!(
                "Invalid background_color: {} (expected #RRGGBB or #RRGGBBAA)",
                self.surface.background_color
            );
        }

        if self.pacing.immediate_delivery_divisor == 0 {
            anyhow::bail!("Invalid immediate_delivery_divisor: must be at least 1");
        }

        if self.pacing.estimated_composite_fraction == 0 {
            anyhow::bail!("Invalid estimated_composite_fraction: must be at least 1");
        }

        Ok(())
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        fs::write(path, contents).context("Failed to write configuration file")?;

        Ok(())
    }

    /// Merge a partial configuration into this one
    /// Sections of the partial config that differ from the defaults win
    pub fn merge_partial(mut self, partial: OsrConfig) -> Self {
        let default_config = OsrConfig::default();

        if partial.surface != default_config.surface {
            self.surface = partial.surface;
        }
        if partial.pacing != default_config.pacing {
            self.pacing = partial.pacing;
        }
        if partial.capture != default_config.capture {
            self.capture = partial.capture;
        }
        if partial.general != default_config.general {
            self.general = partial.general;
        }

        self
    }
}

#[cfg(test)]
mod tests;
