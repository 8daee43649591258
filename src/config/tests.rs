//! Unit tests for configuration module
//!
//! Tests configuration parsing, validation, serialization/deserialization,
//! and edge cases in configuration handling.

use super::*;
use anyhow::Result;
use std::fs;
use tempfile::tempdir;

#[test]
fn test_default_configuration_is_valid() {
    let config = OsrConfig::default();
    assert!(config.validate().is_ok());

    assert_eq!(config.surface.frame_rate, 60);
    assert!(config.surface.painting);
    assert_eq!(config.pacing.retry_limit, 2);
    assert_eq!(config.pacing.immediate_delivery_divisor, 4);
    assert_eq!(config.pacing.estimated_composite_fraction, 3);
    assert!(!config.capture.software_output);
}

#[test]
fn test_configuration_serialization_roundtrip() -> Result<()> {
    let mut original = OsrConfig::default();
    original.surface.frame_rate = 30;
    original.capture.output_dir = Some(PathBuf::from("/tmp/frames"));

    let toml_string = toml::to_string(&original)?;
    let deserialized: OsrConfig = toml::from_str(&toml_string)?;

    assert_eq!(original, deserialized);
    Ok(())
}

#[test]
fn test_configuration_from_file() -> Result<()> {
    let dir = tempdir()?;
    let file_path = dir.path().join("osrview.toml");

    let test_config = r##"
[surface]
width = 1280
height = 720
scale_factor = 2.0
frame_rate = 144
transparent = true
background_color = "#336699"

[pacing]
retry_limit = 3

[capture]
software_output = true
max_frames = 10

[general]
debug = true
"##;
    fs::write(&file_path, test_config)?;

    let config = OsrConfig::load(&file_path)?;
    assert_eq!(config.surface.width, 1280);
    assert_eq!(config.surface.scale_factor, 2.0);
    assert_eq!(config.surface.frame_rate, 144);
    assert!(config.surface.painting);
    assert_eq!(config.pacing.retry_limit, 3);
    assert_eq!(config.pacing.immediate_delivery_divisor, 4);
    assert!(config.capture.software_output);
    assert_eq!(config.capture.max_frames, 10);
    assert!(config.general.debug);

    // Transparent surfaces start clear regardless of the configured colour.
    assert_eq!(config.surface.background(), Some(Color::TRANSPARENT));
    Ok(())
}

#[test]
fn test_partial_configuration_uses_defaults() -> Result<()> {
    let config: OsrConfig = toml::from_str("[surface]\nframe_rate = 24\n")?;
    assert_eq!(config.surface.frame_rate, 24);
    assert_eq!(config.surface.width, 800);
    assert_eq!(config.pacing, PacingConfig::default());
    Ok(())
}

#[test]
fn test_out_of_range_frame_rate_is_not_rejected() {
    let mut config = OsrConfig::default();
    config.surface.frame_rate = 1000;
    assert!(config.validate().is_ok());
    config.surface.frame_rate = 0;
    assert!(config.validate().is_ok());
}

#[test]
fn test_invalid_configurations_are_rejected() {
    let mut config = OsrConfig::default();
    config.surface.width = 0;
    assert!(config.validate().is_err());

    let mut config = OsrConfig::default();
    config.surface.scale_factor = 0.0;
    assert!(config.validate().is_err());

    let mut config = OsrConfig::default();
    config.surface.scale_factor = f32::NAN;
    assert!(config.validate().is_err());

    let mut config = OsrConfig::default();
    config.surface.background_color = "white".to_string();
    assert!(config.validate().is_err());

    let mut config = OsrConfig::default();
    config.pacing.immediate_delivery_divisor = 0;
    assert!(config.validate().is_err());

    let mut config = OsrConfig::default();
    config.pacing.estimated_composite_fraction = 0;
    assert!(config.validate().is_err());
}

#[test]
fn test_invalid_file_fails_to_load() -> Result<()> {
    let dir = tempdir()?;
    let file_path = dir.path().join("broken.toml");
    fs::write(&file_path, "[surface]\nwidth = \"wide\"\n")?;
    assert!(OsrConfig::load(&file_path).is_err());

    let file_path = dir.path().join("invalid.toml");
    fs::write(&file_path, "[surface]\nscale_factor = -1.0\n")?;
    assert!(OsrConfig::load(&file_path).is_err());

    assert!(OsrConfig::load(dir.path().join("missing.toml")).is_err());
    Ok(())
}

#[test]
fn test_save_and_reload() -> Result<()> {
    let dir = tempdir()?;
    let file_path = dir.path().join("saved.toml");

    let mut config = OsrConfig::default();
    config.surface.background_color = "#10203040".to_string();
    config.capture.fail_every = 5;
    config.save(&file_path)?;

    let reloaded = OsrConfig::load(&file_path)?;
    assert_eq!(reloaded, config);
    Ok(())
}

#[test]
fn test_merge_partial_overrides_changed_sections() {
    let base = OsrConfig::default();
    let mut partial = OsrConfig::default();
    partial.pacing.retry_limit = 5;

    let merged = base.merge_partial(partial);
    assert_eq!(merged.pacing.retry_limit, 5);
    assert_eq!(merged.surface, SurfaceConfig::default());
}

#[test]
fn test_log_filter_honours_config_and_flag() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("osrview.toml");
    fs::write(&path, "[general]\ndebug = true\n")?;

    let config = OsrConfig::load(&path)?;
    assert_eq!(config.log_filter(false), "debug");

    let quiet = OsrConfig::default();
    assert_eq!(quiet.log_filter(false), "info");
    assert_eq!(quiet.log_filter(true), "debug");
    Ok(())
}
