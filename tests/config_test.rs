//! Configuration loading: TOML file, environment overrides and defaults.

use sapera_gige::config::{AppConfig, ConfigError};
use sapera_gige::logging::OutputFormat;
use serial_test::serial;
use std::io::Write;
use tempfile::NamedTempFile;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
#[serial]
fn loads_values_from_toml_file() {
    let file = write_config(
        r#"
[application]
log_level = "debug"
log_format = "json"

[camera]
server = "Nano-M1280_1"
snap_timeout_ms = 750
default_exposure_ms = 12.5
"#,
    );

    let config = AppConfig::load_from(file.path()).unwrap();
    assert_eq!(config.application.log_level, "debug");
    assert_eq!(config.application.log_format, OutputFormat::Json);
    assert_eq!(config.camera.server.as_deref(), Some("Nano-M1280_1"));
    assert_eq!(config.camera.snap_timeout_ms, 750);
    assert_eq!(config.camera.default_exposure_ms, 12.5);
    // Unset keys keep their defaults
    assert_eq!(config.camera.buffer_count, 2);
    assert!(config.validate().is_ok());
}

#[test]
#[serial]
fn missing_file_yields_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = AppConfig::load_from(dir.path().join("absent.toml")).unwrap();
    assert_eq!(config, AppConfig::default());
}

#[test]
#[serial]
fn environment_overrides_file() {
    let file = write_config("[camera]\nsnap_timeout_ms = 750\n");

    std::env::set_var("SAPERA_GIGE_CAMERA__SNAP_TIMEOUT_MS", "1200");
    std::env::set_var("SAPERA_GIGE_APPLICATION__LOG_LEVEL", "warn");
    let loaded = AppConfig::load_from(file.path());
    std::env::remove_var("SAPERA_GIGE_CAMERA__SNAP_TIMEOUT_MS");
    std::env::remove_var("SAPERA_GIGE_APPLICATION__LOG_LEVEL");

    let config = loaded.unwrap();
    assert_eq!(config.camera.snap_timeout_ms, 1200);
    assert_eq!(config.application.log_level, "warn");
}

#[test]
#[serial]
fn wrong_type_is_a_load_error() {
    let file = write_config("[camera]\nbuffer_count = \"many\"\n");
    assert!(matches!(
        AppConfig::load_from(file.path()),
        Err(ConfigError::Load(_))
    ));
}

#[test]
#[serial]
fn out_of_range_values_fail_validation() {
    let file = write_config("[camera]\nbuffer_count = 0\n");
    let config = AppConfig::load_from(file.path()).unwrap();
    assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
}

#[test]
#[serial]
fn shipped_sample_config_is_valid() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/sapera.toml");
    let config = AppConfig::load_from(path).unwrap();
    config.validate().unwrap();
    assert_eq!(config.camera, AppConfig::default().camera);
}
