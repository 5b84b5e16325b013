//! Configuration file loading

use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;
use turret_control::config::TurretConfig;
use turret_control::error::TurretError;
use turret_control::tracking::SelectionPolicy;

fn config_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_missing_file_gives_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = TurretConfig::load_from(dir.path().join("absent.toml")).unwrap();

    assert_eq!(config.link.baud_rate, 9600);
    assert_eq!(config.dispatch.dead_zone, 15);
    assert_eq!(config.tracking.frame_budget, Duration::from_millis(100));
    assert!(!config.tracking.auto_track);
}

#[test]
fn test_file_overrides_selected_keys() {
    let file = config_file(
        r#"
[link]
port = "/dev/ttyUSB3"
baud_rate = 115200

[dispatch]
min_interval = "350ms"

[tracking]
selection = "largest"
auto_track = true
"#,
    );

    let config = TurretConfig::load_from(file.path()).unwrap();

    assert_eq!(config.link.port.as_deref(), Some("/dev/ttyUSB3"));
    assert_eq!(config.link.baud_rate, 115200);
    assert_eq!(config.dispatch.min_interval, Duration::from_millis(350));
    assert_eq!(config.tracking.selection, SelectionPolicy::Largest);
    assert!(config.tracking.initial_mode().auto_track);
    // untouched keys keep their defaults
    assert_eq!(config.dispatch.dead_zone, 15);
    assert_eq!(config.link.settle_delay, Duration::from_secs(2));
}

#[test]
fn test_invalid_value_is_rejected_after_merge() {
    let file = config_file(
        r#"
[dispatch]
dead_zone = -4
"#,
    );

    let err = TurretConfig::load_from(file.path()).unwrap_err();
    assert!(matches!(err, TurretError::Configuration(_)));
}

#[test]
fn test_malformed_file_is_a_load_error() {
    let file = config_file(
        r#"
[dispatch]
min_interval = "soon"
"#,
    );

    let err = TurretConfig::load_from(file.path()).unwrap_err();
    assert!(matches!(err, TurretError::ConfigLoad(_)));
}

#[test]
fn test_shipped_sample_config_loads() {
    let config = TurretConfig::load_from(
        std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("config/turret.toml"),
    )
    .unwrap();

    assert_eq!(config.application.name, "turretd");
    assert_eq!(config.link.port_patterns.len(), 3);
    assert_eq!(config.tracking.frame_center().x, 640);
}

#[test]
fn test_rendered_config_loads_back() {
    let mut original = TurretConfig::default();
    original.dispatch.dead_zone = 30;
    original.tracking.selection = SelectionPolicy::Largest;

    let file = config_file(&original.to_toml().unwrap());
    let loaded = TurretConfig::load_from(file.path()).unwrap();

    assert_eq!(loaded.dispatch.dead_zone, 30);
    assert_eq!(loaded.tracking.selection, SelectionPolicy::Largest);
}
