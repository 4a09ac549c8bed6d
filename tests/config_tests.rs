// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for configuration module

use camera_session::{CaptureConfig, ConfigError, DeviceDescriptor, Rotation};

#[test]
fn test_config_default() {
    let config = CaptureConfig::default();

    assert!(
        config.hardware_accelerated,
        "Hardware acceleration should be enabled by default"
    );
    assert!(config.auto_start, "Captures should start automatically by default");
    assert_eq!((config.width, config.height), (640, 480));
    assert_eq!(config.last_device_id, None);
}

#[test]
fn test_config_missing_file_gives_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = CaptureConfig::load_from(&dir.path().join("absent.json")).unwrap();
    assert_eq!(config, CaptureConfig::default());
}

#[test]
fn test_config_save_and_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.json");

    let mut config = CaptureConfig {
        width: 1920,
        height: 1080,
        hardware_accelerated: false,
        rotation_degrees: 270,
        ..Default::default()
    };
    config.remember_device(&DeviceDescriptor::new("Desk Camera", "usb-3"));
    config.save_to(&path).unwrap();

    let loaded = CaptureConfig::load_from(&path).unwrap();
    assert_eq!(loaded, config, "Saved settings should load back unchanged");
}

#[test]
fn test_config_rejects_malformed_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, "{ width: ").unwrap();

    assert!(matches!(
        CaptureConfig::load_from(&path),
        Err(ConfigError::Json(_))
    ));
}

#[test]
fn test_config_format_selects_remembered_device() {
    let devices = vec![
        DeviceDescriptor::new("Built-in", "pci-1"),
        DeviceDescriptor::new("Desk Camera", "usb-3"),
    ];
    let config = CaptureConfig {
        last_device_id: Some("usb-3".into()),
        rotation_degrees: 90,
        fps_num: 60000,
        fps_denom: 1001,
        ..Default::default()
    };

    let format = config.format(&devices).unwrap();
    assert_eq!(format.device, devices[1]);
    assert_eq!(format.rotation, Rotation::R90);
    assert_eq!((format.framerate.num, format.framerate.denom), (60000, 1001));
}

#[test]
fn test_config_format_forgets_missing_device() {
    let config = CaptureConfig {
        last_device_id: Some("usb-3".into()),
        ..Default::default()
    };

    let format = config.format(&[DeviceDescriptor::new("Built-in", "pci-1")]).unwrap();
    assert!(
        format.device.is_unset(),
        "An unplugged device should fall back to the first one"
    );
}

#[test]
fn test_config_format_rejects_zero_size() {
    let config = CaptureConfig {
        width: 0,
        ..Default::default()
    };
    assert!(matches!(
        config.format(&[]),
        Err(ConfigError::InvalidValue { field: "size", .. })
    ));
}
