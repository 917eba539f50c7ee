//! Configuration files, environment overrides and preset bring-up.

mod common;

use std::net::Ipv4Addr;
use std::sync::Arc;

use galvo_scan::config::ConfigError;
use galvo_scan::hardware::MockTransport;
use galvo_scan::prelude::*;
use serial_test::serial;

use common::{preset, resources, SERIAL};

const CONFIG: &str = r#"
[logging]
level = "debug"

[poll]
tick_ms = 2
timeout_ms = 30000

[recording]
chunk_size = 8192

[[presets]]
name = "station-a"
serial_number = 4711
firmware_resource = "firmware"
fpga_resource = "fpga"
auxiliary_resource = "aux"
correction_resource = "correction"
laser_index = 1

[presets.delays]
mark_us = 120.0

[presets.laser]
mode = "yag1"
port = "analog2"
max_power_w = 250.0

[[presets]]
name = "station-b"
ip_address = "192.168.10.5"
serial_number = 4712
firmware_resource = "firmware"
fpga_resource = "fpga"
auxiliary_resource = "aux"
correction_resource = "correction"
"#;

fn clear_env() {
    for key in ["GALVO_LOGGING__LEVEL", "GALVO_RECORDING__CHUNK_SIZE", "GALVO_POLL__TICK_MS"] {
        std::env::remove_var(key);
    }
}

#[test]
#[serial]
fn config_file_is_loaded_and_validated() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("galvo.toml");
    std::fs::write(&path, CONFIG).unwrap();

    let config = ScannerConfig::load_from(&path).unwrap();
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.poll.tick_ms, 2);
    assert_eq!(config.poll.timeout_ms, Some(30_000));
    assert_eq!(config.recording.chunk_size, 8192);

    let a = config.find_preset("station-a").unwrap();
    assert_eq!(a.serial_number, 4711);
    assert_eq!(a.laser_index, 1);
    assert_eq!(a.delays.mark_us, 120.0);
    assert_eq!(a.delays.jump_us, DelaySettings::default().jump_us);
    assert_eq!(a.laser.mode, LaserMode::Yag1);
    assert_eq!(a.laser.port, LaserPort::Analog2);
    assert_eq!(a.correction_dimension, 2);
    assert_eq!(a.search_timeout_ms, 1000);

    let b = config.find_preset("station-b").unwrap();
    let network = b.network().unwrap().unwrap();
    assert_eq!(network.ip, Ipv4Addr::new(192, 168, 10, 5));
    assert_eq!(network.netmask, Ipv4Addr::new(255, 255, 255, 0));

    assert!(matches!(
        config.find_preset("station-c"),
        Err(ScanError::PresetNotFound(_))
    ));
}

#[test]
#[serial]
fn saved_config_loads_back() {
    clear_env();
    let config = ScannerConfig {
        presets: vec![preset("a", 1), preset("b", 2)],
        ..ScannerConfig::default()
    };
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("saved.toml");
    config.save_to(&path).unwrap();

    let loaded = ScannerConfig::load_from(&path).unwrap();
    assert_eq!(loaded.presets, config.presets);
    assert_eq!(loaded.logging, config.logging);
}

#[test]
#[serial]
fn environment_overrides_file() {
    clear_env();
    std::env::set_var("GALVO_LOGGING__LEVEL", "warn");
    std::env::set_var("GALVO_RECORDING__CHUNK_SIZE", "4096");
    let config = ScannerConfig::from_toml_str(CONFIG);
    clear_env();

    let config = config.unwrap();
    assert_eq!(config.logging.level, "warn");
    assert_eq!(config.recording.chunk_size, 4096);
    assert_eq!(config.presets.len(), 2);
}

#[test]
#[serial]
fn invalid_environment_value_fails_validation() {
    clear_env();
    std::env::set_var("GALVO_LOGGING__LEVEL", "loud");
    let result = ScannerConfig::from_toml_str(CONFIG);
    clear_env();
    assert!(matches!(result, Err(ConfigError::ValidationError(_))));
}

#[test]
#[serial]
fn duplicate_preset_names_are_rejected() {
    clear_env();
    let station_b = CONFIG.split("[[presets]]").nth(2).unwrap();
    let doubled = format!("{CONFIG}\n[[presets]]{station_b}");
    let result = ScannerConfig::from_toml_str(&doubled);
    assert!(matches!(result, Err(ConfigError::ValidationError(msg)) if msg.contains("station-b")));
}

#[test]
fn preset_configures_local_card() {
    let mock = Arc::new(MockTransport::new());
    mock.add_card(SERIAL);
    let selector = CardSelector::new(mock.clone(), CardCapabilities::rtc6());
    let mut preset = preset("local", SERIAL);
    preset.laser_index = 3;

    let ctx = selector.acquire_from_preset(&preset, &resources()).unwrap();

    assert_eq!(ctx.card_no().unwrap(), 1);
    assert_eq!(ctx.laser_index(), 3);
    assert_eq!(ctx.max_laser_power(), Some(400.0));
    assert_eq!(ctx.correction_factor(), 10_000.0);
    assert_eq!(mock.firmware_loads(1), 1);
    let tables = mock.loaded_tables(1);
    assert_eq!(tables.len(), 1);
    assert_eq!((tables[0].table, tables[0].dimension, tables[0].bytes), (1, 2, 64));

    let commands = mock.commands(1);
    assert!(commands.contains(&Command::SetCommunicationTimeouts {
        initial: 0.75,
        max: 20.0,
        multiplier: 1.3
    }));
    assert!(commands.contains(&Command::SelectCorrectionTable { head_a: 1, head_b: 0 }));
    assert!(commands.contains(&Command::SetLaserMode(0)));
    assert!(commands.contains(&Command::SetScannerDelays {
        jump: 25,
        mark: 10,
        polygon: 5
    }));
}

#[test]
fn firmware_is_loaded_to_find_uninitialised_card() {
    let mock = Arc::new(MockTransport::new());
    mock.add_uninitialized_card(999);
    mock.add_uninitialized_card(SERIAL);
    let selector = CardSelector::new(mock.clone(), CardCapabilities::rtc6());

    let ctx = selector.acquire_from_preset(&preset("p", SERIAL), &resources()).unwrap();

    assert_eq!(ctx.card_no().unwrap(), 2);
    assert_eq!(ctx.serial_number().unwrap(), SERIAL);
    assert_eq!(mock.firmware_loads(1), 1);
    assert_eq!(mock.firmware_loads(2), 1);
    assert!(!mock.is_acquired(1));
    assert!(mock.is_acquired(2));
    assert_eq!(selector.registry().len(), 1);
}

#[test]
fn unknown_serial_leaves_no_card_acquired() {
    let mock = Arc::new(MockTransport::new());
    mock.add_card(1);
    mock.add_uninitialized_card(2);
    let selector = CardSelector::new(mock.clone(), CardCapabilities::rtc6());

    let err = selector.acquire_from_preset(&preset("p", SERIAL), &resources()).unwrap_err();
    assert!(matches!(err, ScanError::CardNotFound(SERIAL)));
    assert!(!mock.is_acquired(1));
    assert!(!mock.is_acquired(2));
    assert!(selector.registry().is_empty());
}

#[test]
fn missing_resource_is_reported() {
    let mock = Arc::new(MockTransport::new());
    mock.add_card(SERIAL);
    let selector = CardSelector::new(mock.clone(), CardCapabilities::rtc6());
    let resources = MemoryResources::new().with("firmware", vec![1]);

    let err = selector.acquire_from_preset(&preset("p", SERIAL), &resources).unwrap_err();
    assert!(matches!(err, ScanError::ResourceNotFound(name) if name == "fpga"));
    assert!(!mock.is_acquired(1));
}

#[test]
fn preset_configures_ethernet_card_from_directory() {
    let dir = tempfile::tempdir().unwrap();
    for (name, bytes) in [
        ("firmware", &b"fw"[..]),
        ("fpga", &b"fpga"[..]),
        ("aux", &b"aux"[..]),
        ("correction", &b"ct5"[..]),
    ] {
        std::fs::write(dir.path().join(name), bytes).unwrap();
    }
    let resources = DirectoryResources::new(dir.path());

    let mock = Arc::new(MockTransport::new());
    let card_no = mock.add_ethernet_card(SERIAL, true);
    let selector = CardSelector::new(mock.clone(), CardCapabilities::rtc6());
    let mut preset = preset("eth", SERIAL);
    preset.ip_address = Some("10.0.0.7".into());
    preset.netmask = Some("255.255.0.0".into());

    let ctx = selector.acquire_from_preset(&preset, &resources).unwrap();

    assert_eq!(ctx.card_no().unwrap(), card_no);
    assert_eq!(mock.search_timeout_ms(), 250);
    assert_eq!(mock.loaded_tables(card_no)[0].bytes, 3);
    let record = selector.registry().get(ctx.handle()).unwrap();
    let network = record.network.unwrap();
    assert_eq!(network.ip, Ipv4Addr::new(10, 0, 0, 7));
    assert_eq!(network.netmask, Ipv4Addr::new(255, 255, 0, 0));
}
