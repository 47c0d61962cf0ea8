//! Session persistence in a storage directory

mod common;
use common::*;

use approx::assert_abs_diff_eq;
use chrono::TimeDelta;
use fnirsi_lib::session::SessionStore;
use fnirsi_lib::settings::{SettingsStore, StoredSettings};
use fnirsi_lib::{ProtocolInfo, SessionRecorder};
use std::fs;
use tempfile::TempDir;

fn recorded(name: &str, samples: usize) -> fnirsi_lib::Session {
    let mut recorder = SessionRecorder::new();
    recorder.start(Some(name)).unwrap();
    for i in 0..samples {
        let voltage = 5.0 + i as f64 * 0.01;
        let reading = Reading::from_vi(Local::now(), voltage, 0.5);
        recorder.stats_mut().update(&reading, 0.1);
        recorder.add(EnrichedReading {
            protocol: ProtocolInfo::unknown(voltage),
            reading,
            has_alerts: false,
        });
    }
    recorder.stop().expect("recording was open")
}

#[test]
fn test_save_get_delete() {
    let dir = TempDir::new().unwrap();
    let store = SessionStore::open(dir.path()).unwrap();

    let session = recorded("morning_charge", 5);
    let path = store.save(&session).unwrap();
    assert_eq!(path, dir.path().join("morning_charge.json"));

    let loaded = store.get("morning_charge").unwrap().expect("saved session");
    assert_eq!(loaded.name, "morning_charge");
    assert_eq!(loaded.data.len(), 5);
    assert_eq!(loaded.stats.samples, 5);
    assert_abs_diff_eq!(loaded.data[4].reading.voltage, session.data[4].reading.voltage, epsilon = 1e-12);

    assert!(store.delete("morning_charge").unwrap());
    assert!(!store.delete("morning_charge").unwrap());
    assert!(store.get("morning_charge").unwrap().is_none());
}

#[test]
fn test_list_is_newest_first() {
    let dir = TempDir::new().unwrap();
    let store = SessionStore::open(dir.path()).unwrap();

    let mut older = recorded("older", 2);
    older.start_time = older.start_time - TimeDelta::hours(1);
    store.save(&older).unwrap();
    store.save(&recorded("newer", 3)).unwrap();

    let listed = store.list().unwrap();
    let names: Vec<&str> = listed.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["newer", "older"]);
    assert_eq!(listed[0].samples, 3);
    assert_eq!(listed[0].filename, "newer.json");
}

#[test]
fn test_list_skips_settings_and_unreadable_files() {
    let dir = TempDir::new().unwrap();
    let store = SessionStore::open(dir.path()).unwrap();
    store.save(&recorded("kept", 1)).unwrap();

    SettingsStore::new(dir.path()).save(&StoredSettings::default()).unwrap();
    fs::write(dir.path().join("broken.json"), b"{ not json").unwrap();
    fs::write(dir.path().join("notes.txt"), b"hello").unwrap();

    let listed = store.list().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].name, "kept");
}

#[test]
fn test_rejects_names_outside_the_directory() {
    let dir = TempDir::new().unwrap();
    let store = SessionStore::open(dir.path()).unwrap();

    for name in ["../escape", "a/b", "", "settings", ".hidden"] {
        assert!(
            matches!(store.get(name), Err(FnirsiError::InvalidSessionName(_))),
            "{name:?} should be rejected"
        );
    }
    let mut session = recorded("ok", 1);
    session.name = "../../etc/passwd".to_string();
    assert!(store.save(&session).is_err());
}

#[test]
fn test_open_creates_directory() {
    let dir = TempDir::new().unwrap();
    let nested = dir.path().join("data").join("sessions");
    let store = SessionStore::open(&nested).unwrap();
    assert!(nested.is_dir());
    assert!(store.list().unwrap().is_empty());
}

#[test]
fn test_settings_survive_a_restart() {
    let dir = TempDir::new().unwrap();
    let settings_store = SettingsStore::new(dir.path());
    assert_eq!(settings_store.load(), StoredSettings::default());

    let mut stored = StoredSettings::default();
    stored.settings.voltage_offset = 0.25;
    stored.alerts.max_voltage = 13.0;
    settings_store.save(&stored).unwrap();

    let reloaded = SettingsStore::new(dir.path()).load();
    assert_eq!(reloaded, stored);

    fs::write(settings_store.path(), b"garbage").unwrap();
    assert_eq!(settings_store.load(), StoredSettings::default());
}
