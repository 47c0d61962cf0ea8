//! Alerts, statistics and recording fed by decoded readings

mod common;
use common::*;

use approx::assert_abs_diff_eq;
use fnirsi_lib::alert::{AlertKind, AlertLevel};
use fnirsi_lib::{AlertEngine, AlertThresholds, Monitor, SessionRecorder, StatisticsTracker};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

fn reading(voltage: f64, current: f64) -> Reading {
    Reading::from_vi(Local::now(), voltage, current)
}

fn enriched(voltage: f64) -> EnrichedReading {
    EnrichedReading {
        reading: reading(voltage, 1.0),
        protocol: fnirsi_lib::ProtocolInfo::unknown(voltage),
        has_alerts: false,
    }
}

#[test]
fn test_overvoltage_cooldown_suppresses_then_expires() {
    let mut engine = AlertEngine::new(AlertThresholds::default());
    let t0 = Instant::now();
    let high = reading(25.0, 1.0);

    let fired = engine.check_at(&high, t0);
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].kind, AlertKind::Overvoltage);
    assert_eq!(fired[0].level, AlertLevel::Critical);

    assert!(engine.check_at(&high, t0 + Duration::from_secs(1)).is_empty());
    assert!(engine.check_at(&high, t0 + Duration::from_millis(4900)).is_empty());

    let again = engine.check_at(&high, t0 + Duration::from_secs(6));
    assert_eq!(again.len(), 1);
    assert_ne!(again[0].id, fired[0].id);
    assert_eq!(engine.history(10).len(), 2);
}

#[test]
fn test_cooldown_is_per_kind() {
    let mut engine = AlertEngine::default();
    let t0 = Instant::now();
    engine.check_at(&reading(25.0, 1.0), t0);
    let fired = engine.check_at(&reading(5.0, 7.0), t0 + Duration::from_millis(10));
    let kinds: Vec<AlertKind> = fired.iter().map(|a| a.kind).collect();
    assert!(kinds.contains(&AlertKind::Overcurrent));
    assert!(kinds.contains(&AlertKind::VoltageDrop));
}

#[test]
fn test_zero_voltage_is_not_undervoltage() {
    let mut engine = AlertEngine::default();
    assert!(engine.check(&reading(0.0, 0.0)).is_empty());
    let fired = engine.check(&reading(2.5, 0.0));
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].kind, AlertKind::Undervoltage);
    assert_eq!(fired[0].level, AlertLevel::Warning);
}

#[test]
fn test_disabled_engine_stays_quiet() {
    let mut engine = AlertEngine::default();
    engine.set_enabled(false);
    assert!(engine.check(&reading(30.0, 10.0)).is_empty());
    assert!(!engine.has_active());
}

#[test]
fn test_acknowledge_and_clear() {
    let mut engine = AlertEngine::default();
    let fired = engine.check(&reading(25.0, 1.0));
    assert!(engine.acknowledge(&fired[0].id));
    assert!(!engine.acknowledge("missing"));
    assert!(engine.active_alerts().is_empty());
    engine.clear_acknowledged();
    assert!(!engine.has_active());
    assert_eq!(engine.history(100).len(), 1);
    assert!(engine.history(100)[0].acknowledged);
}

#[test]
fn test_statistics_min_max_avg() {
    let mut tracker = StatisticsTracker::new();
    for v in [4.0, 5.0, 6.0] {
        tracker.update(&reading(v, 1.0), 1.0);
    }
    let stats = tracker.snapshot();
    assert_eq!(stats.samples, 3);
    assert_abs_diff_eq!(stats.voltage.avg, 5.0);
    assert_abs_diff_eq!(stats.voltage.min, 4.0);
    assert_abs_diff_eq!(stats.voltage.max, 6.0);
    assert_abs_diff_eq!(stats.energy_wh, 15.0 / 3600.0, epsilon = 1e-12);
}

#[test]
fn test_energy_integrates_constant_power() {
    let mut tracker = StatisticsTracker::new();
    let steady = reading(10.0, 1.0);
    for _ in 0..360 {
        tracker.update(&steady, 1.0);
    }
    let stats = tracker.snapshot();
    assert_abs_diff_eq!(stats.energy_wh, 10.0 * 360.0 / 3600.0, epsilon = 1e-9);
    assert_abs_diff_eq!(stats.capacity_ah, 0.1, epsilon = 1e-9);
    assert_abs_diff_eq!(stats.duration_s, 360.0, epsilon = 1e-9);
}

#[test]
fn test_recorder_window() {
    let mut recorder = SessionRecorder::new();
    recorder.add(enriched(5.0));
    assert!(recorder.stop().is_none());

    let name = recorder.start(Some("bench")).unwrap();
    assert_eq!(name, "bench");
    for v in [5.0, 5.1, 5.2] {
        recorder.add(enriched(v));
    }
    let session = recorder.stop().expect("window was open");
    assert_eq!(session.data.len(), 3);
    assert_eq!(session.data[2].reading.voltage, 5.2);

    recorder.add(enriched(5.3));
    assert!(!recorder.is_recording());
    assert!(recorder.stop().is_none());
}

#[test]
fn test_usb_report_through_monitor() {
    let monitor = Monitor::default();
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    monitor.subscribe(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    monitor.start_recording(Some("usb_run")).unwrap();
    let readings = UsbDecoder::new().decode(&hex_to_bytes(FNB58_DATA_REPORT));
    let enriched = monitor.process_batch(readings, 0.04);

    assert_eq!(enriched.len(), 4);
    assert!(enriched.iter().all(|e| e.protocol.protocol == "Standard USB"));
    assert_eq!(seen.load(Ordering::SeqCst), 4);

    let session = monitor.stop_recording().expect("recording");
    assert_eq!(session.data.len(), 4);
    assert_eq!(session.stats.samples, 4);
    assert_abs_diff_eq!(session.stats.duration_s, 0.04, epsilon = 1e-12);
}

#[test]
fn test_ble_stream_through_monitor() {
    let monitor = Monitor::default();
    let mut decoder = BleDecoder::new(fnirsi_lib::ble::BleFormat::Framed);

    let mut first = power_packet(50_000, 10_000, 50_000);
    first.extend(lines_packet(2000, 2000));
    let mut processed = Vec::new();
    processed.extend(decoder.decode(&first).map(|r| monitor.process(r, 0.1)));
    processed.extend(decoder.decode(&temperature_packet(900)).map(|r| monitor.process(r, 0.1)));
    processed.extend(decoder.decode(&power_packet(90_000, 10_000, 90_000)).map(|r| monitor.process(r, 0.1)));

    assert_eq!(processed.len(), 2);
    assert_eq!(processed[0].protocol.protocol, "QC 3.0");
    assert_eq!(processed[1].protocol.protocol, "USB-PD");
    assert!(processed[1].has_alerts);
    let alerts = monitor.active_alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].kind, AlertKind::Overtemperature);
}
