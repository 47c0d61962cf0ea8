//! The per-reading pipeline shared by every transport.
//!
//! All mutable state lives behind one lock. A reading is calibrated,
//! classified, checked for alerts, folded into the statistics, recorded,
//! buffered and handed to subscribers without releasing it, so a reader of
//! "latest statistics" never observes a half-processed reading.

use chrono::Local;
use parking_lot::Mutex;
use tracing::warn;

use crate::alert::{Alert, AlertEngine, AlertKind, AlertLevel, AlertThresholds};
use crate::buffer::ReadingBuffer;
use crate::constants::LIVE_BUFFER_SIZE;
use crate::diagnostics::DecodeCounters;
use crate::error::FnirsiError;
use crate::protocol::{ProtocolClassifier, ProtocolInfo};
use crate::reading::{ConnectionType, EnrichedReading, Reading};
use crate::session::{RecordingStatus, Session, SessionRecorder};
use crate::settings::{Settings, StoredSettings};
use crate::stats::{ChargeEstimate, SessionStatistics};
use crate::subscriber::{SubscriberId, SubscriberResult, Subscribers};

#[derive(Debug)]
struct MonitorState {
    settings: Settings,
    connection_type: Option<ConnectionType>,
    classifier: ProtocolClassifier,
    alerts: AlertEngine,
    recorder: SessionRecorder,
    live: ReadingBuffer<EnrichedReading>,
    counters: DecodeCounters,
    subscribers: Subscribers<EnrichedReading>,
}

/// Composes classification, alerts, statistics and recording per reading.
///
/// Share it between a reader task and any number of observers with `Arc`.
#[derive(Debug)]
pub struct Monitor {
    state: Mutex<MonitorState>,
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new(Settings::default(), AlertThresholds::default())
    }
}

impl Monitor {
    pub fn new(settings: Settings, thresholds: AlertThresholds) -> Self {
        Self {
            state: Mutex::new(MonitorState {
                settings,
                connection_type: None,
                classifier: ProtocolClassifier::new(),
                alerts: AlertEngine::new(thresholds),
                recorder: SessionRecorder::new(),
                live: ReadingBuffer::new(LIVE_BUFFER_SIZE),
                counters: DecodeCounters::default(),
                subscribers: Subscribers::new(),
            }),
        }
    }

    pub fn from_stored(stored: StoredSettings) -> Self {
        Self::new(stored.settings, stored.alerts)
    }

    pub fn set_connection_type(&self, connection_type: Option<ConnectionType>) {
        let mut state = self.state.lock();
        state.connection_type = connection_type;
        state.recorder.set_connection_type(connection_type);
    }

    pub fn connection_type(&self) -> Option<ConnectionType> {
        self.state.lock().connection_type
    }

    /// Run one reading covering `dt` seconds through the pipeline.
    pub fn process(&self, reading: Reading, dt: f64) -> EnrichedReading {
        let mut state = self.state.lock();
        let state = &mut *state;

        let reading = state.settings.calibrate(reading);
        let protocol = state
            .classifier
            .classify(reading.voltage, reading.dp, reading.dn);
        let alerts = state.alerts.check(&reading);
        state.recorder.stats_mut().update(&reading, dt);

        let enriched = EnrichedReading {
            reading,
            protocol,
            has_alerts: !alerts.is_empty(),
        };
        state.recorder.add(enriched.clone());
        state.live.push(enriched.clone());
        state.subscribers.notify(&enriched);
        enriched
    }

    /// Process a decode batch that together covers `dt` seconds.
    pub fn process_batch(&self, readings: Vec<Reading>, dt: f64) -> Vec<EnrichedReading> {
        if readings.is_empty() {
            return Vec::new();
        }
        let share = dt / readings.len() as f64;
        readings.into_iter().map(|r| self.process(r, share)).collect()
    }

    /// Register a callback for every enriched reading.
    ///
    /// Callbacks run while the pipeline lock is held and must not block or
    /// call back into the monitor.
    pub fn subscribe<F>(&self, callback: F) -> SubscriberId
    where
        F: Fn(&EnrichedReading) -> SubscriberResult + Send + Sync + 'static,
    {
        self.state.lock().subscribers.register(callback)
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.state.lock().subscribers.unregister(id)
    }

    /// Register a callback for every raised alert. Same constraints as [`Monitor::subscribe`].
    pub fn on_alert<F>(&self, callback: F) -> SubscriberId
    where
        F: Fn(&Alert) -> SubscriberResult + Send + Sync + 'static,
    {
        self.state.lock().alerts.on_alert(callback)
    }

    pub fn remove_alert_subscriber(&self, id: SubscriberId) -> bool {
        self.state.lock().alerts.remove_subscriber(id)
    }

    pub fn latest(&self) -> Option<EnrichedReading> {
        self.state.lock().live.latest().cloned()
    }

    /// Up to `count` most recent readings, oldest first.
    pub fn recent(&self, count: usize) -> Vec<EnrichedReading> {
        self.state.lock().live.recent(count)
    }

    pub fn current_protocol(&self) -> Option<ProtocolInfo> {
        self.state.lock().classifier.current().cloned()
    }

    pub fn stats(&self) -> SessionStatistics {
        self.state.lock().recorder.stats().snapshot()
    }

    pub fn reset_stats(&self) {
        self.state.lock().recorder.stats_mut().reset();
    }

    pub fn charge_estimate(&self, target_mah: Option<f64>) -> ChargeEstimate {
        self.state.lock().recorder.stats().charge_estimate(target_mah)
    }

    pub fn start_recording(&self, name: Option<&str>) -> Result<String, FnirsiError> {
        self.state.lock().recorder.start(name)
    }

    pub fn stop_recording(&self) -> Option<Session> {
        self.state.lock().recorder.stop()
    }

    pub fn recording_status(&self) -> RecordingStatus {
        self.state.lock().recorder.status()
    }

    pub fn active_alerts(&self) -> Vec<Alert> {
        self.state.lock().alerts.active_alerts()
    }

    pub fn alert_history(&self, limit: usize) -> Vec<Alert> {
        self.state.lock().alerts.history(limit)
    }

    pub fn acknowledge_alert(&self, id: &str) -> bool {
        self.state.lock().alerts.acknowledge(id)
    }

    pub fn clear_acknowledged_alerts(&self) {
        self.state.lock().alerts.clear_acknowledged();
    }

    pub fn clear_alerts(&self) {
        self.state.lock().alerts.clear_all();
    }

    pub fn thresholds(&self) -> AlertThresholds {
        self.state.lock().alerts.thresholds().clone()
    }

    pub fn set_threshold(&self, name: &str, value: f64) -> Result<(), FnirsiError> {
        self.state.lock().alerts.set_threshold(name, value)
    }

    pub fn set_thresholds(&self, thresholds: AlertThresholds) {
        self.state.lock().alerts.set_thresholds(thresholds);
    }

    pub fn settings(&self) -> Settings {
        self.state.lock().settings.clone()
    }

    pub fn set_settings(&self, settings: Settings) {
        self.state.lock().settings = settings;
    }

    /// Current settings and thresholds, in the shape the settings store persists.
    pub fn stored_settings(&self) -> StoredSettings {
        let state = self.state.lock();
        StoredSettings {
            settings: state.settings.clone(),
            alerts: state.alerts.thresholds().clone(),
        }
    }

    /// Fold a decoder's drop counters into the monitor's totals.
    pub fn record_counters(&self, delta: DecodeCounters) {
        let mut state = self.state.lock();
        let c = &mut state.counters;
        c.readings += delta.readings;
        c.too_short += delta.too_short;
        c.not_data += delta.not_data;
        c.out_of_range += delta.out_of_range;
        c.truncated += delta.truncated;
        c.unknown_command += delta.unknown_command;
    }

    pub fn counters(&self) -> DecodeCounters {
        self.state.lock().counters
    }

    /// Raise a `connection_lost` alert against the last known reading.
    pub fn connection_lost(&self, message: &str) -> Option<Alert> {
        let mut state = self.state.lock();
        let last = state
            .live
            .latest()
            .map(|e| e.reading.clone())
            .unwrap_or_else(|| Reading::from_vi(Local::now(), 0.0, 0.0));
        warn!(message, "Connection lost");
        state
            .alerts
            .raise_event(AlertKind::ConnectionLost, AlertLevel::Critical, message, &last)
    }
}
