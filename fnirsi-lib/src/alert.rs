//! Threshold alerts with per-(kind, level) cooldown.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::{Duration, Instant};
use strum_macros::Display;
use tracing::info;

use crate::constants::{ALERT_COOLDOWN_SECS, ALERT_HISTORY_LIMIT};
use crate::error::FnirsiError;
use crate::reading::Reading;
use crate::subscriber::{SubscriberId, SubscriberResult, Subscribers};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AlertKind {
    Overvoltage,
    Undervoltage,
    Overcurrent,
    Overpower,
    Overtemperature,
    VoltageDrop,
    ConnectionLost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AlertLevel {
    Info,
    Warning,
    Critical,
}

/// Alert configuration. Every numeric field is also reachable by name
/// through [`AlertThresholds::get`] and [`AlertThresholds::set`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertThresholds {
    pub max_voltage: f64,            // V
    pub min_voltage: f64,            // V
    pub max_current: f64,            // A
    pub max_power: f64,              // W
    pub max_temperature: f64,        // °C
    pub voltage_drop_threshold: f64, // V between consecutive readings
    pub enabled: bool,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            max_voltage: 21.0,
            min_voltage: 3.0,
            max_current: 6.0,
            max_power: 120.0,
            max_temperature: 80.0,
            voltage_drop_threshold: 0.5,
            enabled: true,
        }
    }
}

impl AlertThresholds {
    pub const NAMES: [&'static str; 6] = [
        "max_voltage",
        "min_voltage",
        "max_current",
        "max_power",
        "max_temperature",
        "voltage_drop_threshold",
    ];

    fn slot(&mut self, name: &str) -> Result<&mut f64, FnirsiError> {
        match name {
            "max_voltage" => Ok(&mut self.max_voltage),
            "min_voltage" => Ok(&mut self.min_voltage),
            "max_current" => Ok(&mut self.max_current),
            "max_power" => Ok(&mut self.max_power),
            "max_temperature" => Ok(&mut self.max_temperature),
            "voltage_drop_threshold" => Ok(&mut self.voltage_drop_threshold),
            other => Err(FnirsiError::UnknownThreshold(other.to_string())),
        }
    }

    pub fn get(&self, name: &str) -> Result<f64, FnirsiError> {
        self.to_map()
            .get(name)
            .copied()
            .ok_or_else(|| FnirsiError::UnknownThreshold(name.to_string()))
    }

    pub fn set(&mut self, name: &str, value: f64) -> Result<(), FnirsiError> {
        *self.slot(name)? = value;
        Ok(())
    }

    /// Flat name → value view of the numeric thresholds.
    pub fn to_map(&self) -> BTreeMap<&'static str, f64> {
        BTreeMap::from([
            ("max_voltage", self.max_voltage),
            ("min_voltage", self.min_voltage),
            ("max_current", self.max_current),
            ("max_power", self.max_power),
            ("max_temperature", self.max_temperature),
            ("voltage_drop_threshold", self.voltage_drop_threshold),
        ])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: AlertKind,
    pub level: AlertLevel,
    pub message: String,
    pub timestamp: DateTime<Local>,
    pub reading: Reading,
    pub acknowledged: bool,
}

impl std::fmt::Display for Alert {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.level, self.kind, self.message)
    }
}

/// Evaluates readings against [`AlertThresholds`].
#[derive(Debug)]
pub struct AlertEngine {
    thresholds: AlertThresholds,
    cooldown: Duration,
    last_fired: HashMap<(AlertKind, AlertLevel), Instant>,
    previous_voltage: Option<f64>,
    next_id: u64,
    active: Vec<Alert>,
    history: VecDeque<Alert>,
    subscribers: Subscribers<Alert>,
}

impl Default for AlertEngine {
    fn default() -> Self {
        Self::new(AlertThresholds::default())
    }
}

impl AlertEngine {
    pub fn new(thresholds: AlertThresholds) -> Self {
        Self {
            thresholds,
            cooldown: Duration::from_secs_f64(ALERT_COOLDOWN_SECS),
            last_fired: HashMap::new(),
            previous_voltage: None,
            next_id: 0,
            active: Vec::new(),
            history: VecDeque::with_capacity(ALERT_HISTORY_LIMIT),
            subscribers: Subscribers::new(),
        }
    }

    pub fn thresholds(&self) -> &AlertThresholds {
        &self.thresholds
    }

    pub fn set_thresholds(&mut self, thresholds: AlertThresholds) {
        self.thresholds = thresholds;
    }

    pub fn set_threshold(&mut self, name: &str, value: f64) -> Result<(), FnirsiError> {
        self.thresholds.set(name, value)
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.thresholds.enabled = enabled;
    }

    pub fn on_alert<F>(&mut self, callback: F) -> SubscriberId
    where
        F: Fn(&Alert) -> SubscriberResult + Send + Sync + 'static,
    {
        self.subscribers.register(callback)
    }

    pub fn remove_subscriber(&mut self, id: SubscriberId) -> bool {
        self.subscribers.unregister(id)
    }

    pub fn check(&mut self, reading: &Reading) -> Vec<Alert> {
        self.check_at(reading, Instant::now())
    }

    /// Evaluate `reading` as if the current time were `now`.
    pub fn check_at(&mut self, reading: &Reading, now: Instant) -> Vec<Alert> {
        let previous = self.previous_voltage.replace(reading.voltage);
        if !self.thresholds.enabled {
            return Vec::new();
        }

        let t = self.thresholds.clone();
        let v = reading.voltage;
        let mut candidates = Vec::new();

        if v > t.max_voltage {
            candidates.push((
                AlertKind::Overvoltage,
                AlertLevel::Critical,
                format!("Voltage exceeded {}V: {v:.2}V", t.max_voltage),
            ));
        }
        if v < t.min_voltage && v > 0.0 {
            candidates.push((
                AlertKind::Undervoltage,
                AlertLevel::Warning,
                format!("Voltage below {}V: {v:.2}V", t.min_voltage),
            ));
        }
        if reading.current > t.max_current {
            candidates.push((
                AlertKind::Overcurrent,
                AlertLevel::Critical,
                format!("Current exceeded {}A: {:.2}A", t.max_current, reading.current),
            ));
        }
        if reading.power > t.max_power {
            candidates.push((
                AlertKind::Overpower,
                AlertLevel::Warning,
                format!("Power exceeded {}W: {:.2}W", t.max_power, reading.power),
            ));
        }
        if reading.temperature > t.max_temperature {
            candidates.push((
                AlertKind::Overtemperature,
                AlertLevel::Critical,
                format!("Temperature exceeded {}°C: {:.1}°C", t.max_temperature, reading.temperature),
            ));
        }
        if let Some(prev) = previous {
            let drop = prev - v;
            if drop > t.voltage_drop_threshold {
                candidates.push((
                    AlertKind::VoltageDrop,
                    AlertLevel::Warning,
                    format!("Voltage dropped {drop:.2}V ({prev:.2}V -> {v:.2}V)"),
                ));
            }
        }

        let fired: Vec<Alert> = candidates
            .into_iter()
            .filter_map(|(kind, level, message)| self.raise(kind, level, message, reading, now))
            .collect();

        for alert in &fired {
            self.subscribers.notify(alert);
        }
        fired
    }

    /// Raise an alert that does not come from a reading threshold, such as
    /// a lost connection. Subject to the same cooldown.
    pub fn raise_event(
        &mut self,
        kind: AlertKind,
        level: AlertLevel,
        message: impl Into<String>,
        reading: &Reading,
    ) -> Option<Alert> {
        let alert = self.raise(kind, level, message.into(), reading, Instant::now())?;
        self.subscribers.notify(&alert);
        Some(alert)
    }

    fn raise(
        &mut self,
        kind: AlertKind,
        level: AlertLevel,
        message: String,
        reading: &Reading,
        now: Instant,
    ) -> Option<Alert> {
        if let Some(last) = self.last_fired.get(&(kind, level)) {
            if now.saturating_duration_since(*last) < self.cooldown {
                return None;
            }
        }

        let alert = Alert {
            id: format!("{kind}_{}", self.next_id),
            kind,
            level,
            message,
            timestamp: Local::now(),
            reading: reading.clone(),
            acknowledged: false,
        };
        self.next_id += 1;
        info!(%alert, "Alert raised");

        self.active.push(alert.clone());
        if self.history.len() == ALERT_HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.history.push_back(alert.clone());
        self.last_fired.insert((kind, level), now);
        Some(alert)
    }

    /// Mark an active alert acknowledged. Returns `false` for unknown ids.
    pub fn acknowledge(&mut self, id: &str) -> bool {
        match self.active.iter_mut().find(|a| a.id == id) {
            Some(alert) => {
                alert.acknowledged = true;
                if let Some(entry) = self.history.iter_mut().rev().find(|a| a.id == id) {
                    entry.acknowledged = true;
                }
                true
            }
            None => false,
        }
    }

    pub fn clear_acknowledged(&mut self) {
        self.active.retain(|a| !a.acknowledged);
    }

    /// Active alerts that have not been acknowledged.
    pub fn active_alerts(&self) -> Vec<Alert> {
        self.active.iter().filter(|a| !a.acknowledged).cloned().collect()
    }

    pub fn has_active(&self) -> bool {
        self.active.iter().any(|a| !a.acknowledged)
    }

    /// The most recent `limit` alerts, oldest first.
    pub fn history(&self, limit: usize) -> Vec<Alert> {
        let skip = self.history.len().saturating_sub(limit);
        self.history.iter().skip(skip).cloned().collect()
    }

    pub fn clear_all(&mut self) {
        self.active.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn reading(voltage: f64, current: f64) -> Reading {
        Reading::from_vi(Local::now(), voltage, current)
    }

    #[test]
    fn test_threshold_names() {
        let mut t = AlertThresholds::default();
        assert_eq!(t.get("max_voltage").unwrap(), 21.0);
        t.set("max_current", 3.5).unwrap();
        assert_eq!(t.max_current, 3.5);
        assert_eq!(t.to_map().len(), AlertThresholds::NAMES.len());
        assert!(matches!(
            t.set("bogus", 1.0),
            Err(FnirsiError::UnknownThreshold(name)) if name == "bogus"
        ));
    }

    #[test]
    fn test_each_rule_fires() {
        let mut engine = AlertEngine::default();
        let mut r = reading(22.0, 7.0);
        r.temperature = 90.0;
        let kinds: Vec<_> = engine.check(&r).into_iter().map(|a| a.kind).collect();
        assert_eq!(
            kinds,
            vec![
                AlertKind::Overvoltage,
                AlertKind::Overcurrent,
                AlertKind::Overpower,
                AlertKind::Overtemperature
            ]
        );

        let alerts = engine.check(&reading(1.0, 0.0));
        let kinds: Vec<_> = alerts.iter().map(|a| a.kind).collect();
        assert_eq!(kinds, vec![AlertKind::Undervoltage, AlertKind::VoltageDrop]);
    }

    #[test]
    fn test_undervoltage_ignores_zero() {
        let mut engine = AlertEngine::default();
        assert!(engine.check(&reading(0.0, 0.0)).is_empty());
    }

    #[test]
    fn test_voltage_drop_needs_previous() {
        let mut engine = AlertEngine::default();
        assert!(engine.check(&reading(5.0, 0.0)).is_empty());
        let alerts = engine.check(&reading(4.0, 0.0));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::VoltageDrop);
        assert_eq!(alerts[0].level, AlertLevel::Warning);
    }

    #[test]
    fn test_previous_voltage_tracks_when_disabled() {
        let mut engine = AlertEngine::default();
        engine.set_enabled(false);
        assert!(engine.check(&reading(30.0, 0.0)).is_empty());
        engine.set_enabled(true);
        // 30V -> 5V is a drop against the reading seen while disabled
        let alerts = engine.check(&reading(5.0, 0.0));
        assert_eq!(alerts[0].kind, AlertKind::VoltageDrop);
    }

    #[test]
    fn test_acknowledge_and_history() {
        let mut engine = AlertEngine::default();
        let now = Instant::now();
        let first = engine.check_at(&reading(25.0, 0.0), now);
        let id = first[0].id.clone();

        assert!(engine.acknowledge(&id));
        assert!(!engine.acknowledge("missing"));
        assert!(engine.active_alerts().is_empty());
        assert_eq!(engine.history(50).len(), 1);
        assert!(engine.history(50)[0].acknowledged);

        engine.clear_acknowledged();
        engine.check_at(&reading(25.0, 0.0), now + Duration::from_secs(6));
        assert_eq!(engine.active_alerts().len(), 1);
        assert_eq!(engine.history(1)[0].id, "overvoltage_1");

        engine.clear_all();
        assert!(!engine.has_active());
        assert_eq!(engine.history(50).len(), 2);
        assert!(!engine.history(1)[0].acknowledged);
    }

    #[test]
    fn test_history_is_capped() {
        let mut engine = AlertEngine::default();
        let start = Instant::now();
        for i in 0..(ALERT_HISTORY_LIMIT as u64 + 20) {
            engine.check_at(&reading(25.0, 0.0), start + Duration::from_secs(6 * i));
        }
        let history = engine.history(usize::MAX);
        assert_eq!(history.len(), ALERT_HISTORY_LIMIT);
        assert_eq!(history[0].id, "overvoltage_20");
    }

    #[test]
    fn test_subscribers_see_each_alert() {
        let seen = Arc::new(AtomicUsize::new(0));
        let mut engine = AlertEngine::default();
        let counter = seen.clone();
        engine.on_alert(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        engine.on_alert(|_| Err("listener offline".into()));

        // overvoltage, overcurrent and overpower
        engine.check(&reading(25.0, 7.0));
        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_connection_lost_event() {
        let mut engine = AlertEngine::default();
        let r = reading(0.0, 0.0);
        let alert = engine
            .raise_event(AlertKind::ConnectionLost, AlertLevel::Critical, "USB read failed", &r)
            .unwrap();
        assert_eq!(alert.kind.to_string(), "connection_lost");
        assert!(
            engine
                .raise_event(AlertKind::ConnectionLost, AlertLevel::Critical, "again", &r)
                .is_none()
        );
    }
}
