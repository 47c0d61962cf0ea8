use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::alert::AlertThresholds;
use crate::error::FnirsiError;
use crate::reading::{Reading, round_to};
use crate::session::SETTINGS_FILE;

/// User calibration and display preferences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub voltage_offset: f64,
    pub current_offset: f64,
    pub voltage_scale: f64,
    pub current_scale: f64,
    /// Points shown by live charts
    pub chart_points: usize,
    /// Expected samples per second, a display hint only
    pub sample_rate: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            voltage_offset: 0.0,
            current_offset: 0.0,
            voltage_scale: 1.0,
            current_scale: 1.0,
            chart_points: 150,
            sample_rate: 100,
        }
    }
}

impl Settings {
    pub fn is_identity(&self) -> bool {
        self.voltage_offset == 0.0 && self.current_offset == 0.0 && self.voltage_scale == 1.0 && self.current_scale == 1.0
    }

    /// Apply `(value + offset) * scale` to voltage and current, then rederive power.
    pub fn calibrate(&self, mut reading: Reading) -> Reading {
        if self.is_identity() {
            return reading;
        }
        reading.voltage = round_to((reading.voltage + self.voltage_offset) * self.voltage_scale, 5);
        reading.current = round_to((reading.current + self.current_offset) * self.current_scale, 5);
        reading.power = round_to(reading.voltage * reading.current, 5);
        reading
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoredSettings {
    pub settings: Settings,
    pub alerts: AlertThresholds,
}

/// `settings.json` inside a storage directory.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(SETTINGS_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load stored settings, falling back to defaults when the file is
    /// missing or unreadable.
    pub fn load(&self) -> StoredSettings {
        match fs::read(&self.path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!(path = %self.path.display(), error = %e, "Corrupt settings file, using defaults");
                StoredSettings::default()
            }),
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "No settings file, using defaults");
                StoredSettings::default()
            }
        }
    }

    pub fn save(&self, stored: &StoredSettings) -> Result<(), FnirsiError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(stored)?)?;
        Ok(())
    }
}
