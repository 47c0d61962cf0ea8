//! Recording windows and their on-disk JSON documents.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::FnirsiError;
use crate::reading::{ConnectionType, EnrichedReading};
use crate::stats::{SessionStatistics, StatisticsTracker};

/// File name reserved for [`crate::settings::SettingsStore`] inside a storage directory
pub const SETTINGS_FILE: &str = "settings.json";

/// A finalized recording. Immutable once returned by [`SessionRecorder::stop`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub name: String,
    pub start_time: DateTime<Local>,
    pub end_time: DateTime<Local>,
    pub data: Vec<EnrichedReading>,
    pub stats: SessionStatistics,
    pub connection_type: Option<ConnectionType>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingStatus {
    pub is_recording: bool,
    pub name: Option<String>,
    pub samples: usize,
    pub start_time: Option<DateTime<Local>>,
}

#[derive(Debug)]
struct ActiveRecording {
    name: String,
    start_time: DateTime<Local>,
    data: Vec<EnrichedReading>,
}

/// Buffers readings while a recording window is open.
///
/// Owns the statistics tracker so that starting a recording and resetting
/// the statistics happen together.
#[derive(Debug, Default)]
pub struct SessionRecorder {
    stats: StatisticsTracker,
    active: Option<ActiveRecording>,
    connection_type: Option<ConnectionType>,
}

impl SessionRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connection(connection_type: ConnectionType) -> Self {
        Self {
            connection_type: Some(connection_type),
            ..Self::default()
        }
    }

    pub fn set_connection_type(&mut self, connection_type: Option<ConnectionType>) {
        self.connection_type = connection_type;
    }

    /// Open a recording window, replacing any window already open.
    ///
    /// Returns the session name, `session_YYYYMMDD_HHMMSS` if none is given.
    /// A name [`SessionStore`] could not save is rejected before anything
    /// is recorded.
    pub fn start(&mut self, name: Option<&str>) -> Result<String, FnirsiError> {
        let start_time = Local::now();
        let name = match name {
            Some(name) => {
                validate_session_name(name)?;
                name.to_string()
            }
            None => format!("session_{}", start_time.format("%Y%m%d_%H%M%S")),
        };

        if let Some(previous) = self.active.take() {
            debug!(name = %previous.name, samples = previous.data.len(), "Discarding open recording");
        }
        self.stats.reset();
        self.active = Some(ActiveRecording {
            name: name.clone(),
            start_time,
            data: Vec::new(),
        });
        info!(%name, "Recording started");
        Ok(name)
    }

    /// Append a reading; ignored unless a window is open.
    pub fn add(&mut self, reading: EnrichedReading) {
        if let Some(active) = self.active.as_mut() {
            active.data.push(reading);
        }
    }

    /// Close the window and materialize its session document.
    pub fn stop(&mut self) -> Option<Session> {
        let active = self.active.take()?;
        let session = Session {
            name: active.name,
            start_time: active.start_time,
            end_time: Local::now(),
            data: active.data,
            stats: self.stats.snapshot(),
            connection_type: self.connection_type,
        };
        info!(name = %session.name, samples = session.data.len(), "Recording stopped");
        Some(session)
    }

    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    pub fn status(&self) -> RecordingStatus {
        match &self.active {
            Some(active) => RecordingStatus {
                is_recording: true,
                name: Some(active.name.clone()),
                samples: active.data.len(),
                start_time: Some(active.start_time),
            },
            None => RecordingStatus {
                is_recording: false,
                name: None,
                samples: 0,
                start_time: None,
            },
        }
    }

    pub fn stats(&self) -> &StatisticsTracker {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut StatisticsTracker {
        &mut self.stats
    }
}

/// Reject names that would escape the storage directory or shadow `settings.json`.
pub fn validate_session_name(name: &str) -> Result<(), FnirsiError> {
    let valid = !name.is_empty()
        && name != "settings"
        && !name.starts_with('.')
        && !name.contains(['/', '\\'])
        && !name.contains("..");
    if valid {
        Ok(())
    } else {
        Err(FnirsiError::InvalidSessionName(name.to_string()))
    }
}

/// Listing entry for a stored session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub name: String,
    pub start_time: DateTime<Local>,
    pub end_time: DateTime<Local>,
    pub samples: usize,
    pub filename: String,
}

/// Sessions stored as `<dir>/<name>.json`.
#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    /// Open a store, creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, FnirsiError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> Result<PathBuf, FnirsiError> {
        validate_session_name(name)?;
        Ok(self.dir.join(format!("{name}.json")))
    }

    pub fn save(&self, session: &Session) -> Result<PathBuf, FnirsiError> {
        let path = self.path_for(&session.name)?;
        fs::write(&path, serde_json::to_vec(session)?)?;
        info!(path = %path.display(), "Session saved");
        Ok(path)
    }

    /// Stored sessions, newest first. Unreadable files are skipped.
    pub fn list(&self) -> Result<Vec<SessionSummary>, FnirsiError> {
        let mut sessions = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let Some(filename) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                continue;
            };
            if filename == SETTINGS_FILE || path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            match read_session(&path) {
                Ok(session) => sessions.push(SessionSummary {
                    name: session.name,
                    start_time: session.start_time,
                    end_time: session.end_time,
                    samples: session.data.len(),
                    filename,
                }),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable session file"),
            }
        }
        sessions.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(sessions)
    }

    pub fn get(&self, name: &str) -> Result<Option<Session>, FnirsiError> {
        let path = self.path_for(name)?;
        if !path.exists() {
            return Ok(None);
        }
        read_session(&path).map(Some)
    }

    /// Returns `false` if no such session exists.
    pub fn delete(&self, name: &str) -> Result<bool, FnirsiError> {
        let path = self.path_for(name)?;
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path)?;
        info!(path = %path.display(), "Session deleted");
        Ok(true)
    }
}

fn read_session(path: &Path) -> Result<Session, FnirsiError> {
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ProtocolInfo;
    use crate::reading::Reading;

    fn enriched(voltage: f64) -> EnrichedReading {
        EnrichedReading {
            reading: Reading::from_vi(Local::now(), voltage, 1.0),
            protocol: ProtocolInfo::unknown(voltage),
            has_alerts: false,
        }
    }

    #[test]
    fn test_add_outside_window_is_ignored() {
        let mut recorder = SessionRecorder::new();
        recorder.add(enriched(5.0));
        assert!(recorder.stop().is_none());

        let name = recorder.start(Some("bench")).unwrap();
        assert_eq!(name, "bench");
        recorder.add(enriched(5.0));
        recorder.add(enriched(5.1));
        let session = recorder.stop().unwrap();
        assert_eq!(session.data.len(), 2);

        recorder.add(enriched(5.2));
        assert!(recorder.stop().is_none());
        assert_eq!(session.data.len(), 2);
    }

    #[test]
    fn test_restart_replaces_window() {
        let mut recorder = SessionRecorder::with_connection(ConnectionType::Usb);
        recorder.start(Some("first")).unwrap();
        recorder.add(enriched(5.0));
        recorder.stats_mut().update(&enriched(5.0).reading, 1.0);

        recorder.start(Some("second")).unwrap();
        assert_eq!(recorder.stats().samples(), 0);
        recorder.add(enriched(9.0));
        let status = recorder.status();
        assert!(status.is_recording);
        assert_eq!(status.name.as_deref(), Some("second"));
        assert_eq!(status.samples, 1);

        let session = recorder.stop().unwrap();
        assert_eq!(session.name, "second");
        assert_eq!(session.data[0].reading.voltage, 9.0);
        assert_eq!(session.connection_type, Some(ConnectionType::Usb));
        assert!(!recorder.status().is_recording);
    }

    #[test]
    fn test_default_name() {
        let mut recorder = SessionRecorder::new();
        let name = recorder.start(None).unwrap();
        assert!(name.starts_with("session_"));
        assert_eq!(name.len(), "session_YYYYMMDD_HHMMSS".len());
    }

    #[test]
    fn test_rejects_path_like_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(dir.path()).unwrap();
        for name in ["", "../escape", "a/b", "settings", ".hidden"] {
            assert!(matches!(store.get(name), Err(FnirsiError::InvalidSessionName(_))));
        }
    }

    #[test]
    fn test_start_rejects_unsavable_name() {
        let mut recorder = SessionRecorder::new();
        for name in ["../escape", "a\\b", "settings", ""] {
            assert!(matches!(
                recorder.start(Some(name)),
                Err(FnirsiError::InvalidSessionName(_))
            ));
            assert!(!recorder.is_recording());
        }
        recorder.add(enriched(5.0));
        assert!(recorder.stop().is_none());
    }
}
