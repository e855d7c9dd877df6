//! Persisted user settings
//!
//! Settings live in a single JSON file (camelCase keys) under the platform
//! config directory. Every setter validates its input and writes the file
//! back immediately, so values survive process restarts.

use chrono::{Duration as ChronoDuration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::scheduler::{ScheduleConfig, ScheduleStore, TriggerPolicy, TriggerState};

pub const DEFAULT_CAPTURE_HOUR: u32 = 14;
pub const DEFAULT_CAPTURE_MINUTE: u32 = 0;
pub const DEFAULT_FRAME_RATE: f64 = 2.0;
const STORAGE_DIR_NAME: &str = "TakeMe";
const APP_DIR_NAME: &str = "takemi";
const SETTINGS_FILE_NAME: &str = "settings.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub daily_capture_hour: u32,
    pub daily_capture_minute: u32,
    /// `None` means the default `<documents>/TakeMe` directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo_storage_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_trigger_date: Option<NaiveDate>,
    /// Shell command that writes one still image to stdout
    #[serde(skip_serializing_if = "Option::is_none")]
    pub camera_command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ffmpeg_path: Option<String>,
    pub frame_rate: f64,
    /// Opt-in catch-up window; absent keeps the exact-minute trigger
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catch_up_window_secs: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            daily_capture_hour: DEFAULT_CAPTURE_HOUR,
            daily_capture_minute: DEFAULT_CAPTURE_MINUTE,
            photo_storage_path: None,
            last_trigger_date: None,
            camera_command: None,
            ffmpeg_path: None,
            frame_rate: DEFAULT_FRAME_RATE,
            catch_up_window_secs: None,
        }
    }
}

impl Settings {
    pub fn storage_dir(&self) -> PathBuf {
        self.photo_storage_path
            .clone()
            .unwrap_or_else(default_storage_dir)
    }

    pub fn trigger_policy(&self) -> TriggerPolicy {
        match self.catch_up_window_secs {
            Some(secs) if secs > 0 => TriggerPolicy::CatchUpWindow(Duration::from_secs(secs)),
            _ => TriggerPolicy::ExactMinute,
        }
    }

    fn validate(&self) -> Result<()> {
        ScheduleConfig::new(self.daily_capture_hour, self.daily_capture_minute)?;
        if !(self.frame_rate > 0.0) || !self.frame_rate.is_finite() {
            return Err(Error::InvalidFrameRate(self.frame_rate));
        }
        Ok(())
    }
}

/// Default storage directory: `<documents>/TakeMe`
pub fn default_storage_dir() -> PathBuf {
    dirs::document_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join("Documents")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join(STORAGE_DIR_NAME)
}

/// Default settings file: `<config_dir>/takemi/settings.json`
pub fn default_settings_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
        .join(SETTINGS_FILE_NAME)
}

/// File-backed settings shared by the scheduler, photo store and CLI
pub struct SettingsStore {
    path: PathBuf,
    settings: Mutex<Settings>,
}

impl SettingsStore {
    /// Load settings from `path`, falling back to defaults when the file is missing
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let settings = if path.exists() {
            let contents = fs::read_to_string(&path).map_err(|e| Error::file_io(&path, e))?;
            let settings: Settings = serde_json::from_str(&contents).map_err(|e| {
                Error::Settings(format!("Failed to parse {}: {}", path.display(), e))
            })?;
            settings.validate()?;
            debug!(path = %path.display(), "loaded settings");
            settings
        } else {
            debug!(path = %path.display(), "settings file not found, using defaults");
            Settings::default()
        };

        ensure_directory_exists(&settings.storage_dir());

        Ok(Self {
            path,
            settings: Mutex::new(settings),
        })
    }

    pub fn open_default() -> Result<Self> {
        Self::open(default_settings_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot of the current settings
    pub fn settings(&self) -> Settings {
        self.lock().clone()
    }

    pub fn storage_dir(&self) -> PathBuf {
        self.lock().storage_dir()
    }

    pub fn set_capture_time(&self, hour: u32, minute: u32) -> Result<()> {
        let config = ScheduleConfig::new(hour, minute)?;
        self.update(|s| {
            s.daily_capture_hour = config.hour();
            s.daily_capture_minute = config.minute();
        })
    }

    pub fn set_storage_dir(&self, dir: impl Into<PathBuf>) -> Result<()> {
        let dir = dir.into();
        ensure_directory_exists(&dir);
        self.update(|s| s.photo_storage_path = Some(dir))
    }

    pub fn set_camera_command(&self, command: Option<String>) -> Result<()> {
        self.update(|s| s.camera_command = command.filter(|c| !c.trim().is_empty()))
    }

    pub fn set_ffmpeg_path(&self, path: Option<String>) -> Result<()> {
        self.update(|s| s.ffmpeg_path = path.filter(|p| !p.trim().is_empty()))
    }

    pub fn set_frame_rate(&self, frame_rate: f64) -> Result<()> {
        if !(frame_rate > 0.0) || !frame_rate.is_finite() {
            return Err(Error::InvalidFrameRate(frame_rate));
        }
        self.update(|s| s.frame_rate = frame_rate)
    }

    /// `None` or zero restores the exact-minute trigger
    pub fn set_catch_up_window(&self, secs: Option<u64>) -> Result<()> {
        self.update(|s| s.catch_up_window_secs = secs.filter(|&v| v > 0))
    }

    /// Today's capture time if it has not passed yet, otherwise tomorrow's
    pub fn next_capture_time(&self, now: NaiveDateTime) -> NaiveDateTime {
        let config = self.schedule();
        let today = now.date().and_time(config.time());
        if today > now {
            today
        } else {
            today + ChronoDuration::days(1)
        }
    }

    pub fn save(&self) -> Result<()> {
        let settings = self.settings();
        self.write(&settings)
    }

    fn update(&self, apply: impl FnOnce(&mut Settings)) -> Result<()> {
        let snapshot = {
            let mut settings = self.lock();
            apply(&mut settings);
            settings.clone()
        };
        self.write(&snapshot)
    }

    fn write(&self, settings: &Settings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::file_io(parent, e))?;
        }
        let json = serde_json::to_string_pretty(settings)
            .map_err(|e| Error::Settings(format!("Failed to serialize settings: {}", e)))?;
        fs::write(&self.path, json).map_err(|e| Error::file_io(&self.path, e))
    }

    fn lock(&self) -> MutexGuard<'_, Settings> {
        self.settings.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ScheduleStore for SettingsStore {
    fn schedule(&self) -> ScheduleConfig {
        let settings = self.lock();
        ScheduleConfig::new(settings.daily_capture_hour, settings.daily_capture_minute)
            .unwrap_or_default()
    }

    fn trigger_state(&self) -> TriggerState {
        TriggerState {
            last_fired: self.lock().last_trigger_date,
        }
    }

    fn record_trigger(&self, state: &TriggerState) {
        let last_fired = state.last_fired;
        if let Err(e) = self.update(|s| s.last_trigger_date = last_fired) {
            warn!("Failed to persist trigger state: {}", e);
        }
    }
}

/// Create `dir` (and parents); failures are logged, not fatal
pub fn ensure_directory_exists(dir: &Path) {
    if let Err(e) = fs::create_dir_all(dir) {
        warn!(dir = %dir.display(), "Error creating directory: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &Path) -> SettingsStore {
        let path = dir.join("settings.json");
        let seed = serde_json::json!({ "photoStoragePath": dir.join("photos") });
        fs::write(&path, seed.to_string()).unwrap();
        SettingsStore::open(path).unwrap()
    }

    #[test]
    fn test_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = store_in(tmp.path()).settings();

        assert_eq!(settings.daily_capture_hour, 14);
        assert_eq!(settings.daily_capture_minute, 0);
        assert_eq!(settings.frame_rate, 2.0);
        assert!(settings.last_trigger_date.is_none());
        assert!(settings.camera_command.is_none());
        assert_eq!(settings.trigger_policy(), TriggerPolicy::ExactMinute);
        assert!(Settings::default().storage_dir().ends_with("TakeMe"));
    }

    #[test]
    fn test_settings_persist_across_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path());
        store.set_capture_time(9, 30).unwrap();
        store.set_camera_command(Some("imagesnap -".to_string())).unwrap();
        store.set_catch_up_window(Some(300)).unwrap();

        let reopened = SettingsStore::open(tmp.path().join("settings.json")).unwrap();
        let settings = reopened.settings();
        assert_eq!(settings.daily_capture_hour, 9);
        assert_eq!(settings.daily_capture_minute, 30);
        assert_eq!(settings.camera_command.as_deref(), Some("imagesnap -"));
        assert_eq!(reopened.storage_dir(), tmp.path().join("photos"));
        assert_eq!(
            settings.trigger_policy(),
            TriggerPolicy::CatchUpWindow(Duration::from_secs(300))
        );
    }

    #[test]
    fn test_storage_dir_is_created() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path());
        assert!(store.storage_dir().is_dir());
    }

    #[test]
    fn test_invalid_capture_time_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path());

        assert!(store.set_capture_time(24, 0).is_err());
        assert!(store.set_capture_time(10, 60).is_err());
        assert_eq!(store.schedule(), ScheduleConfig::new(14, 0).unwrap());
    }

    #[test]
    fn test_invalid_frame_rate_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path());

        assert!(matches!(store.set_frame_rate(0.0), Err(Error::InvalidFrameRate(_))));
        assert!(store.set_frame_rate(f64::NAN).is_err());
        assert!(store.set_frame_rate(24.0).is_ok());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("settings.json");
        fs::write(&path, "{ not json").unwrap();

        assert!(matches!(SettingsStore::open(&path), Err(Error::Settings(_))));
    }

    #[test]
    fn test_camel_case_keys() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("settings.json");
        fs::write(
            &path,
            r#"{ "dailyCaptureHour": 7, "dailyCaptureMinute": 45, "lastTriggerDate": "2024-03-05" }"#,
        )
        .unwrap();

        let store = SettingsStore::open(&path).unwrap();
        assert_eq!(store.schedule(), ScheduleConfig::new(7, 45).unwrap());
        assert_eq!(
            store.trigger_state().last_fired,
            NaiveDate::from_ymd_opt(2024, 3, 5)
        );
    }

    #[test]
    fn test_record_trigger_persists() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path());
        let today = NaiveDate::from_ymd_opt(2024, 3, 5);
        store.record_trigger(&TriggerState { last_fired: today });

        let reopened = SettingsStore::open(tmp.path().join("settings.json")).unwrap();
        assert_eq!(reopened.trigger_state().last_fired, today);
    }

    #[test]
    fn test_next_capture_time() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path());
        store.set_capture_time(9, 0).unwrap();

        let date = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        let before = date.and_hms_opt(8, 0, 0).unwrap();
        let after = date.and_hms_opt(9, 0, 0).unwrap();

        assert_eq!(store.next_capture_time(before), date.and_hms_opt(9, 0, 0).unwrap());
        assert_eq!(
            store.next_capture_time(after),
            date.succ_opt().unwrap().and_hms_opt(9, 0, 0).unwrap()
        );
    }
}
