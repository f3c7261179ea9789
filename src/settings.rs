use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::capture::DEFAULT_JPEG_QUALITY;
use crate::presence::SamplerConfig;

const APP_DIR_NAME: &str = "proctored-survey";
const SETTINGS_FILE_NAME: &str = "settings.json";

/// Environment variable that overrides `api_base_url`.
pub const API_BASE_ENV: &str = "SURVEY_API_BASE";

/// `tokio::time::interval` rejects a zero period.
const MIN_DETECTION_INTERVAL_MS: u64 = 10;
/// A zero timeout would fail every server call before it is sent.
const MIN_REQUEST_TIMEOUT_SECS: u64 = 1;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Could not determine config directory")]
    NoConfigDir,
    #[error("Serialize settings: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("{context} {path:?}: {source}")]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SettingsError {
    fn io(context: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            context,
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Survey server root, e.g. `http://127.0.0.1:8000/api`.
    pub api_base_url: String,

    /// Time between face-detection ticks.
    pub detection_interval_ms: u64,

    /// A detection call slower than this counts as "no face" for that tick.
    pub detection_timeout_ms: u64,

    /// JPEG quality (1-100) for per-question snapshots.
    pub snapshot_jpeg_quality: u8,

    /// How long to wait for the recorder's final flush after stop.
    pub flush_timeout_ms: u64,

    /// Upper bound for each server call.
    pub request_timeout_secs: u64,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            api_base_url: "http://127.0.0.1:8000/api".to_string(),
            detection_interval_ms: 200,
            detection_timeout_ms: 1000,
            snapshot_jpeg_quality: DEFAULT_JPEG_QUALITY,
            flush_timeout_ms: 5000,
            request_timeout_secs: 30,
        }
    }
}

impl AppSettings {
    pub fn sampler_config(&self) -> SamplerConfig {
        SamplerConfig {
            interval: Duration::from_millis(
                self.detection_interval_ms.max(MIN_DETECTION_INTERVAL_MS),
            ),
            detect_timeout: Duration::from_millis(self.detection_timeout_ms),
        }
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(MIN_REQUEST_TIMEOUT_SECS))
    }

    /// Apply the value of `SURVEY_API_BASE`, if set and non-empty.
    pub fn with_api_base_override(mut self, value: Option<String>) -> Self {
        if let Some(base) = value.map(|v| v.trim().to_string()) {
            if !base.is_empty() {
                log::info!("Settings: API base overridden by {}: {}", API_BASE_ENV, base);
                self.api_base_url = base;
            }
        }
        self
    }
}

pub fn settings_path() -> Result<PathBuf, SettingsError> {
    let dir = dirs::config_dir().ok_or(SettingsError::NoConfigDir)?;
    Ok(dir.join(APP_DIR_NAME).join(SETTINGS_FILE_NAME))
}

/// Load from the user config dir, then apply the environment override.
pub fn load_settings() -> AppSettings {
    let settings = match settings_path() {
        Ok(path) => load_settings_from(&path),
        Err(e) => {
            log::warn!("Settings: {}", e);
            AppSettings::default()
        }
    };
    settings.with_api_base_override(std::env::var(API_BASE_ENV).ok())
}

/// Missing or unreadable files fall back to defaults.
pub fn load_settings_from(path: &Path) -> AppSettings {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str::<AppSettings>(&contents) {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("Settings: failed to parse {:?}: {}", path, e);
                AppSettings::default()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => AppSettings::default(),
        Err(e) => {
            log::warn!("Settings: failed to read {:?}: {}", path, e);
            AppSettings::default()
        }
    }
}

pub fn save_settings(settings: &AppSettings) -> Result<(), SettingsError> {
    save_settings_to(&settings_path()?, settings)
}

pub fn save_settings_to(path: &Path, settings: &AppSettings) -> Result<(), SettingsError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| SettingsError::io("Create config directory", parent, e))?;
    }

    let contents = serde_json::to_string_pretty(settings)?;

    // Temp file in the same directory, then rename over the target
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, &contents)
        .map_err(|e| SettingsError::io("Write temp settings", &tmp_path, e))?;

    // Windows rename fails if the destination exists
    if cfg!(windows) {
        if let Err(e) = std::fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(SettingsError::io("Remove existing settings file", path, e));
            }
        }
    }

    std::fs::rename(&tmp_path, path)
        .map_err(|e| SettingsError::io("Rename temp settings", &tmp_path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings_from(&dir.path().join("nope.json"));
        assert_eq!(settings, AppSettings::default());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(SETTINGS_FILE_NAME);

        let settings = AppSettings {
            api_base_url: "https://surveys.example.org/api".to_string(),
            detection_interval_ms: 250,
            ..AppSettings::default()
        };
        save_settings_to(&path, &settings).unwrap();

        assert_eq!(load_settings_from(&path), settings);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE_NAME);
        std::fs::write(&path, r#"{"flush_timeout_ms": 1200}"#).unwrap();

        let settings = load_settings_from(&path);
        assert_eq!(settings.flush_timeout(), Duration::from_millis(1200));
        assert_eq!(settings.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn malformed_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE_NAME);
        std::fs::write(&path, "{ not json").unwrap();
        assert_eq!(load_settings_from(&path), AppSettings::default());
    }

    #[test]
    fn env_override_replaces_base_url_unless_blank() {
        let overridden =
            AppSettings::default().with_api_base_override(Some("http://10.0.0.2/api".into()));
        assert_eq!(overridden.api_base_url, "http://10.0.0.2/api");

        let untouched = AppSettings::default().with_api_base_override(Some("  ".into()));
        assert_eq!(untouched.api_base_url, AppSettings::default().api_base_url);
    }

    #[test]
    fn zero_interval_is_clamped() {
        let settings = AppSettings {
            detection_interval_ms: 0,
            ..AppSettings::default()
        };
        assert_eq!(
            settings.sampler_config().interval,
            Duration::from_millis(MIN_DETECTION_INTERVAL_MS)
        );
    }

    #[test]
    fn zero_request_timeout_is_clamped() {
        let settings = AppSettings {
            request_timeout_secs: 0,
            ..AppSettings::default()
        };
        assert_eq!(
            settings.request_timeout(),
            Duration::from_secs(MIN_REQUEST_TIMEOUT_SECS)
        );
    }
}
