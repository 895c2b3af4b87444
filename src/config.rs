//! Runtime settings: defaults, TOML file, `SNAPTRANS_` environment overrides.
//! The core never caches settings values; it reads the shared handle at the
//! moment of use so edits take effect on the next lookup or request.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::translate::language;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Settings for the capture and translation core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Source language tag, or `auto`.
    pub source_lang: String,
    pub target_lang: String,
    /// Upper bound on characters sent to a provider.
    pub max_text_length: usize,
    pub cache_enabled: bool,
    pub cache_ttl_minutes: u64,
    /// LRU bound on live cache entries.
    pub cache_capacity: usize,
    pub cache_sweep_interval_secs: u64,
    /// Extra rounds after the first one.
    pub max_retry_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub request_timeout_secs: u64,
    /// Minimum spacing between two outbound provider calls.
    pub min_request_interval_ms: u64,
    /// Put the authenticated Cloud API first in the provider chain.
    pub use_official_api: bool,
    pub api_key: Option<String>,
    pub libre_url: String,
    pub libre_api_key: Option<String>,
    /// Put the user's clipboard back once the result has been delivered.
    pub auto_restore_clipboard: bool,
    pub capture: CaptureSettings,
    /// Where the cache and history databases live. Defaults to the platform data dir.
    pub data_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            source_lang: "auto".to_string(),
            target_lang: "en".to_string(),
            max_text_length: 5000,
            cache_enabled: true,
            cache_ttl_minutes: 60 * 24,
            cache_capacity: 2048,
            cache_sweep_interval_secs: 3600,
            max_retry_attempts: 2,
            retry_base_delay_ms: 500,
            request_timeout_secs: 10,
            min_request_interval_ms: 100,
            use_official_api: false,
            api_key: None,
            libre_url: "https://libretranslate.de".to_string(),
            libre_api_key: None,
            auto_restore_clipboard: true,
            capture: CaptureSettings::default(),
            data_dir: None,
        }
    }
}

/// Timing knobs of the clipboard handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    pub poll_interval_ms: u64,
    pub timeout_ms: u64,
    /// Attempts per clipboard operation before reporting it unavailable.
    pub clipboard_retries: u32,
    pub clipboard_retry_delay_ms: u64,
    pub max_capture_length: usize,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 25,
            timeout_ms: 1000,
            clipboard_retries: 3,
            clipboard_retry_delay_ms: 20,
            max_capture_length: 5000,
        }
    }
}

impl CaptureSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.clipboard_retry_delay_ms)
    }
}

impl Settings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn min_request_interval(&self) -> Duration {
        Duration::from_millis(self.min_request_interval_ms)
    }

    /// Credential for the authenticated API, ignoring blank values.
    pub fn credential(&self) -> Option<&str> {
        self.api_key.as_deref().map(str::trim).filter(|k| !k.is_empty())
    }

    /// Directory holding `cache.db` and `history.db`.
    pub fn resolved_data_dir(&self) -> Option<PathBuf> {
        self.data_dir
            .clone()
            .or_else(|| project_dirs().map(|d| d.data_dir().to_path_buf()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.target_lang == language::AUTO {
            return Err(ConfigError::Invalid("target language cannot be 'auto'".into()));
        }
        for tag in [&self.source_lang, &self.target_lang] {
            if !language::is_valid_language(tag) {
                return Err(ConfigError::Invalid(format!("unknown language tag '{tag}'")));
            }
        }
        if self.max_text_length == 0 {
            return Err(ConfigError::Invalid("max_text_length must be > 0".into()));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid("request_timeout_secs must be > 0".into()));
        }
        if self.cache_capacity == 0 {
            return Err(ConfigError::Invalid("cache_capacity must be > 0".into()));
        }
        if self.capture.poll_interval_ms == 0 || self.capture.timeout_ms == 0 {
            return Err(ConfigError::Invalid("capture timings must be > 0".into()));
        }
        if self.capture.clipboard_retries == 0 {
            return Err(ConfigError::Invalid("clipboard_retries must be >= 1".into()));
        }
        Ok(())
    }
}

/// Shared, live view of the settings.
pub type SettingsHandle = Arc<RwLock<Settings>>;

pub fn shared(settings: Settings) -> SettingsHandle {
    Arc::new(RwLock::new(settings))
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "snaptrans")
}

/// Load settings: defaults, then the platform config file, then `explicit`
/// if given, then `SNAPTRANS_*` variables (`SNAPTRANS_CAPTURE__TIMEOUT_MS` for nested keys).
pub fn load(explicit: Option<&Path>) -> Result<Settings, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(Settings::default()));

    if let Some(global) = project_dirs().map(|d| d.config_dir().join("config.toml")) {
        if global.exists() {
            figment = figment.merge(Toml::file(global));
        }
    }

    if let Some(path) = explicit {
        if !path.exists() {
            return Err(ConfigError::Invalid(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        figment = figment.merge(Toml::file(path));
    }

    figment = figment.merge(Env::prefixed("SNAPTRANS_").split("__"));

    let settings: Settings = figment.extract().map_err(Box::new)?;
    settings.validate()?;
    Ok(settings)
}
