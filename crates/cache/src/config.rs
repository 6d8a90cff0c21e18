//! Cache configuration.
//!
//! Settings can be created programmatically, loaded from a YAML file, or read
//! from `VASTVIEW_*` environment variables layered over the defaults.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::memory_budget::{FixedMemory, MemoryProbe, SystemMemory};

const ENV_PERCENT: &str = "VASTVIEW_CACHE_PERCENT";
const ENV_SAMPLE_SHIFT: &str = "VASTVIEW_SAMPLE_SHIFT";
const ENV_MIN_VISIBLE: &str = "VASTVIEW_MIN_VISIBLE_PIXELS";
const ENV_MEMORY_LIMIT: &str = "VASTVIEW_MEMORY_LIMIT_MB";
const ENV_LOG_TRANSITIONS: &str = "VASTVIEW_LOG_TRANSITIONS";

/// Largest accepted sample shift (1/256 of each dimension)
pub const MAX_SAMPLE_SHIFT: u32 = 8;

/// Configuration for a scene's cache and viewport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Share of process memory the cache window may use, in percent
    pub budget_percent: u8,
    /// The sample image is the full image shifted right by this many bits
    pub sample_shift: u32,
    /// Smallest window extent, in scene pixels, that zooming may reach
    pub min_visible_pixels: u32,
    /// Override for the process memory figure; `None` asks the OS
    pub memory_limit_mb: Option<u64>,
    /// Log every cache state transition at debug level
    pub log_transitions: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            budget_percent: 5,
            sample_shift: 2,
            min_visible_pixels: 50,
            memory_limit_mb: None,
            log_transitions: false,
        }
    }
}

impl CacheConfig {
    /// Sets the cache budget percentage.
    pub fn with_budget_percent(mut self, percent: u8) -> Self {
        self.budget_percent = percent;
        self
    }

    /// Sets the sample image shift.
    pub fn with_sample_shift(mut self, shift: u32) -> Self {
        self.sample_shift = shift;
        self
    }

    /// Sets the minimum visible extent for zooming.
    pub fn with_min_visible_pixels(mut self, pixels: u32) -> Self {
        self.min_visible_pixels = pixels;
        self
    }

    /// Pins the process memory figure instead of querying the OS.
    pub fn with_memory_limit_mb(mut self, mb: u64) -> Self {
        self.memory_limit_mb = Some(mb);
        self
    }

    pub fn with_log_transitions(mut self, enabled: bool) -> Self {
        self.log_transitions = enabled;
        self
    }

    /// Returns the default config file location for the current platform.
    ///
    /// - Linux: ~/.config/vastview/config.yaml
    /// - macOS: ~/Library/Application Support/vastview/config.yaml
    /// - Windows: %APPDATA%\vastview\config.yaml
    pub fn default_config_path() -> PathBuf {
        match dirs::config_dir() {
            Some(dir) => dir.join("vastview").join("config.yaml"),
            None => PathBuf::from("vastview.yaml"),
        }
    }

    /// Loads configuration from environment variables over the defaults.
    ///
    /// Environment variables:
    /// - `VASTVIEW_CACHE_PERCENT`: cache budget percent (default: 5)
    /// - `VASTVIEW_SAMPLE_SHIFT`: sample image shift (default: 2)
    /// - `VASTVIEW_MIN_VISIBLE_PIXELS`: zoom limit (default: 50)
    /// - `VASTVIEW_MEMORY_LIMIT_MB`: process memory override
    /// - `VASTVIEW_LOG_TRANSITIONS`: `true`/`false`
    ///
    /// # Errors
    /// Returns an error if any variable holds an unparsable or invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().merge_env()
    }

    /// Overlays any `VASTVIEW_*` environment variables onto `self`.
    pub fn merge_env(mut self) -> Result<Self, ConfigError> {
        if let Some(v) = env_value(ENV_PERCENT)? {
            self.budget_percent = v;
        }
        if let Some(v) = env_value(ENV_SAMPLE_SHIFT)? {
            self.sample_shift = v;
        }
        if let Some(v) = env_value(ENV_MIN_VISIBLE)? {
            self.min_visible_pixels = v;
        }
        if let Some(v) = env_value(ENV_MEMORY_LIMIT)? {
            self.memory_limit_mb = Some(v);
        }
        if let Some(v) = env_value(ENV_LOG_TRANSITIONS)? {
            self.log_transitions = v;
        }
        self.validate()?;
        Ok(self)
    }

    /// Loads configuration from a YAML file.
    ///
    /// Missing keys take their default values:
    /// ```yaml
    /// budget_percent: 10
    /// sample_shift: 3
    /// ```
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref())?;
        let config: Self = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Saves configuration to a YAML file, creating parent directories.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, serde_yaml::to_string(self)?)?;
        Ok(())
    }

    /// Checks every field is in range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=100).contains(&self.budget_percent) {
            return Err(ConfigError::invalid(
                "budget_percent",
                format!("must be 1..=100, got {}", self.budget_percent),
            ));
        }
        if self.sample_shift > MAX_SAMPLE_SHIFT {
            return Err(ConfigError::invalid(
                "sample_shift",
                format!("must be at most {MAX_SAMPLE_SHIFT}, got {}", self.sample_shift),
            ));
        }
        if self.min_visible_pixels == 0 {
            return Err(ConfigError::invalid("min_visible_pixels", "must be positive"));
        }
        if self.memory_limit_mb == Some(0) {
            return Err(ConfigError::invalid("memory_limit_mb", "must be positive"));
        }
        Ok(())
    }

    /// The memory probe these settings call for.
    pub fn memory_probe(&self) -> Arc<dyn MemoryProbe> {
        match self.memory_limit_mb {
            Some(mb) => Arc::new(FixedMemory::from_mb(mb)),
            None => Arc::new(SystemMemory),
        }
    }
}

fn env_value<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::invalid(key, format!("cannot parse {:?}", raw.trim()))),
        Err(_) => Ok(None),
    }
}

/// Errors that can occur during configuration operations.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Invalid value for a configuration parameter
    #[error("invalid value for configuration key {key}: {reason}")]
    InvalidValue { key: String, reason: String },
    /// I/O error reading or writing a configuration file
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// The configuration file is not valid YAML for these settings
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl ConfigError {
    fn invalid(key: &str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}
