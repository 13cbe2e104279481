//! # minitrace-config
//!
//! Configuration management for MiniTrace.
//!
//! Loads configuration from:
//! 1. `~/.minitrace/config.toml` (global)
//! 2. the file named by `MINITRACE_CONFIG` (overrides global)
//! 3. Environment variables (highest priority)
//!
//! The gate file and the coverage file live under `trace.data_dir` and are
//! named after the uid of the traced process, see [`path::TracePaths`].

pub mod logging;
pub mod path;
pub mod testing;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use tracing::debug;

pub use path::TracePaths;

/// Default directory holding the gate and coverage files
pub const DEFAULT_DATA_DIR: &str = "/data";

/// Default file name prefix, completed with `<uid>_config.in` / `<uid>_coverage.dat`
pub const DEFAULT_FILE_PREFIX: &str = "mini_trace_";

/// Key handed to the instrumentation dispatcher when enabling method tracing
pub const DEFAULT_INSTRUMENTATION_KEY: &str = "MiniTracer";

/// Classes defined by files under this prefix are never traced
pub const DEFAULT_FRAMEWORK_PREFIX: &str = "/system/framework/";

/// Global config instance
static CONFIG: Lazy<RwLock<Config>> = Lazy::new(|| RwLock::new(Config::load().unwrap_or_default()));

/// Get global config (read-only)
pub fn config() -> std::sync::RwLockReadGuard<'static, Config> {
    CONFIG.read().unwrap_or_else(PoisonError::into_inner)
}

/// Reload config from disk
pub fn reload() -> Result<(), ConfigError> {
    let new_config = Config::load()?;
    *CONFIG.write().unwrap_or_else(PoisonError::into_inner) = new_config;
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub trace: TraceConfig,
    pub filter: FilterConfig,
}

impl Config {
    /// Load config from standard locations
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        // 1. Global config (~/.minitrace/config.toml)
        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                debug!("Loading global config from {:?}", global_path);
                config = Self::from_file(&global_path)?;
            }
        }

        // 2. Explicit override file
        if let Ok(path) = std::env::var("MINITRACE_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                debug!("Loading override config from {:?}", path);
                config.merge(Self::from_file(&path)?);
            }
        }

        // 3. Environment variables
        config.apply_env_overrides();

        Ok(config)
    }

    /// Parse a single TOML file without merging or env overrides
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Global config path: ~/.minitrace/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".minitrace/config.toml"))
    }

    /// Merge another config, keeping our values where `other` has defaults
    fn merge(&mut self, other: Config) {
        let defaults = Config::default();
        if other.trace.data_dir != defaults.trace.data_dir {
            self.trace.data_dir = other.trace.data_dir;
        }
        if other.trace.file_prefix != defaults.trace.file_prefix {
            self.trace.file_prefix = other.trace.file_prefix;
        }
        if other.trace.instrumentation_key != defaults.trace.instrumentation_key {
            self.trace.instrumentation_key = other.trace.instrumentation_key;
        }
        if other.filter.framework_prefix != defaults.filter.framework_prefix {
            self.filter.framework_prefix = other.filter.framework_prefix;
        }
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("MINITRACE_DATA_DIR") {
            self.trace.data_dir = PathBuf::from(dir);
        }
        if let Ok(prefix) = std::env::var("MINITRACE_FRAMEWORK_PREFIX") {
            self.filter.framework_prefix = prefix;
        }
    }

    /// Generate default config TOML string
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Config::default()).unwrap_or_default()
    }

    /// Gate and coverage paths for the current process owner
    pub fn paths(&self) -> TracePaths {
        TracePaths::current(&self.trace)
    }
}

/// Trace file layout and dispatcher settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    /// Directory holding the gate and coverage files
    pub data_dir: PathBuf,
    /// File name prefix shared by the gate and coverage files
    pub file_prefix: String,
    /// Key passed to enable/disable method tracing
    pub instrumentation_key: String,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            file_prefix: DEFAULT_FILE_PREFIX.to_string(),
            instrumentation_key: DEFAULT_INSTRUMENTATION_KEY.to_string(),
        }
    }
}

/// Class eligibility settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Literal location prefix of the system framework; matching classes are skipped
    pub framework_prefix: String,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            framework_prefix: DEFAULT_FRAMEWORK_PREFIX.to_string(),
        }
    }
}
