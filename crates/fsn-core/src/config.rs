//! Configuration structures for the fsn watch engine and its hosts.
//!
//! - [`WatchConfig`] - Watch session settings (latency, worker naming)
//! - [`OutputConfig`] - How a host renders delivered events
//! - [`Config`] - Root configuration combining all settings
//!
//! All configuration types implement [`Default`] and deserialize with
//! `#[serde(default)]`, so a configuration file only needs the keys it
//! changes.

use std::time::Duration;

use camino::Utf8Path;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default coalescing latency handed to the native source.
pub const DEFAULT_LATENCY_MS: u64 = 50;

/// Color handling for host output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ColorScheme {
    /// Use color when the output supports it and `NO_COLOR` is unset.
    #[default]
    Auto,
    /// Always emit ANSI colors.
    Always,
    /// Never emit ANSI colors.
    Never,
}

/// Rendering of delivered change events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum OutputFormat {
    /// One `kind path` line per event.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// Configuration for a watch session.
///
/// # Examples
///
/// ```
/// use fsn_core::WatchConfig;
/// use std::time::Duration;
///
/// let config = WatchConfig::default();
/// assert_eq!(config.latency(), Duration::from_millis(50));
/// assert_eq!(config.thread_name_prefix, "fsn-session");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Maximum coalescing delay, in milliseconds, before the native source
    /// may deliver pending changes.
    ///
    /// Affects when events arrive, never which kinds are reported.
    pub latency_ms: u64,

    /// Prefix for the name of each session's background thread.
    ///
    /// The session key is appended, e.g. `fsn-session-3`.
    pub thread_name_prefix: String,
}

impl WatchConfig {
    /// Returns the latency as a [`Duration`].
    #[inline]
    #[must_use]
    pub const fn latency(&self) -> Duration {
        Duration::from_millis(self.latency_ms)
    }

    /// Checks the section for values the engine cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidOption`] when the thread name prefix is
    /// empty or contains a NUL byte.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.thread_name_prefix.is_empty() {
            return Err(ConfigError::invalid_option(
                "watch.thread_name_prefix",
                "must not be empty",
            ));
        }
        if self.thread_name_prefix.contains('\0') {
            return Err(ConfigError::invalid_option(
                "watch.thread_name_prefix",
                "must not contain NUL bytes",
            ));
        }
        Ok(())
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            latency_ms: DEFAULT_LATENCY_MS,
            thread_name_prefix: "fsn-session".to_owned(),
        }
    }
}

/// Configuration for event output in a host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Line format for delivered events.
    pub format: OutputFormat,

    /// Color handling.
    pub color: ColorScheme,
}

/// Root configuration.
///
/// # Examples
///
/// ```
/// use fsn_core::Config;
///
/// let config: Config = serde_json::from_str(r#"{"watch": {"latency_ms": 5}}"#)?;
/// assert_eq!(config.watch.latency_ms, 5);
/// assert_eq!(config.watch.thread_name_prefix, "fsn-session");
/// # Ok::<(), serde_json::Error>(())
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Watch session configuration.
    pub watch: WatchConfig,

    /// Output configuration.
    pub output: OutputConfig,
}

impl Config {
    /// Loads and validates a configuration file in JSON format.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Parse`] if it is not valid JSON for this structure, and
    /// [`ConfigError::InvalidOption`] if validation fails.
    pub fn from_file(path: &Utf8Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates every section.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError::InvalidOption`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.watch.validate()
    }
}
