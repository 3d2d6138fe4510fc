//! Shared configuration for the Codeloom binaries.
//!
//! [`Config`] is layered by `ortho_config`: built-in defaults, then a TOML
//! file named by `--config-path` or `CODELOOM_CONFIG_PATH`, then
//! `CODELOOM_*` environment variables, then command-line flags. Later layers
//! win.
//!
//! Plugin configuration values (what a plugin reads with `GetValue`) are not
//! part of this struct; they travel with a pipeline run.

mod defaults;
mod logging;

use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub use self::defaults::{
    DEFAULT_LOG_FILTER, STATE_DIRECTORY, default_extension_cache, default_log_filter,
    default_log_filter_string, default_log_format,
};
pub use self::logging::{LogFormat, LogFormatParseError};

/// Runtime configuration shared by the CLI and plugin hosts.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "CODELOOM")]
pub struct Config {
    /// `tracing` filter expression, for example `info,codeloom_core=debug`.
    #[serde(default = "default_log_filter_string")]
    pub log_filter: String,
    /// Log output format.
    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,
    /// Directory extensions are installed into.
    #[serde(default)]
    pub extension_cache: Option<Utf8PathBuf>,
    /// Upper bound on a whole pipeline run, in seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
            extension_cache: None,
            timeout_secs: None,
        }
    }
}

impl Config {
    /// Returns the log filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Returns the log output format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Returns the extension cache directory, applying the default.
    #[must_use]
    pub fn extension_cache(&self) -> Utf8PathBuf {
        self.extension_cache
            .clone()
            .unwrap_or_else(default_extension_cache)
    }

    /// Returns the run timeout, if one is configured. Zero means none.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs
            .filter(|seconds| *seconds > 0)
            .map(Duration::from_secs)
    }
}
