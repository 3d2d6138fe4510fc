use std::env;

use camino::Utf8PathBuf;

use crate::logging::LogFormat;

/// Default log filter expression used by the binaries.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Directory under the home directory that holds Codeloom state.
pub const STATE_DIRECTORY: &str = ".codeloom";

/// Default log filter expression used by the binaries.
#[must_use]
pub const fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
#[must_use]
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format for the binaries.
#[must_use]
pub const fn default_log_format() -> LogFormat {
    LogFormat::Json
}

/// Computes the default extension cache, `$HOME/.codeloom/extensions`.
///
/// Falls back to the system temporary directory when no home directory can
/// be determined or it is not valid UTF-8.
#[must_use]
pub fn default_extension_cache() -> Utf8PathBuf {
    let mut base = dirs::home_dir()
        .and_then(|path| Utf8PathBuf::from_path_buf(path).ok())
        .unwrap_or_else(fallback_base_directory);
    base.push(STATE_DIRECTORY);
    base.push("extensions");
    base
}

fn fallback_base_directory() -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(env::temp_dir()).unwrap_or_else(|_| Utf8PathBuf::from("/tmp"))
}
