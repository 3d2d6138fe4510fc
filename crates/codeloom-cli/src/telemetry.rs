//! Structured telemetry initialisation for the CLI.
//!
//! Standard output carries the run's results (artifact names or persisted
//! paths), so every log line goes to standard error. Plugin processes log to
//! their own stderr, which the extension layer drains back into this
//! subscriber under the `codeloom_extension` target.

use std::io::{self, IsTerminal};

use codeloom_config::{Config, LogFormat};
use once_cell::sync::OnceCell;
use tracing::{Subscriber, subscriber::SetGlobalDefaultError};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

static TELEMETRY_GUARD: OnceCell<()> = OnceCell::new();

/// Errors encountered while configuring telemetry.
#[derive(Debug, thiserror::Error)]
pub(crate) enum TelemetryError {
    /// The configured log filter expression did not parse.
    #[error("invalid log filter '{filter}': {message}")]
    Filter {
        /// The expression as configured.
        filter: String,
        /// Parser diagnostic.
        message: String,
    },
    /// Another subscriber was already installed.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(SetGlobalDefaultError),
}

/// Installs the global tracing subscriber the first time it is called.
///
/// Later calls return immediately without touching global state, so a
/// harness that drives [`crate::run_with_loader`] repeatedly in one process
/// keeps the subscriber from its first run.
pub(crate) fn initialise(config: &Config) -> Result<(), TelemetryError> {
    TELEMETRY_GUARD
        .get_or_try_init(|| install_subscriber(config))
        .map(|_| ())
}

/// Parses the configured filter, naming the expression when it is invalid.
fn log_filter(config: &Config) -> Result<EnvFilter, TelemetryError> {
    EnvFilter::try_new(config.log_filter()).map_err(|error| TelemetryError::Filter {
        filter: config.log_filter().to_owned(),
        message: error.to_string(),
    })
}

fn install_subscriber(config: &Config) -> Result<(), TelemetryError> {
    let filter = log_filter(config)?;
    let interactive = io::stderr().is_terminal();

    let builder = |env_filter: EnvFilter| {
        fmt::Subscriber::builder()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_level(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_writer(io::stderr)
            .with_ansi(interactive)
            // Timestamps let captured logs be lined up with plugin output.
            .with_timer(fmt::time::UtcTime::rfc_3339())
    };

    let subscriber: Box<dyn Subscriber + Send + Sync> = match config.log_format() {
        LogFormat::Json => Box::new(builder(filter).json().flatten_event(true).finish()),
        LogFormat::Compact => Box::new(builder(filter).compact().finish()),
    };

    tracing::subscriber::set_global_default(subscriber).map_err(TelemetryError::Subscriber)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn config_with(filter: &str) -> Config {
        Config {
            log_filter: filter.to_owned(),
            ..Config::default()
        }
    }

    #[rstest]
    #[case("info")]
    #[case("warn,codeloom_plugins=debug")]
    fn accepts_filter_expressions(#[case] filter: &str) {
        assert!(log_filter(&config_with(filter)).is_ok());
    }

    #[rstest]
    fn rejected_filter_is_named_in_the_error() {
        let error = log_filter(&config_with("codeloom=[")).expect_err("invalid filter");

        assert!(error.to_string().contains("'codeloom=['"));
    }
}
