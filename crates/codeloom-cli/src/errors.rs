//! Error types for the CLI runtime.

use std::io;
use std::sync::Arc;

use codeloom_core::{JsonConfigError, PersistError, PipelineError};
use codeloom_extension::ExtensionError;
use codeloom_plugins::EndpointError;
use thiserror::Error;

use crate::telemetry::TelemetryError;

#[derive(Debug, Error)]
pub(crate) enum AppError {
    #[error("failed to load configuration: {0}")]
    LoadConfiguration(Arc<ortho_config::OrthoError>),
    #[error("{0}")]
    CliUsage(clap::Error),
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    #[error("failed to start the async runtime: {0}")]
    Runtime(io::Error),
    #[error(transparent)]
    Extension(#[from] ExtensionError),
    #[error("plugin host failed: {0}")]
    Plugin(#[from] EndpointError),
    #[error("invalid plugin configuration: {0}")]
    PluginConfig(#[from] JsonConfigError),
    #[error("invalid pipeline: {0}")]
    Pipeline(#[from] PipelineError),
    #[error("failed to resolve input '{input}': {source}")]
    Input { input: String, source: io::Error },
    #[error(transparent)]
    Persist(#[from] PersistError),
    #[error("failed to write output: {0}")]
    WriteOutput(io::Error),
}
