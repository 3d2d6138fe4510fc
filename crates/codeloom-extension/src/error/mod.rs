//! Domain errors raised while resolving, installing, and starting extensions.
//!
//! I/O errors are wrapped in `Arc` to satisfy the `result_large_err` Clippy
//! lint.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

/// Errors arising from extension management.
#[derive(Debug, Error)]
pub enum ExtensionError {
    /// No package in the registry matches the name and constraint.
    #[error("package '{name}' matching '{constraint}' not found in registry '{registry}'")]
    PackageNotFound {
        /// Package name that was looked up.
        name: String,
        /// Version constraint as written.
        constraint: String,
        /// Registry identifier.
        registry: String,
    },

    /// The registry identifier was never added to the manager.
    #[error("unknown package registry '{registry}'")]
    UnknownSource {
        /// Registry identifier.
        registry: String,
    },

    /// A registry could not be listed.
    #[error("registry '{registry}' failed: {message}")]
    Registry {
        /// Registry identifier.
        registry: String,
        /// Human-readable failure description.
        message: String,
        /// Optional underlying I/O error.
        #[source]
        source: Option<Arc<std::io::Error>>,
    },

    /// Copying a package into the cache failed.
    #[error("failed to install '{name}@{version}': {message}")]
    InstallError {
        /// Package name.
        name: String,
        /// Package version.
        version: String,
        /// Human-readable failure description.
        message: String,
        /// Optional underlying I/O error.
        #[source]
        source: Option<Arc<std::io::Error>>,
    },

    /// The extension executable could not be launched.
    #[error("extension '{name}' failed to start: {message}")]
    SpawnError {
        /// Extension name.
        name: String,
        /// Human-readable failure description.
        message: String,
        /// Optional underlying I/O error.
        #[source]
        source: Option<Arc<std::io::Error>>,
    },

    /// An extension manifest is missing or malformed.
    #[error("manifest error in '{}': {message}", path.display())]
    Manifest {
        /// Manifest path.
        path: PathBuf,
        /// Description of the validation failure.
        message: String,
    },

    /// A version constraint could not be parsed.
    #[error("invalid version constraint '{constraint}': {source}")]
    InvalidConstraint {
        /// Constraint as written.
        constraint: String,
        /// Parser failure.
        #[source]
        source: semver::Error,
    },
}

impl ExtensionError {
    pub(crate) fn install(
        name: &str,
        version: &semver::Version,
        message: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        Self::InstallError {
            name: name.to_owned(),
            version: version.to_string(),
            message: message.into(),
            source: Some(Arc::new(source)),
        }
    }
}

#[cfg(test)]
mod tests;
