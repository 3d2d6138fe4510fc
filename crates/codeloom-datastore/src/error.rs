//! Errors raised by store, sink, and scope operations.
//!
//! The error is `Clone` so a single failed fetch can be handed to every
//! caller coalesced onto it. I/O errors are wrapped in `Arc` for that reason.

use std::sync::Arc;

use thiserror::Error;

/// Errors arising from data store operations.
#[derive(Debug, Clone, Error)]
pub enum DataStoreError {
    /// The run's cancellation token was signalled.
    #[error("operation cancelled")]
    Cancelled,

    /// No source in the scope recognises the URI.
    #[error("no source can resolve '{uri}'")]
    SourceUnavailable {
        /// URI that was requested.
        uri: String,
    },

    /// A source recognised the URI but fetching it failed.
    #[error("failed to read '{uri}': {message}")]
    SourceReadError {
        /// URI that was requested.
        uri: String,
        /// Human-readable failure description.
        message: String,
        /// Optional underlying I/O error.
        #[source]
        source: Option<Arc<std::io::Error>>,
    },
}

impl DataStoreError {
    /// Wraps an I/O failure encountered while reading `uri`.
    #[must_use]
    pub fn read_failed(uri: impl Into<String>, source: std::io::Error) -> Self {
        Self::SourceReadError {
            uri: uri.into(),
            message: source.to_string(),
            source: Some(Arc::new(source)),
        }
    }

    /// Returns `true` for [`DataStoreError::Cancelled`].
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
