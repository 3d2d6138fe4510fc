//! Errors raised by the plugin protocol.
//!
//! [`EndpointError`] is `Clone` because one connection failure is delivered
//! to every call pending on it. Non-clonable sources are wrapped in `Arc`.

use std::sync::Arc;

use thiserror::Error;

use crate::jsonrpc::JsonRpcError;

/// Transport-layer errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// I/O error during read or write.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A frame header block carried no `Content-Length`.
    #[error("missing Content-Length header")]
    MissingContentLength,

    /// A header line could not be parsed.
    #[error("invalid header: {line}")]
    InvalidHeader {
        /// The offending line, trimmed.
        line: String,
    },
}

/// Errors arising from talking to a plugin.
#[derive(Debug, Clone, Error)]
pub enum EndpointError {
    /// The peer sent something the protocol does not allow, including a
    /// frame whose headers cannot be parsed.
    #[error("protocol violation from '{plugin}': {message}")]
    Protocol {
        /// Endpoint name.
        plugin: String,
        /// Description of the violation.
        message: String,
    },

    /// The connection closed while calls were outstanding.
    #[error("plugin '{plugin}' exited or closed its stream: {message}")]
    ProcessCrashed {
        /// Endpoint name.
        plugin: String,
        /// What was observed.
        message: String,
    },

    /// The caller's cancellation token fired first.
    #[error("operation cancelled")]
    Cancelled,

    /// The peer answered with a JSON-RPC error object.
    #[error("plugin '{plugin}' returned error {code}: {message}")]
    RemoteError {
        /// Endpoint name.
        plugin: String,
        /// JSON-RPC error code.
        code: i64,
        /// Error message from the peer.
        message: String,
    },

    /// A payload could not be encoded or decoded.
    #[error("JSON codec error: {0}")]
    Codec(#[source] Arc<serde_json::Error>),
}

impl EndpointError {
    /// Builds a [`EndpointError::RemoteError`] from an error object.
    #[must_use]
    pub fn remote(plugin: &str, error: JsonRpcError) -> Self {
        Self::RemoteError {
            plugin: plugin.to_owned(),
            code: error.code(),
            message: error.message().to_owned(),
        }
    }

    pub(crate) fn protocol(plugin: &str, message: impl Into<String>) -> Self {
        Self::Protocol {
            plugin: plugin.to_owned(),
            message: message.into(),
        }
    }

    pub(crate) fn crashed(plugin: &str, message: impl Into<String>) -> Self {
        Self::ProcessCrashed {
            plugin: plugin.to_owned(),
            message: message.into(),
        }
    }

    /// Returns `true` for [`EndpointError::Cancelled`].
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<serde_json::Error> for EndpointError {
    fn from(error: serde_json::Error) -> Self {
        Self::Codec(Arc::new(error))
    }
}

/// Errors surfaced to plugin implementations by the plugin-side SDK.
#[derive(Debug, Clone, Error)]
pub enum PluginSdkError {
    /// The host rejected a request.
    #[error("host rejected {method}: {message} (code {code})")]
    Host {
        /// Method that was called.
        method: String,
        /// JSON-RPC error code.
        code: i64,
        /// Error message from the host.
        message: String,
    },

    /// The connection to the host failed.
    #[error(transparent)]
    Connection(#[from] EndpointError),

    /// The invocation was cancelled by the host.
    #[error("invocation cancelled")]
    Cancelled,

    /// The plugin itself failed.
    #[error("{message}")]
    Failed {
        /// Description of the failure.
        message: String,
    },
}

impl PluginSdkError {
    /// Creates a plugin failure with a message.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    /// Returns the JSON-RPC code of a host rejection.
    #[must_use]
    pub const fn code(&self) -> Option<i64> {
        match self {
            Self::Host { code, .. } => Some(*code),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests;
