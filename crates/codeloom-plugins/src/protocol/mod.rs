//! Method names and parameter shapes exchanged between host and plugin.
//!
//! Field names are camelCase on the wire. Every plugin-to-host request is
//! scoped by the `sessionId` the host handed out with `Process`.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use codeloom_message::Channel;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Host to plugin: list the plugin names the process serves.
pub const GET_PLUGIN_NAMES: &str = "GetPluginNames";
/// Host to plugin: run one invocation.
pub const PROCESS: &str = "Process";
/// Host to plugin notification: abandon a request.
pub const CANCEL_REQUEST: &str = "$/cancelRequest";
/// Host to plugin notification: exit.
pub const SHUTDOWN: &str = "Shutdown";
/// Plugin to host: read a configuration value.
pub const GET_VALUE: &str = "GetValue";
/// Plugin to host: list input identifiers.
pub const LIST_INPUTS: &str = "ListInputs";
/// Plugin to host: read one input.
pub const READ_FILE: &str = "ReadFile";
/// Plugin to host: emit one output artifact.
pub const WRITE_FILE: &str = "WriteFile";
/// Plugin to host: emit a diagnostic.
pub const MESSAGE: &str = "Message";

/// How artifact content is carried in a JSON string.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentEncoding {
    /// The string is the content itself.
    #[default]
    Utf8,
    /// The string is standard base64 of the content.
    Base64,
}

/// Encodes bytes as UTF-8 text when valid, otherwise as base64.
#[must_use]
pub fn encode_content(content: &[u8]) -> (String, ContentEncoding) {
    match std::str::from_utf8(content) {
        Ok(text) => (text.to_owned(), ContentEncoding::Utf8),
        Err(_) => (STANDARD.encode(content), ContentEncoding::Base64),
    }
}

/// Decodes content produced by [`encode_content`].
///
/// # Errors
///
/// Returns the base64 decoder's message for malformed input.
pub fn decode_content(content: String, encoding: ContentEncoding) -> Result<Bytes, String> {
    match encoding {
        ContentEncoding::Utf8 => Ok(Bytes::from(content)),
        ContentEncoding::Base64 => STANDARD
            .decode(content.as_bytes())
            .map(Bytes::from)
            .map_err(|error| error.to_string()),
    }
}

/// Params of [`PROCESS`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessParams {
    /// Plugin to run.
    pub plugin_name: String,
    /// Session scoping the plugin's callbacks.
    pub session_id: String,
}

/// Params of [`CANCEL_REQUEST`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelParams {
    /// Id of the request to abandon.
    pub id: i64,
}

/// Params carrying only a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionParams {
    /// Session the request belongs to.
    pub session_id: String,
}

/// Params of [`GET_VALUE`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetValueParams {
    /// Session the request belongs to.
    pub session_id: String,
    /// Configuration key; dots address nested values.
    pub key: String,
}

/// Params of [`READ_FILE`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadFileParams {
    /// Session the request belongs to.
    pub session_id: String,
    /// Input identifier from `ListInputs`.
    pub uri: String,
}

/// Result of [`READ_FILE`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadFileResult {
    /// Encoded content.
    pub content: String,
    /// Encoding of `content`.
    #[serde(default)]
    pub encoding: ContentEncoding,
    /// Human-readable description of the input.
    pub description: String,
    /// Declared media kind, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_kind: Option<String>,
}

/// Params of [`WRITE_FILE`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteFileParams {
    /// Session the request belongs to.
    pub session_id: String,
    /// Output key chosen by the plugin.
    pub filename: String,
    /// Encoded content.
    pub content: String,
    /// Encoding of `content`.
    #[serde(default)]
    pub encoding: ContentEncoding,
    /// Description; defaults to the filename.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Declared media kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_kind: Option<String>,
    /// URI of the input the artifact was derived from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_uri: Option<String>,
    /// Source map relating the output to its inputs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_map: Option<Value>,
}

/// Result of [`WRITE_FILE`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteFileResult {
    /// URI of the handle the host allocated.
    pub uri: String,
}

/// Params of [`MESSAGE`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageParams {
    /// Session the request belongs to.
    pub session_id: String,
    /// Severity.
    pub channel: Channel,
    /// Message text.
    pub text: String,
    /// Structured details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    /// Keys (such as JSON paths) the message refers to.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keys: Vec<String>,
}
