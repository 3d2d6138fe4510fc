//! The capability a plugin receives for one invocation.

use bytes::Bytes;
use codeloom_message::{Channel, Message};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use crate::connection::RpcConnection;
use crate::error::{EndpointError, PluginSdkError};
use crate::protocol::{
    GET_VALUE, GetValueParams, LIST_INPUTS, MESSAGE, MessageParams, READ_FILE, ReadFileParams,
    ReadFileResult, WRITE_FILE, WriteFileParams, WriteFileResult, decode_content, encode_content,
};

/// An input read from the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputFile {
    uri: String,
    content: Bytes,
    description: String,
    media_kind: Option<String>,
}

impl InputFile {
    /// Returns the identifier the file was read under.
    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Returns the raw content.
    #[must_use]
    pub const fn content(&self) -> &Bytes {
        &self.content
    }

    /// Returns the content as text when it is valid UTF-8.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.content).ok()
    }

    /// Returns the host's description of the input.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Returns the declared media kind, if any.
    #[must_use]
    pub fn media_kind(&self) -> Option<&str> {
        self.media_kind.as_deref()
    }
}

/// An artifact to hand to the host.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputFile {
    filename: String,
    content: Bytes,
    description: Option<String>,
    media_kind: Option<String>,
    source_uri: Option<String>,
    source_map: Option<Value>,
}

impl OutputFile {
    /// Creates an output with the given key and content.
    #[must_use]
    pub fn new(filename: impl Into<String>, content: impl Into<Bytes>) -> Self {
        Self {
            filename: filename.into(),
            content: content.into(),
            description: None,
            media_kind: None,
            source_uri: None,
            source_map: None,
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the media kind.
    #[must_use]
    pub fn with_media_kind(mut self, kind: impl Into<String>) -> Self {
        self.media_kind = Some(kind.into());
        self
    }

    /// Records the input the output was derived from.
    #[must_use]
    pub fn with_source_uri(mut self, uri: impl Into<String>) -> Self {
        self.source_uri = Some(uri.into());
        self
    }

    /// Attaches a source map.
    #[must_use]
    pub fn with_source_map(mut self, map: Value) -> Self {
        self.source_map = Some(map);
        self
    }
}

/// Host access for one `Process` call.
///
/// Every request is scoped to the call's session. Requests fail with
/// [`PluginSdkError::Cancelled`] once the host cancels the call.
#[derive(Debug, Clone)]
pub struct PluginContext {
    connection: RpcConnection,
    session_id: String,
    plugin_name: String,
    token: CancellationToken,
}

impl PluginContext {
    pub(crate) const fn new(
        connection: RpcConnection,
        session_id: String,
        plugin_name: String,
        token: CancellationToken,
    ) -> Self {
        Self {
            connection,
            session_id,
            plugin_name,
            token,
        }
    }

    /// Returns the session id the host assigned.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Returns the plugin name the host invoked.
    #[must_use]
    pub fn plugin_name(&self) -> &str {
        &self.plugin_name
    }

    /// Returns a token that fires when the host cancels the call.
    #[must_use]
    pub const fn cancellation(&self) -> &CancellationToken {
        &self.token
    }

    /// Reads a configuration value. Dots in `key` address nested values.
    ///
    /// # Errors
    ///
    /// Returns the host's rejection or a connection failure.
    pub async fn get_value(&self, key: &str) -> Result<Option<Value>, PluginSdkError> {
        let value = self
            .request(
                GET_VALUE,
                &GetValueParams {
                    session_id: self.session_id.clone(),
                    key: key.to_owned(),
                },
            )
            .await?;
        Ok(Some(value).filter(|found| !found.is_null()))
    }

    /// Reads a configuration value and decodes it.
    ///
    /// # Errors
    ///
    /// As [`Self::get_value`], plus [`PluginSdkError::Failed`] when the value
    /// has the wrong shape.
    pub async fn get_typed<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<T>, PluginSdkError> {
        let Some(value) = self.get_value(key).await? else {
            return Ok(None);
        };
        serde_json::from_value(value)
            .map(Some)
            .map_err(|error| PluginSdkError::failed(format!("config key '{key}': {error}")))
    }

    /// Lists the inputs on offer.
    ///
    /// # Errors
    ///
    /// Returns the host's rejection or a connection failure.
    pub async fn list_inputs(&self) -> Result<Vec<String>, PluginSdkError> {
        let value = self
            .request(LIST_INPUTS, &json!({"sessionId": self.session_id}))
            .await?;
        decode_reply(LIST_INPUTS, value)
    }

    /// Reads one input.
    ///
    /// # Errors
    ///
    /// Returns [`PluginSdkError::Host`] with code `-32001` when no source can
    /// resolve `uri` and `-32002` when reading it failed.
    pub async fn read_file(&self, uri: &str) -> Result<InputFile, PluginSdkError> {
        let value = self
            .request(
                READ_FILE,
                &ReadFileParams {
                    session_id: self.session_id.clone(),
                    uri: uri.to_owned(),
                },
            )
            .await?;
        let result: ReadFileResult = decode_reply(READ_FILE, value)?;
        let content = decode_content(result.content, result.encoding)
            .map_err(|problem| PluginSdkError::failed(format!("undecodable input: {problem}")))?;
        Ok(InputFile {
            uri: uri.to_owned(),
            content,
            description: result.description,
            media_kind: result.media_kind,
        })
    }

    /// Writes an output under `filename`. Returns the URI the host assigned.
    ///
    /// # Errors
    ///
    /// Returns the host's rejection or a connection failure.
    pub async fn write_file(
        &self,
        filename: &str,
        content: impl Into<Bytes>,
    ) -> Result<String, PluginSdkError> {
        self.write_output(OutputFile::new(filename, content)).await
    }

    /// Writes a fully described output. Returns the URI the host assigned.
    ///
    /// # Errors
    ///
    /// Returns the host's rejection or a connection failure.
    pub async fn write_output(&self, file: OutputFile) -> Result<String, PluginSdkError> {
        let (content, encoding) = encode_content(&file.content);
        let value = self
            .request(
                WRITE_FILE,
                &WriteFileParams {
                    session_id: self.session_id.clone(),
                    filename: file.filename,
                    content,
                    encoding,
                    description: file.description,
                    media_kind: file.media_kind,
                    source_uri: file.source_uri,
                    source_map: file.source_map,
                },
            )
            .await?;
        let result: WriteFileResult = decode_reply(WRITE_FILE, value)?;
        Ok(result.uri)
    }

    /// Emits a diagnostic.
    ///
    /// # Errors
    ///
    /// Returns the host's rejection or a connection failure.
    pub async fn message(
        &self,
        channel: Channel,
        text: impl Into<String>,
    ) -> Result<(), PluginSdkError> {
        self.send_message(&Message::new(channel, text)).await
    }

    /// Emits a diagnostic carrying details and keys.
    ///
    /// # Errors
    ///
    /// Returns the host's rejection or a connection failure.
    pub async fn send_message(&self, message: &Message) -> Result<(), PluginSdkError> {
        self.request(
            MESSAGE,
            &MessageParams {
                session_id: self.session_id.clone(),
                channel: message.channel(),
                text: message.text().to_owned(),
                details: message.details().cloned(),
                keys: message.keys().to_vec(),
            },
        )
        .await?;
        Ok(())
    }

    async fn request(
        &self,
        method: &str,
        params: &impl serde::Serialize,
    ) -> Result<Value, PluginSdkError> {
        if self.token.is_cancelled() {
            return Err(PluginSdkError::Cancelled);
        }
        let encoded = serde_json::to_value(params).map_err(EndpointError::from)?;
        let call = self.connection.start_call(method, encoded)?;
        tokio::select! {
            biased;
            () = self.token.cancelled() => Err(PluginSdkError::Cancelled),
            outcome = call.wait() => outcome.map_err(|error| match error {
                EndpointError::RemoteError { code, message, .. } => PluginSdkError::Host {
                    method: method.to_owned(),
                    code,
                    message,
                },
                other => PluginSdkError::Connection(other),
            }),
        }
    }
}

fn decode_reply<T: DeserializeOwned>(method: &str, value: Value) -> Result<T, PluginSdkError> {
    serde_json::from_value(value).map_err(|error| {
        PluginSdkError::failed(format!("malformed {method} reply from host: {error}"))
    })
}
