//! Host-side session with one plugin process.
//!
//! A [`PluginEndpoint`] issues `GetPluginNames` and `Process` requests and
//! answers the plugin's callbacks. Each `Process` call opens a session keyed
//! by a fresh id; the plugin quotes that id on every callback. When the call
//! settles the session is closed under its gate lock, so no output or message
//! callback can run after the caller has seen the result.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use codeloom_datastore::{Artifact, DataHandle, DataStoreError, InputScope, Sink};
use codeloom_extension::PluginProcess;
use codeloom_message::Message;
use dashmap::DashMap;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::connection::{Dispatch, RequestHandler, RpcConnection};
use crate::error::EndpointError;
use crate::jsonrpc::{
    INTERNAL_ERROR, INVALID_PARAMS, JsonRpcError, METHOD_NOT_FOUND, REQUEST_CANCELLED, Reply,
    SOURCE_READ_ERROR, SOURCE_UNAVAILABLE,
};
use crate::protocol::{
    CANCEL_REQUEST, GET_PLUGIN_NAMES, GET_VALUE, GetValueParams, LIST_INPUTS,
    MESSAGE, MessageParams, PROCESS, ProcessParams, READ_FILE, ReadFileParams, ReadFileResult,
    SHUTDOWN, SessionParams, WRITE_FILE, WriteFileParams, WriteFileResult, decode_content,
    encode_content,
};

const ENDPOINT_TARGET: &str = "codeloom_plugins::endpoint";

/// How long `shutdown` waits for a plugin to exit on its own.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Read access to configuration values for a plugin invocation.
#[cfg_attr(test, mockall::automock)]
pub trait ConfigProvider: Send + Sync {
    /// Looks up `key`, where dots address nested values.
    fn get(&self, key: &str) -> Option<Value>;
}

/// Callback receiving each artifact a plugin writes.
pub type FileCallback = Arc<dyn Fn(DataHandle) + Send + Sync>;

/// Callback receiving each message a plugin emits.
pub type MessageCallback = Arc<dyn Fn(Message) + Send + Sync>;

/// Everything one `Process` call may touch.
pub struct ProcessInvocation {
    plugin_name: String,
    config: Arc<dyn ConfigProvider>,
    input: Arc<dyn InputScope>,
    output: Sink,
    on_file: FileCallback,
    on_message: MessageCallback,
}

impl ProcessInvocation {
    /// Creates an invocation with no-op callbacks.
    #[must_use]
    pub fn new(
        plugin_name: impl Into<String>,
        config: Arc<dyn ConfigProvider>,
        input: Arc<dyn InputScope>,
        output: Sink,
    ) -> Self {
        Self {
            plugin_name: plugin_name.into(),
            config,
            input,
            output,
            on_file: Arc::new(|_| {}),
            on_message: Arc::new(|_| {}),
        }
    }

    /// Sets the callback fired after each artifact is stored.
    #[must_use]
    pub fn with_on_file(mut self, callback: impl Fn(DataHandle) + Send + Sync + 'static) -> Self {
        self.on_file = Arc::new(callback);
        self
    }

    /// Sets the callback fired for each message.
    #[must_use]
    pub fn with_on_message(mut self, callback: impl Fn(Message) + Send + Sync + 'static) -> Self {
        self.on_message = Arc::new(callback);
        self
    }

    /// Returns the plugin to run.
    #[must_use]
    pub fn plugin_name(&self) -> &str {
        &self.plugin_name
    }
}

impl std::fmt::Debug for ProcessInvocation {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ProcessInvocation")
            .field("plugin_name", &self.plugin_name)
            .field("output", &self.output.name())
            .finish_non_exhaustive()
    }
}

struct Session {
    invocation: ProcessInvocation,
    open: Mutex<bool>,
    /// Fires when the invocation settles; in-flight lookups stop on it.
    closed: CancellationToken,
}

impl Session {
    fn new(invocation: ProcessInvocation) -> Self {
        Self {
            invocation,
            open: Mutex::new(true),
            closed: CancellationToken::new(),
        }
    }

    fn gate(&self) -> MutexGuard<'_, bool> {
        self.open.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn close(&self) {
        *self.gate() = false;
        self.closed.cancel();
    }

    /// Runs `work` unless the session closes first.
    async fn while_open<F>(&self, session_id: &str, work: F) -> Reply
    where
        F: Future<Output = Reply>,
    {
        tokio::select! {
            biased;
            () = self.closed.cancelled() => Err(closed_session(session_id)),
            reply = work => reply,
        }
    }
}

type Sessions = Arc<DashMap<String, Arc<Session>>>;

/// A protocol session with one plugin process.
pub struct PluginEndpoint {
    name: String,
    connection: RpcConnection,
    sessions: Sessions,
    process: Option<tokio::sync::Mutex<PluginProcess>>,
}

impl std::fmt::Debug for PluginEndpoint {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("PluginEndpoint")
            .field("name", &self.name)
            .field("sessions", &self.sessions.len())
            .field("connection", &self.connection)
            .finish_non_exhaustive()
    }
}

impl PluginEndpoint {
    /// Wraps a spawned plugin process, speaking over its stdin and stdout.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::Protocol`] if the process's standard streams
    /// were already taken.
    pub fn from_process(
        name: impl Into<String>,
        mut process: PluginProcess,
    ) -> Result<Self, EndpointError> {
        let Some((stdout, stdin)) = process.take_stdio() else {
            return Err(EndpointError::protocol(
                process.name(),
                "process stdio already taken",
            ));
        };
        let mut endpoint = Self::from_streams(name, stdout, stdin);
        endpoint.process = Some(tokio::sync::Mutex::new(process));
        Ok(endpoint)
    }

    /// Speaks to a plugin over an arbitrary stream pair.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn from_streams<R, W>(name: impl Into<String>, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let endpoint_name = name.into();
        let sessions: Sessions = Arc::new(DashMap::new());
        let handler = Arc::new(HostHandler {
            sessions: Arc::clone(&sessions),
        });
        let connection = RpcConnection::start(endpoint_name.clone(), reader, writer, handler);
        Self {
            name: endpoint_name,
            connection,
            sessions,
            process: None,
        }
    }

    /// Returns the endpoint name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Asks the plugin process which plugin names it serves.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::Cancelled`] if `token` fires first,
    /// [`EndpointError::Protocol`] for a reply that is not a list of strings,
    /// and the connection's errors otherwise.
    pub async fn get_plugin_names(
        &self,
        token: &CancellationToken,
    ) -> Result<Vec<String>, EndpointError> {
        let call = self.connection.start_call(GET_PLUGIN_NAMES, Value::Null)?;
        let reply = tokio::select! {
            biased;
            () = token.cancelled() => return Err(EndpointError::Cancelled),
            outcome = call.wait() => outcome?,
        };
        serde_json::from_value(reply).map_err(|error| {
            EndpointError::protocol(&self.name, format!("malformed plugin name list: {error}"))
        })
    }

    /// Runs one plugin invocation.
    ///
    /// Every output and message callback for this call has run by the time
    /// this returns. Returns the plugin's success flag.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::Cancelled`] if `token` fires first (the
    /// plugin is sent `$/cancelRequest`), [`EndpointError::Protocol`] for a
    /// non-boolean result, and [`EndpointError::ProcessCrashed`] when the
    /// stream closes mid-call.
    pub async fn process(
        &self,
        invocation: ProcessInvocation,
        token: &CancellationToken,
    ) -> Result<bool, EndpointError> {
        let session_id = Uuid::new_v4().to_string();
        let plugin_name = invocation.plugin_name.clone();
        let session = Arc::new(Session::new(invocation));
        self.sessions.insert(session_id.clone(), Arc::clone(&session));
        info!(
            target: ENDPOINT_TARGET,
            endpoint = %self.name,
            plugin = %plugin_name,
            session = %session_id,
            "invoking plugin"
        );

        let outcome = self.run_session(&plugin_name, &session_id, token).await;

        session.close();
        self.sessions.remove(&session_id);
        match &outcome {
            Ok(success) => info!(
                target: ENDPOINT_TARGET,
                plugin = %plugin_name,
                session = %session_id,
                success,
                "plugin finished"
            ),
            Err(error) => warn!(
                target: ENDPOINT_TARGET,
                plugin = %plugin_name,
                session = %session_id,
                %error,
                "plugin invocation failed"
            ),
        }
        outcome
    }

    async fn run_session(
        &self,
        plugin_name: &str,
        session_id: &str,
        token: &CancellationToken,
    ) -> Result<bool, EndpointError> {
        let params = serde_json::to_value(ProcessParams {
            plugin_name: plugin_name.to_owned(),
            session_id: session_id.to_owned(),
        })?;
        let call = self.connection.start_call(PROCESS, params)?;
        let id = call.id();
        let reply = tokio::select! {
            biased;
            () = token.cancelled() => {
                self.send_cancel(id);
                return Err(EndpointError::Cancelled);
            }
            outcome = call.wait() => outcome?,
        };
        reply.as_bool().ok_or_else(|| {
            EndpointError::protocol(
                &self.name,
                format!("Process returned {reply} instead of a boolean"),
            )
        })
    }

    fn send_cancel(&self, id: i64) {
        let params = json!({"id": id});
        if let Err(error) = self.connection.notify(CANCEL_REQUEST, params) {
            debug!(
                target: ENDPOINT_TARGET,
                endpoint = %self.name,
                id,
                %error,
                "could not deliver cancellation"
            );
        }
    }

    /// Returns `false` once the stream has closed or the process has exited.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        if self.connection.is_closed() {
            return false;
        }
        self.process.as_ref().is_none_or(|process| {
            process
                .try_lock()
                .map_or(true, |mut running| running.is_alive())
        })
    }

    /// Asks the plugin to exit, then kills it after a grace period.
    pub async fn shutdown(&self) {
        if let Err(error) = self.connection.notify(SHUTDOWN, Value::Null) {
            debug!(target: ENDPOINT_TARGET, endpoint = %self.name, %error, "shutdown not delivered");
        }
        self.connection.close_writer();
        let exited = tokio::time::timeout(SHUTDOWN_GRACE, self.connection.closed())
            .await
            .is_ok();

        let Some(process) = &self.process else {
            return;
        };
        let mut running = process.lock().await;
        if exited && !running.is_alive() {
            debug!(target: ENDPOINT_TARGET, endpoint = %self.name, "plugin exited");
            return;
        }
        warn!(
            target: ENDPOINT_TARGET,
            endpoint = %self.name,
            "plugin did not exit gracefully, killing"
        );
        if let Err(error) = running.kill().await {
            debug!(target: ENDPOINT_TARGET, endpoint = %self.name, %error, "kill failed");
        }
    }
}

struct HostHandler {
    sessions: Sessions,
}

impl HostHandler {
    fn open<T: DeserializeOwned>(&self, params: Value) -> Result<(Arc<Session>, T), JsonRpcError> {
        let session_id = SessionParams::deserialize(&params)
            .map_err(|error| invalid_params(&error))?
            .session_id;
        let session = self
            .sessions
            .get(&session_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| closed_session(&session_id))?;
        let request = T::deserialize(params).map_err(|error| invalid_params(&error))?;
        Ok((session, request))
    }

    fn write_file(&self, params: Value) -> Reply {
        let (session, request) = self.open::<WriteFileParams>(params)?;
        let content = decode_content(request.content, request.encoding).map_err(|problem| {
            JsonRpcError::new(INVALID_PARAMS, format!("undecodable content: {problem}"))
        })?;

        let gate = session.gate();
        if !*gate {
            return Err(closed_session(&request.session_id));
        }
        let output = &session.invocation.output;
        let description = request
            .description
            .unwrap_or_else(|| request.filename.clone());
        let mut artifact =
            Artifact::new(request.filename.clone(), content).with_description(description);
        if let Some(kind) = request.media_kind {
            artifact = artifact.with_media_kind(kind);
        }
        if let Some(uri) = request.source_uri {
            artifact = artifact.with_source_uri(uri);
        }
        let handle = output
            .write_artifact(artifact)
            .map_err(|error| store_error(&error))?;

        if let Some(map) = request.source_map {
            let encoded = serde_json::to_vec(&map).map_err(|error| internal_error(&error))?;
            output
                .write_artifact(
                    Artifact::new(format!("{}.map", request.filename), encoded)
                        .with_description(format!("source map for {}", request.filename))
                        .with_media_kind("application/json")
                        .with_source_uri(handle.uri()),
                )
                .map_err(|error| store_error(&error))?;
        }

        debug!(
            target: ENDPOINT_TARGET,
            plugin = %session.invocation.plugin_name,
            session = %request.session_id,
            uri = handle.uri(),
            "plugin wrote artifact"
        );
        let uri = handle.uri().to_owned();
        (session.invocation.on_file)(handle);
        drop(gate);
        serde_json::to_value(WriteFileResult { uri }).map_err(|error| internal_error(&error))
    }

    fn message(&self, params: Value) -> Reply {
        let (session, request) = self.open::<MessageParams>(params)?;
        let gate = session.gate();
        if !*gate {
            return Err(closed_session(&request.session_id));
        }
        let mut message = Message::new(request.channel, request.text)
            .with_plugin(session.invocation.plugin_name.clone())
            .with_keys(request.keys);
        if let Some(details) = request.details {
            message = message.with_details(details);
        }
        (session.invocation.on_message)(message);
        drop(gate);
        Ok(Value::Null)
    }

    fn get_value(&self, params: Value) -> Dispatch {
        let (session, request) = match self.open::<GetValueParams>(params) {
            Ok(opened) => opened,
            Err(error) => return Dispatch::Inline(Err(error)),
        };
        Dispatch::Spawn(Box::pin(async move {
            session
                .while_open(&request.session_id, async {
                    Ok(session
                        .invocation
                        .config
                        .get(&request.key)
                        .unwrap_or(Value::Null))
                })
                .await
        }))
    }

    fn list_inputs(&self, params: Value) -> Dispatch {
        let (session, request) = match self.open::<SessionParams>(params) {
            Ok(opened) => opened,
            Err(error) => return Dispatch::Inline(Err(error)),
        };
        Dispatch::Spawn(Box::pin(async move {
            session
                .while_open(&request.session_id, async {
                    let uris = session
                        .invocation
                        .input
                        .enumerate()
                        .await
                        .map_err(|error| store_error(&error))?;
                    Ok(json!(uris))
                })
                .await
        }))
    }

    fn read_file(&self, params: Value) -> Dispatch {
        let (session, request) = match self.open::<ReadFileParams>(params) {
            Ok(opened) => opened,
            Err(error) => return Dispatch::Inline(Err(error)),
        };
        Dispatch::Spawn(Box::pin(async move {
            session
                .while_open(&request.session_id, async {
                    let handle = session
                        .invocation
                        .input
                        .read(&request.uri)
                        .await
                        .map_err(|error| store_error(&error))?;
                    let (content, encoding) = encode_content(handle.content());
                    serde_json::to_value(ReadFileResult {
                        content,
                        encoding,
                        description: handle.description().to_owned(),
                        media_kind: handle.media_kind().map(str::to_owned),
                    })
                    .map_err(|error| internal_error(&error))
                })
                .await
        }))
    }
}

impl RequestHandler for HostHandler {
    fn handle_request(
        &self,
        _connection: &RpcConnection,
        _id: i64,
        method: &str,
        params: Value,
    ) -> Dispatch {
        match method {
            WRITE_FILE => Dispatch::Inline(self.write_file(params)),
            MESSAGE => Dispatch::Inline(self.message(params)),
            GET_VALUE => self.get_value(params),
            LIST_INPUTS => self.list_inputs(params),
            READ_FILE => self.read_file(params),
            other => Dispatch::Inline(Err(JsonRpcError::new(
                METHOD_NOT_FOUND,
                format!("unknown method '{other}'"),
            ))),
        }
    }

    fn handle_notification(&self, connection: &RpcConnection, method: &str, _params: Value) {
        debug!(
            target: ENDPOINT_TARGET,
            endpoint = connection.name(),
            method,
            "ignoring notification from plugin"
        );
    }
}

fn invalid_params(error: &serde_json::Error) -> JsonRpcError {
    JsonRpcError::new(INVALID_PARAMS, error.to_string())
}

fn internal_error(error: &serde_json::Error) -> JsonRpcError {
    JsonRpcError::new(INTERNAL_ERROR, error.to_string())
}

fn closed_session(session_id: &str) -> JsonRpcError {
    JsonRpcError::new(
        REQUEST_CANCELLED,
        format!("session '{session_id}' is closed or unknown"),
    )
}

fn store_error(error: &DataStoreError) -> JsonRpcError {
    let code = match error {
        DataStoreError::Cancelled => REQUEST_CANCELLED,
        DataStoreError::SourceUnavailable { .. } => SOURCE_UNAVAILABLE,
        DataStoreError::SourceReadError { .. } => SOURCE_READ_ERROR,
    };
    JsonRpcError::new(code, error.to_string())
}

#[cfg(test)]
mod tests;
