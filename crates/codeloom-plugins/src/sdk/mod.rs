//! Plugin-side counterpart of [`PluginEndpoint`](crate::PluginEndpoint).
//!
//! A plugin executable registers one or more [`Plugin`] implementations on a
//! [`PluginServer`] and serves them over stdio:
//!
//! ```no_run
//! use async_trait::async_trait;
//! use codeloom_message::Channel;
//! use codeloom_plugins::{Plugin, PluginContext, PluginSdkError, PluginServer};
//!
//! struct Hello;
//!
//! #[async_trait]
//! impl Plugin for Hello {
//!     async fn process(&self, context: PluginContext) -> Result<bool, PluginSdkError> {
//!         context.write_file("hello.txt", "hello").await?;
//!         context.message(Channel::Information, "said hello").await?;
//!         Ok(true)
//!     }
//! }
//!
//! # async fn run() {
//! PluginServer::new().register("hello", Hello).serve_stdio().await;
//! # }
//! ```

mod context;

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{Value, json};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub use self::context::{InputFile, OutputFile, PluginContext};
use crate::connection::{Dispatch, RequestHandler, RpcConnection};
use crate::error::PluginSdkError;
use crate::jsonrpc::{
    INTERNAL_ERROR, INVALID_PARAMS, JsonRpcError, METHOD_NOT_FOUND, REQUEST_CANCELLED,
};
use crate::protocol::{
    CANCEL_REQUEST, CancelParams, GET_PLUGIN_NAMES, PROCESS, ProcessParams, SHUTDOWN,
};

const SDK_TARGET: &str = "codeloom_plugins::sdk";

/// A code generation step hosted in a plugin process.
#[async_trait]
pub trait Plugin: Send + Sync + 'static {
    /// Runs one invocation. Returns the success flag reported to the host.
    ///
    /// # Errors
    ///
    /// An error is reported to the host as a failed call rather than a
    /// `false` result.
    async fn process(&self, context: PluginContext) -> Result<bool, PluginSdkError>;
}

type Registered = Vec<(String, Arc<dyn Plugin>)>;

/// Serves registered plugins to a host.
#[derive(Default)]
pub struct PluginServer {
    plugins: Registered,
}

impl std::fmt::Debug for PluginServer {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("PluginServer")
            .field("plugins", &self.names())
            .finish()
    }
}

impl PluginServer {
    /// Creates a server with no plugins.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `plugin` under `name`. A later registration of the same
    /// name replaces the earlier one in place.
    #[must_use]
    pub fn register(mut self, name: impl Into<String>, plugin: impl Plugin) -> Self {
        let plugin_name = name.into();
        let shared: Arc<dyn Plugin> = Arc::new(plugin);
        if let Some(slot) = self
            .plugins
            .iter_mut()
            .find(|(existing, _)| *existing == plugin_name)
        {
            slot.1 = shared;
        } else {
            self.plugins.push((plugin_name, shared));
        }
        self
    }

    /// Returns the registered names in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.plugins.iter().map(|(name, _)| name.clone()).collect()
    }

    /// Serves requests until the host sends `Shutdown` or closes the stream.
    ///
    /// Invocations still running when serving stops are cancelled.
    pub async fn serve<R, W>(self, reader: R, writer: W)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let shutdown = CancellationToken::new();
        let handler = Arc::new(ServerHandler {
            plugins: self.plugins,
            running: Arc::new(DashMap::new()),
            shutdown: shutdown.clone(),
        });
        let connection = RpcConnection::start("host", reader, writer, handler);
        info!(target: SDK_TARGET, "plugin server ready");

        tokio::select! {
            () = shutdown.cancelled() => {
                debug!(target: SDK_TARGET, "shutdown requested");
            }
            () = connection.closed() => {
                debug!(target: SDK_TARGET, "host closed the stream");
            }
        }
        shutdown.cancel();
        connection.close_writer();
    }

    /// Serves requests over the process's stdin and stdout.
    pub async fn serve_stdio(self) {
        self.serve(tokio::io::stdin(), tokio::io::stdout()).await;
    }
}

struct ServerHandler {
    plugins: Registered,
    running: Arc<DashMap<i64, CancellationToken>>,
    shutdown: CancellationToken,
}

impl ServerHandler {
    fn start_process(&self, connection: &RpcConnection, id: i64, params: Value) -> Dispatch {
        let request: ProcessParams = match serde_json::from_value(params) {
            Ok(request) => request,
            Err(error) => {
                return Dispatch::Inline(Err(JsonRpcError::new(INVALID_PARAMS, error.to_string())));
            }
        };
        let Some(plugin) = self
            .plugins
            .iter()
            .find(|(name, _)| *name == request.plugin_name)
            .map(|(_, plugin)| Arc::clone(plugin))
        else {
            return Dispatch::Inline(Err(JsonRpcError::new(
                INVALID_PARAMS,
                format!("no plugin named '{}'", request.plugin_name),
            )));
        };

        let token = self.shutdown.child_token();
        self.running.insert(id, token.clone());
        let running = Arc::clone(&self.running);
        debug!(
            target: SDK_TARGET,
            plugin = %request.plugin_name,
            session = %request.session_id,
            id,
            "starting invocation"
        );
        let context = PluginContext::new(
            connection.clone(),
            request.session_id,
            request.plugin_name,
            token.clone(),
        );
        Dispatch::Spawn(Box::pin(async move {
            let outcome = tokio::select! {
                biased;
                () = token.cancelled() => Err(PluginSdkError::Cancelled),
                outcome = plugin.process(context) => outcome,
            };
            running.remove(&id);
            match outcome {
                Ok(success) => Ok(Value::Bool(success)),
                Err(PluginSdkError::Cancelled) => Err(JsonRpcError::new(
                    REQUEST_CANCELLED,
                    "invocation cancelled",
                )),
                Err(error) => Err(JsonRpcError::new(INTERNAL_ERROR, error.to_string())),
            }
        }))
    }

    fn cancel(&self, params: Value) {
        match serde_json::from_value::<CancelParams>(params) {
            Ok(CancelParams { id }) => {
                if let Some(entry) = self.running.get(&id) {
                    debug!(target: SDK_TARGET, id, "host cancelled invocation");
                    entry.value().cancel();
                }
            }
            Err(error) => {
                debug!(target: SDK_TARGET, %error, "ignoring malformed cancellation");
            }
        }
    }
}

impl RequestHandler for ServerHandler {
    fn handle_request(
        &self,
        connection: &RpcConnection,
        id: i64,
        method: &str,
        params: Value,
    ) -> Dispatch {
        match method {
            GET_PLUGIN_NAMES => {
                let names: Vec<&str> = self.plugins.iter().map(|(name, _)| name.as_str()).collect();
                Dispatch::Inline(Ok(json!(names)))
            }
            PROCESS => self.start_process(connection, id, params),
            other => Dispatch::Inline(Err(JsonRpcError::new(
                METHOD_NOT_FOUND,
                format!("unknown method '{other}'"),
            ))),
        }
    }

    fn handle_notification(&self, _connection: &RpcConnection, method: &str, params: Value) {
        match method {
            CANCEL_REQUEST => self.cancel(params),
            SHUTDOWN => self.shutdown.cancel(),
            other => debug!(target: SDK_TARGET, method = other, "ignoring notification"),
        }
    }
}
