//! Bidirectional JSON-RPC connection over a framed byte stream.
//!
//! A connection owns two background tasks. The writer task drains an
//! unbounded queue so concurrent callers never interleave frames. The reader
//! task routes responses to pending calls and hands requests and
//! notifications to a [`RequestHandler`].
//!
//! The reader only holds a weak reference to the connection. Once every
//! [`RpcConnection`] clone is dropped the writer closes its half of the
//! stream, which lets the peer observe end-of-stream and exit.

use std::sync::{Arc, Weak};

use dashmap::{DashMap, DashSet};
use futures::future::BoxFuture;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{EndpointError, TransportError};
use crate::jsonrpc::{IdAllocator, JsonRpcMessage, Reply};
use crate::transport::{FrameReader, FrameWriter};

pub(crate) const CONNECTION_TARGET: &str = "codeloom_plugins::connection";

/// How a handler wants an incoming request answered.
pub enum Dispatch {
    /// The reply is already known. It is sent before any later frame is read.
    Inline(Reply),
    /// The reply is computed concurrently with further frames.
    Spawn(BoxFuture<'static, Reply>),
}

/// Receives the requests and notifications a peer sends.
pub trait RequestHandler: Send + Sync + 'static {
    /// Handles a request and decides how its reply is produced.
    fn handle_request(
        &self,
        connection: &RpcConnection,
        id: i64,
        method: &str,
        params: Value,
    ) -> Dispatch;

    /// Handles a notification. Runs on the reader task.
    fn handle_notification(&self, connection: &RpcConnection, method: &str, params: Value);
}

type CallResult = Result<Value, EndpointError>;

struct ConnectionInner {
    name: String,
    ids: IdAllocator,
    outgoing: mpsc::UnboundedSender<Vec<u8>>,
    pending: DashMap<i64, oneshot::Sender<CallResult>>,
    abandoned: DashSet<i64>,
    closed: CancellationToken,
    stop_writer: CancellationToken,
}

/// A cheaply clonable handle to a running connection.
#[derive(Clone)]
pub struct RpcConnection {
    inner: Arc<ConnectionInner>,
}

impl std::fmt::Debug for RpcConnection {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RpcConnection")
            .field("name", &self.inner.name)
            .field("pending", &self.inner.pending.len())
            .field("closed", &self.inner.closed.is_cancelled())
            .finish()
    }
}

impl RpcConnection {
    /// Starts the reader and writer tasks on the current Tokio runtime.
    ///
    /// `name` identifies the peer in errors and logs.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn start<R, W>(
        name: impl Into<String>,
        reader: R,
        writer: W,
        handler: Arc<dyn RequestHandler>,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outgoing, queue) = mpsc::unbounded_channel();
        let stop_writer = CancellationToken::new();
        let connection = Self {
            inner: Arc::new(ConnectionInner {
                name: name.into(),
                ids: IdAllocator::new(),
                outgoing,
                pending: DashMap::new(),
                abandoned: DashSet::new(),
                closed: CancellationToken::new(),
                stop_writer: stop_writer.clone(),
            }),
        };

        tokio::spawn(write_loop(
            connection.inner.name.clone(),
            FrameWriter::new(writer),
            queue,
            stop_writer,
        ));
        tokio::spawn(read_loop(
            FrameReader::new(reader),
            Arc::downgrade(&connection.inner),
            handler,
        ));
        connection
    }

    /// Returns the peer name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns `true` once the stream has ended.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    /// Waits until the stream has ended.
    pub async fn closed(&self) {
        self.inner.closed.cancelled().await;
    }

    /// Sends a request and returns a handle to await its reply.
    ///
    /// Dropping the handle abandons the call; a late reply is discarded.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::ProcessCrashed`] when the connection is
    /// already closed, or [`EndpointError::Codec`] if `params` cannot be
    /// encoded.
    pub fn start_call(&self, method: &str, params: Value) -> Result<PendingCall, EndpointError> {
        let id = self.inner.ids.next_id();
        let body = JsonRpcMessage::Request {
            id,
            method: method.to_owned(),
            params,
        }
        .to_bytes()?;

        let (sender, receiver) = oneshot::channel();
        self.inner.pending.insert(id, sender);
        if self.is_closed() || self.inner.outgoing.send(body).is_err() {
            self.inner.pending.remove(&id);
            return Err(EndpointError::crashed(
                &self.inner.name,
                "connection is closed",
            ));
        }
        debug!(
            target: CONNECTION_TARGET,
            peer = %self.inner.name,
            method,
            id,
            "sent request"
        );
        Ok(PendingCall {
            id,
            receiver,
            settled: false,
            connection: self.clone(),
        })
    }

    /// Sends a request and waits for its reply.
    ///
    /// # Errors
    ///
    /// Propagates the errors of [`Self::start_call`] and [`PendingCall::wait`].
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, EndpointError> {
        self.start_call(method, params)?.wait().await
    }

    /// Sends a notification.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::ProcessCrashed`] when the connection is
    /// closed, or [`EndpointError::Codec`] if `params` cannot be encoded.
    pub fn notify(&self, method: &str, params: Value) -> Result<(), EndpointError> {
        let body = JsonRpcMessage::Notification {
            method: method.to_owned(),
            params,
        }
        .to_bytes()?;
        self.inner
            .outgoing
            .send(body)
            .map_err(|_| EndpointError::crashed(&self.inner.name, "connection is closed"))
    }

    /// Flushes queued frames and closes the write half of the stream.
    ///
    /// Calls started afterwards fail with
    /// [`EndpointError::ProcessCrashed`]; replies already in flight are still
    /// delivered.
    pub fn close_writer(&self) {
        self.inner.stop_writer.cancel();
    }

    fn respond(&self, id: i64, reply: Reply) {
        let body = match (JsonRpcMessage::Response { id, reply }).to_bytes() {
            Ok(body) => body,
            Err(error) => {
                warn!(
                    target: CONNECTION_TARGET,
                    peer = %self.inner.name,
                    id,
                    %error,
                    "failed to encode reply"
                );
                return;
            }
        };
        if self.inner.outgoing.send(body).is_err() {
            debug!(
                target: CONNECTION_TARGET,
                peer = %self.inner.name,
                id,
                "dropping reply for closed connection"
            );
        }
    }

    fn dispatch(&self, frame: &[u8], handler: &Arc<dyn RequestHandler>) {
        let message = match JsonRpcMessage::from_bytes(frame) {
            Ok(message) => message,
            Err(problem) => {
                self.fail_pending(&EndpointError::protocol(
                    &self.inner.name,
                    format!("malformed message: {problem}"),
                ));
                return;
            }
        };

        match message {
            JsonRpcMessage::Response { id, reply } => self.complete(id, reply),
            JsonRpcMessage::Notification { method, params } => {
                handler.handle_notification(self, &method, params);
            }
            JsonRpcMessage::Request { id, method, params } => {
                match handler.handle_request(self, id, &method, params) {
                    Dispatch::Inline(reply) => self.respond(id, reply),
                    Dispatch::Spawn(work) => {
                        let connection = self.clone();
                        tokio::spawn(async move {
                            let reply = work.await;
                            connection.respond(id, reply);
                        });
                    }
                }
            }
        }
    }

    fn complete(&self, id: i64, reply: Reply) {
        if let Some((_, sender)) = self.inner.pending.remove(&id) {
            let outcome = reply.map_err(|error| EndpointError::remote(&self.inner.name, error));
            if sender.send(outcome).is_err() {
                debug!(
                    target: CONNECTION_TARGET,
                    peer = %self.inner.name,
                    id,
                    "caller went away before the reply"
                );
            }
            return;
        }
        if self.inner.abandoned.remove(&id).is_some() {
            debug!(
                target: CONNECTION_TARGET,
                peer = %self.inner.name,
                id,
                "discarding reply to abandoned request"
            );
            return;
        }
        self.fail_pending(&EndpointError::protocol(
            &self.inner.name,
            format!("response for unknown request id {id}"),
        ));
    }

    fn fail_pending(&self, error: &EndpointError) {
        let ids: Vec<i64> = self.inner.pending.iter().map(|entry| *entry.key()).collect();
        if !ids.is_empty() {
            warn!(
                target: CONNECTION_TARGET,
                peer = %self.inner.name,
                %error,
                pending = ids.len(),
                "failing pending calls"
            );
        }
        for id in ids {
            if let Some((_, sender)) = self.inner.pending.remove(&id) {
                // The peer may still answer; that reply must not count as unknown.
                self.inner.abandoned.insert(id);
                // A receiver that is gone has nothing left to learn.
                drop(sender.send(Err(error.clone())));
            }
        }
    }

    fn shut(&self, error: &EndpointError) {
        self.inner.closed.cancel();
        self.fail_pending(error);
        self.inner.abandoned.clear();
    }
}

/// A request awaiting its reply.
#[derive(Debug)]
pub struct PendingCall {
    id: i64,
    receiver: oneshot::Receiver<CallResult>,
    settled: bool,
    connection: RpcConnection,
}

impl PendingCall {
    /// Returns the request's correlation id.
    #[must_use]
    pub const fn id(&self) -> i64 {
        self.id
    }

    /// Waits for the reply.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::RemoteError`] when the peer answered with an
    /// error object, [`EndpointError::Protocol`] when the peer violated the
    /// protocol, and [`EndpointError::ProcessCrashed`] when the stream ended.
    pub async fn wait(mut self) -> Result<Value, EndpointError> {
        let outcome = (&mut self.receiver).await;
        self.settled = true;
        outcome.unwrap_or_else(|_| {
            Err(EndpointError::crashed(
                self.connection.name(),
                "connection dropped",
            ))
        })
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if self.connection.inner.pending.remove(&self.id).is_some() {
            self.connection.inner.abandoned.insert(self.id);
        }
    }
}

async fn write_loop<W>(
    name: String,
    mut writer: FrameWriter<W>,
    mut queue: mpsc::UnboundedReceiver<Vec<u8>>,
    stop: CancellationToken,
) where
    W: AsyncWrite + Unpin,
{
    let mut stopping = false;
    loop {
        let next = tokio::select! {
            frame = queue.recv() => frame,
            () = stop.cancelled(), if !stopping => {
                stopping = true;
                queue.close();
                continue;
            }
        };
        let Some(frame) = next else { break };
        if let Err(error) = writer.write_frame(&frame).await {
            warn!(target: CONNECTION_TARGET, peer = %name, %error, "write failed");
            return;
        }
    }
    if let Err(error) = writer.close().await {
        debug!(target: CONNECTION_TARGET, peer = %name, %error, "close failed");
    }
}

async fn read_loop<R>(
    mut reader: FrameReader<R>,
    connection: Weak<ConnectionInner>,
    handler: Arc<dyn RequestHandler>,
) where
    R: AsyncRead + Unpin,
{
    let stop = loop {
        match reader.read_frame().await {
            Ok(Some(frame)) => {
                let Some(inner) = connection.upgrade() else {
                    return;
                };
                RpcConnection { inner }.dispatch(&frame, &handler);
            }
            Ok(None) => break ReadStop::Ended(String::from("stream closed")),
            Err(TransportError::Io(error)) => {
                break ReadStop::Ended(format!("read failed: {error}"));
            }
            Err(error) => break ReadStop::Framing(error),
        }
    };
    let Some(inner) = connection.upgrade() else {
        return;
    };
    let error = match stop {
        ReadStop::Ended(reason) => {
            debug!(target: CONNECTION_TARGET, peer = %inner.name, %reason, "reader stopped");
            EndpointError::crashed(&inner.name, reason)
        }
        ReadStop::Framing(framing) => {
            warn!(
                target: CONNECTION_TARGET,
                peer = %inner.name,
                error = %framing,
                "unrecoverable framing error"
            );
            EndpointError::protocol(&inner.name, format!("malformed frame: {framing}"))
        }
    };
    RpcConnection { inner }.shut(&error);
}

/// Why the reader gave up on the stream.
enum ReadStop {
    /// End of stream or an I/O failure.
    Ended(String),
    /// The header block could not be parsed.
    Framing(TransportError),
}

#[cfg(test)]
mod tests;
