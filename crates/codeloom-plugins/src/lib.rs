//! Plugin communication protocol for Codeloom.
//!
//! Plugins run as separate processes and speak JSON-RPC 2.0 over their
//! standard streams, one `Content-Length` framed message at a time. Both
//! peers issue requests: the host asks a plugin to run (`Process`), and the
//! plugin calls back for configuration, inputs, and to emit artifacts and
//! messages while the call is open.
//!
//! - [`transport`] frames byte streams.
//! - [`connection`] multiplexes concurrent requests over one stream.
//! - [`PluginEndpoint`] is the host side of one plugin process.
//! - [`sdk`] is the plugin side, used by plugin executables.
//!
//! The protocol layer never depends on a real process: any
//! `AsyncRead`/`AsyncWrite` pair works, which is how the tests drive a host
//! and a plugin through an in-memory pipe.

pub mod connection;
pub mod endpoint;
pub mod error;
pub mod jsonrpc;
pub mod protocol;
pub mod sdk;
pub mod transport;

pub use self::connection::{Dispatch, PendingCall, RequestHandler, RpcConnection};
pub use self::endpoint::{
    ConfigProvider, FileCallback, MessageCallback, PluginEndpoint, ProcessInvocation,
};
pub use self::error::{EndpointError, PluginSdkError, TransportError};
pub use self::jsonrpc::{JsonRpcError, JsonRpcMessage};
pub use self::protocol::ContentEncoding;
pub use self::sdk::{InputFile, OutputFile, Plugin, PluginContext, PluginServer};
