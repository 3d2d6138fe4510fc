//! Diagnostic messages exchanged during a Codeloom run.
//!
//! Plugins and the orchestrator report progress and problems as
//! [`Message`] records classified by a [`Channel`]. Messages are fanned out
//! to observers registered on a [`MessageHub`], which keeps an explicit,
//! ordered subscriber list so every observer sees every message in the same
//! global order.
//!
//! # Example
//!
//! ```
//! use std::sync::{Arc, Mutex};
//! use codeloom_message::{Channel, Message, MessageHub};
//!
//! let hub = MessageHub::new();
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let sink = Arc::clone(&seen);
//! let subscription = hub.subscribe(move |message: &Message| {
//!     sink.lock().unwrap().push(message.channel());
//! });
//!
//! hub.emit(Message::new(Channel::Warning, "deprecated operation"));
//! assert!(hub.unsubscribe(subscription));
//! hub.emit(Message::new(Channel::Error, "ignored"));
//!
//! assert_eq!(*seen.lock().unwrap(), vec![Channel::Warning]);
//! ```

pub mod hub;
pub mod message;

pub use self::hub::{MessageHub, SubscriptionId};
pub use self::message::{Channel, ChannelParseError, Message};
