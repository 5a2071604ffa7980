//! Sessions, producers and consumers for Sightwire.
//!
//! This crate turns application operations into actions and broker return
//! codes into typed failures:
//!
//! - [`Session`]: the unit of work. Its send lock keeps at most one
//!   acknowledged request per session in flight.
//! - [`Producer`]: the send path. Stamps messages, assigns message IDs
//!   ([`MessageIdGenerator`]), and chooses between waiting for the broker
//!   and fire-and-forget.
//! - [`Consumer`]: the consumer and subscription creation path.
//! - [`ConnectionContext`]: what all of them share from the connection,
//!   including the callback thread that runs [`CompletionListener`]s and
//!   the guard that refuses closing a connection from its own callback.
//!
//! # Architecture
//!
//! ```text
//! Connection ──▶ ConnectionContext ◀── Session ◀── Producer / Consumer
//!                      │
//!                      ├── Dispatcher (sightwire-transport)
//!                      └── CallbackExecutor ── CompletionListener
//! ```

// ---------------------------------------------------------------------------
// Module declarations
// ---------------------------------------------------------------------------

mod callback;
mod consumer;
mod context;
mod error;
pub mod failures;
mod message;
mod message_id;
mod producer;
mod session;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use callback::{CallbackExecutor, CallbackGuard, CompletionListener};
pub use consumer::{Consumer, ConsumerDescriptor, ConsumerOptions};
pub use context::{ClientSettings, ConnectionContext};
pub use error::SessionError;
pub use message::{
    DeliveryMode, Destination, DestinationKind, ForeignError, ForeignMessage, Message,
    MessageType, SharedMessage,
};
pub use message_id::MessageIdGenerator;
pub use producer::Producer;
pub use session::{AckMode, Session, SessionConfig};
