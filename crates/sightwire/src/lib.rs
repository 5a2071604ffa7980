//! # Sightwire
//!
//! Client engine for a publish/subscribe and point-to-point messaging
//! broker.
//!
//! A [`Connection`] carries [`Session`]s. Sessions create
//! [`Producer`]s, which stamp and send messages, and [`Consumer`]s,
//! including durable and shared subscriptions. Every broker refusal comes
//! back as a categorized [`Failure`] with a stable code.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sightwire::prelude::*;
//!
//! # async fn run() -> Result<(), SightwireError> {
//! let conn = Connection::builder()
//!     .client_id("billing-1")
//!     .connect_websocket("ws://localhost:16102/")
//!     .await?;
//! let session = conn.create_session(SessionConfig::default()).await?;
//! let producer = session.create_producer(Some(&Destination::queue("orders"))).await?;
//! producer.send(&mut Message::text("hello")).await?;
//! conn.close().await
//! # }
//! ```

// ---------------------------------------------------------------------------
// Module declarations
// ---------------------------------------------------------------------------

mod config;
mod connection;
mod error;
pub mod logging;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use config::{ConfigError, ConnectionConfig};
pub use connection::{Connection, ConnectionBuilder};
pub use error::SightwireError;

pub use sightwire_protocol::{Domain, Failure, FailureCategory, PropertyMap, ReturnCode, Value};
pub use sightwire_session::{
    AckMode, ClientSettings, CompletionListener, Consumer, ConsumerDescriptor, ConsumerOptions,
    DeliveryMode, Destination, DestinationKind, ForeignError, ForeignMessage, Message,
    MessageType, Producer, Session, SessionConfig, SessionError, SharedMessage,
};

/// Re-exports for the common case.
pub mod prelude {
    pub use crate::{
        AckMode, CompletionListener, Connection, ConnectionConfig, Consumer, ConsumerOptions,
        DeliveryMode, Destination, Failure, FailureCategory, Message, MessageType, Producer,
        Session, SessionConfig, SightwireError,
    };
}
