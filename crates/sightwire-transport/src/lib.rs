//! Transport layer for Sightwire.
//!
//! Two pieces live here:
//!
//! - The [`Link`] trait: a connected, message-oriented byte pipe to the
//!   broker. [`WebSocketLink`] and [`MemoryLink`] implement it.
//! - The [`Dispatcher`]: the action transport. It owns a link, numbers
//!   every outbound action, and routes each reply back to the request
//!   that is waiting for it.
//!
//! # Feature Flags
//!
//! - `websocket` (default): WebSocket client link via `tokio-tungstenite`
//! - `test-util`: [`testing::StubBroker`], a scriptable in-memory broker

mod dispatcher;
mod error;
mod memory;
#[cfg(feature = "test-util")]
pub mod testing;
#[cfg(feature = "websocket")]
mod websocket;

pub use dispatcher::Dispatcher;
pub use error::TransportError;
pub use memory::{MemoryLink, memory_pair};
#[cfg(feature = "websocket")]
pub use websocket::WebSocketLink;

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counter for generating unique link IDs.
static NEXT_LINK_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_link_id() -> LinkId {
    LinkId::new(NEXT_LINK_ID.fetch_add(1, Ordering::Relaxed))
}

/// Opaque identifier for a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkId(u64);

impl LinkId {
    /// Creates a new `LinkId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link-{}", self.0)
    }
}

/// A connected pipe that carries whole frames in both directions.
///
/// The futures are `Send` so a link can be driven from a spawned task.
pub trait Link: Send + Sync + 'static {
    /// Sends one frame to the peer.
    fn send(&self, data: &[u8]) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Receives the next frame from the peer.
    ///
    /// Returns `Ok(None)` when the link is cleanly closed. Must be
    /// cancel-safe: dropping the future before it resolves loses no frame.
    fn recv(&self) -> impl Future<Output = Result<Option<Vec<u8>>, TransportError>> + Send;

    /// Closes the link.
    fn close(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Returns the unique identifier for this link.
    fn id(&self) -> LinkId;

    /// Describes the remote endpoint for diagnostics.
    fn peer(&self) -> String {
        self.id().to_string()
    }
}
