//! Completion callbacks and the reentrancy guard.
//!
//! Completion listeners never run on the dispatcher task or on the task
//! that sent the message. The send path posts a [`CompletionEvent`] to the
//! connection's [`CallbackExecutor`], a dedicated OS thread that invokes
//! listeners one at a time:
//!
//! ```text
//! send task ──CompletionEvent──▶ mpsc ──▶ "sightwire-callbacks" thread
//!                                              │
//!                                  CallbackGuard::enter()
//!                                  listener.on_completion / on_exception
//! ```
//!
//! While a listener runs, the connection's [`CallbackGuard`] records it,
//! and closing that connection from the callback thread is refused.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};

use tokio::sync::mpsc;

use crate::{Message, SessionError};

// ---------------------------------------------------------------------------
// CompletionListener
// ---------------------------------------------------------------------------

/// Receives the outcome of a send.
///
/// Both methods run on the connection's callback thread, never on a
/// runtime worker, so they may block.
pub trait CompletionListener: Send + Sync {
    /// The broker accepted `message`.
    fn on_completion(&self, message: &Message);

    /// The send of `message` failed.
    fn on_exception(&self, message: &Message, error: &SessionError);
}

/// One send outcome waiting to be delivered to its listener.
pub(crate) struct CompletionEvent {
    pub listener: Arc<dyn CompletionListener>,
    pub message: Message,
    pub outcome: Result<(), SessionError>,
}

impl CompletionEvent {
    fn deliver(self) {
        match &self.outcome {
            Ok(()) => self.listener.on_completion(&self.message),
            Err(e) => self.listener.on_exception(&self.message, e),
        }
    }
}

// ---------------------------------------------------------------------------
// CallbackGuard
// ---------------------------------------------------------------------------

/// Tracks whether a callback of one connection is running, and on which
/// thread.
#[derive(Debug, Default)]
pub struct CallbackGuard {
    depth: AtomicUsize,
    thread: OnceLock<ThreadId>,
}

impl CallbackGuard {
    /// Returns `true` when called from inside a callback of this
    /// connection.
    pub fn in_callback(&self) -> bool {
        self.depth.load(Ordering::Acquire) > 0
            && self.thread.get() == Some(&thread::current().id())
    }

    fn enter(&self) -> GuardScope<'_> {
        let _ = self.thread.set(thread::current().id());
        self.depth.fetch_add(1, Ordering::AcqRel);
        GuardScope(self)
    }
}

/// Leaves the callback scope when dropped, panics included.
struct GuardScope<'a>(&'a CallbackGuard);

impl Drop for GuardScope<'_> {
    fn drop(&mut self) {
        self.0.depth.fetch_sub(1, Ordering::AcqRel);
    }
}

// ---------------------------------------------------------------------------
// CallbackExecutor
// ---------------------------------------------------------------------------

/// The per-connection callback thread.
pub struct CallbackExecutor {
    events: Mutex<Option<mpsc::UnboundedSender<CompletionEvent>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl CallbackExecutor {
    /// Starts the callback thread.
    pub fn start(guard: Arc<CallbackGuard>) -> std::io::Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<CompletionEvent>();
        let handle = thread::Builder::new()
            .name("sightwire-callbacks".into())
            .spawn(move || {
                while let Some(event) = rx.blocking_recv() {
                    let _scope = guard.enter();
                    if catch_unwind(AssertUnwindSafe(|| event.deliver())).is_err() {
                        tracing::warn!("completion listener panicked");
                    }
                }
                tracing::debug!("callback thread stopped");
            })?;
        Ok(Self {
            events: Mutex::new(Some(tx)),
            thread: Mutex::new(Some(handle)),
        })
    }

    /// Queues an event. Returns it back if the executor has stopped.
    pub(crate) fn post(&self, event: CompletionEvent) -> Result<(), CompletionEvent> {
        let events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        match events.as_ref() {
            Some(tx) => tx.send(event).map_err(|e| e.0),
            None => Err(event),
        }
    }

    /// Stops accepting events, lets queued ones finish, then joins the
    /// thread.
    pub async fn shutdown(&self) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let handle = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = tokio::task::spawn_blocking(move || handle.join()).await {
                tracing::warn!(error = %e, "joining the callback thread failed");
            }
        }
    }
}
