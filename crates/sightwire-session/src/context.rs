//! State shared by everything created from one connection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use serde::{Deserialize, Serialize};
use sightwire_transport::Dispatcher;

use crate::callback::{CallbackExecutor, CallbackGuard, CompletionEvent};
use crate::session::SessionInner;
use crate::{DeliveryMode, Session, SessionError, failures};

/// Client-wide defaults for producers and sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    /// Send messages without a message ID.
    pub disable_message_id: bool,
    /// Send messages without a timestamp.
    pub disable_timestamp: bool,
    pub delivery_mode: DeliveryMode,
    /// 0 (lowest) to 9 (highest).
    pub priority: u8,
    /// Milliseconds; 0 means messages never expire.
    pub time_to_live: u64,
    /// Milliseconds the broker holds a message before delivering it.
    pub delivery_delay: u64,
    /// Ask the broker not to acknowledge sends.
    pub disable_ack: bool,
    /// Allow fire-and-forget sends inside transactions.
    pub async_send_allowed: bool,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            disable_message_id: false,
            disable_timestamp: false,
            delivery_mode: DeliveryMode::Persistent,
            priority: 4,
            time_to_live: 0,
            delivery_delay: 0,
            disable_ack: false,
            async_send_allowed: false,
        }
    }
}

/// One connection's shared state.
///
/// Sessions, producers and consumers each hold an `Arc` to it.
pub struct ConnectionContext {
    client_id: String,
    generated_client_id: bool,
    dispatcher: Dispatcher,
    settings: ClientSettings,
    closed: AtomicBool,
    guard: Arc<CallbackGuard>,
    executor: CallbackExecutor,
    sessions: Mutex<HashMap<u32, Weak<SessionInner>>>,
}

impl ConnectionContext {
    /// Wraps a started dispatcher and starts the callback thread.
    ///
    /// # Errors
    /// Fails when the callback thread cannot be spawned.
    pub fn new(
        client_id: String,
        generated_client_id: bool,
        dispatcher: Dispatcher,
        settings: ClientSettings,
    ) -> Result<Arc<Self>, SessionError> {
        let guard = Arc::new(CallbackGuard::default());
        let executor = CallbackExecutor::start(Arc::clone(&guard))
            .map_err(|e| failures::callback_executor_unavailable(&e.to_string()))?;
        Ok(Arc::new(Self {
            client_id,
            generated_client_id,
            dispatcher,
            settings,
            closed: AtomicBool::new(false),
            guard,
            executor,
            sessions: Mutex::new(HashMap::new()),
        }))
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Returns `true` when the client ID was made up by the client.
    pub fn is_client_id_generated(&self) -> bool {
        self.generated_client_id
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn callback_guard(&self) -> &CallbackGuard {
        &self.guard
    }

    pub fn callback_executor(&self) -> &CallbackExecutor {
        &self.executor
    }

    /// Returns `true` after [`mark_closed`](Self::mark_closed) or once
    /// the link is gone.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.dispatcher.is_closed()
    }

    /// Flips the closed flag. Returns `false` if it was already set, so
    /// exactly one caller performs the close.
    pub fn mark_closed(&self) -> bool {
        self.closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn ensure_open(&self) -> Result<(), SessionError> {
        if self.is_closed() {
            return Err(failures::connection_closed().into());
        }
        Ok(())
    }

    pub(crate) fn register_session(&self, session: &Arc<SessionInner>) {
        self.lock_sessions()
            .insert(session.id(), Arc::downgrade(session));
    }

    pub(crate) fn forget_session(&self, id: u32) {
        self.lock_sessions().remove(&id);
    }

    /// Sessions that are still alive.
    pub fn sessions(&self) -> Vec<Session> {
        self.lock_sessions()
            .values()
            .filter_map(Weak::upgrade)
            .map(Session::from_inner)
            .collect()
    }

    fn lock_sessions(&self) -> std::sync::MutexGuard<'_, HashMap<u32, Weak<SessionInner>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn post_completion(&self, event: CompletionEvent) {
        if self.executor.post(event).is_err() {
            tracing::warn!(client_id = %self.client_id, "completion dropped, callback thread stopped");
        }
    }
}

impl std::fmt::Debug for ConnectionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionContext")
            .field("client_id", &self.client_id)
            .field("link", &self.dispatcher.link_id())
            .field("closed", &self.is_closed())
            .finish()
    }
}
