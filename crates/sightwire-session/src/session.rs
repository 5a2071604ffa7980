//! Sessions: the unit of work and of request ordering.
//!
//! A session owns a send lock. Every request that changes what the broker
//! knows about the session (producer and consumer creation, acknowledged
//! sends, commit, rollback, close) is built and awaited while holding it,
//! so the broker never sees two of them in flight for one session:
//!
//! ```text
//! task A: lock ── create-durable ── wait ── resume-session ── wait ── unlock
//! task B:         (blocked) ────────────────────────────────────────── lock ── send ── wait ── unlock
//! ```
//!
//! Fire-and-forget sends skip the lock; they are never in flight.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use sightwire_protocol::{Action, ActionType, Domain, ProtocolError};
use tokio::sync::{Mutex, MutexGuard};

use crate::consumer::{self, ConsumerOptions};
use crate::{ConnectionContext, Consumer, Destination, Producer, SessionError, failures};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// How received messages are acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckMode {
    /// Acknowledged by commit. Implied by a transacted session.
    SessionTransacted,
    #[default]
    Auto,
    Client,
    DupsOk,
}

impl AckMode {
    pub fn code(self) -> i32 {
        match self {
            Self::SessionTransacted => 0,
            Self::Auto => 1,
            Self::Client => 2,
            Self::DupsOk => 3,
        }
    }
}

/// Options for [`Session::create`].
///
/// `None` overrides fall back to the connection's [`ClientSettings`](crate::ClientSettings).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub transacted: bool,
    pub ack_mode: AckMode,
    pub disable_ack: Option<bool>,
    pub async_send_allowed: Option<bool>,
}

impl SessionConfig {
    /// A transacted session.
    pub fn transacted() -> Self {
        Self {
            transacted: true,
            ack_mode: AckMode::SessionTransacted,
            ..Self::default()
        }
    }

    pub fn with_ack_mode(mut self, ack_mode: AckMode) -> Self {
        self.ack_mode = ack_mode;
        self
    }
}

// ---------------------------------------------------------------------------
// SessionInner
// ---------------------------------------------------------------------------

/// The state behind a [`Session`] handle, shared with its producers and
/// consumers.
pub(crate) struct SessionInner {
    id: u32,
    connection: Arc<ConnectionContext>,
    transacted: bool,
    ack_mode: AckMode,
    disable_ack: bool,
    async_send_allowed: bool,
    send_lock: Mutex<()>,
    closed: AtomicBool,
}

impl SessionInner {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn connection(&self) -> &Arc<ConnectionContext> {
        &self.connection
    }

    pub fn transacted(&self) -> bool {
        self.transacted
    }

    pub fn disable_ack(&self) -> bool {
        self.disable_ack
    }

    pub fn async_send_allowed(&self) -> bool {
        self.async_send_allowed
    }

    /// Closed directly, or through the connection.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.connection.is_closed()
    }

    pub fn ensure_open(&self) -> Result<(), SessionError> {
        self.connection.ensure_open()?;
        if self.closed.load(Ordering::Acquire) {
            return Err(failures::session_closed().into());
        }
        Ok(())
    }

    /// Takes the send lock. Hold the guard until the reply has been read.
    pub async fn lock_send(&self) -> MutexGuard<'_, ()> {
        self.send_lock.lock().await
    }

    pub fn action(&self, action_type: ActionType) -> Action {
        Action::new(action_type, self.id)
    }

    pub async fn request(&self, action: &mut Action, wait: bool) -> Result<(), SessionError> {
        self.connection
            .dispatcher()
            .request(action, wait)
            .await
            .map_err(SessionError::from)
    }

    /// Takes the send lock, re-checks the session and sends `action`,
    /// waiting for the reply.
    pub async fn request_locked(&self, action: &mut Action) -> Result<(), SessionError> {
        let _lock = self.lock_send().await;
        self.ensure_open()?;
        self.request(action, true).await
    }

    /// Closes a session the broker created but the client will never
    /// hand out. The outcome is only logged.
    async fn discard(&self) {
        self.closed.store(true, Ordering::Release);
        if self.connection.dispatcher().is_closed() {
            return;
        }
        let mut action = self.action(ActionType::CloseSession);
        match self.request(&mut action, true).await {
            Ok(()) if !action.return_code().is_ok() => {
                tracing::debug!(session_id = self.id, rc = %action.return_code(), "broker refused close of discarded session");
            }
            Ok(()) => tracing::debug!(session_id = self.id, "discarded session closed"),
            Err(e) => tracing::debug!(session_id = self.id, error = %e, "close of discarded session not delivered"),
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// A session handle. Cheap to clone; clones share one session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Creates a session on the broker.
    ///
    /// For a transacted session the first transaction is opened as well.
    ///
    /// # Errors
    /// CWLNC0008 if the connection is closed, CWLNC0207 for an
    /// authorization failure, CWLNC0204 for any other refusal.
    pub async fn create(
        connection: &Arc<ConnectionContext>,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        connection.ensure_open()?;
        let ack_mode = match (config.transacted, config.ack_mode) {
            (true, _) => AckMode::SessionTransacted,
            (false, AckMode::SessionTransacted) => AckMode::Auto,
            (false, mode) => mode,
        };

        let mut action = Action::new(ActionType::CreateSession, 0);
        action.put_int(i32::from(Domain::Common.code()))?;
        action.put_bool(config.transacted)?;
        action.put_int(ack_mode.code())?;
        action.set_header_count(3);
        connection.dispatcher().request(&mut action, true).await?;
        if !action.return_code().is_ok() {
            let failure = failures::create_session_failure(action.return_code());
            tracing::debug!(code = failure.code(), rc = %action.return_code(), "session refused");
            return Err(failure.into());
        }
        let id = action
            .response_int(0)
            .and_then(|id| u32::try_from(id).ok())
            .ok_or_else(|| ProtocolError::InvalidMessage("create-session reply has no session id".into()))?;

        let settings = connection.settings();
        let inner = Arc::new(SessionInner {
            id,
            connection: Arc::clone(connection),
            transacted: config.transacted,
            ack_mode,
            disable_ack: config.disable_ack.unwrap_or(settings.disable_ack),
            async_send_allowed: config
                .async_send_allowed
                .unwrap_or(settings.async_send_allowed),
            send_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
        });

        if config.transacted {
            let mut action = inner.action(ActionType::CreateTransaction);
            let opened = inner.request(&mut action, true).await;
            let refused = opened.is_ok() && !action.return_code().is_ok();
            if opened.is_err() || refused {
                inner.discard().await;
            }
            opened?;
            if refused {
                return Err(failures::create_session_failure(action.return_code()).into());
            }
        }

        connection.register_session(&inner);
        tracing::info!(session_id = id, transacted = config.transacted, ?ack_mode, "session created");
        Ok(Self { inner })
    }

    pub(crate) fn from_inner(inner: Arc<SessionInner>) -> Self {
        Self { inner }
    }

    pub fn id(&self) -> u32 {
        self.inner.id
    }

    pub fn is_transacted(&self) -> bool {
        self.inner.transacted
    }

    pub fn ack_mode(&self) -> AckMode {
        self.inner.ack_mode
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    pub fn client_id(&self) -> &str {
        self.inner.connection.client_id()
    }

    // -- producers ----------------------------------------------------------

    /// Creates a producer. With a destination the producer is bound to it
    /// and registered with the broker; without one it is anonymous and
    /// every send names its destination.
    pub async fn create_producer(
        &self,
        destination: Option<&Destination>,
    ) -> Result<Producer, SessionError> {
        Producer::create(&self.inner, destination.cloned()).await
    }

    // -- consumers ----------------------------------------------------------

    /// Creates a plain consumer on a queue or topic.
    pub async fn create_consumer(
        &self,
        destination: &Destination,
        selector: Option<&str>,
        no_local: bool,
    ) -> Result<Consumer, SessionError> {
        let options = ConsumerOptions::new(destination.clone())
            .selector(selector)
            .no_local(no_local);
        self.create_subscription_and_consumer(options).await
    }

    /// Creates a consumer on the non-shared durable subscription `name`.
    pub async fn create_durable_consumer(
        &self,
        topic: &Destination,
        name: &str,
        selector: Option<&str>,
        no_local: bool,
    ) -> Result<Consumer, SessionError> {
        let options = ConsumerOptions::new(topic.clone())
            .durable(name)
            .selector(selector)
            .no_local(no_local);
        self.create_subscription_and_consumer(options).await
    }

    /// Creates a consumer on the shared non-durable subscription `name`.
    pub async fn create_shared_consumer(
        &self,
        topic: &Destination,
        name: &str,
        selector: Option<&str>,
    ) -> Result<Consumer, SessionError> {
        let options = ConsumerOptions::new(topic.clone())
            .shared(name)
            .selector(selector);
        self.create_subscription_and_consumer(options).await
    }

    /// Creates a consumer on the shared durable subscription `name`.
    pub async fn create_shared_durable_consumer(
        &self,
        topic: &Destination,
        name: &str,
        selector: Option<&str>,
    ) -> Result<Consumer, SessionError> {
        let options = ConsumerOptions::new(topic.clone())
            .durable(name)
            .shared(name)
            .selector(selector);
        self.create_subscription_and_consumer(options).await
    }

    /// Creates a consumer from explicit options.
    pub async fn create_subscription_and_consumer(
        &self,
        options: ConsumerOptions,
    ) -> Result<Consumer, SessionError> {
        consumer::create(&self.inner, options).await
    }

    // -- subscriptions ------------------------------------------------------

    /// Deletes the durable subscription `name`.
    pub async fn unsubscribe(&self, name: &str) -> Result<(), SessionError> {
        self.unsubscribe_in(name, false).await
    }

    /// Deletes the shared durable subscription `name` from the namespace
    /// shared by all clients.
    pub async fn unsubscribe_shared(&self, name: &str) -> Result<(), SessionError> {
        self.unsubscribe_in(name, true).await
    }

    async fn unsubscribe_in(&self, name: &str, shared_namespace: bool) -> Result<(), SessionError> {
        self.inner.ensure_open()?;
        let mut action = self.inner.action(ActionType::UnsubscribeDurable);
        action.put_str(Some(name))?;
        action.put_bool(shared_namespace)?;
        action.set_header_count(2);
        self.inner.request_locked(&mut action).await?;
        let rc = action.return_code();
        if !rc.is_ok() {
            let failure = failures::unsubscribe_failure(rc, name, self.client_id());
            tracing::debug!(session_id = self.id(), code = failure.code(), %rc, name, "unsubscribe refused");
            return Err(failure.into());
        }
        tracing::debug!(session_id = self.id(), name, "unsubscribed");
        Ok(())
    }

    // -- transactions -------------------------------------------------------

    /// Commits the current transaction.
    ///
    /// # Errors
    /// CWLNC0001 on a session that is not transacted. Any refusal from the
    /// broker is reported as a rolled-back transaction (CWLNC0059).
    pub async fn commit(&self) -> Result<(), SessionError> {
        self.inner.ensure_open()?;
        if !self.inner.transacted {
            return Err(failures::not_transacted("commit").into());
        }
        let mut action = self.inner.action(ActionType::CommitSession);
        self.inner.request_locked(&mut action).await?;
        let rc = action.return_code();
        if !rc.is_ok() {
            tracing::debug!(session_id = self.id(), %rc, "commit failed, transaction rolled back");
            return Err(failures::commit_failure(rc).into());
        }
        Ok(())
    }

    /// Rolls back the current transaction.
    pub async fn rollback(&self) -> Result<(), SessionError> {
        self.inner.ensure_open()?;
        if !self.inner.transacted {
            return Err(failures::not_transacted("rollback").into());
        }
        let mut action = self.inner.action(ActionType::RollbackSession);
        self.inner.request_locked(&mut action).await?;
        let rc = action.return_code();
        if !rc.is_ok() {
            tracing::debug!(session_id = self.id(), %rc, "rollback failed");
            return Err(failures::rollback_failure(rc).into());
        }
        Ok(())
    }

    // -- lifecycle ----------------------------------------------------------

    /// Closes the session and, with it, its producers and consumers.
    ///
    /// Closing twice is a no-op. A connection that is already gone only
    /// marks the session closed.
    pub async fn close(&self) -> Result<(), SessionError> {
        if self
            .inner
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }
        let connection = &self.inner.connection;
        connection.forget_session(self.inner.id);
        if connection.dispatcher().is_closed() {
            return Ok(());
        }

        let mut action = self.inner.action(ActionType::CloseSession);
        {
            let _lock = self.inner.lock_send().await;
            self.inner.request(&mut action, true).await?;
        }
        if !action.return_code().is_ok() {
            tracing::warn!(session_id = self.id(), rc = %action.return_code(), "broker refused session close");
        }
        tracing::info!(session_id = self.id(), "session closed");
        Ok(())
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("transacted", &self.inner.transacted)
            .field("ack_mode", &self.inner.ack_mode)
            .field("closed", &self.is_closed())
            .finish()
    }
}
