//! `Connection` builder and lifecycle.
//!
//! Opening a connection is one waited request on session 0:
//!
//! ```text
//! client                                   broker
//!   | CreateConnection(client_id, user,       |
//!   |   password, generated)  --------------> |
//!   | <-------------------------  Reply(rc)   |
//! ```
//!
//! Closing walks the other way: every live session is closed, then
//! `CloseConnection` is sent, then the callback thread and the link are
//! shut down.

use std::sync::Arc;

use rand::Rng;
use sightwire_protocol::{Action, ActionType};
use sightwire_session::{ConnectionContext, Session, SessionConfig, failures};
use sightwire_transport::{Dispatcher, Link};

use crate::SightwireError;
use crate::config::ConnectionConfig;

/// Characters used in generated client IDs.
const CLIENT_ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Length of a generated client ID, not counting the leading `_`.
const GENERATED_ID_LEN: usize = 12;

/// Makes up a client ID for connections that did not supply one.
///
/// Generated IDs start with `_`, which the broker reserves for them.
fn generate_client_id() -> String {
    let mut rng = rand::rng();
    let mut id = String::with_capacity(GENERATED_ID_LEN + 1);
    id.push('_');
    for _ in 0..GENERATED_ID_LEN {
        let i = rng.random_range(0..CLIENT_ID_ALPHABET.len());
        id.push(char::from(CLIENT_ID_ALPHABET[i]));
    }
    id
}

/// Builder for opening a [`Connection`].
///
/// # Example
///
/// ```rust,ignore
/// use sightwire::prelude::*;
///
/// let conn = Connection::builder()
///     .client_id("billing-1")
///     .credentials("billing", "secret")
///     .connect_websocket("ws://broker:16102/")
///     .await?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct ConnectionBuilder {
    config: ConnectionConfig,
}

impl ConnectionBuilder {
    /// Creates a builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn client_id(mut self, client_id: &str) -> Self {
        self.config.client_id = Some(client_id.to_string());
        self
    }

    pub fn credentials(mut self, user: &str, password: &str) -> Self {
        self.config.user = Some(user.to_string());
        self.config.password = Some(password.to_string());
        self
    }

    /// Opens a WebSocket link to `url` and connects over it.
    pub async fn connect_websocket(self, url: &str) -> Result<Connection, SightwireError> {
        let link = sightwire_transport::WebSocketLink::connect(url).await?;
        self.connect(link).await
    }

    /// Connects over an already-open link.
    ///
    /// # Errors
    /// Returns a [`Failure`](sightwire_protocol::Failure) when the broker
    /// refuses the connection; the link is shut down in that case.
    pub async fn connect<L: Link>(self, link: L) -> Result<Connection, SightwireError> {
        self.config.validate()?;
        let (client_id, generated) = match self.config.client_id {
            Some(id) => (id, false),
            None => (generate_client_id(), true),
        };

        let dispatcher = Dispatcher::spawn(link);
        let mut action = Action::new(ActionType::CreateConnection, 0);
        action.put_str(Some(&client_id))?;
        action.put_str(self.config.user.as_deref())?;
        action.put_str(self.config.password.as_deref())?;
        action.put_bool(generated)?;
        action.set_header_count(4);
        if let Err(e) = dispatcher.request(&mut action, true).await {
            dispatcher.shutdown().await;
            return Err(e.into());
        }

        let rc = action.return_code();
        if !rc.is_ok() {
            dispatcher.shutdown().await;
            let failure = failures::create_connection_failure(rc, &client_id);
            tracing::warn!(client_id = %client_id, %rc, code = failure.code(), "connection refused");
            return Err(failure.into());
        }

        let peer = dispatcher.peer().to_string();
        let ctx = ConnectionContext::new(client_id, generated, dispatcher, self.config.client)?;
        tracing::info!(client_id = ctx.client_id(), peer = %peer, generated, "connected");
        Ok(Connection { ctx })
    }
}

/// An open connection to the broker.
///
/// Cloning is cheap; clones share the same connection.
#[derive(Debug, Clone)]
pub struct Connection {
    ctx: Arc<ConnectionContext>,
}

impl Connection {
    pub fn builder() -> ConnectionBuilder {
        ConnectionBuilder::new()
    }

    pub fn client_id(&self) -> &str {
        self.ctx.client_id()
    }

    /// Returns `true` when the client ID was generated on connect.
    pub fn is_client_id_generated(&self) -> bool {
        self.ctx.is_client_id_generated()
    }

    /// Returns `true` after [`close`](Self::close) or once the link drops.
    pub fn is_closed(&self) -> bool {
        self.ctx.is_closed()
    }

    /// Sessions created on this connection that are still open.
    pub fn sessions(&self) -> Vec<Session> {
        self.ctx.sessions()
    }

    pub async fn create_session(&self, config: SessionConfig) -> Result<Session, SightwireError> {
        Ok(Session::create(&self.ctx, config).await?)
    }

    /// Closes every session, then the connection itself.
    ///
    /// Closing twice is a no-op.
    ///
    /// # Errors
    /// Fails with `CWLNC0102` when called from a completion callback,
    /// because the close would wait on the thread it is running on. The
    /// connection stays open in that case.
    pub async fn close(&self) -> Result<(), SightwireError> {
        if self.ctx.callback_guard().in_callback() {
            return Err(failures::reentrant_close().into());
        }
        if !self.ctx.mark_closed() {
            return Ok(());
        }

        for session in self.ctx.sessions() {
            if let Err(e) = session.close().await {
                tracing::debug!(session_id = session.id(), error = %e, "session close failed");
            }
        }

        let dispatcher = self.ctx.dispatcher();
        if !dispatcher.is_closed() {
            let mut action = Action::new(ActionType::CloseConnection, 0);
            match dispatcher.request(&mut action, true).await {
                Ok(()) if !action.return_code().is_ok() => {
                    tracing::warn!(rc = %action.return_code(), "broker refused connection close");
                }
                Ok(()) => {}
                Err(e) => tracing::debug!(error = %e, "close-connection not delivered"),
            }
        }

        self.ctx.callback_executor().shutdown().await;
        dispatcher.shutdown().await;
        tracing::info!(client_id = self.ctx.client_id(), "connection closed");
        Ok(())
    }
}
