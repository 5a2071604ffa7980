//! The action transport: an actor that owns the link.
//!
//! Callers never touch the link directly. They hand an encoded frame to the
//! [`Dispatcher`] through an unbounded channel and, for waited requests,
//! keep the receiving half of a `oneshot` reply channel. The actor task
//! writes frames to the link in the order they were queued, reads frames
//! from the link, and routes each reply to the pending request with the
//! same correlation number.
//!
//! ```text
//! request(wait=true)  ──Send{frame, reply}──▶ actor ──frame──▶ link
//!        ▲                                      │
//!        └──────────── oneshot(reply) ◀──────── reply frame ◀── link
//! ```
//!
//! A fire-and-forget request returns as soon as the frame is queued, so it
//! never waits on the broker. When the link fails or closes, every pending
//! request resolves with [`TransportError::ConnectionClosed`].

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use sightwire_protocol::{Action, ActionType, Frame};
use tokio::sync::{mpsc, oneshot};

use crate::{Link, LinkId, TransportError};

type ReplySender = oneshot::Sender<Result<Frame, TransportError>>;

/// Commands sent to the dispatch actor.
enum Command {
    /// Write a frame; `reply` is present for waited requests.
    Send {
        correlation: u32,
        frame: Vec<u8>,
        reply: Option<ReplySender>,
    },

    /// Close the link and stop.
    Shutdown { reply: oneshot::Sender<()> },
}

/// Handle to a running dispatch actor.
pub struct Dispatcher {
    link_id: LinkId,
    peer: String,
    commands: mpsc::UnboundedSender<Command>,
    next_correlation: AtomicU32,
    closed: Arc<AtomicBool>,
}

impl Dispatcher {
    /// Spawns the actor task for `link` and returns its handle.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn<L: Link>(link: L) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        let link_id = link.id();
        let peer = link.peer();
        let actor = DispatchActor {
            link,
            commands: rx,
            pending: HashMap::new(),
            closed: Arc::clone(&closed),
        };
        tokio::spawn(actor.run());
        tracing::debug!(%link_id, %peer, "dispatcher started");
        Self {
            link_id,
            peer,
            commands: tx,
            next_correlation: AtomicU32::new(1),
            closed,
        }
    }

    pub fn link_id(&self) -> LinkId {
        self.link_id
    }

    /// The remote endpoint, as described by the link.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Returns `true` once the link has failed or been shut down.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn closed_error(&self) -> TransportError {
        TransportError::ConnectionClosed(format!("{} is closed", self.link_id))
    }

    /// Sends `action`, optionally waiting for its reply.
    ///
    /// With `wait == true` the future resolves after the correlated reply
    /// has been stored in `action` (read it with
    /// [`Action::return_code`]). A non-zero return code is not an error
    /// here; the caller decides what it means.
    ///
    /// With `wait == false` the future resolves once the frame is queued.
    /// The action's return code is then left at its default and means
    /// nothing.
    ///
    /// # Errors
    /// - [`TransportError::Protocol`] if the action cannot be encoded.
    /// - [`TransportError::ConnectionClosed`] if the link is gone, or goes
    ///   away before the reply arrives.
    pub async fn request(&self, action: &mut Action, wait: bool) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(self.closed_error());
        }
        let correlation = self.next_correlation.fetch_add(1, Ordering::Relaxed);
        let frame = action.encode(correlation)?;
        tracing::trace!(
            link_id = %self.link_id,
            action = %action.action_type(),
            session = action.session_id(),
            correlation,
            wait,
            "dispatching action"
        );

        if !wait {
            return self
                .commands
                .send(Command::Send {
                    correlation,
                    frame,
                    reply: None,
                })
                .map_err(|_| self.closed_error());
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::Send {
                correlation,
                frame,
                reply: Some(reply_tx),
            })
            .map_err(|_| self.closed_error())?;
        let reply = reply_rx.await.map_err(|_| self.closed_error())??;
        action.complete(reply);
        Ok(())
    }

    /// Closes the link and stops the actor. Pending requests fail.
    pub async fn shutdown(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .commands
            .send(Command::Shutdown { reply: reply_tx })
            .is_ok()
        {
            let _ = reply_rx.await;
        }
        self.closed.store(true, Ordering::Release);
    }
}

/// Why the actor loop ended.
enum Stop {
    Requested(oneshot::Sender<()>),
    HandleDropped,
    LinkClosed(String),
}

/// The actor state. Runs inside a Tokio task.
struct DispatchActor<L: Link> {
    link: L,
    commands: mpsc::UnboundedReceiver<Command>,
    pending: HashMap<u32, ReplySender>,
    closed: Arc<AtomicBool>,
}

impl<L: Link> DispatchActor<L> {
    async fn run(mut self) {
        let link_id = self.link.id();
        let stop = loop {
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(Command::Send { correlation, frame, reply }) => {
                        if let Err(reason) = self.handle_send(correlation, &frame, reply).await {
                            break Stop::LinkClosed(reason);
                        }
                    }
                    Some(Command::Shutdown { reply }) => break Stop::Requested(reply),
                    None => break Stop::HandleDropped,
                },
                incoming = self.link.recv() => match incoming {
                    Ok(Some(data)) => self.handle_incoming(&data),
                    Ok(None) => break Stop::LinkClosed("closed by peer".into()),
                    Err(e) => break Stop::LinkClosed(e.to_string()),
                },
            }
        };

        self.closed.store(true, Ordering::Release);
        let reason = match &stop {
            Stop::Requested(_) | Stop::HandleDropped => "dispatcher shut down".to_string(),
            Stop::LinkClosed(reason) => {
                tracing::warn!(%link_id, %reason, "link lost");
                reason.clone()
            }
        };
        if let Err(e) = self.link.close().await {
            tracing::debug!(%link_id, error = %e, "closing link failed");
        }
        self.fail_pending(&reason);
        // Requests queued after the loop ended are dropped with the
        // receiver, which resolves their reply channels as closed.
        drop(self.commands);
        if let Stop::Requested(reply) = stop {
            let _ = reply.send(());
        }
        tracing::debug!(%link_id, "dispatcher stopped");
    }

    /// Writes one frame. Returns `Err` when the link is unusable.
    async fn handle_send(
        &mut self,
        correlation: u32,
        frame: &[u8],
        reply: Option<ReplySender>,
    ) -> Result<(), String> {
        if let Some(reply) = reply {
            // Registered before writing so a fast reply always finds it.
            self.pending.insert(correlation, reply);
        }
        if let Err(e) = self.link.send(frame).await {
            let reason = e.to_string();
            if let Some(reply) = self.pending.remove(&correlation) {
                let _ = reply.send(Err(e));
            }
            return Err(reason);
        }
        Ok(())
    }

    fn handle_incoming(&mut self, data: &[u8]) {
        let frame = match Frame::decode(data) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(link_id = %self.link.id(), error = %e, "dropping undecodable frame");
                return;
            }
        };
        if frame.action_type != ActionType::Reply {
            tracing::trace!(action = %frame.action_type, "ignoring unsolicited frame");
            return;
        }
        match self.pending.remove(&frame.correlation) {
            Some(reply) => {
                let _ = reply.send(Ok(frame));
            }
            None => {
                tracing::debug!(correlation = frame.correlation, "reply for unknown request");
            }
        }
    }

    fn fail_pending(&mut self, reason: &str) {
        for (_, reply) in self.pending.drain() {
            let _ = reply.send(Err(TransportError::ConnectionClosed(reason.to_string())));
        }
    }
}

#[cfg(test)]
mod tests {
    use sightwire_protocol::{ReturnCode, Value};

    use super::*;
    use crate::memory_pair;

    async fn answer_next(broker: &crate::MemoryLink, rc: ReturnCode, fields: Vec<Value>) -> Frame {
        let bytes = broker.recv().await.unwrap().unwrap();
        let request = Frame::decode(&bytes).unwrap();
        let reply = Frame::reply(&request, rc, fields).encode().unwrap();
        broker.send(&reply).await.unwrap();
        request
    }

    #[tokio::test]
    async fn test_request_wait_stores_reply() {
        let (client, broker) = memory_pair();
        let dispatcher = Dispatcher::spawn(client);

        let server = tokio::spawn(async move {
            answer_next(&broker, ReturnCode::NOT_FOUND, vec![Value::Int(12)]).await
        });

        let mut action = Action::new(ActionType::CreateSession, 0);
        dispatcher.request(&mut action, true).await.unwrap();

        assert_eq!(action.return_code(), ReturnCode::NOT_FOUND);
        assert_eq!(action.response_int(0), Some(12));
        let request = server.await.unwrap();
        assert_eq!(request.action_type, ActionType::CreateSession);
    }

    #[tokio::test]
    async fn test_request_no_wait_returns_without_reply() {
        let (client, broker) = memory_pair();
        let dispatcher = Dispatcher::spawn(client);

        let mut action = Action::new(ActionType::Message, 3).with_item(1);
        dispatcher.request(&mut action, false).await.unwrap();

        let frame = Frame::decode(&broker.recv().await.unwrap().unwrap()).unwrap();
        assert_eq!(frame.action_type, ActionType::Message);
        assert_eq!(frame.session_id, 3);
    }

    #[tokio::test]
    async fn test_replies_route_by_correlation() {
        let (client, broker) = memory_pair();
        let dispatcher = Arc::new(Dispatcher::spawn(client));

        let d1 = Arc::clone(&dispatcher);
        let first = tokio::spawn(async move {
            let mut action = Action::new(ActionType::CreateProducer, 1);
            d1.request(&mut action, true).await.map(|()| action.response_int(0))
        });
        let d2 = Arc::clone(&dispatcher);
        let second = tokio::spawn(async move {
            let mut action = Action::new(ActionType::CreateProducer, 2);
            d2.request(&mut action, true).await.map(|()| action.response_int(0))
        });

        // Read both requests, then answer in reverse order, echoing the
        // session id so each caller can check it got its own reply.
        let a = Frame::decode(&broker.recv().await.unwrap().unwrap()).unwrap();
        let b = Frame::decode(&broker.recv().await.unwrap().unwrap()).unwrap();
        for request in [&b, &a] {
            let id = i32::try_from(request.session_id).unwrap();
            let reply = Frame::reply(request, ReturnCode::OK, vec![Value::Int(id)]);
            broker.send(&reply.encode().unwrap()).await.unwrap();
        }

        assert_eq!(first.await.unwrap().unwrap(), Some(1));
        assert_eq!(second.await.unwrap().unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_pending_request_fails_when_link_drops() {
        let (client, broker) = memory_pair();
        let dispatcher = Dispatcher::spawn(client);

        let closer = tokio::spawn(async move {
            let _ = broker.recv().await;
            broker.close().await.unwrap();
            broker
        });

        let mut action = Action::new(ActionType::CreateConsumer, 1);
        let err = dispatcher.request(&mut action, true).await.unwrap_err();
        assert!(matches!(err, TransportError::ConnectionClosed(_)));

        let _broker = closer.await.unwrap();
        assert!(dispatcher.is_closed());
        let mut again = Action::new(ActionType::CreateConsumer, 1);
        assert!(dispatcher.request(&mut again, true).await.is_err());
    }

    #[tokio::test]
    async fn test_request_after_shutdown_fails() {
        let (client, _broker) = memory_pair();
        let dispatcher = Dispatcher::spawn(client);
        dispatcher.shutdown().await;

        assert!(dispatcher.is_closed());
        let mut action = Action::new(ActionType::CloseSession, 1);
        let err = dispatcher.request(&mut action, false).await.unwrap_err();
        assert!(matches!(err, TransportError::ConnectionClosed(_)));
    }

    #[tokio::test]
    async fn test_header_mismatch_surfaces_as_protocol_error() {
        let (client, _broker) = memory_pair();
        let dispatcher = Dispatcher::spawn(client);

        let mut action = Action::new(ActionType::CreateConsumer, 1);
        action.set_header_count(1);
        let err = dispatcher.request(&mut action, true).await.unwrap_err();
        assert!(matches!(err, TransportError::Protocol(_)));
    }
}
