//! A scriptable in-memory broker for tests.
//!
//! [`StubBroker`] sits on the far end of a [`memory_pair`]. Every frame it
//! receives is decoded and recorded, then handed to a responder closure
//! that decides the reply. Replies may be delayed; while a reply is
//! delayed the request counts as "in flight" for its session, and the
//! broker remembers the highest such count it has seen per session.
//!
//! ```rust,ignore
//! let (link, broker) = StubBroker::start(|frame| match frame.action_type {
//!     ActionType::CreateDurable => Some(Reply::rc(ReturnCode::DESTINATION_IN_USE)),
//!     _ => default_reply(frame),
//! });
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use sightwire_protocol::{ActionType, Frame, ReturnCode, Value};

use crate::{Link, MemoryLink, memory_pair};

/// What the broker sends back for one request.
#[derive(Debug, Clone)]
pub struct Reply {
    pub return_code: ReturnCode,
    pub fields: Vec<Value>,
    pub delay: Duration,
}

impl Reply {
    /// A successful reply with no fields.
    pub fn ok() -> Self {
        Self::rc(ReturnCode::OK)
    }

    /// A reply carrying `rc` and no fields.
    pub fn rc(return_code: ReturnCode) -> Self {
        Self {
            return_code,
            fields: Vec::new(),
            delay: Duration::ZERO,
        }
    }

    /// Adds reply fields.
    pub fn with_fields(mut self, fields: Vec<Value>) -> Self {
        self.fields = fields;
        self
    }

    /// Holds the reply back for `delay`.
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// The reply a well-behaved broker would give.
///
/// Fire-and-forget sends get no reply. Actions that create something
/// reply with an `Int` ID (the request's correlation number, which is
/// unique per connection). Everything else gets a bare success.
pub fn default_reply(frame: &Frame) -> Option<Reply> {
    match frame.action_type {
        t if t.is_fire_and_forget() => None,
        ActionType::CreateSession | ActionType::CreateProducer | ActionType::CreateConsumer
        | ActionType::CreateDurable => {
            let id = i32::try_from(frame.correlation).unwrap_or(i32::MAX);
            Some(Reply::ok().with_fields(vec![Value::Int(id)]))
        }
        _ => Some(Reply::ok()),
    }
}

type Responder = dyn Fn(&Frame) -> Option<Reply> + Send + Sync;

#[derive(Default)]
struct Record {
    frames: Vec<Frame>,
    in_flight: HashMap<u32, usize>,
    peak: HashMap<u32, usize>,
}

fn lock(record: &Mutex<Record>) -> MutexGuard<'_, Record> {
    record.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Handle to a running stub broker.
#[derive(Clone)]
pub struct StubBroker {
    record: Arc<Mutex<Record>>,
}

impl StubBroker {
    /// Starts a broker and returns the client end of its link.
    pub fn start(
        responder: impl Fn(&Frame) -> Option<Reply> + Send + Sync + 'static,
    ) -> (MemoryLink, StubBroker) {
        let (client, server) = memory_pair();
        let broker = Self::serve(server, responder);
        (client, broker)
    }

    /// Starts a broker that answers like [`default_reply`].
    pub fn start_default() -> (MemoryLink, StubBroker) {
        Self::start(default_reply)
    }

    /// Serves an existing link.
    pub fn serve(
        link: MemoryLink,
        responder: impl Fn(&Frame) -> Option<Reply> + Send + Sync + 'static,
    ) -> StubBroker {
        let record = Arc::new(Mutex::new(Record::default()));
        let responder: Arc<Responder> = Arc::new(responder);
        let link = Arc::new(link);
        let broker = StubBroker {
            record: Arc::clone(&record),
        };
        tokio::spawn(async move {
            while let Ok(Some(bytes)) = link.recv().await {
                let frame = match Frame::decode(&bytes) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::warn!(error = %e, "stub broker got an undecodable frame");
                        continue;
                    }
                };
                lock(&record).frames.push(frame.clone());
                let Some(reply) = responder(&frame) else {
                    continue;
                };
                tokio::spawn(respond(Arc::clone(&link), Arc::clone(&record), frame, reply));
            }
        });
        broker
    }

    /// Every frame received so far, in arrival order.
    pub fn frames(&self) -> Vec<Frame> {
        lock(&self.record).frames.clone()
    }

    /// Frames of one action type, in arrival order.
    pub fn frames_of(&self, action_type: ActionType) -> Vec<Frame> {
        lock(&self.record)
            .frames
            .iter()
            .filter(|f| f.action_type == action_type)
            .cloned()
            .collect()
    }

    /// The most requests that were ever awaiting a reply at once for
    /// `session_id`.
    pub fn peak_in_flight(&self, session_id: u32) -> usize {
        lock(&self.record).peak.get(&session_id).copied().unwrap_or(0)
    }
}

async fn respond(link: Arc<MemoryLink>, record: Arc<Mutex<Record>>, frame: Frame, reply: Reply) {
    let session = frame.session_id;
    {
        let mut rec = lock(&record);
        let now = {
            let count = rec.in_flight.entry(session).or_insert(0);
            *count += 1;
            *count
        };
        let peak = rec.peak.entry(session).or_insert(0);
        *peak = (*peak).max(now);
    }
    if !reply.delay.is_zero() {
        tokio::time::sleep(reply.delay).await;
    }
    if let Some(count) = lock(&record).in_flight.get_mut(&session) {
        *count = count.saturating_sub(1);
    }
    let bytes = match Frame::reply(&frame, reply.return_code, reply.fields).encode() {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(error = %e, "stub broker could not encode reply");
            return;
        }
    };
    let _ = link.send(&bytes).await;
}

#[cfg(test)]
mod tests {
    use sightwire_protocol::Action;

    use super::*;
    use crate::Dispatcher;

    #[tokio::test]
    async fn test_default_reply_assigns_ids() {
        let (link, broker) = StubBroker::start_default();
        let dispatcher = Dispatcher::spawn(link);

        let mut action = Action::new(ActionType::CreateSession, 0);
        dispatcher.request(&mut action, true).await.unwrap();

        assert!(action.return_code().is_ok());
        assert!(action.response_int(0).is_some());
        assert_eq!(broker.frames_of(ActionType::CreateSession).len(), 1);
    }

    #[tokio::test]
    async fn test_scripted_return_code() {
        let (link, _broker) = StubBroker::start(|frame| match frame.action_type {
            ActionType::CreateDurable => Some(Reply::rc(ReturnCode::SHARE_MISMATCH)),
            _ => default_reply(frame),
        });
        let dispatcher = Dispatcher::spawn(link);

        let mut action = Action::new(ActionType::CreateDurable, 4);
        dispatcher.request(&mut action, true).await.unwrap();
        assert_eq!(action.return_code(), ReturnCode::SHARE_MISMATCH);
    }

    #[tokio::test]
    async fn test_peak_in_flight_counts_overlap() {
        let (link, broker) = StubBroker::start(|frame| {
            default_reply(frame).map(|r| r.delayed(Duration::from_millis(20)))
        });
        let dispatcher = Arc::new(Dispatcher::spawn(link));

        let mut handles = Vec::new();
        for _ in 0..3 {
            let d = Arc::clone(&dispatcher);
            handles.push(tokio::spawn(async move {
                let mut action = Action::new(ActionType::CommitSession, 9);
                d.request(&mut action, true).await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        // Unserialized requests overlap at the broker.
        assert!(broker.peak_in_flight(9) > 1);
        assert_eq!(broker.peak_in_flight(10), 0);
    }
}
