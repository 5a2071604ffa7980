//! The producer send path.
//!
//! A send goes through these steps:
//!
//! 1. Resolve and validate the destination.
//! 2. Stamp the message: delivery mode, priority, timestamp, expiration,
//!    delivery time, destination and a fresh message ID.
//! 3. Decide whether to wait for the broker. Persistent messages, sends in
//!    a transacted session that does not allow asynchronous sends, and
//!    sends with a completion listener wait; everything else is
//!    fire-and-forget.
//! 4. Build the send action and dispatch it. Waited sends hold the
//!    session's send lock until the reply is in.
//! 5. Map a non-zero return code to a failure, or hand the outcome to the
//!    completion listener.
//!
//! ```text
//! header := domain:byte  destination:string  message-type:byte
//!           flags:byte  priority:byte
//! flags  := 0x01 persistent | 0x02 ack disabled | 0x04 expiration or
//!           delivery time set | 0x08 retain
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use sightwire_protocol::{Action, ActionType, Domain, PropertyMap, ProtocolError, ReturnCode};

use crate::callback::{CompletionEvent, CompletionListener};
use crate::failures::{self, SendContext};
use crate::message::Stamp;
use crate::session::SessionInner;
use crate::{
    DeliveryMode, Destination, DestinationKind, ForeignMessage, Message, MessageIdGenerator,
    SessionError, SharedMessage,
};

const FLAG_PERSISTENT: i8 = 0x01;
const FLAG_DISABLE_ACK: i8 = 0x02;
const FLAG_EXPIRE_SET: i8 = 0x04;
const FLAG_RETAIN: i8 = 0x08;

/// Property names owned by the send path.
const SYSTEM_PROPERTIES: [&str; 5] = [
    "JMSMessageID",
    "JMSTimestamp",
    "JMSExpiration",
    "JMSDeliveryTime",
    "JMSCorrelationID",
];

/// Sends messages.
///
/// A producer created with a destination is bound to it and is known to
/// the broker by its ID. A producer created without one is anonymous and
/// names the destination on every send.
pub struct Producer {
    id: Option<u32>,
    destination: Option<Destination>,
    session: Arc<SessionInner>,
    delivery_mode: DeliveryMode,
    priority: u8,
    time_to_live: u64,
    delivery_delay: u64,
    disable_message_id: bool,
    disable_timestamp: bool,
    ids: Mutex<MessageIdGenerator>,
    spare: Mutex<Option<Action>>,
    closed: AtomicBool,
}

/// A validated send target.
struct Target<'a> {
    destination: &'a Destination,
    name: &'a str,
    domain: Domain,
}

impl Producer {
    pub(crate) async fn create(
        session: &Arc<SessionInner>,
        destination: Option<Destination>,
    ) -> Result<Self, SessionError> {
        session.ensure_open()?;
        let connection = session.connection();

        let id = match &destination {
            Some(dest) => {
                let target = validate(dest)?;
                let mut action = session.action(ActionType::CreateProducer);
                action.put_byte(target.domain.code())?;
                action.put_str(Some(target.name))?;
                action.set_header_count(2);
                let mut props = PropertyMap::new();
                props.insert("ObjectType", if target.domain.is_topic() { "topic" } else { "queue" });
                props.insert("Name", target.name);
                action.put_properties(&props)?;
                session.request_locked(&mut action).await?;

                let rc = action.return_code();
                if !rc.is_ok() {
                    let failure =
                        failures::create_producer_failure(rc, target.name, connection.client_id());
                    tracing::debug!(
                        session_id = session.id(),
                        code = failure.code(),
                        %rc,
                        destination = %dest,
                        "producer refused"
                    );
                    return Err(failure.into());
                }
                let id = action
                    .response_int(0)
                    .and_then(|id| u32::try_from(id).ok())
                    .ok_or_else(|| {
                        ProtocolError::InvalidMessage("create-producer reply has no producer id".into())
                    })?;
                Some(id)
            }
            None => None,
        };

        let settings = connection.settings();
        tracing::debug!(
            session_id = session.id(),
            producer_id = ?id,
            destination = ?destination.as_ref().map(ToString::to_string),
            "producer created"
        );
        Ok(Self {
            id,
            destination,
            session: Arc::clone(session),
            delivery_mode: settings.delivery_mode,
            priority: settings.priority.min(9),
            time_to_live: settings.time_to_live,
            delivery_delay: settings.delivery_delay,
            disable_message_id: settings.disable_message_id,
            disable_timestamp: settings.disable_timestamp,
            ids: Mutex::new(MessageIdGenerator::new(connection.client_id())),
            spare: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    // -- settings -----------------------------------------------------------

    /// The broker-assigned ID; `None` for an anonymous producer.
    pub fn id(&self) -> Option<u32> {
        self.id
    }

    pub fn destination(&self) -> Option<&Destination> {
        self.destination.as_ref()
    }

    pub fn delivery_mode(&self) -> DeliveryMode {
        self.delivery_mode
    }

    pub fn set_delivery_mode(&mut self, mode: DeliveryMode) {
        self.delivery_mode = mode;
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    /// Sets the priority, 0 to 9. Anything else fails with CWLNC0036.
    pub fn set_priority(&mut self, priority: u8) -> Result<(), SessionError> {
        if priority > 9 {
            return Err(failures::invalid_priority(priority).into());
        }
        self.priority = priority;
        Ok(())
    }

    pub fn time_to_live(&self) -> u64 {
        self.time_to_live
    }

    /// Milliseconds until a sent message expires. 0 disables expiry.
    pub fn set_time_to_live(&mut self, millis: u64) {
        self.time_to_live = millis;
    }

    pub fn delivery_delay(&self) -> u64 {
        self.delivery_delay
    }

    pub fn set_delivery_delay(&mut self, millis: u64) {
        self.delivery_delay = millis;
    }

    pub fn disable_message_id(&self) -> bool {
        self.disable_message_id
    }

    /// Skips message IDs. Ignored for sends with a delivery delay, which
    /// always carry an ID.
    pub fn set_disable_message_id(&mut self, disable: bool) {
        self.disable_message_id = disable;
    }

    pub fn disable_timestamp(&self) -> bool {
        self.disable_timestamp
    }

    pub fn set_disable_timestamp(&mut self, disable: bool) {
        self.disable_timestamp = disable;
    }

    /// How many message IDs this producer has issued.
    pub fn message_id_counter(&self) -> u32 {
        self.ids.lock().unwrap_or_else(PoisonError::into_inner).counter()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.session.is_closed()
    }

    fn ensure_open(&self) -> Result<(), SessionError> {
        if self.is_closed() {
            return Err(failures::producer_closed().into());
        }
        Ok(())
    }

    // -- sending ------------------------------------------------------------

    /// Sends `message` to the producer's own destination.
    ///
    /// # Errors
    /// CWLNC0012 for an anonymous producer. Refusals from the broker are
    /// mapped by return code; a destination that is full, for example,
    /// fails with a capacity failure CWLNC0218.
    pub async fn send(&self, message: &mut Message) -> Result<(), SessionError> {
        self.send_inner(None, message, None).await
    }

    /// Sends `message` to `destination` from an anonymous producer.
    ///
    /// # Errors
    /// CWLNC0049 if the producer is bound to a destination.
    pub async fn send_to(
        &self,
        destination: &Destination,
        message: &mut Message,
    ) -> Result<(), SessionError> {
        self.send_inner(Some(destination), message, None).await
    }

    /// Sends and reports the outcome to `listener`.
    ///
    /// The send always waits for the broker. Problems found before the
    /// request is sent are returned; the broker's verdict, and any
    /// connection failure while waiting for it, go to the listener.
    pub async fn send_with_listener(
        &self,
        destination: Option<&Destination>,
        message: &mut Message,
        listener: Arc<dyn CompletionListener>,
    ) -> Result<(), SessionError> {
        self.send_inner(destination, message, Some(listener)).await
    }

    /// Sends a message shared with other tasks, holding its lock for the
    /// whole send.
    pub async fn send_shared(
        &self,
        destination: Option<&Destination>,
        message: &SharedMessage,
    ) -> Result<(), SessionError> {
        let mut guard = message.lock().await;
        self.send_inner(destination, &mut guard, None).await
    }

    /// Sends a message from another provider.
    ///
    /// Its content is copied into a native message. After a successful
    /// send the stamped header fields are written back to `message`;
    /// failures while writing back are logged and ignored.
    pub async fn send_foreign(
        &self,
        destination: Option<&Destination>,
        message: &mut dyn ForeignMessage,
    ) -> Result<(), SessionError> {
        let mut native = Message::from_foreign(message);
        self.send_inner(destination, &mut native, None).await?;
        copy_back(&native, message);
        Ok(())
    }

    async fn send_inner(
        &self,
        destination: Option<&Destination>,
        message: &mut Message,
        listener: Option<Arc<dyn CompletionListener>>,
    ) -> Result<(), SessionError> {
        self.ensure_open()?;
        let target = self.resolve(destination)?;

        let stamp = self.stamp(target.destination);
        message.stamp(&stamp);

        let session = &self.session;
        let wait = stamp.delivery_mode == DeliveryMode::Persistent
            || (session.transacted() && !session.async_send_allowed())
            || listener.is_some();
        let action_type = match (self.id.is_some(), wait) {
            (true, true) => ActionType::MessageWait,
            (true, false) => ActionType::Message,
            (false, true) => ActionType::MessageNoProducerWait,
            (false, false) => ActionType::MessageNoProducer,
        };
        let disable_ack = target
            .destination
            .disable_ack()
            .unwrap_or_else(|| session.disable_ack());

        let mut action = self.take_action(action_type);
        let built = build_send(&mut action, &target, message, &stamp, disable_ack);
        if let Err(e) = built {
            self.return_action(action);
            return Err(e);
        }

        let outcome = if wait {
            let _lock = session.lock_send().await;
            match self.ensure_open() {
                Ok(()) => session.request(&mut action, true).await,
                Err(e) => Err(e),
            }
        } else {
            session.request(&mut action, false).await
        };
        let rc = if wait { action.return_code() } else { ReturnCode::OK };
        self.return_action(action);

        let outcome = outcome.and_then(|()| {
            if rc.is_ok() {
                return Ok(());
            }
            let ctx = SendContext {
                domain: target.domain,
                destination: target.name,
                producer_id: self.id,
                endpoint: session.connection().dispatcher().peer(),
            };
            let failure = failures::send_failure(rc, &ctx);
            tracing::debug!(
                session_id = session.id(),
                code = failure.code(),
                %rc,
                destination = target.name,
                "send refused"
            );
            Err(failure.into())
        });

        match listener {
            Some(listener) => {
                session.connection().post_completion(CompletionEvent {
                    listener,
                    message: message.clone(),
                    outcome,
                });
                Ok(())
            }
            None => outcome,
        }
    }

    /// Picks the destination for one send.
    fn resolve<'a>(&'a self, given: Option<&'a Destination>) -> Result<Target<'a>, SessionError> {
        match (&self.destination, given) {
            (Some(_), Some(_)) => {
                Err(failures::producer_has_destination(self.id.unwrap_or_default()).into())
            }
            (Some(own), None) => validate(own),
            (None, Some(given)) => validate(given),
            (None, None) => Err(failures::no_destination().into()),
        }
    }

    fn stamp(&self, destination: &Destination) -> Stamp {
        let (timestamp, expiration, delivery_time) = if self.disable_timestamp {
            (0, 0, 0)
        } else {
            let now = now_millis();
            let after = |millis: u64| {
                if millis == 0 {
                    0
                } else {
                    now.saturating_add(i64::try_from(millis).unwrap_or(i64::MAX))
                }
            };
            (now, after(self.time_to_live), after(self.delivery_delay))
        };
        let message_id = (!self.disable_message_id || self.delivery_delay > 0).then(|| {
            self.ids
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .next_id()
        });
        Stamp {
            delivery_mode: self.delivery_mode,
            priority: self.priority,
            timestamp,
            expiration,
            delivery_time,
            destination: destination.clone(),
            message_id,
        }
    }

    fn take_action(&self, action_type: ActionType) -> Action {
        let item = self.id.unwrap_or_default();
        let spare = self
            .spare
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match spare {
            Some(mut action) => {
                action.reset(action_type, item);
                action
            }
            None => self.session.action(action_type).with_item(item),
        }
    }

    fn return_action(&self, action: Action) {
        *self.spare.lock().unwrap_or_else(PoisonError::into_inner) = Some(action);
    }

    /// Closes the producer. Closing twice is a no-op.
    pub async fn close(&self) -> Result<(), SessionError> {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
            || self.session.is_closed()
        {
            return Ok(());
        }
        let Some(id) = self.id else {
            return Ok(());
        };
        let mut action = self.session.action(ActionType::CloseProducer).with_item(id);
        self.session.request_locked(&mut action).await?;
        if !action.return_code().is_ok() {
            tracing::warn!(producer_id = id, rc = %action.return_code(), "broker refused producer close");
        }
        Ok(())
    }
}

impl fmt::Debug for Producer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer")
            .field("id", &self.id)
            .field("session", &self.session.id())
            .field("destination", &self.destination)
            .field("delivery_mode", &self.delivery_mode)
            .field("priority", &self.priority)
            .finish()
    }
}

fn validate(destination: &Destination) -> Result<Target<'_>, SessionError> {
    if let DestinationKind::Foreign(desc) = destination.kind() {
        return Err(failures::foreign_destination(desc).into());
    }
    let name = destination.name().ok_or_else(failures::unnamed_destination)?;
    let domain = destination
        .domain()
        .ok_or_else(|| failures::foreign_destination(name))?;
    Ok(Target {
        destination,
        name,
        domain,
    })
}

/// Writes header fields, properties and body for one send.
fn build_send(
    action: &mut Action,
    target: &Target<'_>,
    message: &Message,
    stamp: &Stamp,
    disable_ack: bool,
) -> Result<(), SessionError> {
    let mut flags = 0;
    if stamp.delivery_mode == DeliveryMode::Persistent {
        flags |= FLAG_PERSISTENT;
    }
    if disable_ack {
        flags |= FLAG_DISABLE_ACK;
    }
    if stamp.expire_set() {
        flags |= FLAG_EXPIRE_SET;
    }
    if message.retain() {
        flags |= FLAG_RETAIN;
    }

    action.put_byte(target.domain.code())?;
    action.put_str(Some(target.name))?;
    action.put_byte(message.message_type().code())?;
    action.put_byte(flags)?;
    action.put_byte(i8::try_from(stamp.priority).unwrap_or(9))?;
    action.set_header_count(5);
    action.put_properties(&system_properties(message))?;
    action.set_body(message.body().map(<[u8]>::to_vec));
    Ok(())
}

/// The stamped header fields, then the user properties.
fn system_properties(message: &Message) -> PropertyMap {
    let mut props = PropertyMap::new();
    if let Some(id) = message.message_id() {
        props.insert("JMSMessageID", id);
    }
    if message.timestamp() != 0 {
        props.insert("JMSTimestamp", message.timestamp());
    }
    if message.expiration() != 0 {
        props.insert("JMSExpiration", message.expiration());
    }
    if message.delivery_time() != 0 {
        props.insert("JMSDeliveryTime", message.delivery_time());
    }
    if let Some(correlation) = message.correlation_id() {
        props.insert("JMSCorrelationID", correlation);
    }
    for (name, value) in message.properties().iter() {
        if SYSTEM_PROPERTIES.contains(&name) {
            tracing::debug!(property = name, "user property shadows a stamped header, dropped");
            continue;
        }
        props.insert(name, value.clone());
    }
    props
}

fn copy_back(native: &Message, foreign: &mut dyn ForeignMessage) {
    let results = [
        ("message id", foreign.set_message_id(native.message_id())),
        ("timestamp", foreign.set_timestamp(native.timestamp())),
        ("expiration", foreign.set_expiration(native.expiration())),
        ("delivery mode", foreign.set_delivery_mode(native.delivery_mode())),
        ("priority", foreign.set_priority(native.priority())),
    ];
    for (field, result) in results {
        if let Err(e) = result {
            tracing::debug!(field, error = %e, "could not copy a sent field back to a foreign message");
        }
    }
    if let Some(dest) = native.destination() {
        if let Err(e) = foreign.set_destination(dest) {
            tracing::debug!(field = "destination", error = %e, "could not copy a sent field back to a foreign message");
        }
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
}
