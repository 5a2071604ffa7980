//! Messages and destinations.
//!
//! [`Message`] is the native message: header fields the send path stamps,
//! user properties, and an opaque body. [`ForeignMessage`] lets a message
//! from another provider be sent too; it is copied into a native message
//! first and the stamped header fields are copied back afterwards.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sightwire_protocol::{Domain, PropertyMap};
use tokio::sync::{Mutex, MutexGuard};

// ---------------------------------------------------------------------------
// DeliveryMode
// ---------------------------------------------------------------------------

/// Whether the broker must persist a message before acknowledging it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    NonPersistent,
    #[default]
    Persistent,
}

impl DeliveryMode {
    pub(crate) fn code(self) -> i8 {
        match self {
            Self::NonPersistent => 1,
            Self::Persistent => 2,
        }
    }
}

// ---------------------------------------------------------------------------
// MessageType
// ---------------------------------------------------------------------------

/// The body shape of a message. Only the tag travels in the header; the
/// body itself is opaque bytes here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageType {
    /// No body.
    #[default]
    Plain,
    Bytes,
    Map,
    Object,
    Stream,
    Text,
}

impl MessageType {
    pub(crate) fn code(self) -> i8 {
        match self {
            Self::Plain => 0,
            Self::Bytes => 1,
            Self::Map => 2,
            Self::Object => 3,
            Self::Stream => 4,
            Self::Text => 5,
        }
    }
}

// ---------------------------------------------------------------------------
// Destination
// ---------------------------------------------------------------------------

/// What kind of destination a [`Destination`] names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestinationKind {
    Queue,
    Topic,
    TemporaryQueue,
    TemporaryTopic,
    /// A destination object from another provider. The string describes
    /// it for diagnostics; it cannot be sent to.
    Foreign(String),
}

/// A queue or topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    kind: DestinationKind,
    name: Option<String>,
    disable_ack: Option<bool>,
}

impl Destination {
    pub fn queue(name: impl Into<String>) -> Self {
        Self::named(DestinationKind::Queue, name)
    }

    pub fn topic(name: impl Into<String>) -> Self {
        Self::named(DestinationKind::Topic, name)
    }

    pub fn temporary_queue(name: impl Into<String>) -> Self {
        Self::named(DestinationKind::TemporaryQueue, name)
    }

    pub fn temporary_topic(name: impl Into<String>) -> Self {
        Self::named(DestinationKind::TemporaryTopic, name)
    }

    /// A destination of the given kind with no name set yet.
    pub fn unnamed(kind: DestinationKind) -> Self {
        Self {
            kind,
            name: None,
            disable_ack: None,
        }
    }

    /// Wraps a destination from another provider.
    pub fn foreign(description: impl Into<String>) -> Self {
        Self::unnamed(DestinationKind::Foreign(description.into()))
    }

    fn named(kind: DestinationKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: Some(name.into()),
            disable_ack: None,
        }
    }

    /// Overrides the session's disable-ACK setting for sends here.
    pub fn with_disable_ack(mut self, disable_ack: bool) -> Self {
        self.disable_ack = Some(disable_ack);
        self
    }

    pub fn kind(&self) -> &DestinationKind {
        &self.kind
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn disable_ack(&self) -> Option<bool> {
        self.disable_ack
    }

    /// The delivery domain. `None` for foreign destinations.
    pub fn domain(&self) -> Option<Domain> {
        match self.kind {
            DestinationKind::Queue | DestinationKind::TemporaryQueue => Some(Domain::Queue),
            DestinationKind::Topic | DestinationKind::TemporaryTopic => Some(Domain::Topic),
            DestinationKind::Foreign(_) => None,
        }
    }

    pub fn is_topic(&self) -> bool {
        matches!(
            self.kind,
            DestinationKind::Topic | DestinationKind::TemporaryTopic
        )
    }

    pub fn is_temporary(&self) -> bool {
        matches!(
            self.kind,
            DestinationKind::TemporaryQueue | DestinationKind::TemporaryTopic
        )
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.kind {
            DestinationKind::Queue => "queue",
            DestinationKind::Topic => "topic",
            DestinationKind::TemporaryQueue => "temporary queue",
            DestinationKind::TemporaryTopic => "temporary topic",
            DestinationKind::Foreign(desc) => return write!(f, "foreign({desc})"),
        };
        write!(f, "{kind} {}", self.name.as_deref().unwrap_or("<unnamed>"))
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A native message.
///
/// Timestamps are milliseconds since the Unix epoch; zero means unset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    message_type: MessageType,
    message_id: Option<String>,
    timestamp: i64,
    expiration: i64,
    delivery_time: i64,
    delivery_mode: DeliveryMode,
    priority: u8,
    destination: Option<Destination>,
    correlation_id: Option<String>,
    retain: bool,
    properties: PropertyMap,
    body: Option<Vec<u8>>,
}

impl Message {
    /// A message with no body.
    pub fn new() -> Self {
        Self {
            priority: 4,
            ..Self::default()
        }
    }

    /// A text message.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            message_type: MessageType::Text,
            body: Some(text.into().into_bytes()),
            ..Self::new()
        }
    }

    /// A bytes message.
    pub fn bytes(body: impl Into<Vec<u8>>) -> Self {
        Self {
            message_type: MessageType::Bytes,
            body: Some(body.into()),
            ..Self::new()
        }
    }

    /// Copies a foreign message's content into a native one.
    pub fn from_foreign(foreign: &dyn ForeignMessage) -> Self {
        Self {
            message_type: foreign.message_type(),
            correlation_id: foreign.correlation_id(),
            properties: foreign.properties(),
            body: foreign.body(),
            ..Self::new()
        }
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    /// Assigned by the producer on send, unless IDs are disabled.
    pub fn message_id(&self) -> Option<&str> {
        self.message_id.as_deref()
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn expiration(&self) -> i64 {
        self.expiration
    }

    pub fn delivery_time(&self) -> i64 {
        self.delivery_time
    }

    pub fn delivery_mode(&self) -> DeliveryMode {
        self.delivery_mode
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn destination(&self) -> Option<&Destination> {
        self.destination.as_ref()
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    pub fn set_correlation_id(&mut self, id: Option<String>) {
        self.correlation_id = id;
    }

    pub fn retain(&self) -> bool {
        self.retain
    }

    /// Asks the broker to keep this message as the topic's retained message.
    pub fn set_retain(&mut self, retain: bool) {
        self.retain = retain;
    }

    pub fn properties(&self) -> &PropertyMap {
        &self.properties
    }

    pub fn properties_mut(&mut self) -> &mut PropertyMap {
        &mut self.properties
    }

    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    pub fn set_body(&mut self, message_type: MessageType, body: Option<Vec<u8>>) {
        self.message_type = message_type;
        self.body = body;
    }

    pub(crate) fn stamp(&mut self, stamp: &Stamp) {
        self.delivery_mode = stamp.delivery_mode;
        self.priority = stamp.priority;
        self.timestamp = stamp.timestamp;
        self.expiration = stamp.expiration;
        self.delivery_time = stamp.delivery_time;
        self.destination = Some(stamp.destination.clone());
        self.message_id = stamp.message_id.clone();
    }
}

/// Header values the send path assigns to a message.
#[derive(Debug, Clone)]
pub(crate) struct Stamp {
    pub delivery_mode: DeliveryMode,
    pub priority: u8,
    pub timestamp: i64,
    pub expiration: i64,
    pub delivery_time: i64,
    pub destination: Destination,
    pub message_id: Option<String>,
}

impl Stamp {
    /// Expiration or delivery time is present.
    pub fn expire_set(&self) -> bool {
        self.expiration != 0 || self.delivery_time != 0
    }
}

// ---------------------------------------------------------------------------
// SharedMessage
// ---------------------------------------------------------------------------

/// A message shared between tasks.
///
/// Sending a shared message holds its lock for the whole stamp-and-send
/// step, so no reader sees a half-stamped message. The message lock is
/// always taken before the session's send lock.
#[derive(Debug, Clone, Default)]
pub struct SharedMessage(Arc<Mutex<Message>>);

impl SharedMessage {
    pub fn new(message: Message) -> Self {
        Self(Arc::new(Mutex::new(message)))
    }

    pub async fn lock(&self) -> MutexGuard<'_, Message> {
        self.0.lock().await
    }
}

// ---------------------------------------------------------------------------
// ForeignMessage
// ---------------------------------------------------------------------------

/// Error type for writes onto a foreign message.
pub type ForeignError = Box<dyn std::error::Error + Send + Sync>;

/// A message object from another provider.
///
/// The send path reads its content, then writes the stamped header fields
/// back. Write-back failures are logged and ignored because the send has
/// already succeeded by then.
pub trait ForeignMessage: Send {
    fn properties(&self) -> PropertyMap;

    fn body(&self) -> Option<Vec<u8>>;

    fn message_type(&self) -> MessageType {
        MessageType::Bytes
    }

    fn correlation_id(&self) -> Option<String> {
        None
    }

    fn set_message_id(&mut self, id: Option<&str>) -> Result<(), ForeignError>;

    fn set_timestamp(&mut self, timestamp: i64) -> Result<(), ForeignError>;

    fn set_expiration(&mut self, expiration: i64) -> Result<(), ForeignError>;

    fn set_delivery_mode(&mut self, _mode: DeliveryMode) -> Result<(), ForeignError> {
        Ok(())
    }

    fn set_priority(&mut self, _priority: u8) -> Result<(), ForeignError> {
        Ok(())
    }

    fn set_destination(&mut self, _destination: &Destination) -> Result<(), ForeignError> {
        Ok(())
    }
}
