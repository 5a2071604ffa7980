//! Consumer and subscription creation.
//!
//! Two request shapes exist:
//!
//! | Consumer kind                  | Action           | Header fields              |
//! |--------------------------------|------------------|----------------------------|
//! | plain (queue or topic)         | `CreateConsumer` | domain, no-local, selector |
//! | durable and/or shared          | `CreateDurable`  | name, selector             |
//!
//! Both carry the consumer's property map. Creating a consumer pauses
//! delivery on the session, so a `ResumeSession` follows it while the send
//! lock is still held.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use sightwire_protocol::{Action, ActionType, Domain, PropertyMap, ProtocolError};

use crate::failures::{self, SubscribeContext};
use crate::session::SessionInner;
use crate::{Destination, DestinationKind, SessionError};

// ---------------------------------------------------------------------------
// ConsumerOptions
// ---------------------------------------------------------------------------

/// What kind of consumer to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerOptions {
    destination: Destination,
    selector: Option<String>,
    no_local: bool,
    durable: bool,
    shared: bool,
    name: Option<String>,
}

impl ConsumerOptions {
    /// A plain consumer on `destination`.
    pub fn new(destination: Destination) -> Self {
        Self {
            destination,
            selector: None,
            no_local: false,
            durable: false,
            shared: false,
            name: None,
        }
    }

    /// Message selector. An empty string means no selector.
    pub fn selector(mut self, selector: Option<&str>) -> Self {
        self.selector = selector.map(str::to_string);
        self
    }

    /// Skip messages published on this connection.
    pub fn no_local(mut self, no_local: bool) -> Self {
        self.no_local = no_local;
        self
    }

    /// Consume from the durable subscription `name`.
    pub fn durable(mut self, name: &str) -> Self {
        self.durable = true;
        self.name = Some(name.to_string());
        self
    }

    /// Consume from the shared subscription `name`.
    pub fn shared(mut self, name: &str) -> Self {
        self.shared = true;
        self.name = Some(name.to_string());
        self
    }
}

// ---------------------------------------------------------------------------
// ConsumerDescriptor
// ---------------------------------------------------------------------------

/// A validated, immutable description of a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerDescriptor {
    destination: Destination,
    dest_name: String,
    domain: Domain,
    selector: Option<String>,
    no_local: bool,
    durable: bool,
    shared: bool,
    name: Option<String>,
}

impl ConsumerDescriptor {
    fn from_options(options: ConsumerOptions) -> Result<Self, SessionError> {
        let dest_name = match (options.destination.kind(), options.destination.name()) {
            (DestinationKind::Foreign(desc), _) => {
                return Err(failures::foreign_destination(desc).into());
            }
            (_, None) => return Err(failures::unnamed_destination().into()),
            (_, Some(name)) => name.to_string(),
        };
        let selector = options.selector.filter(|s| !s.is_empty());
        let subscription = options.durable || options.shared;

        let domain = if subscription {
            if options.destination.is_temporary() && options.destination.is_topic() {
                return Err(failures::temporary_topic_subscription().into());
            }
            if !options.destination.is_topic() {
                let operation = if options.shared {
                    "createSharedConsumer"
                } else {
                    "createDurableConsumer"
                };
                return Err(failures::queue_subscription(operation).into());
            }
            if options.name.as_deref().is_none_or(str::is_empty) {
                return Err(failures::invalid_subscription_name().into());
            }
            match (options.durable, options.shared) {
                (true, true) => Domain::SharedTopic,
                (false, true) => Domain::SharedNonDurableTopic,
                _ => Domain::Topic,
            }
        } else {
            options
                .destination
                .domain()
                .ok_or_else(|| failures::foreign_destination(&dest_name))?
        };

        Ok(Self {
            destination: options.destination,
            dest_name,
            domain,
            selector,
            no_local: options.no_local,
            durable: options.durable,
            shared: options.shared,
            name: if subscription { options.name } else { None },
        })
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    pub fn domain(&self) -> Domain {
        self.domain
    }

    pub fn selector(&self) -> Option<&str> {
        self.selector.as_deref()
    }

    pub fn no_local(&self) -> bool {
        self.no_local
    }

    pub fn is_durable(&self) -> bool {
        self.durable
    }

    pub fn is_shared(&self) -> bool {
        self.shared
    }

    /// The subscription name; `None` for plain consumers.
    pub fn subscription_name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn is_subscription(&self) -> bool {
        self.name.is_some()
    }

    fn properties(&self) -> PropertyMap {
        let mut props = PropertyMap::new();
        props.insert("Name", self.dest_name.as_str());
        props.insert(
            "ObjectType",
            if self.destination.is_topic() { "topic" } else { "queue" },
        );
        props.insert("Durable", self.durable);
        props.insert("Shared", self.shared);
        props.insert("NoLocal", self.no_local);
        if let Some(name) = &self.name {
            props.insert("SubscriptionName", name.as_str());
        }
        props
    }

    fn build_action(&self, session: &SessionInner) -> Result<Action, SessionError> {
        let mut action;
        if let Some(name) = &self.name {
            action = session.action(ActionType::CreateDurable);
            action.put_str(Some(name))?;
            action.put_str(self.selector())?;
            action.set_header_count(2);
        } else {
            action = session.action(ActionType::CreateConsumer);
            action.put_byte(self.domain.code())?;
            action.put_bool(self.no_local)?;
            action.put_str(self.selector())?;
            action.set_header_count(3);
        }
        action.put_properties(&self.properties())?;
        Ok(action)
    }

    /// The client ID shown in failures. Shared subscriptions of a client
    /// with a generated ID live in a common namespace.
    fn reported_client_id<'a>(&self, session: &'a SessionInner) -> &'a str {
        let connection = session.connection();
        match (self.shared, self.durable, connection.is_client_id_generated()) {
            (true, true, true) => "__Shared",
            (true, false, true) => "__SharedND",
            _ => connection.client_id(),
        }
    }
}

// ---------------------------------------------------------------------------
// Creation
// ---------------------------------------------------------------------------

pub(crate) async fn create(
    session: &Arc<SessionInner>,
    options: ConsumerOptions,
) -> Result<Consumer, SessionError> {
    session.ensure_open()?;
    let descriptor = ConsumerDescriptor::from_options(options)?;
    let mut action = descriptor.build_action(session)?;
    let mut resume = session.action(ActionType::ResumeSession);

    {
        let _lock = session.lock_send().await;
        session.ensure_open()?;
        session.request(&mut action, true).await?;
        // A refused subscription still paused delivery.
        if descriptor.is_subscription() || action.return_code().is_ok() {
            session.request(&mut resume, true).await?;
            if !resume.return_code().is_ok() {
                tracing::warn!(
                    session_id = session.id(),
                    rc = %resume.return_code(),
                    "resume after consumer creation refused"
                );
            }
        }
    }

    let rc = action.return_code();
    if !rc.is_ok() {
        let ctx = SubscribeContext {
            target: &descriptor.dest_name,
            subscription: descriptor.subscription_name(),
            client_id: descriptor.reported_client_id(session),
        };
        let failure = failures::subscribe_failure(rc, &ctx);
        tracing::debug!(
            session_id = session.id(),
            code = failure.code(),
            %rc,
            destination = %descriptor.destination,
            "consumer refused"
        );
        return Err(failure.into());
    }

    let id = action
        .response_int(0)
        .and_then(|id| u32::try_from(id).ok())
        .ok_or_else(|| ProtocolError::InvalidMessage("create-consumer reply has no consumer id".into()))?;
    tracing::debug!(
        session_id = session.id(),
        consumer_id = id,
        domain = %descriptor.domain,
        subscription = descriptor.subscription_name(),
        "consumer created"
    );
    Ok(Consumer {
        id,
        descriptor,
        session: Arc::clone(session),
        closed: AtomicBool::new(false),
    })
}

// ---------------------------------------------------------------------------
// Consumer
// ---------------------------------------------------------------------------

/// A consumer registered with the broker.
pub struct Consumer {
    id: u32,
    descriptor: ConsumerDescriptor,
    session: Arc<SessionInner>,
    closed: AtomicBool,
}

impl Consumer {
    /// The broker-assigned consumer ID.
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn descriptor(&self) -> &ConsumerDescriptor {
        &self.descriptor
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.session.is_closed()
    }

    /// Fails with CWLNC0010 once the consumer or its session is closed.
    pub fn ensure_open(&self) -> Result<(), SessionError> {
        if self.is_closed() {
            return Err(failures::consumer_closed().into());
        }
        Ok(())
    }

    /// Closes the consumer. Closing twice is a no-op.
    pub async fn close(&self) -> Result<(), SessionError> {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
            || self.session.is_closed()
        {
            return Ok(());
        }
        let mut action = self.session.action(ActionType::CloseConsumer).with_item(self.id);
        self.session.request_locked(&mut action).await?;
        if !action.return_code().is_ok() {
            tracing::warn!(consumer_id = self.id, rc = %action.return_code(), "broker refused consumer close");
        }
        Ok(())
    }
}

impl fmt::Debug for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("id", &self.id)
            .field("session", &self.session.id())
            .field("descriptor", &self.descriptor)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use sightwire_protocol::FailureCategory;

    use super::*;

    fn code_of(result: Result<ConsumerDescriptor, SessionError>) -> &'static str {
        result.unwrap_err().failure().unwrap().code()
    }

    #[test]
    fn test_from_options_empty_selector_is_none() {
        let d = ConsumerDescriptor::from_options(
            ConsumerOptions::new(Destination::queue("q")).selector(Some("")),
        )
        .unwrap();
        assert_eq!(d.selector(), None);
        assert_eq!(d.domain(), Domain::Queue);
        assert_eq!(d.subscription_name(), None);
    }

    #[test]
    fn test_from_options_shared_domains() {
        let topic = Destination::topic("t");
        let shared_durable = ConsumerDescriptor::from_options(
            ConsumerOptions::new(topic.clone()).durable("s").shared("s"),
        )
        .unwrap();
        let shared = ConsumerDescriptor::from_options(ConsumerOptions::new(topic.clone()).shared("s"))
            .unwrap();
        let durable =
            ConsumerDescriptor::from_options(ConsumerOptions::new(topic).durable("s")).unwrap();

        assert_eq!(shared_durable.domain(), Domain::SharedTopic);
        assert_eq!(shared.domain(), Domain::SharedNonDurableTopic);
        assert_eq!(durable.domain(), Domain::Topic);
        assert_eq!(durable.subscription_name(), Some("s"));
    }

    #[test]
    fn test_from_options_empty_name_fails() {
        let result =
            ConsumerDescriptor::from_options(ConsumerOptions::new(Destination::topic("t")).durable(""));
        assert_eq!(code_of(result), "CWLNC0002");
    }

    #[test]
    fn test_from_options_temporary_topic_subscription_fails() {
        let result = ConsumerDescriptor::from_options(
            ConsumerOptions::new(Destination::temporary_topic("t")).shared("s"),
        );
        assert_eq!(code_of(result), "CWLNC0006");
    }

    #[test]
    fn test_from_options_queue_subscription_is_illegal_state() {
        let err = ConsumerDescriptor::from_options(
            ConsumerOptions::new(Destination::queue("q")).durable("s"),
        )
        .unwrap_err();
        assert_eq!(err.category(), Some(FailureCategory::IllegalState));
    }

    #[test]
    fn test_from_options_bad_destinations_fail() {
        let foreign = ConsumerDescriptor::from_options(ConsumerOptions::new(Destination::foreign("x")));
        let unnamed = ConsumerDescriptor::from_options(ConsumerOptions::new(Destination::unnamed(
            DestinationKind::Topic,
        )));
        assert_eq!(code_of(foreign), "CWLNC0013");
        assert_eq!(code_of(unnamed), "CWLNC0007");
    }

    #[test]
    fn test_properties_name_subscription() {
        let d = ConsumerDescriptor::from_options(
            ConsumerOptions::new(Destination::topic("prices")).durable("audit"),
        )
        .unwrap();
        let props = d.properties();
        assert_eq!(props.get("Name").and_then(|v| v.as_str()), Some("prices"));
        assert_eq!(props.get("SubscriptionName").and_then(|v| v.as_str()), Some("audit"));
        assert_eq!(props.get("Durable").and_then(|v| v.as_bool()), Some(true));
    }
}
