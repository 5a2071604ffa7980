//! Integration tests for consumer and subscription creation.

use std::sync::Arc;
use std::time::Duration;

use sightwire_protocol::{ActionType, Domain, FailureCategory, Frame, ReturnCode, Value};
use sightwire_session::{
    ClientSettings, ConnectionContext, ConsumerOptions, Destination, Session, SessionConfig,
};
use sightwire_transport::Dispatcher;
use sightwire_transport::testing::{Reply, StubBroker, default_reply};

async fn session_for(
    client_id: &str,
    generated: bool,
    responder: impl Fn(&Frame) -> Option<Reply> + Send + Sync + 'static,
) -> (Session, StubBroker) {
    let (link, broker) = StubBroker::start(responder);
    let ctx = ConnectionContext::new(
        client_id.into(),
        generated,
        Dispatcher::spawn(link),
        ClientSettings::default(),
    )
    .expect("context");
    let session = Session::create(&ctx, SessionConfig::default())
        .await
        .expect("session");
    (session, broker)
}

fn refuse_durable(rc: ReturnCode) -> impl Fn(&Frame) -> Option<Reply> + Send + Sync + 'static {
    move |frame| match frame.action_type {
        ActionType::CreateDurable => Some(Reply::rc(rc)),
        _ => default_reply(frame),
    }
}

/// Action types the broker saw after session creation, in order.
fn trail(broker: &StubBroker) -> Vec<ActionType> {
    broker
        .frames()
        .into_iter()
        .map(|f| f.action_type)
        .filter(|t| *t != ActionType::CreateSession)
        .collect()
}

// =========================================================================
// Plain consumers
// =========================================================================

#[tokio::test]
async fn test_create_consumer_sends_fields_then_resumes() {
    let (session, broker) = session_for("client-a", false, default_reply).await;

    let consumer = session
        .create_consumer(&Destination::queue("orders"), Some(""), false)
        .await
        .expect("consumer");

    assert_eq!(trail(&broker), vec![ActionType::CreateConsumer, ActionType::ResumeSession]);
    let frame = &broker.frames_of(ActionType::CreateConsumer)[0];
    assert_eq!(
        frame.fields,
        vec![Value::Byte(Domain::Queue.code()), Value::Bool(false), Value::Null]
    );
    let props = frame.properties.as_ref().unwrap();
    assert_eq!(props.get("Name").and_then(|v| v.as_str()), Some("orders"));
    assert_eq!(consumer.descriptor().selector(), None);
    assert_eq!(consumer.id(), frame.correlation);
}

#[tokio::test]
async fn test_create_consumer_refused_does_not_resume() {
    let (session, broker) = session_for("client-a", false, |frame| match frame.action_type {
        ActionType::CreateConsumer => Some(Reply::rc(ReturnCode::DEST_NOT_VALID)),
        _ => default_reply(frame),
    })
    .await;

    let err = session
        .create_consumer(&Destination::topic("bad"), None, true)
        .await
        .unwrap_err();

    let failure = err.failure().unwrap();
    assert_eq!(failure.code(), "CWLNC0217");
    assert_eq!(failure.category(), FailureCategory::InvalidDestination);
    assert_eq!(trail(&broker), vec![ActionType::CreateConsumer]);
}

#[tokio::test]
async fn test_create_consumer_reply_without_id_fails() {
    let (session, broker) = session_for("client-a", false, |frame| match frame.action_type {
        ActionType::CreateConsumer => Some(Reply::ok()),
        _ => default_reply(frame),
    })
    .await;

    let err = session
        .create_consumer(&Destination::queue("orders"), None, false)
        .await
        .unwrap_err();

    assert_eq!(err.category(), Some(FailureCategory::MessageFormat));
    // Delivery was paused by the creation, so the session is still resumed.
    assert_eq!(trail(&broker), vec![ActionType::CreateConsumer, ActionType::ResumeSession]);
}

// =========================================================================
// Durable and shared subscriptions
// =========================================================================

#[tokio::test]
async fn test_create_shared_durable_destination_in_use_is_illegal_state() {
    let (session, broker) =
        session_for("client-a", false, refuse_durable(ReturnCode::DESTINATION_IN_USE)).await;

    let err = session
        .create_shared_durable_consumer(&Destination::topic("prices"), "audit", None)
        .await
        .unwrap_err();

    let failure = err.failure().unwrap();
    assert_eq!(failure.category(), FailureCategory::IllegalState);
    assert_eq!(failure.code(), "CWLNC0021");
    assert!(failure.message().contains("audit"));
    assert!(failure.message().contains("client-a"));
    // The session is resumed even though the subscription was refused.
    assert_eq!(trail(&broker), vec![ActionType::CreateDurable, ActionType::ResumeSession]);
}

#[tokio::test]
async fn test_create_durable_sends_name_and_selector() {
    let (session, broker) = session_for("client-a", false, default_reply).await;

    let consumer = session
        .create_durable_consumer(&Destination::topic("prices"), "audit", Some("level > 2"), true)
        .await
        .unwrap();

    let frame = &broker.frames_of(ActionType::CreateDurable)[0];
    assert_eq!(
        frame.fields,
        vec![Value::String("audit".into()), Value::String("level > 2".into())]
    );
    let props = frame.properties.as_ref().unwrap();
    assert_eq!(props.get("NoLocal").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(consumer.descriptor().domain(), Domain::Topic);
    assert!(consumer.descriptor().is_durable());
}

#[tokio::test]
async fn test_create_shared_generated_client_id_is_reported_as_shared() {
    let (durable, _b1) =
        session_for("_abc", true, refuse_durable(ReturnCode::SHARE_MISMATCH)).await;
    let (nondurable, _b2) =
        session_for("_abc", true, refuse_durable(ReturnCode::EXISTING_SUBSCRIPTION)).await;

    let err = durable
        .create_shared_durable_consumer(&Destination::topic("t"), "s", None)
        .await
        .unwrap_err();
    let failure = err.failure().unwrap();
    assert_eq!(failure.code(), "CWLNC0228");
    assert!(failure.message().contains("__Shared"));

    let err = nondurable
        .create_shared_consumer(&Destination::topic("t"), "s", None)
        .await
        .unwrap_err();
    let failure = err.failure().unwrap();
    assert_eq!(failure.code(), "CWLNC0229");
    assert_eq!(failure.category(), FailureCategory::IllegalState);
    assert!(failure.message().contains("__SharedND"));
}

#[tokio::test]
async fn test_create_subscription_unknown_code_is_generic() {
    let (session, _broker) = session_for("client-a", false, refuse_durable(ReturnCode(4242))).await;

    let err = session
        .create_subscription_and_consumer(
            ConsumerOptions::new(Destination::topic("t")).durable("d"),
        )
        .await
        .unwrap_err();

    let failure = err.failure().unwrap();
    assert_eq!(failure.code(), "CWLNC0209");
    assert_eq!(failure.category(), FailureCategory::Generic);
    assert!(failure.message().contains("4242"));
}

#[tokio::test]
async fn test_create_subscription_temporary_topic_sends_nothing() {
    let (session, broker) = session_for("client-a", false, default_reply).await;

    let err = session
        .create_durable_consumer(&Destination::temporary_topic("tmp"), "d", None, false)
        .await
        .unwrap_err();

    assert_eq!(err.failure().unwrap().code(), "CWLNC0006");
    assert!(trail(&broker).is_empty());
}

#[tokio::test]
async fn test_create_subscriptions_concurrently_are_serialized() {
    let (session, broker) = session_for("client-a", false, |frame| {
        default_reply(frame).map(|r| r.delayed(Duration::from_millis(3)))
    })
    .await;
    let session = Arc::new(session);

    let mut tasks = Vec::new();
    for i in 0..10 {
        let session = Arc::clone(&session);
        tasks.push(tokio::spawn(async move {
            session
                .create_durable_consumer(&Destination::topic("t"), &format!("sub-{i}"), None, false)
                .await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(broker.frames_of(ActionType::CreateDurable).len(), 10);
    assert_eq!(broker.frames_of(ActionType::ResumeSession).len(), 10);
    assert_eq!(broker.peak_in_flight(session.id()), 1);
    // Every creation is immediately followed by its resume.
    let trail = trail(&broker);
    for pair in trail.chunks(2) {
        assert_eq!(pair, [ActionType::CreateDurable, ActionType::ResumeSession]);
    }
}

// =========================================================================
// Unsubscribe and close
// =========================================================================

#[tokio::test]
async fn test_unsubscribe_not_found_fails() {
    let (session, broker) = session_for("client-a", false, |frame| match frame.action_type {
        ActionType::UnsubscribeDurable => Some(Reply::rc(ReturnCode::NOT_FOUND)),
        _ => default_reply(frame),
    })
    .await;

    let err = session.unsubscribe("gone").await.unwrap_err();

    assert_eq!(err.failure().unwrap().code(), "CWLNC0227");
    let frame = &broker.frames_of(ActionType::UnsubscribeDurable)[0];
    assert_eq!(frame.fields, vec![Value::String("gone".into()), Value::Bool(false)]);
}

#[tokio::test]
async fn test_consumer_close_sends_once() {
    let (session, broker) = session_for("client-a", false, default_reply).await;
    let consumer = session
        .create_consumer(&Destination::topic("t"), None, false)
        .await
        .unwrap();

    consumer.close().await.unwrap();
    consumer.close().await.unwrap();

    let closes = broker.frames_of(ActionType::CloseConsumer);
    assert_eq!(closes.len(), 1);
    assert_eq!(closes[0].item_id, consumer.id());
    assert_eq!(consumer.ensure_open().unwrap_err().failure().unwrap().code(), "CWLNC0010");
}
