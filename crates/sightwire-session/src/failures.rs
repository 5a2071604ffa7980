//! Failure constructors for every request path.
//!
//! Each path picks the code and message template for a return code; the
//! category always comes from [`ReturnCode::category`], so the send path and
//! the consumer path can never disagree about what a code means.

use sightwire_protocol::{Domain, Failure, FailureCategory, ReturnCode};

// ---------------------------------------------------------------------------
// Local refusals
// ---------------------------------------------------------------------------

pub(crate) fn connection_closed() -> Failure {
    Failure::new(
        FailureCategory::IllegalState,
        "CWLNC0008",
        "A call on a connection failed because the connection is closed.",
        &[],
    )
}

pub(crate) fn session_closed() -> Failure {
    Failure::new(
        FailureCategory::IllegalState,
        "CWLNC0009",
        "A call on a session failed because the session is closed.",
        &[],
    )
}

pub(crate) fn consumer_closed() -> Failure {
    Failure::new(
        FailureCategory::IllegalState,
        "CWLNC0010",
        "A call on a consumer failed because the consumer is closed.",
        &[],
    )
}

pub(crate) fn producer_closed() -> Failure {
    Failure::new(
        FailureCategory::IllegalState,
        "CWLNC0011",
        "A call on a producer failed because the producer is closed.",
        &[],
    )
}

/// Close attempted from a callback running on the same connection.
pub fn reentrant_close() -> Failure {
    Failure::new(
        FailureCategory::IllegalState,
        "CWLNC0102",
        "A connection cannot be closed from a callback that is running on that connection.",
        &[],
    )
}

pub(crate) fn not_transacted(operation: &str) -> Failure {
    Failure::new(
        FailureCategory::IllegalState,
        "CWLNC0001",
        "A call to {0} failed because the session is not transacted.",
        &[&operation],
    )
}

pub(crate) fn no_destination() -> Failure {
    Failure::new(
        FailureCategory::InvalidDestination,
        "CWLNC0012",
        "An operation that requires a destination failed because no destination was given.",
        &[],
    )
}

pub(crate) fn foreign_destination(description: &str) -> Failure {
    Failure::new(
        FailureCategory::InvalidDestination,
        "CWLNC0013",
        "An operation failed because a destination from another provider ({0}) was used.",
        &[&description],
    )
}

pub(crate) fn unnamed_destination() -> Failure {
    Failure::new(
        FailureCategory::InvalidDestination,
        "CWLNC0007",
        "An operation that requires a destination name failed because the name is not set.",
        &[],
    )
}

pub(crate) fn producer_has_destination(producer_id: u32) -> Failure {
    Failure::new(
        FailureCategory::IllegalOperation,
        "CWLNC0049",
        "A send on producer {0} named a destination, but the producer already has one.",
        &[&producer_id],
    )
}

pub(crate) fn invalid_subscription_name() -> Failure {
    Failure::new(
        FailureCategory::InvalidDestination,
        "CWLNC0002",
        "A shared or durable consumer could not be created because the subscription name is empty.",
        &[],
    )
}

pub(crate) fn temporary_topic_subscription() -> Failure {
    Failure::new(
        FailureCategory::InvalidDestination,
        "CWLNC0006",
        "A durable or shared subscription cannot be created on a temporary topic.",
        &[],
    )
}

pub(crate) fn queue_subscription(operation: &str) -> Failure {
    Failure::new(
        FailureCategory::IllegalState,
        "CWLNC0018",
        "A topic method ({0}) failed because it was called with a queue.",
        &[&operation],
    )
}

pub(crate) fn invalid_priority(priority: u8) -> Failure {
    Failure::new(
        FailureCategory::Generic,
        "CWLNC0036",
        "The priority {0} is not valid. Valid priorities are 0 to 9.",
        &[&priority],
    )
}

pub(crate) fn callback_executor_unavailable(reason: &str) -> Failure {
    Failure::new(
        FailureCategory::Generic,
        "CWLNC0103",
        "The completion callback executor could not be started: {0}.",
        &[&reason],
    )
}

// ---------------------------------------------------------------------------
// Send path
// ---------------------------------------------------------------------------

/// What the send path knows when a send is refused.
pub(crate) struct SendContext<'a> {
    pub domain: Domain,
    pub destination: &'a str,
    /// `None` for an anonymous producer.
    pub producer_id: Option<u32>,
    pub endpoint: &'a str,
}

pub(crate) fn send_failure(rc: ReturnCode, ctx: &SendContext<'_>) -> Failure {
    let kind = if ctx.domain.is_topic() { "topic" } else { "queue" };
    let producer = ctx
        .producer_id
        .map_or_else(|| "\"null\"".to_string(), |id| id.to_string());
    match rc {
        ReturnCode::MSG_TOO_BIG => Failure::from_return_code(
            rc,
            "CWLNC0215",
            "A send to {0} {1} from producer {2} failed because the message is larger than endpoint {3} permits.",
            &[&kind, &ctx.destination, &producer, &ctx.endpoint],
        ),
        ReturnCode::DESTINATION_FULL => Failure::from_return_code(
            rc,
            "CWLNC0218",
            "A send to {0} {1} from producer {2} failed because the destination is full.",
            &[&kind, &ctx.destination, &producer],
        ),
        ReturnCode::DEST_NOT_VALID => Failure::from_return_code(
            rc,
            "CWLNC0219",
            "A send to {0} {1} from producer {2} failed because the destination is not valid.",
            &[&kind, &ctx.destination, &producer],
        ),
        ReturnCode::BAD_SYS_TOPIC => system_topic(rc, ctx.destination),
        ReturnCode::NOT_AUTHORIZED | ReturnCode::NOT_AUTHENTICATED => not_authorized(rc),
        ReturnCode::SERVER_CAPACITY => Failure::from_return_code(
            rc,
            "CWLNC0223",
            "A persistent send to {0} {1} from producer {2} failed because the broker could not store the message.",
            &[&kind, &ctx.destination, &producer],
        ),
        _ => Failure::from_return_code(
            rc,
            "CWLNC0216",
            "A send to {0} {1} from producer {2} failed with return code {3}.",
            &[&kind, &ctx.destination, &producer, &rc],
        ),
    }
}

// ---------------------------------------------------------------------------
// Consumer and producer creation
// ---------------------------------------------------------------------------

/// What the consumer path knows when creation is refused.
pub(crate) struct SubscribeContext<'a> {
    /// The destination, or the subscription name for durable/shared ones.
    pub target: &'a str,
    pub subscription: Option<&'a str>,
    pub client_id: &'a str,
}

pub(crate) fn subscribe_failure(rc: ReturnCode, ctx: &SubscribeContext<'_>) -> Failure {
    let name = ctx.subscription.unwrap_or(ctx.target);
    match rc {
        ReturnCode::NOT_AUTHORIZED | ReturnCode::NOT_AUTHENTICATED => not_authorized(rc),
        ReturnCode::DEST_NOT_VALID => invalid_destination(rc, ctx.target),
        ReturnCode::BAD_SYS_TOPIC => system_topic(rc, ctx.target),
        ReturnCode::EXISTING_SUBSCRIPTION => Failure::from_return_code(
            rc,
            "CWLNC0229",
            "Client {1} could not create a consumer for existing subscription {0} because its settings cannot change while it has active consumers.",
            &[&name, &ctx.client_id],
        ),
        ReturnCode::DESTINATION_IN_USE => Failure::from_return_code(
            rc,
            "CWLNC0021",
            "A non-shared durable consumer could not be created because an active one already exists: Name={0} ClientID={1}.",
            &[&name, &ctx.client_id],
        ),
        ReturnCode::SHARE_MISMATCH => Failure::from_return_code(
            rc,
            "CWLNC0228",
            "Client {1} could not create a consumer for existing subscription {0} because the request would change whether the subscription is shared.",
            &[&name, &ctx.client_id],
        ),
        ReturnCode::TOO_MANY_PROD_CONS => too_many(rc, name, ctx.client_id),
        _ => Failure::from_return_code(
            rc,
            "CWLNC0209",
            "Client {2} failed to create a consumer for topic or subscription {1} with return code {0}.",
            &[&rc, &name, &ctx.client_id],
        ),
    }
}

pub(crate) fn create_producer_failure(rc: ReturnCode, destination: &str, client_id: &str) -> Failure {
    match rc {
        ReturnCode::NOT_AUTHORIZED | ReturnCode::NOT_AUTHENTICATED => not_authorized(rc),
        ReturnCode::DEST_NOT_VALID => invalid_destination(rc, destination),
        ReturnCode::BAD_SYS_TOPIC => system_topic(rc, destination),
        ReturnCode::TOO_MANY_PROD_CONS => too_many(rc, destination, client_id),
        _ => Failure::from_return_code(
            rc,
            "CWLNC0203",
            "A request to create a producer failed with return code {0}.",
            &[&rc],
        ),
    }
}

pub(crate) fn unsubscribe_failure(rc: ReturnCode, name: &str, client_id: &str) -> Failure {
    match rc {
        ReturnCode::DESTINATION_IN_USE => Failure::from_return_code(
            rc,
            "CWLNC0226",
            "Client {1} could not unsubscribe from {0} because the subscription still has active consumers.",
            &[&name, &client_id],
        ),
        ReturnCode::NOT_FOUND => Failure::from_return_code(
            rc,
            "CWLNC0227",
            "Client {1} could not unsubscribe because subscription {0} was not found.",
            &[&name, &client_id],
        ),
        ReturnCode::NOT_AUTHORIZED | ReturnCode::NOT_AUTHENTICATED => not_authorized(rc),
        _ => Failure::from_return_code(
            rc,
            "CWLNC0206",
            "Client {2} failed to unsubscribe from {1} with return code {0}.",
            &[&rc, &name, &client_id],
        ),
    }
}

// ---------------------------------------------------------------------------
// Session and connection requests
// ---------------------------------------------------------------------------

pub fn create_session_failure(rc: ReturnCode) -> Failure {
    match rc {
        ReturnCode::NOT_AUTHORIZED | ReturnCode::NOT_AUTHENTICATED => not_authorized(rc),
        _ => Failure::from_return_code(
            rc,
            "CWLNC0204",
            "A request to create a session failed with return code {0}.",
            &[&rc],
        ),
    }
}

pub fn create_connection_failure(rc: ReturnCode, client_id: &str) -> Failure {
    match rc {
        ReturnCode::NOT_AUTHORIZED | ReturnCode::NOT_AUTHENTICATED => not_authorized(rc),
        ReturnCode::CLIENT_ID_IN_USE => Failure::from_return_code(
            rc,
            "CWLNC0205",
            "A request to connect failed because client ID {0} is in use.",
            &[&client_id],
        ),
        _ => Failure::from_return_code(
            rc,
            "CWLNC0200",
            "A request to connect client {0} failed with return code {1}.",
            &[&client_id, &rc],
        ),
    }
}

pub(crate) fn commit_failure(rc: ReturnCode) -> Failure {
    // Whatever the code, a failed commit means the work was rolled back.
    Failure::new(
        FailureCategory::TransactionRolledBack,
        "CWLNC0059",
        "The transaction was rolled back because the commit failed with return code {0}.",
        &[&rc],
    )
    .with_return_code(rc)
}

pub(crate) fn rollback_failure(rc: ReturnCode) -> Failure {
    Failure::from_return_code(
        rc,
        "CWLNC0060",
        "A rollback failed with return code {0}.",
        &[&rc],
    )
}

// ---------------------------------------------------------------------------
// Shared shapes
// ---------------------------------------------------------------------------

fn not_authorized(rc: ReturnCode) -> Failure {
    Failure::from_return_code(
        rc,
        "CWLNC0207",
        "A client request failed due to an authorization failure.",
        &[],
    )
}

fn invalid_destination(rc: ReturnCode, destination: &str) -> Failure {
    Failure::from_return_code(
        rc,
        "CWLNC0217",
        "A request to create a producer or a consumer failed because the destination {0} is not valid.",
        &[&destination],
    )
}

fn system_topic(rc: ReturnCode, destination: &str) -> Failure {
    Failure::from_return_code(
        rc,
        "CWLNC0225",
        "The request failed because the destination {0} is a system topic.",
        &[&destination],
    )
}

fn too_many(rc: ReturnCode, name: &str, client_id: &str) -> Failure {
    Failure::from_return_code(
        rc,
        "CWLNC0232",
        "Client {1} could not create {0} because the connection has too many producers and consumers.",
        &[&name, &client_id],
    )
}
