//! Wire protocol for Sightwire.
//!
//! This crate defines what a messaging client says to the broker and how
//! the broker's answer is classified:
//!
//! - **Values** ([`Value`], [`PropertyMap`]) and the field encoder
//!   ([`FieldWriter`], [`FieldReader`]) that puts them on the wire.
//! - **Actions** ([`Action`], [`Frame`], [`ActionType`]): one request,
//!   one correlated reply.
//! - **Return codes** ([`ReturnCode`]) and the single table that maps
//!   them to a [`FailureCategory`].
//! - **Failures** ([`Failure`]): a category, a stable code, and a
//!   readable message.
//!
//! # Architecture
//!
//! The protocol layer knows nothing about connections or sessions. It
//! turns values into bytes and bytes back into values.
//!
//! ```text
//! Session (producers, consumers) → Protocol (Action) → Transport (bytes)
//! ```

// ---------------------------------------------------------------------------
// Module declarations
// ---------------------------------------------------------------------------

mod action;
mod codec;
mod error;
mod failure;
mod rc;
mod types;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use action::{Action, ActionType, Frame};
pub use codec::{FieldReader, FieldWriter};
pub use error::ProtocolError;
pub use failure::{Failure, MESSAGE_FORMAT_CODE, format_template};
pub use rc::{FailureCategory, ReturnCode};
pub use types::{Domain, PropertyMap, Value};
