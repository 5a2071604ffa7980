//! Broker return codes and the table that classifies them.
//!
//! Every waited action comes back with a small integer. Zero means
//! success; anything else names a condition. [`ReturnCode::category`] is
//! the one place that decides which [`FailureCategory`] a code belongs to.
//! The producer, consumer, and connection paths all go through it, so the
//! same code can never be classified two different ways.

use std::fmt;

// ---------------------------------------------------------------------------
// FailureCategory
// ---------------------------------------------------------------------------

/// The kinds of failure a caller can react to differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureCategory {
    /// Not authorized or not authenticated.
    Security,
    /// The destination does not exist or cannot be used.
    InvalidDestination,
    /// The request conflicts with existing state, or the resource is closed.
    IllegalState,
    /// The operation is not permitted on this destination (system topics).
    IllegalOperation,
    /// The broker or destination has no room for the request.
    Capacity,
    /// A value could not be encoded.
    MessageFormat,
    /// A commit failed and the transaction was rolled back.
    TransactionRolledBack,
    /// Any other failure. Carries the raw return code when one exists.
    Generic,
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Security => "security",
            Self::InvalidDestination => "invalid destination",
            Self::IllegalState => "illegal state",
            Self::IllegalOperation => "illegal operation",
            Self::Capacity => "capacity",
            Self::MessageFormat => "message format",
            Self::TransactionRolledBack => "transaction rolled back",
            Self::Generic => "generic",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// ReturnCode
// ---------------------------------------------------------------------------

/// A return code sent by the broker in reply to an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReturnCode(pub i32);

impl ReturnCode {
    pub const OK: Self = Self(0);
    pub const DESTINATION_FULL: Self = Self(14);
    pub const DESTINATION_IN_USE: Self = Self(18);
    pub const ERROR: Self = Self(100);
    pub const SERVER_CAPACITY: Self = Self(104);
    pub const CLOSED: Self = Self(106);
    pub const NOT_FOUND: Self = Self(113);
    pub const CLIENT_ID_IN_USE: Self = Self(121);
    pub const DEST_NOT_VALID: Self = Self(124);
    pub const TOO_MANY_PROD_CONS: Self = Self(154);
    pub const NOT_AUTHORIZED: Self = Self(180);
    pub const NOT_AUTHENTICATED: Self = Self(181);
    pub const EXISTING_SUBSCRIPTION: Self = Self(212);
    pub const MSG_TOO_BIG: Self = Self(287);
    pub const BAD_SYS_TOPIC: Self = Self(289);
    pub const SHARE_MISMATCH: Self = Self(290);

    /// Returns `true` for the success code.
    pub fn is_ok(self) -> bool {
        self == Self::OK
    }

    /// The raw integer.
    pub fn code(self) -> i32 {
        self.0
    }

    /// Classifies a non-zero code. Returns `None` for [`ReturnCode::OK`].
    ///
    /// Codes absent from the table are [`FailureCategory::Generic`].
    pub fn category(self) -> Option<FailureCategory> {
        if self.is_ok() {
            return None;
        }
        Some(
            lookup(self)
                .map(|entry| entry.category)
                .unwrap_or(FailureCategory::Generic),
        )
    }

    /// The symbolic name of a known code.
    pub fn name(self) -> Option<&'static str> {
        lookup(self).map(|entry| entry.name)
    }
}

impl From<i32> for ReturnCode {
    fn from(code: i32) -> Self {
        Self(code)
    }
}

impl fmt::Display for ReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Table
// ---------------------------------------------------------------------------

struct Entry {
    code: ReturnCode,
    name: &'static str,
    category: FailureCategory,
}

const fn entry(code: ReturnCode, name: &'static str, category: FailureCategory) -> Entry {
    Entry {
        code,
        name,
        category,
    }
}

static TABLE: &[Entry] = &[
    entry(ReturnCode::OK, "OK", FailureCategory::Generic),
    entry(ReturnCode::NOT_AUTHORIZED, "NotAuthorized", FailureCategory::Security),
    entry(ReturnCode::NOT_AUTHENTICATED, "NotAuthenticated", FailureCategory::Security),
    entry(ReturnCode::DEST_NOT_VALID, "DestNotValid", FailureCategory::InvalidDestination),
    entry(ReturnCode::BAD_SYS_TOPIC, "BadSysTopic", FailureCategory::IllegalOperation),
    entry(ReturnCode::MSG_TOO_BIG, "MsgTooBig", FailureCategory::Capacity),
    entry(ReturnCode::DESTINATION_FULL, "DestinationFull", FailureCategory::Capacity),
    entry(ReturnCode::SERVER_CAPACITY, "ServerCapacity", FailureCategory::Capacity),
    entry(ReturnCode::EXISTING_SUBSCRIPTION, "ExistingSubscription", FailureCategory::IllegalState),
    entry(ReturnCode::DESTINATION_IN_USE, "DestinationInUse", FailureCategory::IllegalState),
    entry(ReturnCode::SHARE_MISMATCH, "ShareMismatch", FailureCategory::IllegalState),
    entry(ReturnCode::ERROR, "Error", FailureCategory::Generic),
    entry(ReturnCode::CLOSED, "Closed", FailureCategory::Generic),
    entry(ReturnCode::NOT_FOUND, "NotFound", FailureCategory::Generic),
    entry(ReturnCode::CLIENT_ID_IN_USE, "ClientIDInUse", FailureCategory::Generic),
    entry(ReturnCode::TOO_MANY_PROD_CONS, "TooManyProdCons", FailureCategory::Generic),
];

fn lookup(code: ReturnCode) -> Option<&'static Entry> {
    TABLE.iter().find(|entry| entry.code == code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_ok_is_none() {
        assert_eq!(ReturnCode::OK.category(), None);
    }

    #[test]
    fn test_category_security_codes() {
        assert_eq!(
            ReturnCode::NOT_AUTHORIZED.category(),
            Some(FailureCategory::Security)
        );
        assert_eq!(
            ReturnCode::NOT_AUTHENTICATED.category(),
            Some(FailureCategory::Security)
        );
    }

    #[test]
    fn test_category_capacity_codes() {
        for rc in [
            ReturnCode::MSG_TOO_BIG,
            ReturnCode::DESTINATION_FULL,
            ReturnCode::SERVER_CAPACITY,
        ] {
            assert_eq!(rc.category(), Some(FailureCategory::Capacity), "{rc}");
        }
    }

    #[test]
    fn test_category_illegal_state_codes() {
        for rc in [
            ReturnCode::EXISTING_SUBSCRIPTION,
            ReturnCode::DESTINATION_IN_USE,
            ReturnCode::SHARE_MISMATCH,
        ] {
            assert_eq!(rc.category(), Some(FailureCategory::IllegalState), "{rc}");
        }
    }

    #[test]
    fn test_category_destination_codes() {
        assert_eq!(
            ReturnCode::DEST_NOT_VALID.category(),
            Some(FailureCategory::InvalidDestination)
        );
        assert_eq!(
            ReturnCode::BAD_SYS_TOPIC.category(),
            Some(FailureCategory::IllegalOperation)
        );
    }

    #[test]
    fn test_category_unknown_code_is_generic() {
        assert_eq!(ReturnCode(9999).category(), Some(FailureCategory::Generic));
        assert_eq!(ReturnCode(-1).category(), Some(FailureCategory::Generic));
        assert_eq!(ReturnCode(9999).name(), None);
    }

    #[test]
    fn test_table_has_no_duplicate_codes() {
        for (i, a) in TABLE.iter().enumerate() {
            for b in &TABLE[i + 1..] {
                assert_ne!(a.code, b.code, "{} listed twice", a.name);
            }
        }
    }

    #[test]
    fn test_name_known_code() {
        assert_eq!(ReturnCode::SHARE_MISMATCH.name(), Some("ShareMismatch"));
    }
}
