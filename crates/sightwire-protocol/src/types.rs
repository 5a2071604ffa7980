//! Typed values that travel inside actions.
//!
//! Every positional header field and every property value is a [`Value`].
//! The encoder tags each one with a single type byte, so the receiver can
//! decode it without knowing the schema in advance.

use std::fmt;

use indexmap::IndexMap;

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// A single typed value as it appears on the wire.
///
/// The variants mirror the property types a message may carry. `Null` is
/// distinct from an empty string or an empty byte array.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// An absent value.
    Null,
    /// A boolean, written as one byte (0 or 1).
    Bool(bool),
    /// A signed byte.
    Byte(i8),
    /// A 16-bit signed integer.
    Short(i16),
    /// A 32-bit signed integer.
    Int(i32),
    /// A 64-bit signed integer.
    Long(i64),
    /// A 32-bit float.
    Float(f32),
    /// A 64-bit float.
    Double(f64),
    /// A UTF-8 string.
    String(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// A nested property map.
    Map(PropertyMap),
}

impl Value {
    /// Returns a short name for the value's type, used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Byte(_) => "byte",
            Self::Short(_) => "short",
            Self::Int(_) => "int",
            Self::Long(_) => "long",
            Self::Float(_) => "float",
            Self::Double(_) => "double",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::Map(_) => "map",
        }
    }

    /// Returns the value as an `i32` if it is an `Int`.
    pub fn as_int(&self) -> Option<i32> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the value as an `i64` if it is a `Long` or an `Int`.
    pub fn as_long(&self) -> Option<i64> {
        match self {
            Self::Long(v) => Some(*v),
            Self::Int(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    /// Returns the value as a string slice if it is a `String`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the value as a `bool` if it is a `Bool`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i8> for Value {
    fn from(v: i8) -> Self {
        Self::Byte(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Self::Short(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Long(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::Float(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<PropertyMap> for Value {
    fn from(v: PropertyMap) -> Self {
        Self::Map(v)
    }
}

// ---------------------------------------------------------------------------
// PropertyMap
// ---------------------------------------------------------------------------

/// Named values kept in insertion order.
///
/// The encoder writes entries in the order they were inserted. Equality
/// ignores order: two maps are equal when they hold the same names bound
/// to equal values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyMap {
    entries: IndexMap<String, Value>,
}

impl PropertyMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a value, returning the previous value for that name.
    ///
    /// Replacing an existing name keeps its original position.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        value: impl Into<Value>,
    ) -> Option<Value> {
        self.entries.insert(name.into(), value.into())
    }

    /// Returns the value bound to `name`.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.get(name)
    }

    /// Removes `name`, preserving the order of the remaining entries.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.entries.shift_remove(name)
    }

    /// Returns `true` if `name` is present.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the map holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Appends every entry of `other`, replacing values for names already
    /// present.
    pub fn extend(&mut self, other: &PropertyMap) {
        for (name, value) in other.iter() {
            self.entries.insert(name.to_string(), value.clone());
        }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for PropertyMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

// ---------------------------------------------------------------------------
// Domain
// ---------------------------------------------------------------------------

/// Server-side delivery semantics an action refers to.
///
/// `Common` is used for session-level actions that are not tied to a
/// single destination type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Domain {
    /// Not bound to a destination type.
    Common = 0,
    /// Point-to-point.
    Queue = 1,
    /// Publish/subscribe.
    Topic = 2,
    /// A shared durable topic subscription.
    SharedTopic = 3,
    /// A shared non-durable topic subscription.
    SharedNonDurableTopic = 4,
}

impl Domain {
    /// The wire code for this domain.
    pub fn code(self) -> i8 {
        self as i8
    }

    /// Looks up a domain by its wire code.
    pub fn from_code(code: i8) -> Option<Self> {
        match code {
            0 => Some(Self::Common),
            1 => Some(Self::Queue),
            2 => Some(Self::Topic),
            3 => Some(Self::SharedTopic),
            4 => Some(Self::SharedNonDurableTopic),
            _ => None,
        }
    }

    /// Returns `true` for any topic variant.
    pub fn is_topic(self) -> bool {
        matches!(
            self,
            Self::Topic | Self::SharedTopic | Self::SharedNonDurableTopic
        )
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Common => "common",
            Self::Queue => "queue",
            Self::Topic => "topic",
            Self::SharedTopic => "shared topic",
            Self::SharedNonDurableTopic => "shared non-durable topic",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // =====================================================================
    // PropertyMap
    // =====================================================================

    #[test]
    fn test_property_map_iter_preserves_insertion_order() {
        let mut map = PropertyMap::new();
        map.insert("zeta", 1);
        map.insert("alpha", 2);
        map.insert("mid", 3);

        let names: Vec<&str> = map.iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_property_map_replace_keeps_position() {
        let mut map = PropertyMap::new();
        map.insert("a", 1);
        map.insert("b", 2);
        let old = map.insert("a", "replaced");

        assert_eq!(old, Some(Value::Int(1)));
        let first = map.iter().next().map(|(k, v)| (k, v.clone()));
        assert_eq!(first, Some(("a", Value::String("replaced".into()))));
    }

    #[test]
    fn test_property_map_equality_ignores_order() {
        let a: PropertyMap = [("x", 1), ("y", 2)].into_iter().collect();
        let b: PropertyMap = [("y", 2), ("x", 1)].into_iter().collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_property_map_remove_shifts_remaining() {
        let mut map: PropertyMap =
            [("a", 1), ("b", 2), ("c", 3)].into_iter().collect();
        map.remove("b");
        let names: Vec<&str> = map.iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["a", "c"]);
    }

    // =====================================================================
    // Value and Domain
    // =====================================================================

    #[test]
    fn test_value_as_long_widens_int() {
        assert_eq!(Value::Int(7).as_long(), Some(7));
        assert_eq!(Value::Long(-3).as_long(), Some(-3));
        assert_eq!(Value::Bool(true).as_long(), None);
    }

    #[test]
    fn test_value_null_differs_from_empty_string() {
        assert_ne!(Value::Null, Value::String(String::new()));
    }

    #[test]
    fn test_domain_from_code_round_trips() {
        for domain in [
            Domain::Common,
            Domain::Queue,
            Domain::Topic,
            Domain::SharedTopic,
            Domain::SharedNonDurableTopic,
        ] {
            assert_eq!(Domain::from_code(domain.code()), Some(domain));
        }
        assert_eq!(Domain::from_code(42), None);
    }

    #[test]
    fn test_domain_is_topic() {
        assert!(Domain::SharedTopic.is_topic());
        assert!(!Domain::Queue.is_topic());
    }
}
