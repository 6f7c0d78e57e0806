//! Dynamic Values
//!
//! The engine works on plain, dynamically-shaped data: objects, arrays, maps
//! and sets whose members are primitives or further containers. This module
//! defines that data model.
//!
//! # Identity
//!
//! Containers are reference types. A [`Raw`] is a shared handle to a container
//! and two handles are "the same value" only when they point at the same
//! allocation, exactly like objects in a garbage-collected language. Primitives
//! compare by value.
//!
//! Equality follows SameValueZero: `NaN` equals `NaN`, `+0` equals `-0`, and a
//! reactive [`State`] equals the raw container it wraps. `Hash` agrees with
//! `Eq`, so any value can be a map key or a set member.

mod raw;

pub use raw::{Container, Kind, Raw, RawId};

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Serialize, Serializer};

use crate::reactive::State;

/// A dynamically typed value.
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// Absent value (missing key, out-of-range index).
    #[default]
    Undefined,
    /// Explicit null.
    Null,
    /// Boolean.
    Bool(bool),
    /// Number. All numbers are `f64`.
    Number(f64),
    /// Immutable string.
    String(Arc<str>),
    /// A plain container.
    Raw(Raw),
    /// A reactive handle over a container.
    State(State),
}

impl Value {
    /// Short name of the value's kind, used in error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Raw(raw) => raw.kind().as_str(),
            Value::State(state) => state.kind().as_str(),
        }
    }

    /// Returns `true` for anything that is not a container.
    pub fn is_primitive(&self) -> bool {
        !matches!(self, Value::Raw(_) | Value::State(_))
    }

    /// Whether this is the absent value.
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// The underlying container, for both raw and reactive values.
    pub fn as_raw(&self) -> Option<Raw> {
        match self {
            Value::Raw(raw) => Some(raw.clone()),
            Value::State(state) => Some(state.raw().clone()),
            _ => None,
        }
    }

    /// The state, if this value is one.
    pub fn as_state(&self) -> Option<&State> {
        match self {
            Value::State(state) => Some(state),
            _ => None,
        }
    }

    /// The number, if this value is one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// The boolean, if this value is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The string, if this value is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Identity of the container behind this value, if any.
    pub fn raw_id(&self) -> Option<RawId> {
        match self {
            Value::Raw(raw) => Some(raw.id()),
            Value::State(state) => Some(state.raw().id()),
            _ => None,
        }
    }

    /// Form in which the value is stored inside a container: reactive handles
    /// are replaced by the raw value they wrap.
    pub(crate) fn into_stored(self) -> Value {
        match self {
            Value::State(state) => Value::Raw(state.raw().clone()),
            other => other,
        }
    }

    /// Convert to JSON. Maps become objects keyed by the stringified key, sets
    /// become arrays, `Undefined` becomes `null`, and cycles are cut with
    /// `null`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Raw(raw) => raw.to_json(),
            Value::State(state) => state.raw().to_json(),
            other => primitive_to_json(other),
        }
    }

    /// Default ordering used by `sort()` without a comparator.
    ///
    /// Values of different kinds order by kind (null, booleans, numbers,
    /// strings, containers) with `Undefined` always last. Numbers compare
    /// numerically, strings lexicographically, containers by creation order.
    pub fn default_cmp(a: &Value, b: &Value) -> Ordering {
        fn rank(v: &Value) -> u8 {
            match v {
                Value::Null => 0,
                Value::Bool(_) => 1,
                Value::Number(_) => 2,
                Value::String(_) => 3,
                Value::Raw(_) | Value::State(_) => 4,
                Value::Undefined => 5,
            }
        }

        match (a, b) {
            (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
            (Value::Number(x), Value::Number(y)) => x.total_cmp(y),
            (Value::String(x), Value::String(y)) => x.cmp(y),
            _ => match (a.raw_id(), b.raw_id()) {
                (Some(x), Some(y)) => x.cmp(&y),
                _ => rank(a).cmp(&rank(b)),
            },
        }
    }
}

pub(crate) fn primitive_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Undefined | Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Number(n) => number_to_json(*n),
        Value::String(s) => serde_json::Value::String(s.to_string()),
        Value::Raw(_) | Value::State(_) => serde_json::Value::Null,
    }
}

fn number_to_json(n: f64) -> serde_json::Value {
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        serde_json::Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null)
    }
}

fn canonical_bits(n: f64) -> u64 {
    if n.is_nan() {
        f64::NAN.to_bits()
    } else if n == 0.0 {
        0.0f64.to_bits()
    } else {
        n.to_bits()
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => canonical_bits(*a) == canonical_bits(*b),
            (Value::String(a), Value::String(b)) => a == b,
            _ => match (self.raw_id(), other.raw_id()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Value::Undefined => 0u8.hash(state),
            Value::Null => 1u8.hash(state),
            Value::Bool(b) => {
                2u8.hash(state);
                b.hash(state);
            }
            Value::Number(n) => {
                3u8.hash(state);
                canonical_bits(*n).hash(state);
            }
            Value::String(s) => {
                4u8.hash(state);
                s.hash(state);
            }
            Value::Raw(_) | Value::State(_) => {
                5u8.hash(state);
                self.raw_id().hash(state);
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("undefined"),
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{}", number_to_json(*n)),
            Value::String(s) => f.write_str(s),
            Value::Raw(raw) => write!(f, "<{}#{}>", raw.kind().as_str(), raw.id().raw()),
            Value::State(state) => write!(
                f,
                "<reactive {}#{}>",
                state.kind().as_str(),
                state.raw().id().raw()
            ),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

macro_rules! from_integer {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(n: $ty) -> Self {
                    Value::Number(n as f64)
                }
            }
        )*
    };
}

from_integer!(i32, i64, u32, u64, usize);

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(Arc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(Arc::from(s))
    }
}

impl From<Raw> for Value {
    fn from(raw: Raw) -> Self {
        Value::Raw(raw)
    }
}

impl From<State> for Value {
    fn from(state: State) -> Self {
        Value::State(state)
    }
}

impl From<&State> for Value {
    fn from(state: &State) -> Self {
        Value::State(state.clone())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::from(s),
            serde_json::Value::Array(items) => {
                Value::Raw(Raw::array_from(items.into_iter().map(Value::from)))
            }
            serde_json::Value::Object(fields) => Value::Raw(Raw::object_from(
                fields.into_iter().map(|(k, v)| (k, Value::from(v))),
            )),
        }
    }
}

/// A property key.
///
/// Containers normalize keys on access: objects accept names (indices are
/// stringified), arrays accept indices (numeric names are parsed), maps and
/// sets accept any value through [`Key::Entry`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    /// Object field.
    Name(Arc<str>),
    /// Array slot.
    Index(usize),
    /// Map key or set member.
    Entry(Value),
    /// Sentinel for "any structural change": size, order or membership.
    Structure,
}

impl Key {
    /// Key naming an object field.
    pub fn name(name: impl Into<Arc<str>>) -> Self {
        Key::Name(name.into())
    }

    /// Key addressing a map entry or set member.
    pub fn entry(value: impl Into<Value>) -> Self {
        Key::Entry(value.into().into_stored())
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Name(name) => f.write_str(name),
            Key::Index(index) => write!(f, "{index}"),
            Key::Entry(value) => write!(f, "{value}"),
            Key::Structure => f.write_str("*"),
        }
    }
}

impl Serialize for Key {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Key::Name(name) => serializer.serialize_str(name),
            Key::Index(index) => serializer.serialize_u64(*index as u64),
            Key::Entry(value) => value.serialize(serializer),
            Key::Structure => serializer.serialize_str("*"),
        }
    }
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        Key::Name(Arc::from(name))
    }
}

impl From<String> for Key {
    fn from(name: String) -> Self {
        Key::Name(Arc::from(name))
    }
}

impl From<Arc<str>> for Key {
    fn from(name: Arc<str>) -> Self {
        Key::Name(name)
    }
}

impl From<usize> for Key {
    fn from(index: usize) -> Self {
        Key::Index(index)
    }
}
