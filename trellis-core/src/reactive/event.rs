//! Change events.
//!
//! Every mutation produces exactly one [`ChangeEvent`]. Events are immutable
//! once built; propagation to parent states creates a new event with a longer
//! path instead of editing the original.

use std::fmt;

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use smallvec::SmallVec;

use crate::value::{Key, Value};

/// The eight mutating array methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArrayOp {
    Push,
    Pop,
    Shift,
    Unshift,
    Splice,
    Fill,
    Sort,
    Reverse,
}

impl ArrayOp {
    /// Wire name of the operation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ArrayOp::Push => "push",
            ArrayOp::Pop => "pop",
            ArrayOp::Shift => "shift",
            ArrayOp::Unshift => "unshift",
            ArrayOp::Splice => "splice",
            ArrayOp::Fill => "fill",
            ArrayOp::Sort => "sort",
            ArrayOp::Reverse => "reverse",
        }
    }

    /// `pop` and `shift` report what remains instead of what was there.
    pub(crate) fn reports_remaining(&self) -> bool {
        matches!(self, ArrayOp::Pop | ArrayOp::Shift)
    }
}

/// What kind of mutation an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Synthetic event delivered to a new subscriber.
    Init,
    Set,
    Delete,
    /// Shallow merge of several keys.
    Assign,
    Array(ArrayOp),
    MapSet,
    MapDelete,
    MapClear,
    SetAdd,
    SetDelete,
    SetClear,
}

impl EventKind {
    /// Wire name of the event, as serialized in `type`.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Init => "init",
            EventKind::Set => "set",
            EventKind::Delete => "delete",
            EventKind::Assign => "assign",
            EventKind::Array(op) => op.as_str(),
            EventKind::MapSet => "map:set",
            EventKind::MapDelete => "map:delete",
            EventKind::MapClear => "map:clear",
            EventKind::SetAdd => "set:add",
            EventKind::SetDelete => "set:delete",
            EventKind::SetClear => "set:clear",
        }
    }

    /// Bulk events can touch every key of the container, so they concern
    /// any reader of it.
    pub fn is_bulk(&self) -> bool {
        matches!(
            self,
            EventKind::Array(_) | EventKind::MapClear | EventKind::SetClear
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key path from the state a handler is attached to down to the mutated key.
pub type Path = SmallVec<[Key; 4]>;

/// Description of one mutation.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    kind: EventKind,
    keys: Path,
    prev: Value,
    value: Value,
    structural: bool,
}

impl ChangeEvent {
    pub(crate) fn new(kind: EventKind, keys: Path, prev: Value, value: Value) -> Self {
        Self {
            kind,
            keys,
            prev,
            value,
            structural: false,
        }
    }

    /// Mark the event as changing size, order or membership.
    pub(crate) fn structural(mut self, structural: bool) -> Self {
        self.structural = structural;
        self
    }

    /// The event a subscriber receives when it asks to be called immediately.
    pub fn init(value: Value) -> Self {
        Self::new(EventKind::Init, Path::new(), Value::Undefined, value)
    }

    /// The same event as seen from a parent that holds the mutated state
    /// under `key`.
    pub(crate) fn prefixed(&self, key: &Key) -> Self {
        let mut keys = Path::with_capacity(self.keys.len() + 1);
        keys.push(key.clone());
        keys.extend(self.keys.iter().cloned());

        Self {
            kind: self.kind,
            keys,
            prev: self.prev.clone(),
            value: self.value.clone(),
            structural: self.structural,
        }
    }

    /// What happened.
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Affected keys. For direct events on objects, maps and sets these are
    /// the written keys; array methods and clears report an empty path. Events
    /// propagated from children start with the keys leading to the child.
    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    /// Value before the mutation.
    pub fn prev(&self) -> &Value {
        &self.prev
    }

    /// New value. For array methods this is the argument list.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Whether keys were added or removed.
    pub fn is_structural(&self) -> bool {
        self.structural
    }

    /// Dotted rendering of [`keys`](Self::keys).
    pub fn path_string(&self) -> String {
        self.keys
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(".")
    }
}

impl Serialize for ChangeEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut event = serializer.serialize_struct("ChangeEvent", 4)?;
        event.serialize_field("type", self.kind.as_str())?;
        event.serialize_field("keys", self.keys.as_slice())?;
        event.serialize_field("prev", &self.prev)?;
        event.serialize_field("value", &self.value)?;
        event.end()
    }
}
