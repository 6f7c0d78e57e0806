//! Raw containers.
//!
//! A [`Raw`] is the plain, un-instrumented data a reactive state wraps. It is
//! a cheap shared handle: cloning it clones the reference, not the contents.
//! Outside the crate a raw value is read-only; the reactive handle is the only
//! way to mutate it once wrapped.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{primitive_to_json, Key, Value};

/// Identity of a raw container. Allocated from a monotonic counter, so it
/// also reflects creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RawId(u64);

impl RawId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// The supported container kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Object,
    Array,
    Map,
    Set,
}

impl Kind {
    /// Lowercase name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Object => "object",
            Kind::Array => "array",
            Kind::Map => "map",
            Kind::Set => "set",
        }
    }
}

/// Container storage. Every variant keeps insertion order.
#[derive(Debug, Clone)]
pub enum Container {
    Object(IndexMap<Arc<str>, Value>),
    Array(Vec<Value>),
    Map(IndexMap<Value, Value>),
    Set(IndexSet<Value>),
}

impl Container {
    pub fn kind(&self) -> Kind {
        match self {
            Container::Object(_) => Kind::Object,
            Container::Array(_) => Kind::Array,
            Container::Map(_) => Kind::Map,
            Container::Set(_) => Kind::Set,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Container::Object(fields) => fields.len(),
            Container::Array(items) => items.len(),
            Container::Map(entries) => entries.len(),
            Container::Set(members) => members.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Normalize `key` for this container kind. Returns `None` when the key
    /// cannot address anything in this container.
    pub fn normalize_key(&self, key: &Key) -> Option<Key> {
        match (self, key) {
            (_, Key::Structure) => None,
            (Container::Object(_), Key::Name(_)) => Some(key.clone()),
            (Container::Object(_), Key::Index(index)) => Some(Key::from(index.to_string())),
            (Container::Object(_), Key::Entry(Value::String(s))) => Some(Key::Name(s.clone())),
            (Container::Object(_), Key::Entry(Value::Number(n))) => {
                Some(Key::from(Value::Number(*n).to_string()))
            }
            (Container::Object(_), Key::Entry(_)) => None,
            (Container::Array(_), Key::Index(_)) => Some(key.clone()),
            (Container::Array(_), Key::Name(name)) => name.parse().ok().map(Key::Index),
            (Container::Array(_), Key::Entry(Value::Number(n)))
                if *n >= 0.0 && n.fract() == 0.0 =>
            {
                Some(Key::Index(*n as usize))
            }
            (Container::Array(_), Key::Entry(_)) => None,
            (Container::Map(_) | Container::Set(_), Key::Entry(_)) => Some(key.clone()),
            (Container::Map(_) | Container::Set(_), Key::Name(name)) => {
                Some(Key::Entry(Value::String(name.clone())))
            }
            (Container::Map(_) | Container::Set(_), Key::Index(index)) => {
                Some(Key::Entry(Value::from(*index)))
            }
        }
    }

    /// Value stored under an already-normalized key. For sets, a present
    /// member maps to itself.
    pub fn get(&self, key: &Key) -> Value {
        match (self, key) {
            (Container::Object(fields), Key::Name(name)) => {
                fields.get(name).cloned().unwrap_or_default()
            }
            (Container::Array(items), Key::Index(index)) => {
                items.get(*index).cloned().unwrap_or_default()
            }
            (Container::Map(entries), Key::Entry(k)) => entries.get(k).cloned().unwrap_or_default(),
            (Container::Set(members), Key::Entry(m)) => {
                members.get(m).cloned().unwrap_or_default()
            }
            _ => Value::Undefined,
        }
    }

    /// Whether `key` is present.
    pub fn contains_key(&self, key: &Key) -> bool {
        match (self, key) {
            (Container::Object(fields), Key::Name(name)) => fields.contains_key(name),
            (Container::Array(items), Key::Index(index)) => *index < items.len(),
            (Container::Map(entries), Key::Entry(k)) => entries.contains_key(k),
            (Container::Set(members), Key::Entry(m)) => members.contains(m),
            _ => false,
        }
    }

    /// Keys in iteration order.
    pub fn keys(&self) -> Vec<Key> {
        match self {
            Container::Object(fields) => fields.keys().cloned().map(Key::Name).collect(),
            Container::Array(items) => (0..items.len()).map(Key::Index).collect(),
            Container::Map(entries) => entries.keys().cloned().map(Key::Entry).collect(),
            Container::Set(members) => members.iter().cloned().map(Key::Entry).collect(),
        }
    }

    /// Values in iteration order. For sets these are the members.
    pub fn values(&self) -> Vec<Value> {
        match self {
            Container::Object(fields) => fields.values().cloned().collect(),
            Container::Array(items) => items.clone(),
            Container::Map(entries) => entries.values().cloned().collect(),
            Container::Set(members) => members.iter().cloned().collect(),
        }
    }

    /// Key/value pairs in order.
    pub fn entries(&self) -> Vec<(Key, Value)> {
        match self {
            Container::Object(fields) => fields
                .iter()
                .map(|(k, v)| (Key::Name(k.clone()), v.clone()))
                .collect(),
            Container::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, v)| (Key::Index(i), v.clone()))
                .collect(),
            Container::Map(entries) => entries
                .iter()
                .map(|(k, v)| (Key::Entry(k.clone()), v.clone()))
                .collect(),
            Container::Set(members) => members
                .iter()
                .map(|m| (Key::Entry(m.clone()), m.clone()))
                .collect(),
        }
    }

    /// Every nested container together with the key it lives under. Map keys
    /// that are containers are not included; only values are children.
    pub fn children(&self) -> Vec<(Key, Raw)> {
        self.entries()
            .into_iter()
            .filter_map(|(key, value)| match value {
                Value::Raw(raw) => Some((key, raw)),
                _ => None,
            })
            .collect()
    }

    /// Whether `id` is still referenced directly by this container.
    pub fn references(&self, id: RawId) -> bool {
        let hit = |v: &Value| v.raw_id() == Some(id);
        match self {
            Container::Object(fields) => fields.values().any(hit),
            Container::Array(items) => items.iter().any(hit),
            Container::Map(entries) => entries.values().any(hit),
            Container::Set(members) => members.iter().any(hit),
        }
    }

    fn empty_like(&self) -> Container {
        match self {
            Container::Object(_) => Container::Object(IndexMap::new()),
            Container::Array(_) => Container::Array(Vec::new()),
            Container::Map(_) => Container::Map(IndexMap::new()),
            Container::Set(_) => Container::Set(IndexSet::new()),
        }
    }
}

struct RawCell {
    id: RawId,
    data: RwLock<Container>,
}

/// Shared handle to a plain container.
#[derive(Clone)]
pub struct Raw(Arc<RawCell>);

impl Raw {
    /// Share a new raw value holding `container`.
    pub fn new(container: Container) -> Self {
        Self(Arc::new(RawCell {
            id: RawId::next(),
            data: RwLock::new(container),
        }))
    }

    /// Empty object.
    pub fn object() -> Self {
        Self::new(Container::Object(IndexMap::new()))
    }

    /// Empty array.
    pub fn array() -> Self {
        Self::new(Container::Array(Vec::new()))
    }

    /// Empty map.
    pub fn map() -> Self {
        Self::new(Container::Map(IndexMap::new()))
    }

    /// Empty set.
    pub fn set() -> Self {
        Self::new(Container::Set(IndexSet::new()))
    }

    /// Object with `fields` in order.
    pub fn object_from<K, V>(fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<Arc<str>>,
        V: Into<Value>,
    {
        Self::new(Container::Object(
            fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into().into_stored()))
                .collect(),
        ))
    }

    /// Array of `items`.
    pub fn array_from<V: Into<Value>>(items: impl IntoIterator<Item = V>) -> Self {
        Self::new(Container::Array(
            items.into_iter().map(|v| v.into().into_stored()).collect(),
        ))
    }

    /// Map of `entries` in order.
    pub fn map_from<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<Value>,
        V: Into<Value>,
    {
        Self::new(Container::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into().into_stored(), v.into().into_stored()))
                .collect(),
        ))
    }

    /// Set of `members`, first occurrence kept.
    pub fn set_from<V: Into<Value>>(members: impl IntoIterator<Item = V>) -> Self {
        Self::new(Container::Set(
            members.into_iter().map(|v| v.into().into_stored()).collect(),
        ))
    }

    /// Identity of this raw value.
    pub fn id(&self) -> RawId {
        self.0.id
    }

    /// Kind of the current container.
    pub fn kind(&self) -> Kind {
        self.0.data.read().kind()
    }

    /// Whether both handles point at one container.
    pub fn ptr_eq(&self, other: &Raw) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.0.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read a member without any tracking or wrapping.
    pub fn get(&self, key: impl Into<Key>) -> Value {
        let data = self.0.data.read();
        data.normalize_key(&key.into())
            .map(|k| data.get(&k))
            .unwrap_or_default()
    }

    /// Run `f` with shared access to the contents.
    pub fn with<R>(&self, f: impl FnOnce(&Container) -> R) -> R {
        f(&self.0.data.read())
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, Container> {
        self.0.data.read()
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, Container> {
        self.0.data.write()
    }

    /// JSON rendering of the contents; see [`Value::to_json`].
    pub fn to_json(&self) -> serde_json::Value {
        let mut visiting = HashSet::new();
        self.to_json_inner(&mut visiting)
    }

    fn to_json_inner(&self, visiting: &mut HashSet<RawId>) -> serde_json::Value {
        if !visiting.insert(self.id()) {
            return serde_json::Value::Null;
        }

        let mut render = |value: &Value| match value.as_raw() {
            Some(raw) => raw.to_json_inner(visiting),
            None => primitive_to_json(value),
        };

        let data = self.read().clone();
        let json = match &data {
            Container::Object(fields) => serde_json::Value::Object(
                fields.iter().map(|(k, v)| (k.to_string(), render(v))).collect(),
            ),
            Container::Array(items) => serde_json::Value::Array(items.iter().map(render).collect()),
            Container::Map(entries) => serde_json::Value::Object(
                entries.iter().map(|(k, v)| (k.to_string(), render(v))).collect(),
            ),
            Container::Set(members) => {
                serde_json::Value::Array(members.iter().map(render).collect())
            }
        };

        visiting.remove(&self.id());
        json
    }

    /// Detached deep copy. Shared references and cycles inside the value are
    /// reproduced in the copy rather than duplicated.
    pub fn deep_clone(&self) -> Raw {
        let mut copies = HashMap::new();
        self.deep_clone_inner(&mut copies)
    }

    fn deep_clone_inner(&self, copies: &mut HashMap<RawId, Raw>) -> Raw {
        if let Some(copy) = copies.get(&self.id()) {
            return copy.clone();
        }

        let source = self.read().clone();
        let copy = Raw::new(source.empty_like());
        copies.insert(self.id(), copy.clone());

        let mut clone_value = |value: &Value| match value.as_raw() {
            Some(raw) => Value::Raw(raw.deep_clone_inner(copies)),
            None => value.clone(),
        };

        let filled = match &source {
            Container::Object(fields) => Container::Object(
                fields.iter().map(|(k, v)| (k.clone(), clone_value(v))).collect(),
            ),
            Container::Array(items) => Container::Array(items.iter().map(clone_value).collect()),
            Container::Map(entries) => Container::Map(
                entries.iter().map(|(k, v)| (k.clone(), clone_value(v))).collect(),
            ),
            Container::Set(members) => Container::Set(members.iter().map(clone_value).collect()),
        };

        *copy.write() = filled;
        copy
    }
}

impl fmt::Debug for Raw {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Raw")
            .field("id", &self.id().raw())
            .field("kind", &self.kind())
            .field("len", &self.len())
            .finish()
    }
}
