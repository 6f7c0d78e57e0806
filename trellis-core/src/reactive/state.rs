//! State Implementation
//!
//! A [`State`] is the reactive handle over one raw container. There is at
//! most one live state per raw value: wrapping the same raw value again
//! returns the same state.
//!
//! # Lifetime
//!
//! All bookkeeping for a state (subscribers, observers, cached child states,
//! recursive links) lives in its core, which is shared by every handle.
//! The core goes away when the last handle is dropped, or earlier through
//! [`State::destroy`]. A parent keeps the child states it handed out alive,
//! so subscriptions on `state.get("user")` survive the temporary handle.
//!
//! Data that contains itself through more than one container keeps those
//! states alive until one of them is destroyed.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, warn};

use super::context;
use super::devtool::{self, StateInfo};
use super::event::ChangeEvent;
use super::link;
use super::observer::{ObserverCore, ObserverId};
use super::options::StateOptions;
use super::runtime::Runtime;
use super::subscriber::{Subscriber, Subscription};
use crate::error::{ReactiveError, Result};
use crate::schema::SchemaRef;
use crate::value::{Key, Kind, Raw, RawId, Value};

/// Unique identifier for a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct StateId(u64);

impl StateId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Numeric form of the id.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Mutable bookkeeping of a state.
#[derive(Default)]
pub(crate) struct Meta {
    pub(crate) subscribers: Vec<Arc<Subscriber>>,
    pub(crate) observers: IndexMap<ObserverId, Weak<ObserverCore>>,
    /// Child states handed out by reads, by raw identity.
    pub(crate) children: HashMap<RawId, State>,
    /// Children linked while the state is deep.
    pub(crate) links: Vec<(Key, State)>,
    /// Parents this state is linked under.
    pub(crate) parents: Vec<(Weak<StateCore>, Key)>,
    /// Number of reasons (recursive subscribers, parent links) to be deep.
    pub(crate) deep: usize,
}

pub(crate) struct StateCore {
    id: StateId,
    raw: Raw,
    pub(crate) options: StateOptions,
    pub(crate) meta: Mutex<Meta>,
    destroyed: AtomicBool,
}

impl StateCore {
    fn new(raw: Raw, options: StateOptions) -> Arc<Self> {
        Arc::new(Self {
            id: StateId::next(),
            raw,
            options,
            meta: Mutex::new(Meta::default()),
            destroyed: AtomicBool::new(false),
        })
    }

    /// The live state for `raw`, creating it with `options` if needed.
    fn wrap(raw: Raw, options: StateOptions) -> State {
        let (core, created) = Runtime::get_or_create(&raw, || StateCore::new(raw.clone(), options));

        if created {
            debug!(state = ?core.id, kind = core.raw.kind().as_str(), "state created");
            if let Some(devtool) = &core.options.devtool {
                devtool::notify_init(devtool.as_ref(), &core.info());
            }
            if core.options.recursive {
                let children = core.raw.read().children();
                for (key, child) in children {
                    core.child_state(&key, &child);
                }
            }
        }

        State(core)
    }

    pub(crate) fn id(&self) -> StateId {
        self.id
    }

    pub(crate) fn raw(&self) -> &Raw {
        &self.raw
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Normalize a key for this container. `Key::Structure` passes through.
    pub(crate) fn normalize_key(&self, key: Key) -> Option<Key> {
        match key {
            Key::Structure => Some(Key::Structure),
            key => self.raw.read().normalize_key(&key),
        }
    }

    /// Sub-schema for values stored under `key`.
    pub(crate) fn child_schema(&self, key: &Key) -> Option<SchemaRef> {
        let schema = self.options.schema.as_ref()?;
        match key {
            Key::Name(name) => schema.field(name),
            Key::Index(_) | Key::Entry(_) => schema.element(),
            Key::Structure => None,
        }
    }

    pub(crate) fn info(&self) -> StateInfo {
        let (subscribers, observers) = {
            let meta = self.meta.lock();
            (meta.subscribers.len(), meta.observers.len())
        };
        StateInfo {
            id: self.id,
            kind: self.raw.kind().as_str(),
            strict: self.options.strict,
            immutable: self.options.immutable,
            observable: self.options.observable,
            recursive: self.options.recursive,
            subscribers,
            observers,
        }
    }

    /// The state for a child container found under `key`, cached on this
    /// state.
    pub(crate) fn child_state(self: &Arc<Self>, key: &Key, raw: &Raw) -> State {
        if raw.ptr_eq(&self.raw) {
            return State(self.clone());
        }

        let cached = self
            .meta
            .lock()
            .children
            .get(&raw.id())
            .filter(|child| !child.is_destroyed())
            .cloned();
        if let Some(child) = cached {
            return child;
        }

        let options = self.options.for_child(self.child_schema(key));
        let child = StateCore::wrap(raw.clone(), options);

        if !self.is_destroyed() {
            let replaced = self.meta.lock().children.insert(raw.id(), child.clone());
            drop(replaced);
        }
        child
    }

    /// Drop the cached child state for `raw` unless the container still
    /// holds it somewhere.
    pub(crate) fn forget_child(&self, raw: &Raw) {
        if self.raw.read().references(raw.id()) {
            return;
        }
        let removed = self.meta.lock().children.remove(&raw.id());
        drop(removed);
    }

    /// Present a stored value to a reader: containers come back as states.
    fn expose(self: &Arc<Self>, key: &Key, value: Value) -> Value {
        match value {
            Value::Raw(raw) if !self.is_destroyed() => Value::State(self.child_state(key, &raw)),
            other => other,
        }
    }

    /// Record a read of `key` against the current observer.
    fn track(self: &Arc<Self>, key: &Key) {
        if !self.options.observable || self.is_destroyed() {
            return;
        }
        if let Some(observer) = context::current() {
            observer.track(self, key.clone());
        }
    }

    /// Record a read of the whole contents, nested containers included.
    fn track_deep(self: &Arc<Self>) {
        let Some(observer) = context::current() else {
            return;
        };
        let mut seen = HashSet::new();
        self.track_whole(&observer, &mut seen);
    }

    fn track_whole(self: &Arc<Self>, observer: &Arc<ObserverCore>, seen: &mut HashSet<RawId>) {
        if self.is_destroyed() || !seen.insert(self.raw.id()) {
            return;
        }
        if self.options.observable {
            observer.track_whole(self);
        }
        let children = self.raw.read().children();
        for (key, raw) in children {
            self.child_state(&key, &raw).0.track_whole(observer, seen);
        }
    }

    fn destroy(self: &Arc<Self>) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }

        Runtime::unregister(self.raw.id(), Arc::as_ptr(self));
        let meta = std::mem::take(&mut *self.meta.lock());
        self.teardown(meta);
        debug!(state = ?self.id, "state destroyed");
    }

    fn teardown(&self, meta: Meta) {
        let this: *const StateCore = self;

        for subscriber in &meta.subscribers {
            subscriber.deactivate();
        }
        for observer in meta.observers.values().filter_map(Weak::upgrade) {
            observer.forget(self.raw.id());
        }
        for (key, child) in &meta.links {
            link::detach_parent(child.core(), this, key);
            link::release(child.core());
        }
        for (parent, key) in &meta.parents {
            if let Some(parent) = parent.upgrade() {
                link::drop_link(&parent, this, key);
            }
        }

        // Cached children are released here, outside of any lock.
        drop(meta);
    }
}

impl Drop for StateCore {
    fn drop(&mut self) {
        let this: *const StateCore = self;
        Runtime::unregister(self.raw.id(), this);
        let meta = std::mem::take(self.meta.get_mut());
        self.teardown(meta);
    }
}

/// Reactive handle over a raw container.
///
/// Handles are cheap to clone; all clones share one core. Two handles are
/// equal when they share a core.
///
/// # Example
///
/// ```rust,ignore
/// let state = wrap(json!({"user": {"name": "Ada"}}))?;
/// let user = state.get("user");             // a child State
/// user.as_state().unwrap().set("name", "Grace")?;
/// assert_eq!(state.to_json(), json!({"user": {"name": "Grace"}}));
/// ```
#[derive(Clone)]
pub struct State(pub(crate) Arc<StateCore>);

impl State {
    pub(crate) fn core(&self) -> &Arc<StateCore> {
        &self.0
    }

    /// Identity of this state, stable for its lifetime.
    pub fn id(&self) -> StateId {
        self.0.id
    }

    /// The wrapped raw value.
    pub fn raw(&self) -> &Raw {
        &self.0.raw
    }

    /// Kind of the wrapped container.
    pub fn kind(&self) -> Kind {
        self.0.raw.kind()
    }

    /// Options the state was created with.
    pub fn options(&self) -> &StateOptions {
        &self.0.options
    }

    /// Whether [`State::destroy`] has run.
    pub fn is_destroyed(&self) -> bool {
        self.0.is_destroyed()
    }

    /// Whether both handles share one core.
    pub fn ptr_eq(&self, other: &State) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Summary for devtools and debugging.
    pub fn info(&self) -> StateInfo {
        self.0.info()
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// Read `key`. Nested containers are returned as child states.
    pub fn get(&self, key: impl Into<Key>) -> Value {
        let Some(key) = self.0.normalize_key(key.into()) else {
            return Value::Undefined;
        };
        self.0.track(&key);
        let value = self.0.raw.read().get(&key);
        self.0.expose(&key, value)
    }

    /// Whether `key` is present. Tracked like [`State::get`].
    pub fn has(&self, key: impl Into<Key>) -> bool {
        let Some(key) = self.0.normalize_key(key.into()) else {
            return false;
        };
        self.0.track(&key);
        self.0.raw.read().contains_key(&key)
    }

    /// Number of entries. Depends on the structure, not on values.
    pub fn len(&self) -> usize {
        self.0.track(&Key::Structure);
        self.0.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys in order.
    pub fn keys(&self) -> Vec<Key> {
        self.0.track(&Key::Structure);
        self.0.raw.read().keys()
    }

    /// Values in order, nested containers as child states.
    pub fn values(&self) -> Vec<Value> {
        self.entries().into_iter().map(|(_, value)| value).collect()
    }

    /// Key/value pairs in order; every key read counts as tracked.
    pub fn entries(&self) -> Vec<(Key, Value)> {
        self.0.track(&Key::Structure);
        let entries = self.0.raw.read().entries();
        entries
            .into_iter()
            .map(|(key, value)| {
                self.0.track(&key);
                let value = self.0.expose(&key, value);
                (key, value)
            })
            .collect()
    }

    /// Detached deep copy of the current contents. Inside an observer run
    /// this depends on every nested value.
    pub fn snapshot(&self) -> Raw {
        self.0.track_deep();
        self.0.raw.deep_clone()
    }

    /// JSON form of the current contents. Tracked like [`State::snapshot`].
    pub fn to_json(&self) -> serde_json::Value {
        self.0.track_deep();
        self.0.raw.to_json()
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Register `handler` for every mutation of this state.
    ///
    /// With `emit_immediately` the handler is called once with an `init`
    /// event before this returns. With `recursive` it also hears mutations
    /// of every nested state, present and future, with the path from this
    /// state prefixed.
    pub fn subscribe<F>(&self, handler: F, emit_immediately: bool, recursive: bool) -> Subscription
    where
        F: Fn(&Value, &ChangeEvent) + Send + Sync + 'static,
    {
        let target = Value::State(self.clone());
        if self.is_destroyed() {
            warn!(
                state = ?self.0.id,
                error = %ReactiveError::access("state is destroyed"),
                "subscribe degraded to a single init call"
            );
            handler(&target, &ChangeEvent::init(target.clone()));
            return Subscription::inert();
        }

        let subscriber = Arc::new(Subscriber::new(Arc::new(handler), recursive));
        self.0.meta.lock().subscribers.push(subscriber.clone());
        if recursive {
            link::retain(&self.0);
        }

        if emit_immediately {
            subscriber.notify(&target, &ChangeEvent::init(target.clone()));
        }

        Subscription::new(Arc::downgrade(&self.0), subscriber)
    }

    /// Tear the state down. Idempotent.
    ///
    /// The raw value is left untouched. Other handles to this state become
    /// inert: mutations through them are refused with a warning.
    pub fn destroy(&self) {
        self.0.destroy();
    }
}

impl PartialEq for State {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for State {}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("State")
            .field("id", &self.0.id)
            .field("raw", &self.0.raw)
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

// -----------------------------------------------------------------------------
// Free functions
// -----------------------------------------------------------------------------

/// Wrap a container with default options. See [`wrap_with`].
pub fn wrap(value: impl Into<Value>) -> Result<State> {
    wrap_with(value, StateOptions::new())
}

/// Wrap a container.
///
/// An already-reactive value returns its existing state and `options` are
/// ignored. Primitives are rejected. When a schema is given, the initial
/// contents are validated: a strict state fails to build, any other state
/// logs the failure and is created anyway.
pub fn wrap_with(value: impl Into<Value>, options: StateOptions) -> Result<State> {
    let raw = match value.into() {
        Value::State(state) if !state.is_destroyed() => return Ok(state),
        Value::State(state) => state.raw().clone(),
        Value::Raw(raw) => raw,
        other => {
            return Err(ReactiveError::Unsupported {
                kind: other.kind_name(),
            })
        }
    };

    if let Some(existing) = Runtime::lookup(raw.id()) {
        return Ok(State(existing));
    }

    if let Some(schema) = &options.schema {
        if let Err(source) = schema.safe_parse(&Value::Raw(raw.clone())) {
            if options.strict {
                return Err(ReactiveError::validation("<root>", source));
            }
            error!(error = %source, "initial value failed validation");
        }
    }

    Ok(StateCore::wrap(raw, options))
}

/// The raw value behind a live state. `None` for anything else.
pub fn unwrap(value: &Value) -> Option<Raw> {
    match value {
        Value::State(state) if !state.is_destroyed() => Some(state.raw().clone()),
        _ => None,
    }
}

/// Subscribe to any value.
///
/// A value that is not reactive (a primitive, a raw value that was never
/// wrapped, a destroyed state) logs a warning, calls `handler` once with an
/// `init` event and returns an inert subscription.
pub fn subscribe<F>(
    target: impl Into<Value>,
    handler: F,
    emit_immediately: bool,
    recursive: bool,
) -> Subscription
where
    F: Fn(&Value, &ChangeEvent) + Send + Sync + 'static,
{
    let target = target.into();
    match live_state(&target) {
        Some(state) => state.subscribe(handler, emit_immediately, recursive),
        None => {
            warn!(
                kind = target.kind_name(),
                error = %ReactiveError::access("value is not reactive"),
                "subscribe degraded to a single init call"
            );
            handler(&target, &ChangeEvent::init(target.clone()));
            Subscription::inert()
        }
    }
}

/// Destroy a state. See [`State::destroy`].
pub fn destroy(state: &State) {
    state.destroy();
}

/// The live state for a value: the state itself, or the state registered
/// for a raw value.
pub(crate) fn live_state(value: &Value) -> Option<State> {
    match value {
        Value::State(state) if !state.is_destroyed() => Some(state.clone()),
        Value::Raw(raw) => Runtime::lookup(raw.id()).map(State),
        _ => None,
    }
}
