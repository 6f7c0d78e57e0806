//! Observer Implementation
//!
//! An Observer records which `(state, key)` pairs were read while it was
//! running and calls its callback when one of them changes.
//!
//! # How Observers Work
//!
//! 1. `run(f)` makes the observer current for the duration of `f`. Every
//!    tracked read of an observable state inside `f` adds the key to the
//!    observer's map and registers the observer on that state.
//!
//! 2. When a state broadcasts a change, each observer registered on it checks
//!    the event against its recorded keys. A match fires the callback once,
//!    no matter how many of the recorded keys the mutation touched.
//!
//! 3. Tracking accumulates across runs. `reset` (or auto-reset on fire)
//!    starts over; the next run rebuilds tracking from scratch.
//!
//! # Differences from Subscribers
//!
//! - Subscribers hear every mutation of one state; observers hear only the
//!   keys they read.
//! - Subscribers are registered explicitly; observers register themselves
//!   through reads.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::context::ObserverScope;
use super::event::ChangeEvent;
use super::state::{State, StateCore};
use crate::value::{Key, RawId};

/// Unique identifier for an observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

impl ObserverId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Callback invoked when a tracked key changes.
pub type OnChange = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

struct Tracked {
    state: Weak<StateCore>,
    keys: HashSet<Key>,
    /// The whole contents were read: every change matches.
    whole: bool,
}

pub(crate) struct ObserverCore {
    id: ObserverId,
    on_change: OnChange,
    tracked: Mutex<HashMap<RawId, Tracked>>,
    auto_destroy: bool,
    run_count: AtomicUsize,
    fire_count: AtomicUsize,
}

impl ObserverCore {
    pub(crate) fn id(&self) -> ObserverId {
        self.id
    }

    /// Record a read of `key` on `state` and register on the state.
    pub(crate) fn track(self: &Arc<Self>, state: &Arc<StateCore>, key: Key) {
        self.record(state, |entry| {
            entry.keys.insert(key);
        });
    }

    /// Record a read of the whole contents of `state`.
    pub(crate) fn track_whole(self: &Arc<Self>, state: &Arc<StateCore>) {
        self.record(state, |entry| {
            entry.keys.insert(Key::Structure);
            entry.whole = true;
        });
    }

    fn record(self: &Arc<Self>, state: &Arc<StateCore>, update: impl FnOnce(&mut Tracked)) {
        let raw_id = state.raw().id();
        let first_on_state = {
            let mut tracked = self.tracked.lock();
            let entry = tracked.entry(raw_id).or_insert_with(|| Tracked {
                state: Arc::downgrade(state),
                keys: HashSet::new(),
                whole: false,
            });
            let first = entry.keys.is_empty();
            update(entry);
            first
        };

        if first_on_state {
            state
                .meta
                .lock()
                .observers
                .entry(self.id)
                .or_insert_with(|| Arc::downgrade(self));
        }
    }

    /// Whether `event`, broadcast on the state holding `raw_id`, concerns a
    /// key this observer read. `direct` is false for events propagated from
    /// a child, which only match on their leading key.
    pub(crate) fn matches(&self, raw_id: RawId, event: &ChangeEvent, direct: bool) -> bool {
        let tracked = self.tracked.lock();
        let Some(entry) = tracked.get(&raw_id) else {
            return false;
        };
        if entry.whole {
            return true;
        }
        let keys = &entry.keys;

        if !direct {
            return event.keys().first().is_some_and(|key| keys.contains(key));
        }
        if event.kind().is_bulk() {
            return !keys.is_empty();
        }
        if event.is_structural() && keys.contains(&Key::Structure) {
            return true;
        }
        event.keys().iter().any(|key| keys.contains(key))
    }

    pub(crate) fn fire(&self, event: &ChangeEvent) {
        if self.auto_destroy {
            self.reset();
        }
        self.fire_count.fetch_add(1, Ordering::SeqCst);
        (self.on_change)(event);
    }

    /// Drop the tracking of one raw value without touching the state.
    pub(crate) fn forget(&self, raw_id: RawId) {
        self.tracked.lock().remove(&raw_id);
    }

    /// Clear all tracking and unregister from every state.
    pub(crate) fn reset(&self) {
        let tracked = std::mem::take(&mut *self.tracked.lock());
        for entry in tracked.into_values() {
            if let Some(state) = entry.state.upgrade() {
                state.meta.lock().observers.shift_remove(&self.id);
            }
        }
    }

    fn snapshot(&self) -> HashMap<RawId, HashSet<Key>> {
        self.tracked
            .lock()
            .iter()
            .map(|(id, entry)| (*id, entry.keys.clone()))
            .collect()
    }
}

impl Drop for ObserverCore {
    fn drop(&mut self) {
        self.reset();
    }
}

/// A dependency-tracking unit.
///
/// Cloning an `Observer` clones the handle; all clones share tracking.
///
/// # Example
///
/// ```rust,ignore
/// let state = wrap(json!({"a": 1, "b": 2}))?;
/// let observer = Observer::new(|event| println!("changed: {}", event.path_string()));
///
/// observer.run(|| state.get("a"));
/// state.set("b", 3)?;   // not tracked, nothing printed
/// state.set("a", 5)?;   // prints "changed: a"
/// ```
#[derive(Clone)]
pub struct Observer(Arc<ObserverCore>);

impl Observer {
    /// Create an observer that calls `on_change` for each matching event.
    pub fn new<F>(on_change: F) -> Self
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        Self::build(Arc::new(on_change), false)
    }

    /// An observer that clears its tracking every time it fires, so the
    /// next run starts fresh.
    pub fn with_auto_destroy<F>(on_change: F) -> Self
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        Self::build(Arc::new(on_change), true)
    }

    fn build(on_change: OnChange, auto_destroy: bool) -> Self {
        Self(Arc::new(ObserverCore {
            id: ObserverId::next(),
            on_change,
            tracked: Mutex::new(HashMap::new()),
            auto_destroy,
            run_count: AtomicUsize::new(0),
            fire_count: AtomicUsize::new(0),
        }))
    }

    /// Identity of this observer.
    pub fn id(&self) -> ObserverId {
        self.0.id
    }

    pub(crate) fn core(&self) -> &Arc<ObserverCore> {
        &self.0
    }

    /// Run `f` with this observer current and return its result.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> R {
        let _scope = ObserverScope::enter(Some(self.0.clone()));
        self.0.run_count.fetch_add(1, Ordering::SeqCst);
        f()
    }

    /// Track `key` on `state` without reading it. Ignored for states that
    /// are not observable or no longer live.
    pub fn track(&self, state: &State, key: impl Into<Key>) {
        let core = state.core();
        if !core.options.observable || core.is_destroyed() {
            return;
        }
        if let Some(key) = core.normalize_key(key.into()) {
            self.0.track(core, key);
        }
    }

    /// Clear all tracking and unregister from every state. Idempotent; the
    /// observer can be run again afterwards.
    pub fn destroy(&self) {
        self.0.reset();
    }

    /// Keys read so far, per raw value.
    pub fn states(&self) -> HashMap<RawId, HashSet<Key>> {
        self.0.snapshot()
    }

    /// Whether `key` of `state` is tracked.
    pub fn is_tracking(&self, state: &State, key: impl Into<Key>) -> bool {
        let Some(key) = state.core().normalize_key(key.into()) else {
            return false;
        };
        self.0
            .tracked
            .lock()
            .get(&state.raw().id())
            .is_some_and(|entry| entry.keys.contains(&key))
    }

    /// Number of times [`Observer::run`] was entered.
    pub fn run_count(&self) -> usize {
        self.0.run_count.load(Ordering::SeqCst)
    }

    /// Number of times the callback fired.
    pub fn fire_count(&self) -> usize {
        self.0.fire_count.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("id", &self.0.id)
            .field("states", &self.0.tracked.lock().len())
            .field("auto_destroy", &self.0.auto_destroy)
            .finish()
    }
}

/// Create an observer, optionally pre-tracking some keys.
pub fn create_observer<F, I, K>(on_change: F, initial_keys: I, auto_destroy: bool) -> Observer
where
    F: Fn(&ChangeEvent) + Send + Sync + 'static,
    I: IntoIterator<Item = (State, K)>,
    K: Into<Key>,
{
    let observer = Observer::build(Arc::new(on_change), auto_destroy);
    for (state, key) in initial_keys {
        observer.track(&state, key);
    }
    observer
}
