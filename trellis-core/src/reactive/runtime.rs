//! Reactive Runtime
//!
//! The runtime owns the process-wide bookkeeping that connects raw values to
//! their reactive states.
//!
//! # Registries
//!
//! 1. The state registry maps a raw value's identity to its live state core.
//!    Entries are weak: the registry never keeps a state alive. A core removes
//!    its own entry when it is destroyed or dropped.
//!
//! 2. The busy set (thread-local) holds the raw values that are in the middle
//!    of a mutation. A second mutation of the same raw value before the first
//!    one has written its result (for example from a devtool hook or a schema)
//!    is refused instead of interleaving with it.
//!
//! 3. The broadcast depth (thread-local) counts how deeply broadcasts are
//!    nested. A mutation that would start one level past the configured
//!    limit is refused before it writes anything.
//!
//! # Cleanup
//!
//! In a garbage-collected host, forgetting to unsubscribe is harmless because
//! weak maps drop metadata with the value. Here the equivalent is ownership:
//! metadata lives inside the state core and goes away deterministically when
//! the last handle is dropped, or earlier on an explicit destroy.

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::sync::{Arc, OnceLock, Weak};

use dashmap::DashMap;

use super::state::StateCore;
use crate::value::{Raw, RawId};

/// The global reactive runtime.
pub struct Runtime;

// Global registry of live states, keyed by raw identity.
static STATES: OnceLock<DashMap<RawId, Weak<StateCore>>> = OnceLock::new();

fn states() -> &'static DashMap<RawId, Weak<StateCore>> {
    STATES.get_or_init(DashMap::new)
}

thread_local! {
    static BUSY: RefCell<HashSet<RawId>> = RefCell::new(HashSet::new());
    static BROADCAST_DEPTH: Cell<usize> = const { Cell::new(0) };
}

impl Runtime {
    /// Live state core for `raw`, creating it with `create` when there is
    /// none. The boolean is `true` when a new core was created.
    pub(crate) fn get_or_create(
        raw: &Raw,
        create: impl FnOnce() -> Arc<StateCore>,
    ) -> (Arc<StateCore>, bool) {
        if let Some(existing) = Self::lookup(raw.id()) {
            return (existing, false);
        }

        let core = create();
        states().insert(raw.id(), Arc::downgrade(&core));
        (core, true)
    }

    /// Live, non-destroyed state core for a raw identity.
    pub(crate) fn lookup(id: RawId) -> Option<Arc<StateCore>> {
        // Clone the weak pointer first so no shard lock is held while the
        // upgraded core might be dropped.
        let weak = states().get(&id).map(|entry| entry.value().clone())?;
        weak.upgrade().filter(|core| !core.is_destroyed())
    }

    /// Remove the registry entry for `id` if it still belongs to `core`.
    pub(crate) fn unregister(id: RawId, core: *const StateCore) {
        states().remove_if(&id, |_, weak| std::ptr::eq(weak.as_ptr(), core));
    }

    /// Check whether a raw value currently has a live reactive state.
    pub fn is_reactive(raw: &Raw) -> bool {
        Self::lookup(raw.id()).is_some()
    }

    /// Number of registry entries. Dead entries are pruned first.
    pub fn registered_count() -> usize {
        states().retain(|_, weak| weak.strong_count() > 0);
        states().len()
    }

    /// Check whether `id` is inside a mutation on this thread.
    pub fn is_busy(id: RawId) -> bool {
        BUSY.with(|busy| busy.borrow().contains(&id))
    }

    /// Current broadcast nesting on this thread.
    pub fn broadcast_depth() -> usize {
        BROADCAST_DEPTH.with(Cell::get)
    }
}

/// Marks a raw value busy until dropped.
pub(crate) struct BusyGuard {
    id: RawId,
}

impl BusyGuard {
    /// `None` when the raw value is already busy.
    pub(crate) fn acquire(id: RawId) -> Option<Self> {
        BUSY.with(|busy| busy.borrow_mut().insert(id))
            .then_some(Self { id })
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        BUSY.with(|busy| {
            busy.borrow_mut().remove(&self.id);
        });
    }
}

/// Counts one level of broadcast nesting until dropped. The limit is
/// enforced where mutations start, see `intercept::enter`.
pub(crate) struct DepthGuard;

impl DepthGuard {
    pub(crate) fn enter() -> Self {
        BROADCAST_DEPTH.with(|depth| depth.set(depth.get() + 1));
        Self
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        BROADCAST_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}
