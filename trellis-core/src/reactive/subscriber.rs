//! Subscriber types for the reactive system.
//!
//! A subscriber is a plain callback registered on one state. Unlike observers
//! it does not track reads: it hears every mutation of the state it is
//! registered on (and, when recursive, of every state below it).

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use super::event::ChangeEvent;
use super::link;
use super::state::StateCore;
use crate::value::Value;

/// Unique identifier for a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Generate a new unique subscriber ID.
    ///
    /// Uses an atomic counter to ensure uniqueness across threads.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

/// Callback invoked with the subscribed value and the change record.
pub type Handler = Arc<dyn Fn(&Value, &ChangeEvent) + Send + Sync>;

/// A registered callback.
///
/// Broadcasts iterate over a snapshot of the subscriber list, so a subscriber
/// removed mid-broadcast is still in that snapshot. The `active` flag is
/// checked right before every call to skip it.
pub(crate) struct Subscriber {
    id: SubscriberId,
    handler: Handler,
    recursive: bool,
    active: AtomicBool,
}

impl Subscriber {
    pub(crate) fn new(handler: Handler, recursive: bool) -> Self {
        Self {
            id: SubscriberId::new(),
            handler,
            recursive,
            active: AtomicBool::new(true),
        }
    }

    pub(crate) fn id(&self) -> SubscriberId {
        self.id
    }

    pub(crate) fn is_recursive(&self) -> bool {
        self.recursive
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Returns `true` if this call is the one that deactivated it.
    pub(crate) fn deactivate(&self) -> bool {
        self.active.swap(false, Ordering::SeqCst)
    }

    pub(crate) fn notify(&self, target: &Value, event: &ChangeEvent) {
        if self.is_active() {
            (self.handler)(target, event);
        }
    }
}

/// Handle to a registered subscriber.
///
/// Dropping the subscription unsubscribes. [`Subscription::unsubscribe`] does
/// the same explicitly and may be called any number of times, including from
/// inside the handler itself. Use [`Subscription::detach`] to keep the
/// subscriber registered for as long as the state lives.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    inner: Option<Registration>,
}

struct Registration {
    state: Weak<StateCore>,
    subscriber: Arc<Subscriber>,
}

impl Subscription {
    pub(crate) fn new(state: Weak<StateCore>, subscriber: Arc<Subscriber>) -> Self {
        Self {
            inner: Some(Registration { state, subscriber }),
        }
    }

    /// A subscription that is not attached to anything. Returned by the
    /// degraded paths.
    pub fn inert() -> Self {
        Self { inner: None }
    }

    /// Remove the subscriber. Idempotent.
    pub fn unsubscribe(&self) {
        let Some(registration) = &self.inner else {
            return;
        };
        if !registration.subscriber.deactivate() {
            return;
        }

        if let Some(core) = registration.state.upgrade() {
            let id = registration.subscriber.id();
            core.meta.lock().subscribers.retain(|s| s.id() != id);
            if registration.subscriber.is_recursive() {
                link::release(&core);
            }
        }
    }

    /// Keep the subscriber registered after this handle is dropped.
    pub fn detach(mut self) {
        self.inner = None;
    }

    /// Whether the subscriber will still be called.
    pub fn is_active(&self) -> bool {
        self.inner
            .as_ref()
            .is_some_and(|r| r.subscriber.is_active() && r.state.strong_count() > 0)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.inner.as_ref().map(|r| r.subscriber.id()))
            .field("active", &self.is_active())
            .finish()
    }
}
