//! Broadcast pipeline.
//!
//! Delivery order for one event on one state:
//!
//! 1. plain subscribers, in subscription order;
//! 2. observers tracking a matching key;
//! 3. parent states linked to this one, with the link key prefixed to the
//!    path. Parents only deliver to their recursive subscribers and to
//!    observers matching the leading key.
//!
//! One mutation is one cascade. Within a cascade each state is visited once
//! and each observer fires at most once. Nothing is locked while handlers
//! run; every list is copied out first, and each subscriber's liveness is
//! re-checked right before its call.

use std::collections::HashSet;
use std::sync::{Arc, Weak};

use super::event::ChangeEvent;
use super::observer::ObserverId;
use super::runtime::DepthGuard;
use super::state::{State, StateCore, StateId};
use crate::value::Value;

#[derive(Default)]
struct Cascade {
    visited: HashSet<StateId>,
    fired: HashSet<ObserverId>,
}

/// Deliver `event`, produced by a mutation of `core`.
pub(crate) fn broadcast(core: &Arc<StateCore>, event: ChangeEvent) {
    let _depth = DepthGuard::enter();
    let mut cascade = Cascade::default();
    deliver(core, &event, true, &mut cascade);
}

fn deliver(core: &Arc<StateCore>, event: &ChangeEvent, direct: bool, cascade: &mut Cascade) {
    if core.is_destroyed() || !cascade.visited.insert(core.id()) {
        return;
    }

    let (subscribers, observers, parents) = {
        let meta = core.meta.lock();
        (
            meta.subscribers.clone(),
            meta.observers.values().cloned().collect::<Vec<_>>(),
            meta.parents.clone(),
        )
    };

    let target = Value::State(State(core.clone()));
    for subscriber in &subscribers {
        if direct || subscriber.is_recursive() {
            subscriber.notify(&target, event);
        }
    }

    if core.options.observable {
        let raw_id = core.raw().id();
        for observer in observers.iter().filter_map(Weak::upgrade) {
            if cascade.fired.contains(&observer.id()) {
                continue;
            }
            if observer.matches(raw_id, event, direct) {
                cascade.fired.insert(observer.id());
                observer.fire(event);
            }
        }
    }

    for (parent, key) in parents {
        if let Some(parent) = parent.upgrade() {
            deliver(&parent, &event.prefixed(&key), false, cascade);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{wrap, Observer};
    use parking_lot::Mutex;
    use serde_json::json;

    #[test]
    fn subscribers_run_before_observers_in_order() {
        let state = wrap(json!({"a": 1})).unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));

        let observer = {
            let order = order.clone();
            Observer::new(move |_| order.lock().push("observer"))
        };
        observer.run(|| state.get("a"));

        let first = {
            let order = order.clone();
            state.subscribe(move |_, _| order.lock().push("first"), false, false)
        };
        let second = {
            let order = order.clone();
            state.subscribe(move |_, _| order.lock().push("second"), false, false)
        };

        state.set("a", 2).unwrap();
        assert_eq!(*order.lock(), vec!["first", "second", "observer"]);
        drop((first, second));
    }

    #[test]
    fn unsubscribe_during_broadcast_skips_later_call() {
        let state = wrap(json!({"a": 1})).unwrap();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let second_slot: Arc<Mutex<Option<crate::reactive::Subscription>>> = Arc::default();

        let _first = {
            let calls = calls.clone();
            let second_slot = second_slot.clone();
            state.subscribe(
                move |_, _| {
                    calls.lock().push("first");
                    if let Some(second) = second_slot.lock().as_ref() {
                        second.unsubscribe();
                    }
                },
                false,
                false,
            )
        };
        let second = {
            let calls = calls.clone();
            state.subscribe(move |_, _| calls.lock().push("second"), false, false)
        };
        *second_slot.lock() = Some(second);

        state.set("a", 2).unwrap();
        assert_eq!(*calls.lock(), vec!["first"]);
    }

    #[test]
    fn circular_parents_terminate() {
        let a = wrap(json!({})).unwrap();
        let b = wrap(json!({})).unwrap();
        a.set("b", &b).unwrap();
        b.set("a", &a).unwrap();

        let hits = Arc::new(Mutex::new(0));
        let sub = {
            let hits = hits.clone();
            a.subscribe(move |_, _| *hits.lock() += 1, false, true)
        };

        b.set("x", 1).unwrap();
        assert_eq!(*hits.lock(), 1);

        drop(sub);
        a.destroy();
        b.destroy();
    }
}
