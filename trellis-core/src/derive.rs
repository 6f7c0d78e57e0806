//! Derivation Helpers
//!
//! Small compositions of subscriptions:
//!
//! - [`pipe`] copies a source into a target on every change;
//! - [`bind`] keeps two states in sync in both directions;
//! - [`derive`] feeds snapshots of a state to a function;
//! - [`log`] traces every change of a state.
//!
//! All of them subscribe recursively and hand out snapshots, never live
//! states, so a transform cannot mutate its source by accident. A source or
//! target that is not usable is logged and yields an inert handle.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::error::ReactiveError;
use crate::reactive::{live_state, untracked, ChangeEvent, EventKind, State, Subscription};
use crate::value::{Container, Key, Kind, Raw, Value};

/// Maps a snapshot before it is written to the other side.
pub type Transform = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// Where a pipe or binding writes.
enum Sink {
    State(State),
    Raw(Raw),
}

impl Sink {
    fn resolve(value: &Value) -> Option<Sink> {
        if let Some(state) = live_state(value) {
            return matches!(state.kind(), Kind::Object | Kind::Array).then_some(Sink::State(state));
        }
        match value {
            Value::Raw(raw) if matches!(raw.kind(), Kind::Object | Kind::Array) => Some(Sink::Raw(raw.clone())),
            _ => None,
        }
    }

    /// Shallow-merge `value` into the sink. Arrays are replaced wholesale.
    fn write(&self, value: &Value) {
        let Some(source) = value.as_raw() else {
            warn!(kind = value.kind_name(), "cannot merge a primitive into a container");
            return;
        };

        match self {
            Sink::Raw(raw) => match live_state(&Value::Raw(raw.clone())) {
                Some(state) => write_state(&state, &source),
                None => write_raw(raw, &source),
            },
            Sink::State(state) => write_state(state, &source),
        }
    }
}

fn write_state(state: &State, source: &Raw) {
    match state.kind() {
        Kind::Array => {
            let values = source.read().values();
            state.splice(0, usize::MAX, values);
        }
        _ => {
            let entries = source.read().entries();
            if let Err(error) = state.assign(entries) {
                error!(state = ?state.id(), %error, "merge rejected");
            }
        }
    }
}

fn write_raw(raw: &Raw, source: &Raw) {
    let (entries, values) = {
        let source = source.read();
        (source.entries(), source.values())
    };

    let mut data = raw.write();
    if let Container::Array(items) = &mut *data {
        *items = values;
        return;
    }
    for (key, value) in entries {
        let Some(Key::Name(name)) = data.normalize_key(&key) else {
            continue;
        };
        if let Container::Object(fields) = &mut *data {
            fields.insert(name, value);
        }
    }
}

/// Snapshot of the state a handler was called for.
fn snapshot_of(target: &Value) -> Option<Value> {
    target.as_state().map(|state| Value::Raw(untracked(|| state.snapshot())))
}

fn apply(transform: Option<&Transform>, value: Value) -> Value {
    match transform {
        Some(transform) => transform(&value),
        None => value,
    }
}

/// Copy `source` into `target` after every change of `source`.
///
/// The target may be a reactive object (written with one `assign`), a
/// reactive array (replaced with one `splice`) or a plain object or array
/// that was never wrapped (written directly, no events). The current
/// contents are not copied; only later changes are.
pub fn pipe(source: impl Into<Value>, target: impl Into<Value>, transform: Option<Transform>) -> Subscription {
    let (source, target) = (source.into(), target.into());
    let Some(source) = live_state(&source) else {
        warn!(
            kind = source.kind_name(),
            error = %ReactiveError::access("pipe source is not reactive"),
            "pipe not created"
        );
        return Subscription::inert();
    };
    let Some(sink) = Sink::resolve(&target) else {
        warn!(
            kind = target.kind_name(),
            error = %ReactiveError::access("pipe target cannot be assigned to"),
            "pipe not created"
        );
        return Subscription::inert();
    };

    source.subscribe(
        move |value, event| {
            if event.kind() == EventKind::Init {
                return;
            }
            if let Some(snapshot) = snapshot_of(value) {
                sink.write(&apply(transform.as_ref(), snapshot));
            }
        },
        false,
        true,
    )
}

/// Two subscriptions keeping a pair of states in sync. Dropping it unbinds.
#[must_use = "dropping a Binding unbinds immediately"]
pub struct Binding {
    left: Subscription,
    right: Subscription,
}

impl Binding {
    fn inert() -> Self {
        Self {
            left: Subscription::inert(),
            right: Subscription::inert(),
        }
    }

    /// Stop syncing. Idempotent.
    pub fn unbind(&self) {
        self.left.unsubscribe();
        self.right.unsubscribe();
    }

    /// Whether either direction is still subscribed.
    pub fn is_active(&self) -> bool {
        self.left.is_active() && self.right.is_active()
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("active", &self.is_active())
            .finish()
    }
}

/// Keep `left` and `right` in sync. See [`bind_with`].
pub fn bind(left: impl Into<Value>, right: impl Into<Value>) -> Binding {
    bind_with(left, right, None, None)
}

/// Keep `left` and `right` in sync, mapping values on the way across.
///
/// `right` first receives a copy of `left`. After that a change on either
/// side is written to the other. `left_to_right` maps snapshots of `left`
/// before they reach `right`; `right_to_left` the other way.
///
/// While one side is being written in response to the other, its own change
/// events are not sent back, so every external write causes exactly one
/// write on the opposite side.
pub fn bind_with(
    left: impl Into<Value>,
    right: impl Into<Value>,
    left_to_right: Option<Transform>,
    right_to_left: Option<Transform>,
) -> Binding {
    let (left, right) = (left.into(), right.into());
    let (Some(left), Some(right)) = (live_state(&left), live_state(&right)) else {
        warn!(
            left = left.kind_name(),
            right = right.kind_name(),
            error = %ReactiveError::access("both sides of a binding must be reactive"),
            "binding not created"
        );
        return Binding::inert();
    };
    let (Some(left_sink), Some(right_sink)) = (
        Sink::resolve(&Value::State(left.clone())),
        Sink::resolve(&Value::State(right.clone())),
    ) else {
        warn!(
            left = left.kind().as_str(),
            right = right.kind().as_str(),
            error = %ReactiveError::access("bound states must be objects or arrays"),
            "binding not created"
        );
        return Binding::inert();
    };

    let updating_left = Arc::new(AtomicBool::new(false));
    let updating_right = Arc::new(AtomicBool::new(false));

    let initial = Value::Raw(untracked(|| left.snapshot()));
    right_sink.write(&apply(left_to_right.as_ref(), initial));

    let left_subscription = {
        let (updating_left, updating_right) = (updating_left.clone(), updating_right.clone());
        left.subscribe(
            move |value, event| {
                forward(
                    value,
                    event,
                    &updating_left,
                    &updating_right,
                    &right_sink,
                    left_to_right.as_ref(),
                )
            },
            false,
            true,
        )
    };
    let right_subscription = right.subscribe(
        move |value, event| {
            forward(
                value,
                event,
                &updating_right,
                &updating_left,
                &left_sink,
                right_to_left.as_ref(),
            )
        },
        false,
        true,
    );

    Binding {
        left: left_subscription,
        right: right_subscription,
    }
}

/// Handle a change on one side of a binding. `receiving` is set while this
/// side is being written by the binding itself; `sending` guards the other.
fn forward(
    value: &Value,
    event: &ChangeEvent,
    receiving: &AtomicBool,
    sending: &AtomicBool,
    sink: &Sink,
    transform: Option<&Transform>,
) {
    if event.kind() == EventKind::Init || receiving.load(Ordering::Acquire) {
        return;
    }
    let Some(snapshot) = snapshot_of(value) else {
        return;
    };

    sending.store(true, Ordering::Release);
    sink.write(&apply(transform, snapshot));
    sending.store(false, Ordering::Release);
}

/// Call `f` with a snapshot of `source` now and after every change.
pub fn derive<F>(source: impl Into<Value>, f: F) -> Subscription
where
    F: Fn(&Value) + Send + Sync + 'static,
{
    let source = source.into();
    let Some(state) = live_state(&source) else {
        warn!(
            kind = source.kind_name(),
            error = %ReactiveError::access("derive source is not reactive"),
            "derive not created"
        );
        return Subscription::inert();
    };

    state.subscribe(
        move |value, _| {
            if let Some(snapshot) = snapshot_of(value) {
                f(&snapshot);
            }
        },
        true,
        true,
    )
}

/// Log every change of `source` at `info` level under `label`.
pub fn log(source: impl Into<Value>, label: &str) -> Subscription {
    let source = source.into();
    let Some(state) = live_state(&source) else {
        warn!(
            label,
            kind = source.kind_name(),
            error = %ReactiveError::access("log source is not reactive"),
            "log tap not created"
        );
        return Subscription::inert();
    };

    let label = label.to_string();
    state.subscribe(
        move |_, event| {
            info!(
                label = %label,
                kind = event.kind().as_str(),
                path = %event.path_string(),
                prev = %event.prev().to_json(),
                value = %event.value().to_json(),
                "state changed"
            );
        },
        true,
        true,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::wrap;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn count_writes(state: &State) -> (Arc<AtomicUsize>, Subscription) {
        let count = Arc::new(AtomicUsize::new(0));
        let sub = {
            let count = count.clone();
            state.subscribe(move |_, _| { count.fetch_add(1, Ordering::SeqCst); }, false, false)
        };
        (count, sub)
    }

    #[test]
    fn pipe_copies_later_changes() {
        let source = wrap(json!({"a": 1})).unwrap();
        let target = wrap(json!({"z": 0})).unwrap();
        let _pipe = pipe(&source, &target, None);

        assert_eq!(target.to_json(), json!({"z": 0}));
        source.set("b", 2).unwrap();
        assert_eq!(target.to_json(), json!({"z": 0, "a": 1, "b": 2}));
    }

    #[test]
    fn pipe_applies_the_transform() {
        let source = wrap(json!({"n": 1})).unwrap();
        let target = wrap(json!({})).unwrap();
        let double: Transform = Arc::new(|value: &Value| {
            let n = value.as_raw().map(|raw| raw.get("n")).and_then(|n| n.as_f64()).unwrap_or_default();
            Value::from(json!({"doubled": n * 2.0}))
        });
        let _pipe = pipe(&source, &target, Some(double));

        source.set("n", 4).unwrap();
        assert_eq!(target.get("doubled"), Value::from(8));
    }

    #[test]
    fn pipe_into_a_plain_object_writes_directly() {
        let source = wrap(json!({"a": 1})).unwrap();
        let plain = Raw::object();
        let _pipe = pipe(&source, plain.clone(), None);

        source.set("a", 2).unwrap();
        assert_eq!(plain.to_json(), json!({"a": 2}));
    }

    #[test]
    fn pipe_replaces_arrays() {
        let source = wrap(json!([1, 2])).unwrap();
        let target = wrap(json!([9, 9, 9])).unwrap();
        let _pipe = pipe(&source, &target, None);

        source.push([3]);
        assert_eq!(target.to_json(), json!([1, 2, 3]));
    }

    #[test]
    fn pipe_from_plain_values_is_inert() {
        let target = wrap(json!({})).unwrap();
        assert!(!pipe(Raw::object(), &target, None).is_active());
        let source = wrap(json!({})).unwrap();
        assert!(!pipe(&source, 5, None).is_active());
    }

    #[test]
    fn bind_syncs_both_ways_with_one_write_per_side() {
        let left = wrap(json!({"v": 1})).unwrap();
        let right = wrap(json!({"v": 2})).unwrap();
        let binding = bind(&left, &right);
        assert_eq!(right.get("v"), Value::from(1));

        let (left_writes, _l) = count_writes(&left);
        let (right_writes, _r) = count_writes(&right);

        right.set("v", 5).unwrap();
        assert_eq!(left.get("v"), Value::from(5));
        assert_eq!(left_writes.load(Ordering::SeqCst), 1);
        assert_eq!(right_writes.load(Ordering::SeqCst), 1);

        binding.unbind();
        left.set("v", 7).unwrap();
        assert_eq!(right.get("v"), Value::from(5));
    }

    #[test]
    fn bind_with_non_reactive_side_is_inert() {
        let left = wrap(json!({})).unwrap();
        assert!(!bind(&left, Raw::object()).is_active());
    }

    #[test]
    fn derive_sees_initial_and_later_snapshots() {
        let state = wrap(json!({"a": {"b": 1}})).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let _derived = {
            let seen = seen.clone();
            derive(&state, move |snapshot| seen.lock().push(snapshot.to_json()))
        };

        let inner = state.get("a");
        inner.as_state().unwrap().set("b", 2).unwrap();

        assert_eq!(*seen.lock(), vec![json!({"a": {"b": 1}}), json!({"a": {"b": 2}})]);
    }

    #[test]
    fn log_tap_is_a_recursive_subscription() {
        let state = wrap(json!({"a": 1})).unwrap();
        let tap = log(&state, "test");
        assert!(tap.is_active());
        state.set("a", 2).unwrap();
        assert_eq!(state.info().subscribers, 1);
    }
}
