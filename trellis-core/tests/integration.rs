//! Integration Tests for the Reactive Engine
//!
//! These tests verify that states, observers, subscriptions and the
//! scheduling and derivation helpers work together correctly.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;

use trellis_core::config::DEFAULT_MAX_BROADCAST_DEPTH;
use trellis_core::reactive::{ArrayOp, DevTool, Runtime, StateInfo};
use trellis_core::schema::{ObjectSchema, Type};
use trellis_core::{
    bind, microbatch, subscribe, unwrap, wrap, wrap_with, ChangeEvent, EventKind, Key, Observer,
    Raw, ReactiveError, Schema, SchemaError, State, StateOptions, Task, Value,
};

fn counter() -> (Arc<AtomicUsize>, impl Fn(&Value, &ChangeEvent) + Send + Sync + 'static) {
    let count = Arc::new(AtomicUsize::new(0));
    let handler = {
        let count = count.clone();
        move |_: &Value, _: &ChangeEvent| {
            count.fetch_add(1, Ordering::SeqCst);
        }
    };
    (count, handler)
}

/// Wrapping the same raw value twice yields the same state, and unwrapping
/// gives back the original raw value.
#[test]
fn wrap_is_idempotent() {
    let raw = Raw::object_from([("a", 1)]);

    let first = wrap(raw.clone()).unwrap();
    let second = wrap(raw.clone()).unwrap();
    let again = wrap(&first).unwrap();

    assert_eq!(first, second);
    assert_eq!(first, again);
    assert!(unwrap(&Value::from(&first)).unwrap().ptr_eq(&raw));
}

/// Primitives cannot be wrapped.
#[test]
fn wrapping_a_primitive_fails() {
    let err = wrap(42).unwrap_err();
    assert!(matches!(err, ReactiveError::Unsupported { kind: "number" }));
}

/// A value written through a state reads back the same.
#[test]
fn set_then_get_round_trips() {
    let state = wrap(json!({})).unwrap();
    state.set("name", "Ada").unwrap();
    state.set("age", 36).unwrap();

    assert_eq!(state.get("name"), Value::from("Ada"));
    assert_eq!(state.get("age"), Value::from(36));
    assert_eq!(state.to_json(), json!({"name": "Ada", "age": 36}));
}

/// Writing a value equal to the current one broadcasts nothing.
#[test]
fn equal_write_is_a_no_op() {
    let state = wrap(json!({"a": 1})).unwrap();
    let (count, handler) = counter();
    let _sub = state.subscribe(handler, false, false);

    state.set("a", 1).unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 0);

    state.set("a", 2).unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

/// A rejected write keeps the previous value in both strict and lenient
/// mode; only strict mode reports the error.
#[test]
fn validation_rejection_preserves_state() {
    let schema = ObjectSchema::new().required("age", Type::Number).into_ref();

    let strict = wrap_with(json!({"age": 30}), StateOptions::new().schema_ref(schema.clone()).strict(true)).unwrap();
    let err = strict.set("age", "thirty").unwrap_err();
    assert!(matches!(err, ReactiveError::Validation { .. }));
    assert_eq!(strict.get("age"), Value::from(30));

    let lenient = wrap_with(json!({"age": 30}), StateOptions::new().schema_ref(schema).strict(false)).unwrap();
    let (count, handler) = counter();
    let _sub = lenient.subscribe(handler, false, false);
    assert!(lenient.set("age", "thirty").is_ok());
    assert_eq!(lenient.get("age"), Value::from(30));
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

/// `push` reports the pushed items as the value and the previous contents
/// as prev.
#[test]
fn array_push_event_shape() {
    let state = wrap(json!([1, 2, 3])).unwrap();
    let events = Arc::new(Mutex::new(Vec::new()));
    let _sub = {
        let events = events.clone();
        state.subscribe(move |_, event| events.lock().push(event.clone()), false, false)
    };

    assert_eq!(state.push([4]), 4);
    assert_eq!(state.len(), 4);

    let events = events.lock();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind(), EventKind::Array(ArrayOp::Push));
    assert_eq!(
        serde_json::to_value(&events[0]).unwrap(),
        json!({"type": "push", "keys": [], "prev": [1, 2, 3], "value": [4]})
    );
}

/// An ordered array keeps its order on push.
#[test]
fn ordered_array_inserts_in_place() {
    let options = StateOptions::new().ordered(Value::default_cmp);
    let state = wrap_with(json!([1, 3, 5]), options).unwrap();

    state.push([4, 2]);
    assert_eq!(state.to_json(), json!([1, 2, 3, 4, 5]));
}

/// An observer reading two keys fires once for an assign touching both.
#[test]
fn observer_fires_once_per_mutation() {
    let state = wrap(json!({"a": 1, "b": 2, "c": 3})).unwrap();
    let fired = Arc::new(AtomicUsize::new(0));
    let observer = {
        let fired = fired.clone();
        Observer::new(move |_| {
            fired.fetch_add(1, Ordering::SeqCst);
        })
    };

    let sum = observer.run(|| {
        state.get("a").as_f64().unwrap_or_default() + state.get("b").as_f64().unwrap_or_default()
    });
    assert_eq!(sum, 3.0);

    state.assign([("a", 10), ("b", 20)]).unwrap();
    assert_eq!(fired.load(Ordering::SeqCst), 1);

    state.set("c", 30).unwrap();
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

/// A recursive subscriber sees nested writes with the full path.
#[test]
fn recursive_subscription_reports_the_path() {
    let state = wrap(json!({"user": {"profile": {"name": "John"}}})).unwrap();
    let events = Arc::new(Mutex::new(Vec::new()));
    let _sub = {
        let events = events.clone();
        subscribe(&state, move |_, event| events.lock().push(event.clone()), true, true)
    };

    let user = state.get("user");
    let profile = user.as_state().unwrap().get("profile");
    profile.as_state().unwrap().set("name", "Jane").unwrap();

    let events = events.lock();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].kind(), EventKind::Init);

    let change = &events[1];
    assert_eq!(change.keys(), &[Key::from("user"), Key::from("profile"), Key::from("name")]);
    assert_eq!(change.path_string(), "user.profile.name");
    assert_eq!(change.prev(), &Value::from("John"));
    assert_eq!(change.value(), &Value::from("Jane"));
}

/// A binding syncs left into right first and then writes exactly once to
/// the opposite side per external change.
#[test]
fn bind_is_cycle_safe() {
    let left = wrap(json!({"v": 1})).unwrap();
    let right = wrap(json!({"v": 2})).unwrap();
    let _binding = bind(&left, &right);

    assert_eq!(left.get("v"), Value::from(1));
    assert_eq!(right.get("v"), Value::from(1));

    let (left_writes, left_handler) = counter();
    let (right_writes, right_handler) = counter();
    let _l = left.subscribe(left_handler, false, false);
    let _r = right.subscribe(right_handler, false, false);

    right.set("v", 5).unwrap();
    assert_eq!(left.get("v"), Value::from(5));
    assert_eq!(left_writes.load(Ordering::SeqCst), 1);
    assert_eq!(right_writes.load(Ordering::SeqCst), 1);
}

/// Five schedules of one task in a window run it once; a reset runs nothing.
#[tokio::test(start_paused = true)]
async fn microbatch_coalesces_and_resets() {
    let runs = Arc::new(AtomicUsize::new(0));
    let task: Task = {
        let runs = runs.clone();
        Arc::new(move || {
            runs.fetch_add(1, Ordering::SeqCst);
        })
    };

    let batch = microbatch(Duration::from_millis(100));
    for _ in 0..5 {
        batch.schedule(task.clone());
    }
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    for _ in 0..5 {
        batch.schedule(task.clone());
    }
    batch.reset();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

/// After destroy the state is gone from the registry and its stale handle
/// is harmless.
#[test]
fn destroy_cleans_up() {
    let raw = Raw::object_from([("a", 1)]);
    let state = wrap(raw.clone()).unwrap();
    let (count, handler) = counter();
    let _sub = state.subscribe(handler, false, false);
    assert!(Runtime::is_reactive(&raw));

    state.destroy();
    state.destroy();

    assert!(!Runtime::is_reactive(&raw));
    assert!(unwrap(&Value::from(&state)).is_none());
    assert_eq!(state.info().subscribers, 0);

    assert!(state.set("a", 2).is_ok());
    assert_eq!(raw.get("a"), Value::from(1));
    assert_eq!(count.load(Ordering::SeqCst), 0);

    let fresh = wrap(raw.clone()).unwrap();
    assert!(!fresh.ptr_eq(&state));
}

/// A subscriber may mutate the state it listens to; the nested write runs
/// right away and broadcasts its own event.
#[test]
fn subscriber_can_mutate_its_own_state() {
    let state = wrap(json!({"a": 1, "b": 0})).unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let _sub = {
        let seen = seen.clone();
        let state_in = state.clone();
        state.subscribe(
            move |_, event| {
                seen.lock().push(event.path_string());
                if event.keys().first() == Some(&Key::from("a")) {
                    let a = state_in.get("a").as_f64().unwrap_or_default();
                    state_in.set("b", a * 10.0).unwrap();
                }
            },
            false,
            false,
        )
    };

    state.set("a", 2).unwrap();
    assert_eq!(state.get("b"), Value::from(20));
    assert_eq!(*seen.lock(), vec!["a".to_string(), "b".to_string()]);
}

/// An observer callback may write to a state it does not track without
/// firing itself again.
#[test]
fn observer_can_mutate_during_broadcast() {
    let state = wrap(json!({"a": 1, "doubled": 2})).unwrap();
    let observer = {
        let state = state.clone();
        Observer::new(move |_| {
            let a = state.get("a").as_f64().unwrap_or_default();
            state.set("doubled", a * 2.0).unwrap();
        })
    };
    observer.run(|| state.get("a"));

    state.set("a", 5).unwrap();
    assert_eq!(state.get("doubled"), Value::from(10));
    assert_eq!(observer.fire_count(), 1);
    observer.destroy();
}

/// Writes to the same state from a devtool hook are refused while the
/// outer mutation is still in progress.
#[test]
fn devtool_reentry_is_refused() {
    struct Meddler {
        target: Arc<Mutex<Option<State>>>,
        calls: Arc<AtomicUsize>,
    }

    impl DevTool for Meddler {
        fn on_call(&self, _info: &StateInfo, _method: &str, _args: &[Value]) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let target = self.target.lock().clone();
            if let Some(state) = target {
                state.set("b", 99).unwrap();
            }
        }
    }

    let target = Arc::new(Mutex::new(None));
    let calls = Arc::new(AtomicUsize::new(0));
    let options = StateOptions::new().devtool(Meddler { target: target.clone(), calls: calls.clone() });
    let state = wrap_with(json!({"a": 1, "b": 1}), options).unwrap();
    *target.lock() = Some(state.clone());

    let (events, handler) = counter();
    let _sub = state.subscribe(handler, false, false);

    state.set("a", 2).unwrap();
    assert_eq!(state.get("a"), Value::from(2));
    assert_eq!(state.get("b"), Value::from(1));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(events.load(Ordering::SeqCst), 1);

    target.lock().take();
}

/// Writes to the same state from a validator are refused the same way.
#[test]
fn validator_reentry_is_refused() {
    struct Meddling {
        target: Arc<Mutex<Option<State>>>,
    }

    impl Schema for Meddling {
        fn safe_parse(&self, value: &Value) -> Result<Value, SchemaError> {
            let target = self.target.lock().clone();
            if let Some(state) = target {
                state.set("b", 99).unwrap();
            }
            Ok(value.clone())
        }
    }

    let target = Arc::new(Mutex::new(None));
    let schema = ObjectSchema::new().prop("a", Meddling { target: target.clone() });
    let state = wrap_with(json!({"a": 1, "b": 1}), StateOptions::new().schema(schema)).unwrap();
    *target.lock() = Some(state.clone());

    state.set("a", 2).unwrap();
    assert_eq!(state.get("a"), Value::from(2));
    assert_eq!(state.get("b"), Value::from(1));
    assert!(!Runtime::is_busy(state.raw().id()));

    target.lock().take();
}

/// A handler that keeps writing is stopped at the depth limit before its
/// write lands, so every applied write has exactly one event.
#[test]
fn runaway_handler_stops_at_depth_limit() {
    let state = wrap(json!({"n": 0})).unwrap();
    let events = Arc::new(AtomicUsize::new(0));
    let sub = {
        let events = events.clone();
        let state_in = state.clone();
        state.subscribe(
            move |_, _| {
                events.fetch_add(1, Ordering::SeqCst);
                let n = state_in.get("n").as_f64().unwrap_or_default();
                state_in.set("n", n + 1.0).unwrap();
            },
            false,
            false,
        )
    };

    state.set("n", 1).unwrap();

    assert_eq!(events.load(Ordering::SeqCst), DEFAULT_MAX_BROADCAST_DEPTH);
    assert_eq!(state.get("n"), Value::from(DEFAULT_MAX_BROADCAST_DEPTH));
    assert_eq!(Runtime::broadcast_depth(), 0);

    // The limit only applies to nesting: the next top-level write goes through
    drop(sub);
    state.set("n", 0).unwrap();
    assert_eq!(state.get("n"), Value::from(0));
}

/// An observer that rendered the whole state fires on any later change.
#[test]
fn whole_state_observer_fires_on_set() {
    let state = wrap(json!({"a": 1, "list": [1, 2]})).unwrap();
    let (json_observer, json_fired) = {
        let fired = Arc::new(AtomicUsize::new(0));
        let counted = fired.clone();
        (Observer::new(move |_| { counted.fetch_add(1, Ordering::SeqCst); }), fired)
    };
    let (snapshot_observer, snapshot_fired) = {
        let fired = Arc::new(AtomicUsize::new(0));
        let counted = fired.clone();
        (Observer::new(move |_| { counted.fetch_add(1, Ordering::SeqCst); }), fired)
    };

    json_observer.run(|| state.to_json());
    snapshot_observer.run(|| state.snapshot());

    state.set("a", 2).unwrap();
    assert_eq!(json_fired.load(Ordering::SeqCst), 1);
    assert_eq!(snapshot_fired.load(Ordering::SeqCst), 1);

    let list = state.get("list");
    list.as_state().unwrap().push([3]);
    assert_eq!(json_fired.load(Ordering::SeqCst), 2);
    assert_eq!(snapshot_fired.load(Ordering::SeqCst), 2);
}

/// Writing far past the end of an array is refused instead of allocating.
#[test]
fn far_array_index_write_is_refused() {
    let state = wrap(json!([1, 2, 3])).unwrap();
    let (count, handler) = counter();
    let _sub = state.subscribe(handler, false, false);

    assert!(state.set(usize::MAX, 9).is_ok());
    assert_eq!(state.to_json(), json!([1, 2, 3]));
    assert_eq!(count.load(Ordering::SeqCst), 0);
}
