//! Property-based invariant tests for reactive states.
//!
//! These tests check that:
//!
//! 1. Array methods on a state behave exactly like the same methods on a
//!    plain `Vec`, and every call broadcasts one event.
//! 2. Ordered arrays stay sorted whatever is pushed, on both the binary
//!    insertion path and the append-then-sort path.
//! 3. Object writes read back, and only effective writes broadcast.
//! 4. Snapshots are detached: mutating the state later leaves them alone.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use proptest::prelude::*;
use serde_json::json;

use trellis_core::{wrap, wrap_with, Key, StateOptions, Value};

// ── Strategies ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum ArrayCall {
    Push(Vec<i32>),
    Pop,
    Shift,
    Unshift(Vec<i32>),
    Splice(usize, usize, Vec<i32>),
    Reverse,
    Sort,
}

fn items() -> impl Strategy<Value = Vec<i32>> {
    proptest::collection::vec(-50i32..50, 0..4)
}

fn array_call() -> impl Strategy<Value = ArrayCall> {
    prop_oneof![
        items().prop_map(ArrayCall::Push),
        Just(ArrayCall::Pop),
        Just(ArrayCall::Shift),
        items().prop_map(ArrayCall::Unshift),
        (0usize..8, 0usize..4, items()).prop_map(|(s, d, i)| ArrayCall::Splice(s, d, i)),
        Just(ArrayCall::Reverse),
        Just(ArrayCall::Sort),
    ]
}

fn numbers(state: &trellis_core::State) -> Vec<i32> {
    state
        .values()
        .iter()
        .filter_map(Value::as_f64)
        .map(|n| n as i32)
        .collect()
}

// ═════════════════════════════════════════════════════════════════════════
// 1. Array methods match a Vec model
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn array_methods_match_vec(
        seed in proptest::collection::vec(-50i32..50, 0..6),
        calls in proptest::collection::vec(array_call(), 1..20),
    ) {
        let state = wrap(json!(seed)).unwrap();
        let mut model = seed.clone();

        let events = Arc::new(AtomicUsize::new(0));
        let _sub = {
            let events = events.clone();
            state.subscribe(move |_, _| { events.fetch_add(1, Ordering::SeqCst); }, false, false)
        };

        for call in &calls {
            match call {
                ArrayCall::Push(items) => {
                    model.extend(items);
                    prop_assert_eq!(state.push(items.iter().copied()), model.len());
                }
                ArrayCall::Pop => {
                    let expected = model.pop().map(Value::from).unwrap_or(Value::Undefined);
                    prop_assert_eq!(state.pop(), expected);
                }
                ArrayCall::Shift => {
                    let expected = if model.is_empty() {
                        Value::Undefined
                    } else {
                        Value::from(model.remove(0))
                    };
                    prop_assert_eq!(state.shift(), expected);
                }
                ArrayCall::Unshift(items) => {
                    model.splice(0..0, items.iter().copied());
                    prop_assert_eq!(state.unshift(items.iter().copied()), model.len());
                }
                ArrayCall::Splice(start, delete, items) => {
                    let start_at = (*start).min(model.len());
                    let end = (start_at + delete).min(model.len());
                    let removed: Vec<Value> = model
                        .splice(start_at..end, items.iter().copied())
                        .map(Value::from)
                        .collect();
                    prop_assert_eq!(state.splice(*start, *delete, items.iter().copied()), removed);
                }
                ArrayCall::Reverse => {
                    model.reverse();
                    state.reverse();
                }
                ArrayCall::Sort => {
                    model.sort();
                    state.sort();
                }
            }
            prop_assert_eq!(numbers(&state), model.clone());
        }

        prop_assert_eq!(events.load(Ordering::SeqCst), calls.len());
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 2. Ordered arrays stay sorted
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn ordered_arrays_stay_sorted(
        mut seed in proptest::collection::vec(-100i32..100, 0..10),
        batches in proptest::collection::vec(proptest::collection::vec(-100i32..100, 0..12), 1..6),
    ) {
        seed.sort();
        let options = StateOptions::new().ordered(Value::default_cmp);
        let state = wrap_with(json!(seed), options).unwrap();
        let mut model = seed;

        for batch in batches {
            state.push(batch.iter().copied());
            model.extend(batch);
            model.sort();
            prop_assert_eq!(numbers(&state), model.clone());
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 3. Object writes read back; only effective writes broadcast
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn object_writes_read_back(
        writes in proptest::collection::vec(("[a-e]", 0i32..4), 1..30),
    ) {
        let state = wrap(json!({})).unwrap();
        let mut model: BTreeMap<String, i32> = BTreeMap::new();
        let mut expected_events = 0;

        let events = Arc::new(AtomicUsize::new(0));
        let _sub = {
            let events = events.clone();
            state.subscribe(move |_, _| { events.fetch_add(1, Ordering::SeqCst); }, false, false)
        };

        for (key, value) in writes {
            if model.insert(key.clone(), value) != Some(value) {
                expected_events += 1;
            }
            state.set(key.as_str(), value).unwrap();
            prop_assert_eq!(state.get(key.as_str()), Value::from(value));
        }

        prop_assert_eq!(events.load(Ordering::SeqCst), expected_events);
        prop_assert_eq!(state.len(), model.len());
        for key in model.keys() {
            prop_assert!(state.has(Key::from(key.as_str())));
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 4. Snapshots are detached
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn snapshots_are_detached(
        values in proptest::collection::vec(-10i32..10, 1..8),
        replacement in 100i32..200,
    ) {
        let state = wrap(json!({"list": values, "nested": {"n": 0}})).unwrap();
        let snapshot = state.snapshot();
        let before = snapshot.to_json();
        prop_assert_eq!(&before, &state.to_json());

        let list = state.get("list");
        list.as_state().unwrap().fill(replacement);
        let nested = state.get("nested");
        nested.as_state().unwrap().set("n", replacement).unwrap();

        prop_assert_eq!(snapshot.to_json(), before);
        prop_assert_ne!(snapshot.to_json(), state.to_json());
    }
}
