//! Array methods.
//!
//! Every method works on a detached copy of the items: the copy is edited
//! with no lock held, so comparators and schemas may read the state freely,
//! then written back in one step. Array methods never return errors. A
//! refused call logs the reason and returns what the method would have
//! returned had nothing changed.

use std::cmp::Ordering;

use tracing::error;

use super::{enter, settle_all, unsupported};
use crate::config;
use crate::error::ReactiveError;
use crate::reactive::broadcast::broadcast;
use crate::reactive::event::{ArrayOp, ChangeEvent, EventKind, Path};
use crate::reactive::options::Comparator;
use crate::reactive::state::State;
use crate::value::{Container, Key, Kind, Raw, Value};

impl State {
    /// Append `items`. Returns the new length.
    ///
    /// On an ordered array each item is placed at its sorted position
    /// instead.
    pub fn push<V: Into<Value>>(&self, items: impl IntoIterator<Item = V>) -> usize {
        let items = stored(items);
        let ordered = self.core().options.ordered.clone();
        self.array_call(ArrayOp::Push, items.clone(), items, || self.len(), |data, added| {
            match ordered {
                Some(compare) => insert_ordered(data, added, &compare),
                None => data.extend(added),
            }
            (data.len(), Vec::new())
        })
    }

    /// Remove and return the last item, or `Undefined` when empty.
    pub fn pop(&self) -> Value {
        self.array_call(ArrayOp::Pop, Vec::new(), Vec::new(), || Value::Undefined, |data, _| {
            match data.pop() {
                Some(last) => (last.clone(), vec![last]),
                None => (Value::Undefined, Vec::new()),
            }
        })
    }

    /// Remove and return the first item, or `Undefined` when empty.
    pub fn shift(&self) -> Value {
        self.array_call(ArrayOp::Shift, Vec::new(), Vec::new(), || Value::Undefined, |data, _| {
            if data.is_empty() {
                return (Value::Undefined, Vec::new());
            }
            let first = data.remove(0);
            (first.clone(), vec![first])
        })
    }

    /// Prepend `items`, keeping their order. Returns the new length.
    pub fn unshift<V: Into<Value>>(&self, items: impl IntoIterator<Item = V>) -> usize {
        let items = stored(items);
        self.array_call(ArrayOp::Unshift, items.clone(), items, || self.len(), |data, added| {
            data.splice(0..0, added);
            (data.len(), Vec::new())
        })
    }

    /// Remove `delete_count` items starting at `start` and insert `items`
    /// in their place. Returns the removed items.
    ///
    /// `start` and `delete_count` are clamped to the array.
    pub fn splice<V: Into<Value>>(
        &self,
        start: usize,
        delete_count: usize,
        items: impl IntoIterator<Item = V>,
    ) -> Vec<Value> {
        let items = stored(items);
        let mut args = vec![Value::from(start), Value::from(delete_count)];
        args.extend(items.iter().cloned());

        self.array_call(ArrayOp::Splice, args, items, Vec::new, |data, added| {
            let start = start.min(data.len());
            let end = start.saturating_add(delete_count).min(data.len());
            let removed: Vec<Value> = data.splice(start..end, added).collect();
            (removed.clone(), removed)
        })
    }

    /// Overwrite every slot with `value`.
    pub fn fill(&self, value: impl Into<Value>) -> State {
        let value = value.into().into_stored();
        self.fill_call(vec![value.clone()], value, 0, None)
    }

    /// Overwrite the slots in `start..end` with `value`. A missing `end`
    /// means the end of the array; both bounds are clamped.
    pub fn fill_range(&self, value: impl Into<Value>, start: usize, end: Option<usize>) -> State {
        let value = value.into().into_stored();
        let mut args = vec![value.clone(), Value::from(start)];
        args.extend(end.map(Value::from));
        self.fill_call(args, value, start, end)
    }

    /// Sort in place with the array's ordering comparator, or with
    /// [`Value::default_cmp`] when none is configured.
    pub fn sort(&self) -> State {
        let compare = self.core().options.ordered.clone();
        self.sort_call(Vec::new(), move |a, b| match &compare {
            Some(compare) => compare(a, b),
            None => Value::default_cmp(a, b),
        })
    }

    /// Stable sort in place with `compare`.
    pub fn sort_by<F>(&self, compare: F) -> State
    where
        F: Fn(&Value, &Value) -> Ordering,
    {
        self.sort_call(Vec::new(), compare)
    }

    /// Reverse in place.
    pub fn reverse(&self) -> State {
        self.array_call(ArrayOp::Reverse, Vec::new(), Vec::new(), || self.clone(), |data, _| {
            data.reverse();
            (self.clone(), Vec::new())
        })
    }

    fn fill_call(&self, args: Vec<Value>, value: Value, start: usize, end: Option<usize>) -> State {
        self.array_call(ArrayOp::Fill, args, vec![value], || self.clone(), |data, added| {
            let len = data.len();
            let end = end.unwrap_or(len).min(len);
            let start = start.min(end);
            let value = added.into_iter().next().unwrap_or_default();

            let removed: Vec<Value> = data[start..end]
                .iter_mut()
                .map(|slot| std::mem::replace(slot, value.clone()))
                .collect();
            (self.clone(), removed)
        })
    }

    fn sort_call<F>(&self, args: Vec<Value>, compare: F) -> State
    where
        F: Fn(&Value, &Value) -> Ordering,
    {
        self.array_call(ArrayOp::Sort, args, Vec::new(), || self.clone(), |data, _| {
            data.sort_by(|a, b| compare(a, b));
            (self.clone(), Vec::new())
        })
    }

    /// Shared pipeline of the array methods.
    ///
    /// `added` are the items the call writes; they are validated as a batch
    /// against the element schema and handed to `apply` in stored form.
    /// `apply` edits a detached copy and returns the method's result with
    /// the items it removed.
    fn array_call<R>(
        &self,
        op: ArrayOp,
        args: Vec<Value>,
        added: Vec<Value>,
        mock: impl FnOnce() -> R,
        apply: impl FnOnce(&mut Vec<Value>, Vec<Value>) -> (R, Vec<Value>),
    ) -> R {
        let core = self.core();
        if self.kind() != Kind::Array {
            unsupported(core, op.as_str());
            return mock();
        }

        let Some(busy) = enter(core, op.as_str(), &args) else {
            return mock();
        };

        let added = match self.validate_items(added) {
            Ok(added) => added,
            Err(error) => {
                error!(state = ?core.id(), method = op.as_str(), %error, "array call rejected");
                return mock();
            }
        };

        let before = match &*core.raw().read() {
            Container::Array(items) => Some(items.clone()),
            _ => None,
        };
        let Some(before) = before else {
            return mock();
        };
        let mut after = before.clone();
        let (result, removed) = apply(&mut after, added);

        let prev = if op.reports_remaining() { after.clone() } else { before };
        *core.raw().write() = Container::Array(after);
        drop(busy);

        settle_all(core, &removed);
        broadcast(
            core,
            ChangeEvent::new(
                EventKind::Array(op),
                Path::new(),
                Value::Raw(Raw::array_from(prev)),
                Value::Raw(Raw::array_from(args)),
            )
            .structural(op != ArrayOp::Fill),
        );
        result
    }

    fn validate_items(&self, items: Vec<Value>) -> Result<Vec<Value>, ReactiveError> {
        let Some(schema) = self.core().child_schema(&Key::Index(0)) else {
            return Ok(items);
        };
        items
            .into_iter()
            .enumerate()
            .map(|(index, item)| {
                schema
                    .safe_parse(&item)
                    .map(Value::into_stored)
                    .map_err(|source| ReactiveError::validation(&Key::Index(index), source))
            })
            .collect()
    }
}

fn stored<V: Into<Value>>(items: impl IntoIterator<Item = V>) -> Vec<Value> {
    items.into_iter().map(|item| item.into().into_stored()).collect()
}

/// Insert `added` into the sorted `data`, each after any equal elements.
/// Large batches are appended and the whole array is stably re-sorted.
fn insert_ordered(data: &mut Vec<Value>, added: Vec<Value>, compare: &Comparator) {
    if added.len() > config::current().ordered_insert_threshold {
        data.extend(added);
        data.sort_by(|a, b| compare(a, b));
        return;
    }
    for item in added {
        let at = data.partition_point(|x| compare(x, &item) != Ordering::Greater);
        data.insert(at, item);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{wrap, wrap_with, StateOptions};
    use crate::schema::{ListSchema, Type};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;

    fn numbers(state: &State) -> Vec<f64> {
        state.values().iter().filter_map(Value::as_f64).collect()
    }

    #[test]
    fn push_event_carries_args_and_snapshot() {
        let state = wrap(json!([1, 2, 3])).unwrap();
        let events = Arc::new(Mutex::new(Vec::new()));
        let _sub = {
            let events = events.clone();
            state.subscribe(move |_, event| events.lock().push(event.clone()), false, false)
        };

        assert_eq!(state.push([4]), 4);

        let events = events.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind(), EventKind::Array(ArrayOp::Push));
        assert!(events[0].keys().is_empty());
        assert_eq!(events[0].value().to_json(), json!([4]));
        assert_eq!(events[0].prev().to_json(), json!([1, 2, 3]));
        assert!(events[0].is_structural());
    }

    #[test]
    fn pop_and_shift_report_remaining_items() {
        let state = wrap(json!([1, 2, 3])).unwrap();
        let prevs = Arc::new(Mutex::new(Vec::new()));
        let _sub = {
            let prevs = prevs.clone();
            state.subscribe(move |_, event| prevs.lock().push(event.prev().to_json()), false, false)
        };

        assert_eq!(state.pop(), Value::from(3));
        assert_eq!(state.shift(), Value::from(1));
        assert_eq!(*prevs.lock(), vec![json!([1, 2]), json!([2])]);
        assert_eq!(state.to_json(), json!([2]));
    }

    #[test]
    fn pop_on_empty_returns_undefined() {
        let state = wrap(json!([])).unwrap();
        assert!(state.pop().is_undefined());
        assert!(state.shift().is_undefined());
    }

    #[test]
    fn unshift_and_splice() {
        let state = wrap(json!([3, 4])).unwrap();
        assert_eq!(state.unshift([1, 2]), 4);

        let removed = state.splice(1, 2, ["a"]);
        assert_eq!(removed, vec![Value::from(2), Value::from(3)]);
        assert_eq!(state.to_json(), json!([1, "a", 4]));

        assert!(state.splice(10, 1, Vec::<Value>::new()).is_empty());
        assert_eq!(state.len(), 3);
    }

    #[test]
    fn fill_and_fill_range() {
        let state = wrap(json!([1, 2, 3, 4])).unwrap();
        state.fill_range(0, 1, Some(3));
        assert_eq!(numbers(&state), vec![1.0, 0.0, 0.0, 4.0]);

        let same = state.fill(7);
        assert!(same.ptr_eq(&state));
        assert_eq!(numbers(&state), vec![7.0; 4]);
    }

    #[test]
    fn sort_and_reverse() {
        let state = wrap(json!([3, 1, 2])).unwrap();
        state.sort();
        assert_eq!(numbers(&state), vec![1.0, 2.0, 3.0]);
        state.reverse();
        assert_eq!(numbers(&state), vec![3.0, 2.0, 1.0]);
        state.sort_by(|a, b| Value::default_cmp(b, a));
        assert_eq!(numbers(&state), vec![3.0, 2.0, 1.0]);
    }

    #[test]
    fn ordered_push_inserts_in_place() {
        let options = StateOptions::new().ordered(Value::default_cmp);
        let state = wrap_with(json!([1, 3, 5]), options).unwrap();

        state.push([4, 2]);
        assert_eq!(numbers(&state), vec![1.0, 2.0, 3.0, 4.0, 5.0]);

        state.push([
            Value::from(9),
            Value::from(0),
            Value::from(6),
            Value::from(8),
            Value::from(7),
            Value::from(2.5),
        ]);
        assert_eq!(
            numbers(&state),
            vec![0.0, 1.0, 2.0, 2.5, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0]
        );
    }

    #[test]
    fn ordered_insert_goes_after_equal_elements() {
        let compare: Comparator = Arc::new(|a: &Value, b: &Value| {
            let key = |v: &Value| v.as_f64().map(f64::floor).unwrap_or_default();
            key(a).total_cmp(&key(b))
        });
        let mut data = vec![Value::from(1), Value::from(2), Value::from(3)];
        insert_ordered(&mut data, vec![Value::from(2.5)], &compare);
        assert_eq!(data[2], Value::from(2.5));
    }

    #[test]
    fn immutable_arrays_return_mocks() {
        let state = wrap_with(json!([1, 2]), StateOptions::new().immutable(true)).unwrap();
        assert_eq!(state.push([3]), 2);
        assert!(state.pop().is_undefined());
        assert!(state.splice(0, 1, Vec::<Value>::new()).is_empty());
        assert!(state.fill(0).ptr_eq(&state));
        assert_eq!(state.to_json(), json!([1, 2]));
    }

    #[test]
    fn invalid_items_reject_the_whole_call() {
        let options = StateOptions::new().schema(ListSchema::array(Type::Number));
        let state = wrap_with(json!([1]), options).unwrap();

        assert_eq!(state.push([Value::from(2), Value::from("x")]), 1);
        assert_eq!(state.to_json(), json!([1]));
        assert_eq!(state.push([2]), 2);
    }

    #[test]
    fn methods_on_other_kinds_are_refused() {
        let state = wrap(json!({"a": 1})).unwrap();
        assert_eq!(state.push([1]), 1);
        assert_eq!(state.to_json(), json!({"a": 1}));
    }
}
