//! Devtool hook.
//!
//! A devtool observes state creation and every mutating call. Hooks are
//! best effort: a panicking hook is logged and the mutation continues.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

use serde::Serialize;

use super::state::StateId;
use crate::value::Value;

/// Summary of a state handed to devtool hooks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateInfo {
    pub id: StateId,
    pub kind: &'static str,
    pub strict: bool,
    pub immutable: bool,
    pub observable: bool,
    pub recursive: bool,
    pub subscribers: usize,
    pub observers: usize,
}

/// Observability hook attached through
/// [`StateOptions::devtool`](super::StateOptions::devtool).
pub trait DevTool: Send + Sync {
    /// Called once when a state is created with this devtool.
    fn on_init(&self, _info: &StateInfo) {}

    /// Called before a mutating method runs, with its arguments.
    fn on_call(&self, info: &StateInfo, method: &str, args: &[Value]);
}

pub(crate) fn notify_init(devtool: &dyn DevTool, info: &StateInfo) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(|| devtool.on_init(info))) {
        tracing::warn!(state = ?info.id, panic = %panic_message(&panic), "devtool on_init panicked");
    }
}

pub(crate) fn notify_call(devtool: &dyn DevTool, info: &StateInfo, method: &str, args: &[Value]) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(|| devtool.on_call(info, method, args))) {
        tracing::warn!(
            state = ?info.id,
            method,
            panic = %panic_message(&panic),
            "devtool on_call panicked"
        );
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{wrap_with, StateOptions};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
    }

    impl DevTool for Arc<Recorder> {
        fn on_init(&self, info: &StateInfo) {
            self.calls.lock().push(format!("init:{}", info.kind));
        }

        fn on_call(&self, _info: &StateInfo, method: &str, args: &[Value]) {
            self.calls.lock().push(format!("{method}:{}", args.len()));
        }
    }

    struct Panicky;

    impl DevTool for Panicky {
        fn on_call(&self, _info: &StateInfo, _method: &str, _args: &[Value]) {
            panic!("hook failure");
        }
    }

    #[test]
    fn hooks_see_init_and_calls() {
        let recorder = Arc::new(Recorder::default());
        let state = wrap_with(json!([1]), StateOptions::new().devtool(recorder.clone())).unwrap();

        state.push([Value::from(2), Value::from(3)]);
        state.set(0usize, 9).unwrap();

        assert_eq!(*recorder.calls.lock(), vec!["init:array", "push:2", "set:2"]);
    }

    #[test]
    fn panicking_hook_does_not_block_mutation() {
        let state = wrap_with(json!({"a": 1}), StateOptions::new().devtool(Panicky)).unwrap();
        state.set("a", 2).unwrap();
        assert_eq!(state.get("a"), Value::from(2));
    }
}
