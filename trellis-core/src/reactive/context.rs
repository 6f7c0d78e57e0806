//! Observer Context
//!
//! The observer context tracks which observer, if any, is currently running.
//! This enables automatic dependency tracking: when a state property is read,
//! the read is recorded against the current observer without threading an
//! explicit parameter through every read path.
//!
//! # Implementation
//!
//! We use a thread-local stack. `Observer::run` pushes its observer and pops
//! it when the run ends, so nested runs compose: reads inside the inner run
//! belong to the inner observer, and reads after it returns go back to the
//! outer one. A `None` entry masks everything below it, which is how
//! [`untracked`] works.

use std::cell::RefCell;
use std::sync::Arc;

use super::observer::{Observer, ObserverCore, ObserverId};

thread_local! {
    static OBSERVER_STACK: RefCell<Vec<Option<Arc<ObserverCore>>>> = const { RefCell::new(Vec::new()) };
}

/// Guard that pops the observer context when dropped.
///
/// This ensures the stack is properly maintained even if the tracked
/// function panics.
pub struct ObserverScope {
    observer: Option<ObserverId>,
    depth: usize,
}

impl ObserverScope {
    pub(crate) fn enter(observer: Option<Arc<ObserverCore>>) -> Self {
        let id = observer.as_ref().map(|o| o.id());
        let depth = OBSERVER_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            stack.push(observer);
            stack.len()
        });

        Self {
            observer: id,
            depth,
        }
    }

    /// Observer made current by this scope, if any.
    pub fn observer(&self) -> Option<ObserverId> {
        self.observer
    }
}

impl Drop for ObserverScope {
    fn drop(&mut self) {
        OBSERVER_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            debug_assert_eq!(
                stack.len(),
                self.depth,
                "ObserverScope dropped out of order"
            );
            let popped = stack.pop();

            if let Some(entry) = popped {
                debug_assert_eq!(
                    entry.as_ref().map(|o| o.id()),
                    self.observer,
                    "ObserverScope mismatch"
                );
            }
        });
    }
}

/// The observer reads are currently recorded against.
pub(crate) fn current() -> Option<Arc<ObserverCore>> {
    OBSERVER_STACK.with(|stack| stack.borrow().last().cloned().flatten())
}

/// Check if reads are being tracked right now.
pub fn is_tracking() -> bool {
    OBSERVER_STACK.with(|stack| matches!(stack.borrow().last(), Some(Some(_))))
}

/// Make `observer` current until the returned scope is dropped. Passing
/// `None` suspends tracking for the scope.
pub fn set_observer(observer: Option<&Observer>) -> ObserverScope {
    ObserverScope::enter(observer.map(|o| o.core().clone()))
}

/// Run `f` without recording any reads.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    let _scope = ObserverScope::enter(None);
    f()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_tracks_observer() {
        let observer = Observer::new(|_| {});

        assert!(!is_tracking());
        assert!(current().is_none());

        {
            let scope = set_observer(Some(&observer));
            assert_eq!(scope.observer(), Some(observer.id()));
            assert!(is_tracking());
            assert_eq!(current().map(|o| o.id()), Some(observer.id()));
        }

        // Context should be cleaned up after drop
        assert!(!is_tracking());
        assert!(current().is_none());
    }

    #[test]
    fn nested_scopes() {
        let outer = Observer::new(|_| {});
        let inner = Observer::new(|_| {});

        {
            let _outer = set_observer(Some(&outer));
            assert_eq!(current().map(|o| o.id()), Some(outer.id()));

            {
                let _inner = set_observer(Some(&inner));
                assert_eq!(current().map(|o| o.id()), Some(inner.id()));
            }

            // After inner scope drops, outer should be current
            assert_eq!(current().map(|o| o.id()), Some(outer.id()));

            untracked(|| assert!(!is_tracking()));
            assert!(is_tracking());
        }

        assert!(current().is_none());
    }
}
