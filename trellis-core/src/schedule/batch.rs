//! Debounced task batch.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{error, trace, warn};

use super::Timer;
use crate::reactive::panic_message;

/// A unit of deferred work. Identity is the `Arc` pointer: scheduling the
/// same `Arc` twice within one window runs it once.
pub type Task = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Pending {
    tasks: Vec<Task>,
    timer: Timer,
}

/// Collects tasks and runs them together once `delay` passes without a new
/// [`schedule`](Self::schedule) call.
///
/// Handles are cheap to clone and share one pending set. Dropping the last
/// handle discards pending tasks without running them.
///
/// # Example
///
/// ```rust,ignore
/// let batch = microbatch(Duration::from_millis(100));
/// let render: Task = Arc::new(|| redraw());
/// for _ in 0..5 {
///     batch.schedule(render.clone());
/// }
/// // `redraw` runs once, 100ms after the last call.
/// ```
#[derive(Clone)]
pub struct MicroBatch {
    delay: Duration,
    pending: Arc<Mutex<Pending>>,
}

/// Create a batch with a window of `delay`.
pub fn microbatch(delay: Duration) -> MicroBatch {
    MicroBatch {
        delay,
        pending: Arc::default(),
    }
}

impl MicroBatch {
    /// Add `task` to the pending set and restart the window.
    pub fn schedule(&self, task: Task) {
        let armed = {
            let mut pending = self.pending.lock();
            if !pending.tasks.iter().any(|t| same_task(t, &task)) {
                pending.tasks.push(task);
            }

            let weak = Arc::downgrade(&self.pending);
            pending.timer.restart(self.delay, move |generation| fire(&weak, generation))
        };

        if !armed {
            warn!("microbatch scheduled outside a tokio runtime, flushing now");
            self.flush();
        }
    }

    /// Drop every pending task without running it.
    pub fn reset(&self) {
        let mut pending = self.pending.lock();
        pending.timer.cancel();
        let dropped = std::mem::take(&mut pending.tasks);
        trace!(dropped = dropped.len(), "microbatch reset");
    }

    /// Number of distinct tasks waiting for the window to close.
    pub fn pending(&self) -> usize {
        self.pending.lock().tasks.len()
    }

    /// Run every pending task now.
    pub fn flush(&self) {
        let tasks = {
            let mut pending = self.pending.lock();
            pending.timer.cancel();
            std::mem::take(&mut pending.tasks)
        };
        run(tasks);
    }
}

impl fmt::Debug for MicroBatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pending = self.pending.lock();
        f.debug_struct("MicroBatch")
            .field("delay", &self.delay)
            .field("pending", &pending.tasks.len())
            .field("armed", &pending.timer.is_armed())
            .finish()
    }
}

fn same_task(a: &Task, b: &Task) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

fn fire(pending: &Weak<Mutex<Pending>>, generation: u64) {
    let Some(pending) = pending.upgrade() else {
        return;
    };
    let tasks = {
        let mut pending = pending.lock();
        if !pending.timer.is_current(generation) {
            return;
        }
        pending.timer.fired();
        std::mem::take(&mut pending.tasks)
    };
    run(tasks);
}

fn run(tasks: Vec<Task>) {
    trace!(tasks = tasks.len(), "microbatch flush");
    for task in tasks {
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| task())) {
            error!(panic = %panic_message(&panic), "microbatch task panicked");
        }
    }
}
