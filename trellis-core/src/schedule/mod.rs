//! Scheduling Primitives
//!
//! Two debouncers for coalescing bursts of mutations into one unit of work:
//!
//! - [`MicroBatch`] collects distinct tasks and runs each once when the
//!   window closes.
//! - [`MicroTask`] runs one handler with the first and last value scheduled
//!   since the previous firing.
//!
//! Every `schedule` call restarts the window. Timers run on the ambient tokio
//! runtime. Outside a runtime there is nothing to wait on, so the work runs
//! immediately and a warning is logged.

mod batch;
mod task;

use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

pub use batch::{microbatch, MicroBatch, Task};
pub use task::{microtask, MicroTask, TaskHandler};

/// A restartable one-shot timer.
///
/// Aborting a tokio task only takes effect at its next await point, so a
/// firing that has already woken up may still run after a restart. Each
/// firing therefore carries the generation it was armed with and checks it
/// against [`is_current`](Self::is_current) before doing any work.
#[derive(Default)]
struct Timer {
    handle: Option<JoinHandle<()>>,
    generation: u64,
}

impl Timer {
    /// Cancel the pending firing, if any.
    fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
        self.generation = self.generation.wrapping_add(1);
    }

    /// Cancel and re-arm. `fire` receives the generation to check. Returns
    /// `false` when there is no runtime to arm on.
    fn restart<F>(&mut self, delay: Duration, fire: F) -> bool
    where
        F: FnOnce(u64) + Send + 'static,
    {
        self.cancel();
        let Ok(runtime) = Handle::try_current() else {
            return false;
        };

        let generation = self.generation;
        self.handle = Some(runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            fire(generation);
        }));
        true
    }

    fn is_current(&self, generation: u64) -> bool {
        self.handle.is_some() && self.generation == generation
    }

    fn is_armed(&self) -> bool {
        self.handle.is_some()
    }

    /// Forget the handle of a firing that is running now.
    fn fired(&mut self) {
        self.handle = None;
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
