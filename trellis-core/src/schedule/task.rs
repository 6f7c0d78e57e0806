//! Debounced handler carrying the first and last scheduled values.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{error, trace, warn};

use super::Timer;
use crate::reactive::panic_message;

/// Receives `(first, last)`: the first value scheduled since the previous
/// firing and the most recent one.
pub type TaskHandler<T> = Arc<dyn Fn(T, T) + Send + Sync>;

struct Call<T> {
    handler: TaskHandler<T>,
    first: T,
    last: T,
}

struct Slot<T> {
    call: Option<Call<T>>,
    timer: Timer,
}

/// Runs a handler once `delay` passes without a new
/// [`schedule`](Self::schedule) call.
///
/// Dropping the `MicroTask` cancels a pending firing.
pub struct MicroTask<T> {
    delay: Duration,
    slot: Arc<Mutex<Slot<T>>>,
}

/// Create a debouncer with a window of `delay`.
pub fn microtask<T>(delay: Duration) -> MicroTask<T>
where
    T: Clone + Send + 'static,
{
    MicroTask {
        delay,
        slot: Arc::new(Mutex::new(Slot {
            call: None,
            timer: Timer::default(),
        })),
    }
}

impl<T> MicroTask<T>
where
    T: Clone + Send + 'static,
{
    /// Record `value` and restart the window. The most recently scheduled
    /// `handler` is the one that runs.
    pub fn schedule<F>(&self, handler: F, value: T)
    where
        F: Fn(T, T) + Send + Sync + 'static,
    {
        let handler: TaskHandler<T> = Arc::new(handler);
        let armed = {
            let mut slot = self.slot.lock();
            slot.call = Some(match slot.call.take() {
                Some(call) => Call {
                    handler,
                    first: call.first,
                    last: value,
                },
                None => Call {
                    handler,
                    first: value.clone(),
                    last: value,
                },
            });

            let weak = Arc::downgrade(&self.slot);
            slot.timer.restart(self.delay, move |generation| fire(&weak, generation))
        };

        if !armed {
            warn!("microtask scheduled outside a tokio runtime, running now");
            let call = self.slot.lock().call.take();
            run(call);
        }
    }

    /// Cancel the pending firing and forget the recorded values.
    pub fn destroy(&self) {
        let mut slot = self.slot.lock();
        slot.timer.cancel();
        slot.call = None;
    }

    /// Whether a call is waiting for its timer.
    pub fn is_pending(&self) -> bool {
        self.slot.lock().call.is_some()
    }
}

impl<T> Drop for MicroTask<T> {
    fn drop(&mut self) {
        self.slot.lock().timer.cancel();
    }
}

impl<T> fmt::Debug for MicroTask<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.slot.lock();
        f.debug_struct("MicroTask")
            .field("delay", &self.delay)
            .field("pending", &slot.call.is_some())
            .finish()
    }
}

fn fire<T>(slot: &Weak<Mutex<Slot<T>>>, generation: u64) {
    let Some(slot) = slot.upgrade() else {
        return;
    };
    let call = {
        let mut slot = slot.lock();
        if !slot.timer.is_current(generation) {
            return;
        }
        slot.timer.fired();
        slot.call.take()
    };
    run(call);
}

fn run<T>(call: Option<Call<T>>) {
    let Some(Call { handler, first, last }) = call else {
        return;
    };
    trace!("microtask fired");
    if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler(first, last))) {
        error!(panic = %panic_message(&panic), "microtask handler panicked");
    }
}
