//! Timing rules for scheduled records and interruptible sleeps.
//!
//! The Input thread holds a scheduled record back until shortly before its
//! due time (`overhead_reduction` early, to cover queue and dispatch
//! latency). The Output thread then waits out the remainder, corrected by the
//! smaller `output_init_overhead`, or reports how late it is.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// How long the Input thread should still wait before enqueueing a record
/// due at `scheduled`. `None` when it is time to enqueue.
pub fn enqueue_delay(
    scheduled: Duration,
    elapsed: Duration,
    overhead_reduction: Duration,
) -> Option<Duration> {
    scheduled
        .checked_sub(elapsed)
        .and_then(|d| d.checked_sub(overhead_reduction))
        .filter(|d| !d.is_zero())
}

/// What the Output thread should do with a scheduled record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchTiming {
    /// Too early: sleep this long, then dispatch.
    Wait(Duration),
    /// Due or overdue by `behind`.
    Late { behind: Duration, significant: bool },
}

/// Decide between waiting and reporting lateness for a record due at
/// `scheduled` when `elapsed` has passed since the run started.
pub fn dispatch_timing(
    scheduled: Duration,
    elapsed: Duration,
    output_init_overhead: Duration,
    max_behind: Duration,
) -> DispatchTiming {
    let due = elapsed + output_init_overhead;
    match scheduled.checked_sub(due) {
        Some(wait) if !wait.is_zero() => DispatchTiming::Wait(wait),
        _ => {
            let behind = due.saturating_sub(scheduled);
            DispatchTiming::Late {
                behind,
                significant: behind > max_behind,
            }
        }
    }
}

/// Raised by [`Sleeper::sleep`] when the sleep was cut short.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interrupted;

#[derive(Debug, Default)]
struct SleepState {
    sleeping: bool,
    interrupted: bool,
}

/// A sleep that another thread can cut short.
///
/// [`interrupt`](Self::interrupt) only affects a thread that is currently
/// sleeping; [`interrupt_and_latch`](Self::interrupt_and_latch) also makes the
/// next sleep return immediately.
#[derive(Debug, Default)]
pub struct Sleeper {
    state: Mutex<SleepState>,
    wake: Condvar,
}

impl Sleeper {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SleepState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleep for `duration` unless interrupted.
    pub fn sleep(&self, duration: Duration) -> Result<(), Interrupted> {
        let deadline = Instant::now() + duration;
        let mut state = self.lock();
        if state.interrupted {
            state.interrupted = false;
            return Err(Interrupted);
        }
        state.sleeping = true;
        loop {
            let now = Instant::now();
            if now >= deadline {
                state.sleeping = false;
                return Ok(());
            }
            state = match self.wake.wait_timeout(state, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
            if state.interrupted {
                state.interrupted = false;
                state.sleeping = false;
                return Err(Interrupted);
            }
        }
    }

    /// Wake a thread that is sleeping right now. Returns whether one was.
    pub fn interrupt(&self) -> bool {
        let mut state = self.lock();
        if state.sleeping {
            state.interrupted = true;
            drop(state);
            self.wake.notify_all();
            true
        } else {
            false
        }
    }

    /// Wake the sleeper now or at its next sleep.
    pub fn interrupt_and_latch(&self) {
        self.lock().interrupted = true;
        self.wake.notify_all();
    }

    pub fn is_sleeping(&self) -> bool {
        self.lock().sleeping
    }

    /// Drop a pending latched interrupt.
    pub fn reset(&self) {
        *self.lock() = SleepState::default();
    }
}

/// Stop flag plus sleeper for one worker thread.
#[derive(Debug, Default)]
pub struct WorkerSignal {
    stop: AtomicBool,
    sleeper: Sleeper,
}

impl WorkerSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the worker to exit and wake it if it is sleeping.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.sleeper.interrupt_and_latch();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub fn sleeper(&self) -> &Sleeper {
        &self.sleeper
    }

    pub fn reset(&self) {
        self.stop.store(false, Ordering::SeqCst);
        self.sleeper.reset();
    }
}
