//! Inter-arrival-time guard for a channel, grounded in the original
//! runtime's `smx_guard_s { fd, iat }` and its semaphore-timer pairing
//! (`kernel/semaphore.rs`'s `Semaphore` wait/post shape informed the
//! condvar-and-deadline loop below).

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Injectable clock so guard timing tests don't depend on wall-clock
/// sleeps, per the runtime's "factor timer operations behind a small
/// interface" design note.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// How a guard enforces its minimum inter-arrival time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardMode {
    /// Block the writer until the interval has elapsed.
    Blocking,
    /// Never block; a write before the interval elapses is dismissed.
    Dismissing,
}

pub enum GuardOutcome {
    Proceed,
    Dismissed,
}

struct GuardState {
    last_release: Option<Instant>,
}

/// Enforces a minimum time between successive writes on a channel.
pub struct Guard {
    mode: GuardMode,
    interval: Duration,
    state: Mutex<GuardState>,
    condvar: Condvar,
    missed_rearm: std::sync::atomic::AtomicU64,
    clock: Box<dyn Clock>,
}

impl Guard {
    pub fn new(mode: GuardMode, interval: Duration) -> Self {
        Self::with_clock(mode, interval, Box::new(SystemClock))
    }

    pub fn with_clock(mode: GuardMode, interval: Duration, clock: Box<dyn Clock>) -> Self {
        Self {
            mode,
            interval,
            state: Mutex::new(GuardState { last_release: None }),
            condvar: Condvar::new(),
            missed_rearm: std::sync::atomic::AtomicU64::new(0),
            clock,
        }
    }

    pub fn missed_rearm(&self) -> u64 {
        self.missed_rearm.load(std::sync::atomic::Ordering::Relaxed)
    }

    /// Wake anything parked in `gate`'s blocking wait without changing the
    /// clock, simulating a spurious wakeup. Test-only.
    #[cfg(test)]
    fn notify_for_test(&self) {
        self.condvar.notify_all();
    }

    /// Gate a write attempt. Returns `Proceed` once the interval has
    /// elapsed since the last release (blocking or not, per `mode`), or
    /// `Dismissed` immediately if this is a dismissing guard and the
    /// interval has not yet elapsed.
    pub fn gate(&self) -> GuardOutcome {
        let now = self.clock.now();
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        let Some(last) = state.last_release else {
            state.last_release = Some(now);
            return GuardOutcome::Proceed;
        };

        let elapsed = now.saturating_duration_since(last);
        if elapsed >= self.interval {
            if elapsed > self.interval * 2 {
                self.missed_rearm.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
            state.last_release = Some(now);
            return GuardOutcome::Proceed;
        }

        match self.mode {
            GuardMode::Dismissing => GuardOutcome::Dismissed,
            GuardMode::Blocking => {
                // While-loop predicate check, not a single wait: a spurious
                // wakeup (or any early return from `wait_timeout`) must not
                // release the write before the interval has actually
                // elapsed.
                let mut state = state;
                loop {
                    let now = self.clock.now();
                    let elapsed = now.saturating_duration_since(last);
                    if elapsed >= self.interval {
                        state.last_release = Some(now);
                        return GuardOutcome::Proceed;
                    }
                    let remaining = self.interval - elapsed;
                    let (next_state, _timeout) = self
                        .condvar
                        .wait_timeout(state, remaining)
                        .unwrap_or_else(|e| e.into_inner());
                    state = next_state;
                }
            }
        }
    }
}
