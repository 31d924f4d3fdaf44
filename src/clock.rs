//! Time sources and the expiry timer seam used by recent change tracking.
//!
//! The tracker never sleeps or spawns anything. It asks an [`ExpiryTimer`] to
//! fire once at a given time, and the host calls back into the view engine when
//! that happens.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Instant;

/// Millisecond time source
pub trait Clock {
    fn now_ms(&self) -> u64;
}

/// Monotonic clock measuring milliseconds since its creation
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        SystemClock {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// Clock advanced explicitly. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<u64>>,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        ManualClock {
            now: Rc::new(Cell::new(start_ms)),
        }
    }

    pub fn set(&self, now_ms: u64) {
        self.now.set(now_ms);
    }

    pub fn advance(&self, delta_ms: u64) {
        self.now.set(self.now.get() + delta_ms);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.get()
    }
}

/// A single fire-once deferred callback owned by the host.
///
/// `schedule` replaces any pending target. When the timer fires the host must
/// call `ViewEngine::process_expiry_timeout`.
pub trait ExpiryTimer {
    fn schedule(&mut self, due_ms: u64);
    fn cancel(&mut self);
}

/// Timer for hosts that poll `process_expiry_timeout` themselves
#[derive(Debug, Default)]
pub struct NoopTimer;

impl ExpiryTimer for NoopTimer {
    fn schedule(&mut self, _due_ms: u64) {}
    fn cancel(&mut self) {}
}

/// Timer that only remembers its target; clones share state
#[derive(Debug, Clone, Default)]
pub struct RecordingTimer {
    state: Rc<RefCell<RecordingTimerState>>,
}

#[derive(Debug, Default)]
struct RecordingTimerState {
    due: Option<u64>,
    schedule_count: usize,
    cancel_count: usize,
}

impl RecordingTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Currently scheduled target, if any
    pub fn due(&self) -> Option<u64> {
        self.state.borrow().due
    }

    pub fn schedule_count(&self) -> usize {
        self.state.borrow().schedule_count
    }

    pub fn cancel_count(&self) -> usize {
        self.state.borrow().cancel_count
    }
}

impl ExpiryTimer for RecordingTimer {
    fn schedule(&mut self, due_ms: u64) {
        let mut state = self.state.borrow_mut();
        state.due = Some(due_ms);
        state.schedule_count += 1;
    }

    fn cancel(&mut self) {
        let mut state = self.state.borrow_mut();
        state.due = None;
        state.cancel_count += 1;
    }
}
