//! Redraw scheduling for preview surfaces.
//!
//! Render requests never run inline. They are recorded here and drained by
//! the host's display-refresh callback through [`RedrawScheduler::poll`], so a
//! burst of requests between two refreshes collapses into a single render.
//! Debounced requests wait for a quiet period instead; every new request
//! restarts the timer.
//!
//! The clock is injected (`now: Instant`) so hosts drive the scheduler from
//! their own frame callbacks and tests can replay exact timelines.
use std::time::{Duration, Instant};

use tracing::trace;

/// Cancellable one-shot timer restarted by every [`Debounce::arm`] call.
#[derive(Debug, Clone)]
pub struct Debounce {
    window: Duration,
    deadline: Option<Instant>,
}

impl Debounce {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: None,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Starts the quiet period at `now`, discarding any earlier deadline.
    pub fn arm(&mut self, now: Instant) {
        self.deadline = Some(now + self.window);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns true exactly once per armed deadline, on the first call at or
    /// after it.
    pub fn fire(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RedrawScheduler {
    pending: bool,
    debounce: Debounce,
}

impl RedrawScheduler {
    pub fn new(debounce_window: Duration) -> Self {
        Self {
            pending: false,
            debounce: Debounce::new(debounce_window),
        }
    }

    pub fn debounce_window(&self) -> Duration {
        self.debounce.window()
    }

    /// Requests a render on the next refresh. Repeated calls before that
    /// refresh do not accumulate.
    pub fn request(&mut self) {
        if self.pending {
            trace!("redraw already pending; coalescing request");
        }
        self.pending = true;
    }

    /// Requests a render once `debounce_window` has passed without another
    /// debounced request.
    pub fn request_debounced(&mut self, now: Instant) {
        self.debounce.arm(now);
    }

    /// Drops both the pending redraw and any armed debounce timer.
    pub fn cancel(&mut self) {
        self.pending = false;
        self.debounce.cancel();
    }

    pub fn is_pending(&self) -> bool {
        self.pending || self.debounce.deadline().is_some()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.debounce.deadline()
    }

    /// Called from the refresh callback. Returns true when a render is due;
    /// the caller runs exactly one render in response.
    pub fn poll(&mut self, now: Instant) -> bool {
        if self.debounce.fire(now) {
            trace!("debounce window elapsed");
            self.pending = true;
        }
        std::mem::take(&mut self.pending)
    }
}
