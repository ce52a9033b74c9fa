use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use common::{Mode, Status};

#[derive(Debug, Default)]
struct SharedState {
    status: Status,
    zero_requested: bool,
    /// Ends the current session.
    stop: bool,
    /// Ends the process; survives session restarts.
    terminate: bool,
}

/// What the control thread needs from the shared state at the top of a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickSnapshot {
    pub enabled: bool,
    pub mode: Mode,
    pub stop: bool,
}

/// Loop metrics published by the control thread after every tick.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LoopMetrics {
    pub running: bool,
    pub frequency: f64,
    pub misses: i32,
    pub wait_ratio: f64,
}

/// The only mutable state shared by the command and control threads.
///
/// Every access takes the single mutex for a bounded, I/O free section.
#[derive(Clone, Debug, Default)]
pub struct SharedStatus {
    inner: Arc<Mutex<SharedState>>,
}

impl SharedStatus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SharedState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Read-consistent copy for serialization.
    pub fn snapshot(&self) -> Status {
        self.lock().status
    }

    pub fn tick_snapshot(&self) -> TickSnapshot {
        let state = self.lock();
        TickSnapshot {
            enabled: state.status.enabled,
            mode: state.status.mode,
            stop: state.stop || state.terminate,
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.lock().status.enabled = enabled;
    }

    /// Flips the feedback mode and returns the new one.
    pub fn toggle_mode(&self) -> Mode {
        let mut state = self.lock();
        state.status.mode = state.status.mode.toggled();
        state.status.mode
    }

    pub fn request_zero(&self) {
        self.lock().zero_requested = true;
    }

    /// Consumes a pending zero request.
    pub fn take_zero_request(&self) -> bool {
        std::mem::take(&mut self.lock().zero_requested)
    }

    pub fn request_stop(&self) {
        self.lock().stop = true;
    }

    pub fn request_terminate(&self) {
        self.lock().terminate = true;
    }

    pub fn stop_requested(&self) -> bool {
        let state = self.lock();
        state.stop || state.terminate
    }

    pub fn terminate_requested(&self) -> bool {
        self.lock().terminate
    }

    pub fn publish(&self, metrics: LoopMetrics) {
        let mut state = self.lock();
        state.status.running = metrics.running;
        state.status.frequency = metrics.frequency;
        state.status.misses = metrics.misses;
        state.status.wait_ratio = metrics.wait_ratio;
    }

    /// Resets per-session state for a freshly accepted connection.
    pub fn begin_session(&self) {
        let mut state = self.lock();
        state.status = Status::default();
        state.zero_requested = false;
        state.stop = false;
    }
}
