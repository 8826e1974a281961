//! Start/stop gate for long-running services
//!
//! A service moves `NotStarted → Started → Stopped` exactly once. The start
//! and stop callbacks run while the state lock is held, so concurrent
//! callers never observe a half-started service.

use parking_lot::Mutex;

/// Lifecycle state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    NotStarted,
    Started,
    Stopped,
}

/// Lifecycle gate
pub struct Lifecycle {
    name: String,
    state: Mutex<State>,
}

impl Lifecycle {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(State::NotStarted),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> State {
        *self.state.lock()
    }

    pub fn is_started(&self) -> bool {
        self.state() == State::Started
    }

    /// Run `start` and move to `Started`.
    ///
    /// Returns `false` without calling `start` if the service was already
    /// started or stopped.
    pub fn start(&self, start: impl FnOnce()) -> bool {
        let mut state = self.state.lock();
        if *state != State::NotStarted {
            tracing::debug!(service = %self.name, state = ?*state, "Start ignored");
            return false;
        }

        start();
        *state = State::Started;
        tracing::debug!(service = %self.name, "Service started");
        true
    }

    /// Run `stop` and move to `Stopped`.
    ///
    /// Only a started service is stopped; every later call is a no-op.
    pub fn stop(&self, stop: impl FnOnce()) -> bool {
        let mut state = self.state.lock();
        if *state != State::Started {
            tracing::debug!(service = %self.name, state = ?*state, "Stop ignored");
            return false;
        }

        stop();
        *state = State::Stopped;
        tracing::debug!(service = %self.name, "Service stopped");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_start_stop_once() {
        let lc = Lifecycle::new("test");
        let starts = AtomicU32::new(0);
        let stops = AtomicU32::new(0);

        assert_eq!(lc.state(), State::NotStarted);
        assert!(!lc.stop(|| {
            stops.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(lc.start(|| {
            starts.fetch_add(1, Ordering::SeqCst);
        }));
        assert!(!lc.start(|| {
            starts.fetch_add(1, Ordering::SeqCst);
        }));
        assert!(lc.is_started());

        assert!(lc.stop(|| {
            stops.fetch_add(1, Ordering::SeqCst);
        }));
        assert!(!lc.stop(|| {
            stops.fetch_add(1, Ordering::SeqCst);
        }));

        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert_eq!(stops.load(Ordering::SeqCst), 1);
        assert_eq!(lc.state(), State::Stopped);
    }

    #[test]
    fn test_no_restart_after_stop() {
        let lc = Lifecycle::new("test");
        lc.start(|| {});
        lc.stop(|| {});

        assert!(!lc.start(|| {}));
        assert_eq!(lc.state(), State::Stopped);
    }
}
