//! Worker event
//!
//! Every worker sleeps on exactly one event. An event is a binary semaphore:
//! a `signal` that arrives before the matching `wait` is remembered, and each
//! `wait` consumes one signal. Signals do not accumulate beyond one, so
//! callers always re-check the condition they waited for after waking.

use std::sync::PoisonError;

use crate::sync::{Condvar, Mutex};

/// Binary semaphore a worker suspends on.
pub struct Event {
    signalled: Mutex<bool>,
    cond: Condvar,
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}

impl Event {
    /// Create an event with no pending signal.
    pub fn new() -> Self {
        Self {
            signalled: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    /// Wake the waiter, or let its next `wait` return at once.
    pub fn signal(&self) {
        let mut signalled = self.signalled.lock().unwrap_or_else(PoisonError::into_inner);
        *signalled = true;
        self.cond.notify_one();
    }

    /// Block until signalled, consuming the signal.
    pub fn wait(&self) {
        let mut signalled = self.signalled.lock().unwrap_or_else(PoisonError::into_inner);
        while !*signalled {
            signalled = self
                .cond
                .wait(signalled)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *signalled = false;
    }

    /// Whether a signal is waiting to be consumed.
    pub fn is_signalled(&self) -> bool {
        *self.signalled.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_signal_before_wait_is_kept() {
        let event = Event::new();
        event.signal();
        assert!(event.is_signalled());
        event.wait();
        assert!(!event.is_signalled());
    }

    #[test]
    fn test_signals_do_not_accumulate() {
        let event = Event::new();
        event.signal();
        event.signal();
        event.wait();
        assert!(!event.is_signalled());
    }

    #[test]
    fn test_wait_blocks_until_signal() {
        let event = Arc::new(Event::new());
        let (tx, rx) = std::sync::mpsc::channel();

        let waiter = {
            let event = event.clone();
            thread::spawn(move || {
                event.wait();
                tx.send(()).unwrap();
            })
        };

        assert!(rx
            .recv_timeout(std::time::Duration::from_millis(50))
            .is_err());
        event.signal();
        waiter.join().unwrap();
        assert!(rx.try_recv().is_ok());
    }
}
