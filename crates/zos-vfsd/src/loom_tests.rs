//! Loom tests for the worker event
//!
//! Loom explores every interleaving of the threads in a model, which is how
//! the event's no-lost-wakeup property is checked: a signal racing with a
//! wait must never leave the waiter asleep.
//!
//! # Running Loom Tests
//!
//! ```bash
//! cargo test -p zos-vfsd --features loom -- --test-threads=1 loom
//! ```

#[cfg(all(test, feature = "loom"))]
mod tests {
    use crate::event::Event;
    use loom::sync::Arc;
    use loom::thread;

    /// Test: a signal racing with the wait is never lost
    #[test]
    fn loom_signal_wait_no_lost_wakeup() {
        loom::model(|| {
            let event = Arc::new(Event::new());

            let signaller = {
                let event = event.clone();
                thread::spawn(move || event.signal())
            };

            event.wait();
            signaller.join().unwrap();
            assert!(!event.is_signalled());
        });
    }

    /// Test: hand-off then signal, as the dispatcher does it
    ///
    /// The waker publishes the job before signalling, so a woken worker
    /// always finds it.
    #[test]
    fn loom_handoff_visible_after_wake() {
        loom::model(|| {
            let event = Arc::new(Event::new());
            let slot = Arc::new(loom::sync::Mutex::new(None::<u32>));

            let waker = {
                let event = event.clone();
                let slot = slot.clone();
                thread::spawn(move || {
                    *slot.lock().unwrap() = Some(7);
                    event.signal();
                })
            };

            let job = loop {
                if let Some(job) = slot.lock().unwrap().take() {
                    break job;
                }
                event.wait();
            };
            assert_eq!(job, 7);
            waker.join().unwrap();
        });
    }

    /// Test: two signallers, one waiter, two waits never deadlock when each
    /// wait is preceded by a condition check
    #[test]
    fn loom_condition_checked_waits() {
        loom::model(|| {
            let event = Arc::new(Event::new());
            let count = Arc::new(loom::sync::Mutex::new(0u32));

            let handles: Vec<_> = (0..2)
                .map(|_| {
                    let event = event.clone();
                    let count = count.clone();
                    thread::spawn(move || {
                        *count.lock().unwrap() += 1;
                        event.signal();
                    })
                })
                .collect();

            while *count.lock().unwrap() < 2 {
                event.wait();
            }
            for h in handles {
                h.join().unwrap();
            }
        });
    }
}
