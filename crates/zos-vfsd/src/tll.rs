//! Blocking three-level lock
//!
//! Wraps the pure [`TllState`] from `zos-vfsd-core` in a mutex and suspends
//! the calling worker whenever the state machine answers `Queued`. Ownership
//! is handed to waiters inside `unlock`/`downgrade` while the mutex is held;
//! the waker then signals each new holder, which re-checks that it holds
//! the lock before returning.
//!
//! # Usage
//!
//! ```ignore
//! let guard = vnode.lock.lock(worker, LockLevel::ReadSerialized);
//! // ... read shared state, decide to modify it ...
//! let mut guard = guard;
//! guard.upgrade();
//! // ... exclusive access ...
//! drop(guard); // unlock
//! ```
//!
//! Misuse (re-locking a lock the worker holds, upgrading from Read) is a
//! broken contract and aborts the daemon.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use zos_vfsd_core::{Acquire, Grant, LockLevel, TllState, TllViolation, WorkerId};

use crate::shared::Shared;
use crate::worker::Worker;

/// A three-level lock embedded in a shared resource.
#[derive(Default)]
pub struct Tll {
    state: Mutex<TllState>,
}

impl fmt::Debug for Tll {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tll")
            .field("state", &*self.state())
            .finish()
    }
}

impl Tll {
    /// Create an unlocked lock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock at `level`, suspending `worker` until granted.
    pub fn lock<'a>(&'a self, worker: &Worker, level: LockLevel) -> TllGuard<'a> {
        let id = worker.id();
        let acquired = {
            let mut state = self.state();
            let acquired = state.lock(id, level).unwrap_or_else(|v| violation(v));
            check(&state);
            acquired
        };

        if acquired == Acquire::Queued {
            log::debug!("Tll: worker {} queued for {}", id, level);
            self.wait_for(id, worker.shared(), level);
        }

        TllGuard {
            tll: self,
            worker: id,
            shared: worker.shared_handle(),
            level,
            released: false,
        }
    }

    fn wait_for(&self, id: WorkerId, shared: &Shared, level: LockLevel) {
        loop {
            if self.state().held_by(id) == Some(level) {
                return;
            }
            shared.event(id).wait();
        }
    }

    fn state(&self) -> MutexGuard<'_, TllState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current level, `None` when unlocked.
    pub fn level(&self) -> Option<LockLevel> {
        self.state().level()
    }

    pub fn owner(&self) -> Option<WorkerId> {
        self.state().owner()
    }

    pub fn readers(&self) -> usize {
        self.state().readers()
    }

    pub fn is_locked(&self) -> bool {
        self.state().is_locked()
    }

    pub fn has_pending(&self) -> bool {
        self.state().has_pending()
    }

    pub fn is_upgrading(&self) -> bool {
        self.state().is_upgrading()
    }

    /// Level `worker` holds, if any.
    pub fn held_by(&self, worker: WorkerId) -> Option<LockLevel> {
        self.state().held_by(worker)
    }
}

fn violation(v: TllViolation) -> ! {
    fatal!("Tll: {}", v)
}

#[cfg(debug_assertions)]
fn check(state: &TllState) {
    zos_vfsd_core::assert_tll_invariants(state);
}

#[cfg(not(debug_assertions))]
fn check(_state: &TllState) {}

/// A held three-level lock. Dropping the guard unlocks.
#[must_use = "dropping the guard releases the lock"]
pub struct TllGuard<'a> {
    tll: &'a Tll,
    worker: WorkerId,
    shared: Arc<Shared>,
    level: LockLevel,
    released: bool,
}

impl TllGuard<'_> {
    /// Level currently held.
    pub fn level(&self) -> LockLevel {
        self.level
    }

    /// Convert ReadSerialized into Write, suspending until every plain
    /// reader has left. A no-op on a Write hold.
    pub fn upgrade(&mut self) {
        let acquired = {
            let mut state = self.tll.state();
            let acquired = state.upgrade(self.worker).unwrap_or_else(|v| violation(v));
            check(&state);
            acquired
        };

        if acquired == Acquire::Queued {
            log::debug!("Tll: worker {} waiting for readers to drain", self.worker);
            self.tll.wait_for(self.worker, &self.shared, LockLevel::Write);
        }
        self.level = LockLevel::Write;
    }

    /// Step down one level: Write to ReadSerialized, ReadSerialized to Read.
    pub fn downgrade(&mut self) {
        let grants = {
            let mut state = self.tll.state();
            let grants = state.downgrade(self.worker).unwrap_or_else(|v| violation(v));
            check(&state);
            grants
        };

        self.level = match self.level {
            LockLevel::Write => LockLevel::ReadSerialized,
            _ => LockLevel::Read,
        };
        self.wake(grants);
    }

    /// Release the lock now.
    pub fn unlock(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        let grants = {
            let mut state = self.tll.state();
            let grants = state.unlock(self.worker).unwrap_or_else(|v| violation(v));
            check(&state);
            grants
        };
        self.wake(grants);
    }

    fn wake(&self, grants: Vec<Grant>) {
        for grant in grants {
            log::debug!(
                "Tll: {} handed to worker {} by worker {}",
                grant.level,
                grant.worker,
                self.worker
            );
            self.shared.signal(grant.worker);
        }
    }
}

impl Drop for TllGuard<'_> {
    fn drop(&mut self) {
        self.release();
    }
}
