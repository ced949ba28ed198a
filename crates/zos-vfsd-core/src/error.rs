//! Contract violations reported by the pure state machines.
//!
//! None of these are recoverable. The runtime treats each as a fatal,
//! corrupted-invariant condition.

use crate::types::{LockLevel, WorkerId};
use thiserror::Error;

/// A misuse of the three-level lock protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum TllViolation {
    /// The worker already holds (or waits for) the lock it is requesting
    #[error("worker {worker} re-locked a lock it already holds at {held} level")]
    AlreadyHeld { worker: WorkerId, held: LockLevel },

    /// The worker is already queued on this lock
    #[error("worker {worker} requested a lock it is already queued on")]
    AlreadyQueued { worker: WorkerId },

    /// Unlock by a worker that is neither owner nor reader
    #[error("worker {worker} unlocked a lock it does not hold")]
    NotHeld { worker: WorkerId },

    /// Upgrade or downgrade by a worker that does not own the lock
    #[error("worker {worker} is not the owner of this lock")]
    NotOwner { worker: WorkerId },

    /// Upgrade requested from a level that cannot be upgraded
    #[error("worker {worker} cannot upgrade from {level} level")]
    BadUpgrade { worker: WorkerId, level: LockLevel },

    /// The owner tried to act while its own upgrade is still pending
    #[error("worker {worker} acted on a lock with its upgrade still pending")]
    UpgradePending { worker: WorkerId },
}

/// A failure to enter a nested call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum NestingError {
    /// The nested-call stack is full
    #[error("nested call rejected: depth limit {limit} reached")]
    TooDeep { limit: usize },
}
