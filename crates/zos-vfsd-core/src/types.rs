//! Core types
//!
//! Pure data shared by the lock and dispatch state machines.

use core::fmt;
use serde::{Deserialize, Serialize};

/// Worker identifier: an index into the fixed worker table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WorkerId(pub usize);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Access level requested from a three-level lock.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockLevel {
    /// Shared access; any number of holders
    Read,
    /// Single owner, may coexist with plain readers
    ReadSerialized,
    /// Exclusive access
    Write,
}

impl LockLevel {
    /// Get human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            LockLevel::Read => "read",
            LockLevel::ReadSerialized => "read-serialized",
            LockLevel::Write => "write",
        }
    }
}

impl fmt::Display for LockLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What a worker slot is reserved for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerRole {
    /// General pool worker; takes pending client jobs
    Pool,
    /// Services control-plane requests only
    Control,
    /// Kept free to break deadlocks when every pool worker is blocked
    DeadlockResolver,
}
