//! Zero OS VFS Daemon Core - Pure State Machines
//!
//! This crate contains the **pure, blocking-free** bookkeeping behind the VFS
//! daemon's concurrency engine. Nothing here sleeps, spawns or sends: every
//! operation mutates a state value and returns a decision that the runtime
//! (`zos-vfsd`) acts on by suspending or signalling worker threads.
//!
//! # Design Principles
//!
//! 1. **No blocking**: Operations return `Granted`/`Queued` and wake lists
//! 2. **No I/O**: Messages are opaque job payloads here
//! 3. **Deterministic**: Same sequence of calls always yields the same grants
//! 4. **Checkable**: Every state value can be audited by `invariants`
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      zos-vfsd-core                          │
//! │                  (Pure State Machines)                      │
//! │                                                             │
//! │   ┌───────────────┐    ┌───────────────┐                   │
//! │   │   TllState    │    │ DispatchState │                   │
//! │   │  - holding    │    │  - slots      │                   │
//! │   │  - queues     │    │  - pending    │                   │
//! │   └───────────────┘    └───────────────┘                   │
//! │                                                             │
//! │   ┌───────────────────────────────────┐                     │
//! │   │            Invariants             │                     │
//! │   └───────────────────────────────────┘                     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              │ used by
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         zos-vfsd                            │
//! │   - worker threads and their events                         │
//! │   - blocking three-level lock, correlator, nested calls     │
//! │   - dispatch loop over a Transport                          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Module Organization
//!
//! - `types` - Worker ids, lock levels, worker roles
//! - `tll` - Three-level lock state machine
//! - `dispatch` - Worker pool and pending-job bookkeeping
//! - `invariants` - Runtime-checkable invariants for both machines
//! - `error` - Contract violations reported by the machines

#![no_std]
extern crate alloc;

pub mod dispatch;
pub mod error;
pub mod invariants;
pub mod tll;
pub mod types;

pub use dispatch::{DispatchState, Start};
pub use error::{NestingError, TllViolation};
pub use invariants::{
    assert_dispatch_invariants, assert_tll_invariants, check_dispatch_invariants,
    check_tll_invariants, InvariantViolation,
};
pub use tll::{Acquire, Grant, Holding, TllState, Waiter};
pub use types::{LockLevel, WorkerId, WorkerRole};
