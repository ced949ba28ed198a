//! Runtime-checkable invariants
//!
//! Checked after every operation in tests and, in debug builds, by the
//! runtime before it releases the lock guarding a state value.
//!
//! # Lock Invariants
//!
//! 1. **Exclusive Write**: a Write holding has no readers (by construction)
//!    and nobody else may appear as a holder
//! 2. **Non-empty Read**: a Read holding has at least one reader
//! 3. **Owner Is Not A Reader**: a ReadSerialized owner never also counts as
//!    a plain reader
//! 4. **No Idle Queue**: an unlocked lock has no waiters
//! 5. **Unique Workers**: no worker is both holder and waiter, or queued twice
//! 6. **Write Bias**: while readers could be admitted, the head of the
//!    Read/Write queue is a Write
//! 7. **Serialized Progress**: a ReadSerialized waiter never sits behind an
//!    empty Read/Write queue unless someone owns the lock
//! 8. **Upgrade Needs Readers**: a pending upgrade implies readers remain
//!
//! # Dispatch Invariants
//!
//! 1. **Pending Count**: the counter equals the number of queued jobs
//! 2. **Pending Order**: every client with queued jobs appears exactly once
//!    in the global FIFO, and no other client does
//! 3. **No Idle With Pending**: queued jobs imply no idle pool worker
//! 4. **Hand-off Ownership**: a handed-off job belongs to a busy slot
//! 5. **Chains**: only the control worker chains jobs, and only while busy
//! 6. **Roles**: the slot layout is pool workers, control, deadlock resolver

use alloc::collections::BTreeSet;
use alloc::string::String;
use alloc::vec::Vec;

use crate::dispatch::{DispatchState, RESERVED_WORKERS};
use crate::tll::{Holding, TllState};
use crate::types::{LockLevel, WorkerId, WorkerRole};

/// An invariant violation with details
#[derive(Clone, Debug)]
pub struct InvariantViolation {
    /// Name of the violated invariant
    pub invariant: &'static str,
    /// Description of what went wrong
    pub description: String,
}

fn violation(invariant: &'static str, description: String) -> InvariantViolation {
    InvariantViolation {
        invariant,
        description,
    }
}

// ============================================================================
// Three-level lock
// ============================================================================

/// Check all lock invariants.
///
/// Returns a list of violations (empty if all invariants hold).
pub fn check_tll_invariants(state: &TllState) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();

    violations.extend(check_holding_shape(state));
    violations.extend(check_unique_workers(state));
    violations.extend(check_queue_discipline(state));

    violations
}

/// Invariants 1-4 and 8
fn check_holding_shape(state: &TllState) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();

    match &state.holding {
        Holding::Unlocked => {
            if state.has_pending() {
                violations.push(violation(
                    "no_idle_queue",
                    alloc::format!(
                        "Unlocked lock has {} write/read and {} serialized waiters",
                        state.write_queue.len(),
                        state.serial_queue.len()
                    ),
                ));
            }
        }
        Holding::Read { readers } => {
            if readers.is_empty() {
                violations.push(violation(
                    "non_empty_read",
                    String::from("Read holding with no readers"),
                ));
            }
        }
        Holding::ReadSerialized {
            owner,
            readers,
            upgrading,
        } => {
            if readers.contains(owner) {
                violations.push(violation(
                    "owner_is_not_reader",
                    alloc::format!("Owner {} also listed as a reader", owner),
                ));
            }
            if *upgrading && readers.is_empty() {
                violations.push(violation(
                    "upgrade_needs_readers",
                    alloc::format!("Owner {} upgrading with no readers left", owner),
                ));
            }
        }
        Holding::Write { .. } => {}
    }

    violations
}

/// Invariant 5 (also covers the "nobody else" half of invariant 1)
fn check_unique_workers(state: &TllState) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();
    let mut seen: BTreeSet<WorkerId> = BTreeSet::new();

    let holders: Vec<WorkerId> = match &state.holding {
        Holding::Unlocked => Vec::new(),
        Holding::Read { readers } => readers.iter().copied().collect(),
        Holding::ReadSerialized { owner, readers, .. } => core::iter::once(*owner)
            .chain(readers.iter().copied())
            .collect(),
        Holding::Write { owner } => alloc::vec![*owner],
    };

    let waiters = state
        .write_queue
        .iter()
        .map(|w| w.worker)
        .chain(state.serial_queue.iter().copied());

    for worker in holders.into_iter().chain(waiters) {
        if !seen.insert(worker) {
            violations.push(violation(
                "unique_workers",
                alloc::format!("Worker {} appears more than once on the lock", worker),
            ));
        }
    }

    violations
}

/// Invariants 6 and 7
fn check_queue_discipline(state: &TllState) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();

    let admits_readers = match &state.holding {
        Holding::Write { .. } => false,
        Holding::ReadSerialized { upgrading, .. } => !upgrading,
        Holding::Unlocked | Holding::Read { .. } => true,
    };

    if admits_readers {
        if let Some(head) = state.write_queue.front() {
            if head.level != LockLevel::Write {
                violations.push(violation(
                    "write_bias",
                    alloc::format!(
                        "Worker {} queued for {} at the head while readers are admitted",
                        head.worker,
                        head.level
                    ),
                ));
            }
        }
    }

    let unowned = matches!(state.holding, Holding::Unlocked | Holding::Read { .. });
    if unowned && state.write_queue.is_empty() {
        if let Some(next) = state.serial_queue.front() {
            violations.push(violation(
                "serialized_progress",
                alloc::format!("Worker {} waits for read-serialized on an unowned lock", next),
            ));
        }
    }

    violations
}

/// Assert all lock invariants hold (panic if not)
pub fn assert_tll_invariants(state: &TllState) {
    if let Some(v) = check_tll_invariants(state).first() {
        panic!("Invariant violated: {}: {}", v.invariant, v.description);
    }
}

// ============================================================================
// Dispatch table
// ============================================================================

/// Check all dispatch invariants.
///
/// Returns a list of violations (empty if all invariants hold).
pub fn check_dispatch_invariants<J>(state: &DispatchState<J>) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();

    violations.extend(check_pending_queues(state));
    violations.extend(check_slots(state));

    violations
}

/// Invariants 1-3
fn check_pending_queues<J>(state: &DispatchState<J>) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();

    let queued: usize = state.pending.values().map(|q| q.len()).sum();
    if queued != state.pending_count {
        violations.push(violation(
            "pending_count",
            alloc::format!(
                "Pending count is {} but {} jobs are queued",
                state.pending_count,
                queued
            ),
        ));
    }

    let mut seen = BTreeSet::new();
    for client in &state.pending_order {
        if !seen.insert(*client) {
            violations.push(violation(
                "pending_order",
                alloc::format!("Client {} listed twice in the pending FIFO", client),
            ));
        }
        if state.pending.get(client).map_or(true, |q| q.is_empty()) {
            violations.push(violation(
                "pending_order",
                alloc::format!("Client {} in the pending FIFO has no queued jobs", client),
            ));
        }
    }
    for client in state.pending.keys() {
        if !seen.contains(client) {
            violations.push(violation(
                "pending_order",
                alloc::format!("Client {} has queued jobs but is not in the FIFO", client),
            ));
        }
    }

    if state.pending_count > 0 && state.available() > 0 {
        violations.push(violation(
            "no_idle_with_pending",
            alloc::format!(
                "{} jobs pending while {} pool workers are idle",
                state.pending_count,
                state.available()
            ),
        ));
    }

    violations
}

/// Invariants 4-6
fn check_slots<J>(state: &DispatchState<J>) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();

    if state.slots.len() != state.pool_size + RESERVED_WORKERS {
        violations.push(violation(
            "roles",
            alloc::format!(
                "{} slots for a pool of {}",
                state.slots.len(),
                state.pool_size
            ),
        ));
    }

    for (index, slot) in state.slots.iter().enumerate() {
        let expected = if index < state.pool_size {
            WorkerRole::Pool
        } else if index == state.pool_size {
            WorkerRole::Control
        } else {
            WorkerRole::DeadlockResolver
        };
        if slot.role != expected {
            violations.push(violation(
                "roles",
                alloc::format!("Worker {} has role {:?}, expected {:?}", index, slot.role, expected),
            ));
        }

        if slot.handoff.is_some() && slot.client.is_none() {
            violations.push(violation(
                "handoff_ownership",
                alloc::format!("Worker {} holds a hand-off job but no client", index),
            ));
        }

        if !slot.chain.is_empty() {
            if slot.role != WorkerRole::Control {
                violations.push(violation(
                    "chains",
                    alloc::format!("Worker {} ({:?}) has chained jobs", index, slot.role),
                ));
            } else if slot.client.is_none() {
                violations.push(violation(
                    "chains",
                    alloc::format!("Idle control worker {} has chained jobs", index),
                ));
            }
        }
    }

    violations
}

/// Assert all dispatch invariants hold (panic if not)
pub fn assert_dispatch_invariants<J>(state: &DispatchState<J>) {
    if let Some(v) = check_dispatch_invariants(state).first() {
        panic!("Invariant violated: {}: {}", v.invariant, v.description);
    }
}

// ============================================================================
// Kani proofs for invariants
// ============================================================================

#[cfg(kani)]
mod proofs {
    use super::*;

    /// Proof: any single lock request on an unlocked lock keeps invariants
    #[kani::proof]
    #[kani::unwind(4)]
    fn lock_unlocked_maintains_invariants() {
        let level = match kani::any::<u8>() % 3 {
            0 => LockLevel::Read,
            1 => LockLevel::ReadSerialized,
            _ => LockLevel::Write,
        };
        let mut state = TllState::new();
        let _ = state.lock(WorkerId(0), level);
        kani::assert(
            check_tll_invariants(&state).is_empty(),
            "Locking an unlocked lock should maintain invariants",
        );
        let _ = state.unlock(WorkerId(0));
        kani::assert(state == TllState::new(), "Round trip restores the lock");
    }
}
