//! Worker pool bookkeeping
//!
//! The dispatch table holds one slot per worker: `pool_size` general
//! workers followed by the control worker and the deadlock resolver.
//! A slot is busy while it carries a client; idle pool workers are handed
//! jobs directly, and work that finds no idle pool worker is queued against
//! its client until a pool worker calls [`DispatchState::get_work`].
//!
//! The table is generic over the job payload so the runtime can store boxed
//! closures while tests use plain integers.
//!
//! # Pending Queue
//!
//! Each client owns a FIFO of pending jobs; clients with pending jobs are
//! kept in a global FIFO. A worker taking pending work serves the first
//! client in that FIFO and, if the client still has jobs left, moves it to
//! the back. Jobs are never dropped.

use alloc::collections::{BTreeMap, VecDeque};
use alloc::vec::Vec;
use zos_vfsd_ipc::Endpoint;

use crate::types::{WorkerId, WorkerRole};

/// Number of reserved workers after the pool (control, deadlock resolver).
pub const RESERVED_WORKERS: usize = 2;

/// Per-worker dispatch bookkeeping.
#[derive(Clone, Debug)]
pub struct Slot<J> {
    pub(crate) role: WorkerRole,
    /// Client being served; `Some` iff the worker is busy
    pub(crate) client: Option<Endpoint>,
    /// Job assigned to the (previously idle) worker but not yet picked up
    pub(crate) handoff: Option<J>,
    /// Jobs queued behind the current one (control worker only)
    pub(crate) chain: VecDeque<(Endpoint, J)>,
}

impl<J> Slot<J> {
    fn new(role: WorkerRole) -> Self {
        Self {
            role,
            client: None,
            handoff: None,
            chain: VecDeque::new(),
        }
    }

    fn is_idle(&self) -> bool {
        self.client.is_none()
    }

    fn assign(&mut self, client: Endpoint, job: J) {
        self.client = Some(client);
        self.handoff = Some(job);
    }
}

/// Outcome of submitting a job.
#[derive(Debug, PartialEq, Eq)]
pub enum Start<J> {
    /// An idle worker took the job and must be signalled
    Assigned(WorkerId),
    /// No worker was free; the job waits in a queue
    Queued,
    /// The job cannot be placed anywhere and is handed back
    Rejected(J),
}

/// Worker table and pending-job queues.
#[derive(Clone, Debug)]
pub struct DispatchState<J> {
    pub(crate) pool_size: usize,
    pub(crate) slots: Vec<Slot<J>>,
    pub(crate) pending: BTreeMap<Endpoint, VecDeque<J>>,
    pub(crate) pending_order: VecDeque<Endpoint>,
    pub(crate) pending_count: usize,
}

impl<J> DispatchState<J> {
    /// Create a table with `pool_size` pool workers plus the reserved ones.
    pub fn new(pool_size: usize) -> Self {
        let mut slots = Vec::with_capacity(pool_size + RESERVED_WORKERS);
        slots.extend((0..pool_size).map(|_| Slot::new(WorkerRole::Pool)));
        slots.push(Slot::new(WorkerRole::Control));
        slots.push(Slot::new(WorkerRole::DeadlockResolver));

        Self {
            pool_size,
            slots,
            pending: BTreeMap::new(),
            pending_order: VecDeque::new(),
            pending_count: 0,
        }
    }

    /// Id of the worker servicing control-plane requests.
    pub fn control_worker(&self) -> WorkerId {
        WorkerId(self.pool_size)
    }

    /// Id of the worker held in reserve to break deadlocks.
    pub fn deadlock_worker(&self) -> WorkerId {
        WorkerId(self.pool_size + 1)
    }

    /// Total number of worker slots, reserved ones included.
    pub fn worker_count(&self) -> usize {
        self.slots.len()
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Role of a worker, or `None` for an unknown id.
    pub fn role(&self, worker: WorkerId) -> Option<WorkerRole> {
        self.slots.get(worker.0).map(|s| s.role)
    }

    // ========================================================================
    // Submission
    // ========================================================================

    /// Assign a client job to the first idle pool worker, or queue it.
    pub fn start(&mut self, client: Endpoint, job: J) -> Start<J> {
        let idle = self.slots[..self.pool_size]
            .iter()
            .position(|slot| slot.is_idle());

        match idle {
            Some(index) => {
                self.slots[index].assign(client, job);
                Start::Assigned(WorkerId(index))
            }
            None => {
                let queue = self.pending.entry(client).or_default();
                if queue.is_empty() {
                    self.pending_order.push_back(client);
                }
                queue.push_back(job);
                self.pending_count += 1;
                Start::Queued
            }
        }
    }

    /// Give a control-plane job to the control worker, chaining it behind
    /// the current one when the worker is busy.
    pub fn start_control(&mut self, client: Endpoint, job: J) -> Start<J> {
        let worker = self.control_worker();
        let slot = &mut self.slots[worker.0];
        if slot.is_idle() {
            slot.assign(client, job);
            Start::Assigned(worker)
        } else {
            slot.chain.push_back((client, job));
            Start::Queued
        }
    }

    /// Give a job to the deadlock resolver if it is idle; hand it back
    /// otherwise.
    pub fn start_deadlock(&mut self, client: Endpoint, job: J) -> Start<J> {
        let worker = self.deadlock_worker();
        let slot = &mut self.slots[worker.0];
        if slot.is_idle() {
            slot.assign(client, job);
            Start::Assigned(worker)
        } else {
            Start::Rejected(job)
        }
    }

    // ========================================================================
    // Worker side
    // ========================================================================

    /// Next job for `worker`, which has just become free.
    ///
    /// Order: a handed-off job, then the worker's chain, then (pool workers
    /// only) the oldest pending client. `None` leaves the worker idle.
    pub fn get_work(&mut self, worker: WorkerId) -> Option<J> {
        let slot = self.slots.get_mut(worker.0)?;

        if let Some(job) = slot.handoff.take() {
            return Some(job);
        }

        slot.client = None;
        if let Some((client, job)) = slot.chain.pop_front() {
            slot.client = Some(client);
            return Some(job);
        }

        if slot.role != WorkerRole::Pool {
            return None;
        }

        let (client, job) = self.take_pending()?;
        self.slots[worker.0].client = Some(client);
        Some(job)
    }

    fn take_pending(&mut self) -> Option<(Endpoint, J)> {
        let client = self.pending_order.pop_front()?;
        let queue = self.pending.get_mut(&client)?;
        let job = queue.pop_front()?;

        if queue.is_empty() {
            self.pending.remove(&client);
        } else {
            self.pending_order.push_back(client);
        }
        self.pending_count -= 1;
        Some((client, job))
    }

    /// Remove every pending job of `client`, oldest first.
    pub fn cancel_pending(&mut self, client: Endpoint) -> Vec<J> {
        let Some(queue) = self.pending.remove(&client) else {
            return Vec::new();
        };
        self.pending_order.retain(|c| *c != client);
        self.pending_count -= queue.len();
        queue.into_iter().collect()
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Client currently served by `worker`.
    pub fn client_of(&self, worker: WorkerId) -> Option<Endpoint> {
        self.slots.get(worker.0).and_then(|s| s.client)
    }

    /// Workers currently serving `client`.
    pub fn workers_serving(&self, client: Endpoint) -> Vec<WorkerId> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.client == Some(client))
            .map(|(i, _)| WorkerId(i))
            .collect()
    }

    pub fn is_busy(&self, worker: WorkerId) -> bool {
        self.slots.get(worker.0).is_some_and(|s| !s.is_idle())
    }

    /// Number of idle pool workers.
    pub fn available(&self) -> usize {
        self.slots[..self.pool_size]
            .iter()
            .filter(|s| s.is_idle())
            .count()
    }

    /// Number of queued client jobs.
    pub fn pending(&self) -> usize {
        self.pending_count
    }

    /// Number of queued jobs belonging to `client`.
    pub fn pending_for(&self, client: Endpoint) -> usize {
        self.pending.get(&client).map_or(0, VecDeque::len)
    }

    /// Number of jobs chained behind the control worker's current job.
    pub fn control_backlog(&self) -> usize {
        self.slots[self.pool_size].chain.len()
    }
}
