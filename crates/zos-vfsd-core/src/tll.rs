//! Three-level lock state machine
//!
//! A three-level lock (TLL) guards shared mount and vnode state. It offers:
//!
//! - **Read**: any number of holders, no owner
//! - **ReadSerialized**: exactly one owner, tolerating concurrent readers
//! - **Write**: exactly one owner, nobody else
//!
//! plus an explicit ReadSerialized→Write upgrade and Write→ReadSerialized→Read
//! downgrade that a plain reader-writer lock cannot express without a race.
//!
//! # Queues
//!
//! Read and Write requesters share one FIFO; ReadSerialized requesters have
//! their own. Queued waiters remember the level they asked for.
//!
//! # Write Bias
//!
//! A queued Write (or a pending upgrade) blocks every later Read and
//! ReadSerialized request, and a ReadSerialized waiter is only served once
//! nothing is queued ahead of it on the Read/Write FIFO.
//!
//! # Hand-off
//!
//! Grants to queued waiters happen inside `unlock`/`downgrade`: the returned
//! [`Grant`] list names workers that already hold the lock and only need to
//! be woken.

use alloc::collections::{BTreeSet, VecDeque};
use alloc::vec::Vec;
use core::mem;

use crate::error::TllViolation;
use crate::types::{LockLevel, WorkerId};

/// Who holds the lock, and how.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Holding {
    /// Nobody
    #[default]
    Unlocked,
    /// One or more plain readers
    Read { readers: BTreeSet<WorkerId> },
    /// One serialized owner plus any number of plain readers
    ReadSerialized {
        owner: WorkerId,
        readers: BTreeSet<WorkerId>,
        /// Owner is blocked in `upgrade` until `readers` drains
        upgrading: bool,
    },
    /// One exclusive owner
    Write { owner: WorkerId },
}

impl Holding {
    fn sole(worker: WorkerId, level: LockLevel) -> Self {
        match level {
            LockLevel::Read => Holding::Read {
                readers: BTreeSet::from([worker]),
            },
            LockLevel::ReadSerialized => Holding::ReadSerialized {
                owner: worker,
                readers: BTreeSet::new(),
                upgrading: false,
            },
            LockLevel::Write => Holding::Write { owner: worker },
        }
    }
}

/// A worker waiting on the Read/Write queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Waiter {
    pub worker: WorkerId,
    pub level: LockLevel,
}

/// Outcome of a `lock` or `upgrade` request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acquire {
    /// The caller holds the requested level now
    Granted,
    /// The caller must suspend; a later `unlock`/`downgrade` hands it the lock
    Queued,
}

/// A queued request that has just been satisfied.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Grant {
    pub worker: WorkerId,
    pub level: LockLevel,
}

/// Three-level lock state.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TllState {
    pub(crate) holding: Holding,
    pub(crate) write_queue: VecDeque<Waiter>,
    pub(crate) serial_queue: VecDeque<WorkerId>,
}

impl TllState {
    /// Create an unlocked lock.
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Request `level` on behalf of `worker`.
    pub fn lock(&mut self, worker: WorkerId, level: LockLevel) -> Result<Acquire, TllViolation> {
        if let Some(held) = self.held_by(worker) {
            return Err(TllViolation::AlreadyHeld { worker, held });
        }
        if self.is_queued(worker) {
            return Err(TllViolation::AlreadyQueued { worker });
        }

        let queued_ahead = !self.write_queue.is_empty();
        match &mut self.holding {
            Holding::Unlocked => {
                self.holding = Holding::sole(worker, level);
                return Ok(Acquire::Granted);
            }
            Holding::Write { .. } => {}
            Holding::Read { readers } => match level {
                LockLevel::Read if !queued_ahead => {
                    readers.insert(worker);
                    return Ok(Acquire::Granted);
                }
                LockLevel::ReadSerialized if !queued_ahead && self.serial_queue.is_empty() => {
                    let readers = mem::take(readers);
                    self.holding = Holding::ReadSerialized {
                        owner: worker,
                        readers,
                        upgrading: false,
                    };
                    return Ok(Acquire::Granted);
                }
                _ => {}
            },
            Holding::ReadSerialized {
                readers, upgrading, ..
            } => {
                if level == LockLevel::Read && !queued_ahead && !*upgrading {
                    readers.insert(worker);
                    return Ok(Acquire::Granted);
                }
            }
        }

        match level {
            LockLevel::ReadSerialized => self.serial_queue.push_back(worker),
            LockLevel::Read | LockLevel::Write => {
                self.write_queue.push_back(Waiter { worker, level });
            }
        }
        Ok(Acquire::Queued)
    }

    /// Release whatever `worker` holds.
    ///
    /// Returns the queued workers that now hold the lock, in grant order.
    pub fn unlock(&mut self, worker: WorkerId) -> Result<Vec<Grant>, TllViolation> {
        let mut grants = Vec::new();

        match &mut self.holding {
            Holding::Unlocked => return Err(TllViolation::NotHeld { worker }),
            Holding::Read { readers } => {
                if !readers.remove(&worker) {
                    return Err(TllViolation::NotHeld { worker });
                }
                if readers.is_empty() {
                    self.holding = Holding::Unlocked;
                }
            }
            Holding::ReadSerialized {
                owner,
                readers,
                upgrading,
            } => {
                if *owner == worker {
                    if *upgrading {
                        return Err(TllViolation::UpgradePending { worker });
                    }
                    let readers = mem::take(readers);
                    self.holding = if readers.is_empty() {
                        Holding::Unlocked
                    } else {
                        Holding::Read { readers }
                    };
                } else if readers.remove(&worker) {
                    // Last reader out completes a pending upgrade
                    if *upgrading && readers.is_empty() {
                        let owner = *owner;
                        self.holding = Holding::Write { owner };
                        grants.push(Grant {
                            worker: owner,
                            level: LockLevel::Write,
                        });
                    }
                } else {
                    return Err(TllViolation::NotHeld { worker });
                }
            }
            Holding::Write { owner } => {
                if *owner != worker {
                    return Err(TllViolation::NotHeld { worker });
                }
                self.holding = Holding::Unlocked;
            }
        }

        self.promote(&mut grants);
        Ok(grants)
    }

    /// Convert the caller's ReadSerialized hold into Write.
    ///
    /// `Queued` means readers are still present: the caller must suspend
    /// until the last of them unlocks, which grants it Write.
    pub fn upgrade(&mut self, worker: WorkerId) -> Result<Acquire, TllViolation> {
        match &mut self.holding {
            Holding::Write { owner } if *owner == worker => Ok(Acquire::Granted),
            Holding::ReadSerialized {
                owner,
                readers,
                upgrading,
            } if *owner == worker => {
                if *upgrading {
                    return Err(TllViolation::UpgradePending { worker });
                }
                if readers.is_empty() {
                    self.holding = Holding::Write { owner: worker };
                    Ok(Acquire::Granted)
                } else {
                    *upgrading = true;
                    Ok(Acquire::Queued)
                }
            }
            Holding::Read { readers } | Holding::ReadSerialized { readers, .. }
                if readers.contains(&worker) =>
            {
                Err(TllViolation::BadUpgrade {
                    worker,
                    level: LockLevel::Read,
                })
            }
            _ => Err(TllViolation::NotOwner { worker }),
        }
    }

    /// Step the caller down one level: Write→ReadSerialized or
    /// ReadSerialized→Read.
    ///
    /// Stepping down to Read gives ownership to the first queued
    /// ReadSerialized waiter when no Read/Write waiter is ahead of it; the
    /// caller is then a plain reader. Returns the workers granted as a result.
    pub fn downgrade(&mut self, worker: WorkerId) -> Result<Vec<Grant>, TllViolation> {
        match &mut self.holding {
            Holding::Write { owner } if *owner == worker => {
                self.holding = Holding::ReadSerialized {
                    owner: worker,
                    readers: BTreeSet::new(),
                    upgrading: false,
                };
            }
            Holding::ReadSerialized {
                owner,
                readers,
                upgrading,
            } if *owner == worker => {
                if *upgrading {
                    return Err(TllViolation::UpgradePending { worker });
                }
                let mut readers = mem::take(readers);
                readers.insert(worker);
                self.holding = Holding::Read { readers };
            }
            _ => return Err(TllViolation::NotOwner { worker }),
        }

        let mut grants = Vec::new();
        self.promote(&mut grants);
        Ok(grants)
    }

    /// Grant queued requests that have become compatible with the holding.
    fn promote(&mut self, grants: &mut Vec<Grant>) {
        loop {
            match &mut self.holding {
                Holding::Write { .. } => return,
                Holding::ReadSerialized {
                    readers, upgrading, ..
                } => {
                    if *upgrading {
                        return;
                    }
                    // Readers at the head arrived before any queued writer
                    while let Some(waiter) = self.write_queue.front().copied() {
                        if waiter.level != LockLevel::Read {
                            break;
                        }
                        self.write_queue.pop_front();
                        readers.insert(waiter.worker);
                        grants.push(Grant {
                            worker: waiter.worker,
                            level: LockLevel::Read,
                        });
                    }
                    return;
                }
                Holding::Unlocked | Holding::Read { .. } => {
                    let Some(head) = self.write_queue.front().copied() else {
                        if let Some(next) = self.serial_queue.pop_front() {
                            let readers = self.take_readers();
                            self.holding = Holding::ReadSerialized {
                                owner: next,
                                readers,
                                upgrading: false,
                            };
                            grants.push(Grant {
                                worker: next,
                                level: LockLevel::ReadSerialized,
                            });
                        }
                        return;
                    };

                    if head.level == LockLevel::Write {
                        if self.readers() == 0 {
                            self.write_queue.pop_front();
                            self.holding = Holding::Write { owner: head.worker };
                            grants.push(head_grant(head));
                        }
                        return;
                    }

                    self.write_queue.pop_front();
                    self.add_reader(head.worker);
                    grants.push(head_grant(head));
                }
            }
        }
    }

    fn take_readers(&mut self) -> BTreeSet<WorkerId> {
        match mem::take(&mut self.holding) {
            Holding::Read { readers } => readers,
            other => {
                self.holding = other;
                BTreeSet::new()
            }
        }
    }

    fn add_reader(&mut self, worker: WorkerId) {
        match &mut self.holding {
            Holding::Read { readers } | Holding::ReadSerialized { readers, .. } => {
                readers.insert(worker);
            }
            Holding::Unlocked => {
                self.holding = Holding::sole(worker, LockLevel::Read);
            }
            Holding::Write { .. } => {}
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Current level, or `None` when unlocked.
    pub fn level(&self) -> Option<LockLevel> {
        match self.holding {
            Holding::Unlocked => None,
            Holding::Read { .. } => Some(LockLevel::Read),
            Holding::ReadSerialized { .. } => Some(LockLevel::ReadSerialized),
            Holding::Write { .. } => Some(LockLevel::Write),
        }
    }

    /// Owner for ReadSerialized and Write holdings.
    pub fn owner(&self) -> Option<WorkerId> {
        match self.holding {
            Holding::ReadSerialized { owner, .. } | Holding::Write { owner } => Some(owner),
            _ => None,
        }
    }

    /// Number of plain readers.
    pub fn readers(&self) -> usize {
        match &self.holding {
            Holding::Read { readers } | Holding::ReadSerialized { readers, .. } => readers.len(),
            _ => 0,
        }
    }

    /// The level `worker` currently holds, if any.
    pub fn held_by(&self, worker: WorkerId) -> Option<LockLevel> {
        match &self.holding {
            Holding::Unlocked => None,
            Holding::Read { readers } => readers.contains(&worker).then_some(LockLevel::Read),
            Holding::ReadSerialized { owner, readers, .. } => {
                if *owner == worker {
                    Some(LockLevel::ReadSerialized)
                } else {
                    readers.contains(&worker).then_some(LockLevel::Read)
                }
            }
            Holding::Write { owner } => (*owner == worker).then_some(LockLevel::Write),
        }
    }

    /// Whether anyone holds the lock.
    pub fn is_locked(&self) -> bool {
        self.holding != Holding::Unlocked
    }

    /// Whether anyone is queued on the lock.
    pub fn has_pending(&self) -> bool {
        !self.write_queue.is_empty() || !self.serial_queue.is_empty()
    }

    /// Whether the owner is blocked waiting for readers to drain.
    pub fn is_upgrading(&self) -> bool {
        matches!(self.holding, Holding::ReadSerialized { upgrading: true, .. })
    }

    /// Whether `worker` waits on either queue.
    pub fn is_queued(&self, worker: WorkerId) -> bool {
        self.write_queue.iter().any(|w| w.worker == worker) || self.serial_queue.contains(&worker)
    }

    /// Current holding.
    pub fn holding(&self) -> &Holding {
        &self.holding
    }

    /// Waiters on the Read/Write queue, head first.
    pub fn write_waiters(&self) -> impl Iterator<Item = &Waiter> {
        self.write_queue.iter()
    }

    /// Waiters on the ReadSerialized queue, head first.
    pub fn serial_waiters(&self) -> impl Iterator<Item = &WorkerId> {
        self.serial_queue.iter()
    }
}

fn head_grant(head: Waiter) -> Grant {
    Grant {
        worker: head.worker,
        level: head.level,
    }
}
