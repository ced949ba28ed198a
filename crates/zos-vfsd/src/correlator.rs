//! Request/reply correlation
//!
//! A worker making a remote call registers a *wait* naming the target
//! endpoint and a fresh [`CorrelationTag`], sends the tagged request, and
//! suspends. Whoever drains the transport hands each reply (or callback) to
//! [`Correlator::deliver`], which finds the wait by tag and source, stores
//! the message in the wait's inbox and reports which worker to wake.
//!
//! # Waits Per Worker
//!
//! Each worker keeps a stack of waits: servicing a callback may itself make
//! a remote call, which pushes a second wait above the first. Deliveries to
//! a wait below the top are kept in its inbox without waking the worker,
//! which is busy with the inner call and will look once it gets back there.
//!
//! # Tags
//!
//! Tags carry the worker index and a per-worker sequence number, so a late
//! reply to an abandoned or retried request never matches a newer wait.

use std::collections::VecDeque;

use zos_vfsd_core::WorkerId;
use zos_vfsd_ipc::{status, CorrelationTag, Endpoint, Message};

use crate::error::CallError;
use crate::worker::Worker;

/// Something delivered to a waiting worker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Delivery {
    /// The reply ending the call
    Reply(Message),
    /// A request from the called server that must be serviced first
    Callback(Message),
    /// The call was failed on the worker's behalf
    Failed(i32),
}

impl Delivery {
    fn ends_call(&self) -> bool {
        !matches!(self, Delivery::Callback(_))
    }
}

/// Outcome of routing an incoming message.
#[derive(Debug, PartialEq, Eq)]
pub enum Routed {
    /// Stored for `worker`; `wake` is set when it must be signalled
    Matched { worker: WorkerId, wake: bool },
    /// The matching call has already been answered
    Duplicate(Message),
    /// No worker waits for this message
    Unmatched(Message),
}

#[derive(Debug)]
struct Wait {
    target: Endpoint,
    tag: CorrelationTag,
    inbox: VecDeque<Delivery>,
    answered: bool,
}

impl Wait {
    fn push(&mut self, delivery: Delivery) {
        self.answered |= delivery.ends_call();
        self.inbox.push_back(delivery);
    }
}

/// Outstanding remote calls of every worker.
#[derive(Debug)]
pub struct Correlator {
    waits: Vec<Vec<Wait>>,
    next_seq: Vec<u16>,
}

impl Correlator {
    /// Table for `workers` workers.
    pub fn new(workers: usize) -> Self {
        Self {
            waits: (0..workers).map(|_| Vec::new()).collect(),
            next_seq: vec![0; workers],
        }
    }

    /// Register a call from `worker` to `target` and return its tag.
    pub fn begin(&mut self, worker: WorkerId, target: Endpoint) -> CorrelationTag {
        let seq = &mut self.next_seq[worker.0];
        let tag = CorrelationTag::new(worker.0 as u16, *seq);
        *seq = seq.wrapping_add(1);

        self.waits[worker.0].push(Wait {
            target,
            tag,
            inbox: VecDeque::new(),
            answered: false,
        });
        tag
    }

    /// Route a tagged reply or callback to the worker waiting for it.
    ///
    /// Reply-coded messages end the call; request-coded messages are
    /// callbacks and leave the wait armed.
    pub fn deliver(&mut self, msg: Message) -> Routed {
        let Some(tag) = msg.tag else {
            return Routed::Unmatched(msg);
        };
        let worker = WorkerId(tag.worker as usize);
        let Some(stack) = self.waits.get_mut(worker.0) else {
            return Routed::Unmatched(msg);
        };

        let top = stack.len().saturating_sub(1);
        let Some((depth, wait)) = stack
            .iter_mut()
            .enumerate()
            .find(|(_, w)| w.tag == tag && w.target == msg.source)
        else {
            return Routed::Unmatched(msg);
        };

        if wait.answered {
            return Routed::Duplicate(msg);
        }
        let delivery = if msg.is_reply() {
            Delivery::Reply(msg)
        } else {
            Delivery::Callback(msg)
        };
        wait.push(delivery);
        Routed::Matched {
            worker,
            wake: depth == top,
        }
    }

    /// Take the next delivery for `worker`'s call `tag`.
    ///
    /// A delivery that ends the call also retires the wait.
    pub fn take(&mut self, worker: WorkerId, tag: CorrelationTag) -> Option<Delivery> {
        let stack = &mut self.waits[worker.0];
        let index = stack.iter().position(|w| w.tag == tag)?;
        let delivery = stack[index].inbox.pop_front()?;
        if delivery.ends_call() {
            stack.remove(index);
        }
        Some(delivery)
    }

    /// Retire a wait whose request never left.
    pub fn cancel(&mut self, worker: WorkerId, tag: CorrelationTag) {
        self.waits[worker.0].retain(|w| w.tag != tag);
    }

    /// Fail every unanswered call of `worker` with `code`.
    ///
    /// Returns whether anything was failed.
    pub fn fail(&mut self, worker: WorkerId, code: i32) -> bool {
        let mut failed = false;
        for wait in self.waits[worker.0].iter_mut().filter(|w| !w.answered) {
            wait.push(Delivery::Failed(code));
            failed = true;
        }
        failed
    }

    /// Fail every unanswered call to `target` with `code`.
    ///
    /// Returns the workers affected.
    pub fn fail_endpoint(&mut self, target: Endpoint, code: i32) -> Vec<WorkerId> {
        let mut affected = Vec::new();
        for (index, stack) in self.waits.iter_mut().enumerate() {
            let mut hit = false;
            for wait in stack
                .iter_mut()
                .filter(|w| !w.answered && w.target == target)
            {
                wait.push(Delivery::Failed(code));
                hit = true;
            }
            if hit {
                affected.push(WorkerId(index));
            }
        }
        affected
    }

    /// Endpoint `worker` is currently waiting on.
    pub fn awaiting(&self, worker: WorkerId) -> Option<Endpoint> {
        self.waits.get(worker.0)?.last().map(|w| w.target)
    }

    /// Number of outstanding calls of `worker`.
    pub fn depth(&self, worker: WorkerId) -> usize {
        self.waits.get(worker.0).map_or(0, Vec::len)
    }
}

// ============================================================================
// Blocking calls
// ============================================================================

impl Worker {
    /// Send `request` to `target` and suspend until the reply arrives.
    ///
    /// Callbacks from `target` that arrive meanwhile are serviced on this
    /// worker. An `ERESTART` reply re-sends the request, with a fresh tag,
    /// up to the configured number of times.
    pub fn send_and_wait(
        &mut self,
        target: Endpoint,
        request: Message,
    ) -> Result<Message, CallError> {
        if target == self.call().caller {
            log::warn!(
                "Worker {}: refusing call {} to its own caller {}",
                self.id(),
                request.code,
                target
            );
            return Err(CallError::Deadlock);
        }

        let retries = self.shared().config.restart_retries;
        let mut attempts = 0;
        loop {
            attempts += 1;
            let reply = self.call_once(target, request.clone())?;
            if reply.code != status::ERESTART {
                return Ok(reply);
            }
            if attempts > retries {
                log::warn!(
                    "Worker {}: {} still restarting after {} attempts",
                    self.id(),
                    target,
                    attempts
                );
                return Err(CallError::Restarted { attempts });
            }
            log::warn!(
                "Worker {}: {} answered ERESTART, retrying ({}/{})",
                self.id(),
                target,
                attempts,
                retries
            );
        }
    }

    fn call_once(&mut self, target: Endpoint, mut request: Message) -> Result<Message, CallError> {
        let id = self.id();
        let tag = self.shared().lock().correlator.begin(id, target);
        request.tag = Some(tag);

        log::debug!("Worker {}: call {} to {} tag {}", id, request.code, target, tag);
        if let Err(e) = self.shared().transport.send(target, request) {
            log::warn!("Worker {}: send to {} failed: {}", id, target, e);
            self.shared().lock().correlator.cancel(id, tag);
            return Err(CallError::Io);
        }

        loop {
            let delivery = self.shared().lock().correlator.take(id, tag);
            match delivery {
                None => self.suspend(),
                Some(Delivery::Reply(reply)) => return Ok(reply),
                Some(Delivery::Failed(code)) => {
                    log::warn!(
                        "Worker {}: call to {} failed with {}",
                        id,
                        target,
                        status::name(code)
                    );
                    return Err(CallError::from_status(code));
                }
                Some(Delivery::Callback(callback)) => self.service_callback(callback),
            }
        }
    }
}
