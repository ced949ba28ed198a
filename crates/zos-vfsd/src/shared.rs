//! State shared by the dispatch loop and every worker.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use zos_vfsd_core::{DispatchState, Start, WorkerId};
use zos_vfsd_ipc::{status, Endpoint, Message};

use crate::config::VfsdConfig;
use crate::correlator::Correlator;
use crate::event::Event;
use crate::job::Job;
use crate::table::DispatchTable;
use crate::transport::Transport;

/// Bookkeeping guarded by the dispatch lock.
///
/// The lock is only ever held for bookkeeping; nobody blocks while
/// holding it.
pub(crate) struct Core {
    pub dispatch: DispatchState<Job>,
    pub correlator: Correlator,
    /// File-system servers whose requests may be callbacks
    pub servers: BTreeSet<Endpoint>,
    pub shutting_down: bool,
}

pub(crate) struct Shared {
    pub config: VfsdConfig,
    pub transport: Arc<dyn Transport>,
    pub table: DispatchTable,
    core: Mutex<Core>,
    events: Vec<Event>,
}

impl Shared {
    pub fn new(config: VfsdConfig, transport: Arc<dyn Transport>, table: DispatchTable) -> Self {
        let dispatch = DispatchState::new(config.workers);
        let workers = dispatch.worker_count();
        Self {
            core: Mutex::new(Core {
                dispatch,
                correlator: Correlator::new(workers),
                servers: BTreeSet::new(),
                shutting_down: false,
            }),
            events: (0..workers).map(|_| Event::new()).collect(),
            config,
            transport,
            table,
        }
    }

    /// Take the dispatch lock.
    pub fn lock(&self) -> MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn worker_count(&self) -> usize {
        self.events.len()
    }

    pub fn event(&self, worker: WorkerId) -> &Event {
        &self.events[worker.0]
    }

    pub fn signal(&self, worker: WorkerId) {
        self.events[worker.0].signal();
    }

    /// Act on a dispatcher decision.
    pub fn place(&self, start: Start<Job>, what: &str) {
        match start {
            Start::Assigned(worker) => {
                log::debug!("Dispatcher: {} assigned to worker {}", what, worker);
                self.signal(worker);
            }
            Start::Queued => log::debug!("Dispatcher: {} queued", what),
            Start::Rejected(job) => {
                log::warn!(
                    "Dispatcher: no worker for {} from {}, answering EAGAIN",
                    what,
                    job.client()
                );
                self.answer(job.request(), status::EAGAIN);
            }
        }
    }

    /// Send a bare status reply to `request`'s sender.
    pub fn answer(&self, request: &Message, code: i32) {
        let to = request.source;
        if let Err(e) = self.transport.send(to, request.reply(code, Vec::new())) {
            log::warn!("Dispatcher: reply {} to {} failed: {}", status::name(code), to, e);
        }
    }
}
