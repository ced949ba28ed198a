//! The VFS daemon
//!
//! [`Vfsd`] owns the worker threads and routes every incoming message. The
//! thread that drains the transport (normally the one calling [`Vfsd::run`])
//! never blocks on anything but `receive`: it hands requests to workers,
//! replies to the correlator, and liveness notifications to
//! `stop_by_endpoint`.
//!
//! # Routing
//!
//! 1. Replies go to the correlator
//! 2. `ENDPOINT_DOWN` from the liveness endpoint fails calls to the dead endpoint
//! 3. Control-plane messages go to the control worker (`PM_UNPAUSE`
//!    interrupts the named client instead)
//! 4. A request from a registered server that matches a waiting worker is a
//!    callback and goes to that worker
//! 5. Other requests from registered servers go to the pool, then the
//!    deadlock resolver, else are answered `EAGAIN`
//! 6. Everything else is a client request for the pool

use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use serde::{Deserialize, Serialize};
use zos_vfsd_core::{WorkerId, WorkerRole};
use zos_vfsd_ipc::{call, decode_endpoint, status, Endpoint, Message};

use crate::config::VfsdConfig;
use crate::correlator::Routed;
use crate::error::VfsdError;
use crate::job::Job;
use crate::shared::Shared;
use crate::table::DispatchTable;
use crate::transport::Transport;
use crate::worker::Worker;

/// Snapshot of pool occupancy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub pool_size: usize,
    pub idle: usize,
    pub busy: usize,
    pub pending: usize,
    pub control_backlog: usize,
    pub deadlock_busy: bool,
}

/// A running VFS daemon.
pub struct Vfsd {
    shared: Arc<Shared>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Vfsd {
    /// Validate `config` and start every worker thread.
    pub fn start(
        config: VfsdConfig,
        transport: Arc<dyn Transport>,
        table: DispatchTable,
    ) -> Result<Self, VfsdError> {
        config.validate()?;
        let stack_size = config.worker_stack_size;
        let shared = Arc::new(Shared::new(config, transport, table));

        let roles: Vec<WorkerRole> = {
            let core = shared.lock();
            (0..shared.worker_count())
                .filter_map(|i| core.dispatch.role(WorkerId(i)))
                .collect()
        };

        let vfsd = Self {
            shared: shared.clone(),
            threads: Mutex::new(Vec::with_capacity(roles.len())),
        };

        for (index, role) in roles.into_iter().enumerate() {
            let id = WorkerId(index);
            let name = match role {
                WorkerRole::Pool => format!("vfs-worker-{}", index),
                WorkerRole::Control => String::from("vfs-control"),
                WorkerRole::DeadlockResolver => String::from("vfs-deadlock"),
            };

            let mut builder = thread::Builder::new().name(name.clone());
            if let Some(size) = stack_size {
                builder = builder.stack_size(size);
            }

            let worker = Worker::new(id, role, shared.clone());
            match builder.spawn(move || worker.run()) {
                Ok(handle) => vfsd.threads_mut().push(handle),
                Err(source) => {
                    // Let the threads already running exit before bailing out
                    vfsd.stop_workers();
                    return Err(VfsdError::Spawn { name, source });
                }
            }
        }

        log::info!(
            "Dispatcher: started {} pool workers plus control and deadlock workers",
            shared.config.workers
        );
        Ok(vfsd)
    }

    fn threads_mut(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.threads.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &VfsdConfig {
        &self.shared.config
    }

    // ========================================================================
    // Message loop
    // ========================================================================

    /// Drain the transport until it closes.
    pub fn run(&self) {
        while let Some(msg) = self.shared.transport.receive() {
            self.handle_message(msg);
        }
        log::info!("Dispatcher: transport closed");
    }

    /// Route one incoming message.
    pub fn handle_message(&self, msg: Message) {
        let config = &self.shared.config;

        if msg.is_reply() {
            self.on_reply(msg);
            return;
        }

        if msg.source == config.liveness_endpoint && msg.code == call::ENDPOINT_DOWN {
            match decode_endpoint(&msg.payload) {
                Some(dead) => {
                    self.unregister_server(dead);
                    self.stop_by_endpoint(dead);
                }
                None => log::warn!("Dispatcher: malformed ENDPOINT_DOWN from {}", msg.source),
            }
            return;
        }

        if msg.source == config.control_endpoint {
            if msg.code == call::PM_UNPAUSE {
                match decode_endpoint(&msg.payload) {
                    Some(client) => {
                        self.interrupt(client);
                    }
                    None => log::warn!("Dispatcher: malformed PM_UNPAUSE from {}", msg.source),
                }
                return;
            }
            self.submit_control(msg);
            return;
        }

        let mut core = self.shared.lock();
        if !core.servers.contains(&msg.source) {
            drop(core);
            self.submit(msg);
            return;
        }

        let msg = match core.correlator.deliver(msg) {
            Routed::Matched { worker, wake } => {
                drop(core);
                log::debug!("Dispatcher: callback delivered to worker {}", worker);
                if wake {
                    self.shared.signal(worker);
                }
                return;
            }
            Routed::Duplicate(msg) | Routed::Unmatched(msg) => msg,
        };

        if core.shutting_down {
            drop(core);
            self.refuse(&msg);
            return;
        }
        let source = msg.source;
        let job = Job::new(msg);
        let start = if core.dispatch.available() > 0 {
            core.dispatch.start(source, job)
        } else {
            core.dispatch.start_deadlock(source, job)
        };
        drop(core);
        self.shared.place(start, "server request");
    }

    fn on_reply(&self, msg: Message) {
        let routed = self.shared.lock().correlator.deliver(msg);
        match routed {
            Routed::Matched { worker, wake } => {
                log::debug!("Correlator: reply delivered to worker {}", worker);
                if wake {
                    self.shared.signal(worker);
                }
            }
            Routed::Duplicate(msg) => log::warn!(
                "Correlator: discarding duplicate reply {} from {}",
                status::name(msg.code),
                msg.source
            ),
            Routed::Unmatched(msg) => log::warn!(
                "Correlator: discarding unmatched reply {} from {} (tag {:?})",
                status::name(msg.code),
                msg.source,
                msg.tag
            ),
        }
    }

    fn refuse(&self, msg: &Message) {
        log::warn!("Dispatcher: shutting down, refusing call {} from {}", msg.code, msg.source);
        self.shared.answer(msg, status::EIO);
    }

    // ========================================================================
    // Submission
    // ========================================================================

    /// Hand a client request to the pool.
    pub fn submit(&self, request: Message) {
        self.submit_job(Job::new(request));
    }

    /// Hand a prepared job to the pool.
    pub fn submit_job(&self, job: Job) {
        let mut core = self.shared.lock();
        if core.shutting_down {
            drop(core);
            self.refuse(job.request());
            return;
        }
        let start = core.dispatch.start(job.client(), job);
        drop(core);
        self.shared.place(start, "client request");
    }

    /// Hand a control-plane request to the control worker.
    pub fn submit_control(&self, request: Message) {
        let mut core = self.shared.lock();
        if core.shutting_down {
            drop(core);
            self.refuse(&request);
            return;
        }
        let start = core.dispatch.start_control(request.source, Job::new(request));
        drop(core);
        self.shared.place(start, "control request");
    }

    // ========================================================================
    // Servers
    // ========================================================================

    /// Treat requests from `server` as potential callbacks.
    pub fn register_server(&self, server: Endpoint) {
        self.shared.lock().servers.insert(server);
    }

    pub fn unregister_server(&self, server: Endpoint) -> bool {
        self.shared.lock().servers.remove(&server)
    }

    pub fn is_server(&self, endpoint: Endpoint) -> bool {
        self.shared.lock().servers.contains(&endpoint)
    }

    // ========================================================================
    // Cancellation
    // ========================================================================

    /// Fail `worker`'s pending remote call with `EIO` and wake it.
    ///
    /// Returns `false` when the worker is not waiting on a remote call.
    pub fn stop(&self, worker: WorkerId) -> bool {
        if worker.0 >= self.shared.worker_count() {
            return false;
        }
        let failed = self.shared.lock().correlator.fail(worker, status::EIO);
        if failed {
            log::warn!("Dispatcher: stopped worker {}", worker);
            self.shared.signal(worker);
        }
        failed
    }

    /// Fail every pending remote call to `endpoint` with `EIO`.
    ///
    /// Returns the number of workers woken.
    pub fn stop_by_endpoint(&self, endpoint: Endpoint) -> usize {
        let workers = self.shared.lock().correlator.fail_endpoint(endpoint, status::EIO);
        for worker in &workers {
            log::warn!("Dispatcher: worker {} lost endpoint {}", worker, endpoint);
            self.shared.signal(*worker);
        }
        workers.len()
    }

    /// Interrupt `client`: in-flight remote calls fail with `EINTR` and
    /// its queued jobs are answered `EINTR` without running.
    ///
    /// Returns the number of calls interrupted plus jobs cancelled.
    pub fn interrupt(&self, client: Endpoint) -> usize {
        let (woken, cancelled) = {
            let mut core = self.shared.lock();
            let mut woken = Vec::new();
            for worker in core.dispatch.workers_serving(client) {
                if core.correlator.fail(worker, status::EINTR) {
                    woken.push(worker);
                }
            }
            let cancelled = core.dispatch.cancel_pending(client);
            (woken, cancelled)
        };

        for worker in &woken {
            log::warn!("Dispatcher: interrupted worker {} serving {}", worker, client);
            self.shared.signal(*worker);
        }
        for job in &cancelled {
            log::warn!("Dispatcher: cancelled queued call {} of {}", job.request().code, client);
            self.shared.answer(job.request(), status::EINTR);
        }
        woken.len() + cancelled.len()
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    pub fn stats(&self) -> PoolStats {
        let core = self.shared.lock();
        let dispatch = &core.dispatch;
        let idle = dispatch.available();
        PoolStats {
            pool_size: dispatch.pool_size(),
            idle,
            busy: dispatch.pool_size() - idle,
            pending: dispatch.pending(),
            control_backlog: dispatch.control_backlog(),
            deadlock_busy: dispatch.is_busy(dispatch.deadlock_worker()),
        }
    }

    /// Number of idle pool workers.
    pub fn available(&self) -> usize {
        self.shared.lock().dispatch.available()
    }

    /// Endpoint `worker` is waiting on, if it is in a remote call.
    pub fn awaiting(&self, worker: WorkerId) -> Option<Endpoint> {
        self.shared.lock().correlator.awaiting(worker)
    }

    pub fn control_worker(&self) -> WorkerId {
        self.shared.lock().dispatch.control_worker()
    }

    pub fn deadlock_worker(&self) -> WorkerId {
        self.shared.lock().dispatch.deadlock_worker()
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    /// Refuse new work, let workers finish what is running and queued, and
    /// join every worker thread.
    pub fn shutdown(&self) -> Result<(), VfsdError> {
        log::info!("Dispatcher: shutting down");
        let handles = self.stop_workers();

        let mut result = Ok(());
        for handle in handles {
            let name = handle.thread().name().unwrap_or("vfs-worker").to_string();
            if handle.join().is_err() {
                log::error!("Dispatcher: worker thread {} panicked", name);
                result = Err(VfsdError::WorkerPanicked(name));
            }
        }
        result
    }

    fn stop_workers(&self) -> Vec<JoinHandle<()>> {
        self.shared.lock().shutting_down = true;
        for index in 0..self.shared.worker_count() {
            self.shared.signal(WorkerId(index));
        }
        std::mem::take(&mut *self.threads_mut())
    }
}
