//! Workers
//!
//! A worker is an OS thread that services one request at a time. Between
//! jobs it sleeps on its event; while servicing a job it may suspend on the
//! same event inside a lock acquisition or a remote call. Whoever makes the
//! worker runnable again (the dispatcher, a lock holder releasing, the
//! correlator) records the hand-off first and signals second, so the woken
//! worker only has to look.
//!
//! A wake with nothing to do is therefore not an error; the contract checks
//! live at the end of each job instead, in `run_job`.

use std::mem;
use std::sync::Arc;

use zos_vfsd_core::{WorkerId, WorkerRole};
use zos_vfsd_ipc::{status, Message};

use crate::context::CallContext;
use crate::job::Job;
use crate::nested::CallStack;
use crate::shared::Shared;

/// Execution context handed to call handlers.
pub struct Worker {
    id: WorkerId,
    role: WorkerRole,
    shared: Arc<Shared>,
    call: CallContext,
    nested: CallStack,
}

impl Worker {
    pub(crate) fn new(id: WorkerId, role: WorkerRole, shared: Arc<Shared>) -> Self {
        let nested = CallStack::new(shared.config.max_nesting);
        Self {
            id,
            role,
            shared,
            call: CallContext::idle(),
            nested,
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn role(&self) -> WorkerRole {
        self.role
    }

    /// The call being serviced.
    pub fn call(&self) -> &CallContext {
        &self.call
    }

    pub fn call_mut(&mut self) -> &mut CallContext {
        &mut self.call
    }

    /// Number of outer calls saved while servicing callbacks.
    pub fn nesting_depth(&self) -> usize {
        self.nested.depth()
    }

    pub(crate) fn shared(&self) -> &Shared {
        &self.shared
    }

    pub(crate) fn shared_handle(&self) -> Arc<Shared> {
        self.shared.clone()
    }

    /// Sleep until signalled.
    pub(crate) fn suspend(&self) {
        self.shared.event(self.id).wait();
    }

    // ========================================================================
    // Thread body
    // ========================================================================

    /// Take jobs until the daemon shuts down and no work is left.
    pub(crate) fn run(mut self) {
        log::debug!("Worker {}: started as {:?}", self.id, self.role);
        loop {
            let job = {
                let mut core = self.shared.lock();
                let job = core.dispatch.get_work(self.id);
                #[cfg(debug_assertions)]
                zos_vfsd_core::assert_dispatch_invariants(&core.dispatch);
                if job.is_none() && core.shutting_down {
                    break;
                }
                job
            };

            match job {
                Some(job) => self.run_job(job),
                None => self.suspend(),
            }
        }
        log::debug!("Worker {}: exiting", self.id);
    }

    fn run_job(&mut self, job: Job) {
        let (context, entry) = job.into_parts();
        self.call = context;
        log::debug!(
            "Worker {}: servicing call {} from {}",
            self.id,
            self.call.call_nr,
            self.call.caller
        );

        entry(self);

        if !self.nested.is_empty() {
            fatal!(
                "Worker {}: job finished with {} nested calls still saved",
                self.id,
                self.nested.depth()
            );
        }
        if self.shared.lock().correlator.depth(self.id) != 0 {
            fatal!("Worker {}: job finished with a remote call outstanding", self.id);
        }
        self.call = CallContext::idle();
    }

    // ========================================================================
    // Call execution
    // ========================================================================

    /// Run the handler registered for the current call and reply with its
    /// status. This is the entry point of every ordinary job.
    pub fn do_work(&mut self) {
        let call_nr = self.call.call_nr;
        let code = if self.call.err_code != status::OK {
            self.call.err_code
        } else {
            match self.shared.table.get(call_nr) {
                Some(handler) => handler.handle(self),
                None => {
                    log::warn!(
                        "Worker {}: no handler for call {} from {}",
                        self.id,
                        call_nr,
                        self.call.caller
                    );
                    status::ENOSYS
                }
            }
        };

        if code != status::SUSPEND {
            self.reply(code);
        }
    }

    /// Answer the current call with `code` and the accumulated reply payload.
    pub fn reply(&mut self, code: i32) {
        let payload = mem::take(&mut self.call.reply);
        let msg = self.call.request.reply(code, payload);
        let to = self.call.caller;

        log::debug!("Worker {}: reply {} to {}", self.id, status::name(code), to);
        if let Err(e) = self.shared.transport.send(to, msg) {
            log::warn!("Worker {}: reply to {} failed: {}", self.id, to, e);
        }
    }

    /// Service a callback from the server this worker is waiting on.
    pub(crate) fn service_callback(&mut self, callback: Message) {
        let incoming = CallContext::new(callback.clone());
        if let Err(e) = self.nested.push(&mut self.call, incoming) {
            log::warn!(
                "Worker {}: rejecting callback {} from {}: {}",
                self.id,
                callback.code,
                callback.source,
                e
            );
            self.shared.answer(&callback, status::EIO);
            return;
        }

        log::debug!(
            "Worker {}: nested call {} from {}",
            self.id,
            callback.code,
            callback.source
        );
        self.do_work();
        self.nested.pop(&mut self.call);
    }
}
