//! Deferred work.
//!
//! A job is created for every request handed to the dispatcher. It runs on
//! whichever worker picks it up, either immediately or after waiting in its
//! client's pending queue.

use std::fmt;

use zos_vfsd_ipc::{Endpoint, Message};

use crate::context::CallContext;
use crate::worker::Worker;

type Entry = Box<dyn FnOnce(&mut Worker) + Send>;

/// A unit of work awaiting a worker.
pub struct Job {
    pub(crate) client: Endpoint,
    pub(crate) context: CallContext,
    entry: Entry,
}

impl Job {
    /// Job that services `request` through the dispatch table and replies.
    pub fn new(request: Message) -> Self {
        Self::with_entry(request, Worker::do_work)
    }

    /// Job that runs `entry` with the request installed as the current call.
    pub fn with_entry<F>(request: Message, entry: F) -> Self
    where
        F: FnOnce(&mut Worker) + Send + 'static,
    {
        Self {
            client: request.source,
            context: CallContext::new(request),
            entry: Box::new(entry),
        }
    }

    /// Client the job belongs to.
    pub fn client(&self) -> Endpoint {
        self.client
    }

    pub fn request(&self) -> &Message {
        &self.context.request
    }

    pub(crate) fn into_parts(self) -> (CallContext, Entry) {
        (self.context, self.entry)
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("client", &self.client)
            .field("call_nr", &self.context.call_nr)
            .finish_non_exhaustive()
    }
}
