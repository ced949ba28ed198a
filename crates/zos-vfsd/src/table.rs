//! Call handlers, keyed by call number.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::worker::Worker;

/// Services one call number.
///
/// The handler runs on a worker with the request installed as
/// `worker.call()`. It writes any reply payload into `worker.call_mut().reply`
/// and returns the reply status; returning `status::SUSPEND` means the
/// handler has arranged for the reply itself.
pub trait CallHandler: Send + Sync {
    fn handle(&self, worker: &mut Worker) -> i32;
}

impl<F> CallHandler for F
where
    F: Fn(&mut Worker) -> i32 + Send + Sync,
{
    fn handle(&self, worker: &mut Worker) -> i32 {
        self(worker)
    }
}

/// Map from call number to handler.
#[derive(Clone, Default)]
pub struct DispatchTable {
    handlers: BTreeMap<i32, Arc<dyn CallHandler>>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `call_nr`, replacing any previous one.
    pub fn register<H>(mut self, call_nr: i32, handler: H) -> Self
    where
        H: CallHandler + 'static,
    {
        self.handlers.insert(call_nr, Arc::new(handler));
        self
    }

    /// Handler for `call_nr`, if any.
    pub fn get(&self, call_nr: i32) -> Option<Arc<dyn CallHandler>> {
        self.handlers.get(&call_nr).cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zos_vfsd_ipc::{call, status};

    #[test]
    fn test_register_and_lookup() {
        let table = DispatchTable::new()
            .register(call::VFS_READ, |_: &mut Worker| status::OK)
            .register(call::VFS_WRITE, |_: &mut Worker| status::EIO);
        assert_eq!(table.len(), 2);
        assert!(table.get(call::VFS_READ).is_some());
        assert!(table.get(call::VFS_OPEN).is_none());
    }

    #[test]
    fn test_register_replaces() {
        let table = DispatchTable::new()
            .register(call::VFS_READ, |_: &mut Worker| status::OK)
            .register(call::VFS_READ, |_: &mut Worker| status::EIO);
        assert_eq!(table.len(), 1);
    }
}
