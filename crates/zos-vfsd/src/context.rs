//! Per-call state carried by a worker.

use zos_vfsd_ipc::{status, Endpoint, Message};

/// Identity the current call runs with.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Credentials {
    pub uid: u32,
    pub gid: u32,
}

/// Everything a handler needs about the call it is servicing.
///
/// A worker owns one current context; the nested-call stack saves and
/// restores whole contexts around callbacks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallContext {
    /// Endpoint the reply goes to
    pub caller: Endpoint,
    /// The request being serviced
    pub request: Message,
    /// Reply payload built up by the handler
    pub reply: Vec<u8>,
    pub credentials: Credentials,
    pub call_nr: i32,
    /// Path scratch buffer for handlers that resolve names
    pub path: String,
    /// Status to answer with instead of running the handler
    pub err_code: i32,
}

impl CallContext {
    /// Context for servicing `request`.
    pub fn new(request: Message) -> Self {
        Self {
            caller: request.source,
            call_nr: request.code,
            request,
            reply: Vec::new(),
            credentials: Credentials::default(),
            path: String::new(),
            err_code: status::OK,
        }
    }

    /// Context of a worker with nothing to do.
    pub fn idle() -> Self {
        Self::new(Message::request(zos_vfsd_ipc::endpoint::NONE, 0, Vec::new()))
    }
}
