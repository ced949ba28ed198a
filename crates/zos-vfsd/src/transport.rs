//! The IPC seam.
//!
//! The daemon never talks to the kernel directly. Everything it sends or
//! receives goes through a [`Transport`], so the same runtime runs on the
//! real IPC layer and on [`crate::testing::LoopbackTransport`] in tests.

use zos_vfsd_ipc::{Endpoint, Message};

use crate::error::TransportError;

/// Asynchronous, single-reply message passing.
pub trait Transport: Send + Sync {
    /// Queue `msg` for `to`. Never waits for a reply.
    fn send(&self, to: Endpoint, msg: Message) -> Result<(), TransportError>;

    /// Block for the next incoming message; `None` once the transport is
    /// closed. The returned message's `source` is the sender.
    fn receive(&self) -> Option<Message>;
}
