//! Zero OS VFS Daemon - Concurrency Runtime
//!
//! The VFS daemon services file-system calls from many clients at once over
//! an IPC layer whose only primitive is an asynchronous, single-reply
//! message. This crate gives every call the illusion of a dedicated blocking
//! thread:
//!
//! - **Workers**: a fixed pool of OS threads, plus a control worker and a
//!   deadlock resolver, each parked on a private event
//! - **Dispatcher**: assigns requests to idle workers or queues them per client
//! - **Three-level locks**: Read / ReadSerialized / Write with upgrade and
//!   downgrade, guarding shared mount and vnode state
//! - **Correlator**: turns a send plus a later reply into a blocking call,
//!   including callbacks from the server being called
//! - **Nested calls**: saves the outer call while a callback is serviced
//!
//! The bookkeeping itself (lock queues, worker slots, pending jobs) lives in
//! `zos-vfsd-core` as pure state machines; this crate adds threads, blocking
//! and message routing around them.
//!
//! # Architecture
//!
//! ```text
//!   Transport::receive ──► Vfsd::handle_message
//!                              │
//!        ┌─────────────────────┼───────────────────────┐
//!        │ reply               │ request               │ ENDPOINT_DOWN
//!        ▼                     ▼                       ▼
//!   Correlator ──signal──► Worker N ◄──signal── stop_by_endpoint
//!                              │
//!                              ├─► DispatchTable handler
//!                              ├─► Tll::lock / upgrade / downgrade
//!                              └─► send_and_wait ──► Transport::send
//! ```
//!
//! # Module Organization
//!
//! - `server` - `Vfsd`: startup, message routing, stop/interrupt, shutdown
//! - `worker` - Worker threads and the per-call execution path
//! - `tll` - Blocking three-level lock and its guard
//! - `correlator` - Outstanding remote calls and reply matching
//! - `nested` - Saved call contexts for callbacks
//! - `context` / `job` / `table` - Call state, deferred work, handlers
//! - `event` - Binary semaphore each worker sleeps on
//! - `transport` - The IPC seam
//! - `testing` - In-memory loopback transport
//! - `config` / `error` - Configuration and error types

#[macro_use]
mod macros;

pub mod config;
pub mod context;
pub mod correlator;
pub mod error;
pub mod event;
pub mod job;
pub mod nested;
pub mod server;
pub mod table;
pub mod testing;
pub mod tll;
pub mod transport;
pub mod worker;

mod shared;
mod sync;

#[cfg(any(test, feature = "loom"))]
mod loom_tests;

pub use config::VfsdConfig;
pub use context::{CallContext, Credentials};
pub use error::{CallError, ConfigError, TransportError, VfsdError};
pub use event::Event;
pub use job::Job;
pub use server::{PoolStats, Vfsd};
pub use table::{CallHandler, DispatchTable};
pub use tll::{Tll, TllGuard};
pub use transport::Transport;
pub use worker::Worker;

pub use zos_vfsd_core::{LockLevel, WorkerId, WorkerRole};
pub use zos_vfsd_ipc::{call, endpoint, status, CorrelationTag, Endpoint, Message};
