//! IPC Envelope & Protocol Constants for the Zero OS VFS daemon
//!
//! This crate defines:
//! - **Endpoints** (who sends and receives)
//! - **The message envelope** (source, code, correlation tag, payload)
//! - **Status codes** carried in replies
//! - **Call numbers** carried in requests
//!
//! It is the **single source of truth** for protocol constants shared by the
//! pure core and the runtime.
//!
//! # Code Convention
//!
//! A message's `code` is a call number when positive and a reply status when
//! zero or negative. This is how the dispatch loop tells a reply from a
//! callback arriving from the same file-system server.
//!
//! # Call Number Ranges
//!
//! | Range         | Category                                  |
//! |---------------|-------------------------------------------|
//! | 0x0001-0x00FF | Client VFS calls                          |
//! | 0x0100-0x01FF | VFS → file-system server requests         |
//! | 0x0200-0x02FF | VFS → device driver requests              |
//! | 0x0300-0x030F | Control plane (PM → VFS)                  |
//! | 0x0400-0x040F | Notifications (DS → VFS)                  |
//!
//! # Usage
//!
//! ```rust
//! use zos_vfsd_ipc::{call, status, Endpoint, Message};
//!
//! let request = Message::request(Endpoint(42), call::VFS_READ, Vec::new());
//! let reply = request.reply(status::OK, Vec::new());
//! assert!(reply.is_reply());
//! assert_eq!(reply.tag, request.tag);
//! ```

#![no_std]
extern crate alloc;

use alloc::vec::Vec;
use core::fmt;
use serde::{Deserialize, Serialize};

// =============================================================================
// Endpoints
// =============================================================================

/// IPC endpoint identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Endpoint(pub i32);

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Well-known system endpoints.
pub mod endpoint {
    use super::Endpoint;

    /// Process manager (control plane: fork, exit, setuid notifications)
    pub const PM: Endpoint = Endpoint(0);
    /// The VFS daemon itself
    pub const VFS: Endpoint = Endpoint(1);
    /// Reincarnation server
    pub const RS: Endpoint = Endpoint(2);
    /// Data store (publishes endpoint liveness)
    pub const DS: Endpoint = Endpoint(6);
    /// Root file-system server
    pub const ROOT_FS: Endpoint = Endpoint(7);
    /// Sentinel for "no endpoint"
    pub const NONE: Endpoint = Endpoint(-1);
}

// =============================================================================
// Correlation Tags
// =============================================================================

/// Identifies the outstanding request a reply answers.
///
/// The tag names the worker that sent the request and a per-worker sequence
/// number, so a late reply to an abandoned request cannot be mistaken for the
/// reply to a newer one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CorrelationTag {
    /// Index of the waiting worker
    pub worker: u16,
    /// Per-worker request sequence number
    pub seq: u16,
}

impl CorrelationTag {
    /// Create a tag.
    pub const fn new(worker: u16, seq: u16) -> Self {
        Self { worker, seq }
    }

    /// Pack into the 32-bit form carried on the wire.
    pub const fn to_u32(self) -> u32 {
        ((self.worker as u32) << 16) | self.seq as u32
    }

    /// Unpack from the 32-bit wire form.
    pub const fn from_u32(raw: u32) -> Self {
        Self {
            worker: (raw >> 16) as u16,
            seq: raw as u16,
        }
    }
}

impl fmt::Display for CorrelationTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.worker, self.seq)
    }
}

// =============================================================================
// Message Envelope
// =============================================================================

/// An IPC message.
///
/// Only `source` and `tag` are interpreted by the daemon's concurrency core;
/// the payload is opaque and belongs to the call handlers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Sending endpoint (filled in by the transport on receipt)
    pub source: Endpoint,
    /// Call number (> 0) or reply status (<= 0)
    pub code: i32,
    /// Correlation tag, present on requests that expect a reply and on those replies
    pub tag: Option<CorrelationTag>,
    /// Opaque call arguments or results
    pub payload: Vec<u8>,
}

impl Message {
    /// Create an untagged request.
    pub fn request(source: Endpoint, call_nr: i32, payload: Vec<u8>) -> Self {
        Self {
            source,
            code: call_nr,
            tag: None,
            payload,
        }
    }

    /// Create a reply to this message, echoing its tag.
    pub fn reply(&self, status: i32, payload: Vec<u8>) -> Self {
        Self {
            source: endpoint::NONE,
            code: status,
            tag: self.tag,
            payload,
        }
    }

    /// Attach a correlation tag.
    pub fn with_tag(mut self, tag: CorrelationTag) -> Self {
        self.tag = Some(tag);
        self
    }

    /// Whether this message is a reply (status code) rather than a request.
    #[inline]
    pub fn is_reply(&self) -> bool {
        self.code <= 0
    }

    /// Whether this message is a request (call number).
    #[inline]
    pub fn is_request(&self) -> bool {
        self.code > 0
    }
}

// =============================================================================
// Status Codes (reply `code` values)
// =============================================================================

/// Reply status codes.
///
/// Errors are negative errno values; `OK` is zero. `SUSPEND` is never sent:
/// a handler returns it to say it will answer the client later itself.
pub mod status {
    /// Success
    pub const OK: i32 = 0;
    /// Interrupted call
    pub const EINTR: i32 = -4;
    /// I/O error (dead or failing remote endpoint)
    pub const EIO: i32 = -5;
    /// Try again (no worker available to resolve a deadlock)
    pub const EAGAIN: i32 = -11;
    /// Resource busy
    pub const EBUSY: i32 = -16;
    /// Invalid argument
    pub const EINVAL: i32 = -22;
    /// Resource deadlock would occur
    pub const EDEADLK: i32 = -35;
    /// Function not implemented
    pub const ENOSYS: i32 = -38;
    /// Remote service was restarted mid-request; the request may be retried
    pub const ERESTART: i32 = -85;
    /// Handler will reply later; no reply is sent now
    pub const SUSPEND: i32 = -998;

    /// Get a human-readable name for a status code.
    pub fn name(code: i32) -> &'static str {
        match code {
            OK => "OK",
            EINTR => "EINTR",
            EIO => "EIO",
            EAGAIN => "EAGAIN",
            EBUSY => "EBUSY",
            EINVAL => "EINVAL",
            EDEADLK => "EDEADLK",
            ENOSYS => "ENOSYS",
            ERESTART => "ERESTART",
            SUSPEND => "SUSPEND",
            _ => "UNKNOWN",
        }
    }
}

// =============================================================================
// Call Numbers (request `code` values)
// =============================================================================

/// Call numbers.
pub mod call {
    // === Client VFS calls (0x0001 - 0x00FF) ===
    /// read(2)
    pub const VFS_READ: i32 = 0x03;
    /// write(2)
    pub const VFS_WRITE: i32 = 0x04;
    /// open(2)
    pub const VFS_OPEN: i32 = 0x05;
    /// close(2)
    pub const VFS_CLOSE: i32 = 0x06;
    /// unlink(2)
    pub const VFS_UNLINK: i32 = 0x0A;
    /// stat(2)
    pub const VFS_STAT: i32 = 0x12;
    /// mount(2)
    pub const VFS_MOUNT: i32 = 0x15;
    /// umount(2)
    pub const VFS_UMOUNT: i32 = 0x16;
    /// rename(2)
    pub const VFS_RENAME: i32 = 0x26;
    /// getsysinfo: the only call a file-system server may nest into another call
    pub const VFS_GETSYSINFO: i32 = 0x4F;

    // === File-system server requests (0x0100 - 0x01FF) ===
    /// Look up a path component
    pub const REQ_LOOKUP: i32 = 0x101;
    /// Read from an inode
    pub const REQ_READ: i32 = 0x102;
    /// Write to an inode
    pub const REQ_WRITE: i32 = 0x103;
    /// Read the root inode at mount time
    pub const REQ_READSUPER: i32 = 0x104;
    /// Drop an inode reference
    pub const REQ_PUTNODE: i32 = 0x105;

    // === Device driver requests (0x0200 - 0x02FF) ===
    /// Open a device
    pub const DEV_OPEN: i32 = 0x201;
    /// Block or character device transfer
    pub const DEV_IO: i32 = 0x202;
    /// Close a device
    pub const DEV_CLOSE: i32 = 0x203;

    // === Control plane (0x0300 - 0x030F) ===
    /// PM: a process forked
    pub const PM_FORK: i32 = 0x301;
    /// PM: a process exited
    pub const PM_EXIT: i32 = 0x302;
    /// PM: a process changed credentials
    pub const PM_SETUID: i32 = 0x303;
    /// PM: a process is being interrupted by a signal
    pub const PM_UNPAUSE: i32 = 0x304;

    // === Notifications (0x0400 - 0x040F) ===
    /// DS: an endpoint died. Payload: [endpoint: i32 LE]
    pub const ENDPOINT_DOWN: i32 = 0x401;
}

// =============================================================================
// Payload Helpers
// =============================================================================

/// Encode the payload of an `ENDPOINT_DOWN` notification.
pub fn encode_endpoint(endpoint: Endpoint) -> Vec<u8> {
    endpoint.0.to_le_bytes().to_vec()
}

/// Decode the payload of an `ENDPOINT_DOWN` notification.
///
/// Returns `None` if the payload is too short.
pub fn decode_endpoint(payload: &[u8]) -> Option<Endpoint> {
    let bytes: [u8; 4] = payload.get(..4)?.try_into().ok()?;
    Some(Endpoint(i32::from_le_bytes(bytes)))
}
