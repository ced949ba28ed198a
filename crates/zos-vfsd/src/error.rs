//! Error types for the VFS daemon runtime.
//!
//! Only recoverable failures are represented here. Contract violations
//! (re-locking a held lock, popping an empty nested-call stack) never become
//! values: they abort through `fatal!`.

use thiserror::Error;
use zos_vfsd_ipc::{status, Endpoint};

/// Why a blocking remote call did not produce a reply.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum CallError {
    /// The send failed or the remote endpoint died while the call was pending
    #[error("remote call failed with an I/O error")]
    Io,
    /// The client was interrupted while the call was pending
    #[error("remote call interrupted")]
    Interrupted,
    /// The call targeted the endpoint this worker is serving
    #[error("remote call to the caller would deadlock")]
    Deadlock,
    /// Every attempt was answered with `ERESTART`
    #[error("remote call still restarting after {attempts} attempts")]
    Restarted { attempts: u32 },
}

impl CallError {
    /// Status code reported to the client for this failure.
    pub fn status(&self) -> i32 {
        match self {
            CallError::Io | CallError::Restarted { .. } => status::EIO,
            CallError::Interrupted => status::EINTR,
            CallError::Deadlock => status::EDEADLK,
        }
    }

    /// Map a failure status delivered to a pending call.
    pub(crate) fn from_status(code: i32) -> Self {
        match code {
            status::EINTR => CallError::Interrupted,
            _ => CallError::Io,
        }
    }
}

/// A failure of the underlying IPC transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The destination no longer exists
    #[error("endpoint {0} is dead")]
    DeadEndpoint(Endpoint),
    /// The transport has been shut down
    #[error("transport closed")]
    Closed,
}

/// An unusable configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("pool must have at least one worker")]
    NoWorkers,
    #[error("{workers} workers requested, at most {max} supported")]
    TooManyWorkers { workers: usize, max: usize },
    #[error("nesting depth must be at least one")]
    NoNesting,
    #[error("control or liveness endpoint equals the daemon's own endpoint {0}")]
    SelfEndpoint(Endpoint),
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Errors from starting or stopping the daemon.
#[derive(Debug, Error)]
pub enum VfsdError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to spawn worker thread {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("worker thread {0} panicked")]
    WorkerPanicked(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_error_status() {
        assert_eq!(CallError::Io.status(), status::EIO);
        assert_eq!(CallError::Restarted { attempts: 4 }.status(), status::EIO);
        assert_eq!(CallError::Interrupted.status(), status::EINTR);
        assert_eq!(CallError::Deadlock.status(), status::EDEADLK);
    }

    #[test]
    fn test_from_status() {
        assert_eq!(CallError::from_status(status::EINTR), CallError::Interrupted);
        assert_eq!(CallError::from_status(status::EIO), CallError::Io);
    }
}
