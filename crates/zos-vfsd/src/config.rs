//! Daemon configuration
//!
//! Every field has a default, so an empty JSON object is a valid config.

use serde::{Deserialize, Serialize};
use zos_vfsd_ipc::{endpoint, Endpoint};

use crate::error::ConfigError;

/// Default number of pool workers.
pub const DEFAULT_WORKERS: usize = 9;

/// Default number of retries after an `ERESTART` reply.
pub const DEFAULT_RESTART_RETRIES: u32 = 3;

/// Default nested-call depth.
pub const DEFAULT_MAX_NESTING: usize = 1;

/// Worker ids are carried in 16-bit correlation tags; two ids are reserved.
pub const MAX_WORKERS: usize = u16::MAX as usize - 2;

/// VFS daemon configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VfsdConfig {
    /// Pool size, not counting the control worker and deadlock resolver
    pub workers: usize,
    /// How many times a request answered `ERESTART` is re-sent
    pub restart_retries: u32,
    /// Maximum depth of nested callbacks per worker
    pub max_nesting: usize,
    /// Worker thread stack size in bytes (platform default if unset)
    pub worker_stack_size: Option<usize>,
    /// This daemon's own endpoint
    pub self_endpoint: Endpoint,
    /// Control-plane endpoint whose requests go to the control worker
    pub control_endpoint: Endpoint,
    /// Endpoint that publishes `ENDPOINT_DOWN` notifications
    pub liveness_endpoint: Endpoint,
}

impl Default for VfsdConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            restart_retries: DEFAULT_RESTART_RETRIES,
            max_nesting: DEFAULT_MAX_NESTING,
            worker_stack_size: None,
            self_endpoint: endpoint::VFS,
            control_endpoint: endpoint::PM,
            liveness_endpoint: endpoint::DS,
        }
    }
}

impl VfsdConfig {
    /// Parse and validate a JSON config.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Config with `workers` pool workers and defaults elsewhere.
    pub fn with_workers(workers: usize) -> Self {
        Self {
            workers,
            ..Self::default()
        }
    }

    /// Check the values are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::NoWorkers);
        }
        if self.workers > MAX_WORKERS {
            return Err(ConfigError::TooManyWorkers {
                workers: self.workers,
                max: MAX_WORKERS,
            });
        }
        if self.max_nesting == 0 {
            return Err(ConfigError::NoNesting);
        }
        if self.control_endpoint == self.self_endpoint
            || self.liveness_endpoint == self.self_endpoint
        {
            return Err(ConfigError::SelfEndpoint(self.self_endpoint));
        }
        Ok(())
    }
}
