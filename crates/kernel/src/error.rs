//! Error type shared by every setup path of the engine.
//!
//! Only configuration and resource setup can fail. A simulation step never
//! returns an error: numerical trouble shows up as reduced accuracy instead.

use std::collections::TryReserveError;

use thiserror::Error;

/// Errors raised while building kernels, allocating buffers or loading
/// configuration.
#[derive(Debug, Error)]
pub enum SimError {
    /// A compute kernel rejected its parameter block.
    #[error("failed to build kernel `{kernel}`:\n{log}")]
    Build {
        /// Name of the kernel that failed to build.
        kernel: &'static str,
        /// Full build log.
        log: String,
    },
    /// A device buffer could not be allocated.
    #[error("failed to allocate {len} elements for buffer `{label}`")]
    Allocation {
        /// Buffer label.
        label: &'static str,
        /// Requested element count.
        len: usize,
        /// Underlying allocator error.
        #[source]
        source: TryReserveError,
    },
    /// Settings failed validation.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// A configuration or profile file could not be read or written.
    #[error("configuration file error: {0}")]
    Io(#[from] std::io::Error),
    /// A configuration or profile file is not valid JSON for its schema.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Result alias used across the crate.
pub type Result<T, E = SimError> = std::result::Result<T, E>;
