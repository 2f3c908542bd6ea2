//! Error types for the discovery backend.
//!
//! Discovery never propagates these to its callers; a failed command is
//! logged at debug level and yields no candidates.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("command failed: {0}")]
    CommandFailed(String),

    #[error("command timed out after {0:?}")]
    Timeout(Duration),

    #[error("command output exceeded {0} bytes")]
    OutputTooLarge(usize),

    #[error("invalid launch configuration: {0}")]
    InvalidConfig(#[from] serde_json::Error),

    #[error("discovery io error: {0}")]
    Io(#[from] std::io::Error),
}
