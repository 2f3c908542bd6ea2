//! Error types for the lock backend.
//!
//! Never surfaced to callers of `try_acquire`: every variant collapses to
//! "acquisition failed".

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    InvalidPort(#[from] dbgattach_core::CoreError),

    #[error("lock directory {path} is owned by uid {owner}, not by the current user")]
    ForeignDirectory { path: PathBuf, owner: u32 },

    #[error("lock record encode error: {0}")]
    Encode(#[from] serde_json::Error),
}
