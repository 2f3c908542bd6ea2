//! Error types shared across the workspace.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("invalid port {0:?}: expected a number in 1..=65535")]
    InvalidPort(String),
}

/// Why an attach attempt did not produce a debug session.
///
/// Automatic attach failures are logged with [`AttachError::failure_class`]
/// and retried on a later tick; manual attach failures are shown to the user.
#[derive(Debug, Error)]
pub enum AttachError {
    #[error("connection refused by {host}:{port}")]
    ConnectionRefused { host: String, port: String },

    #[error("timed out after {timeout:?} connecting to {host}:{port}")]
    Timeout {
        host: String,
        port: String,
        timeout: Duration,
    },

    #[error("debug launch rejected: {0}")]
    Rejected(String),

    #[error("port {0} is locked by another attach attempt")]
    Locked(String),

    #[error("no debug process is listening on port {0}")]
    NotFound(String),

    #[error("attach io error: {0}")]
    Io(#[from] std::io::Error),
}

impl AttachError {
    /// Stable label used as the `failure_class` log field.
    pub fn failure_class(&self) -> &'static str {
        match self {
            Self::ConnectionRefused { .. } => "connection_refused",
            Self::Timeout { .. } => "timeout",
            Self::Rejected(_) => "rejected",
            Self::Locked(_) | Self::NotFound(_) | Self::Io(_) => "other",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_classes() {
        let refused = AttachError::ConnectionRefused {
            host: "localhost".into(),
            port: "5678".into(),
        };
        assert_eq!(refused.failure_class(), "connection_refused");

        let timeout = AttachError::Timeout {
            host: "localhost".into(),
            port: "5678".into(),
            timeout: Duration::from_secs(2),
        };
        assert_eq!(timeout.failure_class(), "timeout");
        assert_eq!(AttachError::Rejected("exit 1".into()).failure_class(), "rejected");

        let io = AttachError::from(std::io::Error::other("boom"));
        assert_eq!(io.failure_class(), "other");
    }

    #[test]
    fn messages_name_the_target() {
        let err = AttachError::ConnectionRefused {
            host: "localhost".into(),
            port: "5678".into(),
        };
        assert_eq!(err.to_string(), "connection refused by localhost:5678");
    }
}
