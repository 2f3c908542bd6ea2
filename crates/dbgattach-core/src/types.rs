use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CoreError;

// ─── Provenance ───────────────────────────────────────────────────

/// Which discovery strategy produced a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    /// Direct process-table scan.
    Scanner,
    /// Targeted socket-owner probe of a hinted port.
    Probe,
}

impl Provenance {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scanner => "scanner",
            Self::Probe => "probe",
        }
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Candidate ────────────────────────────────────────────────────

/// A process/port pair believed to be attachable.
///
/// Built fresh every discovery cycle and never mutated; only `port` carries
/// identity across cycles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateProcess {
    pub pid: String,
    pub port: String,
    pub owner: String,
    pub is_current_user: bool,
    pub provenance: Provenance,
    /// Raw command string, display only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_hint: Option<String>,
}

// ─── Attach state ─────────────────────────────────────────────────

/// Per-port attach progress tracked by the auto-attach engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachState {
    #[default]
    Unseen,
    Connecting,
    Attached,
}

impl AttachState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unseen => "unseen",
            Self::Connecting => "connecting",
            Self::Attached => "attached",
        }
    }
}

impl fmt::Display for AttachState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Lock handle ──────────────────────────────────────────────────

/// Exclusive claim on a port for the duration of one attach attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortLockHandle {
    pub port: String,
    /// Identity of the acquiring instance (`<pid>-<nonce>`).
    pub owner_token: String,
    pub acquired_at: DateTime<Utc>,
}

// ─── Platform ─────────────────────────────────────────────────────

/// Host operating-system family; selects listing commands and parsers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Posix,
    Windows,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(windows) {
            Self::Windows
        } else {
            Self::Posix
        }
    }

    /// Username comparison: case-sensitive on POSIX, case-insensitive on Windows.
    pub fn users_match(self, a: &str, b: &str) -> bool {
        match self {
            Self::Posix => a == b,
            Self::Windows => a.eq_ignore_ascii_case(b),
        }
    }
}

/// Validate a TCP port string, returning its numeric value.
pub fn parse_port(s: &str) -> Result<u16, CoreError> {
    match s.trim().parse::<u16>() {
        Ok(0) | Err(_) => Err(CoreError::InvalidPort(s.to_string())),
        Ok(n) => Ok(n),
    }
}
