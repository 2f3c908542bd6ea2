//! dbgattach-core: shared types for debug-agent discovery and auto-attach.
//! Pure data and decision helpers; every IO boundary lives in the sibling crates.

pub mod error;
pub mod request;
pub mod types;

pub use error::{AttachError, CoreError};
pub use request::{AttachRequest, ConnectTarget, DEFAULT_HOST, DebugProfile};
pub use types::{AttachState, CandidateProcess, Platform, PortLockHandle, Provenance, parse_port};
