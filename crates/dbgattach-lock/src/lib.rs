//! dbgattach-lock: filesystem-backed, per-user port locks.
//!
//! One lock entry per port inside a directory owned by the invoking user.
//! Acquisition is atomic create-if-absent; a lock whose record is old and whose
//! holder shows no recent user activity is reclaimed by the next acquirer.

pub mod error;
pub mod port_lock;
pub mod staleness;

pub use error::LockError;
pub use port_lock::{PortLock, default_lock_dir};
pub use staleness::{ACTIVITY_WINDOW, STALE_AFTER, StalenessPolicy};
