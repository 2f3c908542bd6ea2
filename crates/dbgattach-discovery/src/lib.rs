//! dbgattach-discovery: debug-agent process discovery IO boundary.
//! Runs the platform listing and socket-inspection commands, parses their
//! output, and merges both strategies into one candidate list per cycle.

pub mod coordinator;
pub mod error;
pub mod executor;
pub mod extract;
pub mod hints;
pub mod probe;
pub mod scanner;
pub mod user;

pub use coordinator::{Discover, DiscoveryCoordinator, DiscoveryCycle, merge_candidates, visible};
pub use error::DiscoveryError;
pub use executor::{CommandRunner, ProcessExecutor};
pub use hints::{HintSource, LaunchHints, parse_launch_config};
pub use probe::{PortProbe, parse_lsof_output};
pub use scanner::{ProcessScanner, parse_posix_output, parse_windows_output};
pub use user::{current_uid, current_username};
