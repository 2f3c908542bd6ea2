//! DiscoveryCoordinator: scan and probe concurrently, merge, filter.

use std::collections::HashSet;
use std::future::Future;

use dbgattach_core::{CandidateProcess, DebugProfile};

use crate::executor::CommandRunner;
use crate::hints::HintSource;
use crate::probe::PortProbe;
use crate::scanner::ProcessScanner;

/// Result of one discovery cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiscoveryCycle {
    pub candidates: Vec<CandidateProcess>,
    /// Preferred attach profile from the launch hints, if any.
    pub preferred_profile: Option<DebugProfile>,
}

/// One discovery cycle. Implemented by [`DiscoveryCoordinator`]; faked in tests.
pub trait Discover: Send + Sync {
    fn discover(&self) -> impl Future<Output = DiscoveryCycle> + Send;
}

impl<T: Discover> Discover for &T {
    fn discover(&self) -> impl Future<Output = DiscoveryCycle> + Send {
        (**self).discover()
    }
}

impl<T: Discover> Discover for std::sync::Arc<T> {
    fn discover(&self) -> impl Future<Output = DiscoveryCycle> + Send {
        (**self).discover()
    }
}

pub struct DiscoveryCoordinator<R: CommandRunner> {
    runner: R,
    scanner: ProcessScanner,
    probe: PortProbe,
    hints: HintSource,
    only_current_user: bool,
}

impl<R: CommandRunner> DiscoveryCoordinator<R> {
    pub fn new(runner: R, scanner: ProcessScanner, probe: PortProbe) -> Self {
        Self {
            runner,
            scanner,
            probe,
            hints: HintSource::none(),
            only_current_user: false,
        }
    }

    #[must_use]
    pub fn with_hints(mut self, hints: HintSource) -> Self {
        self.hints = hints;
        self
    }

    /// Hide other users' processes from every cycle.
    #[must_use]
    pub fn with_only_current_user(mut self, only: bool) -> Self {
        self.only_current_user = only;
        self
    }
}

impl<R: CommandRunner> Discover for DiscoveryCoordinator<R> {
    async fn discover(&self) -> DiscoveryCycle {
        let hints = self.hints.load().await;
        // Scan and probe are independent; neither may hold up the other.
        let (scanned, probed) = tokio::join!(
            self.scanner.scan(&self.runner),
            self.probe.probe(&self.runner, &hints.ports),
        );
        let merged = merge_candidates(scanned, probed);
        let candidates = visible(merged, self.only_current_user);
        tracing::debug!(count = candidates.len(), "discovery cycle complete");
        DiscoveryCycle {
            candidates,
            preferred_profile: hints.preferred_profile,
        }
    }
}

/// Merge both strategies: at most one entry per port, scanner entries first
/// and winning every collision.
pub fn merge_candidates(
    scanned: Vec<CandidateProcess>,
    probed: Vec<CandidateProcess>,
) -> Vec<CandidateProcess> {
    let mut seen = HashSet::new();
    scanned
        .into_iter()
        .chain(probed)
        .filter(|c| seen.insert(c.port.clone()))
        .collect()
}

/// Visibility predicate: optionally keep only the invoking user's processes.
pub fn visible(candidates: Vec<CandidateProcess>, only_current_user: bool) -> Vec<CandidateProcess> {
    if !only_current_user {
        return candidates;
    }
    candidates.into_iter().filter(|c| c.is_current_user).collect()
}
