//! PortProbe: confirm listeners on hinted ports the process scan cannot see
//! (containers, renamed agents).

use std::time::Duration;

use futures_util::future::join_all;

use dbgattach_core::{CandidateProcess, Platform, Provenance};

use crate::executor::CommandRunner;

/// Per-port socket inspection timeout.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone)]
pub struct PortProbe {
    platform: Platform,
    current_user: String,
    timeout: Duration,
}

impl PortProbe {
    pub fn new(current_user: impl Into<String>) -> Self {
        Self {
            platform: Platform::current(),
            current_user: current_user.into(),
            timeout: PROBE_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Whether the socket inspection command exists on this platform.
    pub fn supported(&self) -> bool {
        self.platform == Platform::Posix
    }

    /// `lsof` invocation scoped to a single TCP port.
    pub fn command(port: &str) -> (&'static str, Vec<String>) {
        ("lsof", vec!["-nP".into(), format!("-iTCP:{port}")])
    }

    /// Probe every hinted port concurrently; results keep the hint order.
    ///
    /// Any process listening on a hinted port is accepted, whatever its name.
    pub async fn probe<R: CommandRunner>(&self, runner: &R, ports: &[String]) -> Vec<CandidateProcess> {
        if !self.supported() || ports.is_empty() {
            return Vec::new();
        }
        let probes = ports.iter().map(|port| self.probe_one(runner, port));
        let found: Vec<CandidateProcess> = join_all(probes).await.into_iter().flatten().collect();
        tracing::debug!(hinted = ports.len(), found = found.len(), "port probe complete");
        found
    }

    async fn probe_one<R: CommandRunner>(&self, runner: &R, port: &str) -> Option<CandidateProcess> {
        if dbgattach_core::parse_port(port).is_err() {
            return None;
        }
        let (program, args) = Self::command(port);
        match runner.run(program, &args, self.timeout).await {
            Ok(output) => parse_lsof_output(&output, port, &self.current_user),
            Err(e) => {
                // lsof exits non-zero when nothing matches.
                tracing::debug!(port, error = %e, "port probe found nothing");
                None
            }
        }
    }
}

/// Take the first `LISTEN` row after the header: `COMMAND PID USER ...`.
pub fn parse_lsof_output(output: &str, port: &str, current_user: &str) -> Option<CandidateProcess> {
    output
        .lines()
        .skip(1)
        .filter(|line| is_listen_row(line))
        .find_map(|line| {
            let mut fields = line.split_whitespace();
            let command = fields.next()?;
            let pid = fields.next()?;
            let owner = fields.next()?;
            if !pid.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            Some(CandidateProcess {
                pid: pid.to_string(),
                port: port.to_string(),
                owner: owner.to_string(),
                is_current_user: Platform::Posix.users_match(owner, current_user),
                provenance: Provenance::Probe,
                command_hint: Some(command.to_string()),
            })
        })
}

fn is_listen_row(line: &str) -> bool {
    line.trim_end()
        .trim_end_matches(')')
        .ends_with("LISTEN")
}
