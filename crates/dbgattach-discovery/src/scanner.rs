//! ProcessScanner: one process-listing command per cycle, parsed into candidates.

use std::collections::HashSet;
use std::time::Duration;

use dbgattach_core::{CandidateProcess, Platform, Provenance};

use crate::executor::CommandRunner;
use crate::extract::extract_port;
use crate::user::current_uid;

/// Hard timeout for the listing command.
pub const SCAN_TIMEOUT: Duration = Duration::from_secs(10);

/// Default debug-agent process marker.
pub const DEFAULT_MARKER: &str = "debugpy";

/// Scans the process table for debug-agent processes exposing a port.
#[derive(Debug, Clone)]
pub struct ProcessScanner {
    platform: Platform,
    marker: String,
    current_user: String,
    current_uid: Option<u32>,
    timeout: Duration,
}

impl ProcessScanner {
    pub fn new(current_user: impl Into<String>) -> Self {
        Self {
            platform: Platform::current(),
            marker: DEFAULT_MARKER.to_string(),
            current_user: current_user.into(),
            current_uid: current_uid(),
            timeout: SCAN_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Process marker to filter on. Characters outside `[A-Za-z0-9._-]` are dropped
    /// since the marker is embedded in the Windows query.
    #[must_use]
    pub fn with_marker(mut self, marker: &str) -> Self {
        let clean: String = marker
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
            .collect();
        if !clean.is_empty() {
            self.marker = clean;
        }
        self
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// Listing command for this platform as `(program, args)`.
    pub fn command(&self) -> (&'static str, Vec<String>) {
        match self.platform {
            Platform::Posix => (
                "ps",
                vec!["-A".into(), "-o".into(), "uid=,user=,pid=,args=".into()],
            ),
            Platform::Windows => {
                let script = format!(
                    "Get-CimInstance Win32_Process -Filter \"CommandLine like '%{marker}%'\" | \
                     ForEach-Object {{ $o = Invoke-CimMethod -InputObject $_ -MethodName GetOwner; \
                     '{{0}}\\{{1}},{{2}},{{3}}' -f $o.Domain, $o.User, $_.ProcessId, $_.CommandLine }}",
                    marker = self.marker
                );
                (
                    "powershell",
                    vec![
                        "-NoProfile".into(),
                        "-NonInteractive".into(),
                        "-Command".into(),
                        script,
                    ],
                )
            }
        }
    }

    /// Run the listing command and parse candidates. Every failure yields an empty list.
    pub async fn scan<R: CommandRunner>(&self, runner: &R) -> Vec<CandidateProcess> {
        let (program, args) = self.command();
        let output = match runner.run(program, &args, self.timeout).await {
            Ok(out) => out,
            Err(e) => {
                tracing::debug!(program, error = %e, "process scan failed");
                return Vec::new();
            }
        };
        let candidates = match self.platform {
            Platform::Posix => parse_posix_output(
                &output,
                &self.marker,
                &self.current_user,
                self.current_uid,
            ),
            Platform::Windows => parse_windows_output(&output, &self.marker, &self.current_user),
        };
        tracing::debug!(count = candidates.len(), "process scan complete");
        candidates
    }
}

/// Parse `uid user pid command...` lines. Lines without the marker or an explicit
/// port flag are dropped, and the first occurrence of a port wins.
///
/// Ownership is decided by uid when `current_uid` is known: procps cuts long
/// names to seven characters plus `+`, so the name column cannot be trusted.
pub fn parse_posix_output(
    output: &str,
    marker: &str,
    current_user: &str,
    current_uid: Option<u32>,
) -> Vec<CandidateProcess> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for line in output.lines() {
        let mut fields = line.split_whitespace();
        let (Some(uid), Some(owner), Some(pid)) = (fields.next(), fields.next(), fields.next())
        else {
            continue;
        };
        let command = fields.collect::<Vec<_>>().join(" ");
        let Ok(uid) = uid.parse::<u32>() else {
            continue;
        };
        if command.is_empty() || !pid.bytes().all(|b| b.is_ascii_digit()) {
            continue;
        }
        if !command.contains(marker) {
            continue;
        }
        let Some(port) = extract_port(&command, Platform::Posix) else {
            continue;
        };
        if !seen.insert(port.clone()) {
            continue;
        }
        let is_current_user = match current_uid {
            Some(current) => uid == current,
            None => Platform::Posix.users_match(owner, current_user),
        };
        let owner = if is_current_user && is_truncated_name(owner, current_user) {
            current_user
        } else {
            owner
        };
        out.push(CandidateProcess {
            pid: pid.to_string(),
            port,
            owner: owner.to_string(),
            is_current_user,
            provenance: Provenance::Scanner,
            command_hint: Some(command),
        });
    }
    out
}

/// `averyve+` for `averyverylongusername`.
fn is_truncated_name(shown: &str, full: &str) -> bool {
    shown
        .strip_suffix('+')
        .is_some_and(|prefix| full.len() > prefix.len() && full.starts_with(prefix))
}

/// Parse `owner,pid,command line` rows. The owner may be `DOMAIN\user`;
/// only the user segment is kept. The command line may itself contain commas.
pub fn parse_windows_output(
    output: &str,
    marker: &str,
    current_user: &str,
) -> Vec<CandidateProcess> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for line in output.lines() {
        let mut cols = line.trim().splitn(3, ',');
        let (Some(owner), Some(pid), Some(command)) = (cols.next(), cols.next(), cols.next())
        else {
            continue;
        };
        let owner = unquote(owner);
        let owner = owner.rsplit('\\').next().unwrap_or(owner);
        let pid = unquote(pid);
        let command = unquote(command);
        if owner.is_empty() || pid.is_empty() || !pid.bytes().all(|b| b.is_ascii_digit()) {
            continue;
        }
        // The query already filters, but it also matches its own powershell process.
        if !command.to_ascii_lowercase().contains(&marker.to_ascii_lowercase())
            || command.contains("Get-CimInstance")
        {
            continue;
        }
        let Some(port) = extract_port(command, Platform::Windows) else {
            continue;
        };
        if !seen.insert(port.clone()) {
            continue;
        }
        out.push(CandidateProcess {
            pid: pid.to_string(),
            port,
            owner: owner.to_string(),
            is_current_user: Platform::Windows.users_match(owner, current_user),
            provenance: Provenance::Scanner,
            command_hint: Some(command.to_string()),
        });
    }
    out
}

fn unquote(s: &str) -> &str {
    let s = s.trim();
    s.strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(s)
}
