//! `dbgattach scan`: one discovery cycle in-process, no daemon required.

use dbgattach_core::CandidateProcess;
use dbgattach_discovery::{Discover, current_username};

use crate::cli::ScanOpts;
use crate::daemon::build_coordinator;
use crate::display;

pub async fn cmd_scan(opts: &ScanOpts) -> anyhow::Result<()> {
    let user = current_username();
    let coordinator = build_coordinator(&opts.discovery, &user);
    let cycle = coordinator.discover().await;

    if opts.json {
        println!("{}", serde_json::to_string_pretty(&cycle.candidates)?);
    } else {
        print!("{}", render(&cycle.candidates)?);
    }
    Ok(())
}

/// Table rendering of raw candidates; attach state is unknown outside the daemon.
fn render(candidates: &[CandidateProcess]) -> anyhow::Result<String> {
    let rows = serde_json::to_value(candidates)?;
    Ok(display::format_candidates(&rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbgattach_core::Provenance;

    #[test]
    fn render_uses_candidate_fields() {
        let candidates = vec![CandidateProcess {
            pid: "4821".into(),
            port: "5678".into(),
            owner: "alice".into(),
            is_current_user: true,
            provenance: Provenance::Scanner,
            command_hint: Some("python -m debugpy --listen 5678 app.py".into()),
        }];
        let out = render(&candidates).expect("render");
        let row = out.lines().nth(1).expect("one row");
        assert!(row.starts_with("5678"));
        assert!(row.contains("4821"));
        assert!(row.contains("scanner"));
        assert!(row.ends_with("app.py"));
    }

    #[test]
    fn render_empty() {
        assert_eq!(render(&[]).expect("render"), "no debug processes found\n");
    }
}
