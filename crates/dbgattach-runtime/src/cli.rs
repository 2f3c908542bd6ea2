//! CLI definition using clap derive.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "dbgattach",
    version,
    about = "Discover debug-agent processes and attach a debugger, one port at a time"
)]
pub struct Cli {
    /// UDS socket path (default: $XDG_RUNTIME_DIR/dbgattach/dbgattachd.sock or /tmp/dbgattach-$USER/dbgattachd.sock)
    #[arg(long, short = 's', global = true, env = "DBGATTACH_SOCKET")]
    pub socket_path: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the daemon (status timer, auto-attach engine, UDS server)
    Daemon(DaemonOpts),
    /// List discovered debug processes with their attach state (default)
    Ls(LsOpts),
    /// Show daemon status summary
    Status,
    /// Attach to the debug process listening on PORT
    Attach {
        port: String,
    },
    /// Record user activity (keeps this instance's port locks fresh)
    Activity,
    /// Notify the daemon that a debug session started
    SessionStart {
        port: Option<String>,
    },
    /// Notify the daemon that a debug session ended
    SessionEnd {
        port: Option<String>,
    },
    /// Run one discovery cycle in-process, without a daemon
    Scan(ScanOpts),
}

/// Options shared by the daemon and one-shot discovery.
#[derive(clap::Args, Clone, Debug)]
pub struct DiscoveryOpts {
    /// Hide processes owned by other users
    #[arg(long, env = "DBGATTACH_ONLY_CURRENT_USER")]
    pub only_current_user: bool,

    /// Launch configuration used for port hints and the preferred attach profile
    #[arg(long, default_value = ".vscode/launch.json", env = "DBGATTACH_LAUNCH_CONFIG")]
    pub launch_config: PathBuf,

    /// Debug-agent process marker matched against command lines
    #[arg(long, default_value = "debugpy", env = "DBGATTACH_MARKER")]
    pub marker: String,
}

#[derive(clap::Args)]
pub struct DaemonOpts {
    #[command(flatten)]
    pub discovery: DiscoveryOpts,

    /// Attach automatically to newly discovered processes
    #[arg(long, env = "DBGATTACH_AUTO_ATTACH")]
    pub auto_attach: bool,

    /// Also auto-attach to processes owned by other users
    #[arg(long)]
    pub attach_other_users: bool,

    /// Auto-attach poll interval in milliseconds
    #[arg(long, default_value = "1000")]
    pub attach_interval_ms: u64,

    /// Status refresh interval in milliseconds
    #[arg(long, default_value = "3000")]
    pub status_interval_ms: u64,

    /// Host launch command; receives the attach request as JSON on stdin
    #[arg(long, env = "DBGATTACH_LAUNCH_CMD")]
    pub launch_cmd: Option<String>,

    /// Argument for the launch command (repeatable)
    #[arg(long = "launch-arg", allow_hyphen_values = true)]
    pub launch_args: Vec<String>,

    /// Lock directory (default: <tmp>/dbgattach-$USER/locks)
    #[arg(long, env = "DBGATTACH_LOCK_DIR")]
    pub lock_dir: Option<PathBuf>,
}

#[derive(clap::Args, Default)]
pub struct LsOpts {
    /// Print the raw JSON result
    #[arg(long)]
    pub json: bool,
}

#[derive(clap::Args)]
pub struct ScanOpts {
    #[command(flatten)]
    pub discovery: DiscoveryOpts,

    /// Print candidates as JSON
    #[arg(long)]
    pub json: bool,
}

/// Default socket path using $USER for per-user isolation.
pub fn default_socket_path() -> String {
    if let Ok(dir) = std::env::var("XDG_RUNTIME_DIR") {
        return format!("{dir}/dbgattach/dbgattachd.sock");
    }
    let user = dbgattach_discovery::current_username();
    format!("/tmp/dbgattach-{user}/dbgattachd.sock")
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn daemon_defaults() {
        let cli = Cli::try_parse_from(["dbgattach", "daemon"]).expect("parse");
        let Some(Command::Daemon(opts)) = cli.command else {
            panic!("expected daemon");
        };
        assert!(!opts.auto_attach);
        assert_eq!(opts.attach_interval_ms, 1000);
        assert_eq!(opts.status_interval_ms, 3000);
        assert_eq!(opts.discovery.marker, "debugpy");
        assert_eq!(
            opts.discovery.launch_config,
            PathBuf::from(".vscode/launch.json")
        );
        assert!(opts.launch_cmd.is_none());
    }

    #[test]
    fn launch_args_accept_flags() {
        let cli = Cli::try_parse_from([
            "dbgattach",
            "daemon",
            "--auto-attach",
            "--launch-cmd",
            "code",
            "--launch-arg",
            "--attach",
            "--launch-arg",
            "-",
        ])
        .expect("parse");
        let Some(Command::Daemon(opts)) = cli.command else {
            panic!("expected daemon");
        };
        assert!(opts.auto_attach);
        assert_eq!(opts.launch_cmd.as_deref(), Some("code"));
        assert_eq!(opts.launch_args, vec!["--attach", "-"]);
    }

    #[test]
    fn no_subcommand_means_ls() {
        let cli = Cli::try_parse_from(["dbgattach", "-s", "/tmp/x.sock"]).expect("parse");
        assert!(cli.command.is_none());
        assert_eq!(cli.socket_path.as_deref(), Some("/tmp/x.sock"));
    }

    #[test]
    fn attach_takes_port() {
        let cli = Cli::try_parse_from(["dbgattach", "attach", "5678"]).expect("parse");
        assert!(matches!(cli.command, Some(Command::Attach { port }) if port == "5678"));
    }
}
