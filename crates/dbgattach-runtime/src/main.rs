//! dbgattach: debug-agent discovery and auto-attach runtime binary.
//! The daemon embeds discovery, the port lock and the attach engine in-process;
//! every other subcommand is a thin client over its UDS socket.

use clap::Parser;

mod cli;
mod client;
mod cmd_scan;
mod daemon;
mod display;
mod engine;
mod launcher;
mod server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    let command = args
        .command
        .unwrap_or_else(|| cli::Command::Ls(cli::LsOpts::default()));
    let socket_path = args.socket_path.unwrap_or_else(cli::default_socket_path);

    match command {
        cli::Command::Daemon(opts) => {
            let filter = std::env::var("DBGATTACH_LOG")
                .or_else(|_| std::env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string());
            tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
                .init();

            tracing::info!("dbgattach daemon starting");
            daemon::run_daemon(opts, &socket_path).await?;
        }
        cli::Command::Ls(opts) => client::cmd_ls(&socket_path, opts.json).await?,
        cli::Command::Status => client::cmd_status(&socket_path).await?,
        cli::Command::Attach { port } => client::cmd_attach(&socket_path, &port).await?,
        cli::Command::Activity => client::cmd_activity(&socket_path).await?,
        cli::Command::SessionStart { port } => {
            client::cmd_session(&socket_path, "session_started", port.as_deref()).await?;
        }
        cli::Command::SessionEnd { port } => {
            client::cmd_session(&socket_path, "session_ended", port.as_deref()).await?;
        }
        cli::Command::Scan(opts) => cmd_scan::cmd_scan(&opts).await?,
    }

    Ok(())
}
