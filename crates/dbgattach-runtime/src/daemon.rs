//! Daemon wiring: builds the long-lived components once and runs the status
//! timer, the auto-attach engine, the session-event pump and the UDS server
//! until shutdown.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, mpsc};
use tokio::time::{Duration, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

use dbgattach_core::CandidateProcess;
use dbgattach_discovery::{
    Discover, DiscoveryCoordinator, HintSource, PortProbe, ProcessExecutor, ProcessScanner,
    current_username,
};
use dbgattach_lock::PortLock;

use crate::cli::{DaemonOpts, DiscoveryOpts};
use crate::engine::{AutoAttachEngine, EngineConfig};
use crate::launcher::{CommandLauncher, DebugLauncher, SessionEvent};
use crate::server;

pub type Coordinator = DiscoveryCoordinator<ProcessExecutor>;

/// Latest status-timer results and static daemon facts, shared with the server.
pub struct DaemonState {
    /// Visible candidates from the last status refresh.
    pub candidates: Vec<CandidateProcess>,
    /// Name of the preferred attach profile, if the launch config has one.
    pub preferred_profile: Option<String>,
    pub refreshed_at: Option<DateTime<Utc>>,
    pub started_at: DateTime<Utc>,
    pub auto_attach: bool,
    pub launch_configured: bool,
    pub lock_dir: PathBuf,
}

impl DaemonState {
    pub fn new(lock_dir: PathBuf) -> Self {
        Self {
            candidates: Vec::new(),
            preferred_profile: None,
            refreshed_at: None,
            started_at: Utc::now(),
            auto_attach: false,
            launch_configured: false,
            lock_dir,
        }
    }
}

/// Discovery stack for the invoking user, shared by the daemon and `scan`.
pub fn build_coordinator(opts: &DiscoveryOpts, user: &str) -> Coordinator {
    DiscoveryCoordinator::new(
        ProcessExecutor::default(),
        ProcessScanner::new(user).with_marker(&opts.marker),
        PortProbe::new(user),
    )
    .with_hints(HintSource::new(&opts.launch_config))
    .with_only_current_user(opts.only_current_user)
}

/// Run the daemon: starts timers, event pump and UDS server, waits for shutdown signal.
pub async fn run_daemon(opts: DaemonOpts, socket_path: &str) -> anyhow::Result<()> {
    let user = current_username();
    let coordinator = Arc::new(build_coordinator(&opts.discovery, &user));

    let lock = match &opts.lock_dir {
        Some(dir) => PortLock::new(dir),
        None => PortLock::for_user(&user),
    };
    let lock_dir = lock.dir().to_path_buf();

    let (launcher, events) = CommandLauncher::new(opts.launch_cmd.clone(), opts.launch_args.clone());
    let launch_configured = launcher.is_configured();

    let engine = Arc::new(AutoAttachEngine::new(
        Arc::clone(&coordinator),
        launcher,
        Arc::new(lock),
        EngineConfig {
            interval: Duration::from_millis(opts.attach_interval_ms.max(1)),
            only_current_user: !opts.attach_other_users,
            ..EngineConfig::default()
        },
    ));

    let auto_attach = opts.auto_attach && launch_configured;
    if opts.auto_attach && !launch_configured {
        tracing::warn!("auto-attach needs --launch-cmd; running discovery only");
    }

    let state = Arc::new(Mutex::new(DaemonState {
        auto_attach,
        launch_configured,
        ..DaemonState::new(lock_dir.clone())
    }));
    tracing::info!(
        user = %user,
        lock_dir = %lock_dir.display(),
        auto_attach,
        marker = %opts.discovery.marker,
        "daemon configured"
    );

    let cancel = CancellationToken::new();

    // Start UDS server
    let server_state = Arc::clone(&state);
    let server_engine = Arc::clone(&engine);
    let server_socket = socket_path.to_string();
    let server_cancel = cancel.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) =
            server::run_server(&server_socket, server_state, server_engine, server_cancel).await
        {
            tracing::error!("UDS server error: {e}");
        }
    });

    // Start status timer
    let status_handle = tokio::spawn(run_status_loop(
        Arc::clone(&coordinator),
        Arc::clone(&state),
        Duration::from_millis(opts.status_interval_ms.max(1)),
        cancel.clone(),
    ));

    // Start session-event pump
    let pump_handle = tokio::spawn(pump_session_events(
        events,
        Arc::clone(&engine),
        cancel.clone(),
    ));

    if auto_attach {
        engine.start();
    }

    // Wait for shutdown signal (ctrl-c or SIGTERM)
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to register SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => tracing::info!("received ctrl-c, shutting down"),
                _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
            }
        }

        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
            tracing::info!("received ctrl-c, shutting down");
        }
    };

    tokio::select! {
        () = shutdown => {}
        _ = server_handle => {
            tracing::warn!("server exited unexpectedly");
        }
        _ = status_handle => {
            tracing::warn!("status timer exited unexpectedly");
        }
        _ = pump_handle => {
            tracing::warn!("session event pump exited unexpectedly");
        }
    }

    cancel.cancel();
    engine.dispose().await;

    // Cleanup socket
    let _ = std::fs::remove_file(socket_path);
    tracing::info!("daemon stopped");
    Ok(())
}

/// Status timer: refresh the visible candidate list on a fixed interval.
async fn run_status_loop<D: Discover>(
    discovery: D,
    state: Arc<Mutex<DaemonState>>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => refresh_status(&discovery, &state).await,
            () = cancel.cancelled() => break,
        }
    }
}

pub(crate) async fn refresh_status<D: Discover>(discovery: &D, state: &Arc<Mutex<DaemonState>>) {
    let cycle = discovery.discover().await;
    let mut st = state.lock().await;
    if st.candidates != cycle.candidates {
        tracing::debug!(count = cycle.candidates.len(), "candidate list changed");
    }
    st.candidates = cycle.candidates;
    st.preferred_profile = cycle.preferred_profile.and_then(|p| p.name);
    st.refreshed_at = Some(Utc::now());
}

/// Forward host session notifications to the engine.
async fn pump_session_events<D, L>(
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
    engine: Arc<AutoAttachEngine<D, L>>,
    cancel: CancellationToken,
) where
    D: Discover + 'static,
    L: DebugLauncher + 'static,
{
    loop {
        let event = tokio::select! {
            event = events.recv() => event,
            () = cancel.cancelled() => break,
        };
        match event {
            Some(SessionEvent::Started { port }) => engine.on_session_start(Some(&port)).await,
            Some(SessionEvent::Ended { port }) => engine.on_session_end(Some(&port)).await,
            None => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbgattach_core::{AttachError, AttachRequest, AttachState, DebugProfile, Provenance};
    use dbgattach_discovery::DiscoveryCycle;

    struct FixedDiscovery(Vec<CandidateProcess>);

    impl Discover for FixedDiscovery {
        async fn discover(&self) -> DiscoveryCycle {
            DiscoveryCycle {
                candidates: self.0.clone(),
                preferred_profile: Some(DebugProfile {
                    name: Some("Attach to worker".into()),
                    ..DebugProfile::default()
                }),
            }
        }
    }

    struct OkLauncher;

    impl DebugLauncher for OkLauncher {
        async fn launch(&self, _request: &AttachRequest) -> Result<(), AttachError> {
            Ok(())
        }
    }

    fn cand(port: &str) -> CandidateProcess {
        CandidateProcess {
            pid: "4821".into(),
            port: port.into(),
            owner: "alice".into(),
            is_current_user: true,
            provenance: Provenance::Scanner,
            command_hint: None,
        }
    }

    #[tokio::test]
    async fn refresh_stores_candidates_and_profile() {
        let state = Arc::new(Mutex::new(DaemonState::new(PathBuf::from("/tmp/x"))));
        refresh_status(&FixedDiscovery(vec![cand("5678")]), &state).await;

        let st = state.lock().await;
        assert_eq!(st.candidates.len(), 1);
        assert_eq!(st.preferred_profile.as_deref(), Some("Attach to worker"));
        assert!(st.refreshed_at.is_some());
    }

    #[tokio::test]
    async fn status_loop_stops_on_cancel() {
        let state = Arc::new(Mutex::new(DaemonState::new(PathBuf::from("/tmp/x"))));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_status_loop(
            FixedDiscovery(vec![cand("5678")]),
            Arc::clone(&state),
            Duration::from_millis(10),
            cancel.clone(),
        ));
        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("loop exits")
            .expect("no panic");
        assert_eq!(state.lock().await.candidates.len(), 1);
    }

    #[tokio::test]
    async fn pump_forwards_session_events() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = Arc::new(AutoAttachEngine::new(
            FixedDiscovery(vec![cand("5678")]),
            OkLauncher,
            Arc::new(PortLock::new(dir.path())),
            EngineConfig::default(),
        ));
        engine.tick().await;
        assert_eq!(engine.state_of("5678").await, AttachState::Attached);

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let pump = tokio::spawn(pump_session_events(rx, Arc::clone(&engine), cancel.clone()));

        tx.send(SessionEvent::Started { port: "5678".into() }).expect("send");
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(engine.snapshot().await.session_active);

        tx.send(SessionEvent::Ended { port: "5678".into() }).expect("send");
        tokio::time::sleep(Duration::from_millis(20)).await;
        let snap = engine.snapshot().await;
        assert!(!snap.session_active);
        assert_eq!(engine.state_of("5678").await, AttachState::Unseen);

        drop(tx);
        tokio::time::timeout(Duration::from_secs(1), pump)
            .await
            .expect("pump exits when the channel closes")
            .expect("no panic");
        engine.dispose().await;
    }
}
