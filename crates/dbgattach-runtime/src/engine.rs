//! AutoAttachEngine: per-port attach state machine driven by a poll timer.
//!
//! Each tick discovers candidates, claims at most one new port through the
//! shared [`PortLock`], and hands it to the [`DebugLauncher`]. While any
//! debug session is active the timer is stopped and no discovery runs.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

use dbgattach_core::{AttachError, AttachRequest, AttachState, CandidateProcess, DebugProfile};
use dbgattach_discovery::Discover;
use dbgattach_lock::PortLock;

use crate::launcher::DebugLauncher;

/// Delay between a successful attach and releasing its lock.
pub const RELEASE_GRACE: Duration = Duration::from_secs(2);

/// Delay before polling resumes after a debug session ends.
pub const SESSION_END_COOLDOWN: Duration = Duration::from_secs(3);

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub interval: Duration,
    pub release_grace: Duration,
    pub cooldown: Duration,
    /// Only attach to processes owned by the invoking user.
    pub only_current_user: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1000),
            release_grace: RELEASE_GRACE,
            cooldown: SESSION_END_COOLDOWN,
            only_current_user: true,
        }
    }
}

/// What one poll tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// A debug session is active; discovery was not called.
    Suspended,
    /// Nothing new could be attached this tick.
    Idle,
    Attached(String),
}

#[derive(Debug, Default)]
struct EngineState {
    connecting: HashSet<String>,
    /// Attached ports in attach order.
    attached: Vec<String>,
    session_active: bool,
}

impl EngineState {
    fn state_of(&self, port: &str) -> AttachState {
        if self.connecting.contains(port) {
            AttachState::Connecting
        } else if self.attached.iter().any(|p| p == port) {
            AttachState::Attached
        } else {
            AttachState::Unseen
        }
    }
}

/// Point-in-time view for the status surface.
#[derive(Debug, Clone, Serialize)]
pub struct EngineSnapshot {
    pub session_active: bool,
    pub polling: bool,
    pub connecting: Vec<String>,
    pub attached: Vec<String>,
}

pub struct AutoAttachEngine<D, L> {
    discovery: D,
    launcher: L,
    lock: Arc<PortLock>,
    config: EngineConfig,
    state: Mutex<EngineState>,
    /// Set once `start` runs; session-end only resumes polling when set.
    enabled: AtomicBool,
    /// Token of the currently running poll timer, if any.
    timer: std::sync::Mutex<Option<CancellationToken>>,
    shutdown: CancellationToken,
}

impl<D, L> AutoAttachEngine<D, L>
where
    D: Discover + 'static,
    L: DebugLauncher + 'static,
{
    pub fn new(discovery: D, launcher: L, lock: Arc<PortLock>, config: EngineConfig) -> Self {
        Self {
            discovery,
            launcher,
            lock,
            config,
            state: Mutex::new(EngineState::default()),
            enabled: AtomicBool::new(false),
            timer: std::sync::Mutex::new(None),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn lock(&self) -> &PortLock {
        &self.lock
    }

    // ─── Timer ───────────────────────────────────────────────────

    /// Enable auto-attach and start the poll timer.
    pub fn start(self: &Arc<Self>) {
        self.enabled.store(true, Ordering::SeqCst);
        self.spawn_timer(Duration::ZERO);
    }

    pub fn is_polling(&self) -> bool {
        self.timer
            .lock()
            .map(|t| t.as_ref().is_some_and(|tok| !tok.is_cancelled()))
            .unwrap_or(false)
    }

    fn stop_timer(&self) {
        if let Ok(mut timer) = self.timer.lock()
            && let Some(token) = timer.take()
        {
            token.cancel();
        }
    }

    /// Replace any running timer with one that starts ticking after `delay`.
    fn spawn_timer(self: &Arc<Self>, delay: Duration) {
        if self.shutdown.is_cancelled() {
            return;
        }
        let token = self.shutdown.child_token();
        match self.timer.lock() {
            Ok(mut timer) => {
                if let Some(old) = timer.replace(token.clone()) {
                    old.cancel();
                }
            }
            Err(_) => return,
        }

        let engine = Arc::clone(self);
        let period = self.config.interval;
        tokio::spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = token.cancelled() => return,
            }
            tracing::debug!(interval_ms = period.as_millis() as u64, "auto-attach polling");
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        // An in-flight tick runs to completion even if the timer is stopped.
                        engine.tick().await;
                    }
                    () = token.cancelled() => break,
                }
            }
        });
    }

    // ─── Tick ────────────────────────────────────────────────────

    /// One poll tick. At most one attach succeeds per tick.
    pub async fn tick(&self) -> TickOutcome {
        if self.state.lock().await.session_active {
            return TickOutcome::Suspended;
        }

        let cycle = self.discovery.discover().await;
        let candidates: Vec<CandidateProcess> = cycle
            .candidates
            .into_iter()
            .filter(|c| !self.config.only_current_user || c.is_current_user)
            .collect();
        let profile = cycle.preferred_profile;

        let new_ports: Vec<CandidateProcess> = {
            let mut st = self.state.lock().await;
            let present: HashSet<String> = candidates.iter().map(|c| c.port.clone()).collect();
            st.attached.retain(|port| {
                let alive = present.contains(port);
                if !alive {
                    tracing::info!(port = %port, "attached process is gone");
                }
                alive
            });
            candidates
                .into_iter()
                .filter(|c| !st.attached.contains(&c.port))
                .collect()
        };

        for candidate in &new_ports {
            match self.try_attach(candidate, profile.as_ref()).await {
                Ok(true) => return TickOutcome::Attached(candidate.port.clone()),
                Ok(false) => {}
                Err(e) => tracing::warn!(
                    port = %candidate.port,
                    pid = %candidate.pid,
                    failure_class = e.failure_class(),
                    error = %e,
                    "auto-attach failed, will retry"
                ),
            }
        }
        TickOutcome::Idle
    }

    /// Claim and launch one candidate.
    ///
    /// `Ok(false)` means the port was skipped: already connecting here, or
    /// locked by another instance.
    async fn try_attach(
        &self,
        candidate: &CandidateProcess,
        profile: Option<&DebugProfile>,
    ) -> Result<bool, AttachError> {
        let port = candidate.port.as_str();
        {
            let mut st = self.state.lock().await;
            if st.connecting.contains(port) {
                return Ok(false);
            }
            if !self.lock.try_acquire(port).await {
                tracing::debug!(port, "port locked elsewhere, skipping");
                return Ok(false);
            }
            st.connecting.insert(port.to_string());
        }

        let request = AttachRequest::from_candidate(candidate, profile);
        let result = self.launcher.launch(&request).await;

        let mut st = self.state.lock().await;
        st.connecting.remove(port);
        match result {
            Ok(()) => {
                if !st.attached.iter().any(|p| p == port) {
                    st.attached.push(port.to_string());
                }
                drop(st);
                tracing::info!(port, pid = %candidate.pid, owner = %candidate.owner, "attached");
                self.release_after_grace(port.to_string());
                Ok(true)
            }
            Err(e) => {
                drop(st);
                self.lock.release(port).await;
                Err(e)
            }
        }
    }

    fn release_after_grace(&self, port: String) {
        let lock = Arc::clone(&self.lock);
        let grace = self.config.release_grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            lock.release(&port).await;
        });
    }

    // ─── Manual attach ───────────────────────────────────────────

    /// User-requested attach to `port`. Errors are returned, not retried.
    ///
    /// Runs a fresh discovery cycle and ignores the session gate and the
    /// current-user filter.
    pub async fn attach_port(&self, port: &str) -> Result<(), AttachError> {
        let cycle = self.discovery.discover().await;
        let candidate = cycle
            .candidates
            .into_iter()
            .find(|c| c.port == port)
            .ok_or_else(|| AttachError::NotFound(port.to_string()))?;

        match self.try_attach(&candidate, cycle.preferred_profile.as_ref()).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(AttachError::Locked(port.to_string())),
            Err(e) => {
                tracing::info!(port, failure_class = e.failure_class(), error = %e, "manual attach failed");
                Err(e)
            }
        }
    }

    // ─── Session notifications ───────────────────────────────────

    /// A debug session started (auto or manual). Future ticks are suppressed.
    pub async fn on_session_start(&self, port: Option<&str>) {
        self.state.lock().await.session_active = true;
        self.stop_timer();
        tracing::info!(port = port.unwrap_or("-"), "debug session started, auto-attach paused");
    }

    /// A debug session ended. The port may be attached again, and polling
    /// resumes after the cooldown.
    pub async fn on_session_end(self: &Arc<Self>, port: Option<&str>) {
        {
            let mut st = self.state.lock().await;
            st.session_active = false;
            if let Some(port) = port {
                st.attached.retain(|p| p != port);
            }
        }
        tracing::info!(port = port.unwrap_or("-"), "debug session ended");
        if self.enabled.load(Ordering::SeqCst) {
            self.spawn_timer(self.config.cooldown);
        }
    }

    pub async fn mark_user_activity(&self) {
        self.lock.mark_user_activity().await;
    }

    // ─── Status ──────────────────────────────────────────────────

    pub async fn snapshot(&self) -> EngineSnapshot {
        let st = self.state.lock().await;
        let mut connecting: Vec<String> = st.connecting.iter().cloned().collect();
        connecting.sort();
        EngineSnapshot {
            session_active: st.session_active,
            polling: self.is_polling(),
            connecting,
            attached: st.attached.clone(),
        }
    }

    pub async fn state_of(&self, port: &str) -> AttachState {
        self.state.lock().await.state_of(port)
    }

    /// Per-port states for a set of candidates.
    pub async fn states_for(&self, candidates: &[CandidateProcess]) -> HashMap<String, AttachState> {
        let st = self.state.lock().await;
        candidates
            .iter()
            .map(|c| (c.port.clone(), st.state_of(&c.port)))
            .collect()
    }

    // ─── Shutdown ────────────────────────────────────────────────

    /// Stop every timer and release every lock this instance holds.
    pub async fn dispose(&self) {
        self.enabled.store(false, Ordering::SeqCst);
        self.shutdown.cancel();
        self.stop_timer();
        self.lock.cleanup().await;
        tracing::debug!("auto-attach engine disposed");
    }
}
