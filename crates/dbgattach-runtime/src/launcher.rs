//! Host debug-launch interface.
//!
//! The host (an editor, or any script that drives a debugger front end) is
//! reached through a configured launch command. The attach request goes to it
//! as JSON on stdin; the child's lifetime is the debug session's lifetime.

use std::future::Future;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use dbgattach_core::{AttachError, AttachRequest, parse_port};

/// Timeout for the TCP reachability check before launching.
pub const PREFLIGHT_TIMEOUT: Duration = Duration::from_secs(2);

/// Debug-session notifications emitted by the host side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Started { port: String },
    Ended { port: String },
}

/// Hands an attach request to the host debug subsystem.
pub trait DebugLauncher: Send + Sync {
    fn launch(&self, request: &AttachRequest)
    -> impl Future<Output = Result<(), AttachError>> + Send;
}

impl<T: DebugLauncher> DebugLauncher for std::sync::Arc<T> {
    fn launch(
        &self,
        request: &AttachRequest,
    ) -> impl Future<Output = Result<(), AttachError>> + Send {
        (**self).launch(request)
    }
}

/// Launches the configured host command once per attach.
pub struct CommandLauncher {
    program: Option<String>,
    args: Vec<String>,
    preflight_timeout: Duration,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl CommandLauncher {
    /// `program == None` leaves the launcher unconfigured; every launch is rejected.
    pub fn new(
        program: Option<String>,
        args: Vec<String>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let launcher = Self {
            program: program.filter(|p| !p.trim().is_empty()),
            args,
            preflight_timeout: PREFLIGHT_TIMEOUT,
            events: tx,
        };
        (launcher, rx)
    }

    pub fn is_configured(&self) -> bool {
        self.program.is_some()
    }
}

impl DebugLauncher for CommandLauncher {
    async fn launch(&self, request: &AttachRequest) -> Result<(), AttachError> {
        let Some(program) = &self.program else {
            return Err(AttachError::Rejected(
                "no launch command configured (--launch-cmd)".into(),
            ));
        };

        preflight(request.host(), request.port(), self.preflight_timeout).await?;

        let body = serde_json::to_vec(request)
            .map_err(|e| AttachError::Rejected(format!("cannot encode attach request: {e}")))?;

        let mut child = tokio::process::Command::new(program)
            .args(&self.args)
            .env("DBGATTACH_PORT", request.port())
            .env("DBGATTACH_HOST", request.host())
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| AttachError::Rejected(format!("{program}: {e}")))?;

        if let Some(mut stdin) = child.stdin.take() {
            // A host that ignores stdin closes it early; that is not a failure.
            if let Err(e) = stdin.write_all(&body).await {
                tracing::debug!(error = %e, "launch command closed stdin");
            }
        }

        let port = request.port().to_string();
        let _ = self.events.send(SessionEvent::Started { port: port.clone() });

        let events = self.events.clone();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => tracing::info!(port = %port, %status, "debug session ended"),
                Err(e) => tracing::warn!(port = %port, error = %e, "lost track of debug session"),
            }
            let _ = events.send(SessionEvent::Ended { port });
        });

        Ok(())
    }
}

/// Check that something accepts connections on `host:port`.
pub async fn preflight(host: &str, port: &str, timeout: Duration) -> Result<(), AttachError> {
    let port_num = parse_port(port).map_err(|e| AttachError::Rejected(e.to_string()))?;
    match tokio::time::timeout(timeout, TcpStream::connect((host, port_num))).await {
        Ok(Ok(_stream)) => Ok(()),
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
            Err(AttachError::ConnectionRefused {
                host: host.to_string(),
                port: port.to_string(),
            })
        }
        Ok(Err(e)) => Err(AttachError::Io(e)),
        Err(_) => Err(AttachError::Timeout {
            host: host.to_string(),
            port: port.to_string(),
            timeout,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbgattach_core::{CandidateProcess, Provenance};
    use tokio::net::TcpListener;

    fn request(port: u16) -> AttachRequest {
        let candidate = CandidateProcess {
            pid: "4821".into(),
            port: port.to_string(),
            owner: "alice".into(),
            is_current_user: true,
            provenance: Provenance::Scanner,
            command_hint: None,
        };
        let mut req = AttachRequest::from_candidate(&candidate, None);
        req.connect.host = "127.0.0.1".into();
        req
    }

    /// Bind and immediately drop a listener: the port is very likely closed.
    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        drop(listener);
        port
    }

    #[tokio::test]
    async fn preflight_accepts_listening_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        preflight("127.0.0.1", &port.to_string(), Duration::from_secs(2))
            .await
            .expect("listening port passes preflight");
    }

    #[tokio::test]
    async fn preflight_classifies_refused() {
        let port = closed_port().await;
        let err = preflight("127.0.0.1", &port.to_string(), Duration::from_secs(2))
            .await
            .expect_err("closed port");
        assert_eq!(err.failure_class(), "connection_refused");
    }

    #[tokio::test]
    async fn unconfigured_launcher_rejects() {
        let (launcher, _rx) = CommandLauncher::new(None, Vec::new());
        assert!(!launcher.is_configured());
        let err = launcher.launch(&request(5678)).await.expect_err("rejected");
        assert_eq!(err.failure_class(), "rejected");
    }

    #[tokio::test]
    async fn missing_program_is_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let (launcher, _rx) =
            CommandLauncher::new(Some("dbgattach-no-such-host-command".into()), Vec::new());
        let err = launcher.launch(&request(port)).await.expect_err("spawn fails");
        assert_eq!(err.failure_class(), "rejected");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn launch_emits_started_then_ended() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let dir = tempfile::tempdir().expect("tempdir");
        let out = dir.path().join("request.json");

        let script = format!("cat > {} && test \"$DBGATTACH_PORT\" = {port}", out.display());
        let (launcher, mut rx) =
            CommandLauncher::new(Some("sh".into()), vec!["-c".into(), script]);
        launcher.launch(&request(port)).await.expect("launch");

        let started = rx.recv().await.expect("started event");
        assert_eq!(started, SessionEvent::Started { port: port.to_string() });
        let ended = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("session ends")
            .expect("ended event");
        assert_eq!(ended, SessionEvent::Ended { port: port.to_string() });

        let written: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&out).expect("request written")).expect("json");
        assert_eq!(written["request"], "attach");
        assert_eq!(written["connect"]["port"], port.to_string());
        assert_eq!(written["justMyCode"], true);
    }
}
