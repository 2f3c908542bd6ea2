//! UDS JSON-RPC server: minimal hand-rolled implementation.
//! Connection-per-request, newline-delimited JSON.

use std::sync::Arc;

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use dbgattach_core::parse_port;
use dbgattach_discovery::Discover;

use crate::daemon::DaemonState;
use crate::engine::AutoAttachEngine;
use crate::launcher::DebugLauncher;

const PARSE_ERROR: i64 = -32700;
const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;
/// Application error: the attach attempt itself failed.
const ATTACH_FAILED: i64 = -32000;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RpcError {
    code: i64,
    message: String,
    data: Option<Value>,
}

impl RpcError {
    fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    fn to_json(&self) -> Value {
        let mut err = json!({"code": self.code, "message": self.message});
        if let Some(data) = &self.data {
            err["data"] = data.clone();
        }
        err
    }
}

/// Run the UDS JSON-RPC server until `cancel` fires.
pub async fn run_server<D, L>(
    socket_path: &str,
    state: Arc<Mutex<DaemonState>>,
    engine: Arc<AutoAttachEngine<D, L>>,
    cancel: CancellationToken,
) -> anyhow::Result<()>
where
    D: Discover + 'static,
    L: DebugLauncher + 'static,
{
    // Create socket directory with mode 0700
    let socket_dir = std::path::Path::new(socket_path)
        .parent()
        .ok_or_else(|| anyhow::anyhow!("invalid socket path"))?;

    std::fs::create_dir_all(socket_dir)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(socket_dir, std::fs::Permissions::from_mode(0o700))?;
    }

    // Check for stale socket
    if std::path::Path::new(socket_path).exists() {
        if tokio::net::UnixStream::connect(socket_path).await.is_err() {
            std::fs::remove_file(socket_path)?;
            tracing::info!("removed stale socket at {socket_path}");
        } else {
            anyhow::bail!("another daemon is already running at {socket_path}");
        }
    }

    let listener = UnixListener::bind(socket_path)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
    }

    tracing::info!("UDS server listening on {socket_path}");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, _) = accepted?;
                let state = Arc::clone(&state);
                let engine = Arc::clone(&engine);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, state, engine).await {
                        tracing::debug!("connection error: {e}");
                    }
                });
            }
            () = cancel.cancelled() => {
                tracing::debug!("UDS server: cancellation requested");
                break;
            }
        }
    }
    Ok(())
}

async fn handle_connection<D, L>(
    stream: tokio::net::UnixStream,
    state: Arc<Mutex<DaemonState>>,
    engine: Arc<AutoAttachEngine<D, L>>,
) -> anyhow::Result<()>
where
    D: Discover + 'static,
    L: DebugLauncher + 'static,
{
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    reader.read_line(&mut line).await?;

    let response = match serde_json::from_str::<Value>(line.trim()) {
        Ok(request) => {
            let method = request["method"].as_str().unwrap_or("");
            let id = request["id"].clone();
            match dispatch(method, &request["params"], &state, &engine).await {
                Ok(result) => json!({"jsonrpc": "2.0", "result": result, "id": id}),
                Err(err) => json!({"jsonrpc": "2.0", "error": err.to_json(), "id": id}),
            }
        }
        Err(e) => {
            let err = RpcError::new(PARSE_ERROR, format!("parse error: {e}"));
            json!({"jsonrpc": "2.0", "error": err.to_json(), "id": Value::Null})
        }
    };

    let mut resp = serde_json::to_string(&response)?;
    resp.push('\n');
    writer.write_all(resp.as_bytes()).await?;
    Ok(())
}

/// Route one request to its handler.
pub(crate) async fn dispatch<D, L>(
    method: &str,
    params: &Value,
    state: &Arc<Mutex<DaemonState>>,
    engine: &Arc<AutoAttachEngine<D, L>>,
) -> Result<Value, RpcError>
where
    D: Discover + 'static,
    L: DebugLauncher + 'static,
{
    match method {
        "list_candidates" => Ok(build_candidate_list(state, engine).await),
        "status" => Ok(build_status(state, engine).await),
        "attach" => {
            let port = port_param(params)?
                .ok_or_else(|| RpcError::new(INVALID_PARAMS, "missing param: port"))?;
            match engine.attach_port(&port).await {
                Ok(()) => Ok(json!({"port": port, "state": engine.state_of(&port).await})),
                Err(e) => Err(RpcError {
                    code: ATTACH_FAILED,
                    message: e.to_string(),
                    data: Some(json!({"failure_class": e.failure_class(), "port": port})),
                }),
            }
        }
        "activity" => {
            engine.mark_user_activity().await;
            Ok(json!({"ok": true}))
        }
        "session_started" => {
            let port = port_param(params)?;
            engine.on_session_start(port.as_deref()).await;
            Ok(json!({"ok": true}))
        }
        "session_ended" => {
            let port = port_param(params)?;
            engine.on_session_end(port.as_deref()).await;
            Ok(json!({"ok": true}))
        }
        _ => Err(RpcError::new(METHOD_NOT_FOUND, "method not found")),
    }
}

/// Optional `port` param as a number or numeric string; invalid values are rejected.
fn port_param(params: &Value) -> Result<Option<String>, RpcError> {
    let raw = match &params["port"] {
        Value::Null => return Ok(None),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => {
            return Err(RpcError::new(INVALID_PARAMS, format!("invalid port: {other}")));
        }
    };
    parse_port(&raw)
        .map(|p| Some(p.to_string()))
        .map_err(|e| RpcError::new(INVALID_PARAMS, e.to_string()))
}

/// Latest visible candidates, each with its attach state.
pub(crate) async fn build_candidate_list<D, L>(
    state: &Arc<Mutex<DaemonState>>,
    engine: &Arc<AutoAttachEngine<D, L>>,
) -> Value
where
    D: Discover + 'static,
    L: DebugLauncher + 'static,
{
    let candidates = state.lock().await.candidates.clone();
    let states = engine.states_for(&candidates).await;
    let rows: Vec<Value> = candidates
        .iter()
        .map(|c| {
            json!({
                "pid": c.pid,
                "port": c.port,
                "owner": c.owner,
                "is_current_user": c.is_current_user,
                "provenance": c.provenance,
                "command_hint": c.command_hint,
                "state": states.get(&c.port).copied().unwrap_or_default(),
            })
        })
        .collect();
    Value::Array(rows)
}

pub(crate) async fn build_status<D, L>(
    state: &Arc<Mutex<DaemonState>>,
    engine: &Arc<AutoAttachEngine<D, L>>,
) -> Value
where
    D: Discover + 'static,
    L: DebugLauncher + 'static,
{
    let snapshot = engine.snapshot().await;
    let held: Vec<String> = engine
        .lock()
        .held()
        .await
        .into_iter()
        .map(|h| h.port)
        .collect();
    let st = state.lock().await;
    json!({
        "started_at": st.started_at,
        "refreshed_at": st.refreshed_at,
        "candidates": st.candidates.len(),
        "preferred_profile": st.preferred_profile,
        "auto_attach": st.auto_attach,
        "launch_configured": st.launch_configured,
        "polling": snapshot.polling,
        "session_active": snapshot.session_active,
        "connecting": snapshot.connecting,
        "attached": snapshot.attached,
        "held_locks": held,
        "lock_dir": st.lock_dir.display().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::rpc_call;
    use crate::engine::EngineConfig;
    use dbgattach_core::{AttachError, AttachRequest, CandidateProcess, Provenance};
    use dbgattach_discovery::DiscoveryCycle;
    use dbgattach_lock::PortLock;
    use std::path::PathBuf;

    struct FixedDiscovery(Vec<CandidateProcess>);

    impl Discover for FixedDiscovery {
        async fn discover(&self) -> DiscoveryCycle {
            DiscoveryCycle {
                candidates: self.0.clone(),
                preferred_profile: None,
            }
        }
    }

    /// Refuses port 5679, accepts everything else.
    struct PickyLauncher;

    impl DebugLauncher for PickyLauncher {
        async fn launch(&self, request: &AttachRequest) -> Result<(), AttachError> {
            if request.port() == "5679" {
                return Err(AttachError::ConnectionRefused {
                    host: request.host().to_string(),
                    port: request.port().to_string(),
                });
            }
            Ok(())
        }
    }

    fn cand(port: &str, mine: bool) -> CandidateProcess {
        CandidateProcess {
            pid: format!("1{port}"),
            port: port.into(),
            owner: if mine { "alice".into() } else { "root".into() },
            is_current_user: mine,
            provenance: if mine { Provenance::Scanner } else { Provenance::Probe },
            command_hint: Some("python -m debugpy".into()),
        }
    }

    type TestEngine = AutoAttachEngine<FixedDiscovery, PickyLauncher>;

    fn setup(dir: &std::path::Path) -> (Arc<Mutex<DaemonState>>, Arc<TestEngine>) {
        let candidates = vec![cand("5678", true), cand("5679", true), cand("9000", false)];
        let mut state = DaemonState::new(PathBuf::from(dir));
        state.candidates = candidates.clone();
        let engine = AutoAttachEngine::new(
            FixedDiscovery(candidates),
            PickyLauncher,
            Arc::new(PortLock::new(dir)),
            EngineConfig::default(),
        );
        (Arc::new(Mutex::new(state)), Arc::new(engine))
    }

    #[tokio::test]
    async fn list_candidates_includes_attach_state() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (state, engine) = setup(dir.path());
        engine.tick().await;

        let list = dispatch("list_candidates", &Value::Null, &state, &engine)
            .await
            .expect("ok");
        let arr = list.as_array().expect("array");
        assert_eq!(arr.len(), 3);
        assert_eq!(arr[0]["port"], "5678");
        assert_eq!(arr[0]["state"], "attached");
        assert_eq!(arr[0]["provenance"], "scanner");
        assert_eq!(arr[2]["state"], "unseen");
        assert_eq!(arr[2]["provenance"], "probe");
    }

    #[tokio::test]
    async fn attach_reports_failure_class() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (state, engine) = setup(dir.path());

        let err = dispatch("attach", &json!({"port": 5679}), &state, &engine)
            .await
            .expect_err("refused");
        assert_eq!(err.code, ATTACH_FAILED);
        assert_eq!(
            err.data.as_ref().map(|d| d["failure_class"].clone()),
            Some(json!("connection_refused"))
        );

        let ok = dispatch("attach", &json!({"port": "9000"}), &state, &engine)
            .await
            .expect("attached");
        assert_eq!(ok["state"], "attached");
    }

    #[tokio::test]
    async fn attach_validates_port() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (state, engine) = setup(dir.path());

        for params in [json!({}), json!({"port": "abc"}), json!({"port": 0}), json!({"port": [1]})] {
            let err = dispatch("attach", &params, &state, &engine)
                .await
                .expect_err("invalid");
            assert_eq!(err.code, INVALID_PARAMS, "params {params}");
        }
    }

    #[tokio::test]
    async fn session_notifications_gate_the_engine() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (state, engine) = setup(dir.path());

        dispatch("session_started", &json!({"port": "5678"}), &state, &engine)
            .await
            .expect("ok");
        let status = dispatch("status", &Value::Null, &state, &engine).await.expect("ok");
        assert_eq!(status["session_active"], true);

        dispatch("session_ended", &json!({}), &state, &engine)
            .await
            .expect("ok");
        let status = dispatch("status", &Value::Null, &state, &engine).await.expect("ok");
        assert_eq!(status["session_active"], false);
        assert_eq!(status["candidates"], 3);
    }

    #[tokio::test]
    async fn activity_writes_heartbeat() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (state, engine) = setup(dir.path());
        dispatch("activity", &Value::Null, &state, &engine)
            .await
            .expect("ok");
        let heartbeat = dir
            .path()
            .join(format!("heartbeat-{}.json", engine.lock().owner_token()));
        assert!(heartbeat.exists());
    }

    #[tokio::test]
    async fn unknown_method() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (state, engine) = setup(dir.path());
        let err = dispatch("nope", &Value::Null, &state, &engine)
            .await
            .expect_err("unknown");
        assert_eq!(err.code, METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn serves_over_unix_socket() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (state, engine) = setup(dir.path());
        let socket = dir.path().join("run").join("d.sock");
        let socket = socket.to_str().expect("utf8 path").to_string();
        let cancel = CancellationToken::new();

        let server = tokio::spawn({
            let socket = socket.clone();
            let cancel = cancel.clone();
            async move { run_server(&socket, state, engine, cancel).await }
        });
        for _ in 0..50 {
            if std::path::Path::new(&socket).exists() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        let list = rpc_call(&socket, "list_candidates", Value::Null)
            .await
            .expect("rpc");
        assert_eq!(list.as_array().map(Vec::len), Some(3));

        let err = rpc_call(&socket, "attach", json!({"port": "5679"}))
            .await
            .expect_err("refused");
        assert!(err.to_string().contains("connection refused"), "{err}");

        cancel.cancel();
        server.await.expect("join").expect("clean shutdown");
    }
}
