//! UDS JSON-RPC client for CLI subcommands.

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use crate::display;

pub(crate) async fn rpc_call(
    socket_path: &str,
    method: &str,
    params: Value,
) -> anyhow::Result<Value> {
    let stream = UnixStream::connect(socket_path)
        .await
        .map_err(|e| anyhow::anyhow!("cannot connect to daemon at {socket_path}: {e}"))?;

    let (reader, mut writer) = stream.into_split();

    let params = if params.is_null() {
        serde_json::json!({})
    } else {
        params
    };
    let request = serde_json::json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params,
        "id": 1,
    });
    let mut req = serde_json::to_string(&request)?;
    req.push('\n');
    writer.write_all(req.as_bytes()).await?;
    writer.shutdown().await?;

    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    reader.read_line(&mut line).await?;

    let response: Value = serde_json::from_str(line.trim())?;

    if let Some(error) = response.get("error") {
        anyhow::bail!("RPC error: {error}");
    }

    Ok(response["result"].clone())
}

/// `dbgattach ls`: candidates known to the daemon, with attach state.
pub async fn cmd_ls(socket_path: &str, json: bool) -> anyhow::Result<()> {
    let list = rpc_call(socket_path, "list_candidates", Value::Null).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&list)?);
    } else {
        print!("{}", display::format_candidates(&list));
    }
    Ok(())
}

pub async fn cmd_status(socket_path: &str) -> anyhow::Result<()> {
    let status = rpc_call(socket_path, "status", Value::Null).await?;
    print!("{}", display::format_status(&status));
    Ok(())
}

/// `dbgattach attach <port>`: manual attach; failures surface as errors.
pub async fn cmd_attach(socket_path: &str, port: &str) -> anyhow::Result<()> {
    dbgattach_core::parse_port(port)?;
    match rpc_call(socket_path, "attach", serde_json::json!({"port": port})).await {
        Ok(_) => {
            println!("attached to port {port}");
            Ok(())
        }
        Err(e) => Err(anyhow::anyhow!("attach to port {port} failed: {e}")),
    }
}

pub async fn cmd_activity(socket_path: &str) -> anyhow::Result<()> {
    rpc_call(socket_path, "activity", Value::Null).await?;
    Ok(())
}

/// Forward a host session notification (`session_started` / `session_ended`).
pub async fn cmd_session(socket_path: &str, method: &str, port: Option<&str>) -> anyhow::Result<()> {
    let params = match port {
        Some(port) => {
            dbgattach_core::parse_port(port)?;
            serde_json::json!({"port": port})
        }
        None => Value::Null,
    };
    rpc_call(socket_path, method, params).await?;
    Ok(())
}
