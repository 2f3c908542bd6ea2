//! Display helpers for CLI output: candidate table, status summary, truncation.

use serde_json::Value;

/// Widest command column before truncation.
const COMMAND_WIDTH: usize = 60;

const HEADERS: [&str; 6] = ["PORT", "PID", "OWNER", "SOURCE", "STATE", "COMMAND"];

/// Right-truncate `text` to `max_len` characters, appending `…` if truncated.
pub fn truncate(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        text.to_string()
    } else {
        // At least one visible char plus the ellipsis
        let kept: String = text.chars().take(max_len.saturating_sub(1)).collect();
        format!("{kept}\u{2026}")
    }
}

/// Render `list_candidates` rows (or `scan` rows without a state) as a table.
///
/// ```text
/// PORT  PID   OWNER  SOURCE   STATE     COMMAND
/// 5678  4821  alice  scanner  attached  python -m debugpy --listen 5678 app.py
/// ```
pub fn format_candidates(list: &Value) -> String {
    let Some(rows) = list.as_array() else {
        return "--\n".to_string();
    };
    if rows.is_empty() {
        return "no debug processes found\n".to_string();
    }

    let cells: Vec<[String; 6]> = rows
        .iter()
        .map(|row| {
            let owner = match row["is_current_user"].as_bool() {
                Some(false) => format!("{}*", text(&row["owner"])),
                _ => text(&row["owner"]),
            };
            [
                text(&row["port"]),
                text(&row["pid"]),
                owner,
                text(&row["provenance"]),
                text(&row["state"]),
                truncate(&text(&row["command_hint"]), COMMAND_WIDTH),
            ]
        })
        .collect();

    let mut widths = HEADERS.map(str::len);
    for row in &cells {
        for (w, cell) in widths.iter_mut().zip(row) {
            *w = (*w).max(cell.chars().count());
        }
    }

    let mut out = String::new();
    push_row(&mut out, &HEADERS.map(String::from), &widths);
    for row in &cells {
        push_row(&mut out, row, &widths);
    }
    out
}

fn push_row(out: &mut String, cells: &[String; 6], widths: &[usize; 6]) {
    let last = cells.len() - 1;
    let mut line = String::new();
    for (i, (cell, &width)) in cells.iter().zip(widths).enumerate() {
        if i == last {
            line.push_str(cell);
        } else {
            line.push_str(&format!("{cell:<width$}  "));
        }
    }
    out.push_str(line.trim_end());
    out.push('\n');
}

fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "-".to_string(),
        other => other.to_string(),
    }
}

/// Render the `status` result as `key: value` lines.
pub fn format_status(status: &Value) -> String {
    let list = |key: &str| match status[key].as_array() {
        Some(items) if !items.is_empty() => items.iter().map(text).collect::<Vec<_>>().join(", "),
        _ => "-".to_string(),
    };
    let flag = |key: &str| match status[key].as_bool() {
        Some(true) => "yes",
        Some(false) => "no",
        None => "-",
    };

    let mut out = String::new();
    out.push_str(&format!("candidates:      {}\n", text(&status["candidates"])));
    out.push_str(&format!("auto-attach:     {}\n", flag("auto_attach")));
    out.push_str(&format!("polling:         {}\n", flag("polling")));
    out.push_str(&format!("session active:  {}\n", flag("session_active")));
    out.push_str(&format!("connecting:      {}\n", list("connecting")));
    out.push_str(&format!("attached:        {}\n", list("attached")));
    out.push_str(&format!("held locks:      {}\n", list("held_locks")));
    out.push_str(&format!("launch command:  {}\n", flag("launch_configured")));
    out.push_str(&format!("profile:         {}\n", text(&status["preferred_profile"])));
    out.push_str(&format!("lock dir:        {}\n", text(&status["lock_dir"])));
    out.push_str(&format!("last refresh:    {}\n", text(&status["refreshed_at"])));
    out
}
