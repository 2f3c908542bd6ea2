//! Launch-configuration hints: probe ports and the preferred attach profile.
//!
//! The launch configuration is an editor-style `launch.json`: JSON with
//! comments and trailing commas. Entries under `configurations` whose
//! `request` is `"attach"` are debug-attach profiles. A missing or malformed
//! file yields empty hints; it never blocks discovery.

use std::path::PathBuf;

use serde_json::{Map, Value};

use dbgattach_core::{DebugProfile, parse_port};

use crate::error::DiscoveryError;

/// Keys lifted into [`DebugProfile`] fields rather than kept as extras.
const PROFILE_KEYS: &[&str] = &["name", "request", "connect", "host", "port", "justMyCode"];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LaunchHints {
    /// Hinted ports in file order, deduplicated.
    pub ports: Vec<String>,
    /// First attach profile in the file.
    pub preferred_profile: Option<DebugProfile>,
}

/// Where hints come from. `None` disables hints entirely.
#[derive(Debug, Clone, Default)]
pub struct HintSource {
    path: Option<PathBuf>,
}

impl HintSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    pub fn none() -> Self {
        Self { path: None }
    }

    /// Read and parse the launch configuration. Every failure yields empty hints.
    pub async fn load(&self) -> LaunchHints {
        let Some(path) = &self.path else {
            return LaunchHints::default();
        };
        let text = match tokio::fs::read_to_string(path).await {
            Ok(text) => text,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "launch config not readable");
                return LaunchHints::default();
            }
        };
        match parse_launch_config(&text) {
            Ok(hints) => hints,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "launch config ignored");
                LaunchHints::default()
            }
        }
    }
}

/// Parse launch-configuration text into hints.
pub fn parse_launch_config(text: &str) -> Result<LaunchHints, DiscoveryError> {
    let root: Value = serde_json::from_str(&strip_jsonc(text))?;
    let mut hints = LaunchHints::default();

    let Some(configs) = root.get("configurations").and_then(Value::as_array) else {
        return Ok(hints);
    };

    for config in configs {
        let Some(obj) = config.as_object() else {
            continue;
        };
        if obj.get("request").and_then(Value::as_str) != Some("attach") {
            continue;
        }
        let port = profile_port(obj);
        if let Some(port) = &port
            && !hints.ports.contains(port)
        {
            hints.ports.push(port.clone());
        }
        if hints.preferred_profile.is_none() {
            hints.preferred_profile = Some(to_profile(obj, port));
        }
    }
    Ok(hints)
}

fn connect_field<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    obj.get("connect")
        .and_then(|c| c.get(key))
        .or_else(|| obj.get(key))
}

/// `connect.port` or `port`, as a number or numeric string.
fn profile_port(obj: &Map<String, Value>) -> Option<String> {
    let raw = match connect_field(obj, "port")? {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        _ => return None,
    };
    parse_port(&raw).ok().map(|p| p.to_string())
}

fn to_profile(obj: &Map<String, Value>, port: Option<String>) -> DebugProfile {
    let extra = obj
        .iter()
        .filter(|(k, _)| !PROFILE_KEYS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    DebugProfile {
        name: obj.get("name").and_then(Value::as_str).map(String::from),
        host: connect_field(obj, "host")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .map(String::from),
        port,
        just_my_code: obj.get("justMyCode").and_then(Value::as_bool),
        extra,
    }
}

/// Drop `//` and `/* */` comments and trailing commas, leaving string
/// literals untouched.
fn strip_jsonc(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut in_string = false;
    let mut escaped = false;

    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '/' if chars.peek() == Some(&'/') => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for next in chars.by_ref() {
                    if prev == '*' && next == '/' {
                        break;
                    }
                    prev = next;
                }
                out.push(' ');
            }
            _ => out.push(c),
        }
    }
    strip_trailing_commas(&out)
}

fn strip_trailing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            out.push(c);
            continue;
        }
        if c == '"' {
            in_string = true;
        } else if c == ',' {
            let next = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
            if matches!(next, Some('}' | ']')) {
                continue;
            }
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const LAUNCH: &str = r#"{
        // VS Code launch configuration
        "version": "0.2.0",
        "configurations": [
            {
                "name": "Run app",
                "type": "debugpy",
                "request": "launch",
                "program": "app.py",
                "port": 4000,
            },
            /* attach profiles */
            {
                "name": "Attach to worker",
                "type": "debugpy",
                "request": "attach",
                "connect": { "host": "127.0.0.1", "port": 5678 },
                "justMyCode": false,
                "pathMappings": [{ "localRoot": "${workspaceFolder}", "remoteRoot": "/app" }],
            },
            {
                "name": "Attach to container",
                "request": "attach",
                "port": "9000",
            },
            {
                "name": "Attach duplicate",
                "request": "attach",
                "connect": { "port": 5678 },
            },
        ],
    }"#;

    #[test]
    fn attach_profiles_give_ports_in_order() {
        let hints = parse_launch_config(LAUNCH).expect("parse");
        assert_eq!(hints.ports, vec!["5678", "9000"]);
    }

    #[test]
    fn first_attach_profile_is_preferred() {
        let hints = parse_launch_config(LAUNCH).expect("parse");
        let profile = hints.preferred_profile.expect("profile");
        assert_eq!(profile.name.as_deref(), Some("Attach to worker"));
        assert_eq!(profile.host.as_deref(), Some("127.0.0.1"));
        assert_eq!(profile.port.as_deref(), Some("5678"));
        assert_eq!(profile.just_my_code, Some(false));
        assert_eq!(profile.extra.get("type"), Some(&Value::from("debugpy")));
        assert!(profile.extra.contains_key("pathMappings"));
        assert!(!profile.extra.contains_key("connect"));
        assert!(!profile.extra.contains_key("request"));
    }

    #[test]
    fn profile_without_host_leaves_host_unset() {
        let hints = parse_launch_config(
            r#"{"configurations":[{"request":"attach","connect":{"port":5678}}]}"#,
        )
        .expect("parse");
        let profile = hints.preferred_profile.expect("profile");
        assert_eq!(profile.host, None);
        assert_eq!(profile.name, None);
    }

    #[test]
    fn invalid_ports_are_not_hinted() {
        let hints = parse_launch_config(
            r#"{"configurations":[
                {"request":"attach","port":"${input:port}"},
                {"request":"attach","port":0},
                {"request":"attach","port":70000}
            ]}"#,
        )
        .expect("parse");
        assert!(hints.ports.is_empty());
        assert!(hints.preferred_profile.is_some());
    }

    #[test]
    fn comment_markers_inside_strings_survive() {
        let text = r#"{"configurations":[{"request":"attach","name":"http://x /* y */","port":5678,}]}"#;
        let hints = parse_launch_config(text).expect("parse");
        let profile = hints.preferred_profile.expect("profile");
        assert_eq!(profile.name.as_deref(), Some("http://x /* y */"));
    }

    #[test]
    fn malformed_config_is_an_error() {
        assert!(parse_launch_config("{ configurations: [").is_err());
    }

    #[test]
    fn missing_configurations_is_empty() {
        let hints = parse_launch_config(r#"{"version":"0.2.0"}"#).expect("parse");
        assert_eq!(hints, LaunchHints::default());
    }

    #[tokio::test]
    async fn load_reads_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("launch.json");
        std::fs::write(&path, LAUNCH).expect("write");
        let hints = HintSource::new(&path).load().await;
        assert_eq!(hints.ports, vec!["5678", "9000"]);
    }

    #[tokio::test]
    async fn load_swallows_missing_and_malformed_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = HintSource::new(dir.path().join("absent.json")).load().await;
        assert_eq!(missing, LaunchHints::default());

        let path = dir.path().join("launch.json");
        std::fs::write(&path, "not json").expect("write");
        let malformed = HintSource::new(&path).load().await;
        assert_eq!(malformed, LaunchHints::default());

        assert_eq!(HintSource::none().load().await, LaunchHints::default());
    }
}
