//! Debug profiles (from launch hints) and the attach request handed to the host.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::CandidateProcess;

/// Host used when a profile does not name one.
pub const DEFAULT_HOST: &str = "localhost";

const DEFAULT_PROFILE_NAME: &str = "Attach";

/// Keys owned by [`AttachRequest`] itself; never copied from profile extras.
const RESERVED_KEYS: &[&str] = &[
    "name",
    "request",
    "connect",
    "justMyCode",
    "pid",
    "host",
    "port",
];

/// User-declared attach profile used as a template for attach requests.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DebugProfile {
    pub name: Option<String>,
    pub host: Option<String>,
    /// Port as written in the profile; replaced by the discovered port.
    pub port: Option<String>,
    pub just_my_code: Option<bool>,
    /// Remaining launch parameters, passed through untouched.
    #[serde(default)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectTarget {
    pub host: String,
    pub port: String,
}

/// Structured attach request for the host debug-launch interface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachRequest {
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub debug_type: Option<String>,
    pub request: String,
    pub connect: ConnectTarget,
    #[serde(rename = "justMyCode")]
    pub just_my_code: bool,
    pub pid: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AttachRequest {
    /// Build a request for `candidate`, using `profile` as the template when present.
    ///
    /// The discovered port always wins over the profile's port; a missing host
    /// falls back to [`DEFAULT_HOST`].
    pub fn from_candidate(candidate: &CandidateProcess, profile: Option<&DebugProfile>) -> Self {
        let base_name = profile
            .and_then(|p| p.name.as_deref())
            .unwrap_or(DEFAULT_PROFILE_NAME);
        let host = profile
            .and_then(|p| p.host.as_deref())
            .filter(|h| !h.trim().is_empty())
            .unwrap_or(DEFAULT_HOST)
            .to_string();
        let mut extra = profile.map(|p| p.extra.clone()).unwrap_or_default();
        extra.retain(|k, _| !RESERVED_KEYS.contains(&k.as_str()));
        let debug_type = extra
            .remove("type")
            .and_then(|v| v.as_str().map(String::from));

        Self {
            name: format!(
                "{base_name} (pid {}, port {})",
                candidate.pid, candidate.port
            ),
            debug_type,
            request: "attach".to_string(),
            connect: ConnectTarget {
                host,
                port: candidate.port.clone(),
            },
            just_my_code: profile.and_then(|p| p.just_my_code).unwrap_or(true),
            pid: candidate.pid.clone(),
            extra,
        }
    }

    pub fn port(&self) -> &str {
        &self.connect.port
    }

    pub fn host(&self) -> &str {
        &self.connect.host
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Provenance;

    fn candidate(port: &str) -> CandidateProcess {
        CandidateProcess {
            pid: "4821".into(),
            port: port.into(),
            owner: "alice".into(),
            is_current_user: true,
            provenance: Provenance::Scanner,
            command_hint: None,
        }
    }

    #[test]
    fn minimal_request_without_profile() {
        let req = AttachRequest::from_candidate(&candidate("5678"), None);
        assert_eq!(req.name, "Attach (pid 4821, port 5678)");
        assert_eq!(req.host(), "localhost");
        assert_eq!(req.port(), "5678");
        assert!(req.just_my_code);
        assert_eq!(req.request, "attach");
        assert!(req.debug_type.is_none());
    }

    #[test]
    fn profile_port_is_replaced_by_discovered_port() {
        let profile = DebugProfile {
            name: Some("Remote API".into()),
            host: Some("127.0.0.1".into()),
            port: Some("9999".into()),
            just_my_code: Some(false),
            extra: Map::new(),
        };
        let req = AttachRequest::from_candidate(&candidate("5678"), Some(&profile));
        assert_eq!(req.port(), "5678");
        assert_eq!(req.host(), "127.0.0.1");
        assert!(!req.just_my_code);
        assert_eq!(req.name, "Remote API (pid 4821, port 5678)");
    }

    #[test]
    fn blank_host_defaults_to_localhost() {
        let profile = DebugProfile {
            host: Some("  ".into()),
            ..DebugProfile::default()
        };
        let req = AttachRequest::from_candidate(&candidate("5678"), Some(&profile));
        assert_eq!(req.host(), DEFAULT_HOST);
    }

    #[test]
    fn extra_parameters_are_flattened() {
        let mut extra = Map::new();
        extra.insert("type".into(), Value::String("debugpy".into()));
        extra.insert(
            "pathMappings".into(),
            serde_json::json!([{"localRoot": ".", "remoteRoot": "/app"}]),
        );
        let profile = DebugProfile {
            extra,
            ..DebugProfile::default()
        };
        let req = AttachRequest::from_candidate(&candidate("5678"), Some(&profile));
        let json = serde_json::to_value(&req).expect("serialize");
        assert_eq!(json["type"], "debugpy");
        assert_eq!(json["justMyCode"], true);
        assert_eq!(json["connect"]["port"], "5678");
        assert_eq!(json["pathMappings"][0]["remoteRoot"], "/app");
    }
}
