//! Port extraction from debug-agent command lines.
//!
//! Each platform has an ordered list of patterns; the first pattern that
//! yields a valid port wins. Earlier patterns are strictly more trustworthy.

use std::sync::LazyLock;

use regex::Regex;

use dbgattach_core::{Platform, parse_port};

/// One named pattern; capture group 1 is the port.
struct PortPattern {
    name: &'static str,
    regex: Regex,
}

impl PortPattern {
    fn new(name: &'static str, pattern: &str) -> Self {
        Self {
            name,
            // Patterns are compile-time constants covered by tests.
            regex: Regex::new(pattern).unwrap_or_else(|e| panic!("bad port pattern {name}: {e}")),
        }
    }
}

/// POSIX: only explicit flags are trusted.
static POSIX_PATTERNS: LazyLock<Vec<PortPattern>> = LazyLock::new(|| {
    vec![
        PortPattern::new("port_flag", r"--port[=\s]+(\d+)(?:\s|$)"),
        PortPattern::new(
            "listen_flag",
            r"--listen[=\s]+(?:(?:\[[^\]\s]*\]|[\w.\-]+):)?(\d+)(?:\s|$)",
        ),
    ]
});

/// Windows: quoting differs between launchers, so fall back to looser guesses.
static WINDOWS_PATTERNS: LazyLock<Vec<PortPattern>> = LazyLock::new(|| {
    vec![
        PortPattern::new("port_flag", r#"--port[=\s]+"?(\d+)(?:"|\s|$)"#),
        PortPattern::new("listen_flag", r#"--listen[=\s]+"?(\d+)(?:"|\s|$)"#),
        PortPattern::new("host_port", r":(\d{4,5})\b"),
        PortPattern::new("default_range", r"\b([5-9]\d{3})\b"),
    ]
});

fn patterns(platform: Platform) -> &'static [PortPattern] {
    match platform {
        Platform::Posix => &POSIX_PATTERNS,
        Platform::Windows => &WINDOWS_PATTERNS,
    }
}

/// Extract the debug port from `command`, trying patterns in order.
pub fn extract_port(command: &str, platform: Platform) -> Option<String> {
    for pattern in patterns(platform) {
        for caps in pattern.regex.captures_iter(command) {
            let Some(m) = caps.get(1) else { continue };
            if let Ok(port) = parse_port(m.as_str()) {
                tracing::trace!(pattern = pattern.name, port, "extracted port");
                return Some(port.to_string());
            }
        }
    }
    None
}
