//! Invoking user's name, used for ownership comparison and lock scoping.

/// `$USER`, then `$USERNAME` (Windows), then `$LOGNAME`; `"unknown"` if none is set.
pub fn current_username() -> String {
    ["USER", "USERNAME", "LOGNAME"]
        .iter()
        .find_map(|key| std::env::var(key).ok().filter(|v| !v.trim().is_empty()))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Real uid of this process; `None` where uids do not exist.
pub fn current_uid() -> Option<u32> {
    #[cfg(unix)]
    {
        // SAFETY: getuid() has no arguments, no side effects, and cannot fail.
        unsafe extern "C" {
            safe fn getuid() -> u32;
        }
        Some(getuid())
    }
    #[cfg(not(unix))]
    {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_empty() {
        assert!(!current_username().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn uid_known_on_unix() {
        assert!(current_uid().is_some());
    }
}
