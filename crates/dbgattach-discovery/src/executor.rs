//! CommandRunner trait and ProcessExecutor (async subprocess wrapper).

use std::future::Future;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;

use crate::error::DiscoveryError;

/// Default cap on captured stdout.
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 1024 * 1024;

/// Runs an external command and returns its stdout. Enables mock injection for testing.
pub trait CommandRunner: Send + Sync {
    fn run(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
    ) -> impl Future<Output = Result<String, DiscoveryError>> + Send;
}

impl<T: CommandRunner> CommandRunner for &T {
    fn run(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
    ) -> impl Future<Output = Result<String, DiscoveryError>> + Send {
        (**self).run(program, args, timeout)
    }
}

impl<T: CommandRunner> CommandRunner for std::sync::Arc<T> {
    fn run(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
    ) -> impl Future<Output = Result<String, DiscoveryError>> + Send {
        (**self).run(program, args, timeout)
    }
}

/// Real executor using `tokio::process::Command`.
///
/// The child is killed when the timeout fires or the output cap is exceeded.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    max_output_bytes: usize,
}

impl ProcessExecutor {
    pub fn new() -> Self {
        Self {
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }

    #[must_use]
    pub fn with_max_output_bytes(mut self, max: usize) -> Self {
        self.max_output_bytes = max;
        self
    }
}

impl Default for ProcessExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRunner for ProcessExecutor {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<String, DiscoveryError> {
        let mut child = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| DiscoveryError::CommandFailed(format!("{program}: no stdout")))?;
        let cap = self.max_output_bytes;

        let collect = async {
            let mut buf = Vec::new();
            // One byte past the cap tells us the output was truncated.
            (&mut stdout)
                .take(cap as u64 + 1)
                .read_to_end(&mut buf)
                .await?;
            if buf.len() > cap {
                return Err(DiscoveryError::OutputTooLarge(cap));
            }
            let status = child.wait().await?;
            Ok::<_, DiscoveryError>((buf, status))
        };

        let (buf, status) = tokio::time::timeout(timeout, collect)
            .await
            .map_err(|_| DiscoveryError::Timeout(timeout))??;

        if !status.success() {
            return Err(DiscoveryError::CommandFailed(format!(
                "{program}: exit code {}",
                status.code().unwrap_or(-1)
            )));
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}
