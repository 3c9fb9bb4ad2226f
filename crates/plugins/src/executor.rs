//! Out-of-process plugin invocation.
//!
//! A plugin binary must, when invoked as `<binary> send-metadata`, print
//! its metadata document to stdout as JSON and exit 0. The uninstall hook
//! is `<binary> uninstall`. Anything else a binary does — non-zero exit,
//! hanging past the deadline, unparseable output — classifies it as not a
//! valid plugin; the underlying cause is logged, never surfaced to
//! business logic.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use strato_types::PluginMetadata;

use crate::error::{PluginError, PluginResult};

/// Argument a candidate binary is invoked with to request its metadata.
pub const METADATA_ARG: &str = "send-metadata";

/// Argument an installed binary is invoked with before removal.
pub const UNINSTALL_ARG: &str = "uninstall";

/// Runs candidate plugin binaries out of process.
#[async_trait]
pub trait PluginExecutor: Send + Sync {
    /// Extract the binary's self-reported metadata.
    async fn extract_metadata(&self, path: &Path) -> PluginResult<PluginMetadata>;

    /// Invoke the binary's uninstall hook.
    async fn invoke_uninstall_hook(&self, path: &Path) -> PluginResult<()>;
}

/// [`PluginExecutor`] that spawns the binary as a child process with a
/// wall-clock deadline.
#[derive(Debug, Clone)]
pub struct SubprocessExecutor {
    timeout: Duration,
}

impl SubprocessExecutor {
    pub fn new() -> Self {
        Self { timeout: Duration::from_secs(30) }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Run `<path> <arg>` to completion within the deadline.
    ///
    /// Returns the process stdout on exit 0; `Err(detail)` for spawn
    /// failures, non-zero exits, and timeouts. Dropping the timed-out
    /// future kills the child.
    async fn run(&self, path: &Path, arg: &str) -> Result<Vec<u8>, String> {
        let invocation = async {
            let output = Command::new(path)
                .arg(arg)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .output()
                .await
                .map_err(|e| format!("spawn failed: {e}"))?;
            if !output.status.success() {
                return Err(format!("exited with {}", output.status));
            }
            Ok(output.stdout)
        };

        tokio::time::timeout(self.timeout, invocation)
            .await
            .map_err(|_| format!("timed out after {}s", self.timeout.as_secs()))?
    }
}

impl Default for SubprocessExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PluginExecutor for SubprocessExecutor {
    async fn extract_metadata(&self, path: &Path) -> PluginResult<PluginMetadata> {
        let invalid = || PluginError::InvalidBinary { path: path.to_path_buf() };

        let stdout = self.run(path, METADATA_ARG).await.map_err(|detail| {
            debug!(path = %path.display(), %detail, "metadata invocation failed");
            invalid()
        })?;

        let metadata: PluginMetadata = serde_json::from_slice(&stdout).map_err(|e| {
            debug!(path = %path.display(), error = %e, "metadata output undecodable");
            invalid()
        })?;

        if metadata.name.trim().is_empty() {
            debug!(path = %path.display(), "metadata declares no plugin name");
            return Err(invalid());
        }
        Ok(metadata)
    }

    async fn invoke_uninstall_hook(&self, path: &Path) -> PluginResult<()> {
        self.run(path, UNINSTALL_ARG)
            .await
            .map(|_| ())
            .map_err(|detail| PluginError::UninstallHookFailed { detail })
    }
}
