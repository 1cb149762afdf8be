//! Build collaborator interface
//!
//! Packages may need a build step (install, compile) before their plugins
//! are usable. The host treats it as an opaque queue: a package enqueues a
//! request and waits for the matching [`BuildFinished`] event.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::events::Publisher;

/// Default limit for a single build script
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// One queued build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    pub package_name: String,
    pub path: PathBuf,
    pub script: Option<String>,
}

/// Completion event, keyed by package path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildFinished {
    pub path: PathBuf,
    pub success: bool,
    pub error_message: Option<String>,
}

impl BuildFinished {
    /// Successful completion for a path
    #[must_use]
    pub const fn ok(path: PathBuf) -> Self {
        Self {
            path,
            success: true,
            error_message: None,
        }
    }

    /// Failed completion for a path
    pub fn failed(path: PathBuf, message: impl Into<String>) -> Self {
        Self {
            path,
            success: false,
            error_message: Some(message.into()),
        }
    }
}

/// External build step
pub trait BuildQueue: Send + Sync {
    /// Queue a build; completion is reported through [`BuildQueue::finished`]
    fn enqueue(&self, request: BuildRequest);

    /// Completion events
    fn finished(&self) -> &Publisher<BuildFinished>;
}

/// Runs each package's build script with `sh -c`, one build at a time
pub struct ScriptBuildQueue {
    tx: mpsc::UnboundedSender<BuildRequest>,
    finished: Arc<Publisher<BuildFinished>>,
}

impl ScriptBuildQueue {
    /// Start the worker task with the default timeout
    #[must_use]
    pub fn spawn() -> Arc<Self> {
        Self::spawn_with_timeout(DEFAULT_TIMEOUT)
    }

    /// Start the worker task
    #[must_use]
    pub fn spawn_with_timeout(limit: Duration) -> Arc<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<BuildRequest>();
        let finished = Arc::new(Publisher::new());

        let events = Arc::clone(&finished);
        tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                let outcome = match &request.script {
                    Some(script) => run_script(&request.path, script, limit).await,
                    None => Ok(()),
                };

                let event = match outcome {
                    Ok(()) => {
                        tracing::info!(package = %request.package_name, "build finished");
                        BuildFinished::ok(request.path)
                    }
                    Err(message) => {
                        tracing::warn!(
                            package = %request.package_name,
                            error = %message,
                            "build failed"
                        );
                        BuildFinished::failed(request.path, message)
                    }
                };
                events.emit(&event);
            }
        });

        Arc::new(Self { tx, finished })
    }
}

impl BuildQueue for ScriptBuildQueue {
    fn enqueue(&self, request: BuildRequest) {
        tracing::debug!(package = %request.package_name, "queued build");
        if let Err(e) = self.tx.send(request) {
            let request = e.0;
            self.finished.emit(&BuildFinished::failed(
                request.path,
                "build worker is not running",
            ));
        }
    }

    fn finished(&self) -> &Publisher<BuildFinished> {
        &self.finished
    }
}

impl std::fmt::Debug for ScriptBuildQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptBuildQueue").finish_non_exhaustive()
    }
}

async fn run_script(dir: &Path, script: &str, limit: Duration) -> Result<(), String> {
    let child = Command::new("sh")
        .arg("-c")
        .arg(script)
        .current_dir(dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| format!("failed to spawn build: {e}"))?;

    let output = timeout(limit, child.wait_with_output())
        .await
        .map_err(|_| format!("build timed out after {limit:?}"))?
        .map_err(|e| format!("build execution failed: {e}"))?;

    if output.status.success() {
        return Ok(());
    }

    let code = output.status.code().unwrap_or(-1);
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();
    if stderr.is_empty() {
        Err(format!("build exited with code {code}"))
    } else {
        Err(format!("build exited with code {code}: {stderr}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn build_once(script: Option<&str>) -> BuildFinished {
        let dir = tempfile::tempdir().unwrap();
        let queue = ScriptBuildQueue::spawn();
        let (tx, mut rx) = mpsc::unbounded_channel();
        queue.finished().forward_to(tx);

        queue.enqueue(BuildRequest {
            package_name: "pkg".to_string(),
            path: dir.path().to_path_buf(),
            script: script.map(ToString::to_string),
        });
        rx.recv().await.unwrap()
    }

    #[tokio::test]
    async fn no_script_succeeds() {
        let finished = build_once(None).await;
        assert!(finished.success);
    }

    #[tokio::test]
    async fn failing_script_reports_stderr() {
        let finished = build_once(Some("echo broken >&2; exit 3")).await;
        assert!(!finished.success);
        let message = finished.error_message.unwrap();
        assert!(message.contains("code 3"), "{message}");
        assert!(message.contains("broken"), "{message}");
    }

    #[tokio::test]
    async fn script_runs_in_package_dir() {
        let finished = build_once(Some("touch built && test -f built")).await;
        assert!(finished.success);
    }
}
