use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use tempfile::TempDir;
use tokio::process::Command;
use tokio::sync::Mutex;

use crate::error::{Error, Result};

pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(300);

/// Stderr kept in a `Command` error is cut to this many bytes.
const MAX_STDERR_BYTES: usize = 4096;

/// External tools are spawned one at a time across the whole process.
static SPAWN_LOCK: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

/// Runs external tools with a timeout. A child that outlives the timeout is
/// killed.
#[derive(Debug, Clone)]
pub struct ToolRunner {
    timeout: Duration,
    temp_dir: Option<PathBuf>,
}

impl ToolRunner {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            temp_dir: None,
        }
    }

    /// Creates per-run working directories under `dir` instead of the
    /// system temp directory.
    #[must_use]
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// A fresh working directory, removed when dropped.
    pub fn workdir(&self) -> Result<TempDir> {
        let dir = match &self.temp_dir {
            Some(base) => {
                std::fs::create_dir_all(base)?;
                tempfile::Builder::new().prefix("voltcore-").tempdir_in(base)?
            }
            None => tempfile::Builder::new().prefix("voltcore-").tempdir()?,
        };
        Ok(dir)
    }

    /// Runs `program` in `dir` and returns its stdout.
    pub async fn run<I, S>(&self, program: &str, args: I, dir: &Path) -> Result<Vec<u8>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = {
            let _guard = SPAWN_LOCK.lock().await;
            cmd.spawn()
                .map_err(|e| Error::Command(format!("failed to start {program}: {e}")))?
        };

        tracing::debug!("Started {} in {}", program, dir.display());

        // Dropping the wait future on timeout drops the child, which kills it.
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                tracing::warn!("{} timed out after {}s", program, self.timeout.as_secs());
                Error::Timeout(self.timeout)
            })??;

        if !output.status.success() {
            let end = output.stderr.len().min(MAX_STDERR_BYTES);
            let stderr = String::from_utf8_lossy(&output.stderr[..end]);
            let stderr = stderr.trim();
            return Err(Error::Command(if stderr.is_empty() {
                format!("{program} exited with {}", output.status)
            } else {
                format!("{program}: {stderr}")
            }));
        }

        Ok(output.stdout)
    }
}

impl Default for ToolRunner {
    fn default() -> Self {
        Self::new(DEFAULT_TOOL_TIMEOUT)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_captures_stdout() {
        let runner = ToolRunner::default();
        let dir = runner.workdir().unwrap();
        let out = runner.run("echo", ["hello"], dir.path()).await.unwrap();
        assert_eq!(String::from_utf8_lossy(&out).trim(), "hello");
    }

    #[tokio::test]
    async fn test_non_zero_exit_carries_stderr() {
        let runner = ToolRunner::default();
        let dir = runner.workdir().unwrap();
        let err = runner
            .run("sh", ["-c", "echo broken >&2; exit 3"], dir.path())
            .await
            .unwrap_err();
        match err {
            Error::Command(message) => assert!(message.contains("broken")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_kills_child() {
        let runner = ToolRunner::new(Duration::from_millis(200));
        let dir = runner.workdir().unwrap();
        let started = std::time::Instant::now();
        let err = runner.run("sleep", ["5"], dir.path()).await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let runner = ToolRunner::default();
        let dir = runner.workdir().unwrap();
        let err = runner
            .run("voltcore-no-such-tool", Vec::<&str>::new(), dir.path())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "command_failed");
    }

    #[test]
    fn test_workdir_is_removed_on_drop() {
        let base = TempDir::new().unwrap();
        let runner = ToolRunner::default().with_temp_dir(base.path());
        let dir = runner.workdir().unwrap();
        let path = dir.path().to_path_buf();
        std::fs::write(path.join("scratch"), b"x").unwrap();
        drop(dir);
        assert!(!path.exists());
    }
}
