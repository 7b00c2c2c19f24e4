//! Worker process supervision.
//!
//! One child process per driver instance, with a fixed stdio topology:
//! stdin is a pipe the driver writes frames into, stdout and stderr are
//! inherited from the parent (there is no response channel yet; replies
//! would need a second pipe mirroring the request framing).

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::{Child, Command};

#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("failed to spawn worker: {0}")]
    Spawn(#[from] io::Error),

    /// The child came up without a piped stdin. Only reachable with a
    /// misbehaving [`WorkerSpawner`] implementation.
    #[error("worker stdin not captured")]
    StdinNotCaptured,
}

/// Extension point for different worker spawn strategies.
///
/// Spawn failure must be synchronous and leave no stream or process handle
/// partially open; implementations built on [`Command::spawn`] get this for
/// free.
pub trait WorkerSpawner: Send + Sync {
    fn spawn(&self) -> Result<Child, SpawnError>;
}

/// Default spawner: runs the configured executable with no arguments.
#[derive(Debug, Clone)]
pub struct ExecSpawner {
    worker_path: PathBuf,
}

impl ExecSpawner {
    pub fn new(worker_path: impl Into<PathBuf>) -> Self {
        Self {
            worker_path: worker_path.into(),
        }
    }

    pub fn worker_path(&self) -> &Path {
        &self.worker_path
    }
}

impl WorkerSpawner for ExecSpawner {
    fn spawn(&self) -> Result<Child, SpawnError> {
        let child = Command::new(&self.worker_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()?;
        Ok(child)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawn_failure_is_synchronous() {
        let spawner = ExecSpawner::new("/nonexistent/iobridge-test-worker");
        let err = spawner.spawn().unwrap_err();
        assert!(matches!(err, SpawnError::Spawn(_)));
    }

    #[tokio::test]
    async fn spawned_worker_has_piped_stdin() {
        let spawner = ExecSpawner::new("/bin/true");
        let mut child = spawner.spawn().unwrap();

        assert!(child.stdin.is_some());
        child.wait().await.unwrap();
    }
}
