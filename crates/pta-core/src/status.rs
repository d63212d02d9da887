//! Status Observer (spec §4.F): reads the spool's well-known files to
//! answer whether a task ran, whether it is complete, how long it has
//! run, and what it produced. Read-only; never writes to the spool.

use std::time::SystemTime;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::spool::{
    spool_file, SpoolError, SpoolManager, TASK_EXITCODE, TASK_STDERR, TASK_STDOUT, WRAPPER_PID,
    WRAPPER_STDERR,
};

#[derive(Debug, Error)]
pub enum StatusError {
    #[error("task {0:?} has not been requested")]
    NotRequested(String),
    #[error("spool error: {0}")]
    Spool(#[from] SpoolError),
    #[error("io error reading spool: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub spool: std::path::PathBuf,
    pub stdout: String,
    pub stderr: String,
    pub exitcode: i32,
    pub runtime: chrono::Duration,
    pub start_time: DateTime<Utc>,
    pub wrapper_spawned: bool,
    pub wrapper_error: String,
    pub wrapper_pid: Option<u32>,
    pub completed: bool,
}

pub struct StatusObserver {
    spool: SpoolManager,
}

impl StatusObserver {
    pub fn new(spool: SpoolManager) -> Self {
        Self { spool }
    }

    async fn read_to_string_or_empty(path: &std::path::Path) -> std::io::Result<String> {
        match tokio::fs::read_to_string(path).await {
            Ok(contents) => Ok(contents),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(err) => Err(err),
        }
    }

    async fn file_len(path: &std::path::Path) -> Option<u64> {
        tokio::fs::metadata(path).await.ok().map(|m| m.len())
    }

    async fn mtime(path: &std::path::Path) -> Option<SystemTime> {
        tokio::fs::metadata(path).await.ok().and_then(|m| m.modified().ok())
    }

    pub async fn is_complete(&self, requestid: &str) -> Result<bool, StatusError> {
        let spool = self.spool.path(requestid)?;
        let stderr_len = Self::file_len(&spool_file(&spool, WRAPPER_STDERR)).await;
        let exitcode_len = Self::file_len(&spool_file(&spool, TASK_EXITCODE)).await;
        Ok(stderr_len.is_some_and(|n| n > 0) || exitcode_len.is_some_and(|n| n > 0))
    }

    async fn runtime(&self, requestid: &str, completed: bool) -> Result<chrono::Duration, StatusError> {
        let spool = self.spool.path(requestid)?;
        let pid_mtime = Self::mtime(&spool_file(&spool, WRAPPER_PID)).await;
        let exitcode_mtime = Self::mtime(&spool_file(&spool, TASK_EXITCODE)).await;

        let elapsed = match (completed, exitcode_mtime, pid_mtime) {
            (true, Some(exit_mtime), Some(start)) => exit_mtime
                .duration_since(start)
                .unwrap_or_default(),
            (true, _, _) => std::time::Duration::ZERO,
            (false, _, Some(start)) => SystemTime::now().duration_since(start).unwrap_or_default(),
            (false, _, None) => std::time::Duration::ZERO,
        };
        Ok(chrono::Duration::from_std(elapsed).unwrap_or(chrono::Duration::zero()))
    }

    /// Populate the full status record for `requestid`. Requires the
    /// spool to exist; a task that was never requested has no status.
    pub async fn status(&self, requestid: &str) -> Result<Status, StatusError> {
        if !self.spool.exists(requestid).await? {
            return Err(StatusError::NotRequested(requestid.to_string()));
        }
        let spool = self.spool.path(requestid)?;

        let stdout = Self::read_to_string_or_empty(&spool_file(&spool, TASK_STDOUT)).await?;
        let stderr = Self::read_to_string_or_empty(&spool_file(&spool, TASK_STDERR)).await?;
        let wrapper_error = Self::read_to_string_or_empty(&spool_file(&spool, WRAPPER_STDERR)).await?;

        let exitcode = match tokio::fs::read_to_string(spool_file(&spool, TASK_EXITCODE)).await {
            Ok(contents) => contents.trim().parse::<i32>().unwrap_or(127),
            Err(_) => 127,
        };

        let wrapper_pid = match tokio::fs::read_to_string(spool_file(&spool, WRAPPER_PID)).await {
            Ok(contents) => contents.trim().parse::<u32>().ok(),
            Err(_) => None,
        };

        let start_time = match Self::mtime(&spool_file(&spool, WRAPPER_PID)).await {
            Some(mtime) => DateTime::<Utc>::from(mtime),
            None => DateTime::<Utc>::from(SystemTime::UNIX_EPOCH),
        };

        let mut completed = self.is_complete(requestid).await?;
        if !wrapper_error.is_empty() {
            completed = true;
        }
        let runtime = self.runtime(requestid, completed).await?;

        let wrapper_spawned = Self::file_len(&spool_file(&spool, WRAPPER_STDERR))
            .await
            .is_some_and(|n| n == 0);

        Ok(Status {
            spool,
            stdout,
            stderr,
            exitcode,
            runtime,
            start_time,
            wrapper_spawned,
            wrapper_error,
            wrapper_pid,
            completed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn write(path: &std::path::Path, contents: &str) {
        tokio::fs::write(path, contents).await.unwrap();
    }

    #[tokio::test]
    async fn status_errors_when_task_was_never_requested() {
        let dir = tempfile::tempdir().unwrap();
        let observer = StatusObserver::new(SpoolManager::new(dir.path()));
        let err = observer.status("never-requested").await.unwrap_err();
        assert!(matches!(err, StatusError::NotRequested(_)));
    }

    #[tokio::test]
    async fn incomplete_task_reports_default_exitcode_and_not_completed() {
        let dir = tempfile::tempdir().unwrap();
        let spool_manager = SpoolManager::new(dir.path());
        let spool = spool_manager.create("r1").await.unwrap();
        write(&spool_file(&spool, WRAPPER_PID), "4242").await;

        let observer = StatusObserver::new(SpoolManager::new(dir.path()));
        let status = observer.status("r1").await.unwrap();
        assert!(!status.completed);
        assert_eq!(status.exitcode, 127);
        assert_eq!(status.wrapper_pid, Some(4242));
    }

    #[tokio::test]
    async fn completed_task_reads_stdout_stderr_and_exitcode() {
        let dir = tempfile::tempdir().unwrap();
        let spool_manager = SpoolManager::new(dir.path());
        let spool = spool_manager.create("r2").await.unwrap();
        write(&spool_file(&spool, WRAPPER_PID), "100").await;
        write(&spool_file(&spool, TASK_STDOUT), "hello\n").await;
        write(&spool_file(&spool, TASK_EXITCODE), "0").await;

        let observer = StatusObserver::new(SpoolManager::new(dir.path()));
        let status = observer.status("r2").await.unwrap();
        assert!(status.completed);
        assert_eq!(status.exitcode, 0);
        assert_eq!(status.stdout, "hello\n");
    }

    #[tokio::test]
    async fn nonzero_exitcode_file_marks_complete() {
        let dir = tempfile::tempdir().unwrap();
        let spool_manager = SpoolManager::new(dir.path());
        let spool = spool_manager.create("r3").await.unwrap();
        write(&spool_file(&spool, WRAPPER_PID), "100").await;
        write(&spool_file(&spool, TASK_EXITCODE), "1").await;

        let observer = StatusObserver::new(SpoolManager::new(dir.path()));
        assert!(observer.is_complete("r3").await.unwrap());
    }

    #[tokio::test]
    async fn wrapper_level_failure_forces_completed_and_zero_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let spool_manager = SpoolManager::new(dir.path());
        let spool = spool_manager.create("r4").await.unwrap();
        write(&spool_file(&spool, WRAPPER_PID), "100").await;
        write(&spool_file(&spool, WRAPPER_STDERR), "exec format error").await;

        let observer = StatusObserver::new(SpoolManager::new(dir.path()));
        let status = observer.status("r4").await.unwrap();
        assert!(status.completed);
        assert_eq!(status.wrapper_error, "exec format error");
        assert_eq!(status.runtime, chrono::Duration::zero());
    }
}
