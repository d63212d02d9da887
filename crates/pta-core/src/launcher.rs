//! Wrapper Launcher (spec §4.E): spawns the platform wrapper detached,
//! feeds it a JSON description of the real command to run, and waits for
//! the handshake that confirms it came up.
//!
//! Caching (downloading files so `IsCached` holds) is a precondition here,
//! not something this component performs; the caller runs the artifact
//! cache first (§2 data flow: B → A → C → D → E → F).

use std::{collections::HashMap, path::PathBuf, time::Duration};

use pta_process::{spawn_detached, DetachedCommand, Stdio};
use pta_transport::HttpTransport;
use serde::Serialize;
use thiserror::Error;

use crate::cache::{ArtifactCache, CacheError};
use crate::model::TaskDescriptor;
use crate::planner::{self, Platform, PlannerError, PlannerRoots};
use crate::spool::{
    spool_file, SpoolError, SpoolManager, TASK_EXITCODE, TASK_STDERR, TASK_STDOUT, WRAPPER_PID,
    WRAPPER_STDERR, WRAPPER_STDIN, WRAPPER_STDOUT,
};
use crate::status::{Status, StatusError, StatusObserver};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum LauncherError {
    #[error("wrapper executable does not exist at {0}")]
    WrapperMissing(String),
    #[error("task files are not fully cached")]
    NotCached,
    #[error("request {0:?} has already been requested")]
    AlreadyRequested(String),
    #[error("command planning failed: {0}")]
    Planner(#[from] PlannerError),
    #[error("artifact cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("spool error: {0}")]
    Spool(#[from] SpoolError),
    #[error("status error: {0}")]
    Status(#[from] StatusError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to serialize wrapper payload: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// The JSON object written to `wrapper_stdin`; mirrors the wrapper's
/// documented stdin contract exactly.
#[derive(Debug, Serialize)]
struct WrapperPayload {
    executable: String,
    arguments: Vec<String>,
    input: Option<String>,
    stdout: String,
    stderr: String,
    exitcode: String,
}

pub struct WrapperLauncher<T: HttpTransport> {
    cache: ArtifactCache<T>,
    spool: SpoolManager,
    status: StatusObserver,
    roots: PlannerRoots,
    platform: Platform,
}

impl<T: HttpTransport> WrapperLauncher<T> {
    pub fn new(
        cache: ArtifactCache<T>,
        spool_root: impl Into<PathBuf>,
        roots: PlannerRoots,
        platform: Platform,
    ) -> Self {
        let spool_root = spool_root.into();
        Self {
            cache,
            spool: SpoolManager::new(spool_root.clone()),
            status: StatusObserver::new(SpoolManager::new(spool_root)),
            roots,
            platform,
        }
    }

    /// Run `descriptor` under `requestid`. If `wait` is true, blocks
    /// (asynchronously) until the task completes before returning status;
    /// otherwise returns as soon as the spawn handshake succeeds.
    pub async fn run(
        &self,
        requestid: &str,
        descriptor: &TaskDescriptor,
        wait: bool,
    ) -> Result<Status, LauncherError> {
        let wrapper_path = self.roots.wrapper_path(self.platform);
        if tokio::fs::metadata(&wrapper_path).await.is_err() {
            return Err(LauncherError::WrapperMissing(wrapper_path));
        }

        for file in &descriptor.files {
            if !self.cache.is_cached(file).await {
                return Err(LauncherError::NotCached);
            }
        }

        if self.spool.exists(requestid).await? {
            return Err(LauncherError::AlreadyRequested(requestid.to_string()));
        }

        let plan = planner::plan(descriptor, self.platform, &self.roots)?;
        let spool = self.spool.create(requestid).await?;

        let task_stdout = spool_file(&spool, TASK_STDOUT);
        let task_stderr = spool_file(&spool, TASK_STDERR);
        let task_exitcode = spool_file(&spool, TASK_EXITCODE);

        let (executable, arguments) = plan
            .argv
            .split_first()
            .map(|(first, rest)| (first.clone(), rest.to_vec()))
            .expect("planner never produces an empty argv");

        let payload = WrapperPayload {
            executable,
            arguments,
            input: plan.stdin.clone(),
            stdout: task_stdout.to_string_lossy().into_owned(),
            stderr: task_stderr.to_string_lossy().into_owned(),
            exitcode: task_exitcode.to_string_lossy().into_owned(),
        };

        let wrapper_stdin_path = spool_file(&spool, WRAPPER_STDIN);
        tokio::fs::write(&wrapper_stdin_path, serde_json::to_vec(&payload)?).await?;

        let wrapper_stdout_path = spool_file(&spool, WRAPPER_STDOUT);
        let wrapper_stderr_path = spool_file(&spool, WRAPPER_STDERR);

        let cwd = if cfg!(windows) {
            PathBuf::from(r"C:\")
        } else {
            PathBuf::from("/")
        };

        let env: HashMap<String, String> = plan.environment.into_iter().collect();

        let command = DetachedCommand {
            program: PathBuf::from(&wrapper_path),
            args: vec![],
            env,
            current_dir: cwd,
            stdin: Stdio::File(wrapper_stdin_path),
            stdout: wrapper_stdout_path.clone(),
            stderr: wrapper_stderr_path,
        };

        let child = spawn_detached(command)?;

        // Spawn handshake: the wrapper's own stdout file only appears once
        // it has executed far enough to open its log.
        while tokio::fs::metadata(&wrapper_stdout_path).await.is_err() {
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        let wrapper_pid_path = spool_file(&spool, WRAPPER_PID);
        tokio::fs::write(&wrapper_pid_path, child.pid().to_string()).await?;

        if wait {
            while !self.status.is_complete(requestid).await? {
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        }

        Ok(self.status.status(requestid).await?)
    }
}
