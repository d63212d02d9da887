//! Spool Manager (spec §4.D): the per-request directory layout that the
//! launcher and status observer treat as a small filesystem state machine.

use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpoolError {
    #[error("invalid request id {id:?}: {reason}")]
    InvalidRequestId { id: String, reason: &'static str },
    #[error("io error on spool directory: {0}")]
    Io(#[from] std::io::Error),
}

/// Reject (never rewrite) a request id that could escape the spool root or
/// collide with directory-structure syntax. Bytes are compared as given;
/// no Unicode normalization is performed.
fn validate_request_id(id: &str) -> Result<(), SpoolError> {
    let reason = if id.is_empty() {
        Some("must not be empty")
    } else if id.contains('/') || id.contains('\\') {
        Some("must not contain a path separator")
    } else if id.contains('\0') {
        Some("must not contain a NUL byte")
    } else if id == "." || id == ".." {
        Some("must not contain a parent-directory reference")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(SpoolError::InvalidRequestId {
            id: id.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

/// Per-request spool directories rooted at a single configured path.
pub struct SpoolManager {
    root: PathBuf,
}

impl SpoolManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The directory a validated request id maps to.
    pub fn path(&self, requestid: &str) -> Result<PathBuf, SpoolError> {
        validate_request_id(requestid)?;
        Ok(self.root.join(requestid))
    }

    /// `mkdir -p` at mode 0o750. Does not pre-create any of the well-known
    /// state files; those are written by the launcher and the wrapper.
    pub async fn create(&self, requestid: &str) -> Result<PathBuf, SpoolError> {
        let path = self.path(requestid)?;
        tokio::fs::create_dir_all(&path).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o750)).await?;
        }
        Ok(path)
    }

    pub async fn exists(&self, requestid: &str) -> Result<bool, SpoolError> {
        let path = self.path(requestid)?;
        Ok(tokio::fs::metadata(&path).await.is_ok())
    }
}

pub const WRAPPER_STDIN: &str = "wrapper_stdin";
pub const WRAPPER_STDOUT: &str = "wrapper_stdout";
pub const WRAPPER_STDERR: &str = "wrapper_stderr";
pub const WRAPPER_PID: &str = "wrapper_pid";
pub const TASK_STDOUT: &str = "stdout";
pub const TASK_STDERR: &str = "stderr";
pub const TASK_EXITCODE: &str = "exitcode";

pub fn spool_file(spool: &Path, name: &str) -> PathBuf {
    spool.join(name)
}
