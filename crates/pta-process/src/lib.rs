//! Detached process spawning for the wrapper launcher.
//!
//! The wrapper launcher needs to start a process that outlives the agent:
//! once spawned, the parent must not reap it, wait on it, or keep it tied
//! to its own process group. This crate isolates that platform-specific
//! plumbing so the launcher itself only deals with paths, argv, and env.

use std::{collections::HashMap, ffi::OsString, io, path::PathBuf};

#[cfg(windows)]
mod job_object;

/// A process to spawn, detached from the caller.
#[derive(Debug, Clone)]
pub struct DetachedCommand {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub env: HashMap<String, String>,
    pub current_dir: PathBuf,
    pub stdin: Stdio,
    pub stdout: PathBuf,
    pub stderr: PathBuf,
}

/// Where the child's stdin comes from.
#[derive(Debug, Clone)]
pub enum Stdio {
    Closed,
    File(PathBuf),
}

/// A handle to a spawned, detached child.
///
/// Dropping this handle does not kill or wait on the child: on Unix the
/// child lives in its own session and is simply forgotten; on Windows it
/// runs inside a job object the parent does not hold open past spawn.
pub struct DetachedChild {
    pid: u32,
}

impl DetachedChild {
    pub fn pid(&self) -> u32 {
        self.pid
    }
}

/// Spawn `cmd`, detached from the current process group/session, and
/// immediately release the OS handle so the parent never reaps it.
///
/// This mirrors the `setsid`-in-`pre_exec` approach used for normal
/// (non-pty) child spawns: the child is placed in its own session before
/// `exec`, so it survives the parent's exit without becoming a zombie
/// under the parent's control.
pub fn spawn_detached(cmd: DetachedCommand) -> io::Result<DetachedChild> {
    let mut command = tokio::process::Command::new(&cmd.program);
    command
        .args(&cmd.args)
        .current_dir(&cmd.current_dir)
        .envs(&cmd.env)
        .kill_on_drop(false);

    match &cmd.stdin {
        Stdio::Closed => {
            command.stdin(std::process::Stdio::null());
        }
        Stdio::File(path) => {
            let file = std::fs::File::open(path)?;
            command.stdin(std::process::Stdio::from(file));
        }
    }

    let stdout_file = std::fs::File::create(&cmd.stdout)?;
    let stderr_file = std::fs::File::create(&cmd.stderr)?;
    command.stdout(std::process::Stdio::from(stdout_file));
    command.stderr(std::process::Stdio::from(stderr_file));

    #[cfg(unix)]
    {
        use nix::unistd::setsid;
        unsafe {
            command.pre_exec(move || {
                setsid()?;
                Ok(())
            });
        }
    }

    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        // CREATE_NEW_PROCESS_GROUP: detach the child from the parent's console
        // process group so Ctrl-C delivered to the parent does not propagate.
        const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
        command.creation_flags(CREATE_NEW_PROCESS_GROUP);
    }

    let child = command.spawn()?;
    let pid = child.id().ok_or_else(|| {
        io::Error::other("spawned child exited before its pid could be read")
    })?;

    #[cfg(windows)]
    {
        if let Ok(job) = job_object::JobObject::new() {
            // Best-effort: assigning failure just means cleanup on kill won't
            // cascade to grandchildren, it does not affect the handshake.
            let _ = job.assign(pid);
            // The job carries no limit flags (see job_object.rs), so closing
            // our handle to it here neither kills nor detaches the child;
            // the child's lifetime was never tied to the agent's in the
            // first place.
            drop(job);
        }
    }

    // Drop the tokio handle without waiting: this releases our reference
    // to the child without reaping it or sending any signal.
    std::mem::drop(child);

    Ok(DetachedChild { pid })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_command(program: &str, dir: &std::path::Path) -> DetachedCommand {
        DetachedCommand {
            program: PathBuf::from(program),
            args: vec![],
            env: HashMap::new(),
            current_dir: dir.to_path_buf(),
            stdin: Stdio::Closed,
            stdout: dir.join("stdout"),
            stderr: dir.join("stderr"),
        }
    }

    #[tokio::test]
    async fn spawns_and_redirects_output() {
        let dir = tempfile::tempdir().unwrap();
        #[cfg(unix)]
        let mut cmd = base_command("/bin/echo", dir.path());
        #[cfg(unix)]
        {
            cmd.args = vec!["hello".into()];
        }
        #[cfg(unix)]
        {
            let child = spawn_detached(cmd).unwrap();
            assert!(child.pid() > 0);
            // give the child a moment to run and flush its output file
            for _ in 0..50 {
                if std::fs::metadata(dir.path().join("stdout"))
                    .map(|m| m.len() > 0)
                    .unwrap_or(false)
                {
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            }
            let out = std::fs::read_to_string(dir.path().join("stdout")).unwrap();
            assert_eq!(out.trim(), "hello");
        }
    }
}
