// Windows Job Object wrapper, used only to make sure a detached wrapper's
// own children can be grouped and queried as a unit if something ever needs
// to reason about the whole tree. No limit flags are set on the job —
// in particular, never `JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE`: that flag
// kills every assigned process when the job's last handle closes, which
// happens unconditionally when this agent process exits (normally, on
// crash, or when killed), since the agent never hands its handle to
// anything else. Setting it would kill the very wrapper this code spawns
// as detached the moment the agent that spawned it goes away, which is
// exactly the invariant detachment exists to avoid (see the crate-level
// docs). The job handle is closed like any other resource, on `Drop`;
// because no limit flags are set, closing it does not touch the assigned
// process.

use std::io;

use windows_sys::Win32::{
    Foundation::{CloseHandle, HANDLE},
    System::{
        JobObjects::{AssignProcessToJobObject, CreateJobObjectW},
        Threading::{OpenProcess, PROCESS_SET_QUOTA, PROCESS_TERMINATE},
    },
};

pub struct JobObject {
    handle: HANDLE,
}

// SAFETY: job object handles may be used from any thread.
unsafe impl Send for JobObject {}
unsafe impl Sync for JobObject {}

impl JobObject {
    pub fn new() -> io::Result<Self> {
        unsafe {
            let handle = CreateJobObjectW(std::ptr::null(), std::ptr::null());
            if handle.is_null() {
                return Err(io::Error::last_os_error());
            }
            Ok(Self { handle })
        }
    }

    pub fn assign(&self, pid: u32) -> io::Result<()> {
        unsafe {
            let process = OpenProcess(PROCESS_SET_QUOTA | PROCESS_TERMINATE, 0, pid);
            if process.is_null() {
                return Err(io::Error::last_os_error());
            }
            let result = AssignProcessToJobObject(self.handle, process);
            CloseHandle(process);
            if result == 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        }
    }
}

impl Drop for JobObject {
    fn drop(&mut self) {
        unsafe {
            CloseHandle(self.handle);
        }
    }
}
