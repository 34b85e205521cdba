//! Spawning and reaping the worker process.

use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use tracing::{debug, warn};
use webproc_common::WORKER_METHOD;

pub const WORKER_PATH_ENV: &str = "WEBPROC_WORKER_PATH";

#[cfg(windows)]
const WORKER_FILE: &str = "webproc_worker.exe";
#[cfg(not(windows))]
const WORKER_FILE: &str = "webproc_worker";

/// A running (or exited, not yet reaped) worker process.
pub struct WorkerProcess {
    child: Child,
}

impl WorkerProcess {
    /// Starts the worker with nothing but the bootstrap method and connection
    /// key on its command line. The caller's own arguments never leak in.
    pub fn spawn(worker_path: &Path, connection_key: &str) -> io::Result<Self> {
        debug!("running worker at {worker_path:?}");
        Self::launch(worker_command(worker_path, connection_key))
    }

    fn launch(mut command: Command) -> io::Result<Self> {
        let child = command.spawn()?;
        Ok(Self { child })
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Non-blocking liveness check.
    pub fn is_running(&mut self) -> bool {
        match self.child.try_wait() {
            Ok(None) => true,
            Ok(Some(_)) => false,
            Err(e) => {
                warn!(pid = self.child.id(), "failed to query worker status: {e}");
                false
            }
        }
    }

    /// Kills the worker. Does nothing if it already exited.
    pub fn terminate(&mut self) -> io::Result<()> {
        if !self.is_running() {
            return Ok(());
        }
        debug!(pid = self.child.id(), "terminating worker");
        match self.child.kill() {
            // Lost the race with a natural exit.
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => Ok(()),
            other => other,
        }
    }

    /// Blocks until the worker exits.
    pub fn join(&mut self) -> io::Result<ExitStatus> {
        self.child.wait()
    }
}

fn worker_command(worker_path: &Path, connection_key: &str) -> Command {
    let mut command = Command::new(worker_path);
    command
        .arg(WORKER_METHOD)
        .arg(connection_key)
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());
    command
}

/// Finds the worker binary: explicit path, then `WEBPROC_WORKER_PATH`, then
/// next to the running executable.
pub fn resolve_worker_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    if let Some(path) = std::env::var_os(WORKER_PATH_ENV) {
        return Some(PathBuf::from(path));
    }

    let exe_path = std::env::current_exe().ok()?;
    let dir = exe_path.parent()?;
    let candidate = dir.join(WORKER_FILE);
    if candidate.exists() {
        return Some(candidate);
    }

    // Cargo puts test and example binaries one directory below the worker.
    if dir.file_name().map(OsStr::new) == Some(OsStr::new("deps"))
        || dir.file_name().map(OsStr::new) == Some(OsStr::new("examples"))
    {
        let candidate = dir.parent()?.join(WORKER_FILE);
        if candidate.exists() {
            return Some(candidate);
        }
    }

    // We do not do PATH lookup.
    None
}
