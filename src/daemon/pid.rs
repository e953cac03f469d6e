//! PID files, liveness probes and the SIGTERM → SIGKILL escalation shared by
//! service supervision and the daemon wrapper.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};

use crate::settings::Timings;

#[derive(Debug, Clone)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// PID recorded in the file. `Ok(None)` when the file is absent or holds
    /// something that is not a positive decimal PID.
    pub fn read(&self) -> io::Result<Option<i32>> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(content.trim().parse::<i32>().ok().filter(|pid| *pid > 0)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Write `pid` via a sibling temp file and rename.
    pub fn write(&self, pid: u32) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp = PathBuf::from(tmp_name);
        fs::write(&tmp, format!("{pid}\n"))?;
        fs::rename(&tmp, &self.path)?;
        trace!(path = %self.path.display(), pid, "PID file written");
        Ok(())
    }

    pub fn remove(&self) -> io::Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Remove the file, logging instead of failing.
    pub fn discard(&self) {
        if let Err(e) = self.remove() {
            warn!(path = %self.path.display(), "Failed to remove PID file: {}", e);
        }
    }

    /// PID of the live process named by the file, if any.
    pub fn running_pid(&self) -> io::Result<Option<i32>> {
        Ok(self.read()?.filter(|pid| is_process_running(*pid)))
    }
}

/// Signal-0 probe. A process owned by someone else (`EPERM`) still exists.
pub fn is_process_running(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    let rc = unsafe { libc::kill(pid, 0) };
    if rc == 0 {
        return true;
    }
    io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Terminate,
    Kill,
}

impl Signal {
    fn as_raw(self) -> libc::c_int {
        match self {
            Signal::Terminate => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
        }
    }
}

/// Deliver `signal` to `pid`. `ESRCH` surfaces as `ErrorKind::NotFound`.
pub fn send_signal(pid: i32, signal: Signal) -> io::Result<()> {
    if pid <= 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("refusing to signal pid {pid}"),
        ));
    }
    let rc = unsafe { libc::kill(pid, signal.as_raw()) };
    if rc == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        return Err(io::Error::new(io::ErrorKind::NotFound, err));
    }
    Err(err)
}

/// Deliver `signal` to the whole process group when `pid` leads its own group,
/// otherwise to `pid` alone. The caller's own group is never targeted.
pub fn send_group_signal(pid: i32, signal: Signal) -> io::Result<()> {
    if pid <= 1 {
        return send_signal(pid, signal);
    }
    let (pgid, own_pgid) = unsafe { (libc::getpgid(pid), libc::getpgrp()) };
    if pgid != pid || pgid == own_pgid {
        return send_signal(pid, signal);
    }
    let rc = unsafe { libc::kill(-pid, signal.as_raw()) };
    if rc == 0 {
        trace!(pgid = pid, ?signal, "Signalled process group");
        return Ok(());
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        return Err(io::Error::new(io::ErrorKind::NotFound, err));
    }
    Err(err)
}

/// How [`terminate`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopResult {
    /// The PID was already gone when SIGTERM was sent.
    AlreadyGone,
    /// Exited within the polling window after SIGTERM.
    Graceful,
    /// Survived every poll and was sent SIGKILL.
    Forced,
}

/// SIGTERM, poll `stop_poll_attempts` times every `stop_poll_interval`, then
/// SIGKILL and wait `kill_wait`.
///
/// Signals go to the process group led by `pid` (see [`send_group_signal`]),
/// so children a service forked are stopped with it. Liveness is judged on the
/// leader alone.
pub async fn terminate(pid: i32, timings: &Timings) -> io::Result<StopResult> {
    match send_group_signal(pid, Signal::Terminate) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(StopResult::AlreadyGone),
        Err(e) => return Err(e),
    }

    for attempt in 1..=timings.stop_poll_attempts {
        tokio::time::sleep(timings.stop_poll_interval).await;
        if !is_process_running(pid) {
            debug!(pid, attempt, "Process exited after SIGTERM");
            return Ok(StopResult::Graceful);
        }
    }

    warn!(pid, "Process ignored SIGTERM, sending SIGKILL");
    match send_group_signal(pid, Signal::Kill) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(StopResult::Graceful),
        Err(e) => return Err(e),
    }
    tokio::time::sleep(timings.kill_wait).await;
    Ok(StopResult::Forced)
}
