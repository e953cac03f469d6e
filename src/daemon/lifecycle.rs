//! Start, stop and inspect the daemon process itself.

use anyhow::{Context, Result};
use std::fs::{self, OpenOptions};
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::client::DaemonClient;
use super::pid::{self, PidFile, StopResult};
use super::protocol::{Outcome, Request};
use crate::clienv::{EnvVar, Paths};
use crate::settings::Timings;

const READY_POLL_INTERVAL: Duration = Duration::from_millis(100);
const READY_POLL_ATTEMPTS: u32 = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonStart {
    AlreadyRunning { pid: Option<i32> },
    Started { pid: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonStop {
    NotRunning,
    StalePidFile { pid: i32 },
    Stopped { pid: i32, forced: bool },
}

#[derive(Debug, Clone)]
pub struct DaemonStatus {
    pub pid: Option<i32>,
    pub stale_pid_removed: bool,
    pub ping: Outcome,
}

impl DaemonStatus {
    pub fn is_running(&self) -> bool {
        self.ping.is_success()
    }
}

/// Launch `svcpkg daemon run` detached and wait until it answers `ping`.
pub async fn start(paths: &Paths) -> Result<DaemonStart> {
    let client = DaemonClient::new(&paths.socket_path);
    let pid_file = PidFile::new(&paths.daemon_pid_path);

    if client.is_running().await {
        return Ok(DaemonStart::AlreadyRunning {
            pid: pid_file.running_pid()?,
        });
    }

    if let Some(parent) = paths.daemon_log_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&paths.daemon_log_path)
        .with_context(|| format!("Failed to open {}", paths.daemon_log_path.display()))?;
    let log_err = log.try_clone()?;

    let exe = std::env::current_exe().context("Failed to locate svcpkg executable")?;
    let mut child = Command::new(&exe)
        .args(["daemon", "run"])
        .env(EnvVar::SvcpkgHome.as_str(), &paths.home)
        .env(EnvVar::SvcpkgSocket.as_str(), &paths.socket_path)
        .env(EnvVar::SvcpkgDaemonPid.as_str(), &paths.daemon_pid_path)
        .env(EnvVar::SvcpkgDaemonLog.as_str(), &paths.daemon_log_path)
        .stdin(Stdio::null())
        .stdout(log)
        .stderr(log_err)
        .process_group(0)
        .spawn()
        .with_context(|| format!("Failed to spawn {}", exe.display()))?;
    let child_pid = child.id();
    info!(pid = child_pid, "Daemon process spawned");

    for _ in 0..READY_POLL_ATTEMPTS {
        tokio::time::sleep(READY_POLL_INTERVAL).await;
        if client.is_running().await {
            return Ok(DaemonStart::Started { pid: child_pid });
        }
        if let Some(status) = child.try_wait()? {
            anyhow::bail!(
                "Daemon exited during startup ({}); see {}",
                status,
                paths.daemon_log_path.display()
            );
        }
    }

    anyhow::bail!(
        "Daemon did not answer within {:?}; see {}",
        READY_POLL_INTERVAL * READY_POLL_ATTEMPTS,
        paths.daemon_log_path.display()
    )
}

/// SIGTERM the daemon named by its PID file, escalating to SIGKILL.
pub async fn stop(paths: &Paths, timings: &Timings) -> Result<DaemonStop> {
    let pid_file = PidFile::new(&paths.daemon_pid_path);
    let Some(pid) = pid_file.read()? else {
        pid_file.discard();
        return Ok(DaemonStop::NotRunning);
    };

    if !pid::is_process_running(pid) {
        warn!(pid, "Removing stale daemon PID file");
        pid_file.discard();
        return Ok(DaemonStop::StalePidFile { pid });
    }

    let result = pid::terminate(pid, timings)
        .await
        .with_context(|| format!("Failed to signal daemon (PID {pid})"))?;
    debug!(pid, ?result, "Daemon terminate finished");

    // A killed daemon leaves its PID file and socket behind.
    pid_file.discard();
    if result == StopResult::Forced && paths.socket_path.exists() {
        if let Err(e) = fs::remove_file(&paths.socket_path) {
            warn!("Failed to remove socket {}: {}", paths.socket_path.display(), e);
        }
    }

    Ok(match result {
        StopResult::AlreadyGone => DaemonStop::StalePidFile { pid },
        StopResult::Graceful => DaemonStop::Stopped { pid, forced: false },
        StopResult::Forced => DaemonStop::Stopped { pid, forced: true },
    })
}

/// Reconcile the daemon PID file with the process table, then ping.
pub async fn status(paths: &Paths) -> Result<DaemonStatus> {
    let pid_file = PidFile::new(&paths.daemon_pid_path);
    let recorded = pid_file.read()?;
    let pid = recorded.filter(|pid| pid::is_process_running(*pid));

    let stale_pid_removed = pid_file.exists() && pid.is_none();
    if stale_pid_removed {
        warn!(pid = ?recorded, "Removing stale daemon PID file");
        pid_file.discard();
    }

    let ping = DaemonClient::new(&paths.socket_path)
        .send(&Request::Ping)
        .await;
    Ok(DaemonStatus {
        pid,
        stale_pid_removed,
        ping,
    })
}
