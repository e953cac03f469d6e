use serde_json::{json, Value};
use std::fs::{self, OpenOptions};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use super::pid::{self, PidFile, StopResult};
use super::protocol::Outcome;
use crate::error::{ErrorKind, PkgError};
use crate::settings::Timings;
use crate::store::{ConfigStore, Document, ServiceRecord, ServiceStatus};

/// Owns the lifecycle of every registered service.
///
/// Public operations load the configuration document, act, and persist it.
/// The `*_in` variants act on a document the caller already holds so the
/// installer can fold service transitions into its own single save. All of
/// them expect the caller to hold [`ConfigStore::lock`].
#[derive(Debug, Clone)]
pub struct ServiceSupervisor {
    store: ConfigStore,
    timings: Timings,
}

/// Live view of one service after reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Probe {
    pub status: ServiceStatus,
    pub pid: Option<i32>,
}

impl ServiceSupervisor {
    pub fn new(store: ConfigStore, timings: Timings) -> Self {
        Self { store, timings }
    }

    pub async fn start(&self, name: &str) -> Outcome {
        let mut doc = self.store.load();
        let outcome = self.start_in(&mut doc, name).await;
        self.persist(&doc, outcome)
    }

    pub async fn stop(&self, name: &str) -> Outcome {
        let mut doc = self.store.load();
        let outcome = self.stop_in(&mut doc, name).await;
        self.persist(&doc, outcome)
    }

    /// Stop, pause, start. A failed stop is returned as-is.
    pub async fn restart(&self, name: &str) -> Outcome {
        let stopped = self.stop(name).await;
        if stopped.is_error() {
            return stopped;
        }
        tokio::time::sleep(self.timings.restart_pause).await;
        self.start(name).await
    }

    pub async fn status(&self, name: &str) -> Outcome {
        let mut doc = self.store.load();
        let outcome = match self.status_in(&mut doc, name) {
            Ok(probe) => status_outcome(name, probe),
            Err(e) => e.into(),
        };
        self.persist(&doc, outcome)
    }

    /// Reconcile every registered service and report the refreshed set.
    pub async fn list_services(&self) -> Outcome {
        let mut doc = self.store.load();
        let names: Vec<String> = doc.services.keys().cloned().collect();
        let mut entries: Vec<Value> = Vec::with_capacity(names.len());

        for name in &names {
            match self.status_in(&mut doc, name) {
                Ok(probe) => entries.push(service_entry(name, probe)),
                Err(e) => warn!(service = %name, "Failed to refresh status: {}", e),
            }
        }

        let message = if entries.is_empty() {
            "No services registered.".to_string()
        } else {
            format!("{} service(s) registered", entries.len())
        };
        let outcome = Outcome::success(message).with("services", entries);
        self.persist(&doc, outcome)
    }

    /// Probe the PID file and correct the cached status. A dead PID's file is
    /// removed.
    pub(crate) fn status_in(&self, doc: &mut Document, name: &str) -> Result<Probe, PkgError> {
        let record = doc
            .services
            .get_mut(name)
            .ok_or_else(|| PkgError::NotAService(name.to_string()))?;
        Ok(reconcile(record))
    }

    pub(crate) async fn start_in(&self, doc: &mut Document, name: &str) -> Outcome {
        let record = match doc.services.get_mut(name) {
            Some(record) => record,
            None => return PkgError::NotAService(name.to_string()).into(),
        };

        let was_running = record.status.is_running();
        let probe = reconcile(record);
        if let Some(pid) = probe.pid {
            return Outcome::info(format!("Service {name} is already running"))
                .with("name", name)
                .with("pid", pid);
        }
        if was_running {
            info!(service = %name, "Cached status said running but no live process, starting anew");
        }

        match self.spawn(record).await {
            Ok(pid) => {
                record.status = ServiceStatus::Running;
                info!(service = %name, pid, "Service started");
                Outcome::success(format!("Service {name} started with PID {pid}"))
                    .with("name", name)
                    .with("pid", pid)
            }
            Err(e) => {
                error!(service = %name, "Failed to start service: {}", e);
                e.into()
            }
        }
    }

    pub(crate) async fn stop_in(&self, doc: &mut Document, name: &str) -> Outcome {
        let record = match doc.services.get_mut(name) {
            Some(record) => record,
            None => return PkgError::NotAService(name.to_string()).into(),
        };
        let pid_file = PidFile::new(&record.pid_file);

        if !pid_file.exists() {
            record.status = ServiceStatus::Stopped;
            return Outcome::info(format!("Service {name} is not running")).with("name", name);
        }

        let pid = match pid_file.read() {
            Ok(Some(pid)) => pid,
            Ok(None) => {
                warn!(service = %name, "PID file holds no valid PID, removing it");
                pid_file.discard();
                record.status = ServiceStatus::Stopped;
                return Outcome::success(format!(
                    "Service {name} was not running (stale PID file removed)"
                ))
                .with("name", name);
            }
            Err(e) => {
                return Outcome::error(
                    ErrorKind::Storage,
                    format!("Failed to read PID file for {name}: {e}"),
                )
            }
        };

        info!(service = %name, pid, "Stopping service");
        let result = match pid::terminate(pid, &self.timings).await {
            Ok(result) => result,
            Err(e) => {
                error!(service = %name, pid, "Failed to signal service: {}", e);
                return Outcome::error(
                    ErrorKind::ServerError,
                    format!("Failed to stop service {name} (PID {pid}): {e}"),
                );
            }
        };

        pid_file.discard();
        record.status = ServiceStatus::Stopped;

        let message = match result {
            StopResult::AlreadyGone => {
                format!("Service {name} was not running (stale PID file removed)")
            }
            StopResult::Graceful => format!("Service {name} stopped"),
            StopResult::Forced => {
                warn!(service = %name, pid, "Service forcefully stopped");
                format!("Service {name} forcefully stopped")
            }
        };
        Outcome::success(message).with("name", name).with("pid", pid)
    }

    /// Launch the executable detached in its own process group with output
    /// appended to the service log, write its PID file, wait the settle
    /// delay and confirm it is still alive.
    async fn spawn(&self, record: &ServiceRecord) -> Result<i32, PkgError> {
        let name = &record.name;
        for path in [&record.pid_file, &record.log_file] {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
        }

        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&record.log_file)?;
        let log_err = log.try_clone()?;

        let mut cmd = Command::new(&record.executable);
        cmd.args(&record.args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .process_group(0);
        if let Some(dir) = record.executable.parent() {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| PkgError::StartFailed {
            name: name.clone(),
            reason: format!("{}: {}", record.executable.display(), e),
        })?;
        let pid = child.id().ok_or_else(|| PkgError::StartFailed {
            name: name.clone(),
            reason: "process exited before its PID could be read".into(),
        })? as i32;

        let pid_file = PidFile::new(&record.pid_file);
        if let Err(e) = pid_file.write(pid as u32) {
            let _ = child.start_kill();
            return Err(PkgError::StartFailed {
                name: name.clone(),
                reason: format!("could not write PID file: {e}"),
            });
        }

        // Reap the child so an exited service never lingers as a zombie.
        let reaped_name = name.clone();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => debug!(service = %reaped_name, %status, "Service process exited"),
                Err(e) => warn!(service = %reaped_name, "Failed to wait on service process: {}", e),
            }
        });

        tokio::time::sleep(self.timings.start_settle).await;

        if pid_file.exists() && pid::is_process_running(pid) {
            Ok(pid)
        } else {
            pid_file.discard();
            Err(PkgError::StartFailed {
                name: name.clone(),
                reason: format!(
                    "process exited during startup, see {}",
                    record.log_file.display()
                ),
            })
        }
    }

    fn persist(&self, doc: &Document, outcome: Outcome) -> Outcome {
        match self.store.save(doc) {
            Ok(()) => outcome,
            Err(e) => Outcome::error(
                ErrorKind::Storage,
                format!("{} (but saving state failed: {})", outcome.message(), e),
            ),
        }
    }
}

/// Compare the cached status with the live process behind the PID file.
pub(crate) fn reconcile(record: &mut ServiceRecord) -> Probe {
    let pid_file = PidFile::new(&record.pid_file);
    let live = match pid_file.read() {
        Ok(Some(pid)) if pid::is_process_running(pid) => Some(pid),
        Ok(_) => {
            if pid_file.exists() {
                debug!(service = %record.name, "Removing stale PID file");
                pid_file.discard();
            }
            None
        }
        Err(e) => {
            warn!(service = %record.name, "Failed to read PID file: {}", e);
            None
        }
    };

    record.status = if live.is_some() {
        ServiceStatus::Running
    } else {
        ServiceStatus::Stopped
    };
    Probe {
        status: record.status,
        pid: live,
    }
}

fn status_outcome(name: &str, probe: Probe) -> Outcome {
    let message = match probe.pid {
        Some(pid) => format!("Service {name} is running (PID {pid})"),
        None => format!("Service {name} is stopped"),
    };
    let mut outcome = Outcome::success(message)
        .with("name", name)
        .with("service_status", probe.status.as_str());
    if let Some(pid) = probe.pid {
        outcome = outcome.with("pid", pid);
    }
    outcome
}

fn service_entry(name: &str, probe: Probe) -> Value {
    json!({
        "name": name,
        "status": probe.status.as_str(),
        "pid": probe.pid,
    })
}
