use super::pid::PidFile;
use super::protocol::{Outcome, Request};
use super::services::ServiceSupervisor;
use crate::clienv::Paths;
use crate::error::{ErrorKind, PkgError};
use crate::installer::{InstallRequest, Installer};
use crate::repository::{NewPackage, PackageRepository};
use crate::settings::Timings;
use crate::store::ConfigStore;
use anyhow::{Context, Result};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use tracing::{debug, error, info, trace, warn};

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub paths: Paths,
    pub timings: Timings,
}

impl DaemonConfig {
    pub fn new(paths: Paths, timings: Timings) -> Self {
        Self { paths, timings }
    }
}

/// Routes decoded requests to the installer, repository and supervisor.
pub struct Dispatcher {
    store: ConfigStore,
    repository: PackageRepository,
    installer: Installer,
    supervisor: ServiceSupervisor,
    started_at: Instant,
    version: String,
}

impl Dispatcher {
    pub fn new(config: &DaemonConfig) -> Self {
        let paths = &config.paths;
        let store = ConfigStore::new(&paths.config_file);
        let repository = PackageRepository::new(&paths.repo_dir);
        let supervisor = ServiceSupervisor::new(store.clone(), config.timings);
        let installer = Installer::new(
            paths.clone(),
            store.clone(),
            repository.clone(),
            supervisor.clone(),
        );
        Self {
            store,
            repository,
            installer,
            supervisor,
            started_at: Instant::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Decode and run one request line on its own task. A panicking handler
    /// becomes an `error` outcome, and the work completes even if the caller
    /// stops waiting.
    pub async fn handle_line(self: &Arc<Self>, line: &str) -> Outcome {
        let request = match Request::from_line(line) {
            Ok(request) => request,
            Err(e) => {
                debug!("Rejected request: {}", e);
                return e.into();
            }
        };

        let dispatcher = Arc::clone(self);
        let command = request.command();
        match tokio::spawn(async move { dispatcher.handle(request).await }).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(command, "Request handler failed: {}", e);
                PkgError::Server(format!("handler for {command} failed: {e}")).into()
            }
        }
    }

    pub async fn handle(&self, request: Request) -> Outcome {
        debug!(command = request.command(), "Handling request");

        let _txn = if request.is_read_only() {
            None
        } else {
            Some(self.store.lock().await)
        };

        match request {
            Request::Ping => Outcome::success("pong")
                .with("version", self.version.as_str())
                .with("uptime_secs", self.started_at.elapsed().as_secs()),

            Request::Create {
                name,
                version,
                files,
                os,
                arch,
                is_service,
                service_executable,
                service_args,
            } => {
                let package = NewPackage {
                    name,
                    version,
                    files: files.into_iter().map(PathBuf::from).collect(),
                    os,
                    arch,
                    is_service,
                    service_executable,
                    service_args,
                };
                let repository = self.repository.clone();
                let created =
                    tokio::task::spawn_blocking(move || repository.create_package(&package)).await;
                match created {
                    Ok(Ok(manifest)) => Outcome::success(format!(
                        "Package {} version {} for {}-{} created successfully.",
                        manifest.name, manifest.version, manifest.os, manifest.architecture
                    ))
                    .with("name", manifest.name.as_str())
                    .with("version", manifest.version.as_str())
                    .with("checksum", manifest.checksum.as_str())
                    .with("files", json!(manifest.files)),
                    Ok(Err(e)) => e.into(),
                    Err(e) => PkgError::Server(format!("create worker failed: {e}")).into(),
                }
            }

            Request::Install {
                name,
                version,
                os,
                arch,
                start_service,
            } => {
                let request = InstallRequest {
                    os,
                    arch,
                    start_service,
                    ..InstallRequest::new(name, version)
                };
                self.installer.install(&request).await
            }

            Request::Uninstall { name } => self.installer.uninstall(&name).await,

            Request::List => self.installer.list_packages(),

            Request::Update {
                name,
                version,
                os,
                arch,
            } => {
                self.installer
                    .update(&name, version.as_deref(), os.as_deref(), arch.as_deref())
                    .await
            }

            Request::StartService { name } => self.supervisor.start(&name).await,

            Request::StopService { name } => self.supervisor.stop(&name).await,

            Request::RestartService { name } => self.supervisor.restart(&name).await,

            Request::ServiceStatus { name } => self.supervisor.status(&name).await,

            Request::ListServices => self.supervisor.list_services().await,
        }
    }
}

/// Bounds on the single request line a connection may send.
#[derive(Debug, Clone, Copy)]
struct ConnectionLimits {
    max_request_bytes: u64,
    read_timeout: Duration,
}

impl Default for ConnectionLimits {
    fn default() -> Self {
        Self {
            max_request_bytes: 1024 * 1024,
            read_timeout: Duration::from_secs(30),
        }
    }
}

/// Removes the socket and daemon PID file when the server unwinds.
struct Endpoint {
    socket_path: PathBuf,
    pid_file: PidFile,
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!("Failed to remove socket {}: {}", self.socket_path.display(), e);
            }
        }
        self.pid_file.discard();
    }
}

pub struct DaemonServer {
    config: DaemonConfig,
    dispatcher: Arc<Dispatcher>,
}

impl DaemonServer {
    pub fn new(config: DaemonConfig) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(&config));
        Self { config, dispatcher }
    }

    /// Serve until `shutdown` is cancelled or SIGTERM/SIGINT arrives.
    ///
    /// Requests already being handled run to completion before the socket and
    /// PID file are removed and this returns.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        info!("svcpkg daemon starting...");
        let paths = &self.config.paths;

        let pid_file = PidFile::new(&paths.daemon_pid_path);
        let own_pid = std::process::id();
        if let Some(pid) = pid_file.running_pid()? {
            if pid as u32 != own_pid {
                anyhow::bail!("Daemon already running with PID {}", pid);
            }
        }

        paths
            .ensure_dirs()
            .with_context(|| format!("Failed to create {}", paths.home.display()))?;
        pid_file.write(own_pid)?;
        info!("PID file written: {}", pid_file.path().display());

        let endpoint = Endpoint {
            socket_path: paths.socket_path.clone(),
            pid_file,
        };

        if endpoint.socket_path.exists() {
            warn!("Removing stale socket: {}", endpoint.socket_path.display());
            std::fs::remove_file(&endpoint.socket_path)?;
        }
        if let Some(parent) = endpoint.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(&endpoint.socket_path).with_context(|| {
            format!("Failed to bind socket {}", endpoint.socket_path.display())
        })?;

        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o666);
            std::fs::set_permissions(&endpoint.socket_path, perms)?;
        }
        info!("IPC server listening on: {}", endpoint.socket_path.display());

        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = signal(SignalKind::terminate())?;
            let mut sigint = signal(SignalKind::interrupt())?;
            let token = shutdown.clone();

            tokio::spawn(async move {
                tokio::select! {
                    _ = sigterm.recv() => {
                        info!("Received SIGTERM");
                        token.cancel();
                    }
                    _ = sigint.recv() => {
                        info!("Received SIGINT");
                        token.cancel();
                    }
                    _ = token.cancelled() => {}
                }
            });
        }

        info!("svcpkg daemon ready");

        let limits = ConnectionLimits::default();
        let connections = TaskTracker::new();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown signal received");
                    break;
                }
                conn = listener.accept() => {
                    match conn {
                        Ok((stream, _)) => {
                            let dispatcher = Arc::clone(&self.dispatcher);
                            let shutdown = shutdown.clone();
                            connections.spawn(async move {
                                if let Err(e) =
                                    handle_connection(dispatcher, stream, limits, shutdown).await
                                {
                                    error!("Connection handler error: {}", e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
            }
        }

        drop(listener);
        connections.close();
        if !connections.is_empty() {
            info!(
                in_flight = connections.len(),
                "Waiting for in-flight requests to finish"
            );
        }
        connections.wait().await;
        drop(endpoint);
        info!("svcpkg daemon stopped");
        Ok(())
    }
}

async fn handle_connection(
    dispatcher: Arc<Dispatcher>,
    stream: UnixStream,
    limits: ConnectionLimits,
    shutdown: CancellationToken,
) -> Result<()> {
    trace!("New connection accepted");
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader.take(limits.max_request_bytes));
    let mut line = String::new();

    let read = tokio::select! {
        _ = shutdown.cancelled() => {
            trace!("Dropping idle connection on shutdown");
            return Ok(());
        }
        read = tokio::time::timeout(limits.read_timeout, reader.read_line(&mut line)) => read,
    };

    let outcome = match read {
        Err(_) => {
            debug!("Client sent no request within {:?}", limits.read_timeout);
            Outcome::error(ErrorKind::InvalidRequest, "Timed out waiting for a request")
        }
        Ok(read) => {
            if read? == 0 {
                trace!("Client closed without sending a request");
                return Ok(());
            }
            if !line.ends_with('\n') && line.len() as u64 >= limits.max_request_bytes {
                warn!(limit = limits.max_request_bytes, "Rejected oversized request");
                Outcome::error(
                    ErrorKind::InvalidRequest,
                    format!("Request exceeds {} bytes", limits.max_request_bytes),
                )
            } else {
                let outcome = dispatcher.handle_line(line.trim_end()).await;
                if let Outcome::Error { kind: ErrorKind::ServerError, message } = &outcome {
                    warn!("Request failed: {}", message);
                }
                outcome
            }
        }
    };

    writer.write_all(outcome.to_line().as_bytes()).await?;
    writer.flush().await?;
    trace!(status = outcome.status().as_str(), "Response sent");
    Ok(())
}
