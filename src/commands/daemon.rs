use std::process::ExitCode;
use svcpkg::clienv::Paths;
use svcpkg::daemon::lifecycle::{self, DaemonStart, DaemonStop};
use svcpkg::daemon::{DaemonConfig, DaemonServer};
use svcpkg::settings::Settings;
use tokio_util::sync::CancellationToken;

use super::output::exit_code;
use crate::args::DaemonCommands;

pub(crate) async fn cmd_daemon(paths: &Paths, command: DaemonCommands) -> anyhow::Result<ExitCode> {
    match command {
        DaemonCommands::Run => cmd_daemon_run(paths).await,
        DaemonCommands::Start => cmd_daemon_start(paths).await,
        DaemonCommands::Stop => cmd_daemon_stop(paths).await,
        DaemonCommands::Status => cmd_daemon_status(paths).await,
    }
}

async fn cmd_daemon_run(paths: &Paths) -> anyhow::Result<ExitCode> {
    let settings = Settings::load(&paths.settings_file)?;
    tracing::info!(
        socket = %paths.socket_path.display(),
        pid_file = %paths.daemon_pid_path.display(),
        "Running daemon in foreground"
    );

    let config = DaemonConfig::new(paths.clone(), settings.supervisor.timings());
    DaemonServer::new(config).run(CancellationToken::new()).await?;
    Ok(ExitCode::SUCCESS)
}

async fn cmd_daemon_start(paths: &Paths) -> anyhow::Result<ExitCode> {
    match lifecycle::start(paths).await? {
        DaemonStart::AlreadyRunning { pid: Some(pid) } => {
            println!("Daemon already running (PID {pid})")
        }
        DaemonStart::AlreadyRunning { pid: None } => println!("Daemon already running"),
        DaemonStart::Started { pid } => println!(
            "Daemon started (PID {pid}, log {})",
            paths.daemon_log_path.display()
        ),
    }
    Ok(ExitCode::SUCCESS)
}

async fn cmd_daemon_stop(paths: &Paths) -> anyhow::Result<ExitCode> {
    let settings = Settings::load(&paths.settings_file)?;
    match lifecycle::stop(paths, &settings.supervisor.timings()).await? {
        DaemonStop::NotRunning => println!("Daemon is not running"),
        DaemonStop::StalePidFile { pid } => {
            println!("Daemon was not running (stale PID file for {pid} removed)")
        }
        DaemonStop::Stopped { pid, forced: false } => println!("Daemon stopped (PID {pid})"),
        DaemonStop::Stopped { pid, forced: true } => {
            println!("Daemon forcefully stopped (PID {pid})")
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn cmd_daemon_status(paths: &Paths) -> anyhow::Result<ExitCode> {
    let status = lifecycle::status(paths).await?;

    if status.stale_pid_removed {
        println!("Removed stale PID file {}", paths.daemon_pid_path.display());
    }
    match status.pid {
        Some(pid) => println!("PID:     {pid}"),
        None => println!("PID:     -"),
    }
    println!("Socket:  {}", paths.socket_path.display());
    if status.is_running() {
        let version = status.ping.get("version").and_then(|v| v.as_str()).unwrap_or("?");
        let uptime = status.ping.get("uptime_secs").and_then(|v| v.as_u64()).unwrap_or(0);
        println!("Status:  running (v{version}, uptime {uptime}s)");
    } else {
        println!("Status:  not running ({})", status.ping.message());
    }
    Ok(exit_code(&status.ping))
}
