use anyhow::Context;
use std::path::PathBuf;
use std::process::ExitCode;
use svcpkg::clienv::Paths;
use svcpkg::daemon::{DaemonClient, Request};
use svcpkg::settings::Settings;

use super::output::{entries, field, report};

pub(crate) struct CreateArgs {
    pub name: String,
    pub version: String,
    pub files: Vec<PathBuf>,
    pub os: Option<String>,
    pub arch: Option<String>,
    pub service: bool,
    pub executable: Option<String>,
    pub service_args: Vec<String>,
}

pub(crate) async fn cmd_create(client: &DaemonClient, args: CreateArgs) -> anyhow::Result<ExitCode> {
    // The daemon resolves paths against its own working directory.
    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    let files = args
        .files
        .iter()
        .map(|f| cwd.join(f).display().to_string())
        .collect();

    let outcome = client
        .send(&Request::Create {
            name: args.name,
            version: args.version,
            files,
            os: args.os,
            arch: args.arch,
            is_service: args.service,
            service_executable: args.executable,
            service_args: args.service_args,
        })
        .await;
    Ok(report(&outcome))
}

pub(crate) async fn cmd_install(
    client: &DaemonClient,
    name: String,
    version: String,
    os: Option<String>,
    arch: Option<String>,
    no_start: bool,
) -> ExitCode {
    let outcome = client
        .send(&Request::Install {
            name,
            version,
            os,
            arch,
            start_service: !no_start,
        })
        .await;
    report(&outcome)
}

pub(crate) async fn cmd_uninstall(client: &DaemonClient, name: String) -> ExitCode {
    report(&client.send(&Request::Uninstall { name }).await)
}

pub(crate) async fn cmd_update(
    client: &DaemonClient,
    name: String,
    version: Option<String>,
    os: Option<String>,
    arch: Option<String>,
) -> ExitCode {
    let outcome = client
        .send(&Request::Update {
            name,
            version,
            os,
            arch,
        })
        .await;
    report(&outcome)
}

pub(crate) async fn cmd_list(client: &DaemonClient) -> ExitCode {
    let outcome = client.send(&Request::List).await;
    let code = report(&outcome);
    for pkg in entries(&outcome, "packages") {
        let mut line = format!(
            "- {} (version {}, {}-{})",
            field(pkg, "name"),
            field(pkg, "version"),
            field(pkg, "os"),
            field(pkg, "architecture"),
        );
        if let Some(status) = pkg.get("service_status").and_then(|s| s.as_str()) {
            line.push_str(&format!(" [service: {status}]"));
        }
        println!("{line}");
    }
    code
}

pub(crate) async fn cmd_ping(client: &DaemonClient) -> ExitCode {
    let outcome = client.send(&Request::Ping).await;
    let code = report(&outcome);
    if let (Some(version), Some(uptime)) = (outcome.get("version"), outcome.get("uptime_secs")) {
        println!("  version: {}  uptime: {}s", version.as_str().unwrap_or("?"), uptime);
    }
    code
}

pub(crate) async fn cmd_available(paths: &Paths, source: Option<String>) -> anyhow::Result<ExitCode> {
    let settings = Settings::load(&paths.settings_file)?;
    if settings.remotes.is_empty() {
        println!(
            "No remote sources configured. Add [[remote]] entries to {}",
            paths.settings_file.display()
        );
        return Ok(ExitCode::SUCCESS);
    }

    let listings = svcpkg::remote::list_available(&settings, source.as_deref()).await?;
    let mut code = ExitCode::SUCCESS;
    for listing in listings {
        println!("Available packages from {}:", listing.source);
        match listing.packages {
            Ok(packages) if packages.is_empty() => println!("  (none)"),
            Ok(packages) => {
                for package in packages {
                    println!("- {package}");
                }
            }
            Err(e) => {
                eprintln!("  Error: {e:#}");
                code = ExitCode::FAILURE;
            }
        }
        println!();
    }
    Ok(code)
}
