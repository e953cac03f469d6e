mod args;
mod commands;
mod init;

use args::{Cli, Commands, DaemonCommands};
use clap::Parser;
use commands::package::CreateArgs;
use std::process::ExitCode;
use svcpkg::clienv::Paths;
use svcpkg::daemon::DaemonClient;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let foreground_daemon = matches!(
        cli.command,
        Commands::Daemon {
            command: DaemonCommands::Run
        }
    );
    init::initialize_logging(if foreground_daemon { "info" } else { "warn" });

    let paths = Paths::from_env();
    let client = DaemonClient::new(&paths.socket_path);

    let code = match cli.command {
        Commands::Create {
            name,
            version,
            files,
            os,
            arch,
            service,
            executable,
            service_args,
        } => {
            let args = CreateArgs {
                name,
                version,
                files,
                os,
                arch,
                service,
                executable,
                service_args,
            };
            commands::package::cmd_create(&client, args).await?
        }
        Commands::Install {
            name,
            version,
            os,
            arch,
            no_start,
        } => commands::package::cmd_install(&client, name, version, os, arch, no_start).await,
        Commands::Uninstall { name } => commands::package::cmd_uninstall(&client, name).await,
        Commands::List => commands::package::cmd_list(&client).await,
        Commands::Update {
            name,
            version,
            os,
            arch,
        } => commands::package::cmd_update(&client, name, version, os, arch).await,
        Commands::Available { source } => commands::package::cmd_available(&paths, source).await?,
        Commands::Ping => commands::package::cmd_ping(&client).await,
        Commands::Service { command } => commands::service::cmd_service(&client, command).await,
        Commands::Daemon { command } => commands::daemon::cmd_daemon(&paths, command).await?,
    };

    Ok(code)
}
