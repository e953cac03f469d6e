use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "svcpkg")]
#[command(version)]
#[command(about = "Host-local package manager and service supervisor", long_about = None)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Build a package archive and manifest in the local repository
    Create {
        name: String,
        version: String,

        /// Files to include (stored flat, by base name)
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Target OS (defaults to this host)
        #[arg(long)]
        os: Option<String>,

        /// Target architecture (defaults to this host)
        #[arg(long)]
        arch: Option<String>,

        /// Mark the package as a long-running service
        #[arg(long)]
        service: bool,

        /// Service executable, relative to the install directory
        #[arg(long, requires = "service")]
        executable: Option<String>,

        /// Arguments passed to the service executable
        #[arg(long = "arg", allow_hyphen_values = true, requires = "service")]
        service_args: Vec<String>,
    },

    /// Install a package version from the local repository
    Install {
        name: String,
        version: String,

        #[arg(long)]
        os: Option<String>,

        #[arg(long)]
        arch: Option<String>,

        /// Register the service without starting it
        #[arg(long)]
        no_start: bool,
    },

    /// Stop and remove an installed package
    Uninstall { name: String },

    /// List installed packages
    List,

    /// Upgrade to a newer version (latest in the repository by default)
    Update {
        name: String,

        /// Explicit target version
        version: Option<String>,

        #[arg(long)]
        os: Option<String>,

        #[arg(long)]
        arch: Option<String>,
    },

    /// List packages offered by configured remote sources
    Available {
        /// Only query the remote with this name
        #[arg(long)]
        source: Option<String>,
    },

    /// Check that the daemon answers
    Ping,

    /// Control installed services
    Service {
        #[command(subcommand)]
        command: ServiceCommands,
    },

    /// Manage the svcpkg daemon
    Daemon {
        #[command(subcommand)]
        command: DaemonCommands,
    },
}

#[derive(Subcommand)]
pub(crate) enum ServiceCommands {
    /// Start a registered service
    Start { name: String },

    /// Stop a running service (SIGTERM, then SIGKILL)
    Stop { name: String },

    /// Stop then start a service
    Restart { name: String },

    /// Show whether a service is running
    Status { name: String },

    /// List every registered service
    List,
}

#[derive(Subcommand)]
pub(crate) enum DaemonCommands {
    /// Run the daemon in the foreground
    Run,

    /// Start the daemon in the background
    Start,

    /// Stop the background daemon
    Stop,

    /// Show daemon status
    Status,
}
