use std::path::{Path, PathBuf};

/// Environment variables recognised by svcpkg.
#[derive(Debug, Clone, Copy)]
pub enum EnvVar {
    SvcpkgHome,
    SvcpkgSocket,
    SvcpkgDaemonPid,
    SvcpkgDaemonLog,
}

impl EnvVar {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvVar::SvcpkgHome => "SVCPKG_HOME",
            EnvVar::SvcpkgSocket => "SVCPKG_SOCKET",
            EnvVar::SvcpkgDaemonPid => "SVCPKG_DAEMON_PID",
            EnvVar::SvcpkgDaemonLog => "SVCPKG_DAEMON_LOG",
        }
    }
}

const FALLBACK_HOME_DIR: &str = "~";
const SVCPKG_SUBDIR: &str = ".svcpkg";

fn env_opt(var: EnvVar) -> Option<String> {
    std::env::var(var.as_str()).ok().filter(|v| !v.is_empty())
}

/// Every on-disk location the daemon, installer and CLI touch.
///
/// Built once at process start and handed to each component, so tests can
/// point a whole stack at a temporary directory with [`Paths::under`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    pub home: PathBuf,
    pub config_file: PathBuf,
    pub settings_file: PathBuf,
    pub repo_dir: PathBuf,
    pub install_dir: PathBuf,
    pub services_dir: PathBuf,
    pub socket_path: PathBuf,
    pub daemon_pid_path: PathBuf,
    pub daemon_log_path: PathBuf,
}

impl Paths {
    /// Lay out every path below `home`.
    pub fn under(home: impl AsRef<Path>) -> Self {
        let home = home.as_ref().to_path_buf();
        Self {
            config_file: home.join("config.toml"),
            settings_file: home.join("settings.toml"),
            repo_dir: home.join("repo"),
            install_dir: home.join("installed"),
            services_dir: home.join("services"),
            socket_path: home.join("svcpkg.sock"),
            daemon_pid_path: home.join("svcpkgd.pid"),
            daemon_log_path: home.join("logs").join("svcpkgd.log"),
            home,
        }
    }

    /// Resolve paths from `$SVCPKG_HOME` (default `~/.svcpkg`) plus the
    /// individual socket/PID/log overrides.
    pub fn from_env() -> Self {
        let home = env_opt(EnvVar::SvcpkgHome)
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from(FALLBACK_HOME_DIR))
                    .join(SVCPKG_SUBDIR)
            });
        // Recorded service paths must be absolute.
        let home = if home.is_relative() {
            std::env::current_dir()
                .map(|cwd| cwd.join(&home))
                .unwrap_or(home)
        } else {
            home
        };
        tracing::trace!(dir = %home.display(), "Resolved svcpkg home");

        let mut paths = Self::under(home);
        if let Some(socket) = env_opt(EnvVar::SvcpkgSocket) {
            paths.socket_path = PathBuf::from(socket);
        }
        if let Some(pid) = env_opt(EnvVar::SvcpkgDaemonPid) {
            paths.daemon_pid_path = PathBuf::from(pid);
        }
        if let Some(log) = env_opt(EnvVar::SvcpkgDaemonLog) {
            paths.daemon_log_path = PathBuf::from(log);
        }
        tracing::trace!(socket = %paths.socket_path.display(), pid = %paths.daemon_pid_path.display(), "Daemon paths");
        paths
    }

    /// Create the repository, install and services directories.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        for dir in [
            &self.home,
            &self.repo_dir,
            &self.install_dir,
            &self.services_dir,
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    pub fn service_pid_file(&self, name: &str) -> PathBuf {
        self.services_dir.join(format!("{name}.pid"))
    }

    pub fn service_log_file(&self, name: &str) -> PathBuf {
        self.services_dir.join(format!("{name}.log"))
    }

    /// Directory holding every installed version of `name`.
    pub fn package_root(&self, name: &str) -> PathBuf {
        self.install_dir.join(name)
    }

    pub fn package_install_dir(&self, name: &str, version: &str) -> PathBuf {
        self.package_root(name).join(version)
    }
}
