use serde_json::{json, Value};
use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::clienv::Paths;
use crate::daemon::protocol::Outcome;
use crate::daemon::services::ServiceSupervisor;
use crate::error::{ErrorKind, PkgError};
use crate::repository::{extract_archive, validate_name, PackageManifest, PackageRepository};
use crate::store::{ConfigStore, InstalledPackage, ServiceRecord, ServiceStatus};
use crate::version::{checksum, compare_versions, host_platform, is_valid_version};

/// Install, uninstall and update packages from the local repository.
///
/// Every operation returns an [`Outcome`] rather than failing, and expects the
/// caller to hold [`ConfigStore::lock`] for its duration.
#[derive(Debug, Clone)]
pub struct Installer {
    paths: Paths,
    store: ConfigStore,
    repository: PackageRepository,
    supervisor: ServiceSupervisor,
}

/// Target of an install: which build of which package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallRequest {
    pub name: String,
    pub version: String,
    pub os: Option<String>,
    pub arch: Option<String>,
    pub start_service: bool,
}

impl InstallRequest {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            os: None,
            arch: None,
            start_service: true,
        }
    }
}

impl Installer {
    pub fn new(
        paths: Paths,
        store: ConfigStore,
        repository: PackageRepository,
        supervisor: ServiceSupervisor,
    ) -> Self {
        Self {
            paths,
            store,
            repository,
            supervisor,
        }
    }

    pub async fn install(&self, request: &InstallRequest) -> Outcome {
        let name = request.name.as_str();
        let version = request.version.as_str();
        if let Err(e) = validate_name(name) {
            return e.into();
        }
        if !is_valid_version(version) {
            return PkgError::InvalidVersion(version.to_string()).into();
        }

        let (host_os, host_arch) = host_platform();
        let os = request.os.clone().unwrap_or(host_os);
        let arch = request.arch.clone().unwrap_or(host_arch);

        let mut doc = self.store.load();
        let previous = doc.installed_packages.get(name).cloned();
        let mut warnings = Vec::new();

        if let Some(installed) = &previous {
            if compare_versions(version, &installed.version) != Ordering::Greater {
                return Outcome::info(format!(
                    "Package {name} version {} is already installed and up to date.",
                    installed.version
                ))
                .with("name", name)
                .with("version", installed.version.as_str());
            }
            info!(package = %name, from = %installed.version, to = %version, "Upgrading package");

            if doc.services.contains_key(name) {
                let stopped = self.supervisor.stop_in(&mut doc, name).await;
                if stopped.is_error() {
                    warn!(package = %name, "Could not stop running service before upgrade: {}", stopped.message());
                    warnings.push(format!(
                        "previous service was not stopped: {}",
                        stopped.message()
                    ));
                }
            }
        }

        let manifest = match self.repository.get_manifest(name, version, Some(&os), Some(&arch)) {
            Ok(manifest) => manifest,
            Err(e) => return e.into(),
        };

        let archive = self.repository.archive_path(name, version, &os, &arch);
        let extract_dir = self.paths.package_install_dir(name, version);
        if let Err(e) = verify_and_extract(&manifest, archive, extract_dir.clone()).await {
            warn!(package = %name, version = %version, "Install failed: {}", e);
            return Outcome::error(
                e.kind(),
                format!("Failed to install package {name}: {e}"),
            );
        }

        doc.installed_packages.insert(
            name.to_string(),
            InstalledPackage {
                name: name.to_string(),
                version: version.to_string(),
                os: os.clone(),
                architecture: arch.clone(),
                install_path: extract_dir.clone(),
            },
        );

        let mut outcome = Outcome::success(format!(
            "Package {name} version {version} for {os}-{arch} installed successfully."
        ))
        .with("name", name)
        .with("version", version);

        // Service wiring is derived from the new manifest only.
        match self.service_record(&manifest, &extract_dir) {
            Some(record) => {
                doc.services.insert(name.to_string(), record);
                outcome = outcome.with("is_service", true);
                if request.start_service {
                    let started = self.supervisor.start_in(&mut doc, name).await;
                    match &started {
                        Outcome::Error { message, .. } => {
                            warn!(package = %name, "Installed but service failed to start: {}", message);
                            warnings.push(message.clone());
                        }
                        _ => {
                            if let Some(pid) = started.get("pid") {
                                outcome = outcome.with("pid", pid.clone());
                            }
                        }
                    }
                }
            }
            None => {
                if doc.services.remove(name).is_some() {
                    info!(package = %name, "New version is not a service, dropping service record");
                }
                outcome = outcome.with("is_service", false);
            }
        }

        if !warnings.is_empty() {
            outcome = outcome.with("warning", warnings.join("; "));
        }

        if let Err(e) = self.store.save(&doc) {
            return Outcome::error(
                ErrorKind::Storage,
                format!("Installed {name} {version} but failed to save state: {e}"),
            );
        }

        if let Some(previous) = previous {
            if previous.install_path != extract_dir && previous.install_path.exists() {
                if let Err(e) = fs::remove_dir_all(&previous.install_path) {
                    warn!(path = %previous.install_path.display(), "Failed to remove previous version: {}", e);
                }
            }
        }

        info!(package = %name, version = %version, "Package installed");
        outcome
    }

    fn service_record(&self, manifest: &PackageManifest, extract_dir: &Path) -> Option<ServiceRecord> {
        if !manifest.is_service {
            return None;
        }
        let Some(relative) = manifest.service_executable.as_deref() else {
            warn!(package = %manifest.name, "Service package declares no executable");
            return None;
        };
        let executable = extract_dir.join(relative);
        if !executable.is_file() {
            warn!(package = %manifest.name, path = %executable.display(), "Service executable missing after extraction");
            return None;
        }
        Some(ServiceRecord {
            name: manifest.name.clone(),
            executable,
            args: manifest.service_args.clone(),
            pid_file: self.paths.service_pid_file(&manifest.name),
            log_file: self.paths.service_log_file(&manifest.name),
            status: ServiceStatus::Stopped,
        })
    }

    pub async fn uninstall(&self, name: &str) -> Outcome {
        let mut doc = self.store.load();
        let Some(installed) = doc.installed_packages.get(name).cloned() else {
            return PkgError::NotInstalled(name.to_string()).into();
        };

        if doc.services.contains_key(name) {
            let stopped = self.supervisor.stop_in(&mut doc, name).await;
            if stopped.is_error() {
                warn!(package = %name, "Failed to stop service during uninstall: {}", stopped.message());
            }
            doc.services.remove(name);
        }

        let package_root = self.paths.package_root(name);
        if let Err(e) = remove_tree(&package_root) {
            return Outcome::error(
                ErrorKind::Storage,
                format!("Failed to uninstall package {name}: {e}"),
            );
        }

        doc.installed_packages.remove(name);
        if let Err(e) = self.store.save(&doc) {
            return Outcome::error(
                ErrorKind::Storage,
                format!("Removed {name} but failed to save state: {e}"),
            );
        }

        info!(package = %name, version = %installed.version, "Package uninstalled");
        Outcome::success(format!(
            "Package {name} version {} for {}-{} uninstalled successfully.",
            installed.version, installed.os, installed.architecture
        ))
        .with("name", name)
        .with("version", installed.version)
    }

    pub async fn update(
        &self,
        name: &str,
        version: Option<&str>,
        os: Option<&str>,
        arch: Option<&str>,
    ) -> Outcome {
        let doc = self.store.load();
        let Some(current) = doc.installed_packages.get(name).cloned() else {
            return PkgError::NotInstalled(name.to_string()).into();
        };
        let os = os.unwrap_or(&current.os).to_string();
        let arch = arch.unwrap_or(&current.architecture).to_string();

        let target = match version {
            Some(requested) => {
                if !is_valid_version(requested) {
                    return PkgError::InvalidVersion(requested.to_string()).into();
                }
                if compare_versions(requested, &current.version) != Ordering::Greater {
                    return Outcome::info(format!(
                        "Specified version {requested} is not newer than the installed version {}.",
                        current.version
                    ))
                    .with("name", name)
                    .with("version", current.version.as_str());
                }
                requested.to_string()
            }
            None => match self.repository.find_latest_version(name, &os, &arch) {
                Ok(latest) => latest,
                Err(e) => return e.into(),
            },
        };

        if compare_versions(&target, &current.version) != Ordering::Greater {
            return Outcome::info(format!(
                "Package {name} is already up to date (version {})",
                current.version
            ))
            .with("name", name)
            .with("version", current.version.as_str());
        }

        info!(package = %name, from = %current.version, to = %target, "Updating package");
        let request = InstallRequest {
            name: name.to_string(),
            version: target,
            os: Some(os),
            arch: Some(arch),
            start_service: true,
        };
        self.install(&request).await
    }

    pub fn list_packages(&self) -> Outcome {
        let doc = self.store.load();
        let packages: Vec<Value> = doc
            .installed_packages
            .values()
            .map(|pkg| {
                let service = doc.services.get(&pkg.name);
                json!({
                    "name": pkg.name,
                    "version": pkg.version,
                    "os": pkg.os,
                    "architecture": pkg.architecture,
                    "install_path": pkg.install_path.display().to_string(),
                    "has_service": service.is_some(),
                    "service_status": service.map(|s| s.status.as_str()),
                })
            })
            .collect();

        let message = if packages.is_empty() {
            "No packages installed.".to_string()
        } else {
            format!("{} package(s) installed", packages.len())
        };
        Outcome::success(message).with("packages", packages)
    }
}

/// Integrity gate then extraction, off the async executor.
async fn verify_and_extract(
    manifest: &PackageManifest,
    archive: PathBuf,
    extract_dir: PathBuf,
) -> Result<(), PkgError> {
    let manifest = manifest.clone();

    tokio::task::spawn_blocking(move || {
        if !archive.is_file() {
            return Err(PkgError::PackageNotFound {
                name: manifest.name,
                version: manifest.version,
                os: manifest.os,
                arch: manifest.architecture,
            });
        }
        if checksum(&archive)? != manifest.checksum {
            return Err(PkgError::ChecksumMismatch(manifest.key()));
        }
        debug!(archive = %archive.display(), "Checksum verified");

        if extract_dir.exists() {
            fs::remove_dir_all(&extract_dir)?;
        }
        extract_archive(&archive, &extract_dir)
    })
    .await
    .map_err(|e| PkgError::Server(format!("install worker failed: {e}")))?
}

fn remove_tree(path: &Path) -> std::io::Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
