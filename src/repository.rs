//! Local package repository: one `.tar.gz` archive plus one `.toml` manifest
//! per `(name, version, os, architecture)` key.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fs::{self, File};
use std::path::{Component, Path, PathBuf};
use tar::{Archive, Builder};
use tracing::{debug, info, trace, warn};

use crate::error::{PkgError, Result};
use crate::version::{checksum, compare_versions, host_platform, is_valid_version};

const ARCHIVE_EXT: &str = "tar.gz";
const MANIFEST_EXT: &str = "toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageManifest {
    pub name: String,
    pub version: String,
    pub os: String,
    pub architecture: String,
    pub files: Vec<String>,
    pub checksum: String,
    #[serde(default)]
    pub is_service: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_executable: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub service_args: Vec<String>,
}

impl PackageManifest {
    pub fn key(&self) -> String {
        package_key(&self.name, &self.version, &self.os, &self.architecture)
    }
}

/// Inputs for [`PackageRepository::create_package`].
#[derive(Debug, Clone, Default)]
pub struct NewPackage {
    pub name: String,
    pub version: String,
    pub files: Vec<PathBuf>,
    pub os: Option<String>,
    pub arch: Option<String>,
    pub is_service: bool,
    pub service_executable: Option<String>,
    pub service_args: Vec<String>,
}

pub fn package_key(name: &str, version: &str, os: &str, arch: &str) -> String {
    format!("{name}-{version}-{os}-{arch}")
}

/// Names become path components and key prefixes, so separators and
/// leading dots are rejected.
pub fn validate_name(name: &str) -> Result<()> {
    if !is_path_safe(name) {
        return Err(PkgError::InvalidName(name.to_string()));
    }
    Ok(())
}

fn is_path_safe(component: &str) -> bool {
    !(component.is_empty()
        || component.starts_with('.')
        || component.contains('/')
        || component.contains('\\')
        || component.contains('\0'))
}

/// `os` and `arch` end up in repository file names just like package names.
pub fn validate_platform(os: &str, arch: &str) -> Result<()> {
    for (field, value) in [("os", os), ("arch", arch)] {
        if !is_path_safe(value) {
            return Err(PkgError::InvalidRequest(format!("invalid {field}: {value:?}")));
        }
    }
    Ok(())
}

fn resolve_target(os: Option<&str>, arch: Option<&str>) -> Result<(String, String)> {
    let (host_os, host_arch) = host_platform();
    let os = os.map(str::to_string).unwrap_or(host_os);
    let arch = arch.map(str::to_string).unwrap_or(host_arch);
    validate_platform(&os, &arch)?;
    Ok((os, arch))
}

#[derive(Debug, Clone)]
pub struct PackageRepository {
    root: PathBuf,
}

impl PackageRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn archive_path(&self, name: &str, version: &str, os: &str, arch: &str) -> PathBuf {
        self.root
            .join(format!("{}.{ARCHIVE_EXT}", package_key(name, version, os, arch)))
    }

    pub fn manifest_path(&self, name: &str, version: &str, os: &str, arch: &str) -> PathBuf {
        self.root
            .join(format!("{}.{MANIFEST_EXT}", package_key(name, version, os, arch)))
    }

    /// Archive `files` (basenames only), checksum the archive and write the
    /// sibling manifest. An existing package under the same key is replaced.
    pub fn create_package(&self, package: &NewPackage) -> Result<PackageManifest> {
        validate_name(&package.name)?;
        if !is_valid_version(&package.version) {
            return Err(PkgError::InvalidVersion(package.version.clone()));
        }
        for file in &package.files {
            if !file.is_file() {
                return Err(PkgError::FileNotFound(file.display().to_string()));
            }
        }
        if let Some(exe) = &package.service_executable {
            check_relative(exe)?;
        }

        let (os, arch) = resolve_target(package.os.as_deref(), package.arch.as_deref())?;
        fs::create_dir_all(&self.root)?;

        let archive_path = self.archive_path(&package.name, &package.version, &os, &arch);
        let basenames = write_archive(&archive_path, &package.files)?;
        let digest = checksum(&archive_path)?;

        let manifest = PackageManifest {
            name: package.name.clone(),
            version: package.version.clone(),
            os,
            architecture: arch,
            files: basenames,
            checksum: digest,
            is_service: package.is_service,
            service_executable: package.service_executable.clone(),
            service_args: package.service_args.clone(),
        };

        let manifest_path = self.manifest_path(
            &manifest.name,
            &manifest.version,
            &manifest.os,
            &manifest.architecture,
        );
        fs::write(&manifest_path, toml::to_string_pretty(&manifest)?)?;

        info!(key = %manifest.key(), files = manifest.files.len(), "Package created");
        Ok(manifest)
    }

    /// Load the manifest for a key; `os`/`arch` default to the host's.
    pub fn get_manifest(
        &self,
        name: &str,
        version: &str,
        os: Option<&str>,
        arch: Option<&str>,
    ) -> Result<PackageManifest> {
        validate_name(name)?;
        let (os, arch) = resolve_target(os, arch)?;
        let path = self.manifest_path(name, version, &os, &arch);
        if !path.exists() {
            return Err(PkgError::PackageNotFound {
                name: name.to_string(),
                version: version.to_string(),
                os,
                arch,
            });
        }
        trace!(path = %path.display(), "Reading manifest");
        let content = fs::read_to_string(&path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Greatest valid version among manifests named `{name}-*-{os}-{arch}`.
    pub fn find_latest_version(&self, name: &str, os: &str, arch: &str) -> Result<String> {
        validate_name(name)?;
        validate_platform(os, arch)?;
        let prefix = format!("{name}-");
        let suffix = format!("-{os}-{arch}.{MANIFEST_EXT}");
        let mut latest: Option<String> = None;

        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(no_versions(name, os, arch));
            }
            Err(e) => return Err(e.into()),
        };

        for entry in entries.flatten() {
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            let Some(version) = file_name
                .strip_prefix(&prefix)
                .and_then(|rest| rest.strip_suffix(&suffix))
            else {
                continue;
            };
            if !is_valid_version(version) {
                continue;
            }
            let newer = latest
                .as_deref()
                .map_or(true, |current| compare_versions(version, current) == Ordering::Greater);
            if newer {
                latest = Some(version.to_string());
            }
        }

        debug!(name, os, arch, latest = ?latest, "Scanned repository for versions");
        latest.ok_or_else(|| no_versions(name, os, arch))
    }
}

fn no_versions(name: &str, os: &str, arch: &str) -> PkgError {
    PkgError::NoVersionsFound {
        name: name.to_string(),
        os: os.to_string(),
        arch: arch.to_string(),
    }
}

fn check_relative(path: &str) -> Result<()> {
    let p = Path::new(path);
    let escapes = p
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if path.is_empty() || escapes {
        return Err(PkgError::InvalidRequest(format!(
            "service executable must be a relative path inside the package: {path}"
        )));
    }
    Ok(())
}

/// Build the archive under a `.partial` name and rename it into place. The
/// temp file is removed if anything fails.
fn write_archive(archive_path: &Path, files: &[PathBuf]) -> Result<Vec<String>> {
    let tmp = archive_path.with_extension("partial");
    let built = build_archive(&tmp, files).and_then(|basenames| {
        fs::rename(&tmp, archive_path)?;
        Ok(basenames)
    });
    if built.is_err() {
        if let Err(e) = fs::remove_file(&tmp) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %tmp.display(), "Failed to remove partial archive: {}", e);
            }
        }
    }
    built
}

fn build_archive(tmp: &Path, files: &[PathBuf]) -> Result<Vec<String>> {
    let file = File::create(tmp)?;
    let mut builder = Builder::new(GzEncoder::new(file, Compression::default()));
    let mut basenames = Vec::with_capacity(files.len());

    for path in files {
        let base = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| PkgError::FileNotFound(path.display().to_string()))?
            .to_string();
        builder
            .append_path_with_name(path, &base)
            .map_err(|e| PkgError::Archive(format!("{}: {}", path.display(), e)))?;
        basenames.push(base);
    }

    let encoder = builder
        .into_inner()
        .map_err(|e| PkgError::Archive(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| PkgError::Archive(e.to_string()))?;
    Ok(basenames)
}

/// Unpack a `.tar.gz` into `dest`, removing `dest` again if unpacking fails.
pub fn extract_archive(archive_path: &Path, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest)?;
    let unpacked = File::open(archive_path).and_then(|file| {
        let mut archive = Archive::new(GzDecoder::new(file));
        archive.set_preserve_permissions(true);
        archive.unpack(dest)
    });
    if let Err(e) = unpacked {
        let _ = fs::remove_dir_all(dest);
        return Err(PkgError::Archive(format!(
            "failed to extract {}: {}",
            archive_path.display(),
            e
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn new_package(name: &str, version: &str, files: Vec<PathBuf>) -> NewPackage {
        NewPackage {
            name: name.into(),
            version: version.into(),
            files,
            os: Some("linux".into()),
            arch: Some("x86_64".into()),
            ..Default::default()
        }
    }

    #[test]
    fn create_writes_archive_and_manifest() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tempfile::tempdir().unwrap();
        let repo = PackageRepository::new(tmp.path().join("repo"));
        let file = write_file(src.path(), "readme.txt", "hello");

        let manifest = repo
            .create_package(&new_package("demo", "1.0.0", vec![file]))
            .unwrap();

        assert_eq!(manifest.key(), "demo-1.0.0-linux-x86_64");
        assert_eq!(manifest.files, vec!["readme.txt"]);
        let archive = repo.archive_path("demo", "1.0.0", "linux", "x86_64");
        assert!(archive.exists());
        assert_eq!(manifest.checksum, checksum(&archive).unwrap());

        let loaded = repo
            .get_manifest("demo", "1.0.0", Some("linux"), Some("x86_64"))
            .unwrap();
        assert_eq!(loaded, manifest);
    }

    #[test]
    fn create_rejects_bad_version() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = PackageRepository::new(tmp.path());
        let err = repo
            .create_package(&new_package("demo", "1.0-rc1", vec![]))
            .unwrap_err();
        assert!(matches!(err, PkgError::InvalidVersion(v) if v == "1.0-rc1"));
    }

    #[test]
    fn create_rejects_missing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = PackageRepository::new(tmp.path());
        let err = repo
            .create_package(&new_package(
                "demo",
                "1.0.0",
                vec![tmp.path().join("missing.bin")],
            ))
            .unwrap_err();
        assert!(matches!(err, PkgError::FileNotFound(_)));
    }

    #[test]
    fn create_rejects_escaping_executable() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tempfile::tempdir().unwrap();
        let repo = PackageRepository::new(tmp.path());
        let mut package = new_package("demo", "1.0.0", vec![write_file(src.path(), "a", "a")]);
        package.is_service = true;
        package.service_executable = Some("../../bin/sh".into());
        assert!(matches!(
            repo.create_package(&package),
            Err(PkgError::InvalidRequest(_))
        ));
    }

    #[test]
    fn same_key_overwrites_manifest() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tempfile::tempdir().unwrap();
        let repo = PackageRepository::new(tmp.path());
        let a = write_file(src.path(), "a.txt", "a");
        let b = write_file(src.path(), "b.txt", "b");

        repo.create_package(&new_package("demo", "1.0.0", vec![a]))
            .unwrap();
        repo.create_package(&new_package("demo", "1.0.0", vec![b]))
            .unwrap();

        let manifest = repo
            .get_manifest("demo", "1.0.0", Some("linux"), Some("x86_64"))
            .unwrap();
        assert_eq!(manifest.files, vec!["b.txt"]);
    }

    #[test]
    fn missing_manifest_is_package_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = PackageRepository::new(tmp.path());
        let err = repo
            .get_manifest("ghost", "1.0", Some("linux"), Some("x86_64"))
            .unwrap_err();
        assert!(matches!(err, PkgError::PackageNotFound { .. }));
    }

    #[test]
    fn manifest_defaults_to_host_platform() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tempfile::tempdir().unwrap();
        let repo = PackageRepository::new(tmp.path());
        let mut package = new_package("native", "2.1", vec![write_file(src.path(), "x", "x")]);
        package.os = None;
        package.arch = None;
        repo.create_package(&package).unwrap();

        let (os, arch) = host_platform();
        let manifest = repo.get_manifest("native", "2.1", None, None).unwrap();
        assert_eq!(manifest.os, os);
        assert_eq!(manifest.architecture, arch);
    }

    #[test]
    fn latest_version_is_numeric_maximum() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tempfile::tempdir().unwrap();
        let repo = PackageRepository::new(tmp.path());
        let file = write_file(src.path(), "bin", "x");
        for version in ["1.2", "1.10", "1.9.9"] {
            repo.create_package(&new_package("demo", version, vec![file.clone()]))
                .unwrap();
        }
        // Other platforms and lookalike names are ignored.
        let mut arm = new_package("demo", "9.0", vec![file.clone()]);
        arm.arch = Some("aarch64".into());
        repo.create_package(&arm).unwrap();
        repo.create_package(&new_package("demo-extra", "5.0", vec![file]))
            .unwrap();
        fs::write(tmp.path().join("demo-junk-linux-x86_64.toml"), "").unwrap();

        assert_eq!(
            repo.find_latest_version("demo", "linux", "x86_64").unwrap(),
            "1.10"
        );
    }

    #[test]
    fn latest_version_without_manifests_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = PackageRepository::new(tmp.path().join("absent"));
        assert!(matches!(
            repo.find_latest_version("demo", "linux", "x86_64"),
            Err(PkgError::NoVersionsFound { .. })
        ));
    }

    #[test]
    fn extract_restores_files() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tempfile::tempdir().unwrap();
        let repo = PackageRepository::new(tmp.path().join("repo"));
        let file = write_file(src.path(), "config.ini", "key=value");
        repo.create_package(&new_package("demo", "1.0.0", vec![file]))
            .unwrap();

        let dest = tmp.path().join("out");
        extract_archive(&repo.archive_path("demo", "1.0.0", "linux", "x86_64"), &dest).unwrap();
        assert_eq!(
            fs::read_to_string(dest.join("config.ini")).unwrap(),
            "key=value"
        );
    }

    #[test]
    fn failed_extract_leaves_nothing_behind() {
        let tmp = tempfile::tempdir().unwrap();
        let bogus = write_file(tmp.path(), "bogus.tar.gz", "definitely not gzip");
        let dest = tmp.path().join("out");
        assert!(extract_archive(&bogus, &dest).is_err());
        assert!(!dest.exists());
    }

    #[test]
    fn failed_archive_build_leaves_no_partial_file() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tempfile::tempdir().unwrap();
        let present = write_file(src.path(), "present.txt", "here");
        let vanished = src.path().join("vanished.txt");
        let archive = tmp.path().join("demo-1.0-linux-x86_64.tar.gz");

        assert!(write_archive(&archive, &[present, vanished]).is_err());
        assert!(!archive.exists());
        let leftovers: Vec<_> = fs::read_dir(tmp.path()).unwrap().flatten().collect();
        assert!(leftovers.is_empty(), "{leftovers:?}");
    }

    #[test]
    fn create_rejects_unsafe_platform_fields() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tempfile::tempdir().unwrap();
        let root = tmp.path().join("repo");
        let repo = PackageRepository::new(&root);
        let file = write_file(src.path(), "a.txt", "a");

        for (os, arch) in [("../../etc", "x86_64"), ("linux", "x/../../y"), ("", "x86_64")] {
            let package = NewPackage {
                os: Some(os.into()),
                arch: Some(arch.into()),
                ..new_package("demo", "1.0", vec![file.clone()])
            };
            let err = repo.create_package(&package).unwrap_err();
            assert!(matches!(err, PkgError::InvalidRequest(_)), "{err:?}");
        }
        assert!(!tmp.path().join("etc").exists());
        assert!(!root.exists() || fs::read_dir(&root).unwrap().next().is_none());

        assert!(matches!(
            repo.get_manifest("demo", "1.0", Some("../x"), None),
            Err(PkgError::InvalidRequest(_))
        ));
        assert!(matches!(
            repo.find_latest_version("demo", "linux", ".."),
            Err(PkgError::InvalidRequest(_))
        ));
    }

    #[test]
    fn name_validation() {
        assert!(validate_name("web-server").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("../etc").is_err());
        assert!(validate_name(".hidden").is_err());
        assert!(validate_name("a/b").is_err());
    }
}
