//! Persisted configuration document: installed packages and service records.
//!
//! Every mutation is a whole-document read → mutate → write. The store hands
//! out a process-wide transaction lock ([`ConfigStore::lock`]) that callers
//! hold across that cycle so concurrent requests never drop each other's
//! updates.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{trace, warn};

use crate::error::Result;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Document {
    pub installed_packages: BTreeMap<String, InstalledPackage>,
    pub services: BTreeMap<String, ServiceRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledPackage {
    pub name: String,
    pub version: String,
    pub os: String,
    pub architecture: String,
    pub install_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub name: String,
    pub executable: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    pub pid_file: PathBuf,
    pub log_file: PathBuf,
    /// Cached hint only; the PID file and a live probe are authoritative.
    pub status: ServiceStatus,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    #[default]
    Stopped,
    Running,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Stopped => "stopped",
            ServiceStatus::Running => "running",
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, ServiceStatus::Running)
    }
}

impl Document {
    /// Drop service records whose package record is gone.
    pub fn prune_orphan_services(&mut self) -> Vec<String> {
        let orphans: Vec<String> = self
            .services
            .keys()
            .filter(|name| !self.installed_packages.contains_key(*name))
            .cloned()
            .collect();
        for name in &orphans {
            self.services.remove(name);
        }
        orphans
    }
}

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Serialize a load → mutate → save cycle against every other holder.
    pub async fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().await
    }

    /// Read the persisted document; a missing or unparsable file yields an
    /// empty document.
    pub fn load(&self) -> Document {
        if !self.path.exists() {
            trace!(path = %self.path.display(), "Config file does not exist, starting empty");
            return Document::default();
        }

        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) => {
                warn!(path = %self.path.display(), "Failed to read config: {}", e);
                return Document::default();
            }
        };

        match toml::from_str::<Document>(&content) {
            Ok(mut doc) => {
                let orphans = doc.prune_orphan_services();
                if !orphans.is_empty() {
                    warn!(?orphans, "Dropping service records without a package record");
                }
                doc
            }
            Err(e) => {
                warn!(path = %self.path.display(), "Failed to parse config, starting empty: {}", e);
                Document::default()
            }
        }
    }

    /// Overwrite the persisted document (temp file + rename).
    pub fn save(&self, doc: &Document) -> Result<()> {
        let result = self.write_document(doc);
        if let Err(e) = &result {
            warn!(path = %self.path.display(), "Failed to save config: {}", e);
        }
        result
    }

    fn write_document(&self, doc: &Document) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(doc)?;
        let tmp = self.path.with_extension("toml.tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &self.path)?;
        trace!(path = %self.path.display(), "Config saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_document() -> Document {
        let mut doc = Document::default();
        doc.installed_packages.insert(
            "web".into(),
            InstalledPackage {
                name: "web".into(),
                version: "1.4.2".into(),
                os: "linux".into(),
                architecture: "x86_64".into(),
                install_path: PathBuf::from("/srv/svcpkg/installed/web/1.4.2"),
            },
        );
        doc.installed_packages.insert(
            "tools".into(),
            InstalledPackage {
                name: "tools".into(),
                version: "0.9".into(),
                os: "linux".into(),
                architecture: "x86_64".into(),
                install_path: PathBuf::from("/srv/svcpkg/installed/tools/0.9"),
            },
        );
        doc.services.insert(
            "web".into(),
            ServiceRecord {
                name: "web".into(),
                executable: PathBuf::from("/srv/svcpkg/installed/web/1.4.2/run.sh"),
                args: vec!["--port".into(), "8080".into()],
                pid_file: PathBuf::from("/srv/svcpkg/services/web.pid"),
                log_file: PathBuf::from("/srv/svcpkg/services/web.log"),
                status: ServiceStatus::Running,
            },
        );
        doc
    }

    #[test]
    fn save_then_load_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(tmp.path().join("config.toml"));
        let doc = sample_document();

        store.save(&doc).unwrap();
        assert_eq!(store.load(), doc);
    }

    #[test]
    fn empty_document_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(tmp.path().join("nested").join("config.toml"));
        store.save(&Document::default()).unwrap();
        assert_eq!(store.load(), Document::default());
    }

    #[test]
    fn missing_file_loads_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(tmp.path().join("config.toml"));
        let doc = store.load();
        assert!(doc.installed_packages.is_empty());
        assert!(doc.services.is_empty());
    }

    #[test]
    fn garbage_file_loads_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        fs::write(&path, "installed_packages = [[[ not toml").unwrap();
        let store = ConfigStore::new(&path);
        assert_eq!(store.load(), Document::default());
    }

    #[test]
    fn orphan_services_are_dropped_on_load() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(tmp.path().join("config.toml"));
        let mut doc = sample_document();
        doc.installed_packages.remove("web");
        store.save(&doc).unwrap();

        let loaded = store.load();
        assert!(loaded.services.is_empty());
        assert!(loaded.installed_packages.contains_key("tools"));
    }

    #[test]
    fn save_into_unwritable_location_reports_error() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("file");
        fs::write(&blocker, "x").unwrap();
        let store = ConfigStore::new(blocker.join("config.toml"));
        assert!(store.save(&Document::default()).is_err());
    }

    #[test]
    fn status_wire_names() {
        assert_eq!(ServiceStatus::Running.as_str(), "running");
        assert!(!ServiceStatus::Stopped.is_running());
    }
}
