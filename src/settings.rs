use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// User-editable settings, `<home>/settings.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub supervisor: SupervisorSettings,
    /// Remote endpoints consulted by `svcpkg available`. None are built in;
    /// each comes from a `[[remote]]` table.
    #[serde(rename = "remote")]
    pub remotes: Vec<RemoteSource>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SupervisorSettings {
    pub start_settle_ms: u64,
    pub stop_poll_interval_ms: u64,
    pub stop_poll_attempts: u32,
    pub kill_wait_ms: u64,
    pub restart_pause_ms: u64,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            start_settle_ms: 500,
            stop_poll_interval_ms: 500,
            stop_poll_attempts: 10,
            kill_wait_ms: 500,
            restart_pause_ms: 1000,
        }
    }
}

impl SupervisorSettings {
    pub fn timings(&self) -> Timings {
        Timings {
            start_settle: Duration::from_millis(self.start_settle_ms),
            stop_poll_interval: Duration::from_millis(self.stop_poll_interval_ms),
            stop_poll_attempts: self.stop_poll_attempts,
            kill_wait: Duration::from_millis(self.kill_wait_ms),
            restart_pause: Duration::from_millis(self.restart_pause_ms),
        }
    }
}

/// Fixed waits of the service lifecycle: start settle, stop escalation, restart pause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    pub start_settle: Duration,
    pub stop_poll_interval: Duration,
    pub stop_poll_attempts: u32,
    pub kill_wait: Duration,
    pub restart_pause: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        SupervisorSettings::default().timings()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteSource {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub kind: RemoteKind,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RemoteKind {
    /// Repository browser page linking `<package>.toml` manifests
    #[default]
    Html,
    /// JSON array of package entries, with an HTML attribute fallback
    Listing,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        tracing::trace!(path = %path.display(), "Loading settings");

        if !path.exists() {
            tracing::trace!("Settings file does not exist, using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;

        let settings: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse settings from {}", path.display()))?;

        tracing::trace!(remotes = settings.remotes.len(), "Settings loaded");
        Ok(settings)
    }
}
