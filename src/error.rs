use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PkgError {
    #[error("Invalid version format: {0}")]
    InvalidVersion(String),

    #[error("Invalid package name: {0:?}")]
    InvalidName(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Package {name} version {version} for {os}-{arch} not found.")]
    PackageNotFound {
        name: String,
        version: String,
        os: String,
        arch: String,
    },

    #[error("Package checksum mismatch. The package {0} may have been tampered with.")]
    ChecksumMismatch(String),

    #[error("No versions found for package {name} on {os}-{arch}")]
    NoVersionsFound {
        name: String,
        os: String,
        arch: String,
    },

    #[error("Package {0} is not installed.")]
    NotInstalled(String),

    #[error("{0} is not a registered service")]
    NotAService(String),

    #[error("Service {name} failed to start: {reason}")]
    StartFailed { name: String, reason: String },

    #[error("Daemon is not running ({0})")]
    ServiceNotRunning(String),

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to parse TOML: {0}")]
    TomlDecode(#[from] toml::de::Error),

    #[error("Failed to write TOML: {0}")]
    TomlEncode(#[from] toml::ser::Error),

    #[error("Server error: {0}")]
    Server(String),
}

/// Wire-level error classification carried in `error` responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidVersion,
    InvalidName,
    FileNotFound,
    PackageNotFound,
    ChecksumMismatch,
    NoVersionsFound,
    NotInstalled,
    NotAService,
    StartFailed,
    ServiceNotRunning,
    UnknownCommand,
    InvalidRequest,
    Storage,
    ServerError,
}

impl PkgError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidVersion(_) => ErrorKind::InvalidVersion,
            Self::InvalidName(_) => ErrorKind::InvalidName,
            Self::FileNotFound(_) => ErrorKind::FileNotFound,
            Self::PackageNotFound { .. } => ErrorKind::PackageNotFound,
            Self::ChecksumMismatch(_) => ErrorKind::ChecksumMismatch,
            Self::NoVersionsFound { .. } => ErrorKind::NoVersionsFound,
            Self::NotInstalled(_) => ErrorKind::NotInstalled,
            Self::NotAService(_) => ErrorKind::NotAService,
            Self::StartFailed { .. } => ErrorKind::StartFailed,
            Self::ServiceNotRunning(_) => ErrorKind::ServiceNotRunning,
            Self::UnknownCommand(_) => ErrorKind::UnknownCommand,
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::Archive(_)
            | Self::Io(_)
            | Self::Serialization(_)
            | Self::TomlDecode(_)
            | Self::TomlEncode(_) => ErrorKind::Storage,
            Self::Server(_) => ErrorKind::ServerError,
        }
    }
}

pub type Result<T> = std::result::Result<T, PkgError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_variants() {
        assert_eq!(
            PkgError::InvalidVersion("1.x".into()).kind(),
            ErrorKind::InvalidVersion
        );
        assert_eq!(
            PkgError::NotAService("web".into()).kind(),
            ErrorKind::NotAService
        );
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk");
        assert_eq!(PkgError::from(io).kind(), ErrorKind::Storage);
    }

    #[test]
    fn unknown_command_message() {
        let err = PkgError::UnknownCommand("frobnicate".into());
        assert_eq!(err.to_string(), "Unknown command: frobnicate");
    }

    #[test]
    fn error_kind_wire_names() {
        let json = serde_json::to_string(&ErrorKind::ChecksumMismatch).unwrap();
        assert_eq!(json, "\"checksum_mismatch\"");
    }
}
