//! Control protocol: one JSON object per line in each direction.
//!
//! Requests are tagged by `command`; responses carry `status`
//! (`success` | `info` | `error`), `message`, and command-specific fields.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ErrorKind, PkgError};

/// Request from client to daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Request {
    Create {
        name: String,
        version: String,
        files: Vec<String>,
        #[serde(default)]
        os: Option<String>,
        #[serde(default)]
        arch: Option<String>,
        #[serde(default)]
        is_service: bool,
        #[serde(default)]
        service_executable: Option<String>,
        #[serde(default)]
        service_args: Vec<String>,
    },
    Install {
        name: String,
        version: String,
        #[serde(default)]
        os: Option<String>,
        #[serde(default)]
        arch: Option<String>,
        #[serde(default = "default_true")]
        start_service: bool,
    },
    Uninstall {
        name: String,
    },
    List,
    Update {
        name: String,
        #[serde(default)]
        version: Option<String>,
        #[serde(default)]
        os: Option<String>,
        #[serde(default)]
        arch: Option<String>,
    },
    StartService {
        name: String,
    },
    StopService {
        name: String,
    },
    RestartService {
        name: String,
    },
    ServiceStatus {
        name: String,
    },
    ListServices,
    Ping,
}

fn default_true() -> bool {
    true
}

impl Request {
    /// Every command name the daemon understands.
    pub const COMMANDS: [&'static str; 11] = [
        "create",
        "install",
        "uninstall",
        "list",
        "update",
        "start_service",
        "stop_service",
        "restart_service",
        "service_status",
        "list_services",
        "ping",
    ];

    pub fn command(&self) -> &'static str {
        match self {
            Request::Create { .. } => "create",
            Request::Install { .. } => "install",
            Request::Uninstall { .. } => "uninstall",
            Request::List => "list",
            Request::Update { .. } => "update",
            Request::StartService { .. } => "start_service",
            Request::StopService { .. } => "stop_service",
            Request::RestartService { .. } => "restart_service",
            Request::ServiceStatus { .. } => "service_status",
            Request::ListServices => "list_services",
            Request::Ping => "ping",
        }
    }

    /// Requests that only read state and need not hold the store lock.
    pub fn is_read_only(&self) -> bool {
        matches!(self, Request::List | Request::Ping)
    }

    /// Decode one request line, separating unknown commands from malformed
    /// requests.
    pub fn from_line(line: &str) -> Result<Self, PkgError> {
        let value: Value = serde_json::from_str(line.trim())
            .map_err(|e| PkgError::InvalidRequest(format!("not valid JSON: {e}")))?;
        let command = value
            .get("command")
            .ok_or_else(|| PkgError::InvalidRequest("missing \"command\" field".into()))?
            .as_str()
            .ok_or_else(|| PkgError::InvalidRequest("\"command\" must be a string".into()))?;
        if !Self::COMMANDS.contains(&command) {
            return Err(PkgError::UnknownCommand(command.to_string()));
        }
        serde_json::from_value(value).map_err(|e| PkgError::InvalidRequest(e.to_string()))
    }

    pub fn to_line(&self) -> Result<String, PkgError> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// Result of a control-plane operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "WireResponse", try_from = "WireResponse")]
pub enum Outcome {
    Success {
        message: String,
        payload: Map<String, Value>,
    },
    Info {
        message: String,
        payload: Map<String, Value>,
    },
    Error {
        kind: ErrorKind,
        message: String,
    },
}

impl Outcome {
    pub fn success(message: impl Into<String>) -> Self {
        Outcome::Success {
            message: message.into(),
            payload: Map::new(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Outcome::Info {
            message: message.into(),
            payload: Map::new(),
        }
    }

    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Outcome::Error {
            kind,
            message: message.into(),
        }
    }

    /// Attach a payload field. Errors carry no payload, so this is a no-op on them.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        match &mut self {
            Outcome::Success { payload, .. } | Outcome::Info { payload, .. } => {
                payload.insert(key.to_string(), value.into());
            }
            Outcome::Error { .. } => {}
        }
        self
    }

    pub fn status(&self) -> Status {
        match self {
            Outcome::Success { .. } => Status::Success,
            Outcome::Info { .. } => Status::Info,
            Outcome::Error { .. } => Status::Error,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Outcome::Success { message, .. }
            | Outcome::Info { message, .. }
            | Outcome::Error { message, .. } => message,
        }
    }

    pub fn payload(&self) -> Option<&Map<String, Value>> {
        match self {
            Outcome::Success { payload, .. } | Outcome::Info { payload, .. } => Some(payload),
            Outcome::Error { .. } => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload().and_then(|p| p.get(key))
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Outcome::Error { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    pub fn is_info(&self) -> bool {
        matches!(self, Outcome::Info { .. })
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Outcome::Error { .. })
    }

    pub fn to_line(&self) -> String {
        // A Map<String, Value> always serializes.
        let mut line = serde_json::to_string(self)
            .unwrap_or_else(|_| r#"{"status":"error","message":"unencodable response"}"#.into());
        line.push('\n');
        line
    }

    pub fn from_line(line: &str) -> Result<Self, PkgError> {
        Ok(serde_json::from_str(line.trim())?)
    }
}

impl From<PkgError> for Outcome {
    fn from(err: PkgError) -> Self {
        Outcome::error(err.kind(), err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Info,
    Error,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Success => "success",
            Status::Info => "info",
            Status::Error => "error",
        }
    }
}

/// Flat wire form of [`Outcome`].
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireResponse {
    status: Status,
    #[serde(default)]
    message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    kind: Option<ErrorKind>,
    #[serde(flatten)]
    payload: Map<String, Value>,
}

impl From<Outcome> for WireResponse {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Success { message, payload } => WireResponse {
                status: Status::Success,
                message,
                kind: None,
                payload,
            },
            Outcome::Info { message, payload } => WireResponse {
                status: Status::Info,
                message,
                kind: None,
                payload,
            },
            Outcome::Error { kind, message } => WireResponse {
                status: Status::Error,
                message,
                kind: Some(kind),
                payload: Map::new(),
            },
        }
    }
}

impl TryFrom<WireResponse> for Outcome {
    type Error = std::convert::Infallible;

    fn try_from(wire: WireResponse) -> Result<Self, std::convert::Infallible> {
        Ok(match wire.status {
            Status::Success => Outcome::Success {
                message: wire.message,
                payload: wire.payload,
            },
            Status::Info => Outcome::Info {
                message: wire.message,
                payload: wire.payload,
            },
            Status::Error => Outcome::Error {
                kind: wire.kind.unwrap_or(ErrorKind::ServerError),
                message: wire.message,
            },
        })
    }
}
