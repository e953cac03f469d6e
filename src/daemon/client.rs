//! Control-plane client: one fresh connection per request.
//!
//! Every failure is reported as an [`Outcome::Error`], never as a Rust error,
//! so callers treat local and remote failures the same way.

use std::io;
use std::path::{Path, PathBuf};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::{debug, trace};

use super::protocol::{Outcome, Request};
use crate::error::{ErrorKind, PkgError};

#[derive(Debug, Clone)]
pub struct DaemonClient {
    socket_path: PathBuf,
}

impl DaemonClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn socket_exists(&self) -> bool {
        self.socket_path.exists()
    }

    /// True when the daemon answers `ping`.
    pub async fn is_running(&self) -> bool {
        self.send(&Request::Ping).await.is_success()
    }

    pub async fn send(&self, request: &Request) -> Outcome {
        let mut stream = match UnixStream::connect(&self.socket_path).await {
            Ok(stream) => stream,
            Err(e) => {
                debug!(socket = %self.socket_path.display(), "Connect failed: {}", e);
                return not_running(&self.socket_path, &e);
            }
        };

        match exchange(&mut stream, request).await {
            Ok(outcome) => outcome,
            Err(e) => {
                debug!(command = request.command(), "Request failed: {}", e);
                Outcome::error(ErrorKind::ServerError, e.to_string())
            }
        }
    }
}

async fn exchange(stream: &mut UnixStream, request: &Request) -> Result<Outcome, PkgError> {
    let (reader, mut writer) = stream.split();

    writer.write_all(request.to_line()?.as_bytes()).await?;
    writer.flush().await?;
    trace!(command = request.command(), "Request sent");

    let mut line = String::new();
    let read = BufReader::new(reader).read_line(&mut line).await?;
    if read == 0 {
        return Err(PkgError::Server(
            "daemon closed the connection without responding".into(),
        ));
    }
    Outcome::from_line(&line)
}

fn not_running(socket_path: &Path, err: &io::Error) -> Outcome {
    let reason = match err.kind() {
        io::ErrorKind::NotFound => format!("no socket at {}", socket_path.display()),
        io::ErrorKind::ConnectionRefused => {
            format!("connection refused at {}", socket_path.display())
        }
        _ => format!("cannot connect to {}: {}", socket_path.display(), err),
    };
    PkgError::ServiceNotRunning(reason).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UnixListener;

    #[tokio::test]
    async fn missing_socket_is_not_running() {
        let tmp = tempfile::tempdir().unwrap();
        let client = DaemonClient::new(tmp.path().join("absent.sock"));
        assert!(!client.socket_exists());

        let outcome = client.send(&Request::List).await;
        assert_eq!(outcome.error_kind(), Some(ErrorKind::ServiceNotRunning));
        assert!(outcome.message().starts_with("Daemon is not running"));
        assert!(!client.is_running().await);
    }

    #[tokio::test]
    async fn stale_socket_file_is_not_running() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("stale.sock");
        drop(UnixListener::bind(&path).unwrap());
        assert!(path.exists());

        let outcome = DaemonClient::new(&path).send(&Request::Ping).await;
        assert_eq!(outcome.error_kind(), Some(ErrorKind::ServiceNotRunning));
    }

    #[tokio::test]
    async fn exchanges_one_line_each_way() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("echo.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let (reader, mut writer) = stream.split();
            let mut line = String::new();
            BufReader::new(reader).read_line(&mut line).await.unwrap();
            let request = Request::from_line(&line).unwrap();
            let reply = Outcome::info(format!("got {}", request.command())).with("n", 1);
            writer.write_all(reply.to_line().as_bytes()).await.unwrap();
        });

        let outcome = DaemonClient::new(&path).send(&Request::ListServices).await;
        server.await.unwrap();
        assert!(outcome.is_info());
        assert_eq!(outcome.message(), "got list_services");
        assert_eq!(outcome.get("n"), Some(&serde_json::json!(1)));
    }

    #[tokio::test]
    async fn silent_server_is_a_server_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("mute.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });

        let outcome = DaemonClient::new(&path).send(&Request::Ping).await;
        server.await.unwrap();
        assert_eq!(outcome.error_kind(), Some(ErrorKind::ServerError));
    }
}
