//! svcpkg daemon: the background process that owns the control socket and
//! supervises installed services.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 svcpkg daemon                 │
//! ├──────────────────────────────────────────────┤
//! │  DaemonServer (unix socket, one JSON line     │
//! │  per request and per response)               │
//! │        │                                      │
//! │  Dispatcher ── Installer ── ServiceSupervisor │
//! │        │            │              │          │
//! │   ConfigStore (config.toml, one global lock)  │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! Services run as detached children in their own process groups, tracked by
//! PID files under `<home>/services/`.

pub mod client;
pub mod lifecycle;
pub mod pid;
pub mod protocol;
pub mod server;
pub mod services;

pub use client::DaemonClient;
pub use protocol::{Outcome, Request, Status};
pub use server::{DaemonConfig, DaemonServer, Dispatcher};
pub use services::ServiceSupervisor;
