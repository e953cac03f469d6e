#[cfg(not(unix))]
compile_error!("svcpkg supervises processes through unix sockets and signals");

pub mod clienv;
pub mod daemon;
pub mod error;
pub mod installer;
pub mod remote;
pub mod repository;
pub mod settings;
pub mod store;
pub mod version;

pub use error::{ErrorKind, PkgError, Result};
pub use installer::{InstallRequest, Installer};
pub use repository::{NewPackage, PackageManifest, PackageRepository};
pub use store::ConfigStore;
