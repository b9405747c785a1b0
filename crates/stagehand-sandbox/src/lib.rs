//! The sandbox capability consumed by the orchestration core, plus two
//! backends: [`LocalSandbox`] runs commands and writes files under a host
//! directory, [`MemSandbox`] keeps everything in memory and replays scripted
//! process behavior.
//!
//! All paths crossing this boundary are relative to the sandbox working root
//! (`""` is the root itself).

mod error;
mod local;
mod mem;
mod ports;
mod process;

pub use error::{SandboxError, SandboxResult};
pub use local::LocalSandbox;
pub use mem::{MemSandbox, ProcessScript};
pub use ports::detect_port;
pub use process::{ProcessKiller, SandboxProcess};

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

pub type DynSandbox = Arc<dyn Sandbox>;

/// One entry returned by [`Sandbox::readdir`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortEventKind {
    Open,
    Close,
}

/// A listening port appeared or went away inside the sandbox.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortEvent {
    pub port: u16,
    pub kind: PortEventKind,
    pub url: String,
}

/// Filesystem and process capability of an isolated execution environment.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Create a directory; with `recursive`, missing parents are created and an
    /// existing directory is not an error.
    async fn mkdir(&self, path: &str, recursive: bool) -> SandboxResult<()>;
    async fn write_file(&self, path: &str, contents: &[u8]) -> SandboxResult<()>;
    async fn read_file(&self, path: &str) -> SandboxResult<Vec<u8>>;
    async fn readdir(&self, path: &str) -> SandboxResult<Vec<DirEntry>>;
    /// Remove a file or directory; directories require `recursive`.
    async fn rm(&self, path: &str, recursive: bool) -> SandboxResult<()>;
    /// Run `command` through the sandbox shell.
    async fn spawn(&self, command: &str) -> SandboxResult<SandboxProcess>;
    /// Subscribe to listening-port notifications.
    fn port_events(&self) -> broadcast::Receiver<PortEvent>;
}
