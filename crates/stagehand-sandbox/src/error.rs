use std::io;

use thiserror::Error;

pub type SandboxResult<T> = Result<T, SandboxError>;

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("I/O error at '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },
    #[error("no such file or directory: '{0}'")]
    NotFound(String),
    #[error("failed to spawn '{command}': {reason}")]
    Spawn { command: String, reason: String },
}

pub(crate) fn io_error(path: impl Into<String>, source: io::Error) -> SandboxError {
    if source.kind() == io::ErrorKind::NotFound {
        return SandboxError::NotFound(path.into());
    }
    SandboxError::Io {
        path: path.into(),
        source,
    }
}
