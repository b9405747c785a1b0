use stagehand_protocol::ProtocolError;
use stagehand_sandbox::SandboxError;
use thiserror::Error;

pub type WorkbenchResult<T> = Result<T, WorkbenchError>;

#[derive(Debug, Error)]
pub enum WorkbenchError {
    #[error("unknown artifact '{0}'")]
    UnknownArtifact(String),
    #[error("unknown action '{action_id}' in artifact '{artifact_id}'")]
    UnknownAction {
        artifact_id: String,
        action_id: String,
    },
    #[error("no such file '{0}'")]
    UnknownFile(String),
    #[error("sandbox error: {0}")]
    Sandbox(#[from] SandboxError),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("action runner for '{0}' has shut down")]
    RunnerClosed(String),
}
