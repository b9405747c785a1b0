use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("path '{path}' is outside project root '{root}'")]
    OutsideRoot { path: String, root: String },
    #[error("manifest is not valid JSON: {0}")]
    Manifest(#[from] serde_json::Error),
}
