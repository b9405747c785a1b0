//! Wire-level building blocks for turning a streamed response into commands:
//! the incremental marker parser, action/artifact types, project path
//! normalization, and the fixed rule tables used to infer command intent and
//! dependency manifests.
//!
//! Nothing in this crate performs I/O.

pub mod classify;
pub mod error;
pub mod manifest;
pub mod parser;
pub mod paths;
pub mod types;

pub use classify::{CommandIntent, classify};
pub use error::ProtocolError;
pub use manifest::{PackageManifest, is_dependency_manifest};
pub use parser::StreamParser;
pub use paths::{DEFAULT_PROJECT_ROOT, normalize_project_path, to_sandbox_path};
pub use types::{ActionData, ActionEvent, ActionKind, ArtifactData, ParserEvent};
