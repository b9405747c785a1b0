//! Orchestration core: turns parser events into display state and sandbox
//! effects, and keeps the sandbox installed and running without looping.
//!
//! Entry point is [`Orchestrator`]; the remaining modules are its building
//! blocks and are usable on their own.

pub mod alerts;
pub mod catalog;
pub mod config;
pub mod editor;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod previews;
pub mod runner;
pub mod scheduler;
pub mod setup;
pub mod terminal;

pub use alerts::{Alert, AlertKind, AlertSource};
pub use catalog::{CatalogEntry, FileCatalog};
pub use config::OrchestratorConfig;
pub use editor::Document;
pub use error::{WorkbenchError, WorkbenchResult};
pub use events::WorkbenchEvent;
pub use orchestrator::{AUTO_ARTIFACT_ID, ArtifactSummary, Orchestrator};
pub use previews::Preview;
pub use runner::{ActionRecord, ActionRunner, ActionStatus, AlertSink, RunHandle, RunnerContext};
pub use setup::{SetupKind, SetupState};
pub use terminal::Terminal;
