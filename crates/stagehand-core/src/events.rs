use serde::Serialize;

use crate::alerts::Alert;
use crate::previews::Preview;
use crate::runner::ActionStatus;
use crate::setup::SetupKind;

/// State-change notifications published to [`crate::Orchestrator::subscribe`] listeners.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkbenchEvent {
    ArtifactOpened {
        artifact_id: String,
        title: String,
    },
    ArtifactClosed {
        artifact_id: String,
    },
    FolderCreated {
        path: String,
    },
    /// Display content changed; `streaming` while the owning action is open.
    FileChanged {
        path: String,
        streaming: bool,
    },
    FileDeleted {
        path: String,
    },
    ActionStatus {
        artifact_id: String,
        action_id: String,
        status: ActionStatus,
    },
    AlertRaised(Alert),
    SetupEnqueued {
        kind: SetupKind,
        command: String,
        attempt: u32,
    },
    PreviewsChanged {
        previews: Vec<Preview>,
    },
}
