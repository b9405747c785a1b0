use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Kind of command carried by an action marker (`type="..."` attribute).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Write the payload to `filePath`.
    File,
    /// Run a one-shot command.
    Shell,
    /// Start a long-running process (dev server).
    Start,
}

impl ActionKind {
    pub const FILE: &'static str = "file";
    pub const SHELL: &'static str = "shell";
    pub const START: &'static str = "start";

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::File => Self::FILE,
            ActionKind::Shell => Self::SHELL,
            ActionKind::Start => Self::START,
        }
    }
}

impl FromStr for ActionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            Self::FILE => Ok(ActionKind::File),
            Self::SHELL => Ok(ActionKind::Shell),
            Self::START => Ok(ActionKind::Start),
            other => Err(format!("unknown action type '{other}'")),
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of a single action.
///
/// `content` is the file body for [`ActionKind::File`] and the command line
/// for shell/start actions. While an action is streaming it holds the whole
/// partial payload received so far.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionData {
    pub kind: ActionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    pub content: String,
}

impl ActionData {
    pub fn file(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            kind: ActionKind::File,
            file_path: Some(path.into()),
            content: content.into(),
        }
    }

    pub fn shell(command: impl Into<String>) -> Self {
        Self {
            kind: ActionKind::Shell,
            file_path: None,
            content: command.into(),
        }
    }

    pub fn start(command: impl Into<String>) -> Self {
        Self {
            kind: ActionKind::Start,
            file_path: None,
            content: command.into(),
        }
    }

    pub fn is_file(&self) -> bool {
        self.kind == ActionKind::File
    }
}

/// Attributes of an artifact marker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactData {
    pub message_id: String,
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

/// An action lifecycle notification, scoped to its artifact and stream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionEvent {
    pub message_id: String,
    pub artifact_id: String,
    pub action_id: String,
    pub action: ActionData,
}

/// Lifecycle events produced by the stream parser, in arrival order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ParserEvent {
    /// Prose outside any artifact.
    Text { message_id: String, text: String },
    ArtifactOpen(ArtifactData),
    ArtifactClose(ArtifactData),
    ActionOpen(ActionEvent),
    /// Whole partial payload of a still-open file action.
    ActionStream(ActionEvent),
    ActionClose(ActionEvent),
}

impl ParserEvent {
    pub fn message_id(&self) -> &str {
        match self {
            ParserEvent::Text { message_id, .. } => message_id,
            ParserEvent::ArtifactOpen(artifact) | ParserEvent::ArtifactClose(artifact) => {
                &artifact.message_id
            }
            ParserEvent::ActionOpen(event)
            | ParserEvent::ActionStream(event)
            | ParserEvent::ActionClose(event) => &event.message_id,
        }
    }
}
