use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Output fragments that mean a dependency is missing from the sandbox.
pub const MISSING_MODULE_SIGNATURES: &[&str] = &[
    "Cannot find module",
    "Module not found",
    "Failed to resolve import",
    "ERR_MODULE_NOT_FOUND",
    "Cannot find package",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    Error,
    Warning,
    Info,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSource {
    Terminal,
    Preview,
    Filesystem,
}

/// A failure or notice surfaced by the sandbox, a runner or the UI.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub raw_output: String,
    pub source: AlertSource,
}

impl Alert {
    pub fn error(
        source: AlertSource,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            kind: AlertKind::Error,
            title: title.into(),
            description: description.into(),
            raw_output: String::new(),
            source,
        }
    }

    pub fn with_output(mut self, raw_output: impl Into<String>) -> Self {
        self.raw_output = raw_output.into();
        self
    }

    /// True when any text of the alert carries a missing-module signature.
    pub fn is_missing_module(&self) -> bool {
        [&self.title, &self.description, &self.raw_output]
            .iter()
            .any(|text| {
                MISSING_MODULE_SIGNATURES
                    .iter()
                    .any(|signature| text.contains(signature))
            })
    }
}

/// Most recent alerts, oldest evicted first.
#[derive(Debug, Clone)]
pub struct AlertLog {
    alerts: VecDeque<Alert>,
    capacity: usize,
}

impl AlertLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            alerts: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, alert: Alert) {
        if self.alerts.len() == self.capacity {
            self.alerts.pop_front();
        }
        self.alerts.push_back(alert);
    }

    pub fn list(&self) -> Vec<Alert> {
        self.alerts.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.alerts.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_module_signature_matches_any_field() {
        let alert = Alert::error(AlertSource::Preview, "Preview crashed", "see output")
            .with_output("Error: Cannot find module 'lodash'\n    at require");
        assert!(alert.is_missing_module());

        let alert = Alert::error(
            AlertSource::Terminal,
            "Vite error",
            "[vite] Failed to resolve import \"react-router\"",
        );
        assert!(alert.is_missing_module());

        let alert = Alert::error(AlertSource::Terminal, "Command failed", "exit code 1");
        assert!(!alert.is_missing_module());
    }

    #[test]
    fn log_is_bounded() {
        let mut log = AlertLog::new(2);
        for n in 0..3 {
            log.push(Alert::error(AlertSource::Terminal, format!("alert {n}"), ""));
        }
        let titles: Vec<_> = log.list().into_iter().map(|alert| alert.title).collect();
        assert_eq!(titles, vec!["alert 1", "alert 2"]);
    }
}
