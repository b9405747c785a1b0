use std::time::Duration;

use stagehand_protocol::DEFAULT_PROJECT_ROOT;

/// Tunables for the orchestrator and its auto-setup scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Canonical absolute project root used for display paths.
    pub project_root: String,
    /// Command enqueued by the synthetic install action.
    pub install_command: String,
    /// Start command used when neither a declared start nor a manifest script exists.
    pub default_start_command: String,
    /// Maximum automatic installs (and, separately, starts) per session.
    pub attempt_cap: u32,
    pub install_cooldown: Duration,
    pub start_cooldown: Duration,
    /// Wait after an artifact closes (or a setup trigger fires) before checking.
    pub artifact_settle_delay: Duration,
    /// Wait after enqueuing an install before re-running the scheduler.
    pub install_settle_delay: Duration,
    /// Retry delay when the manifest does not parse yet.
    pub manifest_retry_delay: Duration,
    /// How long the in-flight guard stays set after enqueuing a start.
    pub start_guard_release: Duration,
    pub max_alerts: usize,
    pub terminal_scrollback: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            project_root: DEFAULT_PROJECT_ROOT.into(),
            install_command: "npm install".into(),
            default_start_command: "npm run dev".into(),
            attempt_cap: 2,
            install_cooldown: Duration::from_secs(5),
            start_cooldown: Duration::from_secs(5),
            artifact_settle_delay: Duration::from_secs(3),
            install_settle_delay: Duration::from_secs(10),
            manifest_retry_delay: Duration::from_millis(1500),
            start_guard_release: Duration::from_secs(1),
            max_alerts: 50,
            terminal_scrollback: 2000,
        }
    }
}

impl OrchestratorConfig {
    /// Defaults overridden by `STAGEHAND_*` environment variables.
    ///
    /// Malformed numeric values are ignored with a warning.
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(root) = lookup("STAGEHAND_PROJECT_ROOT") {
            self.project_root = root;
        }
        if let Some(command) = lookup("STAGEHAND_INSTALL_COMMAND") {
            self.install_command = command;
        }
        if let Some(command) = lookup("STAGEHAND_START_COMMAND") {
            self.default_start_command = command;
        }
        if let Some(cap) = parse_var(&lookup, "STAGEHAND_ATTEMPT_CAP") {
            self.attempt_cap = cap;
        }
        let millis = |key: &str| parse_var::<u64>(&lookup, key).map(Duration::from_millis);
        if let Some(value) = millis("STAGEHAND_INSTALL_COOLDOWN_MS") {
            self.install_cooldown = value;
        }
        if let Some(value) = millis("STAGEHAND_START_COOLDOWN_MS") {
            self.start_cooldown = value;
        }
        if let Some(value) = millis("STAGEHAND_SETTLE_DELAY_MS") {
            self.artifact_settle_delay = value;
        }
        if let Some(value) = millis("STAGEHAND_INSTALL_SETTLE_MS") {
            self.install_settle_delay = value;
        }
        if let Some(value) = millis("STAGEHAND_MANIFEST_RETRY_MS") {
            self.manifest_retry_delay = value;
        }
        self
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring malformed configuration value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn overrides_apply_and_bad_numbers_are_ignored() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("STAGEHAND_PROJECT_ROOT", "/srv/app"),
            ("STAGEHAND_ATTEMPT_CAP", "3"),
            ("STAGEHAND_INSTALL_COOLDOWN_MS", "250"),
            ("STAGEHAND_START_COOLDOWN_MS", "soon"),
        ]);
        let config = OrchestratorConfig::default()
            .with_overrides(|key| vars.get(key).map(|value| value.to_string()));

        assert_eq!(config.project_root, "/srv/app");
        assert_eq!(config.attempt_cap, 3);
        assert_eq!(config.install_cooldown, Duration::from_millis(250));
        assert_eq!(config.start_cooldown, Duration::from_secs(5));
        assert_eq!(config.install_command, "npm install");
    }
}
