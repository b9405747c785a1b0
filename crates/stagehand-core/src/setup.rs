//! Auto-install / auto-start bookkeeping.
//!
//! [`SetupState::decide`] is the whole scheduler policy: given the manifest
//! status and the current time it either declines or claims the in-flight
//! guard and tells the caller which synthetic action to enqueue. The caller
//! owns timers and the runner; this module owns counters and flags.

use std::time::Duration;

use serde::Serialize;
use stagehand_protocol::PackageManifest;
use tokio::time::Instant;

use crate::config::OrchestratorConfig;

/// Per-session auto-setup flags and counters.
#[derive(Clone, Debug, Default, Serialize)]
pub struct SetupState {
    pub install_pending: bool,
    pub start_pending: bool,
    pub install_attempts: u32,
    pub start_attempts: u32,
    #[serde(skip)]
    pub last_install_at: Option<Instant>,
    #[serde(skip)]
    pub last_start_at: Option<Instant>,
    pub artifact_has_own_start: bool,
    pub in_progress: bool,
    pub declared_start_command: Option<String>,
    /// A check was refused while the guard was held; re-check on release.
    #[serde(skip)]
    pub recheck_on_release: bool,
}

/// What the scheduler sees of the dependency manifest.
#[derive(Clone, Debug)]
pub enum ManifestStatus {
    Missing,
    /// Present but not parseable yet (usually still streaming).
    Unparsable,
    Parsed(PackageManifest),
}

/// Inputs for one scheduler run.
#[derive(Clone, Debug)]
pub struct SetupContext {
    pub now: Instant,
    pub restoring: bool,
    pub has_active_preview: bool,
    pub manifest: ManifestStatus,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SetupKind {
    Install,
    Start,
}

/// Outcome of a scheduler run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SetupDecision {
    /// Another setup action is in flight.
    Busy,
    Restoring,
    NoManifest,
    /// Manifest unparsable; check again later.
    RetryManifest,
    /// Guard claimed: enqueue the install command.
    Install {
        attempt: u32,
        previous_at: Option<Instant>,
    },
    /// Guard claimed: enqueue `command` as a start action.
    Start {
        command: String,
        attempt: u32,
        previous_at: Option<Instant>,
    },
    /// Work is pending but held back by a cooldown; re-check after `retry_in`.
    CoolingDown { kind: SetupKind, retry_in: Duration },
    /// Nothing to do (or capped).
    Idle,
}

impl SetupState {
    /// A dependency manifest or lockfile was written.
    pub fn note_manifest_write(&mut self) {
        self.install_pending = true;
        self.start_pending = true;
    }

    /// An install command was intercepted.
    pub fn note_install_intent(&mut self) {
        self.install_pending = true;
    }

    /// A start command was intercepted.
    pub fn note_start_intent(&mut self, command: impl Into<String>) {
        self.start_pending = true;
        self.artifact_has_own_start = true;
        self.declared_start_command = Some(command.into());
    }

    /// A missing-module failure was reported.
    pub fn note_missing_module(&mut self) {
        self.install_pending = true;
        self.start_pending = true;
    }

    /// A start was explicitly requested (e.g. the preview is gone).
    pub fn request_start(&mut self) {
        self.start_pending = true;
    }

    /// Drop the in-flight guard. Returns true if a check was refused meanwhile.
    pub fn release_guard(&mut self) -> bool {
        self.in_progress = false;
        std::mem::take(&mut self.recheck_on_release)
    }

    /// Run the scheduler policy once.
    pub fn decide(&mut self, ctx: &SetupContext, config: &OrchestratorConfig) -> SetupDecision {
        if self.in_progress {
            self.recheck_on_release = true;
            return SetupDecision::Busy;
        }
        if ctx.restoring {
            return SetupDecision::Restoring;
        }
        let manifest = match &ctx.manifest {
            ManifestStatus::Missing => return SetupDecision::NoManifest,
            ManifestStatus::Unparsable => return SetupDecision::RetryManifest,
            ManifestStatus::Parsed(manifest) => manifest,
        };

        let mut cooling: Option<(SetupKind, Duration)> = None;

        if self.install_pending && self.install_attempts < config.attempt_cap {
            match remaining(self.last_install_at, config.install_cooldown, ctx.now) {
                None => {
                    let previous_at = self.last_install_at;
                    self.in_progress = true;
                    self.install_pending = false;
                    self.install_attempts += 1;
                    self.last_install_at = Some(ctx.now);
                    self.start_pending = true;
                    return SetupDecision::Install {
                        attempt: self.install_attempts,
                        previous_at,
                    };
                }
                Some(wait) => cooling = Some((SetupKind::Install, wait)),
            }
        }

        let wants_start = self.start_pending
            || (!ctx.has_active_preview && !self.artifact_has_own_start);
        if cooling.is_none() && wants_start && self.start_attempts < config.attempt_cap {
            match remaining(self.last_start_at, config.start_cooldown, ctx.now) {
                None => {
                    let previous_at = self.last_start_at;
                    self.in_progress = true;
                    self.start_pending = false;
                    self.start_attempts += 1;
                    self.last_start_at = Some(ctx.now);
                    return SetupDecision::Start {
                        command: self.start_command(manifest, config),
                        attempt: self.start_attempts,
                        previous_at,
                    };
                }
                Some(wait) => cooling = Some((SetupKind::Start, wait)),
            }
        }

        match cooling {
            Some((kind, retry_in)) => SetupDecision::CoolingDown { kind, retry_in },
            None => SetupDecision::Idle,
        }
    }

    /// Undo the bookkeeping of a decision whose action could not be enqueued.
    pub fn rollback(&mut self, decision: &SetupDecision) {
        match decision {
            SetupDecision::Install { previous_at, .. } => {
                self.install_pending = true;
                self.install_attempts = self.install_attempts.saturating_sub(1);
                self.last_install_at = *previous_at;
            }
            SetupDecision::Start { previous_at, .. } => {
                self.start_pending = true;
                self.start_attempts = self.start_attempts.saturating_sub(1);
                self.last_start_at = *previous_at;
            }
            _ => return,
        }
        self.in_progress = false;
    }

    fn start_command(&self, manifest: &PackageManifest, config: &OrchestratorConfig) -> String {
        self.declared_start_command
            .clone()
            .or_else(|| manifest.start_command())
            .unwrap_or_else(|| config.default_start_command.clone())
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Time left in a cooldown window, or `None` once it has elapsed.
fn remaining(last: Option<Instant>, cooldown: Duration, now: Instant) -> Option<Duration> {
    let elapsed = now.saturating_duration_since(last?);
    (elapsed < cooldown).then(|| cooldown - elapsed)
}
