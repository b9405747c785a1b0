//! Wires parser events to the display catalog and the action runners, and
//! owns the auto-install / auto-start policy.
//!
//! [`Orchestrator`] is a cheap cloneable handle. All state lives behind one
//! mutex that is never held across an await; sandbox I/O happens in runner
//! workers or in the async API methods after the lock is released.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use indexmap::IndexMap;
use serde::Serialize;
use stagehand_protocol::manifest::MANIFEST_FILE;
use stagehand_protocol::{
    ActionData, ActionEvent, ActionKind, ArtifactData, CommandIntent, PackageManifest,
    ParserEvent, StreamParser, classify, is_dependency_manifest, normalize_project_path,
    to_sandbox_path,
};
use stagehand_sandbox::{DynSandbox, PortEvent, SandboxError};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::alerts::{Alert, AlertLog};
use crate::catalog::{CatalogEntry, FileCatalog, looks_binary};
use crate::config::OrchestratorConfig;
use crate::editor::{Document, EditorState};
use crate::error::{WorkbenchError, WorkbenchResult};
use crate::events::WorkbenchEvent;
use crate::previews::{Preview, PreviewState};
use crate::runner::{ActionRecord, ActionRunner, ActionStatus, RunnerContext};
use crate::scheduler::{ScheduledTasks, TaskPurpose};
use crate::setup::{ManifestStatus, SetupContext, SetupDecision, SetupKind, SetupState};
use crate::terminal::Terminal;

/// Artifact id owning orchestrator-generated actions.
pub const AUTO_ARTIFACT_ID: &str = "__auto__";

const EVENT_CAPACITY: usize = 1024;

/// Read-only view of an artifact and its actions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ArtifactSummary {
    pub id: String,
    pub title: String,
    pub closed: bool,
    pub actions: Vec<ActionRecord>,
}

#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    config: OrchestratorConfig,
    sandbox: DynSandbox,
    terminal: Terminal,
    events: broadcast::Sender<WorkbenchEvent>,
    tasks: Arc<ScheduledTasks>,
    state: Mutex<WorkbenchState>,
    port_forwarder: Mutex<Option<AbortHandle>>,
    weak_self: Weak<Inner>,
}

struct ArtifactRecord {
    data: ArtifactData,
    closed: bool,
    runner: Arc<ActionRunner>,
}

struct WorkbenchState {
    parser: StreamParser,
    catalog: FileCatalog,
    editor: EditorState,
    previews: PreviewState,
    alerts: AlertLog,
    setup: SetupState,
    artifacts: IndexMap<String, ArtifactRecord>,
    /// Runners of artifacts that were reopened by a later message.
    retired: Vec<Arc<ActionRunner>>,
    auto_runner: Arc<ActionRunner>,
    generating: bool,
    restoring: bool,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("project_root", &self.inner.config.project_root)
            .finish()
    }
}

impl Inner {
    fn runner_context(&self) -> RunnerContext {
        runner_context(
            self.weak_self.clone(),
            &self.sandbox,
            &self.config,
            &self.terminal,
            &self.events,
        )
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.tasks.cancel_all();
        let forwarder = self
            .port_forwarder
            .get_mut()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(forwarder) = forwarder {
            forwarder.abort();
        }
        let state = self.state.get_mut().unwrap_or_else(|p| p.into_inner());
        for record in state.artifacts.values() {
            record.runner.cancel_all();
        }
        for runner in &state.retired {
            runner.cancel_all();
        }
        state.auto_runner.cancel_all();
    }
}

fn runner_context(
    owner: Weak<Inner>,
    sandbox: &DynSandbox,
    config: &OrchestratorConfig,
    terminal: &Terminal,
    events: &broadcast::Sender<WorkbenchEvent>,
) -> RunnerContext {
    RunnerContext {
        sandbox: sandbox.clone(),
        project_root: config.project_root.clone(),
        terminal: terminal.clone(),
        events: events.clone(),
        alerts: Arc::new(move |alert| {
            if let Some(inner) = owner.upgrade() {
                Orchestrator { inner }.record_alert(alert);
            }
        }),
    }
}

impl WorkbenchState {
    fn new(config: &OrchestratorConfig, auto_runner: Arc<ActionRunner>) -> Self {
        Self {
            parser: StreamParser::new(),
            catalog: FileCatalog::new(config.project_root.clone()),
            editor: EditorState::default(),
            previews: PreviewState::default(),
            alerts: AlertLog::new(config.max_alerts),
            setup: SetupState::default(),
            artifacts: IndexMap::new(),
            retired: Vec::new(),
            auto_runner,
            generating: false,
            restoring: false,
        }
    }

    fn runner(&self, artifact_id: &str) -> WorkbenchResult<Arc<ActionRunner>> {
        if artifact_id == AUTO_ARTIFACT_ID {
            return Ok(self.auto_runner.clone());
        }
        self.artifacts
            .get(artifact_id)
            .map(|record| record.runner.clone())
            .ok_or_else(|| WorkbenchError::UnknownArtifact(artifact_id.to_string()))
    }
}

impl Orchestrator {
    /// Build an orchestrator over `sandbox`. Must be called within a Tokio runtime.
    pub fn new(sandbox: DynSandbox, config: OrchestratorConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let terminal = Terminal::new(config.terminal_scrollback);
        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| {
            let ctx = runner_context(weak.clone(), &sandbox, &config, &terminal, &events);
            let auto_runner = Arc::new(ActionRunner::new(AUTO_ARTIFACT_ID, ctx));
            Inner {
                state: Mutex::new(WorkbenchState::new(&config, auto_runner)),
                config,
                sandbox,
                terminal,
                events,
                tasks: Arc::new(ScheduledTasks::new()),
                port_forwarder: Mutex::new(None),
                weak_self: weak.clone(),
            }
        });
        let orchestrator = Self { inner };
        orchestrator.spawn_port_forwarder();
        orchestrator
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkbenchEvent> {
        self.inner.events.subscribe()
    }

    pub fn terminal(&self) -> Terminal {
        self.inner.terminal.clone()
    }

    fn lock(&self) -> MutexGuard<'_, WorkbenchState> {
        self.inner.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn publish(&self, event: WorkbenchEvent) {
        let _ = self.inner.events.send(event);
    }

    fn normalize(&self, path: &str) -> String {
        normalize_project_path(path, &self.inner.config.project_root)
    }

    fn spawn_port_forwarder(&self) {
        let mut ports = self.inner.sandbox.port_events();
        let owner = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            loop {
                match ports.recv().await {
                    Ok(event) => {
                        let Some(inner) = owner.upgrade() else { break };
                        Orchestrator { inner }.apply_port_event(&event);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "port event listener lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        *self
            .inner
            .port_forwarder
            .lock()
            .unwrap_or_else(|p| p.into_inner()) = Some(handle.abort_handle());
    }

    fn apply_port_event(&self, event: &PortEvent) {
        let previews = {
            let mut state = self.lock();
            if !state.previews.apply(event) {
                return;
            }
            state.previews.list()
        };
        info!(port = event.port, kind = ?event.kind, url = %event.url, "preview changed");
        self.publish(WorkbenchEvent::PreviewsChanged { previews });
    }

    fn schedule<F>(&self, purpose: TaskPurpose, delay: std::time::Duration, task: F)
    where
        F: FnOnce(Orchestrator) + Send + 'static,
    {
        let owner = Arc::downgrade(&self.inner);
        self.inner.tasks.schedule(purpose, delay, move || {
            if let Some(inner) = owner.upgrade() {
                task(Orchestrator { inner });
            }
        });
    }

    fn schedule_setup_check(&self) {
        self.schedule(
            TaskPurpose::SetupCheck,
            self.inner.config.artifact_settle_delay,
            |orchestrator| orchestrator.maybe_auto_setup(),
        );
    }

    // -- stream ingestion ---------------------------------------------------

    /// Feed the cumulative text of a message and apply every resulting event.
    ///
    /// Per-event failures are logged; the events are returned in order.
    pub fn parse_message(&self, message_id: &str, text: &str) -> Vec<ParserEvent> {
        let events = self.lock().parser.parse(message_id, text);
        for event in &events {
            if let Err(err) = self.handle_event(event) {
                warn!(message_id, "dropping parser event: {err}");
            }
        }
        events
    }

    /// Apply a single parser event.
    pub fn handle_event(&self, event: &ParserEvent) -> WorkbenchResult<()> {
        match event {
            ParserEvent::Text { .. } => Ok(()),
            ParserEvent::ArtifactOpen(artifact) => {
                self.open_artifact(artifact);
                Ok(())
            }
            ParserEvent::ArtifactClose(artifact) => self.close_artifact(artifact),
            ParserEvent::ActionOpen(event) => {
                let runner = self.lock().runner(&event.artifact_id)?;
                runner.add_action(&event.action_id, event.action.clone());
                if event.action.is_file() {
                    self.display_write(&event.action, true);
                }
                Ok(())
            }
            ParserEvent::ActionStream(event) => {
                let runner = self.lock().runner(&event.artifact_id)?;
                if event.action.is_file() {
                    self.display_write(&event.action, true);
                }
                runner.run_action(&event.action_id, event.action.clone(), true)?;
                Ok(())
            }
            ParserEvent::ActionClose(event) => self.close_action(event),
        }
    }

    fn open_artifact(&self, artifact: &ArtifactData) {
        {
            let mut state = self.lock();
            if state.artifacts.get(&artifact.id).is_some_and(|record| {
                !record.closed && record.data.message_id == artifact.message_id
            }) {
                return;
            }
            // Action ids restart per message, so an artifact reopened by a
            // later message (or after a close) needs a fresh runner; the old
            // one stays reachable for cancellation.
            let runner = Arc::new(ActionRunner::new(
                artifact.id.clone(),
                self.inner.runner_context(),
            ));
            let previous = state.artifacts.insert(
                artifact.id.clone(),
                ArtifactRecord {
                    data: artifact.clone(),
                    closed: false,
                    runner,
                },
            );
            if let Some(previous) = previous {
                state.retired.push(previous.runner);
            }
        }
        debug!(artifact_id = %artifact.id, title = %artifact.title, "artifact opened");
        self.publish(WorkbenchEvent::ArtifactOpened {
            artifact_id: artifact.id.clone(),
            title: artifact.title.clone(),
        });
    }

    fn close_artifact(&self, artifact: &ArtifactData) -> WorkbenchResult<()> {
        {
            let mut state = self.lock();
            let record = state
                .artifacts
                .get_mut(&artifact.id)
                .ok_or_else(|| WorkbenchError::UnknownArtifact(artifact.id.clone()))?;
            record.closed = true;
        }
        debug!(artifact_id = %artifact.id, "artifact closed");
        self.publish(WorkbenchEvent::ArtifactClosed {
            artifact_id: artifact.id.clone(),
        });
        self.schedule_setup_check();
        Ok(())
    }

    fn close_action(&self, event: &ActionEvent) -> WorkbenchResult<()> {
        let (runner, restoring) = {
            let state = self.lock();
            (state.runner(&event.artifact_id)?, state.restoring)
        };
        let action = &event.action;
        match action.kind {
            ActionKind::File => {
                let path = self.display_write(action, false);
                runner.run_action(&event.action_id, action.clone(), false)?;
                if path.as_deref().is_some_and(is_dependency_manifest) {
                    info!(path = ?path, "dependency manifest written");
                    self.lock().setup.note_manifest_write();
                    self.schedule_setup_check();
                }
                Ok(())
            }
            ActionKind::Shell => match classify(&action.content) {
                CommandIntent::Other if restoring => {
                    debug!(command = %action.content, "skipping shell action from history");
                    runner.mark_skipped(&event.action_id, action.clone())
                }
                CommandIntent::Other => {
                    runner.run_action(&event.action_id, action.clone(), false)?;
                    Ok(())
                }
                intent => self.intercept(&runner, event, intent),
            },
            ActionKind::Start => self.intercept(&runner, event, CommandIntent::Start),
        }
    }

    /// Fold an install/start command into setup intent instead of running it.
    fn intercept(
        &self,
        runner: &ActionRunner,
        event: &ActionEvent,
        intent: CommandIntent,
    ) -> WorkbenchResult<()> {
        runner.mark_intercepted(&event.action_id, event.action.clone())?;
        {
            let mut state = self.lock();
            match intent {
                CommandIntent::Install => state.setup.note_install_intent(),
                _ => state.setup.note_start_intent(event.action.content.clone()),
            }
        }
        info!(
            artifact_id = %event.artifact_id,
            action_id = %event.action_id,
            command = %event.action.content,
            ?intent,
            "intercepted setup command"
        );
        self.schedule_setup_check();
        Ok(())
    }

    /// Update the catalog (and open documents) for a file action.
    fn display_write(&self, action: &ActionData, streaming: bool) -> Option<String> {
        let raw = action.file_path.as_deref()?;
        let path = self.normalize(raw);
        if path == self.inner.config.project_root {
            warn!(raw, "file action targets the project root, ignoring");
            return None;
        }
        let (created, changed) = {
            let mut state = self.lock();
            let write = state.catalog.write_file(&path, &action.content, false);
            state
                .editor
                .follow_write(&path, write.previous.as_deref(), &action.content);
            let changed = write.previous.as_deref() != Some(action.content.as_str());
            (write.created_folders, changed)
        };
        for folder in created {
            self.publish(WorkbenchEvent::FolderCreated { path: folder });
        }
        if changed || !streaming {
            self.publish(WorkbenchEvent::FileChanged {
                path: path.clone(),
                streaming,
            });
        }
        Some(path)
    }

    // -- auto setup ---------------------------------------------------------

    fn manifest_status(&self, catalog: &FileCatalog) -> ManifestStatus {
        let path = self.normalize(MANIFEST_FILE);
        match catalog.content(&path) {
            None => ManifestStatus::Missing,
            Some(text) => match PackageManifest::parse(text) {
                Ok(manifest) => ManifestStatus::Parsed(manifest),
                Err(err) => {
                    debug!("manifest not parseable yet: {err}");
                    ManifestStatus::Unparsable
                }
            },
        }
    }

    /// Run the auto-setup scheduler once.
    fn maybe_auto_setup(&self) {
        let (decision, auto_runner) = {
            let mut state = self.lock();
            let ctx = SetupContext {
                now: Instant::now(),
                restoring: state.restoring,
                has_active_preview: state.previews.has_active(),
                manifest: self.manifest_status(&state.catalog),
            };
            let decision = state.setup.decide(&ctx, &self.inner.config);
            (decision, state.auto_runner.clone())
        };

        if !matches!(decision, SetupDecision::RetryManifest | SetupDecision::Busy) {
            self.inner.tasks.cancel(TaskPurpose::ManifestRetry);
        }
        match &decision {
            SetupDecision::RetryManifest => {
                debug!("auto-setup waiting for manifest");
                // Keep the earliest deadline so a stream of triggers cannot starve it.
                if !self.inner.tasks.is_pending(TaskPurpose::ManifestRetry) {
                    self.schedule(
                        TaskPurpose::ManifestRetry,
                        self.inner.config.manifest_retry_delay,
                        |orchestrator| orchestrator.maybe_auto_setup(),
                    );
                }
            }
            SetupDecision::CoolingDown { kind, retry_in } => {
                debug!(?kind, ?retry_in, "auto-setup deferred by cooldown");
                self.schedule(TaskPurpose::SetupCheck, *retry_in, |orchestrator| {
                    orchestrator.maybe_auto_setup()
                });
            }
            SetupDecision::Install { attempt, .. } => {
                let data = ActionData::shell(self.inner.config.install_command.clone());
                if self.enqueue_setup(&auto_runner, SetupKind::Install, data, *attempt, &decision) {
                    self.schedule(
                        TaskPurpose::InstallSettle,
                        self.inner.config.install_settle_delay,
                        |orchestrator| {
                            orchestrator.release_guard();
                            orchestrator.maybe_auto_setup();
                        },
                    );
                }
            }
            SetupDecision::Start {
                command, attempt, ..
            } => {
                auto_runner.stop_processes();
                let data = ActionData::start(command.clone());
                if self.enqueue_setup(&auto_runner, SetupKind::Start, data, *attempt, &decision) {
                    self.schedule(
                        TaskPurpose::StartGuardRelease,
                        self.inner.config.start_guard_release,
                        |orchestrator| {
                            if orchestrator.release_guard() {
                                orchestrator.maybe_auto_setup();
                            }
                        },
                    );
                }
            }
            SetupDecision::Busy
            | SetupDecision::Restoring
            | SetupDecision::NoManifest
            | SetupDecision::Idle => {
                debug!(?decision, "auto-setup: nothing to do");
            }
        }
    }

    fn enqueue_setup(
        &self,
        runner: &ActionRunner,
        kind: SetupKind,
        data: ActionData,
        attempt: u32,
        decision: &SetupDecision,
    ) -> bool {
        let action_id = Uuid::new_v4().to_string();
        let command = data.content.clone();
        runner.add_action(&action_id, data.clone());
        match runner.run_action(&action_id, data, false) {
            Ok(_) => {
                info!(?kind, %command, attempt, "enqueued setup action");
                self.publish(WorkbenchEvent::SetupEnqueued {
                    kind,
                    command,
                    attempt,
                });
                true
            }
            Err(err) => {
                warn!(?kind, %command, "failed to enqueue setup action: {err}");
                self.lock().setup.rollback(decision);
                false
            }
        }
    }

    /// Returns true if a trigger was refused while the guard was held.
    fn release_guard(&self) -> bool {
        self.lock().setup.release_guard()
    }

    /// Request a dev server if no preview is active.
    pub fn ensure_dev_server_running(&self) {
        {
            let mut state = self.lock();
            if state.previews.has_active() {
                return;
            }
            state.setup.request_start();
        }
        self.maybe_auto_setup();
    }

    /// Surface an alert; missing-module failures re-arm install and start.
    pub fn report_alert(&self, alert: Alert) {
        self.record_alert(alert);
    }

    fn record_alert(&self, alert: Alert) {
        let missing_module = alert.is_missing_module();
        {
            let mut state = self.lock();
            state.alerts.push(alert.clone());
            if missing_module {
                state.setup.note_missing_module();
            }
        }
        self.publish(WorkbenchEvent::AlertRaised(alert));
        if missing_module {
            info!("missing module reported, re-arming auto-setup");
            self.maybe_auto_setup();
        }
    }

    // -- files and editor ---------------------------------------------------

    /// Open a catalog file in the editor and select it.
    pub fn open_file(&self, path: &str) -> WorkbenchResult<Document> {
        let path = self.normalize(path);
        let mut state = self.lock();
        let WorkbenchState {
            catalog, editor, ..
        } = &mut *state;
        let document = editor
            .open(&path, catalog)
            .cloned()
            .ok_or_else(|| WorkbenchError::UnknownFile(path.clone()))?;
        catalog.select(Some(path));
        Ok(document)
    }

    /// Select a file (opening it) or clear the selection.
    pub fn select_file(&self, path: Option<&str>) -> WorkbenchResult<()> {
        match path {
            Some(path) => self.open_file(path).map(|_| ()),
            None => {
                self.lock().catalog.select(None);
                Ok(())
            }
        }
    }

    pub fn update_document(&self, path: &str, value: &str) -> WorkbenchResult<()> {
        let path = self.normalize(path);
        if self.lock().editor.update(&path, value) {
            Ok(())
        } else {
            Err(WorkbenchError::UnknownFile(path))
        }
    }

    /// Discard unsaved edits.
    pub fn reset_document(&self, path: &str) -> WorkbenchResult<()> {
        let path = self.normalize(path);
        let mut state = self.lock();
        let WorkbenchState {
            catalog, editor, ..
        } = &mut *state;
        if editor.reset(&path, catalog) {
            Ok(())
        } else {
            Err(WorkbenchError::UnknownFile(path))
        }
    }

    /// Write an open document to the sandbox, then to the catalog.
    pub async fn save_file(&self, path: &str) -> WorkbenchResult<()> {
        let path = self.normalize(path);
        let document = self
            .lock()
            .editor
            .get(&path)
            .cloned()
            .ok_or_else(|| WorkbenchError::UnknownFile(path.clone()))?;
        if document.is_binary {
            return Ok(());
        }
        self.write_durable(&path, document.value.as_bytes()).await?;
        self.commit_file(&path, &document.value, false);
        Ok(())
    }

    /// Create or replace a file with raw bytes (e.g. an upload).
    pub async fn add_file(&self, path: &str, bytes: &[u8]) -> WorkbenchResult<String> {
        let path = self.normalize(path);
        self.write_durable(&path, bytes).await?;
        let is_binary = looks_binary(bytes);
        let text = if is_binary {
            String::new()
        } else {
            String::from_utf8_lossy(bytes).to_string()
        };
        self.commit_file(&path, &text, is_binary);
        Ok(path)
    }

    /// Create an empty folder (and its ancestors) in the sandbox and the catalog.
    pub async fn create_folder(&self, path: &str) -> WorkbenchResult<String> {
        let path = self.normalize(path);
        let relative = to_sandbox_path(&path, &self.inner.config.project_root)?;
        if relative.is_empty() {
            return Err(WorkbenchError::UnknownFile(path));
        }
        self.inner.sandbox.mkdir(&relative, true).await?;
        let created = self.lock().catalog.ensure_folder(&path);
        for folder in created {
            self.publish(WorkbenchEvent::FolderCreated { path: folder });
        }
        Ok(path)
    }

    /// Remove a file or folder from the sandbox and the catalog.
    pub async fn delete_file(&self, path: &str) -> WorkbenchResult<()> {
        let path = self.normalize(path);
        let relative = to_sandbox_path(&path, &self.inner.config.project_root)?;
        match self.inner.sandbox.rm(&relative, true).await {
            Ok(()) | Err(SandboxError::NotFound(_)) => {}
            Err(err) => return Err(err.into()),
        }
        let removed = {
            let mut state = self.lock();
            let removed = state.catalog.remove(&path);
            for removed_path in &removed {
                state.editor.close(removed_path);
            }
            removed
        };
        if removed.is_empty() {
            return Err(WorkbenchError::UnknownFile(path));
        }
        for path in removed {
            self.publish(WorkbenchEvent::FileDeleted { path });
        }
        Ok(())
    }

    /// Flip a folder's expansion state; returns whether it is now expanded.
    pub fn toggle_folder(&self, path: &str) -> bool {
        let path = self.normalize(path);
        self.lock().catalog.toggle_folder(&path)
    }

    async fn write_durable(&self, absolute: &str, bytes: &[u8]) -> WorkbenchResult<()> {
        let relative = to_sandbox_path(absolute, &self.inner.config.project_root)?;
        if relative.is_empty() {
            return Err(WorkbenchError::UnknownFile(absolute.to_string()));
        }
        if let Some((parent, _)) = relative.rsplit_once('/') {
            self.inner.sandbox.mkdir(parent, true).await?;
        }
        self.inner.sandbox.write_file(&relative, bytes).await?;
        Ok(())
    }

    fn commit_file(&self, path: &str, content: &str, is_binary: bool) {
        let manifest = is_dependency_manifest(path);
        let created = {
            let mut state = self.lock();
            let write = state.catalog.write_file(path, content, is_binary);
            if !is_binary {
                state.editor.follow_write(path, write.previous.as_deref(), content);
            }
            if manifest {
                state.setup.note_manifest_write();
            }
            write.created_folders
        };
        for folder in created {
            self.publish(WorkbenchEvent::FolderCreated { path: folder });
        }
        self.publish(WorkbenchEvent::FileChanged {
            path: path.to_string(),
            streaming: false,
        });
        if manifest {
            self.schedule_setup_check();
        }
    }

    // -- session lifecycle --------------------------------------------------

    pub fn start_generation(&self) {
        self.lock().generating = true;
    }

    /// Stop the current generation: artifact processes and queued commands are
    /// cancelled; closed file writes still land.
    pub fn stop_generation(&self) {
        let runners: Vec<_> = {
            let mut state = self.lock();
            state.generating = false;
            state
                .artifacts
                .values()
                .map(|record| record.runner.clone())
                .collect()
        };
        info!(runners = runners.len(), "generation stopped");
        for runner in runners {
            runner.cancel_all();
        }
    }

    pub fn is_generating(&self) -> bool {
        self.lock().generating
    }

    pub fn set_restoring(&self, restoring: bool) {
        self.lock().restoring = restoring;
    }

    /// Replay stored messages: files are re-applied, commands are not re-run
    /// verbatim, and auto-setup gets one settle-delayed check afterwards.
    pub fn restore_history<'a, I>(&self, messages: I)
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        self.set_restoring(true);
        for (message_id, text) in messages {
            self.parse_message(message_id, text);
        }
        self.set_restoring(false);
        self.schedule_setup_check();
    }

    /// Forget all session state and stop every owned process.
    pub fn reset_session(&self) {
        self.inner.tasks.cancel_all();
        let fresh = Arc::new(ActionRunner::new(
            AUTO_ARTIFACT_ID,
            self.inner.runner_context(),
        ));
        let runners: Vec<_> = {
            let mut state = self.lock();
            let mut runners: Vec<_> = state
                .artifacts
                .drain(..)
                .map(|(_, record)| record.runner)
                .collect();
            runners.append(&mut state.retired);
            runners.push(std::mem::replace(&mut state.auto_runner, fresh));
            state.parser.reset();
            state.catalog.clear();
            state.editor.clear();
            state.previews.clear();
            state.alerts.clear();
            state.setup.reset();
            state.generating = false;
            state.restoring = false;
            runners
        };
        for runner in runners {
            runner.cancel_all();
        }
        self.inner.terminal.clear();
        info!("session reset");
    }

    /// Reset the session and empty the sandbox working root.
    pub async fn clear_project(&self) -> WorkbenchResult<()> {
        self.reset_session();
        for entry in self.inner.sandbox.readdir("").await? {
            self.inner.sandbox.rm(&entry.name, true).await?;
        }
        Ok(())
    }

    // -- read-only state ----------------------------------------------------

    pub fn files(&self) -> BTreeMap<String, CatalogEntry> {
        self.lock().catalog.entries().clone()
    }

    pub fn file_content(&self, path: &str) -> Option<String> {
        let path = self.normalize(path);
        self.lock().catalog.content(&path).map(str::to_string)
    }

    pub fn selected_file(&self) -> Option<String> {
        self.lock().catalog.selected().map(str::to_string)
    }

    pub fn expanded_folders(&self) -> BTreeSet<String> {
        self.lock().catalog.expanded().clone()
    }

    pub fn document(&self, path: &str) -> Option<Document> {
        let path = self.normalize(path);
        self.lock().editor.get(&path).cloned()
    }

    pub fn unsaved_files(&self) -> BTreeSet<String> {
        let state = self.lock();
        state.editor.unsaved(&state.catalog)
    }

    pub fn previews(&self) -> Vec<Preview> {
        self.lock().previews.list()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.lock().alerts.list()
    }

    pub fn setup_state(&self) -> SetupState {
        self.lock().setup.clone()
    }

    pub fn artifacts(&self) -> Vec<ArtifactSummary> {
        let state = self.lock();
        state
            .artifacts
            .values()
            .map(|record| ArtifactSummary {
                id: record.data.id.clone(),
                title: record.data.title.clone(),
                closed: record.closed,
                actions: record.runner.actions(),
            })
            .collect()
    }

    /// Actions generated by auto-setup, oldest first.
    pub fn auto_actions(&self) -> Vec<ActionRecord> {
        self.lock().auto_runner.actions()
    }

    pub fn action_status(&self, artifact_id: &str, action_id: &str) -> Option<ActionStatus> {
        self.lock().runner(artifact_id).ok()?.status(action_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagehand_sandbox::{MemSandbox, PortEventKind};

    fn orchestrator() -> (Orchestrator, MemSandbox) {
        let sandbox = MemSandbox::new();
        let orchestrator =
            Orchestrator::new(Arc::new(sandbox.clone()), OrchestratorConfig::default());
        (orchestrator, sandbox)
    }

    #[tokio::test]
    async fn actions_for_unknown_artifacts_are_rejected() {
        let (orchestrator, sandbox) = orchestrator();
        let event = ParserEvent::ActionClose(ActionEvent {
            message_id: "m".into(),
            artifact_id: "ghost".into(),
            action_id: "1".into(),
            action: ActionData::file("a.txt", "a\n"),
        });
        let err = orchestrator.handle_event(&event).unwrap_err();
        assert!(matches!(err, WorkbenchError::UnknownArtifact(id) if id == "ghost"));
        assert!(orchestrator.files().is_empty());
        assert!(sandbox.write_log().is_empty());
    }

    #[tokio::test]
    async fn editor_roundtrip_through_sandbox() {
        let (orchestrator, sandbox) = orchestrator();
        let path = orchestrator.add_file("notes/todo.md", b"- one\n").await.unwrap();
        assert_eq!(path, "/home/project/notes/todo.md");
        assert!(sandbox.is_dir("notes"));

        orchestrator.open_file(&path).unwrap();
        assert_eq!(orchestrator.selected_file().as_deref(), Some(path.as_str()));
        orchestrator.update_document(&path, "- one\n- two\n").unwrap();
        assert!(orchestrator.unsaved_files().contains(&path));

        orchestrator.save_file(&path).await.unwrap();
        assert!(orchestrator.unsaved_files().is_empty());
        assert_eq!(sandbox.file_text("notes/todo.md").as_deref(), Some("- one\n- two\n"));

        orchestrator.delete_file("/home/project/notes").await.unwrap();
        assert!(orchestrator.selected_file().is_none());
        assert!(orchestrator.document(&path).is_none());
        assert!(sandbox.file("notes/todo.md").is_none());
    }

    #[tokio::test]
    async fn created_folders_exist_in_both_views() {
        let (orchestrator, sandbox) = orchestrator();
        let mut events = orchestrator.subscribe();
        let path = orchestrator.create_folder("src/assets").await.unwrap();
        assert_eq!(path, "/home/project/src/assets");
        assert!(sandbox.is_dir("src/assets"));
        assert_eq!(orchestrator.files().get(&path), Some(&CatalogEntry::Folder));
        assert!(orchestrator.expanded_folders().contains(&path));

        let mut created = Vec::new();
        while let Ok(WorkbenchEvent::FolderCreated { path }) = events.try_recv() {
            created.push(path);
        }
        assert_eq!(created, vec!["/home/project/src", "/home/project/src/assets"]);

        // existing folders are not announced twice
        orchestrator.create_folder("src").await.unwrap();
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn binary_uploads_have_empty_display_content() {
        let (orchestrator, sandbox) = orchestrator();
        let path = orchestrator
            .add_file("public/logo.png", &[0x89, b'P', b'N', b'G', 0, 1])
            .await
            .unwrap();
        assert_eq!(
            orchestrator.files().get(&path),
            Some(&CatalogEntry::File {
                content: String::new(),
                is_binary: true
            })
        );
        assert_eq!(sandbox.file("public/logo.png").map(|b| b.len()), Some(6));
    }

    #[tokio::test]
    async fn port_events_drive_previews() {
        let (orchestrator, sandbox) = orchestrator();
        let mut events = orchestrator.subscribe();
        sandbox.emit_port(5173, PortEventKind::Open);

        loop {
            if let WorkbenchEvent::PreviewsChanged { previews } = events.recv().await.unwrap() {
                assert_eq!(previews.len(), 1);
                assert_eq!(previews[0].base_url, "http://localhost:5173");
                break;
            }
        }
        assert!(orchestrator.previews()[0].ready);
    }

    #[tokio::test]
    async fn alerts_are_recorded_and_published() {
        let (orchestrator, _) = orchestrator();
        let mut events = orchestrator.subscribe();
        let alert = Alert::error(crate::alerts::AlertSource::Preview, "Blank page", "nothing rendered");
        orchestrator.report_alert(alert.clone());
        assert_eq!(orchestrator.alerts(), vec![alert.clone()]);
        assert_eq!(events.recv().await.unwrap(), WorkbenchEvent::AlertRaised(alert));
        // No manifest yet: nothing to re-arm.
        assert!(!orchestrator.setup_state().install_pending);
    }
}
