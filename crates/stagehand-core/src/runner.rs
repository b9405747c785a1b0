//! Applies closed actions to the sandbox.
//!
//! One runner per artifact. Durable work goes through a job queue drained by
//! a single worker task, so actions take effect in the order they were run.
//! Each action id executes at most once; partial file payloads never reach
//! the sandbox.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use stagehand_protocol::{ActionData, ActionKind, normalize_project_path, to_sandbox_path};
use stagehand_sandbox::{DynSandbox, ProcessKiller, SandboxProcess};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::alerts::{Alert, AlertSource};
use crate::error::{WorkbenchError, WorkbenchResult};
use crate::events::WorkbenchEvent;
use crate::terminal::Terminal;

/// Lines of process output kept for failure alerts.
const OUTPUT_TAIL_LINES: usize = 40;

/// Receives runner failures.
pub type AlertSink = Arc<dyn Fn(Alert) + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    Running,
    Complete,
    Failed,
    Aborted,
    /// Folded into auto-setup instead of being run verbatim.
    Intercepted,
}

impl ActionStatus {
    pub fn is_final(self) -> bool {
        !matches!(self, ActionStatus::Pending | ActionStatus::Running)
    }
}

/// An action known to a runner.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ActionRecord {
    pub action_id: String,
    pub data: ActionData,
    pub status: ActionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Everything a runner needs from its surroundings.
#[derive(Clone)]
pub struct RunnerContext {
    pub sandbox: DynSandbox,
    pub project_root: String,
    pub terminal: Terminal,
    pub events: broadcast::Sender<WorkbenchEvent>,
    pub alerts: AlertSink,
}

struct OwnedProcess {
    killer: ProcessKiller,
    long_running: bool,
}

#[derive(Default)]
struct RunnerState {
    actions: IndexMap<String, ActionRecord>,
    executed: HashSet<String>,
    processes: HashMap<String, OwnedProcess>,
}

struct Shared {
    artifact_id: String,
    ctx: RunnerContext,
    state: Mutex<RunnerState>,
}

struct Job {
    action_id: String,
    data: ActionData,
    done: oneshot::Sender<ActionStatus>,
}

/// Awaitable result of [`ActionRunner::run_action`].
#[derive(Debug)]
pub struct RunHandle {
    action_id: String,
    inner: HandleInner,
}

#[derive(Debug)]
enum HandleInner {
    Ready(ActionStatus),
    Queued(oneshot::Receiver<ActionStatus>),
}

impl RunHandle {
    fn ready(action_id: &str, status: ActionStatus) -> Self {
        Self {
            action_id: action_id.to_string(),
            inner: HandleInner::Ready(status),
        }
    }

    pub fn action_id(&self) -> &str {
        &self.action_id
    }

    /// True if this call queued new durable work.
    pub fn is_queued(&self) -> bool {
        matches!(self.inner, HandleInner::Queued(_))
    }

    /// Status once the worker has processed the action. Start actions resolve
    /// to `Running` as soon as the process is spawned.
    pub async fn wait(self) -> ActionStatus {
        match self.inner {
            HandleInner::Ready(status) => status,
            HandleInner::Queued(rx) => rx.await.unwrap_or(ActionStatus::Aborted),
        }
    }
}

pub struct ActionRunner {
    shared: Arc<Shared>,
    jobs: mpsc::UnboundedSender<Job>,
    worker: AbortHandle,
}

impl std::fmt::Debug for ActionRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRunner")
            .field("artifact_id", &self.shared.artifact_id)
            .finish()
    }
}

impl Drop for ActionRunner {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

impl ActionRunner {
    /// Create a runner and its worker task. Must be called within a Tokio runtime.
    pub fn new(artifact_id: impl Into<String>, ctx: RunnerContext) -> Self {
        let shared = Arc::new(Shared {
            artifact_id: artifact_id.into(),
            ctx,
            state: Mutex::new(RunnerState::default()),
        });
        let (jobs, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(work(shared.clone(), rx)).abort_handle();
        Self {
            shared,
            jobs,
            worker,
        }
    }

    pub fn artifact_id(&self) -> &str {
        &self.shared.artifact_id
    }

    /// Register an action without side effects.
    pub fn add_action(&self, action_id: &str, data: ActionData) {
        let mut state = self.shared.lock();
        let executed = state.executed.contains(action_id);
        match state.actions.get_mut(action_id) {
            Some(record) if !executed => record.data = data,
            Some(_) => {}
            None => {
                state.actions.insert(action_id.to_string(), ActionRecord::pending(action_id, data));
            }
        }
    }

    /// Apply an action.
    ///
    /// With `is_partial` only the stored payload is refreshed. Otherwise the
    /// action is queued for durable execution, unless this id already ran.
    pub fn run_action(
        &self,
        action_id: &str,
        data: ActionData,
        is_partial: bool,
    ) -> WorkbenchResult<RunHandle> {
        let mut state = self.shared.lock();
        let RunnerState {
            actions, executed, ..
        } = &mut *state;
        let record = actions
            .entry(action_id.to_string())
            .or_insert_with(|| ActionRecord::pending(action_id, data.clone()));

        if executed.contains(action_id) || record.status.is_final() {
            debug!(
                artifact_id = %self.shared.artifact_id,
                action_id, "action already handled, ignoring"
            );
            return Ok(RunHandle::ready(action_id, record.status));
        }
        record.data = data.clone();
        if is_partial {
            return Ok(RunHandle::ready(action_id, record.status));
        }
        executed.insert(action_id.to_string());
        drop(state);

        let (done, rx) = oneshot::channel();
        let job = Job {
            action_id: action_id.to_string(),
            data,
            done,
        };
        if self.jobs.send(job).is_err() {
            self.shared.lock().executed.remove(action_id);
            return Err(WorkbenchError::RunnerClosed(self.shared.artifact_id.clone()));
        }
        Ok(RunHandle {
            action_id: action_id.to_string(),
            inner: HandleInner::Queued(rx),
        })
    }

    /// Record that an action's intent was taken over by auto-setup.
    pub fn mark_intercepted(&self, action_id: &str, data: ActionData) -> WorkbenchResult<()> {
        self.mark_final(action_id, data, ActionStatus::Intercepted)
    }

    /// Record that an action will not run (e.g. replayed from history).
    pub fn mark_skipped(&self, action_id: &str, data: ActionData) -> WorkbenchResult<()> {
        self.mark_final(action_id, data, ActionStatus::Aborted)
    }

    fn mark_final(
        &self,
        action_id: &str,
        data: ActionData,
        status: ActionStatus,
    ) -> WorkbenchResult<()> {
        {
            let mut state = self.shared.lock();
            if state.executed.contains(action_id) {
                return Ok(());
            }
            state.executed.insert(action_id.to_string());
            let record = state
                .actions
                .entry(action_id.to_string())
                .or_insert_with(|| ActionRecord::pending(action_id, data.clone()));
            record.data = data;
            record.status = status;
        }
        self.shared.publish_status(action_id, status);
        Ok(())
    }

    /// Kill every owned process and abort queued commands.
    ///
    /// Closed file writes still drain so the sandbox ends up with the content
    /// already shown in the catalog.
    pub fn cancel_all(&self) {
        let (killers, aborted) = {
            let mut state = self.shared.lock();
            let RunnerState {
                actions,
                executed,
                processes,
            } = &mut *state;
            let killers: Vec<_> = processes.drain().map(|(_, owned)| owned.killer).collect();
            let mut aborted = Vec::new();
            for (id, record) in actions.iter_mut() {
                if record.data.kind == ActionKind::File {
                    continue;
                }
                let queued = record.status == ActionStatus::Pending && executed.contains(id);
                if queued || record.status == ActionStatus::Running {
                    record.status = ActionStatus::Aborted;
                    aborted.push(id.clone());
                }
            }
            (killers, aborted)
        };
        if !killers.is_empty() || !aborted.is_empty() {
            info!(
                artifact_id = %self.shared.artifact_id,
                processes = killers.len(),
                actions = aborted.len(),
                "cancelling runner work"
            );
        }
        for killer in killers {
            killer.kill();
        }
        for id in aborted {
            self.shared.publish_status(&id, ActionStatus::Aborted);
        }
    }

    /// Kill owned long-running processes, leaving queued work alone.
    pub fn stop_processes(&self) {
        let stopped: Vec<(String, ProcessKiller)> = {
            let mut state = self.shared.lock();
            let ids: Vec<String> = state
                .processes
                .iter()
                .filter(|(_, owned)| owned.long_running)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| {
                    let owned = state.processes.remove(&id)?;
                    if let Some(record) = state.actions.get_mut(&id) {
                        record.status = ActionStatus::Aborted;
                    }
                    Some((id, owned.killer))
                })
                .collect()
        };
        for (id, killer) in stopped {
            debug!(artifact_id = %self.shared.artifact_id, action_id = %id, "stopping process");
            killer.kill();
            self.shared.publish_status(&id, ActionStatus::Aborted);
        }
    }

    pub fn status(&self, action_id: &str) -> Option<ActionStatus> {
        self.shared.lock().actions.get(action_id).map(|record| record.status)
    }

    /// Every known action, in registration order.
    pub fn actions(&self) -> Vec<ActionRecord> {
        self.shared.lock().actions.values().cloned().collect()
    }

    pub fn running_processes(&self) -> usize {
        self.shared.lock().processes.len()
    }
}

impl ActionRecord {
    fn pending(action_id: &str, data: ActionData) -> Self {
        Self {
            action_id: action_id.to_string(),
            data,
            status: ActionStatus::Pending,
            error: None,
        }
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, RunnerState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn publish_status(&self, action_id: &str, status: ActionStatus) {
        let _ = self.ctx.events.send(WorkbenchEvent::ActionStatus {
            artifact_id: self.artifact_id.clone(),
            action_id: action_id.to_string(),
            status,
        });
    }

    /// Move a queued action to `Running`. False if it was aborted meanwhile.
    fn claim(&self, action_id: &str) -> bool {
        {
            let mut state = self.lock();
            match state.actions.get_mut(action_id) {
                Some(record) if record.status == ActionStatus::Pending => {
                    record.status = ActionStatus::Running;
                }
                _ => return false,
            }
        }
        self.publish_status(action_id, ActionStatus::Running);
        true
    }

    /// Settle a running action. A concurrent abort wins.
    fn settle(&self, action_id: &str, status: ActionStatus, error: Option<String>) -> ActionStatus {
        {
            let mut state = self.lock();
            let Some(record) = state.actions.get_mut(action_id) else {
                return status;
            };
            if record.status != ActionStatus::Running {
                return record.status;
            }
            record.status = status;
            record.error = error;
        }
        self.publish_status(action_id, status);
        status
    }

    fn fail(&self, action_id: &str, alert: Alert) -> ActionStatus {
        let status = self.settle(action_id, ActionStatus::Failed, Some(alert.description.clone()));
        if status == ActionStatus::Failed {
            warn!(
                artifact_id = %self.artifact_id,
                action_id,
                title = %alert.title,
                "{}", alert.description
            );
            (self.ctx.alerts)(alert);
        }
        status
    }

    fn register(&self, action_id: &str, process: &mut SandboxProcess, long_running: bool) {
        if let Some(killer) = process.take_killer() {
            self.lock().processes.insert(
                action_id.to_string(),
                OwnedProcess {
                    killer,
                    long_running,
                },
            );
        }
    }

    fn unregister(&self, action_id: &str) {
        self.lock().processes.remove(action_id);
    }
}

async fn work(shared: Arc<Shared>, mut jobs: mpsc::UnboundedReceiver<Job>) {
    while let Some(job) = jobs.recv().await {
        let status = if shared.claim(&job.action_id) {
            match job.data.kind {
                ActionKind::File => write_file(&shared, &job.action_id, &job.data).await,
                ActionKind::Shell => run_shell(&shared, &job.action_id, &job.data.content).await,
                ActionKind::Start => start_process(&shared, &job.action_id, &job.data.content).await,
            }
        } else {
            shared
                .lock()
                .actions
                .get(&job.action_id)
                .map(|record| record.status)
                .unwrap_or(ActionStatus::Aborted)
        };
        let _ = job.done.send(status);
    }
}

async fn write_file(shared: &Shared, action_id: &str, data: &ActionData) -> ActionStatus {
    let root = shared.ctx.project_root.as_str();
    let Some(raw_path) = data.file_path.as_deref() else {
        return shared.fail(
            action_id,
            Alert::error(AlertSource::Filesystem, "Failed to write file", "file action has no path"),
        );
    };
    let absolute = normalize_project_path(raw_path, root);
    let relative = match to_sandbox_path(&absolute, root) {
        Ok(relative) if !relative.is_empty() => relative,
        Ok(_) => {
            return shared.fail(
                action_id,
                Alert::error(
                    AlertSource::Filesystem,
                    "Failed to write file",
                    format!("{absolute}: path is the project root"),
                ),
            );
        }
        Err(err) => {
            return shared.fail(
                action_id,
                Alert::error(AlertSource::Filesystem, "Failed to write file", err.to_string()),
            );
        }
    };

    let sandbox = &shared.ctx.sandbox;
    let result = async {
        if let Some((parent, _)) = relative.rsplit_once('/') {
            sandbox.mkdir(parent, true).await?;
        }
        sandbox.write_file(&relative, data.content.as_bytes()).await
    }
    .await;

    match result {
        Ok(()) => {
            debug!(artifact_id = %shared.artifact_id, action_id, path = %absolute, "file written");
            shared.settle(action_id, ActionStatus::Complete, None)
        }
        Err(err) => shared.fail(
            action_id,
            Alert::error(
                AlertSource::Filesystem,
                "Failed to write file",
                format!("{absolute}: {err}"),
            ),
        ),
    }
}

async fn run_shell(shared: &Shared, action_id: &str, command: &str) -> ActionStatus {
    shared.ctx.terminal.write_line(format!("$ {command}"));
    let mut process = match shared.ctx.sandbox.spawn(command).await {
        Ok(process) => process,
        Err(err) => {
            return shared.fail(
                action_id,
                Alert::error(AlertSource::Terminal, "Failed to run command", err.to_string()),
            );
        }
    };
    shared.register(action_id, &mut process, false);
    let status = watch_process(shared, action_id, command, process).await;
    shared.unregister(action_id);
    status
}

async fn start_process(shared: &Arc<Shared>, action_id: &str, command: &str) -> ActionStatus {
    shared.ctx.terminal.write_line(format!("$ {command}"));
    let mut process = match shared.ctx.sandbox.spawn(command).await {
        Ok(process) => process,
        Err(err) => {
            return shared.fail(
                action_id,
                Alert::error(AlertSource::Terminal, "Failed to start process", err.to_string()),
            );
        }
    };
    info!(artifact_id = %shared.artifact_id, action_id, command, "started process");
    shared.register(action_id, &mut process, true);

    let watcher = shared.clone();
    let action_id = action_id.to_string();
    let command = command.to_string();
    tokio::spawn(async move {
        watch_process(&watcher, &action_id, &command, process).await;
        watcher.unregister(&action_id);
    });
    ActionStatus::Running
}

async fn watch_process(
    shared: &Shared,
    action_id: &str,
    command: &str,
    mut process: SandboxProcess,
) -> ActionStatus {
    let mut tail = VecDeque::with_capacity(OUTPUT_TAIL_LINES);
    while let Some(line) = process.next_output().await {
        shared.ctx.terminal.write_line(line.clone());
        if tail.len() == OUTPUT_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    let code = process.wait().await;
    if code == 0 {
        return shared.settle(action_id, ActionStatus::Complete, None);
    }
    let output = tail.into_iter().collect::<Vec<_>>().join("\n");
    shared.fail(
        action_id,
        Alert::error(
            AlertSource::Terminal,
            "Command failed",
            format!("`{command}` exited with code {code}"),
        )
        .with_output(output),
    )
}
