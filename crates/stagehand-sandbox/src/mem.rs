use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::error::{SandboxError, SandboxResult};
use crate::process::{LOST_EXIT_CODE, SandboxProcess};
use crate::{DirEntry, PortEvent, PortEventKind, Sandbox};

/// Scripted behavior for commands spawned in a [`MemSandbox`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProcessScript {
    pub output: Vec<String>,
    /// `None` keeps the process alive until it is killed.
    pub exit_code: Option<i32>,
    pub port: Option<u16>,
    pub delay: Option<Duration>,
}

impl ProcessScript {
    pub fn exits(code: i32) -> Self {
        Self {
            exit_code: Some(code),
            ..Default::default()
        }
    }

    pub fn long_running() -> Self {
        Self::default()
    }

    pub fn with_output<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output = lines.into_iter().map(Into::into).collect();
        self
    }

    pub fn listening_on(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[derive(Clone, Debug)]
enum Node {
    File(Vec<u8>),
    Dir,
}

#[derive(Debug, Default)]
struct MemState {
    nodes: BTreeMap<String, Node>,
    scripts: Vec<(String, ProcessScript)>,
    spawned: Vec<String>,
    write_log: Vec<String>,
    failing_paths: HashSet<String>,
}

/// In-memory sandbox with a scripted process table.
///
/// Writes require the parent directory to exist, like a real filesystem.
/// Commands without a matching script exit 0 immediately.
#[derive(Clone)]
pub struct MemSandbox {
    state: Arc<Mutex<MemState>>,
    next_process_id: Arc<AtomicU64>,
    ports: broadcast::Sender<PortEvent>,
}

impl Default for MemSandbox {
    fn default() -> Self {
        let (ports, _) = broadcast::channel(64);
        Self {
            state: Arc::new(Mutex::new(MemState::default())),
            next_process_id: Arc::new(AtomicU64::new(0)),
            ports,
        }
    }
}

impl std::fmt::Debug for MemSandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("MemSandbox")
            .field("nodes", &state.nodes.len())
            .field("spawned", &state.spawned.len())
            .finish()
    }
}

impl MemSandbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Script the behavior of commands starting with `command`.
    ///
    /// The longest matching prefix wins.
    pub fn script(&self, command: impl Into<String>, script: ProcessScript) {
        let command = command.into();
        let mut state = self.lock();
        state.scripts.retain(|(existing, _)| *existing != command);
        state.scripts.push((command, script));
    }

    /// Make every filesystem mutation of `path` fail with an I/O error.
    pub fn fail_path(&self, path: impl Into<String>) {
        self.lock().failing_paths.insert(normalize(&path.into()));
    }

    /// Commands spawned so far, in order.
    pub fn spawned(&self) -> Vec<String> {
        self.lock().spawned.clone()
    }

    /// Paths written so far, in order (one entry per write).
    pub fn write_log(&self) -> Vec<String> {
        self.lock().write_log.clone()
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        match self.lock().nodes.get(&normalize(path)) {
            Some(Node::File(bytes)) => Some(bytes.clone()),
            _ => None,
        }
    }

    pub fn file_text(&self, path: &str) -> Option<String> {
        self.file(path)
            .map(|bytes| String::from_utf8_lossy(&bytes).to_string())
    }

    pub fn is_dir(&self, path: &str) -> bool {
        let path = normalize(path);
        path.is_empty() || matches!(self.lock().nodes.get(&path), Some(Node::Dir))
    }

    /// Announce a listening port as if a process had opened it.
    pub fn emit_port(&self, port: u16, kind: PortEventKind) {
        let _ = self.ports.send(PortEvent {
            port,
            kind,
            url: format!("http://localhost:{port}"),
        });
    }

    fn script_for(&self, command: &str) -> ProcessScript {
        let state = self.lock();
        state
            .scripts
            .iter()
            .filter(|(prefix, _)| command.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, script)| script.clone())
            .unwrap_or_else(|| ProcessScript::exits(0))
    }

    fn check_writable(state: &MemState, path: &str) -> SandboxResult<()> {
        if state.failing_paths.contains(path) {
            return Err(SandboxError::Io {
                path: path.to_string(),
                source: std::io::Error::other("injected failure"),
            });
        }
        Ok(())
    }
}

fn normalize(path: &str) -> String {
    path.split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}

fn parent_of(path: &str) -> &str {
    path.rsplit_once('/').map(|(parent, _)| parent).unwrap_or("")
}

fn parent_exists(state: &MemState, path: &str) -> bool {
    let parent = parent_of(path);
    parent.is_empty() || matches!(state.nodes.get(parent), Some(Node::Dir))
}

#[async_trait]
impl Sandbox for MemSandbox {
    async fn mkdir(&self, path: &str, recursive: bool) -> SandboxResult<()> {
        let path = normalize(path);
        let mut state = self.lock();
        Self::check_writable(&state, &path)?;
        if path.is_empty() {
            return Ok(());
        }
        match state.nodes.get(&path) {
            Some(Node::Dir) if recursive => return Ok(()),
            Some(_) => {
                return Err(SandboxError::InvalidPath {
                    path,
                    reason: "already exists".into(),
                });
            }
            None => {}
        }
        if recursive {
            let mut current = String::new();
            for segment in path.split('/') {
                if !current.is_empty() {
                    current.push('/');
                }
                current.push_str(segment);
                match state.nodes.get(&current) {
                    Some(Node::File(_)) => {
                        return Err(SandboxError::InvalidPath {
                            path: current,
                            reason: "is a file".into(),
                        });
                    }
                    Some(Node::Dir) => {}
                    None => {
                        state.nodes.insert(current.clone(), Node::Dir);
                    }
                }
            }
        } else {
            if !parent_exists(&state, &path) {
                return Err(SandboxError::NotFound(parent_of(&path).to_string()));
            }
            state.nodes.insert(path, Node::Dir);
        }
        Ok(())
    }

    async fn write_file(&self, path: &str, contents: &[u8]) -> SandboxResult<()> {
        let path = normalize(path);
        let mut state = self.lock();
        Self::check_writable(&state, &path)?;
        if path.is_empty() || matches!(state.nodes.get(&path), Some(Node::Dir)) {
            return Err(SandboxError::InvalidPath {
                path,
                reason: "is a directory".into(),
            });
        }
        if !parent_exists(&state, &path) {
            return Err(SandboxError::NotFound(parent_of(&path).to_string()));
        }
        state.write_log.push(path.clone());
        state.nodes.insert(path, Node::File(contents.to_vec()));
        Ok(())
    }

    async fn read_file(&self, path: &str) -> SandboxResult<Vec<u8>> {
        let path = normalize(path);
        match self.lock().nodes.get(&path) {
            Some(Node::File(bytes)) => Ok(bytes.clone()),
            Some(Node::Dir) => Err(SandboxError::InvalidPath {
                path,
                reason: "is a directory".into(),
            }),
            None => Err(SandboxError::NotFound(path)),
        }
    }

    async fn readdir(&self, path: &str) -> SandboxResult<Vec<DirEntry>> {
        let path = normalize(path);
        let state = self.lock();
        if !path.is_empty() && !matches!(state.nodes.get(&path), Some(Node::Dir)) {
            return Err(SandboxError::NotFound(path));
        }
        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{path}/")
        };
        Ok(state
            .nodes
            .iter()
            .filter_map(|(key, node)| {
                let name = key.strip_prefix(&prefix)?;
                (!name.is_empty() && !name.contains('/')).then(|| DirEntry {
                    name: name.to_string(),
                    is_dir: matches!(node, Node::Dir),
                })
            })
            .collect())
    }

    async fn rm(&self, path: &str, recursive: bool) -> SandboxResult<()> {
        let path = normalize(path);
        let mut state = self.lock();
        Self::check_writable(&state, &path)?;
        if path.is_empty() {
            return Err(SandboxError::InvalidPath {
                path,
                reason: "refusing to remove the sandbox root".into(),
            });
        }
        let prefix = format!("{path}/");
        match state.nodes.get(&path) {
            None => return Err(SandboxError::NotFound(path)),
            Some(Node::Dir) => {
                let has_children = state.nodes.keys().any(|key| key.starts_with(&prefix));
                if has_children && !recursive {
                    return Err(SandboxError::InvalidPath {
                        path,
                        reason: "directory not empty".into(),
                    });
                }
                state.nodes.retain(|key, _| !key.starts_with(&prefix));
            }
            Some(Node::File(_)) => {}
        }
        state.nodes.remove(&path);
        Ok(())
    }

    async fn spawn(&self, command: &str) -> SandboxResult<SandboxProcess> {
        let script = self.script_for(command);
        self.lock().spawned.push(command.to_string());
        let id = self.next_process_id.fetch_add(1, Ordering::SeqCst) + 1;

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = oneshot::channel();
        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let ports = self.ports.clone();

        tokio::spawn(async move {
            let killed = async move {
                if kill_rx.await.is_err() {
                    std::future::pending::<()>().await;
                }
            };
            tokio::pin!(killed);
            if let Some(delay) = script.delay {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = &mut killed => {
                        let _ = exit_tx.send(LOST_EXIT_CODE);
                        return;
                    }
                }
            }
            for line in script.output {
                let _ = out_tx.send(line);
            }
            if let Some(port) = script.port {
                let _ = ports.send(PortEvent {
                    port,
                    kind: PortEventKind::Open,
                    url: format!("http://localhost:{port}"),
                });
            }
            let code = match script.exit_code {
                Some(code) => code,
                None => {
                    killed.await;
                    LOST_EXIT_CODE
                }
            };
            if let Some(port) = script.port {
                let _ = ports.send(PortEvent {
                    port,
                    kind: PortEventKind::Close,
                    url: format!("http://localhost:{port}"),
                });
            }
            drop(out_tx);
            let _ = exit_tx.send(code);
        });

        Ok(SandboxProcess::new(id, out_rx, exit_rx, kill_tx))
    }

    fn port_events(&self) -> broadcast::Receiver<PortEvent> {
        self.ports.subscribe()
    }
}
