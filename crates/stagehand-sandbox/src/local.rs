use std::collections::{BTreeMap, HashSet};
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{SandboxError, SandboxResult, io_error};
use crate::ports::detect_port;
use crate::process::{LOST_EXIT_CODE, SandboxProcess};
use crate::{DirEntry, PortEvent, PortEventKind, Sandbox};

const PORT_EVENT_CAPACITY: usize = 64;
const SKIPPED_DIRS: &[&str] = &["node_modules", ".git"];

/// Sandbox backed by a host directory and `sh -c` processes.
///
/// Isolation is lexical only: every path is resolved under the root and
/// rejected if it escapes. Run it inside an OS-level sandbox for anything
/// stronger.
pub struct LocalSandbox {
    root: PathBuf,
    shell: String,
    env: BTreeMap<String, String>,
    next_process_id: AtomicU64,
    ports: broadcast::Sender<PortEvent>,
}

impl LocalSandbox {
    /// Open (creating if needed) a sandbox rooted at `root`.
    pub fn new(root: impl AsRef<Path>) -> SandboxResult<Self> {
        let requested = root.as_ref();
        let display = requested.to_string_lossy().to_string();
        std::fs::create_dir_all(requested).map_err(|err| io_error(display.clone(), err))?;
        let root = std::fs::canonicalize(requested).map_err(|err| io_error(display, err))?;
        let (ports, _) = broadcast::channel(PORT_EVENT_CAPACITY);
        Ok(Self {
            root,
            shell: "sh".into(),
            env: BTreeMap::new(),
            next_process_id: AtomicU64::new(0),
            ports,
        })
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Relative paths of every file under the root, skipping dependency and
    /// VCS directories.
    pub fn list_files(&self) -> Vec<String> {
        WalkDir::new(&self.root)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                !(entry.file_type().is_dir()
                    && entry
                        .file_name()
                        .to_str()
                        .is_some_and(|name| SKIPPED_DIRS.contains(&name)))
            })
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| {
                entry
                    .path()
                    .strip_prefix(&self.root)
                    .ok()
                    .map(|relative| relative.to_string_lossy().to_string())
            })
            .collect()
    }

    fn resolve(&self, raw: &str) -> SandboxResult<PathBuf> {
        let relative = Path::new(raw.trim_start_matches('/'));
        let mut out = self.root.clone();
        for component in relative.components() {
            match component {
                Component::CurDir => {}
                Component::Normal(value) => out.push(value),
                Component::ParentDir => {
                    if !out.pop() || !out.starts_with(&self.root) {
                        return Err(SandboxError::InvalidPath {
                            path: raw.to_string(),
                            reason: "escapes sandbox root".into(),
                        });
                    }
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(SandboxError::InvalidPath {
                        path: raw.to_string(),
                        reason: "must be relative to the sandbox root".into(),
                    });
                }
            }
        }
        if !out.starts_with(&self.root) {
            return Err(SandboxError::InvalidPath {
                path: raw.to_string(),
                reason: "escapes sandbox root".into(),
            });
        }
        Ok(out)
    }
}

#[async_trait]
impl Sandbox for LocalSandbox {
    async fn mkdir(&self, path: &str, recursive: bool) -> SandboxResult<()> {
        let target = self.resolve(path)?;
        let result = if recursive {
            tokio::fs::create_dir_all(&target).await
        } else {
            tokio::fs::create_dir(&target).await
        };
        result.map_err(|err| io_error(path, err))
    }

    async fn write_file(&self, path: &str, contents: &[u8]) -> SandboxResult<()> {
        let target = self.resolve(path)?;
        write_file_atomic(&target, contents)
            .await
            .map_err(|err| io_error(path, err))
    }

    async fn read_file(&self, path: &str) -> SandboxResult<Vec<u8>> {
        let target = self.resolve(path)?;
        tokio::fs::read(&target)
            .await
            .map_err(|err| io_error(path, err))
    }

    async fn readdir(&self, path: &str) -> SandboxResult<Vec<DirEntry>> {
        let target = self.resolve(path)?;
        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(&target)
            .await
            .map_err(|err| io_error(path, err))?;
        while let Some(entry) = dir.next_entry().await.map_err(|err| io_error(path, err))? {
            let is_dir = entry
                .file_type()
                .await
                .map(|kind| kind.is_dir())
                .unwrap_or(false);
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().to_string(),
                is_dir,
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn rm(&self, path: &str, recursive: bool) -> SandboxResult<()> {
        let target = self.resolve(path)?;
        if target == self.root {
            return Err(SandboxError::InvalidPath {
                path: path.to_string(),
                reason: "refusing to remove the sandbox root".into(),
            });
        }
        let metadata = tokio::fs::symlink_metadata(&target)
            .await
            .map_err(|err| io_error(path, err))?;
        let result = if metadata.is_dir() {
            if recursive {
                tokio::fs::remove_dir_all(&target).await
            } else {
                tokio::fs::remove_dir(&target).await
            }
        } else {
            tokio::fs::remove_file(&target).await
        };
        result.map_err(|err| io_error(path, err))
    }

    async fn spawn(&self, command: &str) -> SandboxResult<SandboxProcess> {
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(command)
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &self.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|err| SandboxError::Spawn {
            command: command.to_string(),
            reason: err.to_string(),
        })?;
        let id = self.next_process_id.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(process_id = id, command, "spawned sandbox process");

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = oneshot::channel();
        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let opened = Arc::new(Mutex::new(HashSet::new()));

        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(forward_lines(
                stdout,
                out_tx.clone(),
                self.ports.clone(),
                opened.clone(),
            )));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(forward_lines(
                stderr,
                out_tx.clone(),
                self.ports.clone(),
                opened.clone(),
            )));
        }
        drop(out_tx);

        let ports = self.ports.clone();
        tokio::spawn(async move {
            let kill_requested = async move {
                if kill_rx.await.is_err() {
                    // Kill switch dropped: nobody can stop us any more.
                    std::future::pending::<()>().await;
                }
            };
            let status = tokio::select! {
                status = child.wait() => status,
                _ = kill_requested => {
                    debug!(process_id = id, "killing sandbox process");
                    let _ = child.kill().await;
                    child.wait().await
                }
            };
            for reader in readers {
                let _ = reader.await;
            }
            let closed: Vec<u16> = opened
                .lock()
                .map(|ports| ports.iter().copied().collect())
                .unwrap_or_default();
            for port in closed {
                let _ = ports.send(PortEvent {
                    port,
                    kind: PortEventKind::Close,
                    url: format!("http://localhost:{port}"),
                });
            }
            let code = match status {
                Ok(status) => status.code().unwrap_or(LOST_EXIT_CODE),
                Err(err) => {
                    warn!(process_id = id, "waiting on sandbox process failed: {err}");
                    LOST_EXIT_CODE
                }
            };
            let _ = exit_tx.send(code);
        });

        Ok(SandboxProcess::new(id, out_rx, exit_rx, kill_tx))
    }

    fn port_events(&self) -> broadcast::Receiver<PortEvent> {
        self.ports.subscribe()
    }
}

async fn forward_lines<R: AsyncRead + Unpin>(
    reader: R,
    out: mpsc::UnboundedSender<String>,
    ports: broadcast::Sender<PortEvent>,
    opened: Arc<Mutex<HashSet<u16>>>,
) {
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if let Some((port, url)) = detect_port(&line) {
                    let fresh = opened.lock().map(|mut set| set.insert(port)).unwrap_or(false);
                    if fresh {
                        let _ = ports.send(PortEvent {
                            port,
                            kind: PortEventKind::Open,
                            url,
                        });
                    }
                }
                if out.send(line).is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(err) => {
                warn!("reading sandbox process output failed: {err}");
                break;
            }
        }
    }
}

async fn write_file_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no parent")
    })?;
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "no file name"))?;
    let nonce = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let tmp_path = parent.join(format!(".{name}.stagehand-tmp-{nonce}"));

    tokio::fs::write(&tmp_path, bytes).await?;
    tokio::fs::rename(&tmp_path, path).await
}
