use tokio::sync::{mpsc, oneshot};

/// Exit code reported when a process disappears without a status.
pub const LOST_EXIT_CODE: i32 = -1;

/// A running sandbox process: streamed output plus an eventual exit code.
///
/// The output channel closes when the process has no more output; the exit
/// code is delivered separately so callers can drain output first.
#[derive(Debug)]
pub struct SandboxProcess {
    pub id: u64,
    pub output: mpsc::UnboundedReceiver<String>,
    exit: oneshot::Receiver<i32>,
    kill: Option<oneshot::Sender<()>>,
}

/// Best-effort termination signal for a [`SandboxProcess`].
#[derive(Debug)]
pub struct ProcessKiller {
    process_id: u64,
    tx: oneshot::Sender<()>,
}

impl ProcessKiller {
    pub fn process_id(&self) -> u64 {
        self.process_id
    }

    /// Request termination. Returns false if the process already finished.
    pub fn kill(self) -> bool {
        self.tx.send(()).is_ok()
    }
}

impl SandboxProcess {
    pub fn new(
        id: u64,
        output: mpsc::UnboundedReceiver<String>,
        exit: oneshot::Receiver<i32>,
        kill: oneshot::Sender<()>,
    ) -> Self {
        Self {
            id,
            output,
            exit,
            kill: Some(kill),
        }
    }

    /// Detach the kill switch so another task can stop the process.
    pub fn take_killer(&mut self) -> Option<ProcessKiller> {
        self.kill.take().map(|tx| ProcessKiller {
            process_id: self.id,
            tx,
        })
    }

    /// Next output chunk, or `None` once output is exhausted.
    pub async fn next_output(&mut self) -> Option<String> {
        self.output.recv().await
    }

    /// Wait for the exit code.
    pub async fn wait(self) -> i32 {
        self.exit.await.unwrap_or(LOST_EXIT_CODE)
    }
}
