use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;

const SUBSCRIBER_CAPACITY: usize = 256;

/// The shared output channel: bounded scrollback plus live subscription.
///
/// Cheap to clone; all clones write to the same buffer.
#[derive(Clone, Debug)]
pub struct Terminal {
    lines: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
    tx: broadcast::Sender<String>,
}

impl Terminal {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(SUBSCRIBER_CAPACITY);
        Self {
            lines: Arc::new(Mutex::new(VecDeque::new())),
            capacity: capacity.max(1),
            tx,
        }
    }

    pub fn write_line(&self, line: impl Into<String>) {
        let line = line.into();
        {
            let mut lines = self.lines.lock().unwrap_or_else(|p| p.into_inner());
            if lines.len() == self.capacity {
                lines.pop_front();
            }
            lines.push_back(line.clone());
        }
        let _ = self.tx.send(line);
    }

    pub fn scrollback(&self) -> Vec<String> {
        self.lines
            .lock()
            .map(|lines| lines.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    pub fn clear(&self) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.clear();
        }
    }
}
