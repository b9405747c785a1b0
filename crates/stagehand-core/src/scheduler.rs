//! Named deferred tasks.
//!
//! Each [`TaskPurpose`] has at most one pending task: scheduling a purpose
//! aborts whatever was pending for it, so repeated triggers debounce instead
//! of stacking timers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::task::AbortHandle;
use tracing::trace;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPurpose {
    /// Debounced auto-setup check after a trigger.
    SetupCheck,
    /// Re-check while the manifest is still streaming.
    ManifestRetry,
    /// Release the guard after an install, then re-check.
    InstallSettle,
    /// Release the guard after a start.
    StartGuardRelease,
}

#[derive(Debug, Default)]
struct Registry {
    pending: HashMap<TaskPurpose, (u64, AbortHandle)>,
    next_ticket: u64,
}

#[derive(Debug, Default)]
pub struct ScheduledTasks {
    registry: Mutex<Registry>,
}

impl ScheduledTasks {
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Run `task` after `delay`, replacing any pending task with the same purpose.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn schedule<F>(self: &Arc<Self>, purpose: TaskPurpose, delay: Duration, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let previous = {
            let mut registry = self.registry();
            registry.next_ticket += 1;
            let ticket = registry.next_ticket;
            let owner = Arc::downgrade(self);
            let handle = tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Some(owner) = owner.upgrade() {
                    owner.finish(purpose, ticket);
                }
                trace!(?purpose, "scheduled task fired");
                task();
            });
            registry
                .pending
                .insert(purpose, (ticket, handle.abort_handle()))
        };
        if let Some((_, previous)) = previous {
            previous.abort();
        }
    }

    fn finish(&self, purpose: TaskPurpose, ticket: u64) {
        let mut registry = self.registry();
        if registry
            .pending
            .get(&purpose)
            .is_some_and(|(current, _)| *current == ticket)
        {
            registry.pending.remove(&purpose);
        }
    }

    pub fn is_pending(&self, purpose: TaskPurpose) -> bool {
        self.registry().pending.contains_key(&purpose)
    }

    pub fn cancel(&self, purpose: TaskPurpose) {
        let removed = self.registry().pending.remove(&purpose);
        if let Some((_, handle)) = removed {
            handle.abort();
        }
    }

    pub fn cancel_all(&self) {
        let drained: Vec<_> = self.registry().pending.drain().collect();
        for (_, (_, handle)) in drained {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn rescheduling_a_purpose_replaces_the_pending_task() {
        let tasks = Arc::new(ScheduledTasks::new());
        let fired = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let fired = fired.clone();
            tasks.schedule(TaskPurpose::SetupCheck, Duration::from_secs(3), move || {
                fired.fetch_add(1, Ordering::SeqCst);
            });
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        assert!(tasks.is_pending(TaskPurpose::SetupCheck));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!tasks.is_pending(TaskPurpose::SetupCheck));
    }

    #[tokio::test(start_paused = true)]
    async fn purposes_are_independent_and_cancellable() {
        let tasks = Arc::new(ScheduledTasks::new());
        let fired = Arc::new(AtomicUsize::new(0));
        for purpose in [TaskPurpose::SetupCheck, TaskPurpose::InstallSettle] {
            let fired = fired.clone();
            tasks.schedule(purpose, Duration::from_secs(1), move || {
                fired.fetch_add(1, Ordering::SeqCst);
            });
        }
        tasks.cancel(TaskPurpose::SetupCheck);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        let fired_again = fired.clone();
        tasks.schedule(TaskPurpose::ManifestRetry, Duration::from_secs(1), move || {
            fired_again.fetch_add(1, Ordering::SeqCst);
        });
        tasks.cancel_all();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
