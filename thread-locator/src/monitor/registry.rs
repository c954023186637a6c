//! Registry of candidate monitors.
//!
//! Tracks one [`MonitorHandle`] per candidate thread and owns the monitor
//! tasks through a `JoinSet`. Handles stay registered after their monitor
//! finishes, so a candidate that was dropped or exhausted is never monitored
//! a second time.

use std::collections::HashMap;

use imageboard_api::ThreadId;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::candidate::{CandidateMonitor, MonitorHandle, MonitorStatus};

/// Result of a monitor task completion.
#[derive(Debug, Clone, Copy)]
pub struct MonitorTaskResult {
    pub thread_id: ThreadId,
    pub status: MonitorStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("thread {0} is already monitored")]
    AlreadyMonitored(ThreadId),
}

pub struct MonitorRegistry {
    monitors: HashMap<ThreadId, MonitorHandle>,
    task_set: JoinSet<MonitorTaskResult>,
    /// Parent of every monitor's token.
    cancellation_token: CancellationToken,
}

impl MonitorRegistry {
    pub fn new(cancellation_token: CancellationToken) -> Self {
        Self {
            monitors: HashMap::new(),
            task_set: JoinSet::new(),
            cancellation_token,
        }
    }

    /// Token to construct the next monitor with.
    pub fn child_token(&self) -> CancellationToken {
        self.cancellation_token.child_token()
    }

    pub fn contains(&self, id: ThreadId) -> bool {
        self.monitors.contains_key(&id)
    }

    /// Every thread ever registered, finished or not.
    pub fn len(&self) -> usize {
        self.monitors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.monitors.is_empty()
    }

    /// Monitors that have not reached a terminal state.
    pub fn active_count(&self) -> usize {
        self.monitors.values().filter(|h| !h.is_finished()).count()
    }

    pub fn handles(&self) -> impl Iterator<Item = &MonitorHandle> {
        self.monitors.values()
    }

    /// Register and spawn a monitor.
    pub fn spawn(
        &mut self,
        monitor: CandidateMonitor,
        handle: MonitorHandle,
    ) -> Result<MonitorHandle, RegistryError> {
        let thread_id = monitor.id();
        if self.monitors.contains_key(&thread_id) {
            return Err(RegistryError::AlreadyMonitored(thread_id));
        }

        debug!("Spawning monitor for thread {}", thread_id);
        self.monitors.insert(thread_id, handle.clone());
        self.task_set.spawn(async move {
            let status = monitor.run().await;
            MonitorTaskResult { thread_id, status }
        });

        Ok(handle)
    }

    /// Wait for the next monitor task to complete.
    ///
    /// Returns `None` if there are no running tasks.
    pub async fn join_next(&mut self) -> Option<Result<MonitorTaskResult, JoinError>> {
        self.task_set.join_next().await
    }

    pub fn has_pending_tasks(&self) -> bool {
        !self.task_set.is_empty()
    }

    /// Log a finished monitor. The handle stays registered.
    pub fn handle_task_completion(&self, result: Result<MonitorTaskResult, JoinError>) {
        match result {
            Ok(MonitorTaskResult { thread_id, status }) => debug!(
                thread = %thread_id,
                state = %status.state,
                attempts = status.attempts,
                "Monitor finished"
            ),
            Err(e) => warn!(error = %e, "Monitor task failed"),
        }
    }

    /// Stop every monitor. Idempotent.
    pub fn stop_all(&self) {
        debug!("Stopping {} monitors", self.monitors.len());
        for handle in self.monitors.values() {
            handle.stop();
        }
    }

    /// Stop every monitor and wait for their tasks to exit.
    pub async fn shutdown(&mut self) {
        self.stop_all();
        while let Some(result) = self.task_set.join_next().await {
            self.handle_task_completion(result);
        }
    }
}

impl std::fmt::Debug for MonitorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorRegistry")
            .field("monitors", &self.monitors.len())
            .field("tasks", &self.task_set.len())
            .finish()
    }
}
