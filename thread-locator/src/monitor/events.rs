//! Monitor events for observers.
//!
//! Candidate monitors publish these as they progress. The engine itself does
//! not depend on them; they exist for logging and progress output.

use chrono::{DateTime, Utc};
use imageboard_api::ThreadId;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::candidate::DropReason;

/// Events emitted by candidate monitors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MonitorEvent {
    /// A candidate started being monitored.
    Started {
        thread_id: ThreadId,
        timestamp: DateTime<Utc>,
    },
    /// The candidate's opening post matched the keywords.
    Validated {
        thread_id: ThreadId,
        timestamp: DateTime<Utc>,
    },
    /// An attempt did not settle the candidate; another one is scheduled.
    Retrying {
        thread_id: ThreadId,
        attempts: u32,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    /// The candidate carries the marker.
    Found {
        thread_id: ThreadId,
        attempts: u32,
        timestamp: DateTime<Utc>,
    },
    /// Retry limit reached.
    Exhausted {
        thread_id: ThreadId,
        attempts: u32,
        timestamp: DateTime<Utc>,
    },
    Dropped {
        thread_id: ThreadId,
        reason: DropReason,
        timestamp: DateTime<Utc>,
    },
    /// Monitoring was stopped from outside.
    Stopped {
        thread_id: ThreadId,
        attempts: u32,
        timestamp: DateTime<Utc>,
    },
}

impl MonitorEvent {
    pub fn thread_id(&self) -> ThreadId {
        match self {
            MonitorEvent::Started { thread_id, .. }
            | MonitorEvent::Validated { thread_id, .. }
            | MonitorEvent::Retrying { thread_id, .. }
            | MonitorEvent::Found { thread_id, .. }
            | MonitorEvent::Exhausted { thread_id, .. }
            | MonitorEvent::Dropped { thread_id, .. }
            | MonitorEvent::Stopped { thread_id, .. } => *thread_id,
        }
    }

    /// Get a human-readable description of the event.
    pub fn description(&self) -> String {
        match self {
            MonitorEvent::Started { thread_id, .. } => {
                format!("Monitoring candidate thread {}", thread_id)
            }
            MonitorEvent::Validated { thread_id, .. } => {
                format!("Thread {} is on topic", thread_id)
            }
            MonitorEvent::Retrying {
                thread_id,
                attempts,
                reason,
                ..
            } => {
                format!("Thread {}: {} (attempt {})", thread_id, reason, attempts)
            }
            MonitorEvent::Found {
                thread_id,
                attempts,
                ..
            } => {
                format!("Thread {} carries the marker (attempt {})", thread_id, attempts)
            }
            MonitorEvent::Exhausted {
                thread_id,
                attempts,
                ..
            } => {
                format!("Gave up on thread {} after {} attempts", thread_id, attempts)
            }
            MonitorEvent::Dropped {
                thread_id, reason, ..
            } => {
                format!("Dropped thread {}: {}", thread_id, reason)
            }
            MonitorEvent::Stopped { thread_id, .. } => {
                format!("Stopped monitoring thread {}", thread_id)
            }
        }
    }

    /// Whether this event ends the candidate's monitoring.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MonitorEvent::Found { .. }
                | MonitorEvent::Exhausted { .. }
                | MonitorEvent::Dropped { .. }
                | MonitorEvent::Stopped { .. }
        )
    }
}

/// Broadcaster for monitor events.
#[derive(Clone)]
pub struct MonitorEventBroadcaster {
    sender: broadcast::Sender<MonitorEvent>,
}

impl MonitorEventBroadcaster {
    /// Create a new broadcaster with default capacity (256).
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.sender.subscribe()
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: MonitorEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for MonitorEventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MonitorEventBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorEventBroadcaster")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
