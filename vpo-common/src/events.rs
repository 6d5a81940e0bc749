//! Event types for the VPO event system.
//!
//! Workers publish job lifecycle and progress events onto a broadcast bus.
//! Consumers (a future status UI, tests) subscribe; with no subscribers
//! events are dropped, which is fine: the store remains the durable record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Orchestrator event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum VpoEvent {
    /// A job transitioned from queued to running
    JobStarted {
        job_id: Uuid,
        job_type: String,
        file_path: String,
        timestamp: DateTime<Utc>,
    },

    /// Progress update for a running job
    JobProgress {
        job_id: Uuid,
        percent: f64,
        timestamp: DateTime<Utc>,
    },

    /// A job reached a terminal state
    JobFinished {
        job_id: Uuid,
        status: String,
        error_message: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// One phase of a process job completed
    PhaseCompleted {
        job_id: Uuid,
        phase_name: String,
        changes_made: u64,
        timestamp: DateTime<Utc>,
    },
}

impl VpoEvent {
    /// Get event type as string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            VpoEvent::JobStarted { .. } => "JobStarted",
            VpoEvent::JobProgress { .. } => "JobProgress",
            VpoEvent::JobFinished { .. } => "JobFinished",
            VpoEvent::PhaseCompleted { .. } => "PhaseCompleted",
        }
    }
}

/// Broadcast bus for orchestrator events
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<VpoEvent>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<VpoEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring the no-subscriber case.
    pub fn emit_lossy(&self, event: VpoEvent) {
        let _ = self.tx.send(event);
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
