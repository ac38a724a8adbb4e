//! Progress events published while a run executes.

use crate::ids::{InstanceId, RunId};
use crate::run::{InstanceStatus, RunOutcome};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// All events emitted by the scheduler for a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted {
        run_id: RunId,
        instances: usize,
        timestamp: DateTime<Utc>,
    },
    InstanceStarted {
        run_id: RunId,
        instance: InstanceId,
        timestamp: DateTime<Utc>,
    },
    InstanceCompleted {
        run_id: RunId,
        instance: InstanceId,
        status: InstanceStatus,
        detail: Option<String>,
        duration_ms: u64,
    },
    InstanceSkipped {
        run_id: RunId,
        instance: InstanceId,
        reason: String,
    },
    BarrierFired {
        run_id: RunId,
        barrier: InstanceId,
        artifacts: usize,
    },
    ReportingWarning {
        run_id: RunId,
        message: String,
    },
    RunCompleted {
        run_id: RunId,
        outcome: RunOutcome,
        duration_ms: u64,
    },
}

impl RunEvent {
    pub fn run_id(&self) -> RunId {
        match self {
            RunEvent::RunStarted { run_id, .. }
            | RunEvent::InstanceStarted { run_id, .. }
            | RunEvent::InstanceCompleted { run_id, .. }
            | RunEvent::InstanceSkipped { run_id, .. }
            | RunEvent::BarrierFired { run_id, .. }
            | RunEvent::ReportingWarning { run_id, .. }
            | RunEvent::RunCompleted { run_id, .. } => *run_id,
        }
    }

    /// The instance this event is about, if any.
    pub fn instance(&self) -> Option<&InstanceId> {
        match self {
            RunEvent::InstanceStarted { instance, .. }
            | RunEvent::InstanceCompleted { instance, .. }
            | RunEvent::InstanceSkipped { instance, .. } => Some(instance),
            RunEvent::BarrierFired { barrier, .. } => Some(barrier),
            _ => None,
        }
    }
}
