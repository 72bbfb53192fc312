use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::signal::LifecycleSignal;
use crate::state::Stage;
use crate::types::{ContentId, WorkflowId};

/// What opened the publish gate at the `scheduled` stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateOpener {
    Timer,
    Signal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ProcessStarted {
        content_id: ContentId,
        locales: Vec<String>,
    },
    ProcessRecovered {
        stage: Stage,
    },
    StageEntered {
        from: Option<Stage>,
        to: Stage,
    },
    SignalApplied {
        signal: LifecycleSignal,
    },
    PublishGateOpened {
        by: GateOpener,
    },
    ActivityFailed {
        activity: String,
        attempts: u32,
        message: String,
    },
    ProcessCompleted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub workflow_id: WorkflowId,
    pub at: DateTime<Utc>,
    pub kind: EventKind,
}

impl Event {
    pub fn new(workflow_id: WorkflowId, at: DateTime<Utc>, kind: EventKind) -> Self {
        Self {
            workflow_id,
            at,
            kind,
        }
    }
}

/// Short tag stored next to the payload for filtering.
pub fn event_kind_tag(kind: &EventKind) -> &'static str {
    match kind {
        EventKind::ProcessStarted { .. } => "process_started",
        EventKind::ProcessRecovered { .. } => "process_recovered",
        EventKind::StageEntered { .. } => "stage_entered",
        EventKind::SignalApplied { .. } => "signal_applied",
        EventKind::PublishGateOpened { .. } => "publish_gate_opened",
        EventKind::ActivityFailed { .. } => "activity_failed",
        EventKind::ProcessCompleted => "process_completed",
    }
}
