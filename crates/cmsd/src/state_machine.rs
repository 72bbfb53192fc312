//! Pure lifecycle state and its transitions. No I/O happens here; the driver
//! persists whatever these functions produce.

use chrono::{DateTime, Utc};
use cms_core::signal::LifecycleSignal;
use cms_core::state::Stage;
use cms_core::types::{LifecycleInput, LifecycleResult, ProcessStatus, RunId, WorkflowId};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StateMachineError {
    #[error("invalid stage transition: {from} -> {to}")]
    InvalidTransition { from: Stage, to: Stage },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageTransition {
    pub from: Stage,
    pub to: Stage,
    pub at: DateTime<Utc>,
}

/// What a signal did to the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalEffect {
    Applied,
    /// `publishNow` opened the publish gate.
    GateOpened,
    Ignored,
}

impl SignalEffect {
    pub fn changed_state(self) -> bool {
        !matches!(self, SignalEffect::Ignored)
    }
}

/// Activity that exhausted its retries. The process stays at its stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParkedActivity {
    pub activity: String,
    pub attempts: u32,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Durable snapshot of one content lifecycle process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleState {
    pub workflow_id: WorkflowId,
    pub run_id: RunId,
    pub input: LifecycleInput,
    pub stage: Stage,
    pub completed_locales: Vec<String>,
    pub approval_granted: bool,
    pub publish_gate_open: bool,
    #[serde(default)]
    pub publish_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub parked: Option<ParkedActivity>,
    #[serde(default)]
    pub result: Option<LifecycleResult>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LifecycleState {
    pub fn new(
        workflow_id: WorkflowId,
        run_id: RunId,
        input: LifecycleInput,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            workflow_id,
            run_id,
            input,
            stage: Stage::Translation,
            completed_locales: Vec::new(),
            approval_granted: false,
            publish_gate_open: false,
            publish_at: None,
            parked: None,
            result: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Required locales not yet translated, in input order.
    pub fn pending_locales(&self) -> Vec<String> {
        self.input
            .locales
            .iter()
            .filter(|locale| !self.completed_locales.contains(locale))
            .cloned()
            .collect()
    }

    pub fn translations_complete(&self) -> bool {
        self.input
            .locales
            .iter()
            .all(|locale| self.completed_locales.contains(locale))
    }

    pub fn status(&self) -> ProcessStatus {
        ProcessStatus {
            workflow_id: self.workflow_id.clone(),
            stage: self.stage,
            pending_locales: self.pending_locales(),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.stage.is_terminal()
    }

    pub fn apply_signal(&mut self, signal: &LifecycleSignal, now: DateTime<Utc>) -> SignalEffect {
        if self.is_completed() {
            return SignalEffect::Ignored;
        }

        let effect = match signal {
            LifecycleSignal::TranslationComplete { locale } => {
                let required = self.input.locales.iter().any(|l| l == locale);
                if required && !self.completed_locales.contains(locale) {
                    self.completed_locales.push(locale.clone());
                    SignalEffect::Applied
                } else {
                    SignalEffect::Ignored
                }
            }
            LifecycleSignal::ApprovalGranted => {
                if self.approval_granted {
                    SignalEffect::Ignored
                } else {
                    self.approval_granted = true;
                    SignalEffect::Applied
                }
            }
            LifecycleSignal::PublishNow => {
                if self.open_publish_gate(now) {
                    SignalEffect::GateOpened
                } else {
                    SignalEffect::Ignored
                }
            }
        };

        if effect.changed_state() {
            self.updated_at = now;
        }
        effect
    }

    /// Opens the gate once. Returns false if it was already open.
    pub fn open_publish_gate(&mut self, now: DateTime<Utc>) -> bool {
        if self.publish_gate_open {
            return false;
        }
        self.publish_gate_open = true;
        self.updated_at = now;
        true
    }

    /// Whether the waiting condition of the current stage holds.
    pub fn ready_to_leave(&self) -> bool {
        match self.stage {
            Stage::Translation => self.translations_complete(),
            Stage::AwaitingApproval => self.approval_granted,
            Stage::Scheduled => self.publish_gate_open,
            Stage::Compliance | Stage::Publishing => true,
            Stage::Completed => false,
        }
    }

    /// Fixes the publish time on first call: the launch timestamp if one was
    /// supplied, otherwise `now`.
    pub fn resolve_publish_at(&mut self, now: DateTime<Utc>) -> DateTime<Utc> {
        if let Some(at) = self.publish_at {
            return at;
        }
        let at = self.input.launch_at.unwrap_or(now);
        self.publish_at = Some(at);
        self.updated_at = now;
        at
    }

    pub fn advance(
        &mut self,
        to: Stage,
        now: DateTime<Utc>,
    ) -> Result<StageTransition, StateMachineError> {
        let from = self.stage;
        if !is_transition_allowed(from, to) {
            return Err(StateMachineError::InvalidTransition { from, to });
        }
        self.stage = to;
        self.updated_at = now;
        if to.is_terminal() {
            self.result = Some(LifecycleResult {
                content_id: self.input.content_id.clone(),
                final_stage: to,
            });
        }
        Ok(StageTransition { from, to, at: now })
    }

    /// Marks the process as stuck on a failed activity. Returns false for a
    /// completed process, which is never marked.
    pub fn park(&mut self, parked: ParkedActivity) -> bool {
        if self.is_completed() {
            return false;
        }
        self.updated_at = parked.at;
        self.parked = Some(parked);
        true
    }
}

/// Stages only move one step forward.
pub fn is_transition_allowed(from: Stage, to: Stage) -> bool {
    from.next() == Some(to)
}
