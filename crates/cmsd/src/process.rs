//! Live process handle and the driver task that walks it through its stages.

use chrono::Utc;
use cms_core::events::{Event, EventKind, GateOpener};
use cms_core::state::Stage;
use cms_core::types::{ContentId, WorkflowId};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::activities::{ActivityCall, ActivityFailure, ActivityRunner};
use crate::persistence::{PersistenceError, SqliteStore};
use crate::state_machine::{LifecycleState, ParkedActivity, StateMachineError};

/// Shared view of one process. Mutations are serialized by an async lock and
/// persisted before they become visible to readers.
#[derive(Debug)]
pub struct ProcessHandle {
    workflow_id: WorkflowId,
    state_tx: watch::Sender<LifecycleState>,
    mutation: Mutex<()>,
}

impl ProcessHandle {
    pub fn new(state: LifecycleState) -> Self {
        let workflow_id = state.workflow_id.clone();
        let (state_tx, _) = watch::channel(state);
        Self {
            workflow_id,
            state_tx,
            mutation: Mutex::new(()),
        }
    }

    pub fn workflow_id(&self) -> &WorkflowId {
        &self.workflow_id
    }

    pub fn snapshot(&self) -> LifecycleState {
        self.state_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state_tx.subscribe()
    }

    /// Applies `change` to a copy of the state. The copy and the emitted
    /// events are committed in one transaction and then published. A
    /// completed snapshot is final: later changes to it are dropped and only
    /// their events are kept.
    pub async fn mutate<R, F>(&self, store: &SqliteStore, change: F) -> Result<R, PersistenceError>
    where
        F: FnOnce(&mut LifecycleState, &mut Vec<EventKind>) -> R,
    {
        let _guard = self.mutation.lock().await;
        let current = self.snapshot();
        let mut next = current.clone();
        let mut kinds = Vec::new();
        let output = change(&mut next, &mut kinds);

        let changed = next != current && !current.is_completed();
        if changed || !kinds.is_empty() {
            let at = Utc::now();
            let events: Vec<Event> = kinds
                .into_iter()
                .map(|kind| Event::new(self.workflow_id.clone(), at, kind))
                .collect();
            store.save_process_with_events(changed.then_some(&next), &events)?;
        }
        if changed {
            self.state_tx.send_replace(next);
        }
        Ok(output)
    }

    /// Resolves once `condition` holds for the published state.
    pub async fn wait_until<F>(&self, condition: F) -> Result<(), DriverError>
    where
        F: Fn(&LifecycleState) -> bool,
    {
        let mut rx = self.subscribe();
        rx.wait_for(|state| condition(state))
            .await
            .map(|_| ())
            .map_err(|_| DriverError::Closed)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error(transparent)]
    Transition(#[from] StateMachineError),
    #[error("{0}")]
    Activity(ActivityFailure),
    #[error("process state channel closed")]
    Closed,
}

/// Everything a driver needs besides its handle.
#[derive(Debug, Clone)]
pub struct DriverContext {
    pub store: Arc<SqliteStore>,
    pub runner: ActivityRunner,
    pub target_sites: Arc<[String]>,
}

impl DriverContext {
    async fn run(&self, call: ActivityCall) -> Result<(), DriverError> {
        self.runner.run(&call).await.map_err(DriverError::Activity)
    }

    async fn record_stage(
        &self,
        content_id: &ContentId,
        stage: Stage,
        details: Option<&str>,
    ) -> Result<(), DriverError> {
        self.run(ActivityCall::RecordStageChange {
            content_id: content_id.clone(),
            stage,
            details: details.map(ToString::to_string),
        })
        .await
    }

    async fn advance(&self, handle: &ProcessHandle, to: Stage) -> Result<(), DriverError> {
        let now = Utc::now();
        handle
            .mutate(&self.store, |state, events| {
                let transition = state.advance(to, now)?;
                events.push(EventKind::StageEntered {
                    from: Some(transition.from),
                    to: transition.to,
                });
                if transition.to.is_terminal() {
                    events.push(EventKind::ProcessCompleted);
                }
                tracing::info!(
                    process_id = %state.workflow_id,
                    content_id = %state.input.content_id,
                    from = %transition.from,
                    stage = %transition.to,
                    "stage entered"
                );
                Ok::<_, StateMachineError>(())
            })
            .await??;
        Ok(())
    }
}

pub fn spawn_driver(handle: Arc<ProcessHandle>, ctx: DriverContext) -> JoinHandle<()> {
    tokio::spawn(async move { drive(handle, ctx).await })
}

async fn drive(handle: Arc<ProcessHandle>, ctx: DriverContext) {
    let process_id = handle.workflow_id().clone();
    match run_stages(&handle, &ctx).await {
        Ok(()) => tracing::info!(process_id = %process_id, "process completed"),
        Err(DriverError::Activity(failure)) => park(&handle, &ctx, failure).await,
        Err(err) => {
            tracing::error!(process_id = %process_id, error = %err, "process driver halted")
        }
    }
}

async fn park(handle: &ProcessHandle, ctx: &DriverContext, failure: ActivityFailure) {
    let now = Utc::now();
    let message = failure.error.to_string();
    let parked = handle
        .mutate(&ctx.store, |state, events| {
            events.push(EventKind::ActivityFailed {
                activity: failure.activity.to_string(),
                attempts: failure.attempts,
                message: message.clone(),
            });
            state.park(ParkedActivity {
                activity: failure.activity.to_string(),
                attempts: failure.attempts,
                message: message.clone(),
                at: now,
            })
        })
        .await;
    match parked {
        Ok(true) => tracing::error!(
            process_id = %handle.workflow_id(),
            activity = failure.activity,
            attempts = failure.attempts,
            error = %message,
            "activity failed permanently; process parked"
        ),
        Ok(false) => tracing::error!(
            process_id = %handle.workflow_id(),
            activity = failure.activity,
            attempts = failure.attempts,
            error = %message,
            "activity failed after completion; failure recorded"
        ),
        Err(err) => tracing::error!(
            process_id = %handle.workflow_id(),
            error = %err,
            "failed to persist activity failure"
        ),
    }
}

async fn run_stages(handle: &ProcessHandle, ctx: &DriverContext) -> Result<(), DriverError> {
    loop {
        let state = handle.snapshot();
        let content_id = state.input.content_id.clone();
        match state.stage {
            Stage::Translation => {
                ctx.record_stage(&content_id, Stage::Translation, Some("Awaiting translations"))
                    .await?;
                handle
                    .wait_until(LifecycleState::translations_complete)
                    .await?;
                ctx.advance(handle, Stage::Compliance).await?;
            }
            Stage::Compliance => {
                ctx.record_stage(&content_id, Stage::Compliance, None).await?;
                ctx.run(ActivityCall::RunComplianceCheck {
                    content_id: content_id.clone(),
                    site: state.input.site.clone(),
                })
                .await?;
                ctx.advance(handle, Stage::AwaitingApproval).await?;
            }
            Stage::AwaitingApproval => {
                ctx.record_stage(&content_id, Stage::AwaitingApproval, None)
                    .await?;
                handle.wait_until(|s| s.approval_granted).await?;
                ctx.advance(handle, Stage::Scheduled).await?;
            }
            Stage::Scheduled => {
                let now = Utc::now();
                let publish_at = handle
                    .mutate(&ctx.store, |s, _| s.resolve_publish_at(now))
                    .await?;
                ctx.run(ActivityCall::SchedulePublish {
                    content_id: content_id.clone(),
                    publish_at,
                })
                .await?;
                await_publish_gate(handle, ctx, publish_at).await?;
                ctx.advance(handle, Stage::Publishing).await?;
            }
            Stage::Publishing => {
                ctx.record_stage(&content_id, Stage::Publishing, None).await?;
                ctx.run(ActivityCall::PublishContent {
                    content_id: content_id.clone(),
                    target_sites: ctx.target_sites.to_vec(),
                })
                .await?;
                ctx.advance(handle, Stage::Completed).await?;
            }
            Stage::Completed => {
                ctx.record_stage(&content_id, Stage::Completed, Some("Workflow complete"))
                    .await?;
                return Ok(());
            }
        }
    }
}

/// Races the publish time against an explicit `publishNow`. Whichever comes
/// first opens the gate; the other branch is dropped.
async fn await_publish_gate(
    handle: &ProcessHandle,
    ctx: &DriverContext,
    publish_at: chrono::DateTime<Utc>,
) -> Result<(), DriverError> {
    let remaining = (publish_at - Utc::now()).to_std().unwrap_or_default();
    let deadline = tokio::time::Instant::now() + remaining;

    let timer_won = tokio::select! {
        biased;
        opened = handle.wait_until(|s| s.publish_gate_open) => {
            opened?;
            false
        }
        _ = tokio::time::sleep_until(deadline) => true,
    };

    if timer_won {
        let now = Utc::now();
        handle
            .mutate(&ctx.store, |state, events| {
                if state.open_publish_gate(now) {
                    events.push(EventKind::PublishGateOpened {
                        by: GateOpener::Timer,
                    });
                }
            })
            .await?;
    }
    Ok(())
}
