//! Engine façade: starts, signals, queries and recovers lifecycle processes.

use chrono::Utc;
use cms_core::config::EngineConfig;
use cms_core::events::{Event, EventKind, GateOpener};
use cms_core::signal::LifecycleSignal;
use cms_core::types::{ContentId, LifecycleInput, ProcessStatus, RunId, WorkflowId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;

use crate::activities::{ActivityRunner, ContentActivities};
use crate::directory::WorkflowDirectory;
use crate::persistence::{DirectoryRecord, PersistenceError, SqliteStore};
use crate::process::{spawn_driver, DriverContext, ProcessHandle};
use crate::retry::RetryPolicy;
use crate::state_machine::{LifecycleState, SignalEffect};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("workflow not found: {workflow_id}")]
    NotFound { workflow_id: WorkflowId },
    #[error("workflow id {workflow_id} is already used by another content item")]
    WorkflowIdConflict { workflow_id: WorkflowId },
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub default_locale: String,
    pub target_sites: Vec<String>,
    pub retry: RetryPolicy,
}

impl EngineSettings {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            default_locale: config.default_locale.clone(),
            target_sites: config.target_sites.clone(),
            retry: RetryPolicy::from_config(config),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

#[derive(Debug, Clone)]
pub struct StartRequest {
    pub input: LifecycleInput,
    /// Caller-chosen process id; generated when absent.
    pub workflow_id: Option<WorkflowId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartedProcess {
    pub workflow_id: WorkflowId,
    pub run_id: RunId,
    /// False when the content id was already linked to a process.
    pub created: bool,
}

#[derive(Debug)]
pub struct Engine {
    ctx: DriverContext,
    directory: WorkflowDirectory,
    default_locale: String,
    processes: RwLock<HashMap<WorkflowId, Arc<ProcessHandle>>>,
    drivers: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    pub fn new(
        store: Arc<SqliteStore>,
        activities: Arc<dyn ContentActivities>,
        settings: EngineSettings,
    ) -> Self {
        let ctx = DriverContext {
            store: store.clone(),
            runner: ActivityRunner::new(activities, settings.retry),
            target_sites: settings.target_sites.into(),
        };
        Self {
            ctx,
            directory: WorkflowDirectory::new(store),
            default_locale: settings.default_locale,
            processes: RwLock::new(HashMap::new()),
            drivers: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Opens (and migrates) the store named by `config`.
    pub fn open(
        config: &EngineConfig,
        activities: Arc<dyn ContentActivities>,
    ) -> Result<Self, EngineError> {
        let store = SqliteStore::open(&config.sqlite_path)?;
        store.migrate()?;
        Ok(Self::new(
            Arc::new(store),
            activities,
            EngineSettings::from_config(config),
        ))
    }

    pub fn default_locale(&self) -> &str {
        &self.default_locale
    }

    /// Starts a process for the content item, or returns the process already
    /// linked to it.
    pub async fn start(&self, request: StartRequest) -> Result<StartedProcess, EngineError> {
        let StartRequest { input, workflow_id } = request;
        let _content_guard = self.directory.lock_content(&input.content_id).await;

        if let Some(existing) = self.directory.lookup(&input.content_id)? {
            return self.existing_start(&input.content_id, existing).await;
        }

        let now = Utc::now();
        let workflow_id =
            workflow_id.unwrap_or_else(|| WorkflowId::generate(&input.content_id, now));
        let run_id = RunId::new(uuid::Uuid::new_v4().to_string());
        let state = LifecycleState::new(workflow_id.clone(), run_id.clone(), input, now);

        let opening = [
            Event::new(
                workflow_id.clone(),
                now,
                EventKind::ProcessStarted {
                    content_id: state.input.content_id.clone(),
                    locales: state.input.locales.clone(),
                },
            ),
            Event::new(
                workflow_id.clone(),
                now,
                EventKind::StageEntered {
                    from: None,
                    to: state.stage,
                },
            ),
        ];
        match self.ctx.store.insert_new_process(&state, &opening) {
            Ok(DirectoryRecord::Created) => {}
            Ok(DirectoryRecord::Existing(owner)) => {
                return self.existing_start(&state.input.content_id, owner).await;
            }
            Err(PersistenceError::WorkflowIdTaken { workflow_id }) => {
                return Err(EngineError::WorkflowIdConflict { workflow_id });
            }
            Err(err) => return Err(err.into()),
        }

        tracing::info!(
            process_id = %workflow_id,
            run_id = %run_id,
            content_id = %state.input.content_id,
            site = %state.input.site,
            locales = ?state.input.locales,
            "process started"
        );

        let handle = Arc::new(ProcessHandle::new(state));
        self.processes
            .write()
            .await
            .insert(workflow_id.clone(), handle.clone());
        self.spawn(handle);

        Ok(StartedProcess {
            workflow_id,
            run_id,
            created: true,
        })
    }

    async fn existing_start(
        &self,
        content_id: &ContentId,
        workflow_id: WorkflowId,
    ) -> Result<StartedProcess, EngineError> {
        let handle = self.handle(&workflow_id).await?;
        let run_id = handle.snapshot().run_id;
        tracing::info!(
            process_id = %workflow_id,
            content_id = %content_id,
            "content already linked; returning existing process"
        );
        Ok(StartedProcess {
            workflow_id,
            run_id,
            created: false,
        })
    }

    /// Delivers a signal. Signals to a completed process are accepted and
    /// have no effect.
    pub async fn signal(
        &self,
        workflow_id: &WorkflowId,
        signal: LifecycleSignal,
    ) -> Result<SignalEffect, EngineError> {
        let handle = self.handle(workflow_id).await?;
        let now = Utc::now();
        let effect = handle
            .mutate(&self.ctx.store, |state, events| {
                let effect = state.apply_signal(&signal, now);
                if effect.changed_state() {
                    events.push(EventKind::SignalApplied {
                        signal: signal.clone(),
                    });
                }
                if effect == SignalEffect::GateOpened {
                    events.push(EventKind::PublishGateOpened {
                        by: GateOpener::Signal,
                    });
                }
                effect
            })
            .await?;

        tracing::info!(
            process_id = %workflow_id,
            signal = %signal.kind(),
            locale = signal.locale().unwrap_or(""),
            applied = effect.changed_state(),
            "signal delivered"
        );
        Ok(effect)
    }

    pub async fn status(&self, workflow_id: &WorkflowId) -> Result<ProcessStatus, EngineError> {
        Ok(self.handle(workflow_id).await?.snapshot().status())
    }

    pub async fn snapshot(&self, workflow_id: &WorkflowId) -> Result<LifecycleState, EngineError> {
        Ok(self.handle(workflow_id).await?.snapshot())
    }

    /// Live view of a process' state.
    pub async fn subscribe(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<watch::Receiver<LifecycleState>, EngineError> {
        Ok(self.handle(workflow_id).await?.subscribe())
    }

    pub fn lookup(&self, content_id: &ContentId) -> Result<Option<WorkflowId>, EngineError> {
        Ok(self.directory.lookup(content_id)?)
    }

    pub fn events(&self, workflow_id: &WorkflowId) -> Result<Vec<Event>, EngineError> {
        Ok(self.ctx.store.list_events(workflow_id)?)
    }

    /// Resumes every unfinished process found in the store. Returns how many
    /// drivers were started.
    pub async fn recover(&self) -> Result<usize, EngineError> {
        let unfinished = self.ctx.store.list_unfinished_processes()?;
        let mut resumed = 0;
        for state in unfinished {
            let workflow_id = state.workflow_id.clone();
            if self.processes.read().await.contains_key(&workflow_id) {
                continue;
            }
            self.adopt(state).await?;
            resumed += 1;
        }
        tracing::info!(resumed, "recovery finished");
        Ok(resumed)
    }

    async fn handle(&self, workflow_id: &WorkflowId) -> Result<Arc<ProcessHandle>, EngineError> {
        if let Some(handle) = self.processes.read().await.get(workflow_id) {
            return Ok(handle.clone());
        }
        let state = self
            .ctx
            .store
            .load_process(workflow_id)?
            .ok_or_else(|| EngineError::NotFound {
                workflow_id: workflow_id.clone(),
            })?;
        self.adopt(state).await
    }

    /// Takes a stored process into memory, starting its driver when it has
    /// not completed.
    async fn adopt(&self, state: LifecycleState) -> Result<Arc<ProcessHandle>, EngineError> {
        let mut processes = self.processes.write().await;
        if let Some(handle) = processes.get(&state.workflow_id) {
            return Ok(handle.clone());
        }

        let workflow_id = state.workflow_id.clone();
        let completed = state.is_completed();
        let handle = Arc::new(ProcessHandle::new(state));
        processes.insert(workflow_id.clone(), handle.clone());
        drop(processes);

        if !completed {
            let now = Utc::now();
            let stage = handle
                .mutate(&self.ctx.store, |state, events| {
                    if state.parked.take().is_some() {
                        state.updated_at = now;
                    }
                    events.push(EventKind::ProcessRecovered { stage: state.stage });
                    state.stage
                })
                .await?;
            tracing::info!(process_id = %workflow_id, stage = %stage, "resuming process");
            self.spawn(handle.clone());
        }
        Ok(handle)
    }

    fn spawn(&self, handle: Arc<ProcessHandle>) {
        let task = spawn_driver(handle, self.ctx.clone());
        match self.drivers.lock() {
            Ok(mut drivers) => {
                drivers.retain(|task| !task.is_finished());
                drivers.push(task);
            }
            Err(_) => tracing::warn!("driver registry lock poisoned; driver left untracked"),
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Ok(drivers) = self.drivers.get_mut() {
            for task in drivers.drain(..) {
                task.abort();
            }
        }
    }
}
