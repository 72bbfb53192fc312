//! Save hooks a CMS integration calls to start orchestration.
//!
//! Writing the workflow id back onto the item is itself a save. Those saves
//! are tagged [`MutationOrigin::WorkflowWriteBack`] and never start anything.

use async_trait::async_trait;
use cms_core::types::{ContentId, WorkflowId, DEFAULT_LOCALE, DEFAULT_SITE};
use serde::{Deserialize, Serialize};

use crate::client::{Orchestrator, StartPayload};
use crate::error::HookError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerSettings {
    pub site_identifier: String,
    pub monitored_types: Vec<String>,
    pub default_locales: Vec<String>,
    pub start_on_create: bool,
    pub start_on_publish: bool,
}

impl Default for TriggerSettings {
    fn default() -> Self {
        Self {
            site_identifier: DEFAULT_SITE.to_string(),
            monitored_types: Vec::new(),
            default_locales: vec![DEFAULT_LOCALE.to_string()],
            start_on_create: true,
            start_on_publish: true,
        }
    }
}

impl TriggerSettings {
    pub fn monitors(&self, content_type: &str) -> bool {
        self.monitored_types.iter().any(|t| t == content_type)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Created,
    Updated {
        was_published: bool,
        is_published: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOrigin {
    Editor,
    WorkflowWriteBack,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentMutation {
    pub content_id: ContentId,
    pub content_type: String,
    pub kind: MutationKind,
    pub requested_by: Option<String>,
    pub origin: MutationOrigin,
}

/// The CMS side: where an item's linked workflow id lives.
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn workflow_id_for(&self, content_id: &ContentId)
        -> Result<Option<WorkflowId>, HookError>;

    /// Saves the id onto the item. The resulting save must reach the hooks
    /// with `origin`.
    async fn persist_workflow_id(
        &self,
        content_id: &ContentId,
        workflow_id: &WorkflowId,
        origin: MutationOrigin,
    ) -> Result<(), HookError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    Suppressed,
    NotMonitored,
    CreateDisabled,
    PublishDisabled,
    NotPublishTransition,
    AlreadyLinked(WorkflowId),
    Started(WorkflowId),
    StartFailed,
}

pub struct ContentHooks<O, S> {
    settings: TriggerSettings,
    orchestrator: O,
    store: S,
}

impl<O, S> ContentHooks<O, S>
where
    O: Orchestrator,
    S: ContentStore,
{
    pub fn new(settings: TriggerSettings, orchestrator: O, store: S) -> Self {
        Self {
            settings,
            orchestrator,
            store,
        }
    }

    pub fn settings(&self) -> &TriggerSettings {
        &self.settings
    }

    pub async fn on_mutation(
        &self,
        mutation: &ContentMutation,
    ) -> Result<TriggerOutcome, HookError> {
        if mutation.origin == MutationOrigin::WorkflowWriteBack {
            return Ok(TriggerOutcome::Suppressed);
        }
        if !self.settings.monitors(&mutation.content_type) {
            return Ok(TriggerOutcome::NotMonitored);
        }
        match mutation.kind {
            MutationKind::Created if !self.settings.start_on_create => {
                return Ok(TriggerOutcome::CreateDisabled);
            }
            MutationKind::Created => {}
            MutationKind::Updated { .. } if !self.settings.start_on_publish => {
                return Ok(TriggerOutcome::PublishDisabled);
            }
            MutationKind::Updated {
                was_published,
                is_published,
            } => {
                if was_published || !is_published {
                    return Ok(TriggerOutcome::NotPublishTransition);
                }
            }
        }

        if let Some(existing) = self.linked_workflow(&mutation.content_id).await? {
            return Ok(TriggerOutcome::AlreadyLinked(existing));
        }

        let payload = StartPayload {
            cms_id: mutation.content_id.0.clone(),
            site: Some(self.settings.site_identifier.clone()),
            locales: self.settings.default_locales.clone(),
            requested_by: Some(
                mutation
                    .requested_by
                    .clone()
                    .unwrap_or_else(|| "system".to_string()),
            ),
            ..StartPayload::default()
        };
        let Some(workflow_id) = self.orchestrator.start_orchestration(&payload).await else {
            tracing::error!(content_id = %mutation.content_id, "workflow start failed");
            return Ok(TriggerOutcome::StartFailed);
        };

        self.store
            .persist_workflow_id(
                &mutation.content_id,
                &workflow_id,
                MutationOrigin::WorkflowWriteBack,
            )
            .await?;
        tracing::info!(
            content_id = %mutation.content_id,
            process_id = %workflow_id,
            "workflow started"
        );
        Ok(TriggerOutcome::Started(workflow_id))
    }

    /// The item's own field first, then the gateway directory. A directory
    /// hit is written back so the next save short-circuits locally.
    async fn linked_workflow(
        &self,
        content_id: &ContentId,
    ) -> Result<Option<WorkflowId>, HookError> {
        if let Some(found) = self.store.workflow_id_for(content_id).await? {
            return Ok(Some(found));
        }
        let Some(found) = self.orchestrator.lookup(content_id).await else {
            return Ok(None);
        };
        self.store
            .persist_workflow_id(content_id, &found, MutationOrigin::WorkflowWriteBack)
            .await?;
        Ok(Some(found))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct FakeGateway {
        directory: Mutex<HashMap<ContentId, WorkflowId>>,
        starts: Mutex<Vec<StartPayload>>,
        down: bool,
    }

    #[async_trait]
    impl Orchestrator for Arc<FakeGateway> {
        async fn start_orchestration(&self, payload: &StartPayload) -> Option<WorkflowId> {
            if self.down {
                return None;
            }
            self.starts.lock().unwrap().push(payload.clone());
            let id = WorkflowId::new(format!("content-{}-t", payload.cms_id));
            self.directory
                .lock()
                .unwrap()
                .insert(ContentId::new(payload.cms_id.clone()), id.clone());
            Some(id)
        }

        async fn lookup(&self, content_id: &ContentId) -> Option<WorkflowId> {
            self.directory.lock().unwrap().get(content_id).cloned()
        }
    }

    /// Records every save it performs as the mutation the CMS would emit.
    #[derive(Default)]
    struct FakeStore {
        fields: Mutex<HashMap<ContentId, WorkflowId>>,
        saves: Mutex<Vec<ContentMutation>>,
    }

    #[async_trait]
    impl ContentStore for Arc<FakeStore> {
        async fn workflow_id_for(
            &self,
            content_id: &ContentId,
        ) -> Result<Option<WorkflowId>, HookError> {
            Ok(self.fields.lock().unwrap().get(content_id).cloned())
        }

        async fn persist_workflow_id(
            &self,
            content_id: &ContentId,
            workflow_id: &WorkflowId,
            origin: MutationOrigin,
        ) -> Result<(), HookError> {
            self.fields
                .lock()
                .unwrap()
                .insert(content_id.clone(), workflow_id.clone());
            self.saves.lock().unwrap().push(ContentMutation {
                content_id: content_id.clone(),
                content_type: "article".to_string(),
                kind: MutationKind::Updated {
                    was_published: false,
                    is_published: true,
                },
                requested_by: None,
                origin,
            });
            Ok(())
        }
    }

    fn settings() -> TriggerSettings {
        TriggerSettings {
            monitored_types: vec!["article".to_string()],
            default_locales: vec!["en".to_string(), "fr".to_string()],
            ..TriggerSettings::default()
        }
    }

    fn build_hooks(
        settings: TriggerSettings,
    ) -> (
        ContentHooks<Arc<FakeGateway>, Arc<FakeStore>>,
        Arc<FakeGateway>,
        Arc<FakeStore>,
    ) {
        let gateway = Arc::new(FakeGateway::default());
        let store = Arc::new(FakeStore::default());
        (
            ContentHooks::new(settings, gateway.clone(), store.clone()),
            gateway,
            store,
        )
    }

    fn created(id: &str) -> ContentMutation {
        ContentMutation {
            content_id: ContentId::new(id),
            content_type: "article".to_string(),
            kind: MutationKind::Created,
            requested_by: Some("editor".to_string()),
            origin: MutationOrigin::Editor,
        }
    }

    fn updated(id: &str, was_published: bool, is_published: bool) -> ContentMutation {
        ContentMutation {
            kind: MutationKind::Updated {
                was_published,
                is_published,
            },
            ..created(id)
        }
    }

    #[tokio::test]
    async fn create_starts_and_writes_back() {
        let (hooks, gateway, store) = build_hooks(settings());
        let outcome = hooks.on_mutation(&created("42")).await.unwrap();
        assert_eq!(outcome, TriggerOutcome::Started(WorkflowId::new("content-42-t")));

        let starts = gateway.starts.lock().unwrap().clone();
        assert_eq!(starts.len(), 1);
        assert_eq!(starts[0].site.as_deref(), Some("drupal"));
        assert_eq!(starts[0].locales, vec!["en", "fr"]);
        assert_eq!(starts[0].requested_by.as_deref(), Some("editor"));

        let saves = store.saves.lock().unwrap().clone();
        assert_eq!(saves.len(), 1);
        assert_eq!(saves[0].origin, MutationOrigin::WorkflowWriteBack);
    }

    #[tokio::test]
    async fn write_back_save_does_not_start_again() {
        let (hooks, gateway, store) = build_hooks(settings());
        hooks.on_mutation(&created("42")).await.unwrap();

        let write_back = store.saves.lock().unwrap()[0].clone();
        assert_eq!(
            hooks.on_mutation(&write_back).await.unwrap(),
            TriggerOutcome::Suppressed
        );
        assert_eq!(gateway.starts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn linked_items_are_not_restarted() {
        let (hooks, gateway, _store) = build_hooks(settings());
        hooks.on_mutation(&created("42")).await.unwrap();
        assert_eq!(
            hooks.on_mutation(&updated("42", false, true)).await.unwrap(),
            TriggerOutcome::AlreadyLinked(WorkflowId::new("content-42-t"))
        );
        assert_eq!(gateway.starts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn directory_hit_is_copied_onto_the_item() {
        let (hooks, gateway, store) = build_hooks(settings());
        gateway
            .directory
            .lock()
            .unwrap()
            .insert(ContentId::new("7"), WorkflowId::new("content-7-old"));

        let outcome = hooks.on_mutation(&updated("7", false, true)).await.unwrap();
        assert_eq!(
            outcome,
            TriggerOutcome::AlreadyLinked(WorkflowId::new("content-7-old"))
        );
        assert!(gateway.starts.lock().unwrap().is_empty());
        assert_eq!(
            store.fields.lock().unwrap().get(&ContentId::new("7")),
            Some(&WorkflowId::new("content-7-old"))
        );
    }

    #[tokio::test]
    async fn filters_apply_in_order() {
        let (hooks, _, _) = build_hooks(settings());
        let mut page = created("1");
        page.content_type = "page".to_string();
        assert_eq!(
            hooks.on_mutation(&page).await.unwrap(),
            TriggerOutcome::NotMonitored
        );
        assert_eq!(
            hooks.on_mutation(&updated("1", true, true)).await.unwrap(),
            TriggerOutcome::NotPublishTransition
        );
        assert_eq!(
            hooks.on_mutation(&updated("1", false, false)).await.unwrap(),
            TriggerOutcome::NotPublishTransition
        );

        let (hooks, _, _) = build_hooks(TriggerSettings {
            start_on_create: false,
            start_on_publish: false,
            ..settings()
        });
        assert_eq!(
            hooks.on_mutation(&created("1")).await.unwrap(),
            TriggerOutcome::CreateDisabled
        );
        assert_eq!(
            hooks.on_mutation(&updated("1", false, true)).await.unwrap(),
            TriggerOutcome::PublishDisabled
        );
    }

    #[tokio::test]
    async fn gateway_outage_reports_start_failed() {
        let gateway = Arc::new(FakeGateway {
            down: true,
            ..FakeGateway::default()
        });
        let store = Arc::new(FakeStore::default());
        let hooks = ContentHooks::new(settings(), gateway, store.clone());
        assert_eq!(
            hooks.on_mutation(&created("5")).await.unwrap(),
            TriggerOutcome::StartFailed
        );
        assert!(store.saves.lock().unwrap().is_empty());
    }
}
