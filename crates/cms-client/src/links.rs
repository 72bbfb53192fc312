//! Signal requests and the editor actions offered per stage.

use cms_core::signal::LifecycleSignal;
use cms_core::signal_auth::{SignalAuthority, SignalToken};
use cms_core::state::Stage;
use cms_core::types::{ProcessStatus, WorkflowId};

/// A signal addressed to one process, optionally carrying its token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalRequest {
    pub workflow_id: WorkflowId,
    pub signal: LifecycleSignal,
    pub token: Option<SignalToken>,
}

impl SignalRequest {
    pub fn new(workflow_id: WorkflowId, signal: LifecycleSignal) -> Self {
        Self {
            workflow_id,
            signal,
            token: None,
        }
    }

    pub fn signal_name(&self) -> &'static str {
        self.signal.kind().as_str()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    pub label: String,
    pub request: SignalRequest,
}

/// Issues signed signal requests. Without an authority requests go out
/// unsigned, which only an open gateway accepts.
#[derive(Debug, Clone, Default)]
pub struct ActionLinks {
    authority: Option<SignalAuthority>,
}

impl ActionLinks {
    pub fn new(authority: Option<SignalAuthority>) -> Self {
        Self { authority }
    }

    pub fn link(&self, workflow_id: &WorkflowId, signal: LifecycleSignal) -> SignalRequest {
        let token = self
            .authority
            .as_ref()
            .map(|authority| authority.issue(workflow_id, signal.kind(), signal.locale()));
        SignalRequest {
            workflow_id: workflow_id.clone(),
            signal,
            token,
        }
    }

    /// Actions an editor may take at the process's current stage.
    /// Translation marks are offered for every configured locale until
    /// approval, since a late mark is harmless.
    pub fn available_actions(&self, status: &ProcessStatus, locales: &[String]) -> Vec<Action> {
        let id = &status.workflow_id;
        let mut actions = Vec::new();

        if matches!(
            status.stage,
            Stage::Translation | Stage::Compliance | Stage::AwaitingApproval
        ) {
            for locale in locales {
                actions.push(Action {
                    label: format!("Mark {locale} translated"),
                    request: self.link(
                        id,
                        LifecycleSignal::TranslationComplete {
                            locale: locale.clone(),
                        },
                    ),
                });
            }
        }
        if status.stage == Stage::AwaitingApproval {
            actions.push(Action {
                label: "Approve content".to_string(),
                request: self.link(id, LifecycleSignal::ApprovalGranted),
            });
        }
        if matches!(status.stage, Stage::AwaitingApproval | Stage::Scheduled) {
            actions.push(Action {
                label: "Publish now".to_string(),
                request: self.link(id, LifecycleSignal::PublishNow),
            });
        }
        actions
    }
}
