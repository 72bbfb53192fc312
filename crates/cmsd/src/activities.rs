//! Side-effecting steps the lifecycle calls out to.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cms_core::state::Stage;
use cms_core::types::ContentId;
use std::sync::Arc;

use crate::retry::{retry_with_policy, AttemptError, RetryPolicy};

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ActivityError {
    #[error("{activity} failed: {message}")]
    Failed {
        activity: &'static str,
        message: String,
    },
    #[error("{activity} timed out after {after_ms}ms")]
    TimedOut { activity: &'static str, after_ms: u64 },
}

impl ActivityError {
    pub fn failed(activity: &'static str, message: impl Into<String>) -> Self {
        ActivityError::Failed {
            activity,
            message: message.into(),
        }
    }
}

/// Activity exhausted its attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityFailure {
    pub activity: &'static str,
    pub attempts: u32,
    pub error: ActivityError,
}

impl std::fmt::Display for ActivityFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} gave up after {} attempts: {}",
            self.activity, self.attempts, self.error
        )
    }
}

/// External work performed by a process. Implementations must tolerate being
/// called more than once for the same step.
#[async_trait]
pub trait ContentActivities: Send + Sync {
    async fn record_stage_change(
        &self,
        content_id: &ContentId,
        stage: Stage,
        details: Option<&str>,
    ) -> Result<(), ActivityError>;

    async fn run_compliance_check(
        &self,
        content_id: &ContentId,
        site: &str,
    ) -> Result<(), ActivityError>;

    async fn schedule_publish(
        &self,
        content_id: &ContentId,
        publish_at: DateTime<Utc>,
    ) -> Result<(), ActivityError>;

    async fn publish_content(
        &self,
        content_id: &ContentId,
        target_sites: &[String],
    ) -> Result<(), ActivityError>;
}

/// One activity invocation with its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivityCall {
    RecordStageChange {
        content_id: ContentId,
        stage: Stage,
        details: Option<String>,
    },
    RunComplianceCheck {
        content_id: ContentId,
        site: String,
    },
    SchedulePublish {
        content_id: ContentId,
        publish_at: DateTime<Utc>,
    },
    PublishContent {
        content_id: ContentId,
        target_sites: Vec<String>,
    },
}

impl ActivityCall {
    pub fn name(&self) -> &'static str {
        match self {
            ActivityCall::RecordStageChange { .. } => "recordStageChange",
            ActivityCall::RunComplianceCheck { .. } => "runComplianceCheck",
            ActivityCall::SchedulePublish { .. } => "schedulePublish",
            ActivityCall::PublishContent { .. } => "publishContent",
        }
    }

    async fn invoke(&self, activities: &dyn ContentActivities) -> Result<(), ActivityError> {
        match self {
            ActivityCall::RecordStageChange {
                content_id,
                stage,
                details,
            } => {
                activities
                    .record_stage_change(content_id, *stage, details.as_deref())
                    .await
            }
            ActivityCall::RunComplianceCheck { content_id, site } => {
                activities.run_compliance_check(content_id, site).await
            }
            ActivityCall::SchedulePublish {
                content_id,
                publish_at,
            } => activities.schedule_publish(content_id, *publish_at).await,
            ActivityCall::PublishContent {
                content_id,
                target_sites,
            } => activities.publish_content(content_id, target_sites).await,
        }
    }
}

/// Default activities: structured log lines only.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingActivities;

#[async_trait]
impl ContentActivities for TracingActivities {
    async fn record_stage_change(
        &self,
        content_id: &ContentId,
        stage: Stage,
        details: Option<&str>,
    ) -> Result<(), ActivityError> {
        tracing::info!(
            content_id = %content_id,
            stage = %stage,
            details = details.unwrap_or(""),
            "stage change"
        );
        Ok(())
    }

    async fn run_compliance_check(
        &self,
        content_id: &ContentId,
        site: &str,
    ) -> Result<(), ActivityError> {
        tracing::info!(content_id = %content_id, site, "running compliance check");
        Ok(())
    }

    async fn schedule_publish(
        &self,
        content_id: &ContentId,
        publish_at: DateTime<Utc>,
    ) -> Result<(), ActivityError> {
        tracing::info!(
            content_id = %content_id,
            publish_at = %publish_at.to_rfc3339(),
            "publish scheduled"
        );
        Ok(())
    }

    async fn publish_content(
        &self,
        content_id: &ContentId,
        target_sites: &[String],
    ) -> Result<(), ActivityError> {
        tracing::info!(
            content_id = %content_id,
            sites = %target_sites.join(","),
            "publishing content"
        );
        Ok(())
    }
}

/// Runs activity calls under the retry policy.
#[derive(Clone)]
pub struct ActivityRunner {
    activities: Arc<dyn ContentActivities>,
    policy: RetryPolicy,
}

impl std::fmt::Debug for ActivityRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityRunner")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl ActivityRunner {
    pub fn new(activities: Arc<dyn ContentActivities>, policy: RetryPolicy) -> Self {
        Self { activities, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn run(&self, call: &ActivityCall) -> Result<(), ActivityFailure> {
        let activity = call.name();
        let activities = self.activities.as_ref();
        let outcome = retry_with_policy(&self.policy, |attempt| async move {
            let result = call.invoke(activities).await;
            if let Err(err) = &result {
                tracing::warn!(activity, attempt, error = %err, "activity attempt failed");
            }
            result
        })
        .await;

        outcome.map_err(|exhausted| ActivityFailure {
            activity,
            attempts: exhausted.attempts,
            error: match exhausted.last_error {
                AttemptError::Failed(err) => err,
                AttemptError::TimedOut(after) => ActivityError::TimedOut {
                    activity,
                    after_ms: after.as_millis() as u64,
                },
            },
        })
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingActivities;
    use super::*;
    use std::time::Duration;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(10),
            backoff_multiplier: 2,
            attempt_timeout: Duration::from_secs(1),
        }
    }

    fn compliance_call() -> ActivityCall {
        ActivityCall::RunComplianceCheck {
            content_id: ContentId::new("42"),
            site: "drupal".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn runner_retries_until_success() {
        let activities = Arc::new(RecordingActivities::default());
        activities.fail_times("runComplianceCheck", 2);
        let runner = ActivityRunner::new(activities.clone(), fast_policy(3));

        runner.run(&compliance_call()).await.expect("third attempt succeeds");
        assert_eq!(activities.calls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn runner_reports_exhaustion() {
        let activities = Arc::new(RecordingActivities::default());
        activities.fail_times("runComplianceCheck", 5);
        let runner = ActivityRunner::new(activities.clone(), fast_policy(2));

        let failure = runner.run(&compliance_call()).await.unwrap_err();
        assert_eq!(failure.activity, "runComplianceCheck");
        assert_eq!(failure.attempts, 2);
        assert_eq!(
            failure.error,
            ActivityError::failed("runComplianceCheck", "injected failure")
        );
    }

    #[tokio::test]
    async fn tracing_activities_always_succeed() {
        let runner = ActivityRunner::new(Arc::new(TracingActivities), fast_policy(1));
        runner
            .run(&ActivityCall::PublishContent {
                content_id: ContentId::new("42"),
                target_sites: vec!["drupal".to_string(), "wordpress".to_string()],
            })
            .await
            .expect("publish");
    }

    #[test]
    fn call_names_match_activity_names() {
        assert_eq!(compliance_call().name(), "runComplianceCheck");
        assert_eq!(
            ActivityCall::RecordStageChange {
                content_id: ContentId::new("1"),
                stage: Stage::Translation,
                details: None,
            }
            .name(),
            "recordStageChange"
        );
    }
}
