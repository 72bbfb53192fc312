use chrono::{TimeZone, Utc};
use cms_core::types::{normalize_locales, ContentId, LifecycleInput, WorkflowId, DEFAULT_SITE};
use cmsd::StartRequest;
use serde::{Deserialize, Serialize};

use crate::error::WebError;

/// Body of `POST /workflows`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartWorkflowRequest {
    #[serde(default)]
    pub cms_id: Option<String>,
    #[serde(default)]
    pub site: Option<String>,
    #[serde(default)]
    pub locales: Vec<String>,
    #[serde(default)]
    pub requested_by: Option<String>,
    #[serde(default)]
    pub launch_timestamp_ms: Option<i64>,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub workflow_id: Option<String>,
}

impl StartWorkflowRequest {
    pub fn into_start_request(self, default_locale: &str) -> Result<StartRequest, WebError> {
        let cms_id = non_blank(self.cms_id)
            .ok_or_else(|| WebError::BadRequest("cmsId is required".to_string()))?;
        let launch_at = match self.launch_timestamp_ms {
            Some(ms) => Some(Utc.timestamp_millis_opt(ms).single().ok_or_else(|| {
                WebError::BadRequest(format!("launchTimestampMs out of range: {ms}"))
            })?),
            None => None,
        };

        let input = LifecycleInput {
            content_id: ContentId::new(cms_id),
            site: non_blank(self.site).unwrap_or_else(|| DEFAULT_SITE.to_string()),
            locales: normalize_locales(&self.locales, default_locale),
            launch_at,
            priority: self.priority,
            requested_by: non_blank(self.requested_by),
        };
        Ok(StartRequest {
            input,
            workflow_id: non_blank(self.workflow_id).map(WorkflowId::new),
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartWorkflowResponse {
    pub workflow_id: String,
    pub run_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalResponse {
    pub workflow_id: String,
    pub signal: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalQuery {
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryResponse {
    pub cms_id: String,
    pub workflow_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_request_applies_defaults() {
        let request: StartWorkflowRequest =
            serde_json::from_str(r#"{"cmsId":" 42 ","locales":[]}"#).unwrap();
        let start = request.into_start_request("en").unwrap();
        assert_eq!(start.input.content_id, ContentId::new("42"));
        assert_eq!(start.input.site, "drupal");
        assert_eq!(start.input.locales, vec!["en"]);
        assert_eq!(start.input.launch_at, None);
        assert_eq!(start.workflow_id, None);
    }

    #[test]
    fn start_request_keeps_supplied_fields() {
        let request: StartWorkflowRequest = serde_json::from_str(
            r#"{
                "cmsId": "42",
                "site": "wordpress",
                "locales": ["fr", "fr", "de"],
                "requestedBy": "editor@example.com",
                "launchTimestampMs": 1767225600000,
                "priority": 2,
                "workflowId": "custom-id"
            }"#,
        )
        .unwrap();
        let start = request.into_start_request("en").unwrap();
        assert_eq!(start.input.site, "wordpress");
        assert_eq!(start.input.locales, vec!["fr", "de"]);
        assert_eq!(
            start.input.requested_by.as_deref(),
            Some("editor@example.com")
        );
        assert_eq!(
            start.input.launch_at.map(|at| at.timestamp_millis()),
            Some(1_767_225_600_000)
        );
        assert_eq!(start.input.priority, Some(2));
        assert_eq!(start.workflow_id, Some(WorkflowId::new("custom-id")));
    }

    #[test]
    fn missing_or_blank_cms_id_is_rejected() {
        for body in [r#"{}"#, r#"{"cmsId":"   "}"#] {
            let request: StartWorkflowRequest = serde_json::from_str(body).unwrap();
            let err = request.into_start_request("en").unwrap_err();
            assert_eq!(err.to_string(), "cmsId is required");
        }
    }

    #[test]
    fn responses_use_camel_case() {
        let value = serde_json::to_value(StartWorkflowResponse {
            workflow_id: "content-1-a".to_string(),
            run_id: "r".to_string(),
        })
        .unwrap();
        assert_eq!(
            value,
            serde_json::json!({ "workflowId": "content-1-a", "runId": "r" })
        );
        let value = serde_json::to_value(DirectoryResponse {
            cms_id: "1".to_string(),
            workflow_id: "content-1-a".to_string(),
        })
        .unwrap();
        assert_eq!(value["cmsId"], "1");
    }
}
