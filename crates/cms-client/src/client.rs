use async_trait::async_trait;
use cms_core::types::{ContentId, ProcessStatus, WorkflowId};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ClientError;
use crate::links::SignalRequest;

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
pub const SIGNAL_TOKEN_HEADER: &str = "x-signal-token";

/// Start input as the gateway accepts it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartPayload {
    pub cms_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    pub locales: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub launch_timestamp_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartAck {
    pub workflow_id: WorkflowId,
    pub run_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DirectoryAnswer {
    workflow_id: WorkflowId,
}

/// What the CMS hooks need from the gateway.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    async fn start_orchestration(&self, payload: &StartPayload) -> Option<WorkflowId>;
    async fn lookup(&self, content_id: &ContentId) -> Option<WorkflowId>;
}

/// Best-effort gateway client. The public calls log failures and answer
/// `None`/`false`; the `try_*` variants surface the error.
#[derive(Debug, Clone)]
pub struct GatewayClient {
    http: reqwest::Client,
    base_url: Url,
}

impl GatewayClient {
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let base_url = Url::parse(base_url).map_err(|err| ClientError::InvalidBaseUrl {
            url: base_url.to_string(),
            message: err.to_string(),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(ClientError::InvalidBaseUrl {
                url: base_url.to_string(),
                message: "url cannot carry a path".to_string(),
            });
        }
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(ClientError::Build)?;
        Ok(Self { http, base_url })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ClientError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| ClientError::InvalidBaseUrl {
                url: self.base_url.to_string(),
                message: "url cannot carry a path".to_string(),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    pub async fn try_start(&self, payload: &StartPayload) -> Result<StartAck, ClientError> {
        let url = self.endpoint(&["workflows"])?;
        let response = self
            .http
            .post(url.clone())
            .json(payload)
            .send()
            .await
            .map_err(|source| request_error(&url, source))?;
        let response = ensure_success(&url, response)?;
        response
            .json::<StartAck>()
            .await
            .map_err(|source| ClientError::Decode {
                url: url.to_string(),
                source,
            })
    }

    pub async fn try_send_signal(&self, request: &SignalRequest) -> Result<(), ClientError> {
        let url = self.endpoint(&[
            "signals",
            request.workflow_id.as_ref(),
            request.signal_name(),
        ])?;
        let mut builder = self.http.post(url.clone()).json(&request.signal.body());
        if let Some(token) = &request.token {
            builder = builder.header(SIGNAL_TOKEN_HEADER, token.as_str());
        }
        let response = builder
            .send()
            .await
            .map_err(|source| request_error(&url, source))?;
        ensure_success(&url, response)?;
        Ok(())
    }

    pub async fn try_fetch_status(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<ProcessStatus, ClientError> {
        let url = self.endpoint(&["workflows", workflow_id.as_ref(), "status"])?;
        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|source| request_error(&url, source))?;
        let response = ensure_success(&url, response)?;
        response
            .json::<ProcessStatus>()
            .await
            .map_err(|source| ClientError::Decode {
                url: url.to_string(),
                source,
            })
    }

    /// `Ok(None)` when the gateway has no process for the content item.
    pub async fn try_lookup(
        &self,
        content_id: &ContentId,
    ) -> Result<Option<WorkflowId>, ClientError> {
        let url = self.endpoint(&["content", content_id.as_ref(), "workflow"])?;
        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|source| request_error(&url, source))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = ensure_success(&url, response)?;
        let answer = response
            .json::<DirectoryAnswer>()
            .await
            .map_err(|source| ClientError::Decode {
                url: url.to_string(),
                source,
            })?;
        Ok(Some(answer.workflow_id))
    }

    pub async fn send_signal(&self, request: &SignalRequest) -> bool {
        match self.try_send_signal(request).await {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(
                    process_id = %request.workflow_id,
                    signal = request.signal_name(),
                    error = %err,
                    "failed to send signal"
                );
                false
            }
        }
    }

    pub async fn fetch_status(&self, workflow_id: &WorkflowId) -> Option<ProcessStatus> {
        match self.try_fetch_status(workflow_id).await {
            Ok(status) => Some(status),
            Err(err) => {
                tracing::warn!(process_id = %workflow_id, error = %err, "failed to fetch status");
                None
            }
        }
    }
}

#[async_trait]
impl Orchestrator for GatewayClient {
    async fn start_orchestration(&self, payload: &StartPayload) -> Option<WorkflowId> {
        match self.try_start(payload).await {
            Ok(ack) => Some(ack.workflow_id),
            Err(err) => {
                tracing::error!(content_id = %payload.cms_id, error = %err, "failed to start workflow");
                None
            }
        }
    }

    async fn lookup(&self, content_id: &ContentId) -> Option<WorkflowId> {
        match self.try_lookup(content_id).await {
            Ok(found) => found,
            Err(err) => {
                tracing::warn!(content_id = %content_id, error = %err, "directory lookup failed");
                None
            }
        }
    }
}

fn request_error(url: &Url, source: reqwest::Error) -> ClientError {
    ClientError::Request {
        url: url.to_string(),
        source,
    }
}

fn ensure_success(url: &Url, response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(ClientError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        })
    }
}
