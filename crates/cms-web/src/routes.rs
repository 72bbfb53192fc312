use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use cms_core::signal::{LifecycleSignal, SignalBody};
use cms_core::types::{ContentId, ProcessStatus, WorkflowId};

use crate::error::WebError;
use crate::model::{
    DirectoryResponse, HealthResponse, SignalQuery, SignalResponse, StartWorkflowRequest,
    StartWorkflowResponse,
};
use crate::state::WebState;

/// Header carrying a signal token when it is not in the query string.
pub const SIGNAL_TOKEN_HEADER: &str = "x-signal-token";

pub fn router(state: WebState) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/workflows", post(start_workflow))
        .route("/workflows/{workflow_id}/status", get(workflow_status))
        .route("/signals/{workflow_id}/{signal_name}", post(send_signal))
        .route("/content/{cms_id}/workflow", get(content_workflow))
        .with_state(state)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

async fn start_workflow(
    State(state): State<WebState>,
    payload: Result<Json<StartWorkflowRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<StartWorkflowResponse>), WebError> {
    let Json(request) = payload.map_err(|rejection| WebError::BadRequest(rejection.body_text()))?;
    let start = request.into_start_request(state.engine().default_locale())?;
    let started = state
        .engine()
        .start(start)
        .await
        .map_err(|err| WebError::from_engine(err, "Failed to start workflow"))?;

    Ok((
        StatusCode::ACCEPTED,
        Json(StartWorkflowResponse {
            workflow_id: started.workflow_id.0,
            run_id: started.run_id.0,
        }),
    ))
}

async fn send_signal(
    State(state): State<WebState>,
    Path((workflow_id, signal_name)): Path<(String, String)>,
    Query(query): Query<SignalQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<SignalResponse>), WebError> {
    let workflow_id = WorkflowId::new(workflow_id);
    let body = parse_signal_body(&body);
    let token = query.token.as_deref().or_else(|| {
        headers
            .get(SIGNAL_TOKEN_HEADER)
            .and_then(|value| value.to_str().ok())
    });
    let locale = body
        .as_ref()
        .ok()
        .and_then(Option::as_ref)
        .and_then(|body| body.locale.as_deref());
    state.authorize_signal(&workflow_id, &signal_name, locale, token)?;

    let body = body?;
    let signal = LifecycleSignal::parse(&signal_name, body.as_ref())
        .map_err(|err| WebError::BadRequest(err.to_string()))?;

    state
        .engine()
        .signal(&workflow_id, signal)
        .await
        .map_err(|err| WebError::from_engine(err, "Failed to dispatch signal"))?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SignalResponse {
            workflow_id: workflow_id.0,
            signal: signal_name,
        }),
    ))
}

fn parse_signal_body(body: &[u8]) -> Result<Option<SignalBody>, WebError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(body)
        .map(Some)
        .map_err(|err| WebError::BadRequest(format!("invalid signal body: {err}")))
}

async fn workflow_status(
    State(state): State<WebState>,
    Path(workflow_id): Path<String>,
) -> Result<Json<ProcessStatus>, WebError> {
    let status = state
        .engine()
        .status(&WorkflowId::new(workflow_id))
        .await
        .map_err(|err| WebError::from_engine(err, "Failed to query workflow status"))?;
    Ok(Json(status))
}

async fn content_workflow(
    State(state): State<WebState>,
    Path(cms_id): Path<String>,
) -> Result<Json<DirectoryResponse>, WebError> {
    let workflow_id = state
        .engine()
        .lookup(&ContentId::new(cms_id.clone()))
        .map_err(|err| WebError::from_engine(err, "Failed to read workflow directory"))?
        .ok_or_else(|| WebError::NotFound {
            resource: format!("content:{cms_id}"),
        })?;
    Ok(Json(DirectoryResponse {
        cms_id,
        workflow_id: workflow_id.0,
    }))
}
