use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use cmsd::EngineError;

use crate::model::ErrorBody;

#[derive(Debug, thiserror::Error)]
pub enum WebError {
    #[error("{0}")]
    BadRequest(String),
    #[error("signal token is missing or invalid")]
    Forbidden,
    #[error("not found: {resource}")]
    NotFound { resource: String },
    #[error("{0}")]
    Conflict(String),
    #[error("{message}")]
    Internal { message: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl WebError {
    /// Maps an engine failure; infrastructure errors surface as `context`
    /// with the detail kept in the log.
    pub fn from_engine(err: EngineError, context: &str) -> Self {
        match err {
            EngineError::NotFound { workflow_id } => WebError::NotFound {
                resource: format!("workflow:{workflow_id}"),
            },
            EngineError::WorkflowIdConflict { .. } => WebError::Conflict(err.to_string()),
            EngineError::Persistence(source) => {
                tracing::error!(error = %source, "{context}");
                WebError::Internal {
                    message: context.to_string(),
                }
            }
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            WebError::BadRequest(_) => StatusCode::BAD_REQUEST,
            WebError::Forbidden => StatusCode::FORBIDDEN,
            WebError::NotFound { .. } => StatusCode::NOT_FOUND,
            WebError::Conflict(_) => StatusCode::CONFLICT,
            WebError::Internal { .. } | WebError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.to_string(),
        };
        (self.status_code(), Json(body)).into_response()
    }
}
