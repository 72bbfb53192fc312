use cms_core::types::ContentId;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("invalid gateway url {url}: {message}")]
    InvalidBaseUrl { url: String, message: String },
    #[error("failed to build http client: {0}")]
    Build(#[source] reqwest::Error),
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("gateway answered {status} for {url}")]
    Status { url: String, status: u16 },
    #[error("failed to decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("content store failed for {content_id}: {message}")]
    Store {
        content_id: ContentId,
        message: String,
    },
}
