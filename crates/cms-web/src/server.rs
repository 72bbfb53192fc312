use axum::serve;
use tokio::net::TcpListener;

use crate::error::WebError;
use crate::routes::router;
use crate::state::WebState;

pub async fn run_web_server(bind_addr: &str, state: WebState) -> Result<(), WebError> {
    let listener = TcpListener::bind(bind_addr).await?;
    tracing::info!(bind = %bind_addr, "gateway listening");
    serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| WebError::Internal {
            message: err.to_string(),
        })?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
