use cms_core::signal::SignalKind;
use cms_core::signal_auth::SignalAuthority;
use cms_core::types::WorkflowId;
use cmsd::Engine;
use std::sync::Arc;

use crate::error::WebError;

#[derive(Debug, Clone)]
pub struct WebState {
    engine: Arc<Engine>,
    signal_authority: Option<Arc<SignalAuthority>>,
}

impl WebState {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            signal_authority: None,
        }
    }

    /// Requires a valid token on every signal.
    pub fn with_signal_authority(mut self, authority: SignalAuthority) -> Self {
        self.signal_authority = Some(Arc::new(authority));
        self
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Checks the token for a raw signal name before the signal is parsed,
    /// so unauthenticated callers cannot tell known names from unknown ones.
    pub fn authorize_signal(
        &self,
        workflow_id: &WorkflowId,
        signal_name: &str,
        locale: Option<&str>,
        token: Option<&str>,
    ) -> Result<(), WebError> {
        let Some(authority) = &self.signal_authority else {
            return Ok(());
        };
        let reject = |reason: &dyn std::fmt::Display| {
            tracing::warn!(
                process_id = %workflow_id,
                signal = signal_name,
                reason = %reason,
                "signal rejected"
            );
            WebError::Forbidden
        };
        let kind: SignalKind = signal_name.parse().map_err(|err| reject(&err))?;
        let locale = locale
            .filter(|_| kind.is_locale_scoped())
            .map(str::trim)
            .filter(|locale| !locale.is_empty());
        authority
            .verify(workflow_id, kind, locale, token)
            .map_err(|err| reject(&err))
    }
}
