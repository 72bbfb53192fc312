//! Stateless authorization tokens for signal links.
//!
//! A token binds one `(process id, signal name, locale)` triple to a shared
//! secret. Anyone holding the secret can issue and verify; nothing is stored.

use crate::signal::SignalKind;
use crate::types::WorkflowId;

const KEY_DERIVATION_CONTEXT: &str = "cms-orchestrator 2024 signal authorization key";
const CONTEXT_PREFIX: &str = "cms-orchestrator";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("signal secret must not be empty")]
    EmptySecret,
    #[error("signal token is missing")]
    Missing,
    #[error("signal token is malformed")]
    Malformed,
    #[error("signal token does not match")]
    Mismatch,
}

/// Hex encoded token as carried in links and headers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SignalToken(pub String);

impl SignalToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SignalToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Issues and verifies tokens for one secret.
#[derive(Clone)]
pub struct SignalAuthority {
    key: [u8; 32],
}

impl std::fmt::Debug for SignalAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalAuthority").finish_non_exhaustive()
    }
}

impl SignalAuthority {
    pub fn new(secret: &str) -> Result<Self, TokenError> {
        if secret.is_empty() {
            return Err(TokenError::EmptySecret);
        }
        Ok(Self {
            key: blake3::derive_key(KEY_DERIVATION_CONTEXT, secret.as_bytes()),
        })
    }

    pub fn issue(
        &self,
        workflow_id: &WorkflowId,
        signal: SignalKind,
        locale: Option<&str>,
    ) -> SignalToken {
        let context = token_context(workflow_id, signal, locale);
        SignalToken(
            blake3::keyed_hash(&self.key, context.as_bytes())
                .to_hex()
                .to_string(),
        )
    }

    /// Checks `token` against the triple. Comparison is constant time.
    pub fn verify(
        &self,
        workflow_id: &WorkflowId,
        signal: SignalKind,
        locale: Option<&str>,
        token: Option<&str>,
    ) -> Result<(), TokenError> {
        let token = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(TokenError::Missing)?;
        let presented = blake3::Hash::from_hex(token).map_err(|_| TokenError::Malformed)?;
        let context = token_context(workflow_id, signal, locale);
        let expected = blake3::keyed_hash(&self.key, context.as_bytes());
        if expected == presented {
            Ok(())
        } else {
            Err(TokenError::Mismatch)
        }
    }
}

/// Length-prefixed context string. An absent locale and an empty one encode
/// identically.
pub fn token_context(workflow_id: &WorkflowId, signal: SignalKind, locale: Option<&str>) -> String {
    let process = workflow_id.as_ref();
    let name = signal.as_str();
    let locale = locale.unwrap_or("");
    format!(
        "{CONTEXT_PREFIX}:{}:{process}:{}:{name}:{}:{locale}",
        process.len(),
        name.len(),
        locale.len()
    )
}
