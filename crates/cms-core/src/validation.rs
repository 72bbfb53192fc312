//! Validation for gateway configuration.

use serde::{Deserialize, Serialize};

use crate::config::GatewayConfig;

const MIN_SECRET_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationLevel {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub level: ValidationLevel,
    pub code: &'static str,
    pub message: String,
}

pub trait Validate {
    fn validate(&self) -> Vec<ValidationIssue>;
}

impl Validate for GatewayConfig {
    fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        if self.server.bind.trim().is_empty() {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "server.bind.empty",
                message: "bind address must not be empty".to_string(),
            });
        }

        if self.engine.default_locale.trim().is_empty() {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "engine.default_locale.empty",
                message: "default locale must not be blank".to_string(),
            });
        }

        if self.engine.target_sites.iter().all(|s| s.trim().is_empty()) {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "engine.target_sites.empty",
                message: "at least one onboarded site is required to publish".to_string(),
            });
        }

        if self.engine.activity_timeout_secs == 0 {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "engine.activity_timeout.zero",
                message: "activity timeout cannot be 0".to_string(),
            });
        }

        if self.engine.activity_max_attempts == 0 {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "engine.activity_max_attempts.zero",
                message: "activities need at least one attempt".to_string(),
            });
        }

        if let Some(secret) = &self.auth.signal_secret {
            if secret.len() < MIN_SECRET_LEN {
                issues.push(ValidationIssue {
                    level: ValidationLevel::Warning,
                    code: "auth.signal_secret.short",
                    message: format!(
                        "signal secret is {} bytes; use at least {MIN_SECRET_LEN}",
                        secret.len()
                    ),
                });
            }
        }

        issues
    }
}
