//! Typed signals delivered to a running process.

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SignalError {
    #[error("unsupported signal: {name}")]
    Unsupported { name: String },
    #[error("locale is required for translationComplete signal")]
    MissingLocale,
}

/// Signal names accepted on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SignalKind {
    TranslationComplete,
    ApprovalGranted,
    PublishNow,
}

impl SignalKind {
    pub const ALL: [SignalKind; 3] = [
        SignalKind::TranslationComplete,
        SignalKind::ApprovalGranted,
        SignalKind::PublishNow,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SignalKind::TranslationComplete => "translationComplete",
            SignalKind::ApprovalGranted => "approvalGranted",
            SignalKind::PublishNow => "publishNow",
        }
    }

    pub fn is_locale_scoped(self) -> bool {
        matches!(self, SignalKind::TranslationComplete)
    }
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SignalKind {
    type Err = SignalError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        SignalKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == value)
            .ok_or_else(|| SignalError::Unsupported {
                name: value.to_string(),
            })
    }
}

/// Optional JSON body sent alongside a signal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalBody {
    #[serde(default)]
    pub locale: Option<String>,
}

/// A signal with its payload. Only `TranslationComplete` carries data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "camelCase")]
pub enum LifecycleSignal {
    TranslationComplete { locale: String },
    ApprovalGranted,
    PublishNow,
}

impl LifecycleSignal {
    /// Builds a signal from its wire name and body.
    pub fn parse(name: &str, body: Option<&SignalBody>) -> Result<Self, SignalError> {
        let kind: SignalKind = name.parse()?;
        Self::from_kind(kind, body)
    }

    pub fn from_kind(kind: SignalKind, body: Option<&SignalBody>) -> Result<Self, SignalError> {
        match kind {
            SignalKind::TranslationComplete => {
                let locale = body
                    .and_then(|b| b.locale.as_deref())
                    .map(str::trim)
                    .filter(|locale| !locale.is_empty())
                    .ok_or(SignalError::MissingLocale)?;
                Ok(LifecycleSignal::TranslationComplete {
                    locale: locale.to_string(),
                })
            }
            SignalKind::ApprovalGranted => Ok(LifecycleSignal::ApprovalGranted),
            SignalKind::PublishNow => Ok(LifecycleSignal::PublishNow),
        }
    }

    pub fn kind(&self) -> SignalKind {
        match self {
            LifecycleSignal::TranslationComplete { .. } => SignalKind::TranslationComplete,
            LifecycleSignal::ApprovalGranted => SignalKind::ApprovalGranted,
            LifecycleSignal::PublishNow => SignalKind::PublishNow,
        }
    }

    pub fn locale(&self) -> Option<&str> {
        match self {
            LifecycleSignal::TranslationComplete { locale } => Some(locale),
            _ => None,
        }
    }

    /// JSON body to send for this signal.
    pub fn body(&self) -> SignalBody {
        SignalBody {
            locale: self.locale().map(ToString::to_string),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(locale: Option<&str>) -> SignalBody {
        SignalBody {
            locale: locale.map(ToString::to_string),
        }
    }

    #[test]
    fn parses_known_signals() {
        assert_eq!(
            LifecycleSignal::parse("translationComplete", Some(&body(Some("fr")))).unwrap(),
            LifecycleSignal::TranslationComplete {
                locale: "fr".to_string()
            }
        );
        assert_eq!(
            LifecycleSignal::parse("approvalGranted", None).unwrap(),
            LifecycleSignal::ApprovalGranted
        );
        assert_eq!(
            LifecycleSignal::parse("publishNow", Some(&body(None))).unwrap(),
            LifecycleSignal::PublishNow
        );
    }

    #[test]
    fn translation_complete_requires_locale() {
        assert_eq!(
            LifecycleSignal::parse("translationComplete", None),
            Err(SignalError::MissingLocale)
        );
        assert_eq!(
            LifecycleSignal::parse("translationComplete", Some(&body(Some("  ")))),
            Err(SignalError::MissingLocale)
        );
    }

    #[test]
    fn unknown_signal_is_rejected_with_its_name() {
        let err = LifecycleSignal::parse("rollback", None).unwrap_err();
        assert_eq!(err.to_string(), "unsupported signal: rollback");
    }

    #[test]
    fn signal_names_are_case_sensitive() {
        assert!("PublishNow".parse::<SignalKind>().is_err());
        assert_eq!(
            "publishNow".parse::<SignalKind>().unwrap(),
            SignalKind::PublishNow
        );
    }

    #[test]
    fn tagged_serialization_keys_by_signal_name() {
        let json = serde_json::to_value(LifecycleSignal::TranslationComplete {
            locale: "de".to_string(),
        })
        .unwrap();
        assert_eq!(json["signal"], "translationComplete");
        assert_eq!(json["locale"], "de");

        let json = serde_json::to_value(LifecycleSignal::ApprovalGranted).unwrap();
        assert_eq!(json, serde_json::json!({ "signal": "approvalGranted" }));
    }

    #[test]
    fn body_carries_locale_only_for_translation() {
        assert_eq!(LifecycleSignal::PublishNow.body(), SignalBody::default());
        let signal = LifecycleSignal::TranslationComplete {
            locale: "en".to_string(),
        };
        assert_eq!(signal.body().locale.as_deref(), Some("en"));
        assert!(signal.kind().is_locale_scoped());
    }
}
