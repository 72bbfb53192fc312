//! Core identifiers and process inputs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::state::Stage;

/// Locale used when a start request names none.
pub const DEFAULT_LOCALE: &str = "en";

/// Site tag used when a start request names none.
pub const DEFAULT_SITE: &str = "drupal";

/// Stable identifier of a content item inside its CMS.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentId(pub String);

impl ContentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for ContentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ContentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Identifier of one lifecycle process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowId(pub String);

impl WorkflowId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Builds `content-{content_id}-{base36 millis}`.
    pub fn generate(content_id: &ContentId, at: DateTime<Utc>) -> Self {
        let millis = u64::try_from(at.timestamp_millis()).unwrap_or_default();
        Self(format!("content-{}-{}", content_id.0, to_base36(millis)))
    }
}

impl std::fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for WorkflowId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Identifier of one execution of a process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub String);

impl RunId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything a process is created with. Fixed for the life of the process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleInput {
    pub content_id: ContentId,
    pub site: String,
    pub locales: Vec<String>,
    #[serde(default)]
    pub launch_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub requested_by: Option<String>,
}

impl LifecycleInput {
    pub fn new(content_id: ContentId, site: impl Into<String>, locales: Vec<String>) -> Self {
        Self {
            content_id,
            site: site.into(),
            locales: normalize_locales(&locales, DEFAULT_LOCALE),
            launch_at: None,
            priority: None,
            requested_by: None,
        }
    }
}

/// Final value a process yields once it reaches `completed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleResult {
    pub content_id: ContentId,
    pub final_stage: Stage,
}

/// Answer to the status query: where a process is and what it still waits on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessStatus {
    pub workflow_id: WorkflowId,
    pub stage: Stage,
    pub pending_locales: Vec<String>,
}

/// Trims, drops blanks and duplicates (first occurrence wins), and falls
/// back to `default_locale` when nothing is left.
pub fn normalize_locales(locales: &[String], default_locale: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for locale in locales {
        let trimmed = locale.trim();
        if trimmed.is_empty() {
            continue;
        }
        if seen.insert(trimmed.to_string()) {
            out.push(trimmed.to_string());
        }
    }
    if out.is_empty() {
        out.push(default_locale.to_string());
    }
    out
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut buf = Vec::new();
    while value > 0 {
        buf.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    buf.reverse();
    String::from_utf8(buf).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn locales(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn normalize_locales_defaults_when_empty() {
        assert_eq!(normalize_locales(&[], "en"), vec!["en".to_string()]);
        assert_eq!(
            normalize_locales(&locales(&["  ", ""]), "de"),
            vec!["de".to_string()]
        );
    }

    #[test]
    fn normalize_locales_keeps_order_and_drops_duplicates() {
        assert_eq!(
            normalize_locales(&locales(&["fr", " en", "fr", "de "]), "en"),
            locales(&["fr", "en", "de"])
        );
    }

    #[test]
    fn lifecycle_input_new_applies_default_locale() {
        let input = LifecycleInput::new(ContentId::new("42"), "drupal", Vec::new());
        assert_eq!(input.locales, vec![DEFAULT_LOCALE.to_string()]);
        assert_eq!(input.launch_at, None);
    }

    #[test]
    fn generated_workflow_id_embeds_content_id_in_base36() {
        let at = Utc.timestamp_millis_opt(1_700_000_000_000).single().expect("valid ts");
        let id = WorkflowId::generate(&ContentId::new("42"), at);
        assert_eq!(id.0, format!("content-42-{}", to_base36(1_700_000_000_000)));
        assert!(id.0.starts_with("content-42-"));
    }

    #[test]
    fn base36_matches_known_values() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
        assert_eq!(to_base36(1295), "zz");
    }

    #[test]
    fn ids_serialize_transparently() {
        let json = serde_json::to_string(&WorkflowId::new("wf-1")).unwrap();
        assert_eq!(json, "\"wf-1\"");
        let content: ContentId = serde_json::from_str("\"node-7\"").unwrap();
        assert_eq!(content, ContentId::new("node-7"));
    }

    #[test]
    fn process_status_matches_wire_shape() {
        let status = ProcessStatus {
            workflow_id: WorkflowId::new("content-42-abc"),
            stage: Stage::Translation,
            pending_locales: locales(&["fr"]),
        };
        assert_eq!(
            serde_json::to_value(&status).unwrap(),
            serde_json::json!({
                "workflowId": "content-42-abc",
                "stage": "translation",
                "pendingLocales": ["fr"],
            })
        );
    }

    #[test]
    fn lifecycle_result_uses_camel_case_fields() {
        let result = LifecycleResult {
            content_id: ContentId::new("42"),
            final_stage: Stage::Completed,
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["contentId"], "42");
        assert_eq!(value["finalStage"], "completed");
    }
}
