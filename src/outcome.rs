//! Test outcome records fed into the intervention pipeline.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

fn default_id() -> String {
    "unknown".to_string()
}

/// One test execution result. Read-only to the pipeline.
///
/// Every field is optional on input; a record missing everything is an
/// unidentified failure.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Outcome {
    #[serde(default = "default_id", alias = "test_id", alias = "identifier")]
    pub id: String,
    #[serde(default)]
    pub success: bool,
    #[serde(default, alias = "error_type", skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(default, alias = "error", skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, alias = "result_payload")]
    pub result: Map<String, Value>,
}

impl Outcome {
    pub fn passed(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            success: true,
            error_kind: None,
            error_message: None,
            result: Map::new(),
        }
    }

    pub fn failed(id: impl Into<String>) -> Self {
        Self {
            success: false,
            ..Self::passed(id)
        }
    }

    pub fn with_error(mut self, kind: &str, message: &str) -> Self {
        self.error_kind = Some(kind.to_string());
        self.error_message = Some(message.to_string());
        self
    }

    pub fn with_result(mut self, key: &str, value: Value) -> Self {
        self.result.insert(key.to_string(), value);
        self
    }

    /// Error kind, or "" when absent.
    pub fn error_kind(&self) -> &str {
        self.error_kind.as_deref().unwrap_or_default()
    }

    /// Error message, or "" when absent.
    pub fn error_message(&self) -> &str {
        self.error_message.as_deref().unwrap_or_default()
    }

    /// True when the outcome carries any error classification.
    pub fn has_error(&self) -> bool {
        !self.error_kind().is_empty() || !self.error_message().is_empty()
    }

    /// `result.failure_reason` when it is a non-empty string.
    pub fn failure_reason(&self) -> Option<&str> {
        self.result
            .get("failure_reason")
            .and_then(Value::as_str)
            .filter(|reason| !reason.is_empty())
    }
}

/// Parse a batch of outcomes from a JSON array, or from an object with an
/// `outcomes` / `results` array.
pub fn parse_outcomes(json: &str) -> Result<Vec<Outcome>> {
    let value: Value = serde_json::from_str(json).context("outcome batch is not valid JSON")?;
    let array = match value {
        Value::Array(_) => value,
        Value::Object(mut map) => match map.remove("outcomes").or_else(|| map.remove("results")) {
            Some(array) => array,
            None => anyhow::bail!("expected a JSON array or an object with an 'outcomes' array"),
        },
        _ => anyhow::bail!("expected a JSON array of outcomes"),
    };
    serde_json::from_value(array).context("failed to decode outcome records")
}

pub fn load_outcomes(path: &Path) -> Result<Vec<Outcome>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_outcomes(&contents).with_context(|| format!("invalid outcome file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_legacy_field_names() {
        let outcomes = parse_outcomes(
            r#"[{
                "test_id": "test_login",
                "success": false,
                "error_type": "ModuleNotFoundError",
                "error": "No module named 'requests'",
                "result": {"duration": 1.5}
            }]"#,
        )
        .unwrap();

        let outcome = &outcomes[0];
        assert_eq!(outcome.id, "test_login");
        assert!(!outcome.success);
        assert_eq!(outcome.error_kind(), "ModuleNotFoundError");
        assert_eq!(outcome.error_message(), "No module named 'requests'");
        assert_eq!(outcome.result["duration"], json!(1.5));
    }

    #[test]
    fn missing_fields_degrade_to_defaults() {
        let outcomes = parse_outcomes("[{}]").unwrap();
        let outcome = &outcomes[0];
        assert_eq!(outcome.id, "unknown");
        assert!(!outcome.success);
        assert!(!outcome.has_error());
        assert!(outcome.failure_reason().is_none());
        assert!(outcome.result.is_empty());
    }

    #[test]
    fn object_wrapper_is_unwrapped() {
        let outcomes =
            parse_outcomes(r#"{"outcomes": [{"id": "a", "success": true}]}"#).unwrap();
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].success);

        let outcomes = parse_outcomes(r#"{"results": [{"id": "b"}]}"#).unwrap();
        assert_eq!(outcomes[0].id, "b");
    }

    #[test]
    fn rejects_non_array_payloads() {
        assert!(parse_outcomes("42").is_err());
        assert!(parse_outcomes(r#"{"other": []}"#).is_err());
        assert!(parse_outcomes("not json").is_err());
    }

    #[test]
    fn failure_reason_requires_non_empty_string() {
        let outcome = Outcome::failed("t").with_result("failure_reason", json!("expected 3 rows"));
        assert_eq!(outcome.failure_reason(), Some("expected 3 rows"));

        let outcome = Outcome::failed("t").with_result("failure_reason", json!(""));
        assert!(outcome.failure_reason().is_none());

        let outcome = Outcome::failed("t").with_result("failure_reason", json!(7));
        assert!(outcome.failure_reason().is_none());
    }

    #[test]
    fn message_alone_counts_as_classification() {
        let mut outcome = Outcome::failed("t");
        outcome.error_message = Some("boom".to_string());
        assert!(outcome.has_error());
        assert_eq!(outcome.error_kind(), "");
    }

    #[test]
    fn load_outcomes_reads_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("outcomes.json");
        std::fs::write(&path, r#"[{"id": "x", "success": true}]"#).unwrap();
        let outcomes = load_outcomes(&path).unwrap();
        assert_eq!(outcomes, vec![Outcome::passed("x")]);
    }
}
