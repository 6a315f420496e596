//! Semantic invariants checked after structural conformance.

use crate::core::StageId;
use crate::errors::InvariantViolation;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A cross-field business rule a conformed record must satisfy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum SemanticRule {
    /// The list must contain at least one element.
    NonEmptyList {
        /// Root list field.
        field: String,
    },

    /// Some element's `field` must contain `contains` (case-insensitive).
    RequiredEntry {
        /// Root list field.
        list: String,
        /// String field inspected on each element.
        field: String,
        /// Required substring.
        contains: String,
    },

    /// Every element must carry non-blank strings for `fields`.
    NonEmptyLeaves {
        /// Root list field.
        list: String,
        /// Leaf fields that must not be blank.
        fields: Vec<String>,
    },

    /// A declared overall pass implies zero failing sub-checks.
    StatusConsistency {
        /// Root status field.
        status_field: String,
        /// Value that means "overall pass".
        pass_value: String,
        /// Root list of sub-checks.
        list: String,
        /// Status field on each sub-check.
        item_status_field: String,
        /// Value that marks a failing sub-check.
        fail_value: String,
    },

    /// Every failing sub-check names a known, non-verify owning stage.
    FailingChecksHaveOwner {
        /// Root list of sub-checks.
        list: String,
        /// Status field on each sub-check.
        item_status_field: String,
        /// Value that marks a failing sub-check.
        fail_value: String,
        /// Field naming the owning stage.
        owner_field: String,
    },
}

impl SemanticRule {
    /// Creates a non-empty list rule.
    #[must_use]
    pub fn non_empty(field: impl Into<String>) -> Self {
        Self::NonEmptyList {
            field: field.into(),
        }
    }

    /// Creates a required entry rule.
    #[must_use]
    pub fn required_entry(
        list: impl Into<String>,
        field: impl Into<String>,
        contains: impl Into<String>,
    ) -> Self {
        Self::RequiredEntry {
            list: list.into(),
            field: field.into(),
            contains: contains.into(),
        }
    }

    /// Creates a non-empty leaves rule.
    #[must_use]
    pub fn non_empty_leaves<I, S>(list: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::NonEmptyLeaves {
            list: list.into(),
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns the rule's short name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::NonEmptyList { .. } => "non_empty_list",
            Self::RequiredEntry { .. } => "required_entry",
            Self::NonEmptyLeaves { .. } => "non_empty_leaves",
            Self::StatusConsistency { .. } => "status_consistency",
            Self::FailingChecksHaveOwner { .. } => "failing_checks_have_owner",
        }
    }

    /// Checks the rule against a conformed record.
    pub fn check(&self, record: &Value) -> Result<(), InvariantViolation> {
        let violation = |description: String| Err(InvariantViolation::new(self.name(), description));

        match self {
            Self::NonEmptyList { field } => {
                if list(record, field).is_empty() {
                    return violation(format!("'{field}' must contain at least one entry"));
                }
            }
            Self::RequiredEntry {
                list: list_field,
                field,
                contains,
            } => {
                let needle = contains.to_ascii_lowercase();
                let found = list(record, list_field).iter().any(|item| {
                    str_field(item, field).is_some_and(|s| s.to_ascii_lowercase().contains(&needle))
                });
                if !found {
                    return violation(format!(
                        "'{list_field}' must include an entry whose {field} contains '{contains}'"
                    ));
                }
            }
            Self::NonEmptyLeaves {
                list: list_field,
                fields,
            } => {
                for (i, item) in list(record, list_field).iter().enumerate() {
                    if let Some(blank) = fields
                        .iter()
                        .find(|f| str_field(item, f).map_or(true, |s| s.trim().is_empty()))
                    {
                        return violation(format!("{list_field}[{i}] has an empty '{blank}'"));
                    }
                }
            }
            Self::StatusConsistency {
                status_field,
                pass_value,
                list: list_field,
                item_status_field,
                fail_value,
            } => {
                let declared_pass = str_field(record, status_field) == Some(pass_value.as_str());
                let failing = failing_items(record, list_field, item_status_field, fail_value).count();
                if declared_pass && failing > 0 {
                    return violation(format!(
                        "{status_field} is '{pass_value}' but {failing} entries in '{list_field}' are '{fail_value}'"
                    ));
                }
            }
            Self::FailingChecksHaveOwner {
                list: list_field,
                item_status_field,
                fail_value,
                owner_field,
            } => {
                for item in failing_items(record, list_field, item_status_field, fail_value) {
                    let id = str_field(item, "id").unwrap_or("?");
                    let owner = str_field(item, owner_field).unwrap_or("").trim();
                    if owner.is_empty() {
                        return violation(format!("failing check '{id}' does not name a {owner_field}"));
                    }
                    match owner.parse::<StageId>() {
                        Ok(stage) if !stage.is_verify() => {}
                        _ => {
                            return violation(format!(
                                "failing check '{id}' names unknown {owner_field} '{owner}'"
                            ));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Checks every rule, reporting all violations together.
pub fn check_all(rules: &[SemanticRule], record: &Value) -> Result<(), InvariantViolation> {
    let mut violations: Vec<InvariantViolation> =
        rules.iter().filter_map(|r| r.check(record).err()).collect();

    if violations.len() <= 1 {
        return violations.pop().map_or(Ok(()), Err);
    }
    Err(InvariantViolation::new(
        violations.iter().map(|v| v.rule.as_str()).collect::<Vec<_>>().join(","),
        violations
            .iter()
            .map(|v| v.description.as_str())
            .collect::<Vec<_>>()
            .join("; "),
    ))
}

fn list<'a>(record: &'a Value, field: &str) -> &'a [Value] {
    record
        .get(field)
        .and_then(Value::as_array)
        .map_or(&[], Vec::as_slice)
}

fn str_field<'a>(value: &'a Value, field: &str) -> Option<&'a str> {
    value.get(field).and_then(Value::as_str)
}

fn failing_items<'a>(
    record: &'a Value,
    list_field: &str,
    status_field: &'a str,
    fail_value: &'a str,
) -> impl Iterator<Item = &'a Value> + 'a {
    list(record, list_field)
        .iter()
        .filter(move |item| str_field(item, status_field) == Some(fail_value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn consistency() -> SemanticRule {
        SemanticRule::StatusConsistency {
            status_field: "overall_status".to_string(),
            pass_value: "pass".to_string(),
            list: "test_cases".to_string(),
            item_status_field: "status".to_string(),
            fail_value: "fail".to_string(),
        }
    }

    fn owners() -> SemanticRule {
        SemanticRule::FailingChecksHaveOwner {
            list: "test_cases".to_string(),
            item_status_field: "status".to_string(),
            fail_value: "fail".to_string(),
            owner_field: "responsible_stage".to_string(),
        }
    }

    #[test]
    fn test_non_empty_list() {
        let rule = SemanticRule::non_empty("stories");
        assert!(rule.check(&json!({"stories": [{}]})).is_ok());
        let err = rule.check(&json!({"stories": []})).unwrap_err();
        assert_eq!(err.rule, "non_empty_list");
        assert!(rule.check(&json!({})).is_err());
    }

    #[test]
    fn test_required_entry() {
        let rule = SemanticRule::required_entry("files", "filename", "main");
        assert!(rule.check(&json!({"files": [{"filename": "app/Main.py"}]})).is_ok());
        assert!(rule.check(&json!({"files": [{"filename": "models.py"}]})).is_err());
    }

    #[test]
    fn test_non_empty_leaves() {
        let rule = SemanticRule::non_empty_leaves("files", ["filename", "content"]);
        assert!(rule.check(&json!({"files": [{"filename": "a", "content": "x"}]})).is_ok());
        let err = rule
            .check(&json!({"files": [{"filename": "a", "content": "x"}, {"filename": "b", "content": "  "}]}))
            .unwrap_err();
        assert!(err.description.contains("files[1]"));
        assert!(err.description.contains("content"));
    }

    #[test]
    fn test_pass_with_failures_is_inconsistent() {
        let record = json!({
            "overall_status": "pass",
            "test_cases": [{"id": "T1", "status": "fail"}]
        });
        let err = consistency().check(&record).unwrap_err();
        assert!(err.description.contains("1 entries"));

        let record = json!({
            "overall_status": "fail",
            "test_cases": [{"id": "T1", "status": "fail"}]
        });
        assert!(consistency().check(&record).is_ok());
    }

    #[test]
    fn test_failing_check_needs_known_owner() {
        let ok = json!({"test_cases": [
            {"id": "T1", "status": "fail", "responsible_stage": "architect"},
            {"id": "T2", "status": "pass", "responsible_stage": ""}
        ]});
        assert!(owners().check(&ok).is_ok());

        let missing = json!({"test_cases": [{"id": "T1", "status": "fail", "responsible_stage": ""}]});
        assert!(owners().check(&missing).unwrap_err().description.contains("does not name"));

        let unknown = json!({"test_cases": [{"id": "T1", "status": "fail", "responsible_stage": "ops"}]});
        assert!(owners().check(&unknown).unwrap_err().description.contains("'ops'"));

        let verify = json!({"test_cases": [{"id": "T1", "status": "fail", "responsible_stage": "verify"}]});
        assert!(owners().check(&verify).is_err());
    }

    #[test]
    fn test_check_all_joins_violations() {
        let record = json!({
            "overall_status": "pass",
            "test_cases": [{"id": "T1", "status": "fail", "responsible_stage": ""}]
        });
        let err = check_all(&[consistency(), owners()], &record).unwrap_err();
        assert_eq!(err.rule, "status_consistency,failing_checks_have_owner");
        assert!(err.description.contains("; "));
        assert!(check_all(&[], &record).is_ok());
    }

    #[test]
    fn test_rule_deserializes_from_config() {
        let rule: SemanticRule =
            serde_json::from_value(json!({"rule": "non_empty_list", "field": "models"})).unwrap();
        assert_eq!(rule, SemanticRule::non_empty("models"));
    }
}
