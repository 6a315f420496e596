//! Stage profiles and the standard catalog.

use super::{check_all, EnumSpec, FieldSpec, FieldType, SchemaDescriptor, SemanticRule};
use crate::core::StageId;
use crate::errors::{ConfigError, InvariantViolation};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::Path;

/// Everything the executor needs to know about one kind of record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageProfile {
    /// Profile name, used in logs.
    pub name: String,
    /// Structural schema.
    pub schema: SchemaDescriptor,
    /// Semantic invariants.
    #[serde(default)]
    pub rules: Vec<SemanticRule>,
    /// Role instructions placed at the top of every prompt.
    #[serde(default)]
    pub instructions: String,
}

impl StageProfile {
    /// Creates a profile with no rules or instructions.
    #[must_use]
    pub fn new(name: impl Into<String>, schema: SchemaDescriptor) -> Self {
        Self {
            name: name.into(),
            schema,
            rules: Vec::new(),
            instructions: String::new(),
        }
    }

    /// Adds a semantic rule.
    #[must_use]
    pub fn with_rule(mut self, rule: SemanticRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Sets the role instructions.
    #[must_use]
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    /// Checks every semantic rule against a conformed record.
    pub fn check(&self, record: &Value) -> Result<(), InvariantViolation> {
        check_all(&self.rules, record)
    }
}

/// The profiles of every stage plus the planner's decision profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageCatalog {
    /// Requirements stage.
    pub requirements: StageProfile,
    /// Design stage.
    pub design: StageProfile,
    /// Backend stage.
    pub backend: StageProfile,
    /// Frontend stage.
    pub frontend: StageProfile,
    /// Verify stage.
    pub verify: StageProfile,
    /// Planner decision.
    pub decision: StageProfile,
}

impl Default for StageCatalog {
    fn default() -> Self {
        Self::standard()
    }
}

impl StageCatalog {
    /// Returns the built-in catalog.
    #[must_use]
    pub fn standard() -> Self {
        Self {
            requirements: requirements_profile(),
            design: design_profile(),
            backend: code_profile(StageId::Backend, "main", BACKEND_INSTRUCTIONS),
            frontend: code_profile(StageId::Frontend, "index", FRONTEND_INSTRUCTIONS),
            verify: verify_profile(),
            decision: decision_profile(),
        }
    }

    /// Parses a catalog from JSON.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Loads a catalog from a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Returns the profile of a stage.
    #[must_use]
    pub const fn profile(&self, stage: StageId) -> &StageProfile {
        match stage {
            StageId::Requirements => &self.requirements,
            StageId::Design => &self.design,
            StageId::Backend => &self.backend,
            StageId::Frontend => &self.frontend,
            StageId::Verify => &self.verify,
        }
    }

    /// Returns the decision profile.
    #[must_use]
    pub const fn decision(&self) -> &StageProfile {
        &self.decision
    }

    /// Replaces the profile of a stage.
    #[must_use]
    pub fn with_profile(mut self, stage: StageId, profile: StageProfile) -> Self {
        match stage {
            StageId::Requirements => self.requirements = profile,
            StageId::Design => self.design = profile,
            StageId::Backend => self.backend = profile,
            StageId::Frontend => self.frontend = profile,
            StageId::Verify => self.verify = profile,
        }
        self
    }
}

const REQUIREMENTS_INSTRUCTIONS: &str = "You are a Product Owner. Turn the project requirements into \
user stories. Give every story an id, a short title, a description and a priority (high, medium or low).";

const DESIGN_INSTRUCTIONS: &str = "You are a Software Architect. Design the data models and REST API \
endpoints needed to implement the user stories. List the fields of every model.";

const BACKEND_INSTRUCTIONS: &str = "You are a Backend Engineer. Implement the API described by the \
system design as complete source files. Include a main entry file.";

const FRONTEND_INSTRUCTIONS: &str = "You are a Frontend Engineer. Build the user interface that calls \
the backend endpoints as complete source files. Include an index.html entry file.";

const VERIFY_INSTRUCTIONS: &str = "You are a QA Engineer. Review the produced code against the user \
stories. Report every test case as pass, fail or skip. Attribute each failing case to the responsible \
stage (requirements, design, backend or frontend) and list issues by stage.";

const DECISION_INSTRUCTIONS: &str = "You are the project manager. Decide whether another iteration is \
needed and which stages (requirements, design, backend, frontend) must redo their work to fix the \
reported issues.";

fn text(name: &str) -> FieldSpec {
    FieldSpec::required(name, FieldType::String)
}

fn text_or_empty(name: &str) -> FieldSpec {
    FieldSpec::optional(name, FieldType::String, json!(""))
}

fn list_of(name: &str, item: FieldType) -> FieldSpec {
    FieldSpec::required(name, FieldType::array(item)).with_salvage_default(json!([]))
}

fn requirements_profile() -> StageProfile {
    let schema = SchemaDescriptor::new("user_stories")
        .with_field(list_of(
            "stories",
            FieldType::object(vec![
                text("id"),
                text("title"),
                text("description"),
                FieldSpec::optional("priority", FieldType::String, json!("medium")).with_enum(
                    EnumSpec::new(["high", "medium", "low"]).with_fallback("medium"),
                ),
            ]),
        ))
        .with_field(text_or_empty("summary"))
        .with_record_pattern("stories", ["id", "title", "description"]);

    StageProfile::new(StageId::Requirements.as_str(), schema)
        .with_rule(SemanticRule::non_empty("stories"))
        .with_rule(SemanticRule::non_empty_leaves("stories", ["id", "title", "description"]))
        .with_instructions(REQUIREMENTS_INSTRUCTIONS)
}

fn design_profile() -> StageProfile {
    let method = EnumSpec::new(["GET", "POST", "PUT", "DELETE", "PATCH"]).with_fallback("GET");
    let schema = SchemaDescriptor::new("system_design")
        .with_field(list_of(
            "models",
            FieldType::object(vec![
                text("name"),
                FieldSpec::optional("fields", FieldType::array(FieldType::String), json!([])),
            ]),
        ))
        .with_field(list_of(
            "endpoints",
            FieldType::object(vec![
                FieldSpec::optional("method", FieldType::String, json!("GET")).with_enum(method),
                text("path"),
                text_or_empty("description"),
            ]),
        ))
        .with_field(text_or_empty("architecture_notes"))
        .with_record_pattern("models", ["name"])
        .with_record_pattern("endpoints", ["method", "path"]);

    StageProfile::new(StageId::Design.as_str(), schema)
        .with_rule(SemanticRule::non_empty("models"))
        .with_rule(SemanticRule::non_empty("endpoints"))
        .with_instructions(DESIGN_INSTRUCTIONS)
}

fn code_profile(stage: StageId, entry: &str, instructions: &str) -> StageProfile {
    let schema = SchemaDescriptor::new(format!("{stage}_code"))
        .with_field(list_of(
            "files",
            FieldType::object(vec![text("filename"), text("content"), text_or_empty("description")]),
        ))
        .with_field(text_or_empty("setup_instructions"))
        .with_record_pattern("files", ["filename", "content"]);

    StageProfile::new(stage.as_str(), schema)
        .with_rule(SemanticRule::non_empty("files"))
        .with_rule(SemanticRule::non_empty_leaves("files", ["filename", "content"]))
        .with_rule(SemanticRule::required_entry("files", "filename", entry))
        .with_instructions(instructions)
}

fn verify_profile() -> StageProfile {
    let overall = EnumSpec::new(["pass", "fail", "needs_review"])
        .with_alias("passed", "pass")
        .with_alias("failed", "fail")
        .with_fallback("needs_review");
    let status = EnumSpec::new(["pass", "fail", "skip"])
        .with_alias("passed", "pass")
        .with_alias("failed", "fail")
        .with_alias("skipped", "skip")
        .with_fallback("skip");

    let schema = SchemaDescriptor::new("test_report")
        .with_field(
            FieldSpec::required("overall_status", FieldType::String)
                .with_enum(overall)
                .with_salvage_default(json!("needs_review"))
                .without_text_salvage(),
        )
        .with_field(list_of(
            "test_cases",
            FieldType::object(vec![
                text("id"),
                text_or_empty("description"),
                FieldSpec::required("status", FieldType::String).with_enum(status),
                text_or_empty("notes"),
                text_or_empty("responsible_stage"),
            ]),
        ))
        .with_field(text_or_empty("summary"))
        .with_field(FieldSpec::optional(
            "recommendations",
            FieldType::array(FieldType::String),
            json!([]),
        ))
        .with_field(FieldSpec::optional(
            "issues_by_stage",
            FieldType::map(FieldType::array(FieldType::String)),
            json!({}),
        ))
        .with_record_pattern("test_cases", ["id", "status"]);

    StageProfile::new(StageId::Verify.as_str(), schema)
        .with_rule(SemanticRule::non_empty("test_cases"))
        .with_rule(SemanticRule::StatusConsistency {
            status_field: "overall_status".to_string(),
            pass_value: "pass".to_string(),
            list: "test_cases".to_string(),
            item_status_field: "status".to_string(),
            fail_value: "fail".to_string(),
        })
        .with_rule(SemanticRule::FailingChecksHaveOwner {
            list: "test_cases".to_string(),
            item_status_field: "status".to_string(),
            fail_value: "fail".to_string(),
            owner_field: "responsible_stage".to_string(),
        })
        .with_instructions(VERIFY_INSTRUCTIONS)
}

fn decision_profile() -> StageProfile {
    let schema = SchemaDescriptor::new("manager_decision")
        .with_field(FieldSpec::required("should_continue", FieldType::Boolean))
        .with_field(FieldSpec::optional(
            "stages_to_rerun",
            FieldType::array(FieldType::String),
            json!([]),
        ))
        .with_field(text_or_empty("rationale"))
        .with_field(text_or_empty("goal"));

    StageProfile::new("decision", schema).with_instructions(DECISION_INSTRUCTIONS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures;

    #[test]
    fn test_standard_profiles_accept_fixtures() {
        let catalog = StageCatalog::standard();
        for stage in StageId::ALL {
            let profile = catalog.profile(stage);
            let record = profile
                .schema
                .conform(&fixtures::valid_record(stage))
                .unwrap_or_else(|e| panic!("{stage}: {e}"));
            profile.check(&record).unwrap_or_else(|e| panic!("{stage}: {e}"));
        }
    }

    #[test]
    fn test_profile_lookup_matches_stage() {
        let catalog = StageCatalog::standard();
        for stage in StageId::ALL {
            assert_eq!(catalog.profile(stage).name, stage.as_str());
        }
        assert_eq!(catalog.decision().name, "decision");
    }

    #[test]
    fn test_backend_requires_main_file() {
        let catalog = StageCatalog::standard();
        let profile = catalog.profile(StageId::Backend);
        let record = profile
            .schema
            .conform(&json!({"files": [{"filename": "models.py", "content": "x = 1"}]}))
            .unwrap();
        let err = profile.check(&record).unwrap_err();
        assert_eq!(err.rule, "required_entry");
    }

    #[test]
    fn test_verify_normalizes_statuses() {
        let catalog = StageCatalog::standard();
        let record = catalog
            .verify
            .schema
            .conform(&json!({
                "overall_status": "PASSED",
                "test_cases": [{"id": "T1", "status": "Skipped"}]
            }))
            .unwrap();
        assert_eq!(record["overall_status"], "pass");
        assert_eq!(record["test_cases"][0]["status"], "skip");
        assert_eq!(record["issues_by_stage"], json!({}));
    }

    #[test]
    fn test_catalog_round_trips_through_json() {
        let catalog = StageCatalog::standard();
        let text = serde_json::to_string(&catalog).unwrap();
        let back = StageCatalog::from_json_str(&text).unwrap();
        assert_eq!(back, catalog);
    }

    #[test]
    fn test_with_profile_replaces_stage() {
        let custom = StageProfile::new("lean_design", SchemaDescriptor::new("free"));
        let catalog = StageCatalog::standard().with_profile(StageId::Design, custom);
        assert_eq!(catalog.profile(StageId::Design).name, "lean_design");
    }
}
