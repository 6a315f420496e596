//! Typed view over a conformed test report.

use crate::core::StageId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

/// Status value of a passing report or check.
pub const PASS_STATUS: &str = "pass";

/// Status value of a failing check.
pub const FAIL_STATUS: &str = "fail";

/// One check in a QA report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    /// Check identifier.
    #[serde(default)]
    pub id: String,
    /// What was checked.
    #[serde(default)]
    pub description: String,
    /// `pass`, `fail` or `skip`.
    #[serde(default)]
    pub status: String,
    /// Reviewer notes.
    #[serde(default)]
    pub notes: String,
    /// Stage the failure is attributed to.
    #[serde(default)]
    pub responsible_stage: String,
}

impl CheckResult {
    /// Returns true if the check failed.
    #[must_use]
    pub fn is_failing(&self) -> bool {
        self.status == FAIL_STATUS
    }

    /// Returns the owning stage, if it names a non-verify stage.
    #[must_use]
    pub fn owner(&self) -> Option<StageId> {
        self.responsible_stage
            .parse::<StageId>()
            .ok()
            .filter(|stage| !stage.is_verify())
    }
}

/// The verify stage's report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QaReport {
    /// `pass`, `fail` or `needs_review`.
    #[serde(default)]
    pub overall_status: String,
    /// Individual checks.
    #[serde(default)]
    pub test_cases: Vec<CheckResult>,
    /// Free-text summary.
    #[serde(default)]
    pub summary: String,
    /// Suggested follow-ups.
    #[serde(default)]
    pub recommendations: Vec<String>,
    /// Issue notes keyed by stage name.
    #[serde(default)]
    pub issues_by_stage: BTreeMap<String, Vec<String>>,
}

impl QaReport {
    /// Reads a report out of a conformed verify record.
    pub fn from_value(record: &Value) -> Result<Self, serde_json::Error> {
        Self::deserialize(record)
    }

    /// Returns the failing checks.
    pub fn failing_checks(&self) -> impl Iterator<Item = &CheckResult> {
        self.test_cases.iter().filter(|c| c.is_failing())
    }

    /// Returns the number of failing checks.
    #[must_use]
    pub fn failing_count(&self) -> usize {
        self.failing_checks().count()
    }

    /// Returns true if the report passes with no failing checks.
    #[must_use]
    pub fn all_checks_pass(&self) -> bool {
        self.overall_status == PASS_STATUS && self.failing_count() == 0
    }

    /// Returns the stages owning at least one failing check.
    #[must_use]
    pub fn failing_owners(&self) -> BTreeSet<StageId> {
        self.failing_checks().filter_map(CheckResult::owner).collect()
    }

    /// Returns the issues attributed to `stage`, if any.
    ///
    /// Combines the `issues_by_stage` entry with the failing checks the
    /// stage owns.
    #[must_use]
    pub fn feedback_for(&self, stage: StageId) -> Option<String> {
        let mut lines: Vec<String> = self
            .issues_by_stage
            .iter()
            .filter(|(key, _)| key.parse::<StageId>().is_ok_and(|s| s == stage))
            .flat_map(|(_, issues)| issues.iter().cloned())
            .collect();

        for check in self.failing_checks().filter(|c| c.owner() == Some(stage)) {
            let line = if check.notes.is_empty() {
                format!("{}: {}", check.id, check.description)
            } else {
                format!("{}: {} ({})", check.id, check.description, check.notes)
            };
            lines.push(line);
        }

        if lines.is_empty() {
            return None;
        }
        Some(lines.iter().map(|l| format!("- {l}")).collect::<Vec<_>>().join("\n"))
    }

    /// Renders the report for the decision prompt.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Overall status: {}", self.overall_status);
        if !self.summary.is_empty() {
            let _ = writeln!(out, "Summary: {}", self.summary);
        }

        let _ = writeln!(out, "Failing checks ({}):", self.failing_count());
        for check in self.failing_checks() {
            let owner = if check.responsible_stage.is_empty() {
                "unassigned"
            } else {
                check.responsible_stage.as_str()
            };
            let _ = writeln!(out, "- {} [{owner}] {} {}", check.id, check.description, check.notes);
        }

        if !self.issues_by_stage.is_empty() {
            let _ = writeln!(out, "Issues by stage:");
            for (stage, issues) in &self.issues_by_stage {
                for issue in issues {
                    let _ = writeln!(out, "- {stage}: {issue}");
                }
            }
        }

        if !self.recommendations.is_empty() {
            let _ = writeln!(out, "Recommendations:");
            for rec in &self.recommendations {
                let _ = writeln!(out, "- {rec}");
            }
        }
        out
    }

    /// Returns a stable hex digest of the report content.
    #[must_use]
    pub fn digest(&self) -> String {
        let canonical = serde_json::to_string(self).unwrap_or_default();
        hex::encode(Sha256::digest(canonical.as_bytes()))
    }
}
