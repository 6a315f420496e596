//! Prompt assembly.

use crate::planner::QaReport;
use crate::schema::StageProfile;

/// Prefix of the first prompt line; the profile name follows it.
pub const TASK_HEADER: &str = "# Task: ";

/// Separates the instructions from the stage context.
pub const CONTEXT_HEADING: &str = "--- CONTEXT ---";

/// Assembles a full prompt for `profile` around a rendered context.
#[must_use]
pub fn assemble_prompt(profile: &StageProfile, context: &str) -> String {
    let skeleton = serde_json::to_string_pretty(&profile.schema.skeleton()).unwrap_or_default();
    format!(
        "{TASK_HEADER}{name}\n\n{instructions}\n\nRespond with a single JSON document shaped like:\n{skeleton}\n\n{CONTEXT_HEADING}\n{context}",
        name = profile.name,
        instructions = profile.instructions,
    )
}

/// Renders the context of the decision prompt.
#[must_use]
pub fn decision_context(requirement: &str, report: &QaReport, iteration: u32, cap: u32) -> String {
    format!(
        "Iteration: {iteration}/{cap}\n\n## Project Requirements\n{requirement}\n\n## QA Report\n{}",
        report.render().trim_end()
    )
}
