//! Bounded per-stage context rendering.
//!
//! Context for a stage is rebuilt from the current [`PipelineContext`] every
//! time it runs. It contains the requirement, a summary of each declared
//! upstream stage and, on a rerun, the stage's own previous output and the
//! QA feedback attributed to it. Nothing from earlier iterations is carried.

use super::PipelineContext;
use crate::core::StageId;
use crate::planner::StageGraph;
use serde_json::Value;
use std::fmt::Write as _;

/// Default per-section character budget.
pub const DEFAULT_CONTEXT_BUDGET: usize = 6_000;

const TRUNCATION_MARKER: &str = "\n[... truncated]";

/// Route decorator prefixes recognised in backend code.
const ROUTE_PREFIXES: [&str; 2] = ["@app.", "@router."];

/// QA feedback passed to a stage selected for rerun.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RerunFeedback {
    /// Goal of the current iteration.
    pub goal: String,
    /// Issues attributed to the stage, if any.
    pub issues: Option<String>,
}

impl RerunFeedback {
    /// Creates feedback for a rerun.
    #[must_use]
    pub fn new(goal: impl Into<String>, issues: Option<String>) -> Self {
        Self {
            goal: goal.into(),
            issues,
        }
    }
}

/// Renders the context section of a stage prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextBuilder {
    budget_chars: usize,
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_CONTEXT_BUDGET)
    }
}

impl ContextBuilder {
    /// Creates a builder that truncates each section to `budget_chars`.
    #[must_use]
    pub fn new(budget_chars: usize) -> Self {
        Self { budget_chars }
    }

    /// Returns the per-section budget.
    #[must_use]
    pub fn budget_chars(&self) -> usize {
        self.budget_chars
    }

    /// Builds the context for `stage`.
    ///
    /// Upstream stages without a successful result render as unavailable.
    #[must_use]
    pub fn build(
        &self,
        stage: StageId,
        graph: &StageGraph,
        ctx: &PipelineContext,
        rerun: Option<&RerunFeedback>,
    ) -> String {
        let mut sections = vec![self.section("Project Requirements", ctx.requirement())];

        let upstream = graph.upstream(stage);
        for dep in graph.execution_order().iter().filter(|s| upstream.contains(*s)) {
            let body = ctx.output(*dep).map_or_else(
                || format!("No {} available.", dep.title()),
                |data| summarize(*dep, data, stage.is_verify()),
            );
            sections.push(self.section(dep.title(), &body));
        }

        if let Some(feedback) = rerun {
            if let Some(previous) = ctx.output(stage) {
                sections.push(self.section("Your Previous Output", &summarize(stage, previous, false)));
            }

            let mut body = String::new();
            if !feedback.goal.is_empty() {
                let _ = writeln!(body, "Goal: {}", feedback.goal);
            }
            match &feedback.issues {
                Some(issues) => body.push_str(issues),
                None => body.push_str("No issues were attributed to this stage directly."),
            }
            sections.push(self.section("QA Feedback", &body));
        }

        sections.join("\n\n")
    }

    fn section(&self, title: &str, body: &str) -> String {
        format!("## {title}\n{}", truncate(body.trim_end(), self.budget_chars))
    }
}

/// Truncates `text` to at most `budget` characters on a char boundary.
fn truncate(text: &str, budget: usize) -> String {
    match text.char_indices().nth(budget) {
        Some((cut, _)) => format!("{}{TRUNCATION_MARKER}", &text[..cut]),
        None => text.to_string(),
    }
}

fn summarize(stage: StageId, data: &Value, full_code: bool) -> String {
    match stage {
        StageId::Requirements => summarize_stories(data),
        StageId::Design => summarize_design(data),
        StageId::Backend | StageId::Frontend if full_code => render_files(data),
        StageId::Backend => summarize_backend(data),
        StageId::Frontend => summarize_files(data),
        StageId::Verify => serde_json::to_string_pretty(data).unwrap_or_default(),
    }
}

fn str_of<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or_default()
}

fn items<'a>(value: &'a Value, key: &str) -> &'a [Value] {
    value.get(key).and_then(Value::as_array).map_or(&[], Vec::as_slice)
}

fn summarize_stories(data: &Value) -> String {
    let mut out = String::new();
    for story in items(data, "stories") {
        let _ = writeln!(
            out,
            "- [{}] ({}) {}: {}",
            str_of(story, "id"),
            str_of(story, "priority"),
            str_of(story, "title"),
            str_of(story, "description")
        );
    }
    out
}

fn summarize_design(data: &Value) -> String {
    let mut out = String::from("Models:\n");
    for model in items(data, "models") {
        let fields: Vec<&str> = items(model, "fields").iter().filter_map(Value::as_str).collect();
        let _ = writeln!(out, "- {}: {}", str_of(model, "name"), fields.join(", "));
    }

    out.push_str("Endpoints:\n");
    for endpoint in items(data, "endpoints") {
        let _ = write!(out, "- {} {}", str_of(endpoint, "method"), str_of(endpoint, "path"));
        match str_of(endpoint, "description") {
            "" => out.push('\n'),
            description => {
                let _ = writeln!(out, ": {description}");
            }
        }
    }

    let notes = str_of(data, "architecture_notes");
    if !notes.is_empty() {
        let _ = writeln!(out, "Notes: {notes}");
    }
    out
}

fn summarize_files(data: &Value) -> String {
    let mut out = String::from("Files:\n");
    for file in items(data, "files") {
        match str_of(file, "description") {
            "" => {
                let _ = writeln!(out, "- {}", str_of(file, "filename"));
            }
            description => {
                let _ = writeln!(out, "- {}: {description}", str_of(file, "filename"));
            }
        }
    }
    out
}

/// Lists route decorator lines, falling back to the file list.
fn summarize_backend(data: &Value) -> String {
    let routes: Vec<&str> = items(data, "files")
        .iter()
        .flat_map(|file| str_of(file, "content").lines())
        .map(str::trim)
        .filter(|line| ROUTE_PREFIXES.iter().any(|prefix| line.starts_with(prefix)))
        .collect();

    if routes.is_empty() {
        return summarize_files(data);
    }
    let mut out = String::from("Implemented endpoints:\n");
    for route in routes {
        let _ = writeln!(out, "{route}");
    }
    out.push_str(&summarize_files(data));
    out
}

fn render_files(data: &Value) -> String {
    let mut out = String::new();
    for file in items(data, "files") {
        let _ = writeln!(
            out,
            "### {}\n```\n{}\n```",
            str_of(file, "filename"),
            str_of(file, "content").trim_end()
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures;

    fn context_with(stages: &[StageId]) -> PipelineContext {
        let mut ctx = PipelineContext::new("Build a todo app");
        for stage in stages {
            ctx.record(*stage, fixtures::valid_record(*stage));
        }
        ctx
    }

    #[test]
    fn test_design_sees_only_requirements() {
        let ctx = context_with(&[StageId::Requirements, StageId::Backend]);
        let text = ContextBuilder::default().build(StageId::Design, &StageGraph::standard(), &ctx, None);

        assert!(text.starts_with("## Project Requirements\nBuild a todo app"));
        assert!(text.contains("## User Stories\n- [US-1] (high) Create todo"));
        assert!(!text.contains("Backend Code"));
        assert!(!text.contains("QA Feedback"));
    }

    #[test]
    fn test_missing_upstream_is_unavailable() {
        let ctx = context_with(&[StageId::Requirements]);
        let text = ContextBuilder::default().build(StageId::Backend, &StageGraph::standard(), &ctx, None);
        assert!(text.contains("## System Design\nNo System Design available."));
    }

    #[test]
    fn test_frontend_gets_backend_routes() {
        let ctx = context_with(&[StageId::Requirements, StageId::Design, StageId::Backend]);
        let text = ContextBuilder::default().build(StageId::Frontend, &StageGraph::standard(), &ctx, None);

        assert!(text.contains("Implemented endpoints:\n@app.get(\"/todos\")\n@app.post(\"/todos\")"));
        assert!(text.contains("- main.py: API entry point"));
        assert!(!text.contains("def list_todos"));
    }

    #[test]
    fn test_verify_gets_full_code() {
        let ctx = context_with(&[
            StageId::Requirements,
            StageId::Design,
            StageId::Backend,
            StageId::Frontend,
        ]);
        let text = ContextBuilder::default().build(StageId::Verify, &StageGraph::standard(), &ctx, None);

        assert!(text.contains("### main.py\n```\nfrom fastapi import FastAPI"));
        assert!(text.contains("def list_todos"));
        assert!(text.contains("### index.html"));
        assert!(text.contains("- GET /todos: List todos"));
    }

    #[test]
    fn test_rerun_includes_previous_output_and_feedback() {
        let ctx = context_with(&[StageId::Requirements, StageId::Design]);
        let feedback = RerunFeedback::new("Fix identified issues", Some("- missing DELETE endpoint".to_string()));
        let text = ContextBuilder::default().build(StageId::Design, &StageGraph::standard(), &ctx, Some(&feedback));

        assert!(text.contains("## Your Previous Output\nModels:\n- Todo: id, title, done"));
        assert!(text.contains("## QA Feedback\nGoal: Fix identified issues\n- missing DELETE endpoint"));
    }

    #[test]
    fn test_sections_are_truncated() {
        let ctx = PipelineContext::new("x".repeat(50));
        let text = ContextBuilder::new(10).build(StageId::Requirements, &StageGraph::standard(), &ctx, None);
        assert_eq!(text, format!("## Project Requirements\n{}{TRUNCATION_MARKER}", "x".repeat(10)));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), format!("hé{TRUNCATION_MARKER}"));
        assert_eq!(truncate("hi", 2), "hi");
    }
}
