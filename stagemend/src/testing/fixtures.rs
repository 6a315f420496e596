//! Canned stage records for tests.
//!
//! Every record here conforms to the standard catalog and satisfies its
//! semantic rules unless the helper name says otherwise.

use crate::core::StageId;
use serde_json::{json, Value};

/// Returns a valid record for `stage`.
#[must_use]
pub fn valid_record(stage: StageId) -> Value {
    match stage {
        StageId::Requirements => json!({
            "stories": [
                {"id": "US-1", "title": "Create todo", "description": "As a user I can add a todo", "priority": "high"},
                {"id": "US-2", "title": "List todos", "description": "As a user I can see my todos", "priority": "medium"}
            ],
            "summary": "A minimal todo list"
        }),
        StageId::Design => json!({
            "models": [{"name": "Todo", "fields": ["id", "title", "done"]}],
            "endpoints": [
                {"method": "GET", "path": "/todos", "description": "List todos"},
                {"method": "POST", "path": "/todos", "description": "Create a todo"}
            ],
            "architecture_notes": "FastAPI backend with an in-memory store"
        }),
        StageId::Backend => json!({
            "files": [
                {
                    "filename": "main.py",
                    "content": "from fastapi import FastAPI\napp = FastAPI()\n\n@app.get(\"/todos\")\ndef list_todos():\n    return []\n\n@app.post(\"/todos\")\ndef create_todo(todo: dict):\n    return todo\n",
                    "description": "API entry point"
                }
            ],
            "setup_instructions": "pip install fastapi uvicorn"
        }),
        StageId::Frontend => json!({
            "files": [
                {
                    "filename": "index.html",
                    "content": "<!doctype html>\n<html><body><ul id=\"todos\"></ul><script src=\"app.js\"></script></body></html>\n",
                    "description": "Page shell"
                },
                {
                    "filename": "app.js",
                    "content": "fetch('/todos').then(r => r.json()).then(render);\n",
                    "description": "Client logic"
                }
            ],
            "setup_instructions": "Open index.html"
        }),
        StageId::Verify => passing_report(),
    }
}

/// Returns [`valid_record`] serialized as compact JSON.
#[must_use]
pub fn valid_text(stage: StageId) -> String {
    valid_record(stage).to_string()
}

/// Returns a QA report where every check passes.
#[must_use]
pub fn passing_report() -> Value {
    json!({
        "overall_status": "pass",
        "test_cases": [
            {"id": "TC-1", "description": "Todos can be created", "status": "pass", "notes": "", "responsible_stage": ""},
            {"id": "TC-2", "description": "Todos are listed", "status": "pass", "notes": "", "responsible_stage": ""}
        ],
        "summary": "All checks pass",
        "recommendations": [],
        "issues_by_stage": {}
    })
}

/// Returns a failing QA report with one failing check per listed owner.
#[must_use]
pub fn failing_report(owners: &[StageId]) -> Value {
    let mut cases = vec![json!({
        "id": "TC-0",
        "description": "Page loads",
        "status": "pass",
        "notes": "",
        "responsible_stage": ""
    })];
    let mut issues = serde_json::Map::new();

    for (i, owner) in owners.iter().enumerate() {
        let note = format!("{} output is incomplete", owner.title());
        cases.push(json!({
            "id": format!("TC-{}", i + 1),
            "description": format!("{} check", owner.title()),
            "status": "fail",
            "notes": note,
            "responsible_stage": owner.as_str()
        }));
        issues.insert(owner.as_str().to_string(), json!([note]));
    }

    json!({
        "overall_status": "fail",
        "test_cases": cases,
        "summary": format!("{} checks failed", owners.len()),
        "recommendations": ["Fix the failing checks"],
        "issues_by_stage": issues
    })
}

/// Returns a decision record as the decision task would answer it.
#[must_use]
pub fn decision_record(should_continue: bool, stages: &[&str]) -> Value {
    json!({
        "should_continue": should_continue,
        "stages_to_rerun": stages,
        "rationale": "Scripted decision",
        "goal": "Fix the failing checks"
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failing_report_lists_owners() {
        let report = failing_report(&[StageId::Backend, StageId::Frontend]);
        let cases = report["test_cases"].as_array().unwrap();
        assert_eq!(cases.len(), 3);
        assert_eq!(cases[1]["responsible_stage"], "backend");
        assert_eq!(report["issues_by_stage"]["frontend"][0], "Frontend Code output is incomplete");
    }

    #[test]
    fn test_valid_text_is_compact_json() {
        let text = valid_text(StageId::Design);
        assert!(!text.contains('\n'));
        let back: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(back, valid_record(StageId::Design));
    }
}
