//! Locating a document inside surrounding prose.

use super::scan::{closer_for, first_openers, matching_close};
use regex::Regex;
use std::sync::LazyLock;

static FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"```[ \t]*([A-Za-z0-9_+-]*)[ \t]*\r?\n?([\s\S]*?)```").expect("static pattern")
});

static INLINE_SPAN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`([^`\n]+)`").expect("static pattern"));

/// Returns candidate document texts in priority order, without duplicates.
///
/// Order: `json`-tagged fenced blocks, other fenced blocks, inline spans that
/// look like documents, the matched spans of the first `{` and the first `[`,
/// then each of those openers through the last closer of its kind.
pub(crate) fn candidates(text: &str) -> Vec<&str> {
    let mut out = delimited(text);
    for start in first_openers(text) {
        let closer = char::from(closer_for(text.as_bytes()[start]));
        if let Some(last) = text.rfind(closer) {
            if last > start {
                push_unique(&mut out, &text[start..=last]);
            }
        }
    }
    out
}

/// Returns the candidates whose delimiters are known to belong together.
///
/// The first-opener-to-last-closer span is left out: it may end on an inner
/// closer of a cut-off document, and closing it would silently drop records.
pub(crate) fn delimited(text: &str) -> Vec<&str> {
    let mut tagged = Vec::new();
    let mut untagged = Vec::new();
    for caps in FENCED_BLOCK.captures_iter(text) {
        let Some(body) = caps.get(2).map(|m| m.as_str().trim()) else {
            continue;
        };
        if body.is_empty() {
            continue;
        }
        let lang = caps.get(1).map_or("", |m| m.as_str());
        if lang.eq_ignore_ascii_case("json") {
            tagged.push(body);
        } else {
            untagged.push(body);
        }
    }

    let mut out: Vec<&str> = Vec::new();
    for body in tagged.into_iter().chain(untagged) {
        push_unique(&mut out, body);
    }

    for caps in INLINE_SPAN.captures_iter(text) {
        if let Some(span) = caps.get(1).map(|m| m.as_str().trim()) {
            if span.starts_with('{') || span.starts_with('[') {
                push_unique(&mut out, span);
            }
        }
    }

    for start in first_openers(text) {
        if let Some(end) = matching_close(text, start) {
            push_unique(&mut out, &text[start..=end]);
        }
    }
    out
}

fn push_unique<'a>(out: &mut Vec<&'a str>, candidate: &'a str) {
    if !candidate.is_empty() && !out.contains(&candidate) {
        out.push(candidate);
    }
}

/// Returns the text from the first `{` and from the first `[` to the end, for
/// truncated documents.
pub(crate) fn open_tails(text: &str) -> Vec<&str> {
    first_openers(text)
        .into_iter()
        .map(|start| text[start..].trim_end())
        .collect()
}
