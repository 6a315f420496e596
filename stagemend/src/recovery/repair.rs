//! Syntactic and truncation repair of near-JSON text.

use super::scan::{analyze, closer_for, string_end};

/// Applies local syntax fixes outside string literals.
///
/// Strips control characters, escapes raw newlines and tabs inside strings,
/// quotes bare keys, converts unambiguous single-quoted keys, removes
/// trailing commas, and maps `True`/`False`/`None` to JSON literals.
pub(crate) fn syntactic_repair(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len() + 16);
    let mut in_string = false;
    let mut escape_next = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if in_string {
            match c {
                _ if escape_next => {
                    escape_next = false;
                    out.push(c);
                }
                '\\' => {
                    escape_next = true;
                    out.push(c);
                }
                '"' => {
                    in_string = false;
                    out.push(c);
                }
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                _ if c.is_control() => {}
                _ => out.push(c),
            }
            i += 1;
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
                i += 1;
            }
            ',' => {
                if !matches!(next_significant(&chars, i + 1), Some('}' | ']')) {
                    out.push(',');
                }
                i += 1;
            }
            '\'' => match single_quoted_key(&chars, i, &out) {
                Some((key, end)) => {
                    out.push('"');
                    out.push_str(&key);
                    out.push('"');
                    i = end;
                }
                None => {
                    out.push(c);
                    i += 1;
                }
            },
            _ if c.is_control() && !matches!(c, '\n' | '\r' | '\t') => i += 1,
            _ if c.is_ascii_alphabetic() || c == '_' || c == '$' => {
                let end = ident_end(&chars, i);
                let word: String = chars[i..end].iter().collect();
                let is_key = matches!(last_significant(&out), Some('{' | ','))
                    && next_significant(&chars, end) == Some(':');
                if is_key {
                    out.push('"');
                    out.push_str(&word);
                    out.push('"');
                } else {
                    out.push_str(match word.as_str() {
                        "True" => "true",
                        "False" => "false",
                        "None" => "null",
                        _ => &word,
                    });
                }
                i = end;
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }
    out
}

/// A document closed by [`close_truncated`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Closed {
    /// The balanced text.
    pub text: String,
    /// Offset of the opening quote of a string the repair had to terminate,
    /// when that string survives in `text`.
    pub cut_string: Option<usize>,
}

impl Closed {
    /// Returns the decoded content of the terminated string.
    pub(crate) fn cut_fragment(&self) -> Option<String> {
        let start = self.cut_string?;
        let end = string_end(&self.text, start)?;
        serde_json::from_str(&self.text[start..end]).ok()
    }
}

/// Closes a document cut off mid-stream.
///
/// Closes an unterminated string (dropping a dangling backslash), removes a
/// dangling comma, key or partial scalar, then appends closers for every
/// still-open delimiter in reverse order. Returns `None` when there is
/// nothing to close.
pub(crate) fn close_truncated(text: &str) -> Option<Closed> {
    let mut out = text.trim_end().to_string();
    if out.is_empty() {
        return None;
    }

    let initial = analyze(&out);
    let mut cut_string = None;
    if initial.in_string {
        if initial.dangling_escape {
            out.pop();
        }
        out.push('"');
        cut_string = trailing_string_start(&out);
    }

    loop {
        out.truncate(out.trim_end().len());
        if out.ends_with(',') {
            out.pop();
            continue;
        }
        if out.ends_with(':') {
            out.pop();
            out.truncate(out.trim_end().len());
            drop_trailing_string(&mut out);
            continue;
        }
        let in_object = analyze(&out).open_stack.last() == Some(&b'{');
        if in_object && ends_with_dangling_key(&out) {
            drop_trailing_string(&mut out);
            continue;
        }
        if let Some(start) = trailing_partial_scalar(&out) {
            out.truncate(start);
            continue;
        }
        break;
    }

    let structure = analyze(&out);
    if structure.open_stack.is_empty() && !initial.in_string && out == text.trim_end() {
        return None;
    }
    let cut_string = cut_string.filter(|&start| start < out.len());
    for &open in structure.open_stack.iter().rev() {
        out.push(char::from(closer_for(open)));
    }
    Some(Closed { text: out, cut_string })
}

fn next_significant(chars: &[char], from: usize) -> Option<char> {
    chars[from.min(chars.len())..]
        .iter()
        .copied()
        .find(|c| !c.is_whitespace())
}

fn last_significant(out: &str) -> Option<char> {
    out.chars().rev().find(|c| !c.is_whitespace())
}

fn ident_end(chars: &[char], start: usize) -> usize {
    chars[start..]
        .iter()
        .position(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '$' | '-')))
        .map_or(chars.len(), |len| start + len)
}

fn single_quoted_key(chars: &[char], start: usize, out: &str) -> Option<(String, usize)> {
    if !matches!(last_significant(out), Some('{' | ',')) {
        return None;
    }
    let len = chars[start + 1..]
        .iter()
        .position(|&c| c == '\'' || c == '"' || c == '\\' || c == '\n')?;
    let close = start + 1 + len;
    if len == 0 || chars[close] != '\'' || next_significant(chars, close + 1) != Some(':') {
        return None;
    }
    Some((chars[start + 1..close].iter().collect(), close + 1))
}

/// Returns the offset of the opening quote of the string `out` ends with.
fn trailing_string_start(out: &str) -> Option<usize> {
    let bytes = out.as_bytes();
    if bytes.last() != Some(&b'"') || bytes.len() < 2 {
        return None;
    }
    let mut i = bytes.len() - 1;
    while i > 0 {
        i -= 1;
        if bytes[i] == b'"' {
            let backslashes = bytes[..i].iter().rev().take_while(|&&b| b == b'\\').count();
            if backslashes % 2 == 0 {
                return Some(i);
            }
        }
    }
    None
}

fn drop_trailing_string(out: &mut String) {
    if let Some(start) = trailing_string_start(out) {
        out.truncate(start);
    }
}

fn ends_with_dangling_key(out: &str) -> bool {
    trailing_string_start(out)
        .is_some_and(|start| matches!(last_significant(&out[..start]), Some('{' | ',')))
}

fn trailing_partial_scalar(out: &str) -> Option<usize> {
    let len = out
        .bytes()
        .rev()
        .take_while(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'-' | b'+'))
        .count();
    if len == 0 {
        return None;
    }
    let start = out.len() - len;
    let token = &out[start..];
    let complete = matches!(token, "true" | "false" | "null")
        || serde_json::from_str::<serde_json::Number>(token).is_ok();
    (!complete).then_some(start)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn parse(text: &str) -> Value {
        serde_json::from_str(text).unwrap_or_else(|e| panic!("{text}: {e}"))
    }

    #[test]
    fn test_removes_trailing_commas() {
        let fixed = syntactic_repair(r#"{"a": [1, 2, ], "b": "x,}",}"#);
        assert_eq!(parse(&fixed), json!({"a": [1, 2], "b": "x,}"}));
    }

    #[test]
    fn test_quotes_bare_and_single_quoted_keys() {
        let fixed = syntactic_repair(r#"{name: "api", 'version': 2, nested: {ok: True}}"#);
        assert_eq!(parse(&fixed), json!({"name": "api", "version": 2, "nested": {"ok": true}}));
    }

    #[test]
    fn test_escapes_raw_newlines_in_strings() {
        let fixed = syntactic_repair("{\"content\": \"line one\nline two\"}");
        assert_eq!(parse(&fixed)["content"], "line one\nline two");
    }

    #[test]
    fn test_strips_control_characters() {
        let fixed = syntactic_repair("{\u{0}\"a\": \"b\u{7}\"}");
        assert_eq!(parse(&fixed), json!({"a": "b"}));
    }

    #[test]
    fn test_leaves_string_content_alone() {
        let text = r#"{"note": "keys like {a: 1,} stay"}"#;
        assert_eq!(syntactic_repair(text), text);
    }

    #[test]
    fn test_close_unterminated_string_and_delimiters() {
        let closed = close_truncated(r#"{"files": [{"filename": "main.py", "content": "print("#).unwrap();
        assert_eq!(
            parse(&closed.text),
            json!({"files": [{"filename": "main.py", "content": "print("}]})
        );
        assert_eq!(closed.cut_fragment().as_deref(), Some("print("));
    }

    #[test]
    fn test_close_drops_dangling_escape() {
        let closed = close_truncated(r#"{"a": "x\"#).unwrap();
        assert_eq!(parse(&closed.text), json!({"a": "x"}));
        assert_eq!(closed.cut_fragment().as_deref(), Some("x"));
    }

    #[test]
    fn test_close_drops_dangling_key_and_comma() {
        let dangling_key = close_truncated(r#"{"a": 1, "b"#).unwrap();
        assert_eq!(parse(&dangling_key.text), json!({"a": 1}));
        assert_eq!(dangling_key.cut_string, None);
        assert_eq!(parse(&close_truncated(r#"{"a": 1, "b":"#).unwrap().text), json!({"a": 1}));
        assert_eq!(parse(&close_truncated(r#"{"a": [1, 2,"#).unwrap().text), json!({"a": [1, 2]}));
    }

    #[test]
    fn test_close_drops_partial_literal() {
        assert_eq!(parse(&close_truncated(r#"{"a": 1, "b": tr"#).unwrap().text), json!({"a": 1}));
        assert_eq!(parse(&close_truncated(r#"{"a": 12"#).unwrap().text), json!({"a": 12}));
    }

    #[test]
    fn test_close_counts_arrays_and_objects_separately() {
        let closed = close_truncated(r#"[{"a": [[1], [2"#).unwrap();
        assert!(closed.text.ends_with("]]}]"));
        assert_eq!(parse(&closed.text), json!([{"a": [[1], [2]]}]));
    }

    #[test]
    fn test_close_complete_document_is_none() {
        assert_eq!(close_truncated(r#"{"a": 1}"#), None);
        assert_eq!(close_truncated("   "), None);
    }
}
