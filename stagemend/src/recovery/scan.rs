//! String-aware scanning helpers shared by the ladder rungs.
//!
//! All positions are byte offsets. Only ASCII delimiters are inspected, so
//! every returned offset is a char boundary.

/// Result of scanning a document prefix.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) struct Structure {
    /// Openers still waiting for a closer, outermost first.
    pub open_stack: Vec<u8>,
    /// Whether the scan ended inside a string literal.
    pub in_string: bool,
    /// Whether the scan ended right after a backslash inside a string.
    pub dangling_escape: bool,
}

/// Scans `s` tracking quote parity and delimiter nesting.
///
/// Mismatched closers are ignored rather than popping the wrong opener.
pub(crate) fn analyze(s: &str) -> Structure {
    let mut out = Structure::default();
    let mut escape_next = false;

    for &b in s.as_bytes() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match b {
            b'\\' if out.in_string => escape_next = true,
            b'"' => out.in_string = !out.in_string,
            b'{' | b'[' if !out.in_string => out.open_stack.push(b),
            b'}' | b']' if !out.in_string => {
                if out.open_stack.last() == Some(&opener_for(b)) {
                    out.open_stack.pop();
                }
            }
            _ => {}
        }
    }
    out.dangling_escape = escape_next;
    out
}

/// Returns the closer for an opener.
pub(crate) const fn closer_for(open: u8) -> u8 {
    if open == b'{' {
        b'}'
    } else {
        b']'
    }
}

const fn opener_for(close: u8) -> u8 {
    if close == b'}' {
        b'{'
    } else {
        b'['
    }
}

/// Returns the offset of the first `{` or `[`.
pub(crate) fn first_opener(s: &str) -> Option<usize> {
    s.bytes().position(|b| b == b'{' || b == b'[')
}

/// Returns the offsets of the first `{` and the first `[`, in text order.
pub(crate) fn first_openers(s: &str) -> Vec<usize> {
    let mut out: Vec<usize> = [s.find('{'), s.find('[')].into_iter().flatten().collect();
    out.sort_unstable();
    out
}

/// Returns the offset of the closer matching the opener at `open`.
///
/// The opener must sit outside any string literal.
pub(crate) fn matching_close(s: &str, open: usize) -> Option<usize> {
    let bytes = s.as_bytes();
    if !matches!(bytes.get(open), Some(b'{' | b'[')) {
        return None;
    }

    let mut stack: Vec<u8> = Vec::new();
    let mut in_string = false;
    let mut escape_next = false;

    for (i, &b) in bytes.iter().enumerate().skip(open) {
        if escape_next {
            escape_next = false;
            continue;
        }
        match b {
            b'\\' if in_string => escape_next = true,
            b'"' => in_string = !in_string,
            b'{' | b'[' if !in_string => stack.push(b),
            b'}' | b']' if !in_string => {
                if stack.last() != Some(&opener_for(b)) {
                    return None;
                }
                stack.pop();
                if stack.is_empty() {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Returns the offset one past the closing quote of the string starting at `open`.
pub(crate) fn string_end(s: &str, open: usize) -> Option<usize> {
    let bytes = s.as_bytes();
    if bytes.get(open) != Some(&b'"') {
        return None;
    }
    let mut escape_next = false;
    for (i, &b) in bytes.iter().enumerate().skip(open + 1) {
        if escape_next {
            escape_next = false;
        } else if b == b'\\' {
            escape_next = true;
        } else if b == b'"' {
            return Some(i + 1);
        }
    }
    None
}

/// Returns the offset where the value of every `"key":` occurrence begins.
pub(crate) fn key_value_starts(s: &str, key: &str) -> Vec<usize> {
    let needle = format!("\"{key}\"");
    let bytes = s.as_bytes();
    let mut out = Vec::new();
    let mut from = 0;

    while let Some(found) = s[from..].find(&needle) {
        let mut i = from + found + needle.len();
        from = i;
        while bytes.get(i).is_some_and(u8::is_ascii_whitespace) {
            i += 1;
        }
        if bytes.get(i) != Some(&b':') {
            continue;
        }
        i += 1;
        while bytes.get(i).is_some_and(u8::is_ascii_whitespace) {
            i += 1;
        }
        if i < bytes.len() {
            out.push(i);
        }
    }
    out
}

/// Returns the complete JSON value text starting at `start`, if it is complete.
pub(crate) fn value_span(s: &str, start: usize) -> Option<&str> {
    let bytes = s.as_bytes();
    match bytes.get(start)? {
        b'"' => string_end(s, start).map(|end| &s[start..end]),
        b'{' | b'[' => matching_close(s, start).map(|end| &s[start..=end]),
        _ => {
            let len = bytes[start..]
                .iter()
                .take_while(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'-' | b'+'))
                .count();
            let end = start + len;
            // A scalar running into the end of the text may itself be cut off.
            (len > 0 && end < bytes.len()).then(|| &s[start..end])
        }
    }
}
