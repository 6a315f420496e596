//! Schema-specific salvage of complete records from damaged text.

use super::repair::syntactic_repair;
use super::scan::{first_opener, key_value_starts, matching_close, value_span};
use crate::schema::{conform_value, FieldSpec, FieldType, RecordPattern, SchemaDescriptor};
use serde_json::{Map, Value};

/// Assembles a minimal valid envelope around the complete records found in `text`.
///
/// Only records whose delimiters balance and that carry every required leaf
/// are kept. Scanning a list stops at the first partial record. Root fields
/// outside the lists come from complete values in the text, then from
/// `salvage_default`, then from `default`. Returns `None` unless at least
/// one record was salvaged and the envelope conforms.
pub(crate) fn salvage(text: &str, schema: &SchemaDescriptor) -> Option<Value> {
    let mut envelope = Map::new();
    let mut regions: Vec<(usize, usize)> = Vec::new();
    let mut salvaged = 0usize;

    for (index, pattern) in schema.record_patterns.iter().enumerate() {
        let Some(item_ty) = schema.item_type(&pattern.field) else {
            continue;
        };
        let start = list_start(text, &pattern.field)
            .or_else(|| (index == 0).then(|| root_array_start(text)).flatten());
        let Some(start) = start else {
            continue;
        };

        let (records, end) = collect_records(text, start, pattern, item_ty);
        tracing::debug!(
            schema = %schema.name,
            field = %pattern.field,
            records = records.len(),
            "salvaged complete records"
        );
        regions.push((start, end));
        salvaged += records.len();
        envelope.insert(pattern.field.clone(), Value::Array(records));
    }

    if salvaged == 0 {
        return None;
    }

    for spec in &schema.fields {
        if envelope.contains_key(&spec.name) {
            continue;
        }
        let value = spec
            .salvage_from_text
            .then(|| value_from_text(text, spec, &regions))
            .flatten()
            .or_else(|| spec.salvage_default.clone())
            .or_else(|| spec.default.clone());
        if let Some(value) = value {
            envelope.insert(spec.name.clone(), value);
        }
    }

    schema.conform(&Value::Object(envelope)).ok()
}

/// Returns the offset just past the `[` of `"field": [`.
fn list_start(text: &str, field: &str) -> Option<usize> {
    key_value_starts(text, field)
        .into_iter()
        .find(|&pos| text.as_bytes()[pos] == b'[')
        .map(|pos| pos + 1)
}

fn root_array_start(text: &str) -> Option<usize> {
    let start = first_opener(text)?;
    (text.as_bytes()[start] == b'[').then_some(start + 1)
}

/// Walks list elements from `start`, returning complete records and the scan end.
fn collect_records(
    text: &str,
    start: usize,
    pattern: &RecordPattern,
    item_ty: &FieldType,
) -> (Vec<Value>, usize) {
    let bytes = text.as_bytes();
    let mut records = Vec::new();
    let mut i = start;

    loop {
        while bytes.get(i).is_some_and(|b| b.is_ascii_whitespace() || *b == b',') {
            i += 1;
        }
        match bytes.get(i) {
            Some(b'{') => {
                let Some(close) = matching_close(text, i) else {
                    break;
                };
                if let Some(record) = complete_record(&text[i..=close], pattern, item_ty) {
                    records.push(record);
                }
                i = close + 1;
            }
            Some(b']') => {
                i += 1;
                break;
            }
            _ => break,
        }
    }
    (records, i)
}

fn complete_record(slice: &str, pattern: &RecordPattern, item_ty: &FieldType) -> Option<Value> {
    let value: Value = serde_json::from_str(slice)
        .or_else(|_| serde_json::from_str(&syntactic_repair(slice)))
        .ok()?;
    let has_leaves = pattern
        .required_leaves
        .iter()
        .all(|leaf| value.get(leaf).is_some_and(|v| !v.is_null()));
    if !has_leaves {
        return None;
    }
    conform_value(item_ty, None, &value, &pattern.field).ok()
}

fn value_from_text(text: &str, spec: &FieldSpec, regions: &[(usize, usize)]) -> Option<Value> {
    if matches!(spec.ty, FieldType::Any) {
        return None;
    }
    key_value_starts(text, &spec.name)
        .into_iter()
        .filter(|&pos| !regions.iter().any(|&(start, end)| pos >= start && pos < end))
        .find_map(|pos| {
            let span = value_span(text, pos)?;
            let value: Value = serde_json::from_str(span).ok()?;
            conform_value(&spec.ty, spec.allowed.as_ref(), &value, &spec.name).ok()
        })
}
