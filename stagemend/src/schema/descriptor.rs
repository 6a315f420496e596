//! Declarative schema descriptors and structural conformance.
//!
//! A [`SchemaDescriptor`] declares the fields a stage record must carry.
//! [`SchemaDescriptor::conform`] checks a parsed JSON value against it and
//! returns the normalized record: defaults filled in, enum values mapped to
//! their canonical spelling, undeclared keys dropped.

use crate::errors::SchemaViolation;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

fn default_true() -> bool {
    true
}

/// The type of a declared field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldType {
    /// A JSON string.
    String,
    /// Any JSON number.
    Number,
    /// An integral JSON number.
    Integer,
    /// A boolean (the strings "true"/"false" are accepted).
    Boolean,
    /// A homogeneous list.
    Array {
        /// Type of each element.
        items: Box<FieldType>,
    },
    /// A nested object with declared fields.
    Object {
        /// Declared fields of the object.
        fields: Vec<FieldSpec>,
    },
    /// An object with arbitrary keys and homogeneous values.
    Map {
        /// Type of each value.
        values: Box<FieldType>,
    },
    /// Any JSON value, passed through unchanged.
    Any,
}

impl FieldType {
    /// Creates an array type.
    #[must_use]
    pub fn array(items: Self) -> Self {
        Self::Array {
            items: Box::new(items),
        }
    }

    /// Creates an object type.
    #[must_use]
    pub fn object(fields: Vec<FieldSpec>) -> Self {
        Self::Object { fields }
    }

    /// Creates a map type.
    #[must_use]
    pub fn map(values: Self) -> Self {
        Self::Map {
            values: Box::new(values),
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Array { .. } => "array",
            Self::Object { .. } => "object",
            Self::Map { .. } => "map",
            Self::Any => "any",
        }
    }
}

/// An enumerated value set for a string field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumSpec {
    /// Canonical allowed values.
    pub values: Vec<String>,
    /// Alternate spellings mapped to a canonical value.
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
    /// Whether matching ignores ASCII case.
    #[serde(default = "default_true")]
    pub case_insensitive: bool,
    /// Value used when nothing matches. Without one, unknown values are rejected.
    #[serde(default)]
    pub fallback: Option<String>,
}

impl EnumSpec {
    /// Creates a case-insensitive enum with no aliases or fallback.
    #[must_use]
    pub fn new<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            values: values.into_iter().map(Into::into).collect(),
            aliases: BTreeMap::new(),
            case_insensitive: true,
            fallback: None,
        }
    }

    /// Adds an alias.
    #[must_use]
    pub fn with_alias(mut self, alias: impl Into<String>, canonical: impl Into<String>) -> Self {
        self.aliases.insert(alias.into(), canonical.into());
        self
    }

    /// Sets the fallback value.
    #[must_use]
    pub fn with_fallback(mut self, fallback: impl Into<String>) -> Self {
        self.fallback = Some(fallback.into());
        self
    }

    /// Maps a raw value to its canonical spelling.
    #[must_use]
    pub fn normalize(&self, raw: &str) -> Option<String> {
        let raw = raw.trim();
        let eq = |a: &str, b: &str| {
            if self.case_insensitive {
                a.eq_ignore_ascii_case(b)
            } else {
                a == b
            }
        };

        if let Some(value) = self.values.iter().find(|v| eq(v, raw)) {
            return Some(value.clone());
        }
        if let Some((_, canonical)) = self.aliases.iter().find(|(alias, _)| eq(alias, raw)) {
            return Some(canonical.clone());
        }
        self.fallback.clone()
    }
}

/// One declared field of an object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Field name.
    pub name: String,
    /// Field type.
    #[serde(rename = "type")]
    pub ty: FieldType,
    /// Whether the field must be present and non-null.
    #[serde(default)]
    pub required: bool,
    /// Value used when an optional field is absent or null.
    #[serde(default)]
    pub default: Option<Value>,
    /// Enumerated values for string fields.
    #[serde(default, rename = "enum")]
    pub allowed: Option<EnumSpec>,
    /// Value used by salvage when the field cannot be recovered.
    #[serde(default)]
    pub salvage_default: Option<Value>,
    /// Whether salvage may pick this field's value out of loose text.
    #[serde(default = "default_true")]
    pub salvage_from_text: bool,
}

impl FieldSpec {
    /// Creates a required field.
    #[must_use]
    pub fn required(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            name: name.into(),
            ty,
            required: true,
            default: None,
            allowed: None,
            salvage_default: None,
            salvage_from_text: true,
        }
    }

    /// Creates an optional field with a default.
    #[must_use]
    pub fn optional(name: impl Into<String>, ty: FieldType, default: Value) -> Self {
        Self {
            required: false,
            default: Some(default),
            ..Self::required(name, ty)
        }
    }

    /// Sets the enumerated value set.
    #[must_use]
    pub fn with_enum(mut self, allowed: EnumSpec) -> Self {
        self.allowed = Some(allowed);
        self
    }

    /// Sets the salvage default.
    #[must_use]
    pub fn with_salvage_default(mut self, value: Value) -> Self {
        self.salvage_default = Some(value);
        self
    }

    /// Forbids salvage from reading this field out of loose text.
    #[must_use]
    pub fn without_text_salvage(mut self) -> Self {
        self.salvage_from_text = false;
        self
    }
}

/// A list-shaped field whose complete records rung 5 may salvage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordPattern {
    /// Root field holding the list.
    pub field: String,
    /// Leaf fields a record must carry to count as complete.
    #[serde(default)]
    pub required_leaves: Vec<String>,
}

/// The declared shape of one stage's record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    /// Schema name, used in logs and diagnostics.
    pub name: String,
    /// Root object fields.
    pub fields: Vec<FieldSpec>,
    /// Salvageable list fields, in priority order.
    #[serde(default)]
    pub record_patterns: Vec<RecordPattern>,
}

impl SchemaDescriptor {
    /// Creates an empty schema.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            record_patterns: Vec::new(),
        }
    }

    /// Adds a root field.
    #[must_use]
    pub fn with_field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    /// Adds a record pattern.
    #[must_use]
    pub fn with_record_pattern<I, S>(mut self, field: impl Into<String>, required_leaves: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.record_patterns.push(RecordPattern {
            field: field.into(),
            required_leaves: required_leaves.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Returns a root field by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Returns the element type of a root list field.
    #[must_use]
    pub fn item_type(&self, list_field: &str) -> Option<&FieldType> {
        match &self.field(list_field)?.ty {
            FieldType::Array { items } => Some(items),
            _ => None,
        }
    }

    /// Checks `value` against the schema and returns the normalized record.
    pub fn conform(&self, value: &Value) -> Result<Value, SchemaViolation> {
        conform_object(&self.fields, value, "$")
    }

    /// Builds an example document describing the expected shape.
    #[must_use]
    pub fn skeleton(&self) -> Value {
        skeleton_object(&self.fields)
    }
}

fn child_path(parent: &str, name: &str) -> String {
    if parent == "$" {
        name.to_string()
    } else {
        format!("{parent}.{name}")
    }
}

fn conform_object(fields: &[FieldSpec], value: &Value, path: &str) -> Result<Value, SchemaViolation> {
    let Some(obj) = value.as_object() else {
        return Err(SchemaViolation::new(path, "expected object"));
    };

    let mut out = Map::new();
    for spec in fields {
        let field_path = child_path(path, &spec.name);
        match obj.get(&spec.name) {
            Some(v) if !v.is_null() => {
                let conformed = conform_value(&spec.ty, spec.allowed.as_ref(), v, &field_path)?;
                out.insert(spec.name.clone(), conformed);
            }
            _ if spec.required => {
                return Err(SchemaViolation::new(field_path, "missing required field"));
            }
            _ => {
                if let Some(default) = &spec.default {
                    out.insert(spec.name.clone(), default.clone());
                }
            }
        }
    }
    Ok(Value::Object(out))
}

/// Conforms a single value against a type.
pub(crate) fn conform_value(
    ty: &FieldType,
    allowed: Option<&EnumSpec>,
    value: &Value,
    path: &str,
) -> Result<Value, SchemaViolation> {
    let mismatch = || SchemaViolation::new(path, format!("expected {}", ty.describe()));

    match ty {
        FieldType::String => {
            let s = value.as_str().ok_or_else(mismatch)?;
            match allowed {
                Some(spec) => spec.normalize(s).map(Value::String).ok_or_else(|| {
                    SchemaViolation::new(
                        path,
                        format!("'{s}' is not one of [{}]", spec.values.join(", ")),
                    )
                }),
                None => Ok(Value::String(s.to_string())),
            }
        }
        FieldType::Number => {
            if value.is_number() {
                Ok(value.clone())
            } else {
                Err(mismatch())
            }
        }
        FieldType::Integer => {
            if value.is_i64() || value.is_u64() {
                return Ok(value.clone());
            }
            match value.as_f64() {
                #[allow(clippy::cast_possible_truncation)]
                Some(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => Ok(Value::from(f as i64)),
                _ => Err(mismatch()),
            }
        }
        FieldType::Boolean => match value {
            Value::Bool(_) => Ok(value.clone()),
            Value::String(s) if s.trim().eq_ignore_ascii_case("true") => Ok(Value::Bool(true)),
            Value::String(s) if s.trim().eq_ignore_ascii_case("false") => Ok(Value::Bool(false)),
            _ => Err(mismatch()),
        },
        FieldType::Array { items } => {
            let arr = value.as_array().ok_or_else(mismatch)?;
            arr.iter()
                .enumerate()
                .map(|(i, item)| conform_value(items, allowed, item, &format!("{path}[{i}]")))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array)
        }
        FieldType::Object { fields } => conform_object(fields, value, path),
        FieldType::Map { values } => {
            let obj = value.as_object().ok_or_else(mismatch)?;
            let mut out = Map::new();
            for (key, v) in obj {
                let conformed = conform_value(values, allowed, v, &child_path(path, key))?;
                out.insert(key.clone(), conformed);
            }
            Ok(Value::Object(out))
        }
        FieldType::Any => Ok(value.clone()),
    }
}

fn skeleton_object(fields: &[FieldSpec]) -> Value {
    let mut out = Map::new();
    for spec in fields {
        out.insert(spec.name.clone(), skeleton_value(&spec.ty, spec.allowed.as_ref()));
    }
    Value::Object(out)
}

fn skeleton_value(ty: &FieldType, allowed: Option<&EnumSpec>) -> Value {
    match ty {
        FieldType::String => match allowed {
            Some(spec) => Value::String(spec.values.join("|")),
            None => Value::String("<string>".to_string()),
        },
        FieldType::Number => Value::String("<number>".to_string()),
        FieldType::Integer => Value::String("<integer>".to_string()),
        FieldType::Boolean => Value::String("<true|false>".to_string()),
        FieldType::Array { items } => Value::Array(vec![skeleton_value(items, allowed)]),
        FieldType::Object { fields } => skeleton_object(fields),
        FieldType::Map { values } => {
            let mut out = Map::new();
            out.insert("<key>".to_string(), skeleton_value(values, allowed));
            Value::Object(out)
        }
        FieldType::Any => Value::String("<any>".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn story_schema() -> SchemaDescriptor {
        SchemaDescriptor::new("stories")
            .with_field(FieldSpec::required(
                "stories",
                FieldType::array(FieldType::object(vec![
                    FieldSpec::required("id", FieldType::String),
                    FieldSpec::optional(
                        "priority",
                        FieldType::String,
                        json!("medium"),
                    )
                    .with_enum(
                        EnumSpec::new(["high", "medium", "low"]).with_fallback("medium"),
                    ),
                ])),
            ))
            .with_field(FieldSpec::optional("summary", FieldType::String, json!("")))
    }

    #[test]
    fn test_conform_fills_defaults_and_drops_extras() {
        let value = json!({"stories": [{"id": "US-1", "extra": true}], "noise": 1});
        let conformed = story_schema().conform(&value).unwrap();
        assert_eq!(
            conformed,
            json!({"stories": [{"id": "US-1", "priority": "medium"}], "summary": ""})
        );
    }

    #[test]
    fn test_conform_normalizes_enum_case_and_fallback() {
        let value = json!({"stories": [{"id": "1", "priority": "HIGH"}, {"id": "2", "priority": "urgent"}]});
        let conformed = story_schema().conform(&value).unwrap();
        assert_eq!(conformed["stories"][0]["priority"], "high");
        assert_eq!(conformed["stories"][1]["priority"], "medium");
    }

    #[test]
    fn test_enum_without_fallback_rejects() {
        let spec = EnumSpec::new(["pass", "fail"]).with_alias("passed", "pass");
        assert_eq!(spec.normalize("Passed"), Some("pass".to_string()));
        assert_eq!(spec.normalize("maybe"), None);
    }

    #[test]
    fn test_conform_reports_path_of_missing_field() {
        let value = json!({"stories": [{"id": "1"}, {"title": "no id"}]});
        let err = story_schema().conform(&value).unwrap_err();
        assert_eq!(err.path, "stories[1].id");
    }

    #[test]
    fn test_conform_rejects_non_object_root() {
        let err = story_schema().conform(&json!([1, 2])).unwrap_err();
        assert_eq!(err.path, "$");
    }

    #[test]
    fn test_null_optional_takes_default() {
        let value = json!({"stories": [], "summary": null});
        let conformed = story_schema().conform(&value).unwrap();
        assert_eq!(conformed["summary"], "");
    }

    #[test]
    fn test_boolean_accepts_string_spelling() {
        let schema = SchemaDescriptor::new("flag")
            .with_field(FieldSpec::required("go", FieldType::Boolean));
        assert_eq!(schema.conform(&json!({"go": "True"})).unwrap(), json!({"go": true}));
        assert!(schema.conform(&json!({"go": "yes"})).is_err());
    }

    #[test]
    fn test_integer_accepts_integral_float() {
        let schema = SchemaDescriptor::new("n")
            .with_field(FieldSpec::required("n", FieldType::Integer));
        assert_eq!(schema.conform(&json!({"n": 3.0})).unwrap(), json!({"n": 3}));
        assert!(schema.conform(&json!({"n": 3.5})).is_err());
    }

    #[test]
    fn test_map_conforms_values() {
        let schema = SchemaDescriptor::new("m").with_field(FieldSpec::optional(
            "issues",
            FieldType::map(FieldType::array(FieldType::String)),
            json!({}),
        ));
        assert!(schema.conform(&json!({"issues": {"design": ["x"]}})).is_ok());
        let err = schema.conform(&json!({"issues": {"design": [1]}})).unwrap_err();
        assert_eq!(err.path, "issues.design[0]");
    }

    #[test]
    fn test_descriptor_round_trips_through_json() {
        let schema = story_schema().with_record_pattern("stories", ["id"]);
        let text = serde_json::to_string(&schema).unwrap();
        let back: SchemaDescriptor = serde_json::from_str(&text).unwrap();
        assert_eq!(back, schema);
    }

    #[test]
    fn test_skeleton_shows_enum_values() {
        let skeleton = story_schema().skeleton();
        assert_eq!(skeleton["stories"][0]["priority"], "high|medium|low");
        assert_eq!(skeleton["summary"], "<string>");
    }
}
