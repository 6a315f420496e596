//! The recovery ladder: turning unreliable raw text into validated records.
//!
//! The ladder is an ordered list of [`Rung`] strategies composed by
//! first-success short-circuiting. Every rung is a pure function of the raw
//! text and the schema, so recovery is deterministic:
//!
//! 1. **Direct parse** of the trimmed text
//! 2. **Envelope extraction** from fenced blocks, inline spans or a bracket-balance scan
//! 3. **Syntactic repair** of keys, commas and control characters
//! 4. **Truncation repair** closing strings and delimiters left open
//! 5. **Salvage** of complete records from list-shaped fields
//!
//! A candidate only counts when it conforms to the schema.

mod envelope;
mod repair;
mod salvage;
mod scan;

use crate::core::StageResult;
use crate::schema::SchemaDescriptor;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tracing::debug;

/// Identifies a ladder rung. The derived ordering is the ladder order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RungKind {
    /// Rung 1.
    DirectParse,
    /// Rung 2.
    EnvelopeExtraction,
    /// Rung 3.
    SyntacticRepair,
    /// Rung 4.
    TruncationRepair,
    /// Rung 5.
    Salvage,
}

impl fmt::Display for RungKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DirectParse => write!(f, "direct_parse"),
            Self::EnvelopeExtraction => write!(f, "envelope_extraction"),
            Self::SyntacticRepair => write!(f, "syntactic_repair"),
            Self::TruncationRepair => write!(f, "truncation_repair"),
            Self::Salvage => write!(f, "salvage"),
        }
    }
}

/// One recovery strategy.
pub trait Rung: Send + Sync {
    /// Returns the rung's position in the ladder.
    fn kind(&self) -> RungKind;

    /// Returns a record conforming to `schema`, or `None`.
    fn attempt(&self, raw: &str, schema: &SchemaDescriptor) -> Option<Value>;
}

fn parse_conforming(candidate: &str, schema: &SchemaDescriptor) -> Option<Value> {
    let value: Value = serde_json::from_str(candidate).ok()?;
    schema.conform(&value).ok()
}

/// Texts worth repairing: delimited candidates, the open tail, the whole text.
fn repair_inputs(raw: &str) -> Vec<&str> {
    let mut inputs = envelope::delimited(raw);
    for extra in envelope::open_tails(raw).into_iter().chain([raw.trim()]) {
        if !extra.is_empty() && !inputs.contains(&extra) {
            inputs.push(extra);
        }
    }
    inputs
}

/// Rung 1: the trimmed text is the document.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectParse;

impl Rung for DirectParse {
    fn kind(&self) -> RungKind {
        RungKind::DirectParse
    }

    fn attempt(&self, raw: &str, schema: &SchemaDescriptor) -> Option<Value> {
        parse_conforming(raw.trim(), schema)
    }
}

/// Rung 2: the document is embedded in prose.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvelopeExtraction;

impl Rung for EnvelopeExtraction {
    fn kind(&self) -> RungKind {
        RungKind::EnvelopeExtraction
    }

    fn attempt(&self, raw: &str, schema: &SchemaDescriptor) -> Option<Value> {
        envelope::candidates(raw)
            .into_iter()
            .find_map(|candidate| parse_conforming(candidate, schema))
    }
}

/// Rung 3: local syntax fixes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyntacticRepair;

impl Rung for SyntacticRepair {
    fn kind(&self) -> RungKind {
        RungKind::SyntacticRepair
    }

    fn attempt(&self, raw: &str, schema: &SchemaDescriptor) -> Option<Value> {
        repair_inputs(raw)
            .into_iter()
            .find_map(|candidate| parse_conforming(&repair::syntactic_repair(candidate), schema))
    }
}

/// Rung 4: close what a cut-off response left open.
#[derive(Debug, Clone, Copy, Default)]
pub struct TruncationRepair;

impl Rung for TruncationRepair {
    fn kind(&self) -> RungKind {
        RungKind::TruncationRepair
    }

    fn attempt(&self, raw: &str, schema: &SchemaDescriptor) -> Option<Value> {
        repair_inputs(raw).into_iter().find_map(|candidate| {
            let closed = repair::close_truncated(&repair::syntactic_repair(candidate))?;
            let parsed: Value = serde_json::from_str(&closed.text).ok()?;
            let conformed = schema.conform(&parsed).ok()?;
            if let Some(fragment) = closed.cut_fragment() {
                if rewrites_fragment(&parsed, &conformed, &fragment) {
                    debug!(schema = %schema.name, %fragment, "cut-off string was normalized, rejecting");
                    return None;
                }
            }
            Some(conformed)
        })
    }
}

/// True when conforming replaced the cut-off string with a different value,
/// e.g. an enum fallback standing in for a half-written `"fa`.
fn rewrites_fragment(parsed: &Value, conformed: &Value, fragment: &str) -> bool {
    match (parsed, conformed) {
        (Value::String(before), Value::String(after)) => {
            before == fragment && !before.eq_ignore_ascii_case(after)
        }
        (Value::Array(before), Value::Array(after)) => before
            .iter()
            .zip(after)
            .any(|(b, a)| rewrites_fragment(b, a, fragment)),
        (Value::Object(before), Value::Object(after)) => before.iter().any(|(key, b)| {
            after.get(key).is_some_and(|a| rewrites_fragment(b, a, fragment))
        }),
        _ => false,
    }
}

/// Rung 5: keep only complete records from list-shaped fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct Salvage;

impl Rung for Salvage {
    fn kind(&self) -> RungKind {
        RungKind::Salvage
    }

    fn attempt(&self, raw: &str, schema: &SchemaDescriptor) -> Option<Value> {
        salvage::salvage(raw, schema)
    }
}

/// An ordered sequence of rungs.
pub struct RecoveryLadder {
    rungs: Vec<Box<dyn Rung>>,
}

impl Default for RecoveryLadder {
    fn default() -> Self {
        Self::standard()
    }
}

impl fmt::Debug for RecoveryLadder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoveryLadder")
            .field("rungs", &self.kinds())
            .finish()
    }
}

impl RecoveryLadder {
    /// Creates the standard five-rung ladder.
    #[must_use]
    pub fn standard() -> Self {
        Self::empty()
            .with_rung(DirectParse)
            .with_rung(EnvelopeExtraction)
            .with_rung(SyntacticRepair)
            .with_rung(TruncationRepair)
            .with_rung(Salvage)
    }

    /// Creates a ladder with no rungs.
    #[must_use]
    pub fn empty() -> Self {
        Self { rungs: Vec::new() }
    }

    /// Appends a rung.
    #[must_use]
    pub fn with_rung(mut self, rung: impl Rung + 'static) -> Self {
        self.rungs.push(Box::new(rung));
        self
    }

    /// Returns the kinds of the rungs, in order.
    #[must_use]
    pub fn kinds(&self) -> Vec<RungKind> {
        self.rungs.iter().map(|r| r.kind()).collect()
    }

    /// Runs every rung. Never fails: total failure is a failed [`StageResult`].
    #[must_use]
    pub fn recover(&self, raw: &str, schema: &SchemaDescriptor) -> StageResult {
        self.recover_up_to(raw, schema, RungKind::Salvage)
    }

    /// Runs the rungs whose kind is at most `last`.
    #[must_use]
    pub fn recover_up_to(&self, raw: &str, schema: &SchemaDescriptor, last: RungKind) -> StageResult {
        for rung in self.rungs.iter().filter(|r| r.kind() <= last) {
            if let Some(data) = rung.attempt(raw, schema) {
                debug!(rung = %rung.kind(), schema = %schema.name, "recovered record");
                return StageResult::recovered(data, raw, rung.kind());
            }
            debug!(rung = %rung.kind(), schema = %schema.name, "rung yielded nothing");
        }
        StageResult::unrecoverable(raw)
    }
}
