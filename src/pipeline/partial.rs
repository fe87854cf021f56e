//! Tolerant per-field extraction from an incomplete JSON buffer.
//!
//! This is intentionally not an incremental JSON parser. Each field has one regex
//! that answers a single question: is this field's value syntactically closed
//! yet? Matches are approximate (a key-like string inside another value can
//! match), which is acceptable for early delivery because the authoritative
//! parse happens at the end.

use crate::{Error, ErrorContext, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;

const JSON_STRING: &str = r#""(?:[^"\\]|\\.)*""#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    String,
    Number,
    Bool,
    StringArray,
}

impl FieldKind {
    fn value_pattern(&self) -> String {
        match self {
            FieldKind::String => format!("({})", JSON_STRING),
            // A trailing delimiter proves the number is not still growing.
            FieldKind::Number => r"(-?\d+(?:\.\d+)?(?:[eE][+-]?\d+)?)\s*[,}\]]".to_string(),
            FieldKind::Bool => r"(true|false)".to_string(),
            FieldKind::StringArray => format!(
                r"(\[\s*(?:{s}\s*(?:,\s*{s}\s*)*)?\])",
                s = JSON_STRING
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FieldSpec {
    name: String,
    kind: FieldKind,
    pattern: Regex,
    key: String,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Result<Self> {
        let name = name.into();
        let source = format!(
            r#""{}"\s*:\s*{}"#,
            regex::escape(&name),
            kind.value_pattern()
        );
        let pattern = Regex::new(&source).map_err(|e| {
            Error::configuration_with_context(
                format!("cannot build extractor for field '{}'", name),
                ErrorContext::new()
                    .with_details(e.to_string())
                    .with_source("field_set"),
            )
        })?;
        Ok(Self {
            key: format!("\"{}\"", name),
            name,
            kind,
            pattern,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    /// Returns the byte offset of the match and the decoded value, if the
    /// field's value is complete in `buffer`.
    fn extract(&self, buffer: &str) -> Option<(usize, Value)> {
        self.extract_at(buffer, 0)
    }

    /// Like `extract`, but only considers matches starting at or after `start`.
    fn extract_at(&self, buffer: &str, start: usize) -> Option<(usize, Value)> {
        let caps = self.pattern.captures_at(buffer, start)?;
        let whole = caps.get(0)?;
        let raw = caps.get(1)?.as_str();
        // The regex only proves closure; serde_json decodes escapes and rejects
        // anything malformed.
        let value: Value = serde_json::from_str(raw).ok()?;
        Some((whole.start(), value))
    }

    /// Earliest offset at or after `from` where this field's key could still
    /// begin: the first occurrence of the key, or else the tail that may hold
    /// a partial key.
    fn resume_offset(&self, buffer: &str, from: usize) -> usize {
        if let Some(found) = buffer[from..].find(&self.key) {
            return from + found;
        }
        let mut at = buffer
            .len()
            .saturating_sub(self.key.len() - 1)
            .max(from);
        while !buffer.is_char_boundary(at) {
            at -= 1;
        }
        at
    }
}

/// The fixed set of fields a pipeline run watches for.
#[derive(Debug, Clone, Default)]
pub struct FieldSet {
    specs: Vec<FieldSpec>,
}

impl FieldSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_specs<I, S>(specs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, FieldKind)>,
        S: Into<String>,
    {
        specs
            .into_iter()
            .try_fold(Self::new(), |set, (name, kind)| set.with_field(name, kind))
    }

    pub fn with_field(mut self, name: impl Into<String>, kind: FieldKind) -> Result<Self> {
        let spec = FieldSpec::new(name, kind)?;
        if self.specs.iter().any(|s| s.name == spec.name) {
            return Err(Error::configuration_with_context(
                format!("field '{}' declared twice", spec.name),
                ErrorContext::new().with_source("field_set"),
            ));
        }
        self.specs.push(spec);
        Ok(self)
    }

    pub fn specs(&self) -> &[FieldSpec] {
        &self.specs
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Best-effort extraction of every field from a complete but unparseable text.
    pub fn salvage(&self, text: &str) -> Map<String, Value> {
        let mut found: Vec<(usize, &str, Value)> = self
            .specs
            .iter()
            .filter_map(|spec| {
                spec.extract(text)
                    .map(|(pos, value)| (pos, spec.name(), value))
            })
            .collect();
        found.sort_by_key(|(pos, _, _)| *pos);
        found
            .into_iter()
            .map(|(_, name, value)| (name.to_string(), value))
            .collect()
    }
}

/// Accumulated state of one streaming request.
///
/// A field moves from absent to present exactly once. Later fragments never
/// revise an emitted field, even if the final parse would disagree.
pub struct PartialResult {
    fields: Arc<FieldSet>,
    buffer: String,
    values: Map<String, Value>,
    emitted: HashSet<String>,
    // Per watched field: no match can start before this byte offset.
    scan_from: Vec<usize>,
}

impl PartialResult {
    pub fn new(fields: Arc<FieldSet>) -> Self {
        Self {
            scan_from: vec![0; fields.len()],
            fields,
            buffer: String::new(),
            values: Map::new(),
            emitted: HashSet::new(),
        }
    }

    /// Append a fragment and return the fields that became complete, in the
    /// order they appear in the buffer.
    pub fn push(&mut self, fragment: &str) -> Vec<(String, Value)> {
        self.buffer.push_str(fragment);
        if self.emitted.len() == self.fields.len() {
            return Vec::new();
        }

        let mut fresh: Vec<(usize, String, Value)> = Vec::new();
        for (i, spec) in self.fields.specs().iter().enumerate() {
            if self.emitted.contains(spec.name()) {
                continue;
            }
            let from = self.scan_from[i];
            match spec.extract_at(&self.buffer, from) {
                Some((pos, value)) => fresh.push((pos, spec.name().to_string(), value)),
                None => self.scan_from[i] = spec.resume_offset(&self.buffer, from),
            }
        }
        fresh.sort_by_key(|(pos, _, _)| *pos);

        fresh
            .into_iter()
            .map(|(_, name, value)| {
                self.emitted.insert(name.clone());
                self.values.insert(name.clone(), value.clone());
                (name, value)
            })
            .collect()
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn is_emitted(&self, name: &str) -> bool {
        self.emitted.contains(name)
    }

    pub fn into_buffer(self) -> String {
        self.buffer
    }
}
