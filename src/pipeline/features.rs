//! Feature set representation and canonical serialization
//!
//! A feature set is a tree of named values. Keys are kept in a `BTreeMap`
//! so every traversal visits them in sorted order, which is what makes the
//! canonical string (and therefore the fingerprint) deterministic.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Fixed precision for numeric leaves in the canonical string.
pub const CANONICAL_PRECISION: usize = 6;

/// One node of a feature tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Number(f64),
    Text(String),
    Nested(FeatureSet),
}

impl From<f64> for FeatureValue {
    fn from(value: f64) -> Self {
        FeatureValue::Number(value)
    }
}

impl From<usize> for FeatureValue {
    fn from(value: usize) -> Self {
        FeatureValue::Number(value as f64)
    }
}

impl From<&str> for FeatureValue {
    fn from(value: &str) -> Self {
        FeatureValue::Text(value.to_string())
    }
}

impl From<FeatureSet> for FeatureValue {
    fn from(value: FeatureSet) -> Self {
        FeatureValue::Nested(value)
    }
}

/// Map of feature names to values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureSet(BTreeMap<String, FeatureValue>);

impl FeatureSet {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<FeatureValue>) {
        self.0.insert(key.into(), value.into());
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<FeatureValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&FeatureValue> {
        self.0.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<FeatureValue> {
        self.0.remove(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FeatureValue)> {
        self.0.iter()
    }

    /// Number of numeric leaves anywhere in the tree.
    pub fn numeric_leaf_count(&self) -> usize {
        self.0
            .values()
            .map(|v| match v {
                FeatureValue::Number(_) => 1,
                FeatureValue::Text(_) => 0,
                FeatureValue::Nested(nested) => nested.numeric_leaf_count(),
            })
            .sum()
    }

    /// Apply `f` to every numeric leaf, depth first in key order.
    pub fn map_numbers<F>(&mut self, f: &mut F)
    where
        F: FnMut(f64) -> f64,
    {
        for value in self.0.values_mut() {
            match value {
                FeatureValue::Number(n) => *n = f(*n),
                FeatureValue::Text(_) => {}
                FeatureValue::Nested(nested) => nested.map_numbers(f),
            }
        }
    }

    /// Canonical `key:value|key:value` rendering used as HMAC input.
    ///
    /// Keys are sorted at every level, numbers are rendered at
    /// [`CANONICAL_PRECISION`] decimals and nested sets are inlined as
    /// `key:{...}`. Reserved characters in keys and text are escaped.
    pub fn canonical_string(&self) -> String {
        let mut out = String::new();
        self.write_canonical(&mut out);
        out
    }

    fn write_canonical(&self, out: &mut String) {
        for (i, (key, value)) in self.0.iter().enumerate() {
            if i > 0 {
                out.push('|');
            }
            escape_into(key, out);
            out.push(':');
            match value {
                FeatureValue::Number(n) => out.push_str(&render_number(*n)),
                FeatureValue::Text(text) => escape_into(text, out),
                FeatureValue::Nested(nested) => {
                    out.push('{');
                    nested.write_canonical(out);
                    out.push('}');
                }
            }
        }
    }
}

fn render_number(value: f64) -> String {
    let rendered = format!("{:.*}", CANONICAL_PRECISION, value);
    // Values that round to zero render without a sign.
    if rendered.trim_start_matches('-').bytes().all(|b| b == b'0' || b == b'.') {
        return format!("{:.*}", CANONICAL_PRECISION, 0.0);
    }
    rendered
}

fn escape_into(raw: &str, out: &mut String) {
    for c in raw.chars() {
        if matches!(c, '|' | ':' | '{' | '}' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
}
