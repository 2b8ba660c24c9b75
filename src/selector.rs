//! Selector matching: does a document satisfy a query.
//!
//! A selector maps field names to conditions. Every condition must hold
//! (logical AND). Supported conditions:
//!
//! - a literal value: the field must exist and be strictly equal to it
//! - `{"$ne": x}`: the field must not be strictly equal to `x`
//! - `{"$elemMatch": sub}`: the field must be a sequence with at least one
//!   element matching `sub`
//!
//! Field names are taken literally; dotted names are not expanded on the
//! read side.
//!
//! Strict equality follows identity semantics: scalars compare by value
//! (numbers numerically), while two sequences or two mappings are never
//! strictly equal to each other.

use crate::error::{ClientError, Result};
use crate::types::Document;
use serde_json::Value;
use std::collections::BTreeMap;

/// Operator key for array sub-matching.
pub const ELEM_MATCH: &str = "$elemMatch";

/// Operator key for inequality.
pub const NOT_EQUAL: &str = "$ne";

/// A single field condition.
#[derive(Clone, Debug, PartialEq)]
pub enum Condition {
    /// Field exists and is strictly equal to the value.
    Equals(Value),
    /// Field is not strictly equal to the operand. `None` is the absent
    /// operand: it holds for every field that exists.
    NotEquals(Option<Value>),
    /// Field is a sequence with at least one element matching the selector.
    ElemMatch(Selector),
}

impl Condition {
    /// Evaluate against the field value, `None` when the field is missing.
    pub fn matches(&self, value: Option<&Value>) -> bool {
        match self {
            Condition::Equals(expected) => value.is_some_and(|v| strict_eq(v, expected)),
            Condition::NotEquals(None) => value.is_some(),
            Condition::NotEquals(Some(operand)) => !value.is_some_and(|v| strict_eq(v, operand)),
            Condition::ElemMatch(sub) => match value {
                Some(Value::Array(items)) => items.iter().any(|item| matches(item, sub)),
                _ => false,
            },
        }
    }

    fn from_value(value: &Value) -> Result<Self> {
        if let Value::Object(map) = value {
            if map.len() == 1 {
                if let Some(sub) = map.get(ELEM_MATCH) {
                    return Ok(Condition::ElemMatch(Selector::from_value(sub)?));
                }
                if let Some(operand) = map.get(NOT_EQUAL) {
                    return Ok(Condition::NotEquals(Some(operand.clone())));
                }
            }
        }
        Ok(Condition::Equals(value.clone()))
    }
}

/// A query over documents: field name to condition.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Selector {
    conditions: BTreeMap<String, Condition>,
}

impl Selector {
    /// The empty selector, which matches every document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a selector from its JSON mapping form. `null` is the empty selector.
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(Self::new()),
            Value::Object(map) => {
                let mut conditions = BTreeMap::new();
                for (field, condition) in map {
                    conditions.insert(field.clone(), Condition::from_value(condition)?);
                }
                Ok(Self { conditions })
            }
            other => Err(ClientError::InvalidSelector(format!(
                "expected a mapping, got {other}"
            ))),
        }
    }

    /// Require `field` to equal `value`.
    pub fn equals(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(field, Condition::Equals(value.into()))
    }

    /// Require `field` to differ from `value`.
    pub fn not_equals(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(field, Condition::NotEquals(Some(value.into())))
    }

    /// Require `field` to be present (`$ne` against the absent value).
    pub fn exists(self, field: impl Into<String>) -> Self {
        self.with(field, Condition::NotEquals(None))
    }

    /// Require `field` to hold a sequence with an element matching `sub`.
    pub fn elem_match(self, field: impl Into<String>, sub: Selector) -> Self {
        self.with(field, Condition::ElemMatch(sub))
    }

    pub fn with(mut self, field: impl Into<String>, condition: Condition) -> Self {
        self.conditions.insert(field.into(), condition);
        self
    }

    pub fn conditions(&self) -> impl Iterator<Item = (&String, &Condition)> {
        self.conditions.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    /// Whether `document` satisfies every condition.
    pub fn matches(&self, document: &Document) -> bool {
        self.matches_fields(Some(document))
    }

    fn matches_fields(&self, fields: Option<&Document>) -> bool {
        self.conditions
            .iter()
            .all(|(field, condition)| condition.matches(fields.and_then(|f| f.get(field))))
    }
}

impl TryFrom<&Value> for Selector {
    type Error = ClientError;

    fn try_from(value: &Value) -> Result<Self> {
        Selector::from_value(value)
    }
}

/// Whether an arbitrary value satisfies `selector`.
///
/// `null` matches only the empty selector; scalars and sequences have no
/// fields, so only conditions that tolerate a missing field can hold.
pub fn matches(document: &Value, selector: &Selector) -> bool {
    match document {
        Value::Null => selector.is_empty(),
        Value::Object(fields) => selector.matches_fields(Some(fields)),
        _ => selector.matches_fields(None),
    }
}

fn strict_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        (Value::String(x), Value::String(y)) => x == y,
        _ => false,
    }
}
