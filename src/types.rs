//! Core types for the local document mirror.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Name of the mandatory identifier field on every document.
pub const ID_FIELD: &str = "_id";

/// Separator used by dotted field paths (`"a.b.c"`).
pub const PATH_SEPARATOR: char = '.';

/// A document: field name to arbitrary value, plus the `_id` field.
pub type Document = Map<String, Value>;

/// Identifier of a document within its collection.
pub type DocumentId = String;

/// Read the identifier of a document, if it carries a string `_id`.
pub fn document_id(doc: &Document) -> Option<&str> {
    doc.get(ID_FIELD).and_then(Value::as_str)
}

/// Canonical serialization of a publication name and its wire parameters.
///
/// Object keys are written in sorted order at every depth, so two parameter
/// lists that are structurally equal always produce the same key regardless
/// of the order their maps were built in.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionKey(String);

impl SubscriptionKey {
    /// Derive the key for `name` subscribed with `params`.
    pub fn new(name: &str, params: &[Value]) -> Self {
        let mut out = String::with_capacity(name.len() + 16);
        out.push('[');
        out.push_str(&Value::from(name).to_string());
        for param in params {
            out.push(',');
            write_canonical(param, &mut out);
        }
        out.push(']');
        SubscriptionKey(out)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::from(key.as_str()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

impl fmt::Debug for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubscriptionKey({})", self.0)
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What happened to a single field in a `changed` update.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldChange {
    /// The field was set or overwritten with this value.
    Set(Value),
    /// The field was cleared. Distinct from being set to `null`.
    Cleared,
    /// Only some sub-fields changed.
    Nested(ChangeSet),
}

/// Structured description of the fields an update set or cleared.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChangeSet {
    fields: BTreeMap<String, FieldChange>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a change-set from already expanded fields; every entry is a `Set`.
    pub fn from_fields(fields: Document) -> Self {
        Self {
            fields: fields
                .into_iter()
                .map(|(key, value)| (key, FieldChange::Set(value)))
                .collect(),
        }
    }

    /// Mark a dotted path as cleared, splitting any `Set` object on the way
    /// down into its nested parts.
    pub fn clear_path(&mut self, path: &str) {
        let mut segments: Vec<&str> = path.split(PATH_SEPARATOR).collect();
        let Some(last) = segments.pop() else {
            return;
        };

        let mut node = self;
        for segment in segments {
            let entry = node
                .fields
                .entry(segment.to_string())
                .or_insert_with(|| FieldChange::Nested(ChangeSet::new()));

            if !matches!(entry, FieldChange::Nested(_)) {
                let nested = match std::mem::replace(entry, FieldChange::Cleared) {
                    FieldChange::Set(Value::Object(map)) => ChangeSet::from_fields(map),
                    _ => ChangeSet::new(),
                };
                *entry = FieldChange::Nested(nested);
            }

            let FieldChange::Nested(inner) = entry else {
                return;
            };
            node = inner;
        }

        node.fields.insert(last.to_string(), FieldChange::Cleared);
    }

    /// Top-level entry for `key`.
    pub fn get(&self, key: &str) -> Option<&FieldChange> {
        self.fields.get(key)
    }

    /// Entry at a dotted path, descending through nested change-sets and
    /// through objects that were set wholesale.
    pub fn get_path(&self, path: &str) -> Option<FieldChange> {
        let mut segments = path.split(PATH_SEPARATOR);
        let first = segments.next()?;
        let mut current = self.fields.get(first)?.clone();

        for segment in segments {
            current = match current {
                FieldChange::Nested(inner) => inner.fields.get(segment)?.clone(),
                FieldChange::Set(Value::Object(map)) => FieldChange::Set(map.get(segment)?.clone()),
                _ => return None,
            };
        }
        Some(current)
    }

    /// Whether the dotted path was cleared by this update.
    pub fn is_cleared(&self, path: &str) -> bool {
        matches!(self.get_path(path), Some(FieldChange::Cleared))
    }

    /// Every cleared path, in dotted form.
    pub fn cleared_paths(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_cleared("", &mut out);
        out
    }

    fn collect_cleared(&self, prefix: &str, out: &mut Vec<String>) {
        for (key, change) in &self.fields {
            let path = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{prefix}{PATH_SEPARATOR}{key}")
            };
            match change {
                FieldChange::Cleared => out.push(path),
                FieldChange::Nested(inner) => inner.collect_cleared(&path, out),
                FieldChange::Set(_) => {}
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldChange)> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_key_ignores_map_order() {
        let a = json!({"a": 1, "b": {"x": true, "y": [1, 2]}});
        let mut reordered = Map::new();
        reordered.insert("b".into(), json!({"y": [1, 2], "x": true}));
        reordered.insert("a".into(), json!(1));

        assert_eq!(
            SubscriptionKey::new("orgs", &[a]),
            SubscriptionKey::new("orgs", &[Value::Object(reordered)])
        );
    }

    #[test]
    fn test_key_distinguishes_params() {
        let one = SubscriptionKey::new("orgs", &[json!({"a": 1})]);
        let two = SubscriptionKey::new("orgs", &[json!({"a": 2})]);
        let other = SubscriptionKey::new("users", &[json!({"a": 1})]);
        assert_ne!(one, two);
        assert_ne!(one, other);
        assert_eq!(one.as_str(), r#"["orgs",{"a":1}]"#);
    }

    #[test]
    fn test_key_without_params() {
        assert_eq!(SubscriptionKey::new("all", &[]).as_str(), r#"["all"]"#);
    }

    #[test]
    fn test_clear_top_level() {
        let mut changes = ChangeSet::from_fields(doc(json!({"n": 1})));
        changes.clear_path("gone");

        assert_eq!(changes.get("n"), Some(&FieldChange::Set(json!(1))));
        assert_eq!(changes.get("gone"), Some(&FieldChange::Cleared));
        assert!(changes.is_cleared("gone"));
        assert!(!changes.is_cleared("n"));
    }

    #[test]
    fn test_clear_merges_into_set_object() {
        let mut changes = ChangeSet::from_fields(doc(json!({"a": {"x": 1}})));
        changes.clear_path("a.y");

        assert_eq!(changes.get_path("a.x"), Some(FieldChange::Set(json!(1))));
        assert!(changes.is_cleared("a.y"));
        assert_eq!(changes.cleared_paths(), vec!["a.y".to_string()]);
    }

    #[test]
    fn test_clear_replaces_scalar_parent() {
        let mut changes = ChangeSet::from_fields(doc(json!({"a": 5})));
        changes.clear_path("a.b");

        assert!(changes.is_cleared("a.b"));
        assert!(matches!(changes.get("a"), Some(FieldChange::Nested(_))));
    }

    #[test]
    fn test_get_path_into_set_object() {
        let changes = ChangeSet::from_fields(doc(json!({"a": {"b": {"c": 3}}})));
        assert_eq!(changes.get_path("a.b.c"), Some(FieldChange::Set(json!(3))));
        assert_eq!(changes.get_path("a.z"), None);
    }
}
