//! Dotted-path expansion and deep merging of partial document updates.

use crate::types::{Document, PATH_SEPARATOR};
use serde_json::{Map, Value};
use std::borrow::Cow;

/// Expand every dotted key (`"a.b"`) into the nested structure it names.
///
/// Keys without a separator pass through unchanged. When no key contains a
/// separator the input is returned as-is, without copying.
pub fn expand_paths(fields: &Document) -> Cow<'_, Document> {
    if !fields.keys().any(|key| key.contains(PATH_SEPARATOR)) {
        return Cow::Borrowed(fields);
    }

    let mut expanded = Document::new();
    for (key, value) in fields {
        if key.contains(PATH_SEPARATOR) {
            let path: Vec<&str> = key.split(PATH_SEPARATOR).collect();
            insert_path(&mut expanded, &path, value.clone());
        } else {
            let mut single = Document::new();
            single.insert(key.clone(), value.clone());
            deep_merge(&mut expanded, single);
        }
    }
    Cow::Owned(expanded)
}

fn insert_path(node: &mut Document, path: &[&str], value: Value) {
    match path {
        [] => {}
        [last] => {
            node.insert((*last).to_string(), value);
        }
        [head, rest @ ..] => {
            let slot = node
                .entry((*head).to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !slot.is_object() {
                *slot = Value::Object(Map::new());
            }
            if let Value::Object(child) = slot {
                insert_path(child, rest, value);
            }
        }
    }
}

/// Merge `source` into `target` in place.
///
/// Where both sides hold a mapping under the same key the mappings are
/// merged recursively; anything else (scalars, sequences, a mapping meeting
/// a non-mapping) overwrites the target's value.
pub fn deep_merge(target: &mut Document, source: Document) {
    for (key, incoming) in source {
        match target.get_mut(&key) {
            Some(Value::Object(existing)) if incoming.is_object() => {
                if let Value::Object(incoming) = incoming {
                    deep_merge(existing, incoming);
                }
            }
            _ => {
                target.insert(key, incoming);
            }
        }
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
    fn test_expand_dotted_key() {
        let fields = doc(json!({"a.b": 1}));
        let expanded = expand_paths(&fields);
        assert_eq!(Value::Object(expanded.into_owned()), json!({"a": {"b": 1}}));
    }

    #[test]
    fn test_expand_fast_path_borrows() {
        let fields = doc(json!({"a": 1, "b": {"c": 2}}));
        let expanded = expand_paths(&fields);
        assert!(matches!(expanded, Cow::Borrowed(_)));
        assert!(std::ptr::eq(expanded.as_ref(), &fields));
    }

    #[test]
    fn test_expand_shares_prefixes() {
        let fields = doc(json!({"a.b": 1, "a.c.d": 2, "e": 3}));
        let expanded = expand_paths(&fields).into_owned();
        assert_eq!(
            Value::Object(expanded),
            json!({"a": {"b": 1, "c": {"d": 2}}, "e": 3})
        );
    }

    #[test]
    fn test_expand_plain_key_merges_with_dotted() {
        let fields = doc(json!({"a": {"x": 1}, "a.y": 2}));
        let expanded = expand_paths(&fields).into_owned();
        assert_eq!(Value::Object(expanded), json!({"a": {"x": 1, "y": 2}}));
    }

    #[test]
    fn test_deep_merge_nested() {
        let mut target = doc(json!({"a": {"x": 1}}));
        deep_merge(&mut target, doc(json!({"a": {"y": 2}})));
        assert_eq!(Value::Object(target), json!({"a": {"x": 1, "y": 2}}));
    }

    #[test]
    fn test_deep_merge_overwrites_sequences() {
        let mut target = doc(json!({"tags": [1, 2, 3], "n": 1}));
        deep_merge(&mut target, doc(json!({"tags": [4]})));
        assert_eq!(Value::Object(target), json!({"tags": [4], "n": 1}));
    }

    #[test]
    fn test_deep_merge_object_over_scalar() {
        let mut target = doc(json!({"a": 1}));
        deep_merge(&mut target, doc(json!({"a": {"b": 2}})));
        assert_eq!(Value::Object(target), json!({"a": {"b": 2}}));

        let mut target = doc(json!({"a": {"b": 2}}));
        deep_merge(&mut target, doc(json!({"a": null})));
        assert_eq!(Value::Object(target), json!({"a": null}));
    }
}
