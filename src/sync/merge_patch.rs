//! # JSON Merge Patch
//!
//! RFC 7386 merge patches: computing the minimal patch between two JSON
//! documents and applying a patch to a document.
//!
//! Arrays are opaque values in merge-patch semantics. A changed array is sent
//! whole.

use serde_json::{Map, Value};

/// Compute the merge patch turning `original` into `modified`
///
/// Returns an empty object when the two documents are deep-equal.
#[must_use]
pub fn create(original: &Value, modified: &Value) -> Value {
    match (original, modified) {
        (Value::Object(orig), Value::Object(modi)) => Value::Object(diff_objects(orig, modi)),
        _ if original == modified => Value::Object(Map::new()),
        _ => modified.clone(),
    }
}

fn diff_objects(original: &Map<String, Value>, modified: &Map<String, Value>) -> Map<String, Value> {
    let mut patch = Map::new();

    for key in original.keys() {
        if !modified.contains_key(key) {
            patch.insert(key.clone(), Value::Null);
        }
    }

    for (key, new_value) in modified {
        match original.get(key) {
            Some(old_value) if old_value == new_value => {}
            Some(Value::Object(old_obj)) => {
                if let Value::Object(new_obj) = new_value {
                    let nested = diff_objects(old_obj, new_obj);
                    if !nested.is_empty() {
                        patch.insert(key.clone(), Value::Object(nested));
                    }
                } else {
                    patch.insert(key.clone(), new_value.clone());
                }
            }
            _ => {
                // A null in the modified document means the same as an absent key
                if new_value.is_null() && !original.contains_key(key) {
                    continue;
                }
                patch.insert(key.clone(), new_value.clone());
            }
        }
    }

    patch
}

/// Apply a merge patch to `target` in place
pub fn apply(target: &mut Value, patch: &Value) {
    let Value::Object(patch_obj) = patch else {
        *target = patch.clone();
        return;
    };

    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    let Value::Object(target_obj) = target else {
        return;
    };

    for (key, value) in patch_obj {
        if value.is_null() {
            target_obj.remove(key);
        } else {
            let entry = target_obj.entry(key.clone()).or_insert(Value::Null);
            apply(entry, value);
        }
    }
}

/// Whether the patch describes no change
#[must_use]
pub fn is_empty(patch: &Value) -> bool {
    matches!(patch, Value::Object(map) if map.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_identical_documents_produce_empty_patch() {
        let doc = json!({"metadata": {"name": "a", "labels": {"x": "1"}}, "data": {"k": "v"}});
        let patch = create(&doc, &doc.clone());
        assert!(is_empty(&patch));
    }

    #[test]
    fn test_patch_contains_only_changed_leaves() {
        let original = json!({
            "metadata": {"name": "pg-req-cred", "resourceVersion": "7"},
            "data": {"username": "old", "other": "keep"}
        });
        let modified = json!({
            "metadata": {"name": "pg-req-cred", "resourceVersion": "7"},
            "data": {"username": "nahid", "other": "keep", "password": "1234"}
        });
        let patch = create(&original, &modified);
        assert_eq!(
            patch,
            json!({"data": {"username": "nahid", "password": "1234"}})
        );
    }

    #[test]
    fn test_removed_keys_become_null() {
        let original = json!({"a": 1, "b": {"c": 2, "d": 3}});
        let modified = json!({"b": {"c": 2}});
        assert_eq!(create(&original, &modified), json!({"a": null, "b": {"d": null}}));
    }

    #[test]
    fn test_arrays_are_replaced_whole() {
        let original = json!({"subjects": [{"name": "a"}]});
        let modified = json!({"subjects": [{"name": "a"}, {"name": "b"}]});
        assert_eq!(
            create(&original, &modified),
            json!({"subjects": [{"name": "a"}, {"name": "b"}]})
        );
    }

    #[test]
    fn test_apply_rfc7386_examples() {
        let mut target = json!({"a": "b", "c": {"d": "e", "f": "g"}});
        apply(&mut target, &json!({"a": "z", "c": {"f": null}}));
        assert_eq!(target, json!({"a": "z", "c": {"d": "e"}}));

        let mut target = json!({"a": ["b"]});
        apply(&mut target, &json!({"a": "c"}));
        assert_eq!(target, json!({"a": "c"}));

        let mut target = json!({"e": null});
        apply(&mut target, &json!({"a": 1}));
        assert_eq!(target, json!({"e": null, "a": 1}));

        let mut target = json!("string");
        apply(&mut target, &json!({"a": {"bb": {"ccc": null}}}));
        assert_eq!(target, json!({"a": {"bb": {}}}));
    }

    #[test]
    fn test_created_patch_applies_back_to_modified() {
        let original = json!({"metadata": {"labels": {"a": "1", "b": "2"}}, "data": {"x": "1"}});
        let modified = json!({"metadata": {"labels": {"a": "1", "c": "3"}}, "data": {"x": "2"}});
        let patch = create(&original, &modified);
        let mut applied = original.clone();
        apply(&mut applied, &patch);
        assert_eq!(applied, modified);
    }
}
