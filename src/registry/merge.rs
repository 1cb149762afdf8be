use serde_json::Value;

/// Merge `overlay` into `base`
///
/// Objects merge key by key, recursively; any other overlay value replaces
/// the base value.
pub fn deep_merge(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nested_objects_merge() {
        let mut base = json!({"path": "/a", "auth": {"realm": "x", "users": ["u"]}});
        deep_merge(&mut base, &json!({"auth": {"realm": "y"}, "extra": 1}));
        assert_eq!(
            base,
            json!({"path": "/a", "auth": {"realm": "y", "users": ["u"]}, "extra": 1})
        );
    }

    #[test]
    fn scalars_and_arrays_replace() {
        let mut base = json!({"list": [1, 2], "n": 1});
        deep_merge(&mut base, &json!({"list": [3], "n": null}));
        assert_eq!(base, json!({"list": [3], "n": null}));
    }
}
