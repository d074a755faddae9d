//! Dotted-path helpers over JSON documents.
//!
//! Paths follow document-store conventions: `services.resume.loginTokens.hashedToken`
//! walks objects by key and fans out across arrays, so a path matches when
//! *any* element reached through an array holds the value.

use serde_json::{Map, Value};

/// Every value reachable at `path`, flattening arrays along the way.
pub fn values_at<'a>(doc: &'a Value, path: &str) -> Vec<&'a Value> {
    let mut current = vec![doc];
    for key in path.split('.') {
        let mut next = Vec::new();
        for value in current {
            match value {
                Value::Object(map) => {
                    if let Some(v) = map.get(key) {
                        next.push(v);
                    }
                }
                Value::Array(items) => {
                    next.extend(items.iter().filter_map(|item| item.get(key)));
                }
                _ => {}
            }
        }
        current = next;
    }
    current
}

/// `true` if the value at `path`, or any element of an array at `path`,
/// equals `expected`.
pub fn path_matches(doc: &Value, path: &str, expected: &Value) -> bool {
    values_at(doc, path).into_iter().any(|v| match v {
        Value::Array(items) if !expected.is_array() => items.contains(expected),
        other => other == expected,
    })
}

/// Sets `path` to `value`, creating intermediate objects as needed.
pub fn set_path(doc: &mut Value, path: &str, value: Value) {
    let mut current = doc;
    let mut keys = path.split('.').peekable();
    while let Some(key) = keys.next() {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        let Value::Object(map) = current else { return };
        if keys.peek().is_none() {
            map.insert(key.to_owned(), value);
            return;
        }
        current = map.entry(key).or_insert_with(|| Value::Object(Map::new()));
    }
}

/// Appends `value` to the array at `path`, creating it if absent.
pub fn push_path(doc: &mut Value, path: &str, value: Value) {
    let mut items = match values_at(doc, path).first() {
        Some(Value::Array(items)) => items.clone(),
        _ => Vec::new(),
    };
    items.push(value);
    set_path(doc, path, Value::Array(items));
}

/// Removes elements of the array at `array_path` whose `field` equals
/// `value`. Returns the number removed.
pub fn pull_path(doc: &mut Value, array_path: &str, field: &str, value: &Value) -> usize {
    let Some(Value::Array(items)) = values_at(doc, array_path).first().copied().cloned() else {
        return 0;
    };
    let before = items.len();
    let kept: Vec<Value> = items.into_iter()
        .filter(|item| item.get(field) != Some(value))
        .collect();
    let removed = before - kept.len();
    set_path(doc, array_path, Value::Array(kept));
    removed
}

/// Keeps only the listed top-level fields (plus `_id`).
pub fn project(doc: &Value, fields: &[&str]) -> Value {
    let mut out = Map::new();
    if let Value::Object(map) = doc {
        for (k, v) in map {
            if k == "_id" || fields.contains(&k.as_str()) {
                out.insert(k.clone(), v.clone());
            }
        }
    }
    Value::Object(out)
}
