//! Structural deduplication for results gathered from several shards
//!
//! Equality ignores object key order and recurses into arrays and objects.
//! Both operations are O(n²) comparisons, which is fine for membership lists
//! and per-request result sets.

use serde_json::{Map, Value};

/// Recursive structural equality; object keys are compared as sorted sets.
pub fn structural_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Object(x), Value::Object(y)) => objects_eq(x, y),
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| structural_eq(l, r))
        }
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(l), Some(r)) if x.is_f64() || y.is_f64() => l == r,
            _ => x == y,
        },
        _ => a == b,
    }
}

fn objects_eq(x: &Map<String, Value>, y: &Map<String, Value>) -> bool {
    if x.len() != y.len() {
        return false;
    }
    let mut left: Vec<(&String, &Value)> = x.iter().collect();
    let mut right: Vec<(&String, &Value)> = y.iter().collect();
    left.sort_by(|a, b| a.0.cmp(b.0));
    right.sort_by(|a, b| a.0.cmp(b.0));
    left.iter()
        .zip(&right)
        .all(|((lk, lv), (rk, rv))| lk == rk && structural_eq(lv, rv))
}

fn flatten_into(value: Value, out: &mut Vec<Value>) {
    match value {
        Value::Array(items) => {
            for item in items {
                flatten_into(item, out);
            }
        }
        other => out.push(other),
    }
}

fn push_unique(out: &mut Vec<Value>, value: Value) {
    if !out.iter().any(|seen| structural_eq(seen, &value)) {
        out.push(value);
    }
}

/// Flatten arbitrarily nested arrays, then drop structural duplicates,
/// keeping the first occurrence.
pub fn dedupe_deep<I>(nested: I) -> Vec<Value>
where
    I: IntoIterator<Item = Value>,
{
    let mut flat = Vec::new();
    for value in nested {
        flatten_into(value, &mut flat);
    }

    let mut out = Vec::with_capacity(flat.len());
    for value in flat {
        push_unique(&mut out, value);
    }
    out
}

/// Concatenate two lists and drop structural duplicates, first-seen order.
pub fn merge_union(a: Vec<Value>, b: Vec<Value>) -> Vec<Value> {
    let mut out = Vec::with_capacity(a.len() + b.len());
    for value in a.into_iter().chain(b) {
        push_unique(&mut out, value);
    }
    out
}

/// [`dedupe_deep`] over per-shard document batches.
pub fn dedupe_documents(batches: Vec<Vec<Map<String, Value>>>) -> Vec<Map<String, Value>> {
    let values = batches
        .into_iter()
        .map(|docs| Value::Array(docs.into_iter().map(Value::Object).collect()));

    dedupe_deep(values)
        .into_iter()
        .filter_map(|v| match v {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(pairs: &[(&str, Value)]) -> Value {
        let mut map = Map::new();
        for (k, v) in pairs {
            map.insert(k.to_string(), v.clone());
        }
        Value::Object(map)
    }

    #[test]
    fn test_key_order_is_ignored() {
        let a = obj(&[("foo", json!(1)), ("bar", json!(2))]);
        let b = obj(&[("bar", json!(2)), ("foo", json!(1))]);
        let out = dedupe_deep(vec![Value::Array(vec![a, b])]);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_nested_arrays_are_flattened() {
        let out = dedupe_deep(vec![
            json!([[{"id": 1}], [{"id": 2}, [{"id": 1}]]]),
            json!({"id": 3}),
        ]);
        assert_eq!(out, vec![json!({"id": 1}), json!({"id": 2}), json!({"id": 3})]);
    }

    #[test]
    fn test_nested_objects_compare_structurally() {
        let a = json!({"meta": {"x": 1, "y": [1, 2]}, "n": 1});
        let b = json!({"n": 1, "meta": {"y": [1, 2], "x": 1}});
        let c = json!({"n": 1, "meta": {"y": [2, 1], "x": 1}});
        assert!(structural_eq(&a, &b));
        assert!(!structural_eq(&a, &c));
    }

    #[test]
    fn test_integer_and_float_forms_compare_equal() {
        assert!(structural_eq(&json!(2), &json!(2.0)));
        assert!(!structural_eq(&json!(2), &json!(3)));
        assert!(!structural_eq(&json!(1), &json!("1")));
    }

    #[test]
    fn test_merge_union_keeps_first_seen_order() {
        let out = merge_union(
            vec![json!({"a": 1}), json!({"b": 2})],
            vec![json!({"b": 2}), json!({"c": 3}), json!({"a": 1})],
        );
        assert_eq!(out, vec![json!({"a": 1}), json!({"b": 2}), json!({"c": 3})]);
    }

    #[test]
    fn test_dedupe_documents_across_shards() {
        let doc = |v: Value| match v {
            Value::Object(m) => m,
            _ => unreachable!(),
        };
        let shard_a = vec![doc(json!({"vid": 1, "title": "a"})), doc(json!({"vid": 2}))];
        let shard_b = vec![doc(json!({"title": "a", "vid": 1}))];
        let out = dedupe_documents(vec![shard_a, shard_b, vec![]]);
        assert_eq!(out.len(), 2);
    }
}
