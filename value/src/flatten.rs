use crate::value::Value;
use std::collections::BTreeMap;

/// Flattens a mapping into dotted-path fields. Nested mappings are walked and
/// their keys joined with `.`; arrays are NOT descended, they stay intact as
/// values. Iterative, so document depth never becomes stack depth.
pub fn flatten_shallow(doc: &BTreeMap<String, Value>) -> Vec<(String, Value)> {
    let mut flat = vec![];
    let mut stack: Vec<(String, &BTreeMap<String, Value>)> = vec![(String::new(), doc)];

    while let Some((prefix, dict)) = stack.pop() {
        for (key, value) in dict {
            let path = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{prefix}.{key}")
            };
            match value {
                Value::Dict(inner) => stack.push((path, inner)),
                other => flat.push((path, other.clone())),
            }
        }
    }
    flat
}

/// Rebuilds a nested mapping from dotted-path fields. Textual values that look
/// like embedded structure (`[...]` / `{...}`) are re-parsed on the way in. An
/// intermediate segment that is present but not a mapping is replaced by one;
/// within one row the last write wins.
pub fn unflatten<I>(flat: I) -> BTreeMap<String, Value>
where
    I: IntoIterator<Item = (String, Value)>,
{
    let mut result = BTreeMap::new();

    for (key, value) in flat {
        let value = match value {
            Value::Text(t) => parse_loose(&t).unwrap_or(Value::Text(t)),
            other => other,
        };

        let parts: Vec<&str> = key.split('.').collect();
        let mut cur = &mut result;
        for (i, part) in parts.iter().enumerate() {
            if i == parts.len() - 1 {
                cur.insert(part.to_string(), value);
                break;
            }
            let entry = cur
                .entry(part.to_string())
                .or_insert_with(|| Value::Dict(BTreeMap::new()));
            if !entry.is_dict() {
                *entry = Value::Dict(BTreeMap::new());
            }
            cur = match entry {
                Value::Dict(d) => d,
                _ => unreachable!(),
            };
        }
    }
    result
}

/// Attempts to parse text that looks like an embedded array or mapping.
/// Strict JSON first, then a permissive pass that also accepts
/// Python-literal-style forms such as `{'k': 1}`. `None` keeps the literal.
pub fn parse_loose(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    let bracketed = (trimmed.starts_with('[') && trimmed.ends_with(']'))
        || (trimmed.starts_with('{') && trimmed.ends_with('}'));
    if !bracketed {
        return None;
    }

    if let Ok(json) = serde_json::from_str::<serde_json::Value>(trimmed) {
        return Some((&json).into());
    }
    // json5 tolerates single quotes and unquoted keys
    if let Ok(json) = json5::from_str::<serde_json::Value>(trimmed) {
        return Some((&json).into());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flatten_descends_dicts_not_arrays() {
        let doc = Value::from_json(r#"{"a":{"b":{"c":1}},"tags":[1,2],"x":"y"}"#)
            .unwrap()
            .into_dict()
            .unwrap();
        let mut flat = flatten_shallow(&doc);
        flat.sort_by(|l, r| l.0.cmp(&r.0));
        assert_eq!(
            flat,
            vec![
                ("a.b.c".to_string(), Value::int(1)),
                ("tags".to_string(), Value::array(vec![1.into(), 2.into()])),
                ("x".to_string(), Value::text("y")),
            ]
        );
    }

    #[test]
    fn unflatten_inverts_flatten() {
        let doc = Value::from_json(r#"{"a":{"b":{"c":1},"d":2},"x":"y"}"#)
            .unwrap()
            .into_dict()
            .unwrap();
        let back = unflatten(flatten_shallow(&doc));
        assert_eq!(Value::Dict(back), Value::Dict(doc));
    }

    #[test]
    fn unflatten_reparses_embedded_structure() {
        let back = unflatten(vec![("tags".to_string(), Value::text("[1, 2]"))]);
        assert_eq!(
            back.get("tags").unwrap(),
            &Value::array(vec![1.into(), 2.into()])
        );
    }

    #[test]
    fn unflatten_replaces_scalar_intermediate() {
        let back = unflatten(vec![
            ("a".to_string(), Value::int(1)),
            ("a.b".to_string(), Value::int(2)),
        ]);
        assert_eq!(back.get("a").unwrap().get("b").unwrap(), &Value::int(2));
    }

    #[test]
    fn parse_loose_accepts_python_style() {
        assert_eq!(
            parse_loose("{'k': 1}").unwrap(),
            Value::dict_from_pairs(vec![("k", 1.into())])
        );
        assert_eq!(parse_loose("[]").unwrap(), Value::array(vec![]));
        assert_eq!(parse_loose("plain text"), None);
        assert_eq!(parse_loose("[not structure"), None);
    }
}
