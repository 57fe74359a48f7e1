use crate::value::Value;
use std::collections::BTreeMap;
use tracing::debug;

/// Fields the document store owns; they never survive an ingest.
pub const SYSTEM_FIELDS: [&str; 5] = ["_rid", "_self", "_etag", "_attachments", "_ts"];

/// Makes a value safe for JSON upsert: non-finite floats become null, floats
/// that carry no fraction stay floats (the sink tells them apart), keys are
/// strings by construction.
pub fn json_safe(value: Value) -> Value {
    match value {
        Value::Float(f) if !f.is_finite() => {
            debug!("coercing non-finite float to null");
            Value::Null
        }
        Value::Array(values) => Value::Array(values.into_iter().map(json_safe).collect()),
        Value::Dict(map) => Value::Dict(
            map.into_iter()
                .map(|(k, v)| (k, json_safe(v)))
                .collect(),
        ),
        other => other,
    }
}

/// Recursively removes keys matching `drop` at every nesting level.
pub fn strip_fields<F>(value: &Value, drop: &F) -> Value
where
    F: Fn(&str) -> bool,
{
    match value {
        Value::Dict(map) => Value::Dict(
            map.iter()
                .filter(|(k, _)| !drop(k))
                .map(|(k, v)| (k.clone(), strip_fields(v, drop)))
                .collect::<BTreeMap<_, _>>(),
        ),
        Value::Array(values) => {
            Value::Array(values.iter().map(|v| strip_fields(v, drop)).collect())
        }
        other => other.clone(),
    }
}

/// Drops every document-store system field, recursively.
pub fn strip_system_fields(value: &Value) -> Value {
    strip_fields(value, &|key| SYSTEM_FIELDS.contains(&key))
}

/// Drops system fields but keeps `_rid`, which seeds the surrogate id on export.
pub fn strip_system_fields_keep_rid(value: &Value) -> Value {
    strip_fields(value, &|key| key != "_rid" && SYSTEM_FIELDS.contains(&key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_safe_nulls_non_finite() {
        let doc = Value::dict_from_pairs(vec![
            ("ok", Value::float(1.5)),
            ("bad", Value::float(f64::NAN)),
            ("inner", Value::array(vec![Value::float(f64::INFINITY)])),
        ]);
        let safe = json_safe(doc);
        assert_eq!(safe.get("ok").unwrap(), &Value::float(1.5));
        assert_eq!(safe.get("bad").unwrap(), &Value::Null);
        assert_eq!(
            safe.get("inner").unwrap(),
            &Value::array(vec![Value::Null])
        );
    }

    #[test]
    fn strips_system_fields_recursively() {
        let doc = Value::from_json(
            r#"{"id":"A","_etag":"x","_ts":1,"inner":{"_self":"y","keep":1},"list":[{"_attachments":"z"}]}"#,
        )
        .unwrap();
        let clean = strip_system_fields(&doc);
        assert_eq!(
            clean,
            Value::from_json(r#"{"id":"A","inner":{"keep":1},"list":[{}]}"#).unwrap()
        );
    }

    #[test]
    fn keep_rid_variant_spares_rid_only() {
        let doc = Value::from_json(r#"{"_rid":"r1","_etag":"x","id":"A"}"#).unwrap();
        let clean = strip_system_fields_keep_rid(&doc);
        assert_eq!(clean, Value::from_json(r#"{"_rid":"r1","id":"A"}"#).unwrap());
    }
}
