use crate::value::Value;
use std::collections::BTreeMap;

impl From<&serde_json::Map<String, serde_json::Value>> for Value {
    fn from(value: &serde_json::Map<String, serde_json::Value>) -> Self {
        let mut map = BTreeMap::new();
        for (key, value) in value {
            map.insert(key.clone(), value.into());
        }
        Value::Dict(map)
    }
}

impl From<&serde_json::Value> for Value {
    fn from(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::null(),
            serde_json::Value::Bool(b) => Value::bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::int(i)
                } else {
                    // u64 beyond i64::MAX or a true float
                    Value::float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::text(s),
            serde_json::Value::Array(a) => {
                let mut values = vec![];
                for value in a {
                    values.push(value.into());
                }
                Value::array(values)
            }
            serde_json::Value::Object(o) => o.into(),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        (&value).into()
    }
}

impl From<&Value> for serde_json::Value {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::Number((*i).into()),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Text(t) => serde_json::Value::String(t.clone()),
            Value::Array(a) => serde_json::Value::Array(a.iter().map(Into::into).collect()),
            Value::Dict(d) => serde_json::Value::Object(
                d.iter().map(|(k, v)| (k.clone(), v.into())).collect(),
            ),
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        (&value).into()
    }
}

impl Value {
    pub fn from_json<S: AsRef<str>>(text: S) -> anyhow::Result<Value> {
        let json: serde_json::Value = serde_json::from_str(text.as_ref())?;
        Ok((&json).into())
    }
}
