use anyhow::{anyhow, bail};
use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

/// A single document value. Documents are unordered string-keyed mappings
/// whose leaves are scalars; arrays may hold scalars or further mappings,
/// nested to arbitrary depth.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
    Array(Vec<Value>),
    Dict(BTreeMap<String, Value>),
    #[default]
    Null,
}

impl Value {
    pub fn text<S: AsRef<str>>(string: S) -> Value {
        Value::Text(string.as_ref().to_string())
    }

    pub fn int(int: i64) -> Value {
        Value::Int(int)
    }

    pub fn float(float: f64) -> Value {
        Value::Float(float)
    }

    pub fn bool(bool: bool) -> Value {
        Value::Bool(bool)
    }

    pub fn array(values: Vec<Value>) -> Value {
        Value::Array(values)
    }

    pub fn dict(values: BTreeMap<String, Value>) -> Value {
        Value::Dict(values)
    }

    pub fn dict_from_pairs(pairs: Vec<(&str, Value)>) -> Value {
        let mut map = BTreeMap::new();
        pairs.into_iter().for_each(|(k, v)| {
            map.insert(k.to_string(), v);
        });
        Value::Dict(map)
    }

    pub fn null() -> Value {
        Value::Null
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_dict(&self) -> bool {
        matches!(self, Value::Dict(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Value::Array(_))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::Text(_) => "text",
            Value::Array(_) => "array",
            Value::Dict(_) => "dict",
            Value::Null => "null",
        }
    }

    /// Looks up a key on a mapping; `None` for any other variant.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Dict(d) => d.get(key),
            _ => None,
        }
    }

    pub fn as_int(&self) -> anyhow::Result<i64> {
        match self {
            Value::Int(i) => Ok(*i),
            Value::Float(f) => Ok(*f as i64),
            Value::Bool(b) => Ok(if *b { 1 } else { 0 }),
            Value::Text(t) => t.parse::<i64>().map_err(|e| anyhow!(e)),
            other => bail!("{} cannot be converted to int", other.type_name()),
        }
    }

    pub fn as_f64(&self) -> anyhow::Result<f64> {
        match self {
            Value::Int(i) => Ok(*i as f64),
            Value::Float(f) => Ok(*f),
            Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
            Value::Text(t) => t.parse::<f64>().map_err(|e| anyhow!(e)),
            other => bail!("{} cannot be converted to float", other.type_name()),
        }
    }

    pub fn as_bool(&self) -> anyhow::Result<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            Value::Int(i) => Ok(*i > 0),
            other => bail!("{} cannot be converted to bool", other.type_name()),
        }
    }

    pub fn as_str(&self) -> anyhow::Result<&str> {
        match self {
            Value::Text(t) => Ok(t),
            other => bail!("{} cannot be converted to text", other.type_name()),
        }
    }

    pub fn as_dict(&self) -> anyhow::Result<&BTreeMap<String, Value>> {
        match self {
            Value::Dict(d) => Ok(d),
            other => bail!("{} cannot be converted to dict", other.type_name()),
        }
    }

    pub fn as_array(&self) -> anyhow::Result<&Vec<Value>> {
        match self {
            Value::Array(a) => Ok(a),
            other => bail!("{} cannot be converted to array", other.type_name()),
        }
    }

    pub fn into_dict(self) -> anyhow::Result<BTreeMap<String, Value>> {
        match self {
            Value::Dict(d) => Ok(d),
            other => bail!("{} cannot be converted to dict", other.type_name()),
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Int(i) => write!(f, "{i}"),
            // {:?} keeps the decimal point, so 1.0 does not collapse to "1"
            Value::Float(fl) => write!(f, "{fl:?}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Text(t) => write!(f, "{t}"),
            Value::Array(_) | Value::Dict(_) => {
                let json: serde_json::Value = self.into();
                write!(f, "{json}")
            }
            Value::Null => write!(f, "null"),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::Array(value)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(value: BTreeMap<String, Value>) -> Self {
        Value::Dict(value)
    }
}

// Values travel through JSON surfaces (request bodies, reports) untagged.
impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::Text(t) => serializer.serialize_str(t),
            Value::Array(a) => a.serialize(serializer),
            Value::Dict(d) => d.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = serde_json::Value::deserialize(deserializer)?;
        Ok((&json).into())
    }
}
