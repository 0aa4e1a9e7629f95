//! The datum value carried by term leaves and by query options: a tagged variant rather than a
//! language-native "any".

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Number;

/// A JSON-representable value. Datum leaves and option maps both bottom out here; the marshal
/// rules are implemented directly against `serde_json::Value` via the `From` impls below rather
/// than against this type, since a `Value` round-trips losslessly through JSON by construction.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items.as_slice()),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("Value always serializes to JSON")
    }

    pub fn from_json(value: serde_json::Value) -> Self {
        serde_json::from_value(value).expect("serde_json::Value always deserializes into Value")
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

macro_rules! impl_from_number {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::Number(Number::from(v))
                }
            }
        )+
    };
}

impl_from_number!(i8, i16, i32, i64, u8, u16, u32, u64);

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Number::from_f64(v).map(Value::Number).unwrap_or(Value::Null)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::Array(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let original = Value::Object(BTreeMap::from([
            ("a".to_owned(), Value::from(1_i64)),
            ("b".to_owned(), Value::Array(vec![Value::from("x"), Value::Null])),
        ]));
        let json = original.to_json();
        let back = Value::from_json(json);
        assert_eq!(original, back);
    }

    #[test]
    fn numeric_from_impls_agree_with_json() {
        assert_eq!(Value::from(3_i64).to_json(), serde_json::json!(3));
        assert_eq!(Value::from(3.5_f64).to_json(), serde_json::json!(3.5));
    }
}
