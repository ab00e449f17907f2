// Copyright 2026 Martin Pool.

//! Typed scalar values carried by metadata calls.
//!
//! Parameters and results travel as strings alongside a type tag, and are
//! decoded back into [Value] by the tag.

use std::fmt;

use itertools::Itertools;
use strum_macros::{AsRefStr, EnumString, IntoStaticStr};

use crate::envelope::{decode_line, encode_line};
use crate::errors::{Error, Result};

/// Type tags for [Value].
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, AsRefStr, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum ValueType {
    Void,
    Bool,
    Long,
    String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Void,
    Bool(bool),
    Long(i64),
    String(String),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Void => ValueType::Void,
            Value::Bool(_) => ValueType::Bool,
            Value::Long(_) => ValueType::Long,
            Value::String(_) => ValueType::String,
        }
    }

    /// Encode the value as a single line without its type.
    pub fn encode(&self) -> String {
        match self {
            Value::Void => "null".to_owned(),
            Value::Bool(b) => b.to_string(),
            Value::Long(l) => l.to_string(),
            Value::String(s) => encode_line(s),
        }
    }

    /// Decode a value of a known type.
    pub fn decode(value_type: ValueType, s: &str) -> Result<Value> {
        let bad = || {
            Error::InvalidArgument(format!("can't decode {s:?} as {}", value_type.as_ref()))
        };
        match value_type {
            ValueType::Void if s == "null" => Ok(Value::Void),
            ValueType::Void => Err(bad()),
            ValueType::Bool => match s {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err(bad()),
            },
            ValueType::Long => s.parse().map(Value::Long).map_err(|_| bad()),
            ValueType::String => Ok(Value::String(decode_line(s))),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            Value::Long(l) => Some(*l),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Void => write!(f, "void"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Long(l) => write!(f, "{l}"),
            Value::String(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(l: i64) -> Self {
        Value::Long(l)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

/// Encode a parameter list as comma-separated type tags and values.
pub fn encode_params(params: &[Value]) -> (String, String) {
    (
        params
            .iter()
            .map(|v| <&'static str>::from(v.value_type()))
            .join(","),
        params.iter().map(Value::encode).join(","),
    )
}

/// Decode a parameter list produced by [encode_params].
pub fn decode_params(types: &str, values: &str) -> Result<Vec<Value>> {
    if types.is_empty() && values.is_empty() {
        return Ok(Vec::new());
    }
    let types: Vec<&str> = types.split(',').collect();
    let values: Vec<&str> = values.split(',').collect();
    if types.len() != values.len() {
        return Err(Error::InvalidArgument(format!(
            "{} parameter types but {} values",
            types.len(),
            values.len()
        )));
    }
    types
        .into_iter()
        .zip(values)
        .map(|(t, v)| {
            let value_type = t
                .parse()
                .map_err(|_| Error::InvalidArgument(format!("unknown parameter type {t:?}")))?;
            Value::decode(value_type, v)
        })
        .collect()
}
