//! Typed values exchanged with command handlers.

use serde::{Deserialize, Serialize};

use crate::enum_from_str;

/// Type tag of a parameter slot or return value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    #[default]
    Unit,
    Boolean,
    Integer,
    Float,
    String,
    Binary,
    Json,
    /// Accepts any value.
    Any,
}

enum_from_str!(ValueType, [
    Unit => "unit",
    Boolean => "boolean",
    Integer => "integer",
    Float => "float",
    String => "string",
    Binary => "binary",
    Json => "json",
    Any => "any",
]);

impl ValueType {
    /// Whether `value` satisfies this type tag. No implicit conversions.
    pub fn accepts(self, value: &CommandValue) -> bool {
        self == ValueType::Any || value.value_type() == self
    }
}

/// A command argument or return value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandValue {
    #[default]
    Unit,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Binary(Vec<u8>),
    Json(serde_json::Value),
}

impl CommandValue {
    pub fn value_type(&self) -> ValueType {
        match self {
            CommandValue::Unit => ValueType::Unit,
            CommandValue::Boolean(_) => ValueType::Boolean,
            CommandValue::Integer(_) => ValueType::Integer,
            CommandValue::Float(_) => ValueType::Float,
            CommandValue::String(_) => ValueType::String,
            CommandValue::Binary(_) => ValueType::Binary,
            CommandValue::Json(_) => ValueType::Json,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            CommandValue::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            CommandValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CommandValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            CommandValue::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            CommandValue::Binary(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            CommandValue::Json(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_unit(&self) -> bool {
        matches!(self, CommandValue::Unit)
    }
}

impl From<()> for CommandValue {
    fn from(_: ()) -> Self {
        Self::Unit
    }
}

impl From<bool> for CommandValue {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<i64> for CommandValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<f64> for CommandValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<String> for CommandValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for CommandValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<Vec<u8>> for CommandValue {
    fn from(v: Vec<u8>) -> Self {
        Self::Binary(v)
    }
}

impl From<serde_json::Value> for CommandValue {
    fn from(v: serde_json::Value) -> Self {
        Self::Json(v)
    }
}
