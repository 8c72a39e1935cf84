//! Variable descriptors reported by the list operation.

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Coarse semantic classification of a context value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeType {
    Null,
    Boolean,
    Number,
    String,
    Array,
    Object,
}

/// Metadata record for one context entry.
///
/// Derived on every list call, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableDescriptor {
    /// Always `"Variable"`.
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub programming_language: String,
    pub native_type: String,
    pub node_type: NodeType,
    /// The value itself for scalars, a length for strings and collections.
    pub value_hint: Option<Value>,
}

impl VariableDescriptor {
    /// Describe a binding.
    pub fn describe(name: impl Into<String>, language: impl Into<String>, value: &Value) -> Self {
        let (node_type, value_hint) = classify(value);
        Self {
            kind: "Variable".to_string(),
            name: name.into(),
            programming_language: language.into(),
            native_type: value.type_name().to_string(),
            node_type,
            value_hint,
        }
    }
}

/// Classify a value and compute its hint.
///
/// Strings hint their character count, arrays their element count, and
/// objects their key count. Opaque values fall back to `Object` with no hint.
pub fn classify(value: &Value) -> (NodeType, Option<Value>) {
    match value {
        Value::Null => (NodeType::Null, None),
        Value::Bool(b) => (NodeType::Boolean, Some(Value::Bool(*b))),
        Value::Int(i) => (NodeType::Number, Some(Value::Int(*i))),
        Value::UInt(u) => (NodeType::Number, Some(Value::UInt(*u))),
        Value::Float(f) => (NodeType::Number, Some(Value::Float(*f))),
        Value::String(s) => (NodeType::String, Some(count(s.chars().count()))),
        Value::Array(items) => (NodeType::Array, Some(count(items.len()))),
        Value::Object(map) => (NodeType::Object, Some(count(map.len()))),
        Value::Builtin(_) => (NodeType::Object, None),
    }
}

fn count(n: usize) -> Value {
    Value::Int(i64::try_from(n).unwrap_or(i64::MAX))
}
