//! The context store: the kernel's persistent variable bindings.
//!
//! One [`Context`] belongs to one kernel instance. It is only ever shared
//! across processes as a JSON snapshot taken at fork time, so parent and
//! forked child never observe each other's mutations.

use std::collections::BTreeMap;
use std::io::Read;

use serde::{Deserialize, Serialize};

use crate::ast::Value;

/// Mapping from variable name to value.
///
/// Iteration order is sorted by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Context {
    vars: BTreeMap<String, Value>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    /// Bind a name, replacing any existing binding.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.vars.insert(name.into(), value);
    }

    /// Unbind a name. Removing an absent name is a no-op.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.vars.remove(name)
    }

    /// All bindings in iteration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Deep copy of the whole store as JSON text.
    pub fn snapshot(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Build a fresh context from JSON text, which must be an object.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Decode exactly one JSON object from the head of a reader.
    ///
    /// Bytes after the closing brace are left unread, so a buffered reader
    /// can go on to serve the task lines that follow.
    pub fn read_from<R: Read>(reader: R) -> Result<Self, serde_json::Error> {
        let mut de = serde_json::Deserializer::from_reader(reader);
        Self::deserialize(&mut de)
    }
}

impl FromIterator<(String, Value)> for Context {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            vars: iter.into_iter().collect(),
        }
    }
}
