use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ModuleSection;

/// Everything gathered for submission, keyed by module name.
///
/// Keys are unique; inserting under an existing name replaces that section
/// as a whole. Serializes as a plain JSON object.
///
/// Sections are kept as raw JSON. Any executable in the modules directory
/// may write one, so a section is only interpreted as a [`ModuleSection`]
/// on request, and a section of some other shape never affects the rest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckinDocument(BTreeMap<String, Value>);

impl CheckinDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Typed view of a section. `None` when it is absent or does not follow
    /// the conventional section layout.
    pub fn section(&self, name: &str) -> Option<ModuleSection> {
        self.get(name)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    /// Insert or replace a section, returning the previous one.
    pub fn insert(&mut self, name: impl Into<String>, section: Value) -> Option<Value> {
        self.0.insert(name.into(), section)
    }

    /// Insert a built section, converting it to JSON first.
    pub fn insert_section(
        &mut self,
        name: impl Into<String>,
        section: &ModuleSection,
    ) -> Result<Option<Value>, serde_json::Error> {
        Ok(self.insert(name, serde_json::to_value(section)?))
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.0.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// A free-form string value from one section, e.g. the machine serial.
    pub fn section_str(&self, section: &str, key: &str) -> Option<&str> {
        self.get(section)
            .and_then(|s| s.get(key))
            .and_then(Value::as_str)
    }
}
