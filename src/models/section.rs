use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{HistoryStatus, ManagedItem, Message, UpdateHistoryItem};
use crate::value::PlistValue;

/// The sub-document one checkin module contributes to a [`CheckinDocument`].
///
/// The conventional keys are typed; any other top-level key a module reports
/// (`serial`, `runtype`, `key`, ...) lives in `extra` and is flattened back
/// into the section when serialized.
///
/// [`CheckinDocument`]: super::CheckinDocument
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleSection {
    #[serde(default, skip_serializing_if = "Facts::is_empty")]
    pub facts: Facts,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub managed_items: BTreeMap<String, ManagedItem>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub update_history: Vec<UpdateHistoryItem>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<Message>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ModuleSection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a free-form top-level key.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.extra.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(Value::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
            && self.managed_items.is_empty()
            && self.update_history.is_empty()
            && self.messages.is_empty()
            && self.extra.is_empty()
    }

    /// Layer this section on top of an earlier, undelivered one.
    ///
    /// Facts, managed items and free-form keys from `prior` survive unless
    /// this section sets the same key. Update history is cumulative: prior
    /// events come first and identical events are not repeated. Pending
    /// events are recomputed on every run, so only the latest run's are
    /// kept. Messages describe the latest run only and are taken from `self`.
    pub fn merged_onto(mut self, prior: ModuleSection) -> ModuleSection {
        for (name, value) in prior.facts.0 {
            self.facts.0.entry(name).or_insert(value);
        }
        for (name, item) in prior.managed_items {
            self.managed_items.entry(name).or_insert(item);
        }
        for (key, value) in prior.extra {
            if !self.extra.contains_key(&key) {
                self.extra.insert(key, value);
            }
        }

        let mut history: Vec<_> = prior
            .update_history
            .into_iter()
            .filter(|event| event.status != HistoryStatus::Pending)
            .collect();
        for event in self.update_history {
            if !history.contains(&event) {
                history.push(event);
            }
        }
        self.update_history = history;

        self
    }
}

/// How a module's new section combines with whatever it left behind in an
/// undelivered document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergePolicy {
    /// The new section replaces the old one wholesale.
    #[default]
    Replace,
    /// The new section is layered onto the old one with
    /// [`ModuleSection::merged_onto`].
    MergeWithPrior,
}

/// Simple environment and version facts: name to scalar.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Facts(BTreeMap<String, Value>);

impl Facts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(name.into(), value.into());
    }

    /// Insert a value read from a plist. The server only stores text for
    /// list-valued facts, so sequences are joined with `", "`.
    pub fn insert_plist(&mut self, name: impl Into<String>, value: &PlistValue) {
        let value = match value {
            PlistValue::Array(items) => Value::String(
                items
                    .iter()
                    .map(|item| match item {
                        PlistValue::String(s) => s.clone(),
                        other => other.to_json().to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join(", "),
            ),
            PlistValue::Dictionary(_) => Value::String(value.to_json().to_string()),
            scalar => scalar.to_json(),
        };
        self.0.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.0.remove(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ManagedItemStatus, UpdateType};
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn history(name: &str, status: HistoryStatus) -> UpdateHistoryItem {
        UpdateHistoryItem {
            name: name.to_string(),
            update_type: UpdateType::ThirdParty,
            status,
            version: "1.0".to_string(),
            date: None,
            recorded: None,
            extra: None,
        }
    }

    #[test]
    fn list_facts_are_joined() {
        let mut facts = Facts::new();
        facts.insert_plist(
            "catalogs",
            &PlistValue::Array(vec!["production".into(), "testing".into()]),
        );
        facts.insert_plist("on_battery", &PlistValue::Boolean(false));

        assert_eq!(facts.get("catalogs"), Some(&json!("production, testing")));
        assert_eq!(facts.get("on_battery"), Some(&json!(false)));
    }

    #[test]
    fn merge_keeps_prior_keys_and_prefers_new_values() {
        let now = Utc::now();
        let mut prior = ModuleSection::new();
        prior.facts.insert("old", 1);
        prior.facts.insert("shared", "prior");
        prior.set("manifest", "old_manifest");
        prior.managed_items.insert(
            "Firefox 1.0".into(),
            ManagedItem::new(ManagedItemStatus::Pending, now),
        );
        prior.update_history.push(history("Firefox", HistoryStatus::Install));

        let mut next = ModuleSection::new();
        next.facts.insert("shared", "next");
        next.managed_items.insert(
            "Firefox 1.0".into(),
            ManagedItem::new(ManagedItemStatus::Present, now),
        );
        next.update_history.push(history("Firefox", HistoryStatus::Install));
        next.update_history.push(history("Chrome", HistoryStatus::Pending));

        let merged = next.merged_onto(prior);

        assert_eq!(merged.facts.get("old"), Some(&json!(1)));
        assert_eq!(merged.facts.get("shared"), Some(&json!("next")));
        assert_eq!(merged.get_str("manifest"), Some("old_manifest"));
        assert_eq!(
            merged.managed_items["Firefox 1.0"].status,
            ManagedItemStatus::Present
        );
        assert_eq!(merged.update_history.len(), 2);
        assert_eq!(merged.update_history[1].name, "Chrome");
    }

    #[test]
    fn merge_replaces_prior_pending_events() {
        let pending_at = |hour| UpdateHistoryItem {
            date: Some(Utc.with_ymd_and_hms(2024, 3, 2, hour, 0, 0).unwrap()),
            ..history("Firefox", HistoryStatus::Pending)
        };

        let mut prior = ModuleSection::new();
        prior.update_history.push(history("Chrome", HistoryStatus::Install));
        prior.update_history.push(pending_at(9));

        let mut next = ModuleSection::new();
        next.update_history.push(pending_at(10));

        let merged = next.merged_onto(prior);

        assert_eq!(merged.update_history.len(), 2);
        assert_eq!(merged.update_history[0].name, "Chrome");
        assert_eq!(merged.update_history[1], pending_at(10));
    }

    #[test]
    fn free_form_keys_flatten_into_the_section() {
        let mut section = ModuleSection::new();
        section.set("serial", "C02ABC123DEF");
        section.facts.insert("checkin_module_version", "1.0.0");

        let json = serde_json::to_value(&section).unwrap();
        assert_eq!(
            json,
            json!({"serial": "C02ABC123DEF", "facts": {"checkin_module_version": "1.0.0"}})
        );

        let back: ModuleSection = serde_json::from_value(json).unwrap();
        assert_eq!(back, section);
    }
}
