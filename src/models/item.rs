use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A package, profile or update the server tracks per machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagedItem {
    /// Display name, when it differs from the key the item is stored under.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// When this state was observed (UTC).
    pub date_managed: DateTime<Utc>,
    pub status: ManagedItemStatus,
    /// Arbitrary additional information; package manager items carry a `type`.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub data: Map<String, Value>,
}

impl ManagedItem {
    pub fn new(status: ManagedItemStatus, date_managed: DateTime<Utc>) -> Self {
        Self {
            name: None,
            date_managed,
            status,
            data: Map::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_data(mut self, data: Map<String, Value>) -> Self {
        self.data = data;
        self
    }
}

/// The state of a managed item.
///
/// - `Present`: installed
/// - `Absent`: not installed (or removed)
/// - `Pending`: an install or removal is waiting to happen
/// - `Error`: the last install or removal attempt failed
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ManagedItemStatus {
    Present,
    Absent,
    Pending,
    Error,
}

impl ManagedItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Present => "PRESENT",
            Self::Absent => "ABSENT",
            Self::Pending => "PENDING",
            Self::Error => "ERROR",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "PRESENT" => Some(Self::Present),
            "ABSENT" => Some(Self::Absent),
            "PENDING" => Some(Self::Pending),
            "ERROR" => Some(Self::Error),
            _ => None,
        }
    }
}
