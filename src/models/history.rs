use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An event for the server's update history: something is pending, was
/// installed, was removed, or failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateHistoryItem {
    pub name: String,
    pub update_type: UpdateType,
    pub status: HistoryStatus,
    pub version: String,
    /// When a pending item was observed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,
    /// When an install or removal actually happened.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recorded: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UpdateType {
    ThirdParty,
    Apple,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HistoryStatus {
    Pending,
    Error,
    Install,
    Removal,
}

/// A message surfaced by the inspected subsystem during its last run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub message_type: MessageType,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MessageType {
    Errors,
    Warnings,
}

impl MessageType {
    /// The report key the messages are read from.
    pub fn report_key(&self) -> &'static str {
        match self {
            Self::Errors => "Errors",
            Self::Warnings => "Warnings",
        }
    }
}
