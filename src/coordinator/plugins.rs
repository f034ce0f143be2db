//! Results external scripts leave behind for the checkin.
//!
//! Scripts append `{plugin, historical, data}` records to a shared plist;
//! the coordinator moves them into the `plugin_results` section and deletes
//! the file so the next cycle starts fresh.

use std::io::ErrorKind;
use std::path::Path;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::value::PlistValue;

pub const DEFAULT_PLUGIN_RESULTS_PATH: &str = "/usr/local/sal/plugin_results.plist";

/// Set on external scripts so they write where the coordinator reads.
pub const PLUGIN_RESULTS_ENV: &str = "CHECKIN_PLUGIN_RESULTS_PATH";

pub const PLUGIN_RESULTS_SECTION: &str = "plugin_results";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PluginResult {
    pub plugin: String,
    /// Keep every submitted record rather than only the latest one.
    pub historical: bool,
    pub data: Value,
}

impl PluginResult {
    fn from_plist(record: &PlistValue) -> Option<Self> {
        let plugin = record.get("plugin").and_then(PlistValue::as_str)?;
        Some(Self {
            plugin: plugin.to_string(),
            historical: record
                .get("historical")
                .and_then(PlistValue::as_bool)
                .unwrap_or(false),
            data: record
                .get("data")
                .map(PlistValue::to_json)
                .unwrap_or_else(|| Value::Object(Default::default())),
        })
    }
}

/// Read the records in `path`. A missing or unreadable file has none, and
/// records without a plugin name are dropped.
pub fn read_plugin_results(path: &Path) -> Vec<PluginResult> {
    if !path.exists() {
        debug!("No external data plist found.");
        return Vec::new();
    }
    let plist = match PlistValue::from_file(path) {
        Ok(plist) => plist,
        Err(e) => {
            debug!("Could not read external data plist: {}", e);
            return Vec::new();
        }
    };

    PlistValue::items(Some(&plist))
        .iter()
        .filter_map(|record| {
            let result = PluginResult::from_plist(record);
            if result.is_none() {
                debug!("Skipping plugin record without a plugin name");
            }
            result
        })
        .collect()
}

/// Read the records, then delete the file whatever it contained.
pub fn take_plugin_results(path: &Path) -> Vec<PluginResult> {
    let results = read_plugin_results(path);
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove {}: {}", path.display(), e),
    }
    results
}
