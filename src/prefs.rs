//! Layered preference store.
//!
//! Preferences are looked up by name in a fixed order of layers: environment
//! overrides, managed (forced) preferences, root's preferences, the system
//! preferences file, and finally built-in defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::value::PlistValue;

/// Preference domain of the check-in client.
pub const DOMAIN: &str = "com.github.salopensource.sal";

/// Preference domain of the package manager.
pub const PACKAGE_MANAGER_DOMAIN: &str = "ManagedInstalls";

pub const DEFAULT_MANAGED_INSTALL_DIR: &str = "/Library/Managed Installs";

const ENV_PREFIX: &str = "CHECKIN_";

const REPORTED_PREFS: &[&str] = &[
    "ServerURL",
    "key",
    "BasicAuth",
    "SyncScripts",
    "SkipFacts",
    "CACert",
    "SendOfflineReport",
    "SSLClientCertificate",
    "SSLClientKey",
    "MessageBlacklistPatterns",
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Required preference \"{0}\" is not set.")]
    Missing(&'static str),
}

/// One layer of preferences.
pub trait PreferenceSource: Send + Sync {
    fn get(&self, name: &str) -> Option<PlistValue>;

    /// Values from this layer cannot be changed locally.
    fn is_forced(&self) -> bool {
        false
    }
}

/// Overrides from `CHECKIN_<name>` environment variables.
#[derive(Debug, Default)]
pub struct EnvSource;

impl PreferenceSource for EnvSource {
    fn get(&self, name: &str) -> Option<PlistValue> {
        let raw = std::env::var(format!("{}{}", ENV_PREFIX, name)).ok()?;
        Some(match raw.to_ascii_lowercase().as_str() {
            "true" | "yes" => PlistValue::Boolean(true),
            "false" | "no" => PlistValue::Boolean(false),
            _ => PlistValue::String(raw),
        })
    }
}

/// A preferences plist on disk, read once when the store is built.
#[derive(Debug)]
pub struct PlistFileSource {
    path: PathBuf,
    values: BTreeMap<String, PlistValue>,
    forced: bool,
}

impl PlistFileSource {
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let values = match PlistValue::from_file(&path) {
            Ok(PlistValue::Dictionary(values)) => values,
            Ok(_) => BTreeMap::new(),
            Err(e) => {
                debug!("No preferences read from {}: {}", path.display(), e);
                BTreeMap::new()
            }
        };
        Self {
            path,
            values,
            forced: false,
        }
    }

    pub fn forced(mut self) -> Self {
        self.forced = true;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PreferenceSource for PlistFileSource {
    fn get(&self, name: &str) -> Option<PlistValue> {
        self.values.get(name).cloned()
    }

    fn is_forced(&self) -> bool {
        self.forced
    }
}

/// A fixed set of values, used for defaults and in tests.
#[derive(Debug, Default, Clone)]
pub struct StaticSource {
    values: BTreeMap<String, PlistValue>,
    forced: bool,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: impl Into<PlistValue>) -> Self {
        self.values.insert(name.to_string(), value.into());
        self
    }

    pub fn forced(mut self) -> Self {
        self.forced = true;
        self
    }
}

impl PreferenceSource for StaticSource {
    fn get(&self, name: &str) -> Option<PlistValue> {
        self.values.get(name).cloned()
    }

    fn is_forced(&self) -> bool {
        self.forced
    }
}

/// Connection settings every submission needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerPrefs {
    /// Server URL without a trailing slash.
    pub server_url: String,
    pub name_type: String,
    /// Business-unit key.
    pub key: String,
}

/// A preference value and whether it was forced by management.
#[derive(Debug, Clone, Serialize)]
pub struct ReportedPref {
    pub value: Value,
    pub forced: bool,
}

pub struct Preferences {
    layers: Vec<Box<dyn PreferenceSource>>,
    defaults: BTreeMap<&'static str, PlistValue>,
}

impl Preferences {
    /// Layers in precedence order; no built-in defaults.
    pub fn new(layers: Vec<Box<dyn PreferenceSource>>) -> Self {
        Self {
            layers,
            defaults: BTreeMap::new(),
        }
    }

    /// The client's own preferences as resolved on this machine.
    pub fn load() -> Self {
        Self::load_domain(DOMAIN).with_defaults(default_prefs())
    }

    /// The package manager's preferences.
    pub fn load_package_manager() -> Self {
        Self::load_domain(PACKAGE_MANAGER_DOMAIN)
    }

    fn load_domain(domain: &str) -> Self {
        let file = format!("{}.plist", domain);
        Self::new(vec![
            Box::new(EnvSource),
            Box::new(
                PlistFileSource::load(Path::new("/Library/Managed Preferences").join(&file))
                    .forced(),
            ),
            Box::new(PlistFileSource::load(
                Path::new("/var/root/Library/Preferences").join(&file),
            )),
            Box::new(PlistFileSource::load(
                Path::new("/Library/Preferences").join(&file),
            )),
        ])
    }

    pub fn with_defaults(mut self, defaults: BTreeMap<&'static str, PlistValue>) -> Self {
        self.defaults = defaults;
        self
    }

    /// Resolve `name`. An explicit `default` takes precedence over the
    /// built-in defaults.
    pub fn get(&self, name: &str, default: Option<PlistValue>) -> Option<PlistValue> {
        self.layers
            .iter()
            .find_map(|layer| layer.get(name))
            .or(default)
            .or_else(|| self.defaults.get(name).cloned())
    }

    pub fn get_str(&self, name: &str) -> Option<String> {
        match self.get(name, None)? {
            PlistValue::String(s) if !s.is_empty() => Some(s),
            _ => None,
        }
    }

    pub fn get_bool(&self, name: &str, default: bool) -> bool {
        self.get(name, None)
            .and_then(|v| v.as_bool())
            .unwrap_or(default)
    }

    /// Whether the value in effect comes from a forced layer.
    pub fn forced(&self, name: &str) -> bool {
        self.layers
            .iter()
            .find(|layer| layer.get(name).is_some())
            .map(|layer| layer.is_forced())
            .unwrap_or(false)
    }

    pub fn server_prefs(&self) -> Result<ServerPrefs, ConfigError> {
        let key = self.get_str("key").ok_or(ConfigError::Missing("key"))?;
        let server_url = self
            .get_str("ServerURL")
            .map(|url| url.trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty())
            .ok_or(ConfigError::Missing("ServerURL"))?;
        let name_type = self
            .get_str("NameType")
            .unwrap_or_else(|| "ComputerName".to_string());

        Ok(ServerPrefs {
            server_url,
            name_type,
            key,
        })
    }

    /// Facts that must not be reported.
    pub fn skip_facts(&self) -> Vec<String> {
        PlistValue::items(self.get("SkipFacts", None).as_ref())
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect()
    }

    pub fn managed_install_dir(&self) -> PathBuf {
        self.get_str("ManagedInstallDir")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_MANAGED_INSTALL_DIR))
    }

    /// Current values of the settings that matter for troubleshooting.
    pub fn report(&self) -> BTreeMap<&'static str, ReportedPref> {
        REPORTED_PREFS
            .iter()
            .map(|name| {
                let value = self
                    .get(name, None)
                    .map(|v| v.to_json())
                    .unwrap_or(Value::Null);
                (
                    *name,
                    ReportedPref {
                        value,
                        forced: self.forced(name),
                    },
                )
            })
            .collect()
    }
}

pub fn default_prefs() -> BTreeMap<&'static str, PlistValue> {
    BTreeMap::from([
        ("ServerURL", PlistValue::from("http://sal")),
        ("osquery_launchd", PlistValue::from("com.facebook.osqueryd.plist")),
        ("SkipFacts", PlistValue::Array(Vec::new())),
        ("SyncScripts", PlistValue::Boolean(true)),
        ("BasicAuth", PlistValue::Boolean(true)),
        ("GetGrains", PlistValue::Boolean(false)),
        ("GetOhai", PlistValue::Boolean(false)),
        ("LastRunWasOffline", PlistValue::Boolean(false)),
        ("SendOfflineReport", PlistValue::Boolean(false)),
    ])
}
