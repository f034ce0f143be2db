//! Human-readable machine model names.
//!
//! Looking a model name up costs a network round trip, so the last answer is
//! kept in a small JSON file holding a single `{key: model}` entry, keyed by
//! the hardware UDID. A file written for any other key is a miss and gets
//! replaced on the next successful lookup.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, info};

pub const DEFAULT_CACHE_PATH: &str = "/usr/local/sal/model_cache.json";

/// Overrides [`DEFAULT_CACHE_PATH`] for module processes.
pub const MODEL_CACHE_ENV: &str = "CHECKIN_MODEL_CACHE_PATH";

const LOOKUP_URL: &str = "https://support-sp.apple.com/sp/product";
const LOOKUP_TIMEOUT: Duration = Duration::from_secs(8);

#[derive(Debug, Clone)]
pub struct ModelCache {
    path: PathBuf,
}

impl ModelCache {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The cached model for `key`, if the file holds exactly that key.
    pub fn get(&self, key: &str) -> Option<String> {
        let content = std::fs::read_to_string(&self.path).ok()?;
        let entries: BTreeMap<String, String> = serde_json::from_str(&content).ok()?;
        if entries.len() != 1 {
            return None;
        }
        entries.get(key).cloned()
    }

    /// Replace the cache contents with one entry.
    pub fn put(&self, key: &str, model: &str) -> Result<()> {
        let entries = BTreeMap::from([(key, model)]);
        let content = serde_json::to_string(&entries)?;
        std::fs::write(&self.path, content)
            .with_context(|| format!("Failed to write {}", self.path.display()))
    }
}

/// Where model names come from when the cache misses.
#[async_trait]
pub trait ModelLookup: Send + Sync {
    async fn lookup(&self, model_code: &str) -> Result<Option<String>>;
}

/// Apple's public serial-suffix lookup service.
#[derive(Debug, Clone, Default)]
pub struct AppleModelLookup {
    client: reqwest::Client,
}

#[async_trait]
impl ModelLookup for AppleModelLookup {
    async fn lookup(&self, model_code: &str) -> Result<Option<String>> {
        let body = self
            .client
            .get(LOOKUP_URL)
            .query(&[("cc", model_code), ("lang", "en_US")])
            .timeout(LOOKUP_TIMEOUT)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(parse_config_code(&body))
    }
}

pub struct ModelNameResolver {
    cache: ModelCache,
    lookup: Box<dyn ModelLookup>,
}

impl ModelNameResolver {
    pub fn new(cache: ModelCache, lookup: Box<dyn ModelLookup>) -> Self {
        Self { cache, lookup }
    }

    /// Friendly model name for this machine. `udid` keys the cache; without
    /// one the model code derived from the serial is used instead.
    pub async fn resolve(&self, serial: &str, udid: Option<&str>) -> Option<String> {
        let code = model_code(serial)?.to_uppercase();
        let key = udid.unwrap_or(&code);

        if let Some(model) = self.cache.get(key) {
            debug!("Model name for {} served from cache", key);
            return Some(cleanup_model(&model));
        }

        info!("Looking up model code {}", code);
        let model = match self.lookup.lookup(&code).await {
            Ok(Some(model)) => model,
            Ok(None) => return None,
            Err(e) => {
                debug!("Model lookup for {} failed: {:#}", code, e);
                return None;
            }
        };

        if let Err(e) = self.cache.put(key, &model) {
            debug!("Could not cache model name: {:#}", e);
        }
        Some(cleanup_model(&model))
    }
}

/// The model-identifying suffix of a serial number.
pub fn model_code(serial: &str) -> Option<String> {
    // Placeholder serials on logic-board replacements.
    if serial.to_lowercase().contains("serial") {
        return None;
    }

    let serial = match serial.len() {
        12 => serial,
        // Barcode scans carry a leading S.
        13 => serial.strip_prefix('S').unwrap_or(serial),
        _ => return None,
    };
    serial.get(8..).map(str::to_string)
}

pub fn cleanup_model(model: &str) -> String {
    static INCH: OnceLock<Regex> = OnceLock::new();
    let inch = INCH.get_or_init(|| Regex::new(r"inch ? ").expect("valid regex"));

    let cleaned = inch.replace_all(model, "inch, ");
    cleaned.replace("  ", " ")
}

fn parse_config_code(body: &str) -> Option<String> {
    static CONFIG_CODE: OnceLock<Regex> = OnceLock::new();
    let re = CONFIG_CODE
        .get_or_init(|| Regex::new(r"<configCode>([^<]*)</configCode>").expect("valid regex"));

    re.captures(body)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|m| !m.is_empty())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use tempfile::tempdir;

    use super::*;

    struct CountingLookup {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ModelLookup for CountingLookup {
        async fn lookup(&self, _model_code: &str) -> Result<Option<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Some("MacBook Pro (13-inch 2020)".to_string()))
        }
    }

    #[test]
    fn model_code_from_serials() {
        assert_eq!(model_code("C02ABC12MD6T"), Some("MD6T".to_string()));
        assert_eq!(model_code("SC02ABC12MD6T"), Some("MD6T".to_string()));
        assert_eq!(model_code("W8812345"), None);
        assert_eq!(model_code("SystemSerialNumb"), None);
    }

    #[test]
    fn cleanup_fixes_inch_spacing() {
        assert_eq!(
            cleanup_model("MacBook Pro (15-inch  Mid 2015)"),
            "MacBook Pro (15-inch, Mid 2015)"
        );
    }

    #[test]
    fn parses_config_code() {
        let body = "<root><name>CPU Name</name><configCode>iMac (27-inch, 2020)</configCode></root>";
        assert_eq!(
            parse_config_code(body),
            Some("iMac (27-inch, 2020)".to_string())
        );
        assert_eq!(parse_config_code("<root></root>"), None);
    }

    #[test]
    fn cache_holds_a_single_entry() -> Result<()> {
        let dir = tempdir()?;
        let cache = ModelCache::open(dir.path().join("model_cache.json"));

        cache.put("UDID-1", "iMac")?;
        assert_eq!(cache.get("UDID-1"), Some("iMac".to_string()));

        cache.put("UDID-2", "Mac mini")?;
        assert_eq!(cache.get("UDID-1"), None);
        assert_eq!(cache.get("UDID-2"), Some("Mac mini".to_string()));
        Ok(())
    }

    #[tokio::test]
    async fn resolver_only_looks_up_on_cache_miss() -> Result<()> {
        let dir = tempdir()?;
        let calls = Arc::new(AtomicUsize::new(0));
        let resolver = ModelNameResolver::new(
            ModelCache::open(dir.path().join("model_cache.json")),
            Box::new(CountingLookup {
                calls: calls.clone(),
            }),
        );

        let first = resolver.resolve("C02ABC12MD6T", Some("UDID-1")).await;
        let second = resolver.resolve("C02ABC12MD6T", Some("UDID-1")).await;
        let other_machine = resolver.resolve("C02ABC12MD6T", Some("UDID-2")).await;

        assert_eq!(first, Some("MacBook Pro (13-inch, 2020)".to_string()));
        assert_eq!(second, first);
        assert_eq!(other_machine, first);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        Ok(())
    }
}
