//! Apple software update state.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::OnceLock;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDateTime, SecondsFormat, Utc};
use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

use super::command::{run, stdout_of};
use super::{CheckinModule, ModuleContext};
use crate::models::{ManagedItem, ManagedItemStatus, ModuleSection};
use crate::value::PlistValue;

pub const SECTION: &str = "Apple Software Update";
const VERSION: &str = "1.0.1";

const SOFTWAREUPDATE: &str = "/usr/sbin/softwareupdate";
const INSTALL_LOG: &str = "/var/log/install.log";
const INSTALL_HISTORY: &str = "/Library/Receipts/InstallHistory.plist";

#[derive(Debug)]
pub struct AppleSusModule {
    install_log: PathBuf,
    install_history: PathBuf,
}

impl Default for AppleSusModule {
    fn default() -> Self {
        Self {
            install_log: PathBuf::from(INSTALL_LOG),
            install_history: PathBuf::from(INSTALL_HISTORY),
        }
    }
}

#[async_trait]
impl CheckinModule for AppleSusModule {
    fn name(&self) -> &'static str {
        SECTION
    }

    async fn collect(&self, ctx: &ModuleContext) -> Result<Option<ModuleSection>> {
        let mut section = ModuleSection::new();
        section.facts.insert("checkin_module_version", VERSION);

        let log_facts = self.log_facts(ctx.now).await;
        if let Some(catalog) = log_facts.catalog {
            section.facts.insert("catalog", catalog);
        }
        if let Some(last_check) = log_facts.last_check {
            section.facts.insert(
                "last_check",
                last_check.to_rfc3339_opts(SecondsFormat::Secs, true),
            );
        }

        match PlistValue::from_file(&self.install_history) {
            Ok(history) => section.managed_items = install_history_items(&history),
            Err(e) => debug!("No install history: {}", e),
        }

        if let Some(output) = stdout_of(SOFTWAREUPDATE, &["-l", "--no-scan"]).await {
            section
                .managed_items
                .extend(parse_pending_updates(&output, ctx.now));
        }

        Ok(Some(section))
    }
}

impl AppleSusModule {
    /// Ask softwareupdate to write its state to the install log, then read
    /// what it wrote.
    async fn log_facts(&self, now: DateTime<Utc>) -> SusLogFacts {
        match run(SOFTWAREUPDATE, &["--dump-state"]).await {
            Ok(output) if output.success() => {}
            Ok(output) => {
                debug!("softwareupdate --dump-state exited with {:?}", output.status);
                return SusLogFacts::default();
            }
            Err(e) => {
                debug!("{:#}", e);
                return SusLogFacts::default();
            }
        }

        match std::fs::read_to_string(&self.install_log) {
            Ok(log) => scan_install_log(&log, now),
            Err(e) => {
                debug!("Could not read {}: {}", self.install_log.display(), e);
                SusLogFacts::default()
            }
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SusLogFacts {
    pub catalog: Option<String>,
    pub last_check: Option<DateTime<Utc>>,
}

/// Scan the install log newest-first for the catalog URL and the time of
/// the last update scan, ignoring anything logged before `not_before`.
pub fn scan_install_log(log: &str, not_before: DateTime<Utc>) -> SusLogFacts {
    let mut facts = SusLogFacts::default();

    for line in log.lines().rev() {
        let logged_at = log_time(line);
        if matches!(logged_at, Some(t) if t < not_before) {
            break;
        }

        if facts.catalog.is_none() && line.contains("Catalog: http") {
            facts.catalog = line.split_whitespace().last().map(str::to_string);
        } else if facts.last_check.is_none() && line.contains("SUScan: Elapsed scan time = ") {
            facts.last_check = logged_at;
        }

        if facts.catalog.is_some() && facts.last_check.is_some() {
            break;
        }
    }

    facts
}

/// Timestamp of an install.log line, e.g. `2019-02-08 10:49:56-05 host ...`.
/// The offset may carry minutes (`+0530`, `+05:30`).
fn log_time(line: &str) -> Option<DateTime<Utc>> {
    static LOG_TIME: OnceLock<Regex> = OnceLock::new();
    let re = LOG_TIME.get_or_init(|| {
        Regex::new(r"^(\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2})([+-])(\d{2})(?::?(\d{2}))?")
            .expect("valid regex")
    });

    let caps = re.captures(line)?;
    let naive = NaiveDateTime::parse_from_str(&caps[1], "%Y-%m-%d %H:%M:%S").ok()?;
    let hours: i64 = caps[3].parse().ok()?;
    let minutes: i64 = match caps.get(4) {
        Some(m) => m.as_str().parse().ok()?,
        None => 0,
    };
    let offset = hours * 60 + minutes;
    let offset = if &caps[2] == "-" { -offset } else { offset };
    Some((naive - Duration::minutes(offset)).and_utc())
}

/// Updates installed by softwareupdated, from InstallHistory.plist.
pub fn install_history_items(history: &PlistValue) -> BTreeMap<String, ManagedItem> {
    PlistValue::items(Some(history))
        .iter()
        .filter(|i| i.get("processName").and_then(PlistValue::as_str) == Some("softwareupdated"))
        .filter_map(|i| {
            let name = i.get("displayName").and_then(PlistValue::as_str)?;
            let date = i.get("date").and_then(PlistValue::as_date)?;
            let version = i
                .get("displayVersion")
                .and_then(PlistValue::as_str)
                .unwrap_or_default()
                .trim();

            let mut data = Map::new();
            data.insert("type".into(), Value::from("Apple SUS Install"));
            data.insert("version".into(), Value::from(version));

            Some((
                name.to_string(),
                ManagedItem::new(ManagedItemStatus::Present, date).with_data(data),
            ))
        })
        .collect()
}

/// Pending updates listed by `softwareupdate -l`. Both the classic
/// (`* iTunesX-12.8.2`) and labelled (`* Label: macOS ...`) forms are read.
pub fn parse_pending_updates(output: &str, now: DateTime<Utc>) -> BTreeMap<String, ManagedItem> {
    static PENDING: OnceLock<Regex> = OnceLock::new();
    let re = PENDING
        .get_or_init(|| Regex::new(r"^\s*\*\s+(?:Label:\s*)?(.+?)\s*$").expect("valid regex"));

    output
        .lines()
        .filter_map(|line| re.captures(line))
        .map(|caps| {
            (
                caps[1].to_string(),
                ManagedItem::new(ManagedItemStatus::Pending, now),
            )
        })
        .collect()
}
