//! The package manager's last run, from its `ManagedInstallReport.plist`.

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;

use super::{dict_to_json, CheckinModule, ModuleContext};
use crate::models::{
    HistoryStatus, ManagedItem, ManagedItemStatus, MergePolicy, Message, MessageType,
    ModuleSection, UpdateHistoryItem, UpdateType,
};
use crate::value::PlistValue;

pub const SECTION: &str = "munki";
const VERSION: &str = "1.1.0";
const REPORT_FILE: &str = "ManagedInstallReport.plist";
const DEFAULT_RUN_TYPE: &str = "custom";

/// Read the report, or an empty dictionary when it can't be read (for
/// instance because the package manager never ran).
pub fn read_managed_install_report(managed_install_dir: &Path) -> PlistValue {
    let path = managed_install_dir.join(REPORT_FILE);
    match PlistValue::from_file(&path) {
        Ok(report @ PlistValue::Dictionary(_)) => report,
        Ok(_) => PlistValue::empty_dict(),
        Err(e) => {
            debug!("Could not read {}: {}", path.display(), e);
            PlistValue::empty_dict()
        }
    }
}

#[derive(Debug, Default)]
pub struct MunkiModule;

#[async_trait]
impl CheckinModule for MunkiModule {
    fn name(&self) -> &'static str {
        SECTION
    }

    /// Install and removal results survive failed submissions.
    fn merge_policy(&self) -> MergePolicy {
        MergePolicy::MergeWithPrior
    }

    async fn collect(&self, ctx: &ModuleContext) -> Result<Option<ModuleSection>> {
        let report = read_managed_install_report(&ctx.managed_install_dir);
        Ok(Some(MunkiModule::section_from_report(&report, ctx.now)))
    }
}

impl MunkiModule {
    pub fn section_from_report(report: &PlistValue, now: DateTime<Utc>) -> ModuleSection {
        let mut section = ModuleSection::new();
        section.facts.insert("checkin_module_version", VERSION);

        let machine_info = report.get("MachineInfo");
        if let Some(version) = machine_info
            .and_then(|m| m.get("munki_version"))
            .and_then(PlistValue::as_str)
        {
            section.set("munki_version", version);
        }
        if let Some(manifest) = report.get("ManifestName").and_then(PlistValue::as_str) {
            section.set("manifest", manifest);
        }
        section.set(
            "runtype",
            report
                .get("RunType")
                .and_then(PlistValue::as_str)
                .unwrap_or(DEFAULT_RUN_TYPE),
        );

        if let Some(conditions) = report.get("Conditions").and_then(PlistValue::as_dict) {
            for (condition, value) in conditions {
                section.facts.insert_plist(condition.clone(), value);
            }
        }

        for message_type in [MessageType::Errors, MessageType::Warnings] {
            for msg in PlistValue::items(report.get(message_type.report_key())) {
                if let Some(text) = msg.as_str() {
                    section.messages.push(Message {
                        message_type,
                        message: text.to_string(),
                    });
                }
            }
        }

        add_managed_installs(&mut section, report, now);
        add_managed_uninstalls(&mut section, report, now);
        add_apple_updates(&mut section, report, now);
        add_results(&mut section, report, now);

        section
    }
}

fn add_managed_installs(section: &mut ModuleSection, report: &PlistValue, now: DateTime<Utc>) {
    for item in PlistValue::items(report.get("ManagedInstalls")) {
        let Some(name) = item.get("name").and_then(PlistValue::as_str) else {
            continue;
        };
        let installed = item
            .get("installed")
            .and_then(PlistValue::as_bool)
            .unwrap_or(false);

        let (status, version) = if installed {
            (
                ManagedItemStatus::Present,
                str_field(item, "installed_version").or_else(|| str_field(item, "version_to_install")),
            )
        } else {
            (
                ManagedItemStatus::Pending,
                str_field(item, "version_to_install"),
            )
        };

        let mut data = dict_to_json(item, &["name", "installed"]);
        data.insert("type".into(), Value::from("ManagedInstalls"));

        let key = versioned_key(name, version);
        section.managed_items.insert(
            key.clone(),
            ManagedItem::new(status, now)
                .with_name(key)
                .with_data(data),
        );

        if !installed {
            section.update_history.push(UpdateHistoryItem {
                name: name.to_string(),
                update_type: UpdateType::ThirdParty,
                status: HistoryStatus::Pending,
                version: version.unwrap_or("0").to_string(),
                date: Some(now),
                recorded: None,
                extra: None,
            });
        }
    }
}

fn add_managed_uninstalls(section: &mut ModuleSection, report: &PlistValue, now: DateTime<Utc>) {
    for item in PlistValue::items(report.get("ManagedUninstalls")) {
        let Some(name) = item.get("name").and_then(PlistValue::as_str) else {
            continue;
        };
        let still_installed = item
            .get("installed")
            .and_then(PlistValue::as_bool)
            .unwrap_or(false);
        let status = if still_installed {
            ManagedItemStatus::Pending
        } else {
            ManagedItemStatus::Absent
        };

        let mut data = dict_to_json(item, &["name", "installed"]);
        data.insert("type".into(), Value::from("ManagedUninstalls"));

        let key = versioned_key(name, str_field(item, "installed_version"));
        section.managed_items.insert(
            key.clone(),
            ManagedItem::new(status, now)
                .with_name(key)
                .with_data(data),
        );
    }
}

fn add_apple_updates(section: &mut ModuleSection, report: &PlistValue, now: DateTime<Utc>) {
    for item in PlistValue::items(report.get("AppleUpdates")) {
        let Some(name) = item.get("name").and_then(PlistValue::as_str) else {
            continue;
        };
        section.update_history.push(UpdateHistoryItem {
            name: name.to_string(),
            update_type: UpdateType::Apple,
            status: HistoryStatus::Pending,
            version: str_field(item, "version_to_install")
                .unwrap_or("0")
                .to_string(),
            date: Some(now),
            recorded: None,
            extra: str_field(item, "productKey").map(str::to_string),
        });
    }
}

/// InstallResults and RemovalResults become both history events and the
/// current state of the items they touched.
fn add_results(section: &mut ModuleSection, report: &PlistValue, now: DateTime<Utc>) {
    let kinds = [
        ("InstallResults", HistoryStatus::Install, ManagedItemStatus::Present),
        ("RemovalResults", HistoryStatus::Removal, ManagedItemStatus::Absent),
    ];

    for (report_key, done, done_status) in kinds {
        for item in PlistValue::items(report.get(report_key)) {
            let Some(name) = item.get("name").and_then(PlistValue::as_str) else {
                continue;
            };
            let version = str_field(item, "version").unwrap_or("0");
            let failed = item.get("status").and_then(PlistValue::as_i64) != Some(0);
            let recorded = item.get("time").and_then(PlistValue::as_date);
            let apple = item
                .get("applesus")
                .and_then(PlistValue::as_bool)
                .unwrap_or(false);

            section.update_history.push(UpdateHistoryItem {
                name: name.to_string(),
                update_type: if apple {
                    UpdateType::Apple
                } else {
                    UpdateType::ThirdParty
                },
                status: if failed { HistoryStatus::Error } else { done },
                version: version.to_string(),
                date: None,
                recorded,
                extra: None,
            });

            let status = if failed {
                ManagedItemStatus::Error
            } else {
                done_status
            };
            let mut data = dict_to_json(item, &["name", "status", "time"]);
            data.insert("type".into(), Value::from(report_key));

            let key = versioned_key(name, Some(version));
            section.managed_items.insert(
                key.clone(),
                ManagedItem::new(status, recorded.unwrap_or(now))
                    .with_name(key)
                    .with_data(data),
            );
        }
    }
}

fn str_field<'a>(item: &'a PlistValue, key: &str) -> Option<&'a str> {
    item.get(key)
        .and_then(PlistValue::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Items are tracked per version so an upgrade shows up as a new item.
fn versioned_key(name: &str, version: Option<&str>) -> String {
    match version {
        Some(version) => format!("{} {}", name, version),
        None => name.to_string(),
    }
}
