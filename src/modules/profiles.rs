//! Installed configuration profiles.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use super::command::run;
use super::{CheckinModule, ModuleContext};
use crate::models::{ManagedItem, ManagedItemStatus, ModuleSection};
use crate::value::PlistValue;

pub const SECTION: &str = "Profiles";
pub const PROFILES_COMMAND: &str = "/usr/bin/profiles";
const VERSION: &str = "1.0.0";

/// Export computer-level profiles as plist bytes via a scratch directory
/// that is removed again before returning.
pub async fn export_profiles(command: &str) -> Result<Vec<u8>> {
    let scratch = tempfile::tempdir().context("Failed to create scratch directory")?;
    let out = scratch.path().join("profiles.plist");
    let out_arg = out.to_string_lossy().into_owned();

    let output = run(command, &["-C", "-o", out_arg.as_str()]).await?;
    if !output.success() {
        bail!("{} exited with {:?}", command, output.status);
    }
    std::fs::read(&out).with_context(|| format!("No profile output at {}", out.display()))
}

#[derive(Debug)]
pub struct ProfilesModule {
    command: PathBuf,
}

impl Default for ProfilesModule {
    fn default() -> Self {
        Self {
            command: PathBuf::from(PROFILES_COMMAND),
        }
    }
}

#[async_trait]
impl CheckinModule for ProfilesModule {
    fn name(&self) -> &'static str {
        SECTION
    }

    async fn collect(&self, ctx: &ModuleContext) -> Result<Option<ModuleSection>> {
        let profiles = match export_profiles(&self.command.to_string_lossy()).await {
            Ok(bytes) => PlistValue::from_slice(&bytes).unwrap_or_else(|_| PlistValue::empty_dict()),
            Err(e) => {
                tracing::debug!("Could not export profiles: {:#}", e);
                PlistValue::empty_dict()
            }
        };
        Ok(Some(ProfilesModule::section_from_profiles(&profiles, ctx.now)))
    }
}

impl ProfilesModule {
    pub fn section_from_profiles(profiles: &PlistValue, now: DateTime<Utc>) -> ModuleSection {
        let mut section = ModuleSection::new();
        section.facts.insert("checkin_module_version", VERSION);

        for profile in PlistValue::items(profiles.get("_computerlevel")) {
            let Some(name) = profile.get("ProfileDisplayName").and_then(PlistValue::as_str) else {
                continue;
            };
            let field = |key: &str| profile.get(key).map(PlistValue::to_json);
            let text = |key: &str| field(key).unwrap_or_else(|| Value::from(""));

            let mut data = Map::new();
            data.insert(
                "profile_items".into(),
                field("ProfileItems").unwrap_or_else(|| Value::Array(Vec::new())),
            );
            data.insert("profile_description".into(), text("ProfileDescription"));
            data.insert("identifier".into(), text("ProfileIdentifier"));
            data.insert("organization".into(), text("ProfileOrganization"));
            data.insert("uuid".into(), text("ProfileUUID"));
            data.insert("verification_state".into(), text("ProfileVerificationState"));

            let installed = profile
                .get("ProfileInstallDate")
                .and_then(PlistValue::as_date)
                .unwrap_or(now);

            section.managed_items.insert(
                name.to_string(),
                ManagedItem::new(ManagedItemStatus::Present, installed)
                    .with_name(name)
                    .with_data(data),
            );
        }

        section
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;

    const PROFILES: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<plist version="1.0">
<dict>
    <key>_computerlevel</key>
    <array>
        <dict>
            <key>ProfileDisplayName</key>
            <string>Wi-Fi</string>
            <key>ProfileIdentifier</key>
            <string>com.example.wifi</string>
            <key>ProfileInstallDate</key>
            <string>2024-01-15 08:30:00 +0000</string>
            <key>ProfileOrganization</key>
            <string>Example Corp</string>
            <key>ProfileUUID</key>
            <string>6C1A2B3C-0000-4000-8000-000000000001</string>
            <key>ProfileItems</key>
            <array/>
        </dict>
    </array>
</dict>
</plist>"#;

    #[test]
    fn maps_computer_level_profiles_to_managed_items() {
        let profiles = PlistValue::from_slice(PROFILES.as_bytes()).unwrap();
        let section = ProfilesModule::section_from_profiles(&profiles, Utc::now());

        let item = &section.managed_items["Wi-Fi"];
        assert_eq!(item.status, ManagedItemStatus::Present);
        assert_eq!(
            item.date_managed,
            Utc.with_ymd_and_hms(2024, 1, 15, 8, 30, 0).unwrap()
        );
        assert_eq!(item.data["identifier"], json!("com.example.wifi"));
        assert_eq!(item.data["profile_description"], json!(""));
    }

    #[test]
    fn no_profiles_still_reports_the_module_version() {
        let section = ProfilesModule::section_from_profiles(&PlistValue::empty_dict(), Utc::now());
        assert!(section.managed_items.is_empty());
        assert_eq!(section.facts.len(), 1);
    }
}
