use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;
use speculate2::speculate;

use checkin_client::models::*;
use checkin_client::modules::{run_module, CheckinModule, ModuleContext, MunkiModule};
use checkin_client::prefs::{Preferences, StaticSource};
use checkin_client::results::ResultsStore;
use checkin_client::value::PlistValue;

/// What the stand-in module hands back from `collect`.
enum Collected {
    Section(ModuleSection),
    Nothing,
    Failure,
}

struct FixedModule(Collected);

#[async_trait]
impl CheckinModule for FixedModule {
    fn name(&self) -> &'static str {
        "fixed"
    }

    async fn collect(&self, _ctx: &ModuleContext) -> anyhow::Result<Option<ModuleSection>> {
        match &self.0 {
            Collected::Section(section) => Ok(Some(section.clone())),
            Collected::Nothing => Ok(None),
            Collected::Failure => anyhow::bail!("subsystem unavailable"),
        }
    }
}

fn context(dir: &Path, now: DateTime<Utc>) -> ModuleContext {
    ModuleContext {
        prefs: Preferences::new(vec![Box::new(StaticSource::new().with(
            "SkipFacts",
            PlistValue::Array(vec!["hostname".into()]),
        ))]),
        managed_install_dir: dir.to_path_buf(),
        model_cache_path: dir.join("model_cache.json"),
        now,
    }
}

fn facts_section() -> ModuleSection {
    let mut section = ModuleSection::new();
    section.facts.insert("hostname", "build-mac-01");
    section.facts.insert("checkin_module_version", "1.0.0");
    section
}

fn write_report(dir: &Path, body: &str) {
    std::fs::write(
        dir.join("ManagedInstallReport.plist"),
        format!(r#"<?xml version="1.0" encoding="UTF-8"?>
<plist version="1.0">
<dict>
{}
</dict>
</plist>"#, body),
    )
    .expect("Failed to write report");
}

const CHROME_INSTALLED: &str = r#"
    <key>InstallResults</key>
    <array>
        <dict>
            <key>name</key>
            <string>Chrome</string>
            <key>version</key>
            <string>123.0</string>
            <key>status</key>
            <integer>0</integer>
            <key>time</key>
            <date>2024-03-01T12:00:00Z</date>
        </dict>
    </array>"#;

const FIREFOX_PRESENT: &str = r#"
    <key>ManagedInstalls</key>
    <array>
        <dict>
            <key>name</key>
            <string>Firefox</string>
            <key>installed</key>
            <true/>
            <key>installed_version</key>
            <string>124.0</string>
        </dict>
    </array>"#;

speculate! {
    before {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let store = ResultsStore::open(dir.path().join("checkin_results.json"));
        let now = Utc.with_ymd_and_hms(2024, 3, 2, 9, 0, 0).unwrap();
        let runtime = tokio::runtime::Runtime::new().expect("Failed to start runtime");
    }

    describe "run_module" {
        it "drops the facts listed in SkipFacts" {
            let ctx = context(dir.path(), now);
            let module = FixedModule(Collected::Section(facts_section()));

            let recorded = runtime.block_on(run_module(&module, &ctx, &store))
                .expect("Failed to record");

            assert!(recorded);
            let section = store.read().section("fixed").expect("fixed section");
            assert!(section.facts.get("hostname").is_none());
            assert_eq!(section.facts.get("checkin_module_version"), Some(&json!("1.0.0")));
        }

        it "leaves the prior section alone when there is nothing to report" {
            store.write_section("fixed", facts_section()).expect("Failed to write");
            let before = store.read();
            let ctx = context(dir.path(), now);

            let recorded = runtime.block_on(run_module(&FixedModule(Collected::Nothing), &ctx, &store))
                .expect("Failed to record");

            assert!(!recorded);
            assert_eq!(store.read(), before);
        }

        it "leaves the prior section alone when collection fails" {
            store.write_section("fixed", facts_section()).expect("Failed to write");
            let before = store.read();
            let ctx = context(dir.path(), now);

            let recorded = runtime.block_on(run_module(&FixedModule(Collected::Failure), &ctx, &store))
                .expect("Failed to record");

            assert!(!recorded);
            assert_eq!(store.read(), before);
        }

        it "replaces the section of a module without a merge policy" {
            let mut prior = ModuleSection::new();
            prior.facts.insert("stale", "yes");
            store.write_section("fixed", prior).expect("Failed to write");
            let ctx = context(dir.path(), now);

            runtime.block_on(run_module(&FixedModule(Collected::Section(facts_section())), &ctx, &store))
                .expect("Failed to record");

            let section = store.read().section("fixed").expect("fixed section");
            assert!(section.facts.get("stale").is_none());
        }
    }

    describe "munki through run_module" {
        it "merges with results an earlier cycle failed to deliver" {
            write_report(dir.path(), CHROME_INSTALLED);
            runtime.block_on(run_module(&MunkiModule, &context(dir.path(), now), &store))
                .expect("Failed to record");

            write_report(dir.path(), FIREFOX_PRESENT);
            let later = Utc.with_ymd_and_hms(2024, 3, 2, 10, 0, 0).unwrap();
            runtime.block_on(run_module(&MunkiModule, &context(dir.path(), later), &store))
                .expect("Failed to record");

            let munki = store.read().section("munki").expect("munki section");
            assert_eq!(munki.managed_items["Chrome 123.0"].status, ManagedItemStatus::Present);
            assert_eq!(munki.managed_items["Firefox 124.0"].date_managed, later);
            assert!(munki.update_history.iter().any(|h| {
                h.name == "Chrome" && h.status == HistoryStatus::Install
            }));
        }
    }
}
