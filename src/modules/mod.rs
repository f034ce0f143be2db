//! Checkin modules.
//!
//! Each module inspects one subsystem and produces a single
//! [`ModuleSection`]. Modules never fail a check-in cycle: when the
//! subsystem is missing they report what they can, and when they have
//! nothing at all they simply don't write a section.

mod agent;
mod apple_sus;
pub mod command;
mod machine;
mod munki;
mod profiles;

use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::{info, warn};

pub use agent::AgentModule;
pub use apple_sus::{
    install_history_items, parse_pending_updates, scan_install_log, AppleSusModule, SusLogFacts,
};
pub use machine::{process_memory, MachineModule, MachineSources};
pub use munki::{read_managed_install_report, MunkiModule};
pub use profiles::{export_profiles, ProfilesModule, PROFILES_COMMAND};

use crate::model_cache::{DEFAULT_CACHE_PATH, MODEL_CACHE_ENV};
use crate::models::{MergePolicy, ModuleSection};
use crate::prefs::Preferences;
use crate::results::{ResultsStore, StoreError};
use crate::value::PlistValue;

/// Command-line names of the built-in modules.
pub const MODULE_NAMES: &[&str] = &["agent", "apple-sus", "machine", "munki", "profiles"];

/// Everything a module may consult besides the live system.
pub struct ModuleContext {
    pub prefs: Preferences,
    /// The package manager's working directory (holds its reports).
    pub managed_install_dir: PathBuf,
    pub model_cache_path: PathBuf,
    /// Timestamp applied to items observed during this run.
    pub now: DateTime<Utc>,
}

impl ModuleContext {
    pub fn load() -> Self {
        let prefs = Preferences::load();
        let managed_install_dir = Preferences::load_package_manager().managed_install_dir();
        let model_cache_path = std::env::var_os(MODEL_CACHE_ENV)
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_PATH));
        Self {
            prefs,
            managed_install_dir,
            model_cache_path,
            now: Utc::now(),
        }
    }
}

#[async_trait]
pub trait CheckinModule: Send + Sync {
    /// The section name this module writes.
    fn name(&self) -> &'static str;

    fn merge_policy(&self) -> MergePolicy {
        MergePolicy::Replace
    }

    /// Gather this module's section. `Ok(None)` means there is nothing to
    /// report this time.
    async fn collect(&self, ctx: &ModuleContext) -> Result<Option<ModuleSection>>;
}

pub fn built_in(name: &str) -> Option<Box<dyn CheckinModule>> {
    match name {
        "agent" => Some(Box::new(AgentModule)),
        "apple-sus" => Some(Box::new(AppleSusModule::default())),
        "machine" => Some(Box::new(MachineModule::default())),
        "munki" => Some(Box::new(MunkiModule)),
        "profiles" => Some(Box::new(ProfilesModule::default())),
        _ => None,
    }
}

/// Collect a section and store it. Collection problems are logged and
/// leave the stored results untouched; only failing to write the results
/// file is an error.
pub async fn run_module(
    module: &dyn CheckinModule,
    ctx: &ModuleContext,
    store: &ResultsStore,
) -> Result<bool, StoreError> {
    let mut section = match module.collect(ctx).await {
        Ok(Some(section)) => section,
        Ok(None) => {
            info!("{}: nothing to report", module.name());
            return Ok(false);
        }
        Err(e) => {
            warn!("{}: could not gather data: {:#}", module.name(), e);
            return Ok(false);
        }
    };

    for fact in ctx.prefs.skip_facts() {
        section.facts.remove(&fact);
    }

    store.merge_section(module.name(), section, module.merge_policy())?;
    info!("{}: results recorded", module.name());
    Ok(true)
}

/// JSON object from a plist dictionary, minus the `skip` keys.
pub(crate) fn dict_to_json(value: &PlistValue, skip: &[&str]) -> Map<String, Value> {
    value
        .as_dict()
        .map(|dict| {
            dict.iter()
                .filter(|(k, _)| !skip.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect()
        })
        .unwrap_or_default()
}
