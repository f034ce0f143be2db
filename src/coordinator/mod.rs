//! One check-in cycle: `Init -> RunModules -> Submit -> Cleanup | Retain`.
//!
//! Modules run as separate processes, one after another, each updating the
//! shared results file. The file is submitted as a whole and removed only
//! once the server accepted it; otherwise it stays for the next cycle.

mod plugins;
mod process;
mod scripts;
mod submit;

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

pub use plugins::{
    read_plugin_results, take_plugin_results, PluginResult, DEFAULT_PLUGIN_RESULTS_PATH,
    PLUGIN_RESULTS_ENV, PLUGIN_RESULTS_SECTION,
};
pub use process::{is_running, wait_for, ProcessEntry, ProcessInspector, SystemProcesses};
pub use scripts::{run_external_scripts, run_scripts, ScriptOutcome};
pub use submit::{catalog_hashes, send_catalogs, send_inventory, send_profiles, CatalogHash};

use crate::client::CheckinClient;
use crate::model_cache::{DEFAULT_CACHE_PATH, MODEL_CACHE_ENV};
use crate::modules::PROFILES_COMMAND;
use crate::prefs::{ServerPrefs, DEFAULT_MANAGED_INSTALL_DIR};
use crate::results::{ResultsStore, StoreError, DEFAULT_RESULTS_PATH, RESULTS_PATH_ENV};

pub const PROCESS_NAME: &str = "checkin-submit";
pub const PACKAGE_MANAGER_PROCESS: &str = "managedsoftwareupdate";

/// Run type assumed when the package manager section doesn't name one.
pub const DEFAULT_RUN_TYPE: &str = "custom";
/// Run type of an interactive package manager run; only the checkin itself
/// is sent.
pub const MANUAL_RUN_TYPE: &str = "manual";

/// Why a cycle did not start.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AbortReason {
    #[error("Manually running this tool requires sudo.")]
    NotRoot,

    #[error("Another instance of checkin-submit is already running. Exiting.")]
    AlreadyRunning,

    #[error("managedsoftwareupdate is running. Exiting.")]
    PackageManagerRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Init,
    RunModules,
    Submit,
    Cleanup,
    Retain,
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "INIT",
            Self::RunModules => "RUN_MODULES",
            Self::Submit => "SUBMIT",
            Self::Cleanup => "CLEANUP",
            Self::Retain => "RETAIN",
        };
        f.write_str(name)
    }
}

/// How a cycle that got past INIT ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The server accepted the checkin and local results were removed.
    Submitted,
    /// Submission failed; results are kept for the next cycle.
    Retained { reason: String },
}

#[derive(Debug)]
pub struct CycleReport {
    pub outcome: CycleOutcome,
    pub modules: Vec<ScriptOutcome>,
}

/// Locations and knobs for a cycle.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub modules_dir: PathBuf,
    pub external_scripts_dir: PathBuf,
    /// Shared plist external scripts append their results to.
    pub plugin_results_path: PathBuf,
    pub results_path: PathBuf,
    pub model_cache_path: PathBuf,
    /// Marker left by on-demand runs; removed after a successful cycle.
    pub run_marker: PathBuf,
    pub managed_install_dir: PathBuf,
    pub profiles_command: String,
    pub require_root: bool,
    pub wait_attempts: u32,
    pub wait_pause: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            modules_dir: PathBuf::from("/usr/local/sal/checkin_modules"),
            external_scripts_dir: PathBuf::from("/usr/local/sal/external_scripts"),
            plugin_results_path: PathBuf::from(DEFAULT_PLUGIN_RESULTS_PATH),
            results_path: PathBuf::from(DEFAULT_RESULTS_PATH),
            model_cache_path: PathBuf::from(DEFAULT_CACHE_PATH),
            run_marker: PathBuf::from("/Users/Shared/.com.salopensource.sal.run"),
            managed_install_dir: PathBuf::from(DEFAULT_MANAGED_INSTALL_DIR),
            profiles_command: PROFILES_COMMAND.to_string(),
            require_root: true,
            wait_attempts: 3,
            wait_pause: Duration::from_secs(1),
        }
    }
}

pub struct Coordinator {
    config: CoordinatorConfig,
    server: ServerPrefs,
    client: CheckinClient,
    store: ResultsStore,
    processes: Box<dyn ProcessInspector>,
}

impl Coordinator {
    pub fn new(
        config: CoordinatorConfig,
        server: ServerPrefs,
        client: CheckinClient,
        processes: Box<dyn ProcessInspector>,
    ) -> Self {
        let store = ResultsStore::open(&config.results_path);
        Self {
            config,
            server,
            client,
            store,
            processes,
        }
    }

    pub fn store(&self) -> &ResultsStore {
        &self.store
    }

    /// Run a full cycle. Only the INIT checks can stop it; everything after
    /// that ends in either CLEANUP or RETAIN.
    pub async fn run_cycle(&self) -> Result<CycleReport, AbortReason> {
        self.preflight().await?;

        let modules = self.run_modules().await;
        let outcome = self.submit().await;
        Ok(CycleReport { outcome, modules })
    }

    pub async fn preflight(&self) -> Result<(), AbortReason> {
        enter(CycleState::Init);

        if self.config.require_root && !nix::unistd::geteuid().is_root() {
            return Err(AbortReason::NotRoot);
        }
        if is_running(self.processes.as_ref(), PROCESS_NAME) {
            return Err(AbortReason::AlreadyRunning);
        }
        if wait_for(
            self.processes.as_ref(),
            PACKAGE_MANAGER_PROCESS,
            self.config.wait_attempts,
            self.config.wait_pause,
        )
        .await
        {
            return Err(AbortReason::PackageManagerRunning);
        }
        Ok(())
    }

    /// Run every entry of the modules directory. Failures are reported in
    /// the returned outcomes and never stop the cycle.
    pub async fn run_modules(&self) -> Vec<ScriptOutcome> {
        enter(CycleState::RunModules);

        let env = [
            (RESULTS_PATH_ENV, self.config.results_path.as_path()),
            (MODEL_CACHE_ENV, self.config.model_cache_path.as_path()),
        ];
        let outcomes = run_scripts(&self.config.modules_dir, None, &env).await;
        for outcome in outcomes.iter().filter(|o| !o.is_success()) {
            warn!("{}", outcome);
        }
        outcomes
    }

    /// Send the accumulated results, then the secondary submissions.
    pub async fn submit(&self) -> CycleOutcome {
        enter(CycleState::Submit);

        let run_type = self
            .store
            .read()
            .section_str("munki", "runtype")
            .unwrap_or(DEFAULT_RUN_TYPE)
            .to_string();

        self.collect_plugin_results(&run_type).await;
        let document = self.store.read();

        if let Err(e) = self.client.post_json("checkin", &document).await {
            enter(CycleState::Retain);
            warn!("Checkin failed, keeping results for the next run: {}", e);
            return CycleOutcome::Retained {
                reason: e.to_string(),
            };
        }
        info!("Checkin submitted ({} sections)", document.len());

        enter(CycleState::Cleanup);
        if let Err(e) = self.store.clear() {
            warn!("{}", e);
        }
        match std::fs::remove_file(&self.config.run_marker) {
            Ok(()) => debug!("Removed {}", self.config.run_marker.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Could not remove {}: {}", self.config.run_marker.display(), e),
        }

        if run_type != MANUAL_RUN_TYPE {
            self.secondary_submissions(document.section_str("machine", "serial"))
                .await;
        }

        CycleOutcome::Submitted
    }

    /// Run the external scripts and move what they reported into the
    /// results. The shared plist is removed even when it could not be read.
    async fn collect_plugin_results(&self, run_type: &str) {
        let plugin_results = &self.config.plugin_results_path;
        let env = [(PLUGIN_RESULTS_ENV, plugin_results.as_path())];
        let ran = run_external_scripts(&self.config.external_scripts_dir, run_type, &env).await;
        debug!("Ran {} external scripts", ran);

        let results = take_plugin_results(plugin_results);
        if results.is_empty() {
            return;
        }
        debug!("Recording {} plugin results", results.len());
        let stored = serde_json::to_value(&results)
            .map_err(StoreError::from)
            .and_then(|value| self.store.write_value(PLUGIN_RESULTS_SECTION, value));
        if let Err(e) = stored {
            warn!("Plugin results not recorded: {}", e);
        }
    }

    async fn secondary_submissions(&self, serial: Option<&str>) {
        let dir = &self.config.managed_install_dir;

        match serial {
            Some(serial) => {
                if let Err(e) = send_inventory(&self.client, dir, serial).await {
                    warn!("Inventory not submitted: {:#}", e);
                }
            }
            None => warn!("No serial number in results; skipping inventory and profiles"),
        }

        if let Err(e) = send_catalogs(&self.client, dir, &self.server.key).await {
            warn!("Catalogs not submitted: {:#}", e);
        }

        if let Some(serial) = serial {
            if let Err(e) = send_profiles(&self.client, &self.config.profiles_command, serial).await {
                warn!("Profiles not submitted: {:#}", e);
            }
        }
    }
}

fn enter(state: CycleState) {
    debug!("Cycle state: {}", state);
}
