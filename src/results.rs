//! The checkin-result accumulator.
//!
//! Module processes and the coordinator share one JSON file. Every update is
//! a whole-file read-modify-write; there is no locking, so callers must not
//! touch the file concurrently. The coordinator only deletes it after the
//! server accepted a submission, which gives at-least-once delivery.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::{CheckinDocument, MergePolicy, ModuleSection};

/// Where the results live unless configured otherwise.
pub const DEFAULT_RESULTS_PATH: &str = "/usr/local/sal/checkin_results.json";

/// Set by the coordinator on module processes so they write where it reads.
pub const RESULTS_PATH_ENV: &str = "CHECKIN_RESULTS_PATH";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to write results file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize results: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct ResultsStore {
    path: PathBuf,
}

impl ResultsStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn open_default() -> Self {
        Self::open(DEFAULT_RESULTS_PATH)
    }

    /// The store named by [`RESULTS_PATH_ENV`], else the default one.
    pub fn from_env() -> Self {
        match std::env::var_os(RESULTS_PATH_ENV) {
            Some(path) if !path.is_empty() => Self::open(PathBuf::from(path)),
            _ => Self::open_default(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the document. A missing or unparsable file reads as empty.
    /// Sections are not interpreted here, so a loosely shaped section never
    /// costs the others.
    pub fn read(&self) -> CheckinDocument {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return CheckinDocument::new(),
            Err(e) => {
                warn!("Could not read {}: {}", self.path.display(), e);
                return CheckinDocument::new();
            }
        };

        match serde_json::from_str(&content) {
            Ok(document) => document,
            Err(e) => {
                warn!(
                    "Discarding unparsable results in {}: {}",
                    self.path.display(),
                    e
                );
                CheckinDocument::new()
            }
        }
    }

    /// Replace the section stored under `name` and persist the document.
    pub fn write_section(&self, name: &str, section: ModuleSection) -> Result<(), StoreError> {
        self.merge_section(name, section, MergePolicy::Replace)
    }

    /// Store a section according to `policy`. With
    /// [`MergePolicy::MergeWithPrior`] the section is layered onto whatever
    /// an undelivered earlier cycle left under the same name.
    pub fn merge_section(
        &self,
        name: &str,
        section: ModuleSection,
        policy: MergePolicy,
    ) -> Result<(), StoreError> {
        let mut document = self.read();
        let prior = document.remove(name);
        let section = match (policy, prior) {
            (MergePolicy::MergeWithPrior, Some(prior)) => {
                match serde_json::from_value::<ModuleSection>(prior) {
                    Ok(prior) => {
                        debug!("Merging '{}' with undelivered results", name);
                        section.merged_onto(prior)
                    }
                    Err(e) => {
                        warn!("Replacing unmergeable '{}' results: {}", name, e);
                        section
                    }
                }
            }
            _ => section,
        };
        document.insert_section(name, &section)?;
        self.save(&document)
    }

    /// Replace the section stored under `name` with an arbitrary JSON value.
    pub fn write_value(&self, name: &str, value: Value) -> Result<(), StoreError> {
        let mut document = self.read();
        document.insert(name, value);
        self.save(&document)
    }

    /// Replace the whole document on disk. The parent directory must exist.
    pub fn save(&self, document: &CheckinDocument) -> Result<(), StoreError> {
        let content = serde_json::to_string(document)?;
        std::fs::write(&self.path, content).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })
    }

    /// Delete the document. Clearing an already absent file is not an error.
    pub fn clear(&self) -> Result<(), StoreError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }
}
