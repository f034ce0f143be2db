//! Running checkin modules and external scripts as child processes.

use std::fmt;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::{debug, warn};

/// Result of running one entry of a script directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptOutcome {
    Succeeded(PathBuf),
    Failed(PathBuf),
    NotExecutable(PathBuf),
}

impl ScriptOutcome {
    pub fn path(&self) -> &Path {
        match self {
            Self::Succeeded(p) | Self::Failed(p) | Self::NotExecutable(p) => p,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }
}

impl fmt::Display for ScriptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded(p) => write!(f, "'{}' ran successfully", p.display()),
            Self::Failed(p) => write!(f, "'{}' had errors during execution!", p.display()),
            Self::NotExecutable(p) => write!(
                f,
                "'{}' is not executable or has bad permissions",
                p.display()
            ),
        }
    }
}

/// Extra environment handed to every script.
pub type ScriptEnv<'a> = &'a [(&'a str, &'a Path)];

/// Run every entry of `dir` in file-name order, one at a time.
///
/// Hidden files and `__pycache__` are skipped. A missing directory yields
/// no outcomes.
pub async fn run_scripts(dir: &Path, arg: Option<&str>, env: ScriptEnv<'_>) -> Vec<ScriptOutcome> {
    let mut outcomes = Vec::new();
    for path in listing(dir) {
        let outcome = if !is_executable(&path) {
            ScriptOutcome::NotExecutable(path)
        } else if run_one(&path, arg, env).await {
            ScriptOutcome::Succeeded(path)
        } else {
            ScriptOutcome::Failed(path)
        };
        debug!("{}", outcome);
        outcomes.push(outcome);
    }
    outcomes
}

/// Run every executable below `dir`, recursively and in file-name order,
/// passing the run type. Exit codes are ignored.
pub async fn run_external_scripts(dir: &Path, run_type: &str, env: ScriptEnv<'_>) -> usize {
    let mut ran = 0;
    for path in walk(dir) {
        if !is_executable(&path) {
            debug!("'{}' is not executable or has bad permissions", path.display());
            continue;
        }
        if !run_one(&path, Some(run_type), env).await {
            debug!("'{}' had errors during execution!", path.display());
        }
        ran += 1;
    }
    ran
}

async fn run_one(path: &Path, arg: Option<&str>, env: ScriptEnv<'_>) -> bool {
    let mut command = Command::new(path);
    command.args(arg).kill_on_drop(true);
    for (name, value) in env {
        command.env(name, value);
    }

    match command.status().await {
        Ok(status) => status.success(),
        Err(e) => {
            warn!("Could not start '{}': {}", path.display(), e);
            false
        }
    }
}

/// Executable by someone and not world-writable.
fn is_executable(path: &Path) -> bool {
    match std::fs::metadata(path) {
        Ok(meta) => {
            let mode = meta.permissions().mode();
            meta.is_file() && mode & 0o111 != 0 && mode & 0o002 == 0
        }
        Err(_) => false,
    }
}

fn skipped(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.') || n == "__pycache__")
        .unwrap_or(true)
}

fn listing(dir: &Path) -> Vec<PathBuf> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Could not list {}: {}", dir.display(), e);
            return Vec::new();
        }
    };

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| !skipped(p))
        .collect();
    paths.sort();
    paths
}

fn walk(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut children: Vec<PathBuf> = entries.filter_map(|e| e.ok().map(|e| e.path())).collect();
    children.sort();

    let mut files = Vec::new();
    for child in children {
        if child.is_dir() {
            files.extend(walk(&child));
        } else {
            files.push(child);
        }
    }
    files
}
