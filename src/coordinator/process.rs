//! Best-effort detection of other running instances.
//!
//! This is a scan of the process table, not a lock: something may start
//! between the check and the check-in.

use std::path::Path;
use std::time::Duration;

use sysinfo::{PidExt, ProcessExt, System, SystemExt};

const INTERPRETERS: &[&str] = &["sh", "bash", "zsh", "perl", "ruby"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    pub pid: u32,
    pub name: String,
    pub args: Vec<String>,
}

pub trait ProcessInspector: Send + Sync {
    fn processes(&self) -> Vec<ProcessEntry>;

    fn current_pid(&self) -> u32 {
        std::process::id()
    }
}

/// The live process table.
#[derive(Debug, Default)]
pub struct SystemProcesses;

impl ProcessInspector for SystemProcesses {
    fn processes(&self) -> Vec<ProcessEntry> {
        let mut sys = System::new();
        sys.refresh_processes();

        sys.processes()
            .iter()
            .map(|(pid, process)| ProcessEntry {
                pid: pid.as_u32(),
                name: process.name().to_string(),
                args: process.cmd().to_vec(),
            })
            .collect()
    }
}

/// Whether a process other than this one runs `name`, either directly or
/// as a script handed to an interpreter.
pub fn is_running(inspector: &dyn ProcessInspector, name: &str) -> bool {
    let me = inspector.current_pid();
    inspector
        .processes()
        .iter()
        .any(|p| p.pid != me && runs(p, name))
}

/// Poll up to `attempts` times, pausing between polls, for `name` to exit.
/// Returns true if it is still running afterwards.
pub async fn wait_for(
    inspector: &dyn ProcessInspector,
    name: &str,
    attempts: u32,
    pause: Duration,
) -> bool {
    for _ in 0..attempts {
        if !is_running(inspector, name) {
            return false;
        }
        tokio::time::sleep(pause).await;
    }
    true
}

fn runs(process: &ProcessEntry, name: &str) -> bool {
    if process.name.contains(name) {
        return true;
    }
    let Some(program) = process.args.first().map(|a| base_name(a)) else {
        return false;
    };
    if program.contains(name) {
        return true;
    }

    let interpreted = program.to_lowercase().starts_with("python") || INTERPRETERS.contains(&program);
    interpreted
        && process
            .args
            .get(1)
            .map(|script| base_name(script).contains(name))
            .unwrap_or(false)
}

fn base_name(path: &str) -> &str {
    Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(path)
}
