//! Running read-only inspection tools.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tokio::process::Command;
use tracing::debug;

/// Upper bound for any single inspection tool.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

pub async fn run(program: &str, args: &[&str]) -> Result<CommandOutput> {
    debug!("Running {} {}", program, args.join(" "));
    let child = Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output();

    let output = tokio::time::timeout(COMMAND_TIMEOUT, child)
        .await
        .map_err(|_| anyhow!("{} timed out after {:?}", program, COMMAND_TIMEOUT))?
        .with_context(|| format!("Failed to run {}", program))?;

    Ok(CommandOutput {
        status: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}

/// Stdout of a successful run; `None` when the tool is missing or fails.
pub async fn stdout_of(program: &str, args: &[&str]) -> Option<String> {
    match run(program, args).await {
        Ok(output) if output.success() => Some(output.stdout),
        Ok(output) => {
            debug!(
                "{} exited with {:?}: {}",
                program,
                output.status,
                output.stderr.trim()
            );
            None
        }
        Err(e) => {
            debug!("{:#}", e);
            None
        }
    }
}
