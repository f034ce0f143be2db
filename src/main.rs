use anyhow::Context;
use clap::Parser;

use checkin_client::client::CheckinClient;
use checkin_client::coordinator::{
    Coordinator, CoordinatorConfig, CycleOutcome, SystemProcesses,
};
use checkin_client::logging::init_tracing;
use checkin_client::prefs::Preferences;

#[derive(Parser)]
#[command(name = "checkin-submit")]
#[command(about = "Run the checkin modules and submit their results to the server")]
struct Cli {
    /// Enable full debug output
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let prefs = Preferences::load();
    tracing::debug!(
        "Preferences: {}",
        serde_json::to_string(&prefs.report()).unwrap_or_default()
    );

    let server = prefs
        .server_prefs()
        .context("Server preferences are incomplete")?;
    let client = CheckinClient::from_prefs(&prefs).context("Could not set up the HTTP client")?;

    let config = CoordinatorConfig {
        managed_install_dir: Preferences::load_package_manager().managed_install_dir(),
        ..CoordinatorConfig::default()
    };
    let coordinator = Coordinator::new(config, server, client, Box::new(SystemProcesses));

    let report = coordinator.run_cycle().await?;
    for outcome in &report.modules {
        tracing::info!("{}", outcome);
    }

    match report.outcome {
        CycleOutcome::Submitted => tracing::info!("Check-in complete"),
        CycleOutcome::Retained { reason } => {
            tracing::error!("Check-in not delivered, will retry next run: {}", reason)
        }
    }

    Ok(())
}
