use anyhow::Context;
use clap::builder::PossibleValuesParser;
use clap::Parser;

use checkin_client::logging::init_tracing;
use checkin_client::modules::{built_in, run_module, ModuleContext, MODULE_NAMES};
use checkin_client::results::ResultsStore;

#[derive(Parser)]
#[command(name = "checkin-module")]
#[command(about = "Gather one subsystem's facts into the checkin results")]
struct Cli {
    /// Module to run
    #[arg(value_parser = PossibleValuesParser::new(MODULE_NAMES.iter().copied()))]
    module: String,

    /// Enable full debug output
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let module = built_in(&cli.module).with_context(|| format!("Unknown module {}", cli.module))?;
    let ctx = ModuleContext::load();
    let store = ResultsStore::from_env();
    tracing::debug!("Writing results to {}", store.path().display());

    run_module(module.as_ref(), &ctx, &store).await?;
    Ok(())
}
