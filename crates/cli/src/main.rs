//! Background bridge demo entry point.
//!
//! This binary is the composition root for the workspace. Responsibilities:
//!
//! 1. **Parse configuration**: read the optional JSON file named by `--config`
//!    (or `BRIDGE_CONFIG`) into a [`bridge::BridgeConfig`], then apply
//!    `--execution-model`.
//! 2. **Wire observability**: configure `tracing-subscriber` with a JSON or
//!    human-readable layer on stderr and, when `OTEL_EXPORTER_OTLP_ENDPOINT`
//!    is set, an OpenTelemetry OTLP exporter. All `tracing` spans and events
//!    emitted by every crate in the workspace flow through these layers.
//! 3. **Construct infrastructure**: build a [`port::BackgroundHost`] with the
//!    wallet's background methods and an [`bridge::ActionQueueService`].
//! 4. **Run the scenario** for the selected execution model:
//!    - `suspendable`: calls queue while the background is down, survive a
//!      mid-call termination, and are cancelled when the popup closes.
//!    - `persistent`: calls go straight to the port and a lost connection is
//!      reported to the caller.
//!
//! The JSON report is written to stdout.

mod observability;
mod scenario;
mod settings;

use anyhow::Context;
use clap::Parser;

use crate::settings::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let telemetry = observability::init(cli.log_format)?;

    let outcome = run(&cli).await;
    telemetry.shutdown();

    let report = outcome?;
    let text = serde_json::to_string_pretty(&report).context("serializing report")?;
    println!("{text}");
    Ok(())
}

async fn run(cli: &Cli) -> anyhow::Result<scenario::Report> {
    let config = settings::load(cli.config.as_deref(), cli.execution_model)?;
    scenario::run(config, cli.backlog).await
}
