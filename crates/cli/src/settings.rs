//! Command-line arguments and configuration loading.

use std::path::{Path, PathBuf};

use anyhow::Context;
use bridge::{BridgeConfig, ExecutionModel};
use clap::Parser;

use crate::observability::LogFormat;

/// Runs the background bridge through a suspend/resume scenario and prints a
/// JSON report of every call's outcome.
#[derive(Debug, Parser)]
#[command(name = "bridge-demo", version)]
pub struct Cli {
    /// JSON configuration file, e.g. `{"execution_model": "persistent"}`.
    #[arg(long, env = "BRIDGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Overrides the execution model from the configuration file.
    #[arg(long)]
    pub execution_model: Option<ExecutionModel>,

    /// Log line format written to stderr.
    #[arg(long, value_enum, default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,

    /// Number of transactions submitted while the background is suspended.
    #[arg(long, default_value_t = 3)]
    pub backlog: usize,
}

/// Reads the configuration file (if any) and applies command-line overrides.
pub fn load(path: Option<&Path>, execution_model: Option<ExecutionModel>) -> anyhow::Result<BridgeConfig> {
    let mut config = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading configuration file {}", path.display()))?;
            BridgeConfig::from_json_str(&text)
                .with_context(|| format!("parsing configuration file {}", path.display()))?
        }
        None => BridgeConfig::default(),
    };
    if let Some(model) = execution_model {
        config.execution_model = model;
    }
    tracing::info!(execution_model = %config.execution_model, "configuration loaded");
    Ok(config)
}
