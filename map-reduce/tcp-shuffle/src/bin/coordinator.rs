// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use anyhow::{bail, Context};
use clap::Parser;
use map_reduce_core::config::{Config, DEFAULT_CONTROL_PORT};
use map_reduce_core::host_registry::HostRegistry;
use map_reduce_core::logging::init_tracing;
use map_reduce_tcp_shuffle::Coordinator;
use map_reduce_word_count::read_input_lines;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, warn};

#[derive(Parser)]
#[command(author, version, about = "Word-count MapReduce coordinator", long_about = None)]
struct Cli {
    /// Input file, or directory of input files
    input: PathBuf,

    #[arg(default_value_t = DEFAULT_CONTROL_PORT)]
    port: u16,

    #[arg(long, default_value = "mapreduce.json")]
    config: PathBuf,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run_coordinator(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_coordinator(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load_or_default(&cli.config)?;
    config.print_summary();

    let registry = HostRegistry::load(&config.registry_path).with_context(|| {
        format!(
            "cannot load host registry {}",
            config.registry_path.display()
        )
    })?;
    let lines = read_input_lines(&cli.input)
        .with_context(|| format!("cannot read input {}", cli.input.display()))?;

    let coordinator = Coordinator::bind(
        &format!("0.0.0.0:{}", cli.port),
        Arc::new(registry),
        config.clone(),
    )
    .await?;

    let report = tokio::select! {
        report = coordinator.run(lines) => report?,
        _ = signal::ctrl_c() => {
            warn!("Interrupted, abandoning the pipeline");
            bail!("interrupted");
        }
    };

    report.print(config.top_k);
    if let Some(output) = &config.output_path {
        report.histogram.write_json(output)?;
        println!("\nHistogram written to {}", output.display());
    }
    Ok(())
}
