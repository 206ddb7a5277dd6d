// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use clap::Parser;
use map_reduce_core::config::Config;
use map_reduce_core::logging::init_tracing;
use map_reduce_tcp_shuffle::LocalCluster;
use map_reduce_word_count::read_input_lines;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;
use tracing::error;

/// Runs the coordinator and all workers in this process over loopback
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input file, or directory of input files
    input: PathBuf,

    #[arg(short, long, default_value_t = 4)]
    workers: usize,

    #[arg(long, default_value = "mapreduce.json")]
    config: PathBuf,

    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let start_time = Instant::now();

    let config = Config::load_or_default(&cli.config)?;
    config.print_summary();

    let lines = read_input_lines(&cli.input)?;
    let cluster = LocalCluster::new(cli.workers, config.clone())?;
    let run = cluster.run(lines).await?;

    run.report.print(config.top_k);
    for (index, partition) in run.partitions.iter().enumerate() {
        println!("Worker {} reduced {} tokens", index, partition.len());
    }
    if let Some(output) = &config.output_path {
        run.report.histogram.write_json(output)?;
    }
    println!("\nTotal time: {} ms", start_time.elapsed().as_millis());
    Ok(())
}
