// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use anyhow::Context;
use clap::Parser;
use map_reduce_core::config::Config;
use map_reduce_core::host_registry::HostRegistry;
use map_reduce_core::in_memory_partition_store::InMemoryPartitionStore;
use map_reduce_core::logging::init_tracing;
use map_reduce_tcp_shuffle::framing::bind_listener;
use map_reduce_tcp_shuffle::Worker;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(author, version, about = "Word-count MapReduce worker", long_about = None)]
struct Cli {
    coordinator_host: String,

    coordinator_port: u16,

    /// Port of this worker's peer shuffle listener, as listed in the registry
    listen_port: u16,

    /// This worker's host in the registry, when several entries share a port
    #[arg(long)]
    host: Option<String>,

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

    match run_worker(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_worker(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load_or_default(&cli.config)?;
    let registry = Arc::new(HostRegistry::load(&config.registry_path).with_context(|| {
        format!(
            "cannot load host registry {}",
            config.registry_path.display()
        )
    })?);
    let index = registry.resolve(cli.host.as_deref(), cli.listen_port)?.index;

    let listener = bind_listener(&format!("0.0.0.0:{}", cli.listen_port)).await?;
    let worker = Worker::start(
        listener,
        index,
        registry,
        config.map_threads,
        InMemoryPartitionStore::new(),
    )?;
    info!(worker = index, port = cli.listen_port, "Worker started");

    let shutdown = CancellationToken::new();
    let on_interrupt = shutdown.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("Ctrl+C received, shutting down");
            on_interrupt.cancel();
        }
    });

    let coordinator = format!("{}:{}", cli.coordinator_host, cli.coordinator_port);
    worker.run(&coordinator, shutdown).await?;
    Ok(())
}
