// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::coordinator::{Coordinator, PipelineReport};
use crate::framing::bind_listener;
use crate::worker::Worker;
use map_reduce_core::config::Config;
use map_reduce_core::host_registry::HostRegistry;
use map_reduce_core::in_memory_partition_store::InMemoryPartitionStore;
use map_reduce_core::partition_store::PartitionStore;
use map_reduce_core::{MapReduceError, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

const LOOPBACK: &str = "127.0.0.1";

/// A completed in-process run
#[derive(Debug)]
pub struct LocalRun {
    pub report: PipelineReport,
    /// Final partition store of each worker, by index
    pub partitions: Vec<HashMap<String, u64>>,
}

/// Coordinator and workers in one process, talking over loopback TCP on
/// ephemeral ports.
pub struct LocalCluster {
    num_workers: usize,
    config: Config,
}

impl LocalCluster {
    pub fn new(num_workers: usize, config: Config) -> Result<Self> {
        if num_workers == 0 {
            return Err(MapReduceError::ZeroWorkers);
        }
        config.validate()?;
        Ok(Self {
            num_workers,
            config,
        })
    }

    pub async fn run(&self, lines: Vec<String>) -> Result<LocalRun> {
        let mut listeners = Vec::with_capacity(self.num_workers);
        for _ in 0..self.num_workers {
            listeners.push(bind_listener(&format!("{}:0", LOOPBACK)).await?);
        }
        let ports = listeners
            .iter()
            .map(|listener| listener.local_addr().map(|addr| addr.port()))
            .collect::<std::io::Result<Vec<u16>>>()
            .map_err(|source| MapReduceError::Bind {
                addr: LOOPBACK.to_string(),
                source,
            })?;
        let registry = Arc::new(HostRegistry::from_endpoints(
            ports.iter().map(|port| (LOOPBACK, *port)),
        ));

        let coordinator = Coordinator::bind(
            &format!("{}:0", LOOPBACK),
            registry.clone(),
            self.config.clone(),
        )
        .await?;
        let control_addr = coordinator.local_addr()?.to_string();
        info!(workers = self.num_workers, %control_addr, "Local cluster started");

        let shutdown = CancellationToken::new();
        let mut stores = Vec::with_capacity(self.num_workers);
        let mut workers: Vec<JoinHandle<Result<()>>> = Vec::with_capacity(self.num_workers);
        for (index, listener) in listeners.into_iter().enumerate() {
            let store = InMemoryPartitionStore::new();
            let worker = Worker::start(
                listener,
                index,
                registry.clone(),
                self.config.map_threads,
                store.clone(),
            )?;
            let addr = control_addr.clone();
            let token = shutdown.child_token();
            workers.push(tokio::spawn(async move { worker.run(&addr, token).await }));
            stores.push(store);
        }

        let report = coordinator.run(lines).await;
        if report.is_err() {
            shutdown.cancel();
        }

        for (index, handle) in workers.into_iter().enumerate() {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(worker = index, error = %e, "Worker failed"),
                Err(e) => error!(worker = index, error = %e, "Worker task panicked"),
            }
        }
        let report = report?;

        let mut partitions = Vec::with_capacity(stores.len());
        for store in &stores {
            partitions.push(store.snapshot().await);
        }

        Ok(LocalRun { report, partitions })
    }
}
