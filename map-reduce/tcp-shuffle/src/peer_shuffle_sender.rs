// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use futures::future::join_all;
use map_reduce_core::host_registry::HostRegistry;
use map_reduce_core::partition_store::PartitionStore;
use map_reduce_core::partitioner::Partitioner;
use map_reduce_core::protocol::Record;
use map_reduce_core::{MapReduceError, Result};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// Outcome of one worker's SHUFFLE, counted in records
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShuffleSummary {
    pub kept_local: usize,
    pub sent: usize,
    /// Records lost to peer connect or write failures
    pub dropped: usize,
}

/// Routes a worker's local counts to the workers owning each token
#[derive(Clone)]
pub struct PeerShuffleSender {
    own_index: usize,
    partitioner: Partitioner,
    registry: Arc<HostRegistry>,
}

impl PeerShuffleSender {
    pub fn new(own_index: usize, registry: Arc<HostRegistry>) -> Result<Self> {
        let partitioner = Partitioner::new(registry.len())?;
        if own_index >= registry.len() {
            return Err(MapReduceError::Config(format!(
                "worker index {} outside registry of {} workers",
                own_index,
                registry.len()
            )));
        }
        Ok(Self {
            own_index,
            partitioner,
            registry,
        })
    }

    /// Buckets records by owning worker; bucket `i` belongs to worker `i`
    pub fn group_by_owner<I>(&self, counts: I) -> Vec<Vec<Record>>
    where
        I: IntoIterator<Item = (String, u64)>,
    {
        let mut batches = vec![Vec::new(); self.partitioner.num_workers()];
        for (token, count) in counts {
            let owner = self.partitioner.partition(&token);
            batches[owner].push(Record::new(token, count));
        }
        batches
    }

    /// Merges owned records into `local_store` and streams the rest to their
    /// owners, one connection per peer, all peers concurrently.
    ///
    /// Returns once every connection has either been drained by its receiver
    /// or failed. Records of a failed peer are dropped.
    pub async fn shuffle<S, I>(&self, counts: I, local_store: &S) -> ShuffleSummary
    where
        S: PartitionStore,
        I: IntoIterator<Item = (String, u64)>,
    {
        let mut batches = self.group_by_owner(counts);
        let local = std::mem::take(&mut batches[self.own_index]);
        let mut summary = ShuffleSummary {
            kept_local: local.len(),
            ..ShuffleSummary::default()
        };
        local_store.merge_records(local).await;

        let sends = batches
            .into_iter()
            .enumerate()
            .filter(|(_, records)| !records.is_empty())
            .map(|(peer, records)| async move {
                let count = records.len();
                (peer, count, self.send_batch(peer, records).await)
            });

        for (peer, count, result) in join_all(sends).await {
            match result {
                Ok(()) => {
                    debug!(worker = self.own_index, peer, records = count, "Batch delivered");
                    summary.sent += count;
                }
                Err(e) => {
                    warn!(
                        worker = self.own_index,
                        peer,
                        records = count,
                        error = %e,
                        "Dropping shuffle records"
                    );
                    summary.dropped += count;
                }
            }
        }

        summary
    }

    async fn send_batch(&self, peer: usize, records: Vec<Record>) -> Result<()> {
        let addr = self
            .registry
            .get(peer)
            .map(|endpoint| endpoint.address())
            .ok_or_else(|| {
                MapReduceError::Config(format!("no registry entry for worker {}", peer))
            })?;

        let mut stream = TcpStream::connect(&addr)
            .await
            .map_err(|source| MapReduceError::Connect {
                addr: addr.clone(),
                source,
            })?;
        let peer_error = |source: std::io::Error| MapReduceError::PeerChannel {
            addr: addr.clone(),
            source,
        };

        let mut payload = String::new();
        for record in &records {
            payload.push_str(&record.encode());
            payload.push('\n');
        }
        stream.write_all(payload.as_bytes()).await.map_err(peer_error)?;
        stream.shutdown().await.map_err(peer_error)?;

        // The receiver closes once it has merged everything
        let mut discard = [0u8; 64];
        while stream.read(&mut discard).await.map_err(peer_error)? > 0 {}
        Ok(())
    }
}
