// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::framing::line_reader;
use map_reduce_core::partition_store::PartitionStore;
use map_reduce_core::partitioner::Partitioner;
use map_reduce_core::protocol::Record;
use map_reduce_core::{MapReduceError, Result};
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};
use tokio_stream::StreamExt;
use tokio_util::codec::LinesCodecError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Peer-facing listener of a worker.
///
/// Accepts `token:count` record streams from every other worker and merges
/// them into the partition store until `close` is called.
pub struct PeerShuffleServer {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    acceptor: JoinHandle<()>,
}

impl PeerShuffleServer {
    /// Starts serving on an already bound listener
    pub fn serve<S: PartitionStore>(
        listener: TcpListener,
        own_index: usize,
        partitioner: Partitioner,
        store: S,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let local_addr = listener
            .local_addr()
            .map_err(|source| MapReduceError::Bind {
                addr: "peer listener".to_string(),
                source,
            })?;
        info!(worker = own_index, %local_addr, "Peer shuffle listener started");

        let acceptor = tokio::spawn(accept_loop(
            listener,
            own_index,
            partitioner,
            store,
            cancel.clone(),
        ));

        Ok(Self {
            local_addr,
            cancel,
            acceptor,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting and drops in-flight connections
    pub async fn close(self) {
        self.cancel.cancel();
        if let Err(e) = self.acceptor.await {
            warn!(error = %e, "Peer shuffle acceptor ended abnormally");
        }
        debug!(local_addr = %self.local_addr, "Peer shuffle listener closed");
    }
}

async fn accept_loop<S: PartitionStore>(
    listener: TcpListener,
    own_index: usize,
    partitioner: Partitioner,
    store: S,
    cancel: CancellationToken,
) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    connections.spawn(receive_records(
                        stream,
                        peer,
                        own_index,
                        partitioner,
                        store.clone(),
                    ));
                }
                Err(e) => warn!(worker = own_index, error = %e, "Peer accept failed"),
            },
        }
    }

    connections.shutdown().await;
}

/// Merges every record of one peer connection. The socket is dropped only
/// after the last record is merged, which is what the sender waits for.
async fn receive_records<S: PartitionStore>(
    stream: TcpStream,
    peer: SocketAddr,
    own_index: usize,
    partitioner: Partitioner,
    store: S,
) {
    let mut lines = line_reader(stream);
    let mut merged = 0usize;

    while let Some(line) = lines.next().await {
        let line = match line {
            Ok(line) => line,
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                warn!(%peer, "Skipping oversized shuffle record");
                continue;
            }
            Err(e) => {
                warn!(%peer, error = %e, "Peer connection read failed");
                break;
            }
        };
        if line.is_empty() {
            continue;
        }

        let record = match Record::parse(&line) {
            Ok(record) => record,
            Err(e) => {
                warn!(%peer, error = %e, "Skipping malformed shuffle record");
                continue;
            }
        };

        let owner = partitioner.partition(&record.token);
        if owner != own_index {
            warn!(
                %peer,
                token = %record.token,
                owner,
                "Dropping record owned by another worker"
            );
            continue;
        }

        store.merge(record.token, record.count).await;
        merged += 1;
    }

    debug!(%peer, records = merged, "Peer batch merged");
}
