// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::error::{MapReduceError, Result};
use crate::protocol::{Phase, Record};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::Duration;
use tokio::sync::mpsc::Receiver;
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{StreamExt, StreamMap};
use tracing::{debug, warn};

/// What a worker's control connection reported to the coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    Signal(Phase),
    Partition(Record),
    /// Control connection closed, with the I/O error if there was one
    Disconnected(Option<String>),
}

/// Per-phase completion group with one slot per registered worker.
///
/// Worker event streams are merged with a `StreamMap` keyed by worker index.
/// Partition records observed while waiting are collected per worker.
pub struct PhaseBarrier {
    streams: StreamMap<usize, ReceiverStream<WorkerEvent>>,
    workers: BTreeSet<usize>,
    signalled: HashMap<Phase, HashSet<usize>>,
    disconnected: HashSet<usize>,
}

impl Default for PhaseBarrier {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseBarrier {
    pub fn new() -> Self {
        Self {
            streams: StreamMap::new(),
            workers: BTreeSet::new(),
            signalled: HashMap::new(),
            disconnected: HashSet::new(),
        }
    }

    pub fn add_worker(&mut self, index: usize, events: Receiver<WorkerEvent>) {
        self.workers.insert(index);
        self.streams.insert(index, ReceiverStream::new(events));
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    fn pending(&self, phase: Phase) -> Vec<usize> {
        let done = self.signalled.get(&phase);
        self.workers
            .iter()
            .copied()
            .filter(|w| !done.is_some_and(|d| d.contains(w)))
            .collect()
    }

    /// Blocks until every worker has emitted `SIGNAL:<phase>_DONE`.
    ///
    /// Returns the partition records received while waiting, keyed by worker.
    pub async fn wait_for(
        &mut self,
        phase: Phase,
        timeout: Option<Duration>,
    ) -> Result<HashMap<usize, Vec<Record>>> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut records: HashMap<usize, Vec<Record>> = HashMap::new();

        loop {
            let pending = self.pending(phase);
            if pending.is_empty() {
                return Ok(records);
            }
            if let Some(lost) = pending.iter().find(|w| self.disconnected.contains(w)) {
                return Err(MapReduceError::WorkerLost(*lost));
            }

            let next = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, self.streams.next()).await
                {
                    Ok(next) => next,
                    Err(_) => return Err(MapReduceError::PhaseTimeout { phase, pending }),
                },
                None => self.streams.next().await,
            };

            let Some((worker, event)) = next else {
                // Every event stream has ended without the missing signals
                return Err(MapReduceError::WorkerLost(pending[0]));
            };

            match event {
                WorkerEvent::Signal(signal) => {
                    let fresh = self.signalled.entry(signal).or_default().insert(worker);
                    if !fresh {
                        warn!("worker {} sent duplicate {} signal, ignoring", worker, signal);
                    } else if signal != phase {
                        warn!(
                            "worker {} signalled {} while waiting for {}",
                            worker,
                            signal.done_signal(),
                            phase.done_signal()
                        );
                    } else {
                        debug!("worker {} signalled {}", worker, signal.done_signal());
                    }
                }
                WorkerEvent::Partition(record) => {
                    records.entry(worker).or_default().push(record);
                }
                WorkerEvent::Disconnected(reason) => {
                    match reason {
                        Some(reason) => warn!("worker {} disconnected: {}", worker, reason),
                        None => warn!("worker {} closed its control connection", worker),
                    }
                    self.disconnected.insert(worker);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn barrier_with(n: usize) -> (PhaseBarrier, Vec<mpsc::Sender<WorkerEvent>>) {
        let mut barrier = PhaseBarrier::new();
        let mut senders = Vec::new();
        for index in 0..n {
            let (tx, rx) = mpsc::channel(16);
            barrier.add_worker(index, rx);
            senders.push(tx);
        }
        (barrier, senders)
    }

    #[tokio::test]
    async fn test_waits_for_every_worker() {
        // Arrange
        let (mut barrier, senders) = barrier_with(3);
        for tx in &senders {
            tx.send(WorkerEvent::Signal(Phase::Map)).await.unwrap();
        }

        // Act
        let records = barrier.wait_for(Phase::Map, None).await.unwrap();

        // Assert
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_does_not_release_early() {
        let (mut barrier, senders) = barrier_with(2);
        senders[0]
            .send(WorkerEvent::Signal(Phase::Shuffle))
            .await
            .unwrap();
        // Duplicate signals must not fill the second slot
        senders[0]
            .send(WorkerEvent::Signal(Phase::Shuffle))
            .await
            .unwrap();

        let result = barrier
            .wait_for(Phase::Shuffle, Some(Duration::from_millis(100)))
            .await;

        assert!(matches!(
            result,
            Err(MapReduceError::PhaseTimeout { pending, .. }) if pending == vec![1]
        ));
    }

    #[tokio::test]
    async fn test_collects_partition_records() {
        let (mut barrier, senders) = barrier_with(2);
        senders[1]
            .send(WorkerEvent::Partition(Record::new("x", 4)))
            .await
            .unwrap();
        senders[1]
            .send(WorkerEvent::Signal(Phase::Reduce))
            .await
            .unwrap();
        senders[0]
            .send(WorkerEvent::Signal(Phase::Reduce))
            .await
            .unwrap();

        let records = barrier.wait_for(Phase::Reduce, None).await.unwrap();

        assert_eq!(records.get(&1), Some(&vec![Record::new("x", 4)]));
        assert!(!records.contains_key(&0));
    }

    #[tokio::test]
    async fn test_disconnect_fails_the_phase() {
        let (mut barrier, senders) = barrier_with(2);
        senders[0]
            .send(WorkerEvent::Signal(Phase::Map))
            .await
            .unwrap();
        senders[1]
            .send(WorkerEvent::Disconnected(Some("reset".into())))
            .await
            .unwrap();

        let result = barrier.wait_for(Phase::Map, None).await;

        assert!(matches!(result, Err(MapReduceError::WorkerLost(1))));
    }

    #[tokio::test]
    async fn test_disconnect_after_signal_is_not_fatal_for_that_phase() {
        let (mut barrier, senders) = barrier_with(1);
        senders[0]
            .send(WorkerEvent::Signal(Phase::Reduce))
            .await
            .unwrap();
        senders[0]
            .send(WorkerEvent::Disconnected(None))
            .await
            .unwrap();

        assert!(barrier.wait_for(Phase::Reduce, None).await.is_ok());
    }
}
