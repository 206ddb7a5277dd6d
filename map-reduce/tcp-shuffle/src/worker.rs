// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::framing::{command_reader, control_error};
use crate::peer_shuffle_sender::PeerShuffleSender;
use crate::peer_shuffle_server::PeerShuffleServer;
use futures::SinkExt;
use map_reduce_core::host_registry::HostRegistry;
use map_reduce_core::partition_store::PartitionStore;
use map_reduce_core::partitioner::Partitioner;
use map_reduce_core::protocol::{Command, Phase, Record, WorkerMessage};
use map_reduce_core::{MapReduceError, Result};
use map_reduce_word_count::LocalCountMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio_stream::StreamExt;
use tokio_util::codec::{FramedWrite, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Lifecycle of a worker's control session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Connecting,
    Registered,
    Mapping,
    Mapped,
    Shuffling,
    Shuffled,
    Reducing,
    Done,
}

impl WorkerState {
    /// State a command may be accepted in
    fn accepting(command: &Command) -> WorkerState {
        match command {
            Command::Map(_) => WorkerState::Registered,
            Command::Shuffle => WorkerState::Mapped,
            Command::Reduce => WorkerState::Shuffled,
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Connecting => "CONNECTING",
            WorkerState::Registered => "REGISTERED",
            WorkerState::Mapping => "MAPPING",
            WorkerState::Mapped => "MAPPED",
            WorkerState::Shuffling => "SHUFFLING",
            WorkerState::Shuffled => "SHUFFLED",
            WorkerState::Reducing => "REDUCING",
            WorkerState::Done => "DONE",
        };
        f.write_str(name)
    }
}

type ControlSink = FramedWrite<OwnedWriteHalf, LinesCodec>;

/// One worker node: a peer shuffle listener plus the control session with
/// the coordinator.
pub struct Worker<S: PartitionStore> {
    index: usize,
    listen_port: u16,
    map_threads: usize,
    state: WorkerState,
    local_counts: LocalCountMap,
    store: S,
    sender: PeerShuffleSender,
    peer_server: PeerShuffleServer,
}

impl<S: PartitionStore> Worker<S> {
    /// Starts serving peers on `listener`. The listener must already be bound
    /// to the port registered for `index`.
    pub fn start(
        listener: TcpListener,
        index: usize,
        registry: Arc<HostRegistry>,
        map_threads: usize,
        store: S,
    ) -> Result<Self> {
        let sender = PeerShuffleSender::new(index, registry.clone())?;
        let partitioner = Partitioner::new(registry.len())?;
        let peer_server = PeerShuffleServer::serve(
            listener,
            index,
            partitioner,
            store.clone(),
            CancellationToken::new(),
        )?;

        Ok(Self {
            index,
            listen_port: peer_server.local_addr().port(),
            map_threads: map_threads.max(1),
            state: WorkerState::Connecting,
            local_counts: LocalCountMap::new(),
            store,
            sender,
            peer_server,
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn listen_port(&self) -> u16 {
        self.listen_port
    }

    /// Registers with the coordinator and services commands until the
    /// coordinator hangs up or `shutdown` fires. The peer listener is closed
    /// on every exit path.
    pub async fn run(mut self, coordinator_addr: &str, shutdown: CancellationToken) -> Result<()> {
        let result = self.control_loop(coordinator_addr, &shutdown).await;
        self.peer_server.close().await;
        match &result {
            Ok(()) => info!(worker = self.index, state = %self.state, "Worker finished"),
            Err(e) => info!(worker = self.index, state = %self.state, error = %e, "Worker aborted"),
        }
        result
    }

    async fn control_loop(&mut self, addr: &str, shutdown: &CancellationToken) -> Result<()> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| MapReduceError::Connect {
                addr: addr.to_string(),
                source,
            })?;
        let (reader, writer) = stream.into_split();
        let mut commands = command_reader(reader);
        let mut control = FramedWrite::new(writer, LinesCodec::new());

        send(&mut control, addr, WorkerMessage::Register(self.listen_port)).await?;
        self.state = WorkerState::Registered;
        info!(worker = self.index, coordinator = addr, port = self.listen_port, "Registered");

        loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!(worker = self.index, "Shutdown requested");
                    return Ok(());
                }
                next = commands.next() => next,
            };

            let line = match next {
                Some(Ok(line)) => line,
                Some(Err(e)) => return Err(control_error(addr, e)),
                None if self.state == WorkerState::Done => {
                    debug!(worker = self.index, "Coordinator closed the control channel");
                    return Ok(());
                }
                None => return Err(MapReduceError::ControlChannelClosed(addr.to_string())),
            };
            if line.trim().is_empty() {
                continue;
            }

            let command = Command::parse(&line)?;
            self.execute(command, &mut control, addr).await?;
        }
    }

    async fn execute(
        &mut self,
        command: Command,
        control: &mut ControlSink,
        addr: &str,
    ) -> Result<()> {
        if self.state != WorkerState::accepting(&command) {
            return Err(MapReduceError::UnexpectedCommand {
                command: command.encode(),
                state: self.state.to_string(),
            });
        }

        let started = Instant::now();
        let phase = command.phase();
        match command {
            Command::Map(split) => {
                self.state = WorkerState::Mapping;
                self.map(PathBuf::from(split)).await?;
                self.state = WorkerState::Mapped;
            }
            Command::Shuffle => {
                self.state = WorkerState::Shuffling;
                let counts = std::mem::take(&mut self.local_counts).into_counts();
                let summary = self.sender.shuffle(counts, &self.store).await;
                info!(
                    worker = self.index,
                    kept_local = summary.kept_local,
                    sent = summary.sent,
                    dropped = summary.dropped,
                    "Shuffle sent"
                );
                self.state = WorkerState::Shuffled;
            }
            Command::Reduce => {
                self.state = WorkerState::Reducing;
                self.reduce(control, addr).await?;
            }
        }

        send(control, addr, WorkerMessage::Signal(phase)).await?;
        if phase == Phase::Reduce {
            self.state = WorkerState::Done;
        }
        debug!(
            worker = self.index,
            %phase,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Phase complete"
        );
        Ok(())
    }

    async fn map(&mut self, split: PathBuf) -> Result<()> {
        let threads = self.map_threads;
        let path = split.clone();
        let counts = tokio::task::spawn_blocking(move || {
            let mut counts = LocalCountMap::new();
            counts.accumulate_file(&path, threads).map(|_| counts)
        })
        .await
        .map_err(|e| MapReduceError::Task(e.to_string()))??;

        info!(
            worker = self.index,
            split = %split.display(),
            distinct = counts.len(),
            total = counts.total(),
            "Split mapped"
        );
        self.local_counts = counts;
        Ok(())
    }

    /// Streams the partition store back as `PARTITION:` lines ahead of the
    /// REDUCE signal.
    async fn reduce(&mut self, control: &mut ControlSink, addr: &str) -> Result<()> {
        let partition = self.store.snapshot().await;
        let total: u64 = partition.values().sum();
        info!(
            worker = self.index,
            distinct = partition.len(),
            total,
            "Reducing partition"
        );

        for (token, count) in partition {
            let message = WorkerMessage::Partition(Record::new(token, count));
            control
                .feed(message.encode())
                .await
                .map_err(|e| control_error(addr, e))?;
        }
        Ok(())
    }
}

async fn send(control: &mut ControlSink, addr: &str, message: WorkerMessage) -> Result<()> {
    control
        .send(message.encode())
        .await
        .map_err(|e| control_error(addr, e))
}
