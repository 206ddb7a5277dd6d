// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::framing::control_error;
use futures::SinkExt;
use map_reduce_core::host_registry::WorkerEndpoint;
use map_reduce_core::phase_barrier::WorkerEvent;
use map_reduce_core::protocol::{Command, WorkerMessage};
use map_reduce_core::Result;
use std::net::SocketAddr;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tracing::{debug, warn};

const EVENT_BUFFER: usize = 1024;

/// Coordinator-side end of one worker's control connection.
///
/// Commands go out through `send`; a reader task turns incoming lines into
/// `WorkerEvent`s for the phase barrier.
pub struct WorkerHandler {
    endpoint: WorkerEndpoint,
    peer_addr: SocketAddr,
    commands: FramedWrite<OwnedWriteHalf, LinesCodec>,
    reader: JoinHandle<()>,
}

impl WorkerHandler {
    /// `lines` must be the reader that consumed the `REGISTER` line so no
    /// buffered input is lost.
    pub fn spawn(
        endpoint: WorkerEndpoint,
        peer_addr: SocketAddr,
        lines: FramedRead<OwnedReadHalf, LinesCodec>,
        writer: OwnedWriteHalf,
    ) -> (Self, mpsc::Receiver<WorkerEvent>) {
        let (events, receiver) = mpsc::channel(EVENT_BUFFER);
        let reader = tokio::spawn(read_events(endpoint.index, peer_addr, lines, events));
        let handler = Self {
            endpoint,
            peer_addr,
            commands: FramedWrite::new(writer, LinesCodec::new()),
            reader,
        };
        (handler, receiver)
    }

    pub fn index(&self) -> usize {
        self.endpoint.index
    }

    pub fn endpoint(&self) -> &WorkerEndpoint {
        &self.endpoint
    }

    pub async fn send(&mut self, command: &Command) -> Result<()> {
        debug!(worker = self.endpoint.index, command = %command.encode(), "Sending command");
        self.commands
            .send(command.encode())
            .await
            .map_err(|e| control_error(&self.peer_addr.to_string(), e))
    }

    /// Closes the control connection, which ends the worker's session
    pub async fn close(mut self) {
        if let Err(e) = self.commands.get_mut().shutdown().await {
            debug!(worker = self.endpoint.index, error = %e, "Control shutdown failed");
        }
        self.reader.abort();
    }
}

async fn read_events(
    index: usize,
    peer: SocketAddr,
    mut lines: FramedRead<OwnedReadHalf, LinesCodec>,
    events: mpsc::Sender<WorkerEvent>,
) {
    let disconnect_reason = loop {
        let line = match lines.next().await {
            Some(Ok(line)) => line,
            Some(Err(e)) => break Some(e.to_string()),
            None => break None,
        };
        if line.trim().is_empty() {
            continue;
        }

        let event = match WorkerMessage::parse(&line) {
            Ok(WorkerMessage::Signal(phase)) => WorkerEvent::Signal(phase),
            Ok(WorkerMessage::Partition(record)) => WorkerEvent::Partition(record),
            Ok(WorkerMessage::Register(port)) => {
                warn!(worker = index, %peer, port, "Ignoring repeated registration");
                continue;
            }
            Err(e) => {
                warn!(worker = index, %peer, error = %e, "Ignoring malformed worker message");
                continue;
            }
        };
        if events.send(event).await.is_err() {
            return;
        }
    };

    debug!(worker = index, %peer, reason = ?disconnect_reason, "Control connection closed");
    let _ = events.send(WorkerEvent::Disconnected(disconnect_reason)).await;
}
