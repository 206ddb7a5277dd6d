// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::protocol::Phase;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, MapReduceError>;

/// Errors surfaced by coordinator and worker nodes
#[derive(Error, Debug)]
pub enum MapReduceError {
    /// Invalid configuration value or unreadable configuration file
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid registry entry on line {line}: '{entry}' ({reason})")]
    InvalidRegistryEntry {
        line: usize,
        entry: String,
        reason: String,
    },

    #[error("host registry {0} contains no workers")]
    EmptyRegistry(PathBuf),

    /// Registered worker count differs from the registry length
    #[error("registry lists {expected} workers but {registered} registered")]
    RegistryMismatch { expected: usize, registered: usize },

    #[error("no registry entry matches {host}:{port}")]
    UnknownWorker { host: String, port: u16 },

    #[error("worker count must be at least 1")]
    ZeroWorkers,

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Read or write failure on an established control connection
    #[error("control channel with {peer} failed: {source}")]
    ControlChannel {
        peer: String,
        #[source]
        source: std::io::Error,
    },

    /// Write or close failure while streaming records to a peer
    #[error("peer shuffle connection to {addr} failed: {source}")]
    PeerChannel {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("control channel with {0} closed before the pipeline finished")]
    ControlChannelClosed(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("unexpected command {command} in state {state}")]
    UnexpectedCommand { command: String, state: String },

    #[error("worker {0} disconnected before completing the phase")]
    WorkerLost(usize),

    #[error("phase {phase} timed out waiting for workers {pending:?}")]
    PhaseTimeout { phase: Phase, pending: Vec<usize> },

    #[error("background task failed: {0}")]
    Task(String),

    /// Two reducers returned the same token
    #[error("token '{token}' reduced by both worker {first} and worker {second}")]
    OverlappingPartition {
        token: String,
        first: usize,
        second: usize,
    },
}

impl MapReduceError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MapReduceError::Io {
            path: path.into(),
            source,
        }
    }
}
