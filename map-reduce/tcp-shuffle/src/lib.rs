// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! TCP transport for the word-count pipeline: coordinator control channel,
//! worker control loop and the peer-to-peer shuffle.

pub mod coordinator;
pub mod framing;
pub mod local_cluster;
pub mod peer_shuffle_sender;
pub mod peer_shuffle_server;
pub mod worker;
pub mod worker_handler;

pub use coordinator::{Coordinator, PipelineReport};
pub use local_cluster::{LocalCluster, LocalRun};
pub use worker::{Worker, WorkerState};
