// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

pub mod config;
pub mod error;
pub mod histogram;
pub mod host_registry;
pub mod in_memory_partition_store;
pub mod logging;
pub mod partition_store;
pub mod partitioner;
pub mod phase_barrier;
pub mod protocol;

pub use error::{MapReduceError, Result};
