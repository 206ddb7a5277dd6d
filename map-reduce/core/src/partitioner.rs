// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::error::{MapReduceError, Result};
use fnv::FnvHasher;
use std::hash::Hasher;

/// Stable, unseeded hash of a token. Identical on every node and build.
pub fn token_hash(token: &str) -> u64 {
    let mut hasher = FnvHasher::default();
    hasher.write(token.as_bytes());
    hasher.finish()
}

/// Maps tokens onto the reducer that owns them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partitioner {
    num_workers: usize,
}

impl Partitioner {
    pub fn new(num_workers: usize) -> Result<Self> {
        if num_workers == 0 {
            return Err(MapReduceError::ZeroWorkers);
        }
        Ok(Self { num_workers })
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Index in `[0, num_workers)` of the worker owning `token`
    pub fn partition(&self, token: &str) -> usize {
        (token_hash(token) % self.num_workers as u64) as usize
    }
}
