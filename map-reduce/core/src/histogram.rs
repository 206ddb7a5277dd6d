// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::error::{MapReduceError, Result};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

/// Coordinator-side union of every worker's reduced partition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FinalHistogram {
    counts: BTreeMap<String, u64>,
    #[serde(skip)]
    owners: HashMap<String, usize>,
}

impl FinalHistogram {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one worker's partition. Partitions must be disjoint: a token
    /// already contributed by another worker is an error.
    pub fn absorb_partition<I>(&mut self, worker: usize, partition: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, u64)>,
    {
        for (token, count) in partition {
            match self.owners.get(&token) {
                Some(&first) if first != worker => {
                    return Err(MapReduceError::OverlappingPartition {
                        token,
                        first,
                        second: worker,
                    });
                }
                Some(_) => {}
                None => {
                    self.owners.insert(token.clone(), worker);
                }
            }
            *self.counts.entry(token).or_insert(0) += count;
        }
        Ok(())
    }

    pub fn get(&self, token: &str) -> Option<u64> {
        self.counts.get(token).copied()
    }

    pub fn distinct_tokens(&self) -> usize {
        self.counts.len()
    }

    pub fn total_occurrences(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Worker index that reduced `token`
    pub fn owner(&self, token: &str) -> Option<usize> {
        self.owners.get(token).copied()
    }

    pub fn counts(&self) -> &BTreeMap<String, u64> {
        &self.counts
    }

    pub fn into_counts(self) -> BTreeMap<String, u64> {
        self.counts
    }

    /// The `k` most frequent tokens, count descending then token ascending
    pub fn top_k(&self, k: usize) -> Vec<(&str, u64)> {
        let mut sorted: Vec<(&str, u64)> = self
            .counts
            .iter()
            .map(|(token, count)| (token.as_str(), *count))
            .collect();
        sorted.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
        sorted.truncate(k);
        sorted
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(&self.counts)
            .map_err(|e| MapReduceError::Config(format!("cannot serialize histogram: {}", e)))?;
        fs::write(path, json).map_err(|e| MapReduceError::io(path, e))
    }
}
