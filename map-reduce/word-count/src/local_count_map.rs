// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::tokenizer::tokenize;
use map_reduce_core::{MapReduceError, Result};
use rayon::prelude::*;
use std::collections::hash_map;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Token counts for one worker's split, built during MAP
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalCountMap {
    counts: HashMap<String, u64>,
}

impl LocalCountMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tokenizes `text` and adds one per occurrence. Not idempotent: feeding
    /// the same split twice doubles its counts.
    pub fn accumulate(&mut self, text: &[u8]) {
        for token in tokenize(text) {
            *self.counts.entry(token).or_insert(0) += 1;
        }
    }

    /// Same result as `accumulate`, tokenizing line-aligned chunks on a
    /// dedicated rayon pool of `threads` threads.
    pub fn accumulate_parallel(&mut self, text: &[u8], threads: usize) -> Result<()> {
        if threads <= 1 {
            self.accumulate(text);
            return Ok(());
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map_err(|e| MapReduceError::Config(format!("cannot build map thread pool: {}", e)))?;

        let chunks = line_aligned_chunks(text, threads);
        let partial = pool.install(|| {
            chunks
                .par_iter()
                .fold(HashMap::<String, u64>::new, |mut map, chunk| {
                    for token in tokenize(chunk) {
                        *map.entry(token).or_insert(0) += 1;
                    }
                    map
                })
                .reduce(HashMap::new, merge_counts)
        });

        self.counts = merge_counts(std::mem::take(&mut self.counts), partial);
        Ok(())
    }

    /// Reads a materialized split from disk and accumulates it
    pub fn accumulate_file(&mut self, path: impl AsRef<Path>, threads: usize) -> Result<()> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|e| MapReduceError::io(path, e))?;
        self.accumulate_parallel(&bytes, threads)
    }

    pub fn get(&self, token: &str) -> Option<u64> {
        self.counts.get(token).copied()
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn iter(&self) -> hash_map::Iter<'_, String, u64> {
        self.counts.iter()
    }

    /// Empties the map, yielding entries in unspecified order
    pub fn drain(&mut self) -> hash_map::Drain<'_, String, u64> {
        self.counts.drain()
    }

    pub fn into_counts(self) -> HashMap<String, u64> {
        self.counts
    }
}

fn merge_counts(
    mut into: HashMap<String, u64>,
    from: HashMap<String, u64>,
) -> HashMap<String, u64> {
    if into.len() < from.len() {
        return merge_counts(from, into);
    }
    for (token, count) in from {
        *into.entry(token).or_insert(0) += count;
    }
    into
}

/// Splits `text` into at most `parts` pieces, cutting only after a newline
fn line_aligned_chunks(text: &[u8], parts: usize) -> Vec<&[u8]> {
    let target = text.len().div_ceil(parts.max(1)).max(1);
    let mut chunks = Vec::with_capacity(parts);
    let mut start = 0;
    while start < text.len() {
        let mut end = (start + target).min(text.len());
        while end < text.len() && text[end - 1] != b'\n' {
            end += 1;
        }
        chunks.push(&text[start..end]);
        start = end;
    }
    chunks
}

/// Single-threaded reference count over a whole input
pub fn count_words(text: &[u8]) -> HashMap<String, u64> {
    let mut map = LocalCountMap::new();
    map.accumulate(text);
    map.into_counts()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulate_counts_occurrences() {
        let mut map = LocalCountMap::new();

        map.accumulate(b"a b a\nc\n");

        assert_eq!(map.get("a"), Some(2));
        assert_eq!(map.get("b"), Some(1));
        assert_eq!(map.get("c"), Some(1));
        assert_eq!(map.len(), 3);
        assert_eq!(map.total(), 4);
    }

    #[test]
    fn test_accumulating_twice_doubles() {
        let mut map = LocalCountMap::new();

        map.accumulate(b"x y");
        map.accumulate(b"x y");

        assert_eq!(map.get("x"), Some(2));
    }

    #[test]
    fn test_drain_empties_the_map() {
        let mut map = LocalCountMap::new();
        map.accumulate(b"one two two");

        let mut drained: Vec<(String, u64)> = map.drain().collect();
        drained.sort();

        assert_eq!(
            drained,
            vec![("one".to_string(), 1), ("two".to_string(), 2)]
        );
        assert!(map.is_empty());
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let mut text = String::new();
        for i in 0..2_000 {
            text.push_str(&format!("Line {} has words, Words and WORDS {}\n", i, i % 7));
        }

        let mut sequential = LocalCountMap::new();
        sequential.accumulate(text.as_bytes());
        let mut parallel = LocalCountMap::new();
        parallel.accumulate_parallel(text.as_bytes(), 4).unwrap();

        assert_eq!(sequential, parallel);
        assert_eq!(parallel.get("words"), Some(6_000));
    }

    #[test]
    fn test_chunks_cover_input_on_line_boundaries() {
        let text = b"aa\nbbbb\nc\n\nddddd";

        let chunks = line_aligned_chunks(text, 3);

        assert_eq!(chunks.concat(), text.to_vec());
        for chunk in &chunks[..chunks.len() - 1] {
            assert_eq!(chunk.last(), Some(&b'\n'));
        }
        assert!(line_aligned_chunks(b"", 4).is_empty());
    }

    #[test]
    fn test_accumulate_missing_file_is_io_error() {
        let mut map = LocalCountMap::new();

        let result = map.accumulate_file("/definitely/not/here.wet", 1);

        assert!(matches!(result, Err(MapReduceError::Io { .. })));
    }
}
