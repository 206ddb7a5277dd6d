// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use map_reduce_core::{MapReduceError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Contiguous run of input lines assigned to one worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    pub index: usize,
    pub lines: Vec<String>,
}

impl Split {
    pub fn file_name(index: usize) -> String {
        format!("split{}.wet", index)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        for line in &self.lines {
            bytes.extend_from_slice(line.as_bytes());
            bytes.push(b'\n');
        }
        bytes
    }

    pub fn write_to(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(Self::file_name(self.index));
        fs::write(&path, self.to_bytes()).map_err(|e| MapReduceError::io(&path, e))?;
        debug!(
            split = self.index,
            lines = self.lines.len(),
            path = %path.display(),
            "Split written"
        );
        Ok(path)
    }
}

/// Sizes of `num_workers` splits over `total` lines: the first
/// `total % num_workers` splits carry one extra line.
pub fn split_sizes(total: usize, num_workers: usize) -> Result<Vec<usize>> {
    if num_workers == 0 {
        return Err(MapReduceError::ZeroWorkers);
    }
    let base = total / num_workers;
    let extra = total % num_workers;
    Ok((0..num_workers)
        .map(|i| base + usize::from(i < extra))
        .collect())
}

/// Partitions lines into exactly `num_workers` contiguous splits, preserving
/// order. Splits may be empty when there are fewer lines than workers.
pub fn split_lines(lines: Vec<String>, num_workers: usize) -> Result<Vec<Split>> {
    let sizes = split_sizes(lines.len(), num_workers)?;
    let mut remaining = lines.into_iter();
    Ok(sizes
        .into_iter()
        .enumerate()
        .map(|(index, size)| Split {
            index,
            lines: remaining.by_ref().take(size).collect(),
        })
        .collect())
}

/// Writes every split under `dir`, creating it if needed. Returned paths are
/// indexed by split.
pub fn write_splits(dir: impl AsRef<Path>, splits: &[Split]) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir).map_err(|e| MapReduceError::io(dir, e))?;
    splits.iter().map(|split| split.write_to(dir)).collect()
}
