// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use map_reduce_core::{MapReduceError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Files making up an input: the path itself, or every regular file of a
/// directory in name order.
pub fn input_files(path: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let path = path.as_ref();
    let metadata = fs::metadata(path).map_err(|e| MapReduceError::io(path, e))?;
    if !metadata.is_dir() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut files = Vec::new();
    for entry in fs::read_dir(path).map_err(|e| MapReduceError::io(path, e))? {
        let entry = entry.map_err(|e| MapReduceError::io(path, e))?;
        let file_type = entry
            .file_type()
            .map_err(|e| MapReduceError::io(entry.path(), e))?;
        if file_type.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

/// Reads an input file or directory into lines. Invalid UTF-8 is replaced,
/// which the tokenizer treats as separators anyway.
pub fn read_input_lines(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let files = input_files(path.as_ref())?;
    let mut lines = Vec::new();
    for file in &files {
        let bytes = fs::read(file).map_err(|e| MapReduceError::io(file, e))?;
        let before = lines.len();
        lines.extend(String::from_utf8_lossy(&bytes).lines().map(str::to_owned));
        debug!(file = %file.display(), lines = lines.len() - before, "Input file read");
    }
    info!(files = files.len(), lines = lines.len(), "Input loaded");
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("input.txt");
        fs::write(&file, "first line\r\nsecond\n\nlast").unwrap();

        let lines = read_input_lines(&file).unwrap();

        assert_eq!(lines, vec!["first line", "second", "", "last"]);
    }

    #[test]
    fn test_directory_files_in_name_order() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.txt"), "beta\n").unwrap();
        fs::write(dir.path().join("a.txt"), "alpha\n").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested").join("c.txt"), "ignored\n").unwrap();

        // Act
        let lines = read_input_lines(dir.path()).unwrap();

        // Assert
        assert_eq!(lines, vec!["alpha", "beta"]);
    }

    #[test]
    fn test_missing_input_is_io_error() {
        let result = read_input_lines("/no/such/input.txt");

        assert!(matches!(result, Err(MapReduceError::Io { .. })));
    }
}
