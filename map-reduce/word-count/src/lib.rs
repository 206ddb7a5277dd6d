// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Word-count specifics: tokenizing, per-split counting and input splitting

pub mod input;
pub mod local_count_map;
pub mod split;
pub mod tokenizer;

pub use input::{input_files, read_input_lines};
pub use local_count_map::{count_words, LocalCountMap};
pub use split::{split_lines, split_sizes, write_splits, Split};
pub use tokenizer::tokenize;
