// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Newline-framed ASCII protocol shared by coordinator, workers and peers.
//!
//! Coordinator to worker: `MAP <split>`, `SHUFFLE`, `REDUCE`.
//! Worker to coordinator: `REGISTER <port>`, `SIGNAL:<PHASE>_DONE`, and
//! `PARTITION:<token>:<count>` records streamed ahead of `SIGNAL:REDUCE_DONE`.
//! Worker to worker: bare `<token>:<count>` records.

use crate::error::{MapReduceError, Result};
use std::fmt;

const SIGNAL_PREFIX: &str = "SIGNAL:";
const PARTITION_PREFIX: &str = "PARTITION:";
const REGISTER_PREFIX: &str = "REGISTER ";

/// Pipeline phases, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Map,
    Shuffle,
    Reduce,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::Map, Phase::Shuffle, Phase::Reduce];

    pub fn name(&self) -> &'static str {
        match self {
            Phase::Map => "MAP",
            Phase::Shuffle => "SHUFFLE",
            Phase::Reduce => "REDUCE",
        }
    }

    /// Signal name emitted by a worker once the phase is complete
    pub fn done_signal(&self) -> &'static str {
        match self {
            Phase::Map => "MAP_DONE",
            Phase::Shuffle => "SHUFFLE_DONE",
            Phase::Reduce => "REDUCE_DONE",
        }
    }

    fn from_done_signal(signal: &str) -> Option<Phase> {
        Phase::ALL.into_iter().find(|p| p.done_signal() == signal)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single `token:count` pair as carried on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub token: String,
    pub count: u64,
}

impl Record {
    pub fn new(token: impl Into<String>, count: u64) -> Self {
        Self {
            token: token.into(),
            count,
        }
    }

    /// Parses `token:count`, splitting on the last colon
    pub fn parse(line: &str) -> Result<Self> {
        let (token, count) = line
            .rsplit_once(':')
            .ok_or_else(|| MapReduceError::Protocol(format!("record without ':': '{}'", line)))?;
        if token.is_empty() {
            return Err(MapReduceError::Protocol(format!(
                "record with empty token: '{}'",
                line
            )));
        }
        let count = count
            .trim()
            .parse::<u64>()
            .map_err(|e| MapReduceError::Protocol(format!("bad count in '{}': {}", line, e)))?;
        Ok(Self::new(token, count))
    }

    pub fn encode(&self) -> String {
        format!("{}:{}", self.token, self.count)
    }
}

/// Commands sent by the coordinator over the control connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Map(String),
    Shuffle,
    Reduce,
}

impl Command {
    pub fn phase(&self) -> Phase {
        match self {
            Command::Map(_) => Phase::Map,
            Command::Shuffle => Phase::Shuffle,
            Command::Reduce => Phase::Reduce,
        }
    }

    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim_end_matches('\r');
        match line.split_once(' ') {
            Some(("MAP", split)) if !split.trim().is_empty() => {
                Ok(Command::Map(split.trim().to_string()))
            }
            None if line == "SHUFFLE" => Ok(Command::Shuffle),
            None if line == "REDUCE" => Ok(Command::Reduce),
            _ => Err(MapReduceError::Protocol(format!(
                "unknown command '{}'",
                line
            ))),
        }
    }

    pub fn encode(&self) -> String {
        match self {
            Command::Map(split) => format!("MAP {}", split),
            Command::Shuffle => "SHUFFLE".to_string(),
            Command::Reduce => "REDUCE".to_string(),
        }
    }
}

/// Messages sent by a worker over the control connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerMessage {
    Register(u16),
    Signal(Phase),
    Partition(Record),
}

impl WorkerMessage {
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim_end_matches('\r');
        if let Some(signal) = line.strip_prefix(SIGNAL_PREFIX) {
            return Phase::from_done_signal(signal)
                .map(WorkerMessage::Signal)
                .ok_or_else(|| MapReduceError::Protocol(format!("unknown signal '{}'", signal)));
        }
        if let Some(record) = line.strip_prefix(PARTITION_PREFIX) {
            return Record::parse(record).map(WorkerMessage::Partition);
        }
        if let Some(port) = line.strip_prefix(REGISTER_PREFIX) {
            return port
                .trim()
                .parse::<u16>()
                .map(WorkerMessage::Register)
                .map_err(|e| MapReduceError::Protocol(format!("bad port '{}': {}", port, e)));
        }
        Err(MapReduceError::Protocol(format!(
            "unknown worker message '{}'",
            line
        )))
    }

    pub fn encode(&self) -> String {
        match self {
            WorkerMessage::Register(port) => format!("{}{}", REGISTER_PREFIX, port),
            WorkerMessage::Signal(phase) => format!("{}{}", SIGNAL_PREFIX, phase.done_signal()),
            WorkerMessage::Partition(record) => format!("{}{}", PARTITION_PREFIX, record.encode()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            Command::parse("MAP splits/split0.wet").unwrap(),
            Command::Map("splits/split0.wet".to_string())
        );
        assert_eq!(Command::parse("SHUFFLE").unwrap(), Command::Shuffle);
        assert_eq!(Command::parse("REDUCE\r").unwrap(), Command::Reduce);
    }

    #[test]
    fn test_map_keeps_spaces_in_split_path() {
        let command = Command::parse("MAP /data/my corpus/split1.wet").unwrap();

        assert_eq!(
            command,
            Command::Map("/data/my corpus/split1.wet".to_string())
        );
    }

    #[test]
    fn test_reject_unknown_or_incomplete_commands() {
        assert!(Command::parse("MAP").is_err());
        assert!(Command::parse("MAP   ").is_err());
        assert!(Command::parse("SHUFFLE now").is_err());
        assert!(Command::parse("RESULT").is_err());
    }

    #[test]
    fn test_worker_messages_match_wire_format() {
        assert_eq!(WorkerMessage::Register(9001).encode(), "REGISTER 9001");
        assert_eq!(
            WorkerMessage::Signal(Phase::Shuffle).encode(),
            "SIGNAL:SHUFFLE_DONE"
        );
        assert_eq!(
            WorkerMessage::Partition(Record::new("rust", 3)).encode(),
            "PARTITION:rust:3"
        );
    }

    #[test]
    fn test_parse_worker_messages() {
        assert_eq!(
            WorkerMessage::parse("SIGNAL:MAP_DONE").unwrap(),
            WorkerMessage::Signal(Phase::Map)
        );
        assert_eq!(
            WorkerMessage::parse("REGISTER 7000").unwrap(),
            WorkerMessage::Register(7000)
        );
        assert_eq!(
            WorkerMessage::parse("PARTITION:word:12").unwrap(),
            WorkerMessage::Partition(Record::new("word", 12))
        );
        assert!(WorkerMessage::parse("SIGNAL:DONE").is_err());
        assert!(WorkerMessage::parse("REGISTER abc").is_err());
    }

    #[test]
    fn test_record_rejects_malformed_lines() {
        assert!(Record::parse("nocolon").is_err());
        assert!(Record::parse(":4").is_err());
        assert!(Record::parse("word:-1").is_err());
        assert!(Record::parse("word:").is_err());
    }
}
