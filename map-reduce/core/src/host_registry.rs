// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::error::{MapReduceError, Result};
use std::fmt;
use std::fs;
use std::path::Path;

/// One worker's peer-facing endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerEndpoint {
    pub index: usize,
    pub host: String,
    pub port: u16,
}

impl WorkerEndpoint {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for WorkerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker {} ({}:{})", self.index, self.host, self.port)
    }
}

/// Static index -> endpoint table, identical on every node.
///
/// The line position in `workers.txt` is the global worker index used by the
/// partitioner, so every node must load the same file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRegistry {
    endpoints: Vec<WorkerEndpoint>,
}

impl HostRegistry {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| MapReduceError::io(path, e))?;
        let registry = Self::parse(&contents)?;
        if registry.is_empty() {
            return Err(MapReduceError::EmptyRegistry(path.to_path_buf()));
        }
        Ok(registry)
    }

    /// Parses newline-delimited `host:port` entries. Blank lines are skipped
    /// so a trailing newline is harmless.
    pub fn parse(contents: &str) -> Result<Self> {
        let mut endpoints = Vec::new();
        for (line_no, line) in contents.lines().enumerate() {
            let entry = line.trim();
            if entry.is_empty() {
                continue;
            }
            let invalid = |reason: &str| MapReduceError::InvalidRegistryEntry {
                line: line_no + 1,
                entry: entry.to_string(),
                reason: reason.to_string(),
            };
            let (host, port) = entry
                .rsplit_once(':')
                .ok_or_else(|| invalid("expected host:port"))?;
            if host.is_empty() {
                return Err(invalid("empty host"));
            }
            let port = port
                .parse::<u16>()
                .map_err(|_| invalid("port is not a number in 0..=65535"))?;
            endpoints.push(WorkerEndpoint {
                index: endpoints.len(),
                host: host.to_string(),
                port,
            });
        }
        Ok(Self { endpoints })
    }

    pub fn from_endpoints<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, u16)>,
        S: Into<String>,
    {
        let endpoints = entries
            .into_iter()
            .enumerate()
            .map(|(index, (host, port))| WorkerEndpoint {
                index,
                host: host.into(),
                port,
            })
            .collect();
        Self { endpoints }
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&WorkerEndpoint> {
        self.endpoints.get(index)
    }

    pub fn endpoints(&self) -> &[WorkerEndpoint] {
        &self.endpoints
    }

    /// Resolves a worker by listen port, using the host to disambiguate when
    /// several entries share the port. Hosts are compared as text, so callers
    /// holding a socket address must resolve host names themselves.
    pub fn resolve(&self, host: Option<&str>, port: u16) -> Result<&WorkerEndpoint> {
        let by_port: Vec<&WorkerEndpoint> =
            self.endpoints.iter().filter(|e| e.port == port).collect();

        let found = match (by_port.as_slice(), host) {
            ([single], _) => Some(*single),
            (candidates, Some(host)) => candidates
                .iter()
                .copied()
                .find(|e| hosts_match(&e.host, host)),
            _ => None,
        };

        found.ok_or_else(|| MapReduceError::UnknownWorker {
            host: host.unwrap_or("*").to_string(),
            port,
        })
    }

    pub fn with_port(&self, port: u16) -> impl Iterator<Item = &WorkerEndpoint> {
        self.endpoints.iter().filter(move |e| e.port == port)
    }
}

fn hosts_match(registered: &str, observed: &str) -> bool {
    let is_loopback = |h: &str| matches!(h, "127.0.0.1" | "::1");
    registered == observed || (is_loopback(registered) && is_loopback(observed))
}
