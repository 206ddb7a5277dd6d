// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::framing::{bind_listener, command_reader, control_error};
use crate::worker_handler::WorkerHandler;
use map_reduce_core::config::Config;
use map_reduce_core::histogram::FinalHistogram;
use map_reduce_core::host_registry::{HostRegistry, WorkerEndpoint};
use map_reduce_core::phase_barrier::PhaseBarrier;
use map_reduce_core::protocol::{Command, Phase, Record, WorkerMessage};
use map_reduce_core::{MapReduceError, Result};
use map_reduce_word_count::{split_lines, write_splits};
use std::collections::HashMap;
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{lookup_host, TcpListener, TcpStream};
use tokio::task::{JoinError, JoinSet};
use tokio::time::{timeout_at, Instant};
use tokio_stream::StreamExt;
use tokio_util::codec::{FramedRead, LinesCodec};
use tracing::{debug, info, warn};

/// Result of a completed MAP / SHUFFLE / REDUCE run
#[derive(Debug)]
pub struct PipelineReport {
    pub num_workers: usize,
    pub phase_durations: Vec<(Phase, Duration)>,
    pub histogram: FinalHistogram,
}

impl PipelineReport {
    pub fn phase_duration(&self, phase: Phase) -> Option<Duration> {
        self.phase_durations
            .iter()
            .find(|(p, _)| *p == phase)
            .map(|(_, d)| *d)
    }

    /// Prints phase timings and the top-K table to stdout
    pub fn print(&self, top_k: usize) {
        println!("\n=== MAP-REDUCE WORD COUNT ({} workers) ===", self.num_workers);
        for (phase, duration) in &self.phase_durations {
            println!("{} FINISHED in {} ms", phase, duration.as_millis());
        }

        println!(
            "\nDistinct tokens: {}, total occurrences: {}",
            self.histogram.distinct_tokens(),
            self.histogram.total_occurrences()
        );
        println!("\nTop {} tokens:", top_k);
        for (rank, (token, count)) in self.histogram.top_k(top_k).into_iter().enumerate() {
            println!("{:>4}. {:<24} {}", rank + 1, token, count);
        }
    }
}

/// Accepts worker registrations on the control port and drives the
/// phase-synchronized pipeline.
pub struct Coordinator {
    listener: TcpListener,
    registry: Arc<HostRegistry>,
    config: Config,
}

impl Coordinator {
    pub async fn bind(addr: &str, registry: Arc<HostRegistry>, config: Config) -> Result<Self> {
        if registry.is_empty() {
            return Err(MapReduceError::ZeroWorkers);
        }
        let listener = bind_listener(addr).await?;
        info!(addr, workers = registry.len(), "Coordinator listening");
        Ok(Self {
            listener,
            registry,
            config,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|source| MapReduceError::Bind {
                addr: "control listener".to_string(),
                source,
            })
    }

    /// Waits for every registry entry to register, then runs MAP, SHUFFLE and
    /// REDUCE over `lines` and collects the partitions.
    pub async fn run(self, lines: Vec<String>) -> Result<PipelineReport> {
        let (mut handlers, mut barrier) = self.register_workers().await?;
        let num_workers = handlers.len();

        let splits = split_lines(lines, num_workers)?;
        let split_paths = write_splits(&self.config.splits_dir, &splits)?
            .into_iter()
            .map(|path| fs::canonicalize(&path).map_err(|e| MapReduceError::io(&path, e)))
            .collect::<Result<Vec<PathBuf>>>()?;
        for split in &splits {
            debug!(worker = split.index, lines = split.lines.len(), "Split assigned");
        }

        let mut phase_durations = Vec::with_capacity(Phase::ALL.len());
        let mut partitions = HashMap::new();
        for phase in Phase::ALL {
            let started = Instant::now();
            info!(%phase, "Broadcasting");
            for handler in handlers.iter_mut() {
                let command = match phase {
                    Phase::Map => Command::Map(split_paths[handler.index()].display().to_string()),
                    Phase::Shuffle => Command::Shuffle,
                    Phase::Reduce => Command::Reduce,
                };
                handler.send(&command).await?;
            }

            let records = barrier.wait_for(phase, self.config.phase_timeout()).await?;
            let elapsed = started.elapsed();
            info!("{} FINISHED in {} ms", phase, elapsed.as_millis());
            phase_durations.push((phase, elapsed));
            if phase == Phase::Reduce {
                partitions = records;
            }
        }

        let histogram = collect(partitions)?;
        info!(
            distinct = histogram.distinct_tokens(),
            total = histogram.total_occurrences(),
            "Histogram assembled"
        );

        for handler in handlers {
            handler.close().await;
        }

        Ok(PipelineReport {
            num_workers,
            phase_durations,
            histogram,
        })
    }

    /// Enrolls workers in registry order until all registered or the
    /// registration window closes. `REGISTER` lines are read concurrently so
    /// a silent connection cannot hold up the others.
    async fn register_workers(&self) -> Result<(Vec<WorkerHandler>, PhaseBarrier)> {
        let expected = self.registry.len();
        let deadline = self
            .config
            .registration_timeout()
            .map(|timeout| Instant::now() + timeout);
        let mut slots: Vec<Option<WorkerHandler>> = (0..expected).map(|_| None).collect();
        let mut barrier = PhaseBarrier::new();
        let mut introductions = JoinSet::new();
        let mut registered = 0;

        while registered < expected {
            let next = next_enrollment(&self.listener, &mut introductions);
            let enrollment = match deadline {
                Some(deadline) => match timeout_at(deadline, next).await {
                    Ok(enrollment) => enrollment,
                    Err(_) => {
                        warn!(registered, expected, "Registration window elapsed");
                        break;
                    }
                },
                None => next.await,
            };

            let pending = match enrollment {
                Enrollment::Connected(Ok((stream, peer))) => {
                    debug!(%peer, "Control connection accepted");
                    introductions.spawn(read_registration(stream, peer));
                    continue;
                }
                Enrollment::Connected(Err(source)) => {
                    return Err(MapReduceError::ControlChannel {
                        peer: "control listener".to_string(),
                        source,
                    })
                }
                Enrollment::Introduced(Ok(introduced)) => match introduced? {
                    Some(pending) => pending,
                    None => continue,
                },
                Enrollment::Introduced(Err(e)) => return Err(MapReduceError::Task(e.to_string())),
            };

            let endpoint = self.resolve_endpoint(pending.peer, pending.port).await?;
            let index = endpoint.index;
            if slots[index].is_some() {
                return Err(MapReduceError::Config(format!(
                    "{} registered twice",
                    endpoint
                )));
            }
            info!(worker = index, %endpoint, "Worker registered");
            let (handler, events) =
                WorkerHandler::spawn(endpoint, pending.peer, pending.lines, pending.writer);
            barrier.add_worker(index, events);
            slots[index] = Some(handler);
            registered += 1;
        }

        if registered < expected {
            return Err(MapReduceError::RegistryMismatch {
                expected,
                registered,
            });
        }
        let handlers = slots.into_iter().flatten().collect();
        Ok((handlers, barrier))
    }

    /// Matches a registering peer to its registry entry. Entries sharing the
    /// port are told apart by host, resolving host names when the textual
    /// comparison fails.
    async fn resolve_endpoint(&self, peer: SocketAddr, port: u16) -> Result<WorkerEndpoint> {
        let host = peer.ip().to_string();
        match self.registry.resolve(Some(&host), port) {
            Ok(endpoint) => return Ok(endpoint.clone()),
            Err(MapReduceError::UnknownWorker { .. }) => {}
            Err(e) => return Err(e),
        }

        for endpoint in self.registry.with_port(port) {
            if host_resolves_to(&endpoint.host, port, peer.ip()).await {
                return Ok(endpoint.clone());
            }
        }
        Err(MapReduceError::UnknownWorker { host, port })
    }
}

/// A control connection whose `REGISTER` line has been read
struct PendingRegistration {
    peer: SocketAddr,
    port: u16,
    lines: FramedRead<OwnedReadHalf, LinesCodec>,
    writer: OwnedWriteHalf,
}

type Introduction = Result<Option<PendingRegistration>>;

enum Enrollment {
    Connected(std::io::Result<(TcpStream, SocketAddr)>),
    Introduced(std::result::Result<Introduction, JoinError>),
}

async fn next_enrollment(
    listener: &TcpListener,
    introductions: &mut JoinSet<Introduction>,
) -> Enrollment {
    tokio::select! {
        accepted = listener.accept() => Enrollment::Connected(accepted),
        Some(joined) = introductions.join_next(), if !introductions.is_empty() => {
            Enrollment::Introduced(joined)
        }
    }
}

/// Reads the `REGISTER` line of a fresh connection. Connections that close
/// before registering are skipped.
async fn read_registration(stream: TcpStream, peer: SocketAddr) -> Introduction {
    let (reader, writer) = stream.into_split();
    let mut lines = command_reader(reader);

    let line = match lines.next().await {
        Some(Ok(line)) => line,
        Some(Err(e)) => {
            let error = control_error(&peer.to_string(), e);
            warn!(%peer, %error, "Registration read failed");
            return Ok(None);
        }
        None => {
            warn!(%peer, "Connection closed before registering");
            return Ok(None);
        }
    };

    let port = match WorkerMessage::parse(&line)? {
        WorkerMessage::Register(port) => port,
        other => {
            return Err(MapReduceError::Protocol(format!(
                "expected REGISTER from {}, got '{}'",
                peer,
                other.encode()
            )))
        }
    };

    // Partition records that follow may carry arbitrarily long tokens
    *lines.decoder_mut() = LinesCodec::new();
    Ok(Some(PendingRegistration {
        peer,
        port,
        lines,
        writer,
    }))
}

async fn host_resolves_to(host: &str, port: u16, ip: IpAddr) -> bool {
    match lookup_host((host, port)).await {
        Ok(mut addrs) => addrs.any(|addr| same_ip(addr.ip(), ip)),
        Err(e) => {
            debug!(host, error = %e, "Registry host lookup failed");
            false
        }
    }
}

fn same_ip(a: IpAddr, b: IpAddr) -> bool {
    let (a, b) = (a.to_canonical(), b.to_canonical());
    a == b || (a.is_loopback() && b.is_loopback())
}

/// Unions the reduced partitions, rejecting any token owned twice
fn collect(partitions: HashMap<usize, Vec<Record>>) -> Result<FinalHistogram> {
    let mut workers: Vec<usize> = partitions.keys().copied().collect();
    workers.sort_unstable();

    let mut partitions = partitions;
    let mut histogram = FinalHistogram::new();
    for worker in workers {
        let records = partitions.remove(&worker).unwrap_or_default();
        histogram.absorb_partition(worker, records.into_iter().map(|r| (r.token, r.count)))?;
    }
    Ok(histogram)
}
