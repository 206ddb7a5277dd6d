// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use map_reduce_core::MapReduceError;
use tokio::io::AsyncRead;
use tokio::net::TcpListener;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};

/// Longest coordinator command a worker accepts
pub const MAX_COMMAND_LENGTH: usize = 64 * 1024;

/// Unbounded line reader for streams carrying `token:count` records. Tokens
/// have no length limit, so neither may these lines.
pub fn line_reader<R: AsyncRead>(reader: R) -> FramedRead<R, LinesCodec> {
    FramedRead::new(reader, LinesCodec::new())
}

/// Reader for the coordinator's commands, which never carry tokens
pub fn command_reader<R: AsyncRead>(reader: R) -> FramedRead<R, LinesCodec> {
    FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_COMMAND_LENGTH))
}

/// Maps a codec failure on the control channel with `peer`
pub fn control_error(peer: &str, error: LinesCodecError) -> MapReduceError {
    match error {
        LinesCodecError::Io(source) => MapReduceError::ControlChannel {
            peer: peer.to_string(),
            source,
        },
        LinesCodecError::MaxLineLengthExceeded => MapReduceError::Protocol(format!(
            "line from {} exceeds {} bytes",
            peer, MAX_COMMAND_LENGTH
        )),
    }
}

pub async fn bind_listener(addr: &str) -> map_reduce_core::Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| MapReduceError::Bind {
            addr: addr.to_string(),
            source,
        })
}
