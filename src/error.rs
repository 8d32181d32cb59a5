// ABOUTME: Error types for session termination and server lifecycle
// ABOUTME: Protocol-level problems never appear here; they become error-status responses

use crate::audit::AuditError;
use crate::codec::CodecError;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Reasons a session is torn down. Each one is local to its session; the
/// acceptor logs it and moves on.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Socket reset, broken pipe and friends
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The byte stream can no longer be framed
    #[error("malformed frame: {0}")]
    Malformed(#[source] CodecError),

    /// A response could not be encoded
    #[error("cannot encode response: {0}")]
    Encode(#[source] CodecError),

    /// Peer closed the socket in the middle of a frame
    #[error("connection reset by peer")]
    ConnectionReset,

    #[error("no traffic for {0:?}")]
    IdleTimeout(Duration),

    /// Peer stopped draining its receive window while we had responses queued
    #[error("peer not reading for {0:?}")]
    WriteTimeout(Duration),
}

impl SessionError {
    /// Ordinary disconnects that do not deserve a warning.
    pub fn is_disconnect(&self) -> bool {
        match self {
            SessionError::ConnectionReset => true,
            SessionError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}

/// Errors surfaced by server start and stop.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("cannot listen on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("audit pipeline: {0}")]
    Audit(#[from] AuditError),

    #[error("acceptor task failed: {0}")]
    Acceptor(#[from] tokio::task::JoinError),
}
