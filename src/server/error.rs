//! Errors raised by [`LinkServer`](super::LinkServer) operations.

use std::{io, net::SocketAddr};

use thiserror::Error;

use crate::{error::TransportError, handshake::HandshakeError};

/// Errors that may occur while starting, running or stopping the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The options failed validation.
    #[error("invalid server options: {0}")]
    InvalidOptions(&'static str),

    /// `start` was called on a running server.
    #[error("server already running")]
    AlreadyRunning,

    /// The operation needs a running server.
    #[error("server not running")]
    NotRunning,

    /// Binding the listener failed.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address the listener tried to bind.
        addr: SocketAddr,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// A worker thread could not be started.
    #[error("failed to spawn worker {index}: {source}")]
    WorkerSpawn {
        /// Index of the worker.
        index: usize,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// Every connection attempt to a peer failed.
    #[error("failed to connect to {addr} after {attempts} attempts: {source}")]
    Connect {
        /// Peer address.
        addr: SocketAddr,
        /// Attempts made.
        attempts: u32,
        /// Error from the last attempt.
        #[source]
        source: io::Error,
    },

    /// The peer refused or botched the handshake.
    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    /// Setting up the link failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}
