use thiserror::Error;

use ps_core::{NumericError, ProtocolError};

/// Talking to the parameter server, or computing a gradient, can fail in
/// the ways spec.md §7 enumerates. `Io`/`Protocol` are per-connection
/// fatal: the worker loop reconnects and re-reads its slice from scratch.
/// `Numeric` aborts only the current minibatch.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("I/O error talking to the parameter server: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Numeric(#[from] NumericError),

    #[error("data iterator stopped: {0}")]
    Iterator(#[from] ps_data_provider::IteratorError),
}

impl WorkerError {
    /// Whether this error means the connection is unusable and should be
    /// re-established (spec.md §4.4: "RPC errors propagate; the worker
    /// re-establishes the connection").
    pub fn is_connection_fatal(&self) -> bool {
        matches!(self, WorkerError::Io(_) | WorkerError::Protocol(_))
    }
}
