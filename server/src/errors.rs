use thiserror::Error;

use ps_core::{DynCastError, ModelError, NumericError, ProtocolError};

/// Per-connection failures (spec.md §7): any of these close just the
/// offending connection and decrement the connection count. The server
/// itself never panics on a bad client.
#[derive(Error, Debug)]
pub enum ConnError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("I/O error on client connection: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Numeric(#[from] NumericError),

    #[error(transparent)]
    DynCast(#[from] DynCastError),

    #[error(transparent)]
    Model(#[from] ModelError),
}
