use thiserror::Error;

/// Raised by the wire codec on malformed or hostile input.
///
/// A `ProtocolError` is per-connection fatal: the caller closes the socket
/// and moves on, it never propagates past the connection that produced it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("magic mismatch: expected {expected:#x}, got {got:#x}")]
    MagicMismatch { expected: u32, got: u32 },

    #[error("declared count {0} is negative")]
    NegativeCount(i32),

    #[error("declared count {got} exceeds cap {cap}")]
    CountTooLarge { got: i64, cap: i64 },

    #[error("payload of {size} bytes exceeds the {cap}-byte scratch buffer")]
    PayloadTooLarge { size: usize, cap: usize },

    #[error("buffer underrun: needed {needed} bytes, had {available}")]
    UnexpectedEof { needed: usize, available: usize },

    #[error("unknown opcode {0}")]
    UnknownOpcode(u32),

    #[error("opcode {0} is reserved and carries no handler")]
    ReservedOpcode(u32),

    #[error("index {index} is out of range for a model of size {size}")]
    IndexOutOfRange { index: u32, size: usize },
}

/// Raised when a sparse model/gradient operation would produce a non-finite
/// weight. The worker aborts the offending minibatch and moves to the next
/// one; it does not poison the connection.
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum NumericError {
    #[error("non-finite value produced at coordinate {index}: {value}")]
    NonFinite { index: u32, value: f32 },
}

/// Union of the ways a single model read/write can fail: a malformed index
/// (`ProtocolError`, per-connection fatal) or a non-finite update result
/// (`NumericError`, per-minibatch fatal on the worker side).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Numeric(#[from] NumericError),
}

/// Raised when a gradient of the wrong model variant (LR vs MF) is received
/// on an endpoint that expects the other.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DynCastError {
    #[error("expected an LR gradient, got an MF gradient")]
    ExpectedLr,
    #[error("expected an MF gradient, got an LR gradient")]
    ExpectedMf,
}

/// Task-registry-specific failures, surfaced as opcode return codes rather
/// than connection teardown (see `ps_core::task_registry`).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskRegistryError {
    #[error("task {0} is already registered")]
    AlreadyRegistered(u32),
    #[error("task {0} is not registered")]
    NotRegistered(u32),
    #[error("task {0} is unknown")]
    Unknown(u32),
}
