use thiserror::Error;

/// Raised by the [`crate::object_store::ObjectStore`] adapter on a transient
/// get/put failure. The streaming iterator retries these indefinitely
/// (spec.md §4.3/§7); they never poison the iterator.
#[derive(Error, Debug)]
pub enum ObjectStoreError {
    #[error("object {key:?} not found in bucket {bucket:?}")]
    NotFound { bucket: String, key: String },

    #[error("IO error talking to object store: {0}")]
    Io(#[from] std::io::Error),

    #[error("transient object-store failure: {0}")]
    Transient(String),
}

/// Raised when a fetched blob fails to decode. This is a hard failure: the
/// iterator surfaces it on the next `next()` call and is then poisoned
/// (spec.md §4.3/§7).
#[derive(Error, Debug)]
pub enum ParseError {
    #[error(transparent)]
    Protocol(#[from] ps_core::ProtocolError),
}
