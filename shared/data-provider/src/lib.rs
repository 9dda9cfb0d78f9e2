//! Object-store adapter and sparse streaming iterator (C1/C5, spec.md
//! §4.3, §6) shared by the worker and any offline data-prep tooling.

pub mod errors;
pub mod iterator;
pub mod object_store;

pub use errors::{ObjectStoreError, ParseError};
pub use iterator::{AccessPattern, IteratorConfig, IteratorError, SparseStreamingIterator};
pub use object_store::{blob_key, InMemoryObjectStore, LocalFsObjectStore, ObjectStore};
