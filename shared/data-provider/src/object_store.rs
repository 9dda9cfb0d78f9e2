//! Object-store adapter (C1, spec.md §6): the core depends only on this
//! narrow `get`/`get_range`/`put` capability. A real AWS-SDK/GCS adapter is
//! explicitly out of scope (spec.md §1) — [`LocalFsObjectStore`] is a local
//! development stand-in, grounded on the blocking get/get_range/put shape
//! `psyche-data-provider::gcs` uses for its GCS client, and
//! [`InMemoryObjectStore`] is for tests, grounded on the in-memory stores
//! the pack's test suites reach for (e.g. `iroh_blobs::store::mem::MemStore`
//! in `psyche-network`'s tests).

use std::collections::HashMap;
use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::ops::Range;
use std::path::PathBuf;

use parking_lot::Mutex;

use crate::errors::ObjectStoreError;

/// `SAMPLE_BASE` prefix for minibatch blob keys (spec.md §6): keys are
/// `"<SAMPLE_BASE>" + str(id)` with `SAMPLE_BASE = 0`.
pub const SAMPLE_BASE: &str = "0";

pub fn blob_key(blob_id: u64) -> String {
    format!("{SAMPLE_BASE}{blob_id}")
}

/// Blocking get/get_range/put, intentionally synchronous: the streaming
/// iterator (C5) runs its fetch loop on a dedicated background thread, not
/// an async runtime (spec.md §5).
pub trait ObjectStore: Send + Sync {
    fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, ObjectStoreError>;
    fn get_range(&self, bucket: &str, key: &str, range: Range<usize>) -> Result<Vec<u8>, ObjectStoreError>;
    fn put(&self, bucket: &str, key: &str, bytes: &[u8]) -> Result<(), ObjectStoreError>;
}

#[derive(Default)]
pub struct InMemoryObjectStore {
    blobs: Mutex<HashMap<(String, String), Vec<u8>>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ObjectStore for InMemoryObjectStore {
    fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, ObjectStoreError> {
        self.blobs
            .lock()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| ObjectStoreError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }

    fn get_range(&self, bucket: &str, key: &str, range: Range<usize>) -> Result<Vec<u8>, ObjectStoreError> {
        let full = self.get(bucket, key)?;
        let end = range.end.min(full.len());
        let start = range.start.min(end);
        Ok(full[start..end].to_vec())
    }

    fn put(&self, bucket: &str, key: &str, bytes: &[u8]) -> Result<(), ObjectStoreError> {
        self.blobs
            .lock()
            .insert((bucket.to_string(), key.to_string()), bytes.to_vec());
        Ok(())
    }
}

/// Stores each `(bucket, key)` as a file under `root/bucket/key`. A
/// reasonable local stand-in for a real object store, not a production
/// adapter.
pub struct LocalFsObjectStore {
    root: PathBuf,
}

impl LocalFsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, bucket: &str, key: &str) -> PathBuf {
        self.root.join(bucket).join(key)
    }
}

impl ObjectStore for LocalFsObjectStore {
    fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, ObjectStoreError> {
        let path = self.path_for(bucket, key);
        fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ObjectStoreError::NotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                }
            } else {
                ObjectStoreError::Io(e)
            }
        })
    }

    fn get_range(&self, bucket: &str, key: &str, range: Range<usize>) -> Result<Vec<u8>, ObjectStoreError> {
        let path = self.path_for(bucket, key);
        let mut file = fs::File::open(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ObjectStoreError::NotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                }
            } else {
                ObjectStoreError::Io(e)
            }
        })?;
        file.seek(SeekFrom::Start(range.start as u64))
            .map_err(ObjectStoreError::Io)?;
        let len = range.end.saturating_sub(range.start);
        let mut buf = vec![0u8; len];
        let mut read_total = 0;
        while read_total < len {
            let n = file.read(&mut buf[read_total..]).map_err(ObjectStoreError::Io)?;
            if n == 0 {
                break;
            }
            read_total += n;
        }
        buf.truncate(read_total);
        Ok(buf)
    }

    fn put(&self, bucket: &str, key: &str, bytes: &[u8]) -> Result<(), ObjectStoreError> {
        let path = self.path_for(bucket, key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(ObjectStoreError::Io)?;
        }
        fs::write(&path, bytes).map_err(ObjectStoreError::Io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn in_memory_round_trips() {
        let store = InMemoryObjectStore::new();
        store.put("b", "k", b"hello").unwrap();
        assert_eq!(store.get("b", "k").unwrap(), b"hello");
        assert_eq!(store.get_range("b", "k", 1..3).unwrap(), b"el");
    }

    #[test]
    fn in_memory_missing_key_errors() {
        let store = InMemoryObjectStore::new();
        assert!(matches!(
            store.get("b", "missing"),
            Err(ObjectStoreError::NotFound { .. })
        ));
    }

    #[test]
    fn local_fs_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFsObjectStore::new(dir.path());
        store.put("bucket", "0", b"abcdefgh").unwrap();
        assert_eq!(store.get("bucket", "0").unwrap(), b"abcdefgh");
        assert_eq!(store.get_range("bucket", "0", 2..5).unwrap(), b"cde");
    }

    #[test]
    fn blob_key_uses_sample_base_prefix() {
        assert_eq!(blob_key(42), "042");
    }
}
