//! Key-value side store (C8, spec.md §3/§4.5): a small auxiliary map used
//! for out-of-band coordination over the same PS socket. Keys are a
//! fixed-width, null-padded byte array (the reference bounds this at 32
//! bytes; `KEY_SIZE` mirrors `PSSparseServerTask.cpp`'s `KEY_SIZE`).

use std::collections::HashMap;

pub const KEY_SIZE: usize = 32;

pub type Key = [u8; KEY_SIZE];

/// Packs a key string into the fixed-width, null-padded wire key. Panics if
/// `s` doesn't fit, matching the reference's fixed-size key assumption.
pub fn pack_key(s: &str) -> Key {
    let bytes = s.as_bytes();
    assert!(bytes.len() <= KEY_SIZE, "key {s:?} exceeds KEY_SIZE");
    let mut key = [0u8; KEY_SIZE];
    key[..bytes.len()].copy_from_slice(bytes);
    key
}

#[derive(Default)]
pub struct KvStore {
    map: HashMap<Key, Vec<u8>>,
}

impl KvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// `SET_VALUE`: total-replace semantics for a key.
    pub fn set(&mut self, key: Key, value: Vec<u8>) {
        self.map.insert(key, value);
    }

    /// `GET_VALUE`: `None` for a missing key, `Some(value)` otherwise. See
    /// [`crate::codec::encode_kv_get_response`] for the wire encoding
    /// (spec.md §8 scenario S3).
    pub fn get(&self, key: &Key) -> Option<&[u8]> {
        self.map.get(key).map(|v| v.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// spec.md §8 scenario S3.
    #[test]
    fn s3_set_then_get_round_trips() {
        let mut store = KvStore::new();
        let key = pack_key("answer");
        store.set(key, vec![0x2A]);
        assert_eq!(store.get(&key), Some(&[0x2Au8][..]));
        assert_eq!(store.get(&pack_key("missing")), None);
    }

    #[test]
    fn overwrite_replaces_value() {
        let mut store = KvStore::new();
        let key = pack_key("k");
        store.set(key, vec![1, 2, 3]);
        store.set(key, vec![9]);
        assert_eq!(store.get(&key), Some(&[9u8][..]));
    }

    #[test]
    #[should_panic]
    fn pack_key_panics_on_oversize_string() {
        pack_key(&"x".repeat(KEY_SIZE + 1));
    }
}
