//! The sparse streaming iterator (C5, spec.md §4.3): a prefetching
//! pipeline that pulls blobs from an [`ObjectStore`], parses them into
//! minibatches, and exposes them as a bounded, blocking, logically
//! infinite sequence.
//!
//! The reference design uses two independent POSIX counting semaphores (a
//! "pending blob" permit pool gating prefetch depth, and a ring-buffer
//! semaphore signaling data availability) plus a mutex-guarded ring. Both
//! map directly onto a `crossbeam_channel::bounded` channel here: a bounded
//! channel already *is* a mutex-guarded queue with block-on-full and
//! block-on-empty built in, which is the idiomatic Rust rendition of
//! exactly that pair of semaphores (see DESIGN.md).

use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use thiserror::Error;
use tracing::{debug, warn};

use ps_core::SparseMinibatch;

use crate::errors::ParseError;
use crate::object_store::{blob_key, ObjectStore};

/// Default ring capacity (spec.md §4.3: "reference capacity 100 000
/// slots"). In practice the prefetch-permit pool (`read_ahead`) is the
/// binding constraint.
pub const DEFAULT_RING_CAPACITY: usize = 100_000;

/// Default prefetch depth: at most this many blobs may be in flight (being
/// fetched/decoded/drained) ahead of the consumer at once.
pub const DEFAULT_READ_AHEAD: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessPattern {
    Sequential,
    Random,
}

#[derive(Debug, Clone)]
pub struct IteratorConfig {
    pub bucket: String,
    /// Half-open blob-id range `[l, r)`.
    pub range: Range<u64>,
    /// `M`: minibatches decoded out of each blob.
    pub minibatches_per_blob: usize,
    pub minibatch_size: usize,
    pub labeled: bool,
    pub access: AccessPattern,
    pub pass_limit: Option<usize>,
    pub read_ahead: usize,
    pub ring_capacity: usize,
    /// Seeds the access-pattern RNG so different workers pull different
    /// blobs; reproducible per worker, not across a cluster (spec.md §9).
    pub worker_id: u64,
}

impl IteratorConfig {
    pub fn new(bucket: impl Into<String>, range: Range<u64>, minibatches_per_blob: usize, minibatch_size: usize, worker_id: u64) -> Self {
        Self {
            bucket: bucket.into(),
            range,
            minibatches_per_blob,
            minibatch_size,
            labeled: true,
            access: AccessPattern::Sequential,
            pass_limit: None,
            read_ahead: DEFAULT_READ_AHEAD,
            ring_capacity: DEFAULT_RING_CAPACITY,
            worker_id,
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum IteratorError {
    #[error("blob failed to parse: {0}")]
    Parse(String),
    #[error("pass limit of {0} pass(es) over the blob range reached")]
    PassLimitReached(usize),
}

impl From<ParseError> for IteratorError {
    fn from(e: ParseError) -> Self {
        IteratorError::Parse(e.to_string())
    }
}

struct MinibatchSlot {
    minibatch: SparseMinibatch,
    /// Set on the final minibatch decoded from a blob; `next()` uses this
    /// to know when to grant the prefetcher another permit.
    last_in_blob: bool,
}

/// A lazy, logically infinite sequence of minibatches, backed by a
/// background prefetch thread. `next()` blocks when no minibatch is ready;
/// there is no timeout (blocking is the intended backpressure path,
/// spec.md §4.3).
pub struct SparseStreamingIterator {
    ring_rx: crossbeam_channel::Receiver<MinibatchSlot>,
    pref_tx: crossbeam_channel::Sender<()>,
    poisoned: Arc<Mutex<Option<IteratorError>>>,
    handle: Option<JoinHandle<()>>,
    cancel: Arc<AtomicBool>,
}

impl SparseStreamingIterator {
    pub fn spawn(config: IteratorConfig, object_store: Arc<dyn ObjectStore>) -> Self {
        let (ring_tx, ring_rx) = crossbeam_channel::bounded(config.ring_capacity.max(1));
        let (pref_tx, pref_rx) = crossbeam_channel::bounded::<()>(config.read_ahead.max(1));
        // pre-fill the permit pool so the prefetcher can run `read_ahead`
        // blobs ahead of the consumer before it has to wait for a signal.
        for _ in 0..config.read_ahead.max(1) {
            let _ = pref_tx.send(());
        }
        let poisoned = Arc::new(Mutex::new(None));
        let cancel = Arc::new(AtomicBool::new(false));

        let handle = {
            let poisoned = poisoned.clone();
            let cancel = cancel.clone();
            std::thread::spawn(move || {
                prefetch_loop(config, object_store, ring_tx, pref_rx, poisoned, cancel)
            })
        };

        Self {
            ring_rx,
            pref_tx,
            poisoned,
            handle: Some(handle),
            cancel,
        }
    }

    /// Blocks until the next minibatch is available, or returns the error
    /// the iterator was poisoned with (a parse error, or a pass-limit
    /// termination).
    pub fn next(&self) -> Result<SparseMinibatch, IteratorError> {
        match self.ring_rx.recv() {
            Ok(slot) => {
                if slot.last_in_blob {
                    // best-effort: the permit pool never needs to exceed
                    // read_ahead, so a Full here just means the prefetcher
                    // already has enough permits queued.
                    let _ = self.pref_tx.try_send(());
                }
                Ok(slot.minibatch)
            }
            Err(_) => Err(self
                .poisoned
                .lock()
                .clone()
                .unwrap_or_else(|| IteratorError::Parse("iterator stopped with no recorded error".into()))),
        }
    }
}

impl Drop for SparseStreamingIterator {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::SeqCst);
        // Swap in throwaway, already-disconnected channel ends so the real
        // ones drop now: this wakes the prefetch thread out of whichever
        // blocking call it's in (permit wait or ring push) at its next
        // attempt, per spec.md §4.3's cancellation contract. We don't join
        // here — the thread is allowed to finish in its own time, and any
        // in-flight object-store call it's blocked in completes with its
        // result simply discarded.
        let (dummy_tx, _dummy_rx) = crossbeam_channel::bounded::<()>(0);
        let _ = std::mem::replace(&mut self.pref_tx, dummy_tx);
        let (_keep_tx, dummy_rx) = crossbeam_channel::bounded(0);
        let _ = std::mem::replace(&mut self.ring_rx, dummy_rx);
        if let Some(handle) = self.handle.take() {
            drop(handle); // detach; do not block the dropping thread
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn prefetch_loop(
    config: IteratorConfig,
    object_store: Arc<dyn ObjectStore>,
    ring_tx: crossbeam_channel::Sender<MinibatchSlot>,
    pref_rx: crossbeam_channel::Receiver<()>,
    poisoned: Arc<Mutex<Option<IteratorError>>>,
    cancel: Arc<AtomicBool>,
) {
    let Range { start: l, end: r } = config.range;
    let span = r.saturating_sub(l).max(1);
    let mut rng = ChaCha8Rng::seed_from_u64(config.worker_id);
    let mut blobs_fetched: usize = 0;
    let pass_limit_blobs = config.pass_limit.map(|passes| passes * span as usize);

    loop {
        if pref_rx.recv().is_err() || cancel.load(Ordering::SeqCst) {
            debug!("prefetch thread exiting: cancelled");
            return;
        }

        if let Some(limit) = pass_limit_blobs {
            if blobs_fetched >= limit {
                *poisoned.lock() = Some(IteratorError::PassLimitReached(config.pass_limit.unwrap()));
                return;
            }
        }

        let blob_id = match config.access {
            AccessPattern::Sequential => l + (blobs_fetched as u64 % span),
            AccessPattern::Random => rng.gen_range(l..r),
        };
        blobs_fetched += 1;

        let bytes = loop {
            if cancel.load(Ordering::SeqCst) {
                return;
            }
            match object_store.get(&config.bucket, &blob_key(blob_id)) {
                Ok(bytes) => break bytes,
                Err(e) => {
                    warn!(blob_id, error = %e, "transient object-store error, retrying");
                    continue;
                }
            }
        };

        let decoded = match ps_core::codec::decode_minibatch_blob(&bytes, config.labeled) {
            Ok(d) => d,
            Err(e) => {
                *poisoned.lock() = Some(IteratorError::from(ParseError::from(e)));
                return;
            }
        };
        let minibatches = ps_core::codec::split_into_minibatches(
            decoded,
            config.minibatches_per_blob,
            config.minibatch_size,
        );
        let n = minibatches.len();
        for (i, mb) in minibatches.into_iter().enumerate() {
            let slot = MinibatchSlot {
                minibatch: mb,
                last_in_blob: i + 1 == n,
            };
            if ring_tx.send(slot).is_err() {
                debug!("prefetch thread exiting: consumer dropped");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_store::InMemoryObjectStore;
    use ps_core::codec::{encode_minibatch_blob, BlobSample};
    use ps_core::{FeatureValue, SparseSample};
    use pretty_assertions::assert_eq;

    fn seed_blob(store: &InMemoryObjectStore, bucket: &str, blob_id: u64, values: &[f32]) {
        let samples: Vec<BlobSample> = values
            .iter()
            .map(|&v| BlobSample {
                label: Some(v),
                sample: SparseSample {
                    features: vec![FeatureValue { index: 0, value: v }],
                },
            })
            .collect();
        let bytes = encode_minibatch_blob(&samples, true);
        store.put(bucket, &blob_key(blob_id), &bytes).unwrap();
    }

    /// spec.md §8 property 6 / scenario S6: sequential access over [0,2),
    /// M=2, minibatch_size=1 emits blob0/mb0, blob0/mb1, blob1/mb0,
    /// blob1/mb1, repeating forever.
    #[test]
    fn s6_sequential_order_repeats() {
        let store = Arc::new(InMemoryObjectStore::new());
        seed_blob(&store, "b", 0, &[0.0, 1.0]);
        seed_blob(&store, "b", 1, &[2.0, 3.0]);

        let mut config = IteratorConfig::new("b", 0..2, 2, 1, 0);
        config.access = AccessPattern::Sequential;
        let iter = SparseStreamingIterator::spawn(config, store);

        let labels_of = |mb: &SparseMinibatch| mb.labels.clone().unwrap();
        let order: Vec<f32> = (0..6).map(|_| labels_of(&iter.next().unwrap())[0]).collect();
        assert_eq!(order, vec![0.0, 1.0, 2.0, 3.0, 0.0, 1.0]);
    }

    #[test]
    fn parse_error_poisons_iterator() {
        let store = Arc::new(InMemoryObjectStore::new());
        // malformed blob: declares a huge total_size
        store.put("b", &blob_key(0), &(-1i32).to_le_bytes()).unwrap();
        let config = IteratorConfig::new("b", 0..1, 1, 1, 0);
        let iter = SparseStreamingIterator::spawn(config, store);
        let err = iter.next().unwrap_err();
        assert!(matches!(err, IteratorError::Parse(_)));
    }

    #[test]
    fn pass_limit_terminates_the_stream() {
        let store = Arc::new(InMemoryObjectStore::new());
        seed_blob(&store, "b", 0, &[0.0]);
        let mut config = IteratorConfig::new("b", 0..1, 1, 1, 0);
        config.pass_limit = Some(1);
        let iter = SparseStreamingIterator::spawn(config, store);
        assert!(iter.next().is_ok());
        let err = iter.next().unwrap_err();
        assert!(matches!(err, IteratorError::PassLimitReached(1)));
    }

    #[test]
    fn dropping_iterator_stops_prefetch_thread() {
        let store = Arc::new(InMemoryObjectStore::new());
        seed_blob(&store, "b", 0, &[0.0, 1.0, 2.0, 3.0]);
        let config = IteratorConfig::new("b", 0..1, 1, 4, 0);
        let iter = SparseStreamingIterator::spawn(config, store);
        iter.next().unwrap();
        drop(iter);
        // no assertion beyond "this doesn't hang" - Drop must not block.
    }
}
