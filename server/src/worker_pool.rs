//! `N_work` worker threads (spec.md §4.5): each owns a private scratch
//! buffer and dequeues `Request`s from the shared work queue, which doubles
//! as the reference's FIFO-plus-counting-semaphore (a bounded/unbounded
//! `crossbeam_channel` already blocks a waiting receiver and wakes it when
//! an item arrives).

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Receiver;
use tracing::{debug, warn};

use ps_core::data::SCRATCH_BUFFER_BYTES;

use crate::app_state::AppState;
use crate::handlers::handle_request;
use crate::poll_thread::Request;

/// How long a worker blocks on an empty queue before re-checking the
/// shutdown flag (spec.md §5's "3 s timeout, for cooperative shutdown").
const QUEUE_POLL_TIMEOUT: Duration = Duration::from_secs(3);

pub fn run(worker_id: usize, work_rx: Receiver<Request>, state: Arc<AppState>) {
    let mut scratch = Vec::with_capacity(SCRATCH_BUFFER_BYTES.min(1 << 20));
    loop {
        if state.is_shutting_down() {
            debug!(worker_id, "worker thread observed shutdown flag, exiting");
            return;
        }
        let request = match work_rx.recv_timeout(QUEUE_POLL_TIMEOUT) {
            Ok(r) => r,
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => return,
        };

        let Request { token, mut stream, return_tx } = request;
        match handle_request(&mut stream, &mut scratch, &state) {
            Ok(()) => {
                if return_tx.send((token, stream)).is_err() {
                    // owning poll thread has shut down; the connection
                    // simply isn't re-armed.
                }
            }
            Err(e) => {
                warn!(worker_id, error = %e, "closing connection after handler error");
                state.num_conns.fetch_sub(1, std::sync::atomic::Ordering::Relaxed);
                // `stream` drops here, closing the socket.
            }
        }
    }
}
