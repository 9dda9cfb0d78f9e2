//! `P0`, the acceptor thread (spec.md §4.5): binds the listening socket,
//! enforces the max-connections cap, and dispatches each accepted socket to
//! one of the `N_poll` poll threads.
//!
//! The reference unblocks its blocking `accept()` at shutdown time by
//! connecting to itself. A non-blocking listener polled on a short sleep
//! against the shared shutdown flag is simpler and needs no loopback
//! self-connect trick.

use std::io::ErrorKind;
use std::net::TcpListener as StdTcpListener;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Sender;
use mio::net::TcpStream as MioTcpStream;
use tracing::{info, warn};

use crate::app_state::AppState;

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);

pub fn run(listener: StdTcpListener, poll_conn_txs: Vec<Sender<MioTcpStream>>, max_connections: usize, state: Arc<AppState>) {
    listener.set_nonblocking(true).expect("listener must support non-blocking accept");
    let mut next_poll = 0usize;

    loop {
        if state.is_shutting_down() {
            info!("acceptor observed shutdown flag, exiting");
            return;
        }

        match listener.accept() {
            Ok((std_stream, peer)) => {
                if state.num_conns.load(Ordering::Relaxed) as usize >= max_connections {
                    warn!(%peer, "max connections reached, rejecting");
                    continue;
                }
                if let Err(e) = std_stream.set_nonblocking(true) {
                    warn!(%peer, error = %e, "failed to set socket non-blocking, dropping connection");
                    continue;
                }
                let _ = std_stream.set_nodelay(true);
                let mio_stream = MioTcpStream::from_std(std_stream);

                state.num_conns.fetch_add(1, Ordering::Relaxed);
                // Selection among poll threads is documented as random in
                // spec.md; round-robin gives the same even load spread
                // without needing an RNG dependency at this layer.
                let target = next_poll % poll_conn_txs.len();
                next_poll = next_poll.wrapping_add(1);
                if poll_conn_txs[target].send(mio_stream).is_err() {
                    state.num_conns.fetch_sub(1, Ordering::Relaxed);
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(e) => {
                warn!(error = %e, "accept() failed");
                std::thread::sleep(ACCEPT_POLL_INTERVAL);
            }
        }
    }
}
