//! One `mio::Poll` loop per I/O thread (spec.md §4.5's `N_poll` poll
//! threads), each owning a private, disjoint socket slab.
//!
//! The reference re-arms a socket after a worker thread is done with it via
//! a pipe the poll thread also polls. This is rendered here as ownership
//! transfer instead: the poll thread hands the `TcpStream` itself to a
//! worker over the shared work queue, and the worker hands it back over a
//! per-poll-thread `return_tx` channel. The existing 1 ms poll tick already
//! drains both the "new connection" and "returned connection" channels, so
//! no waker/self-pipe is needed to force a wake-up.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Token};
use tracing::{debug, warn};

use crate::app_state::AppState;

const POLL_TICK: Duration = Duration::from_millis(1);

pub struct Request {
    pub token: Token,
    pub stream: TcpStream,
    pub return_tx: Sender<(Token, TcpStream)>,
}

pub fn run(
    poll_id: usize,
    new_conn_rx: Receiver<TcpStream>,
    work_tx: Sender<Request>,
    state: Arc<AppState>,
) {
    // Each poll thread owns the receiving end; the sending end is cloned
    // into every `Request` so workers can hand sockets back to exactly the
    // poll thread that dispatched them.
    let (return_tx, return_rx) = crossbeam_channel::unbounded();

    let mut poll = match Poll::new() {
        Ok(p) => p,
        Err(e) => {
            warn!(poll_id, error = %e, "failed to create mio::Poll, I/O thread exiting");
            return;
        }
    };
    let mut events = Events::with_capacity(128);
    let mut slab: HashMap<Token, TcpStream> = HashMap::new();
    let mut next_token: usize = 0;

    loop {
        if state.is_shutting_down() {
            debug!(poll_id, "poll thread observed shutdown flag, exiting");
            return;
        }

        while let Ok(mut stream) = new_conn_rx.try_recv() {
            let token = Token(next_token);
            next_token += 1;
            if poll.registry().register(&mut stream, token, Interest::READABLE).is_ok() {
                slab.insert(token, stream);
            }
        }

        while let Ok((token, mut stream)) = return_rx.try_recv() {
            if poll.registry().register(&mut stream, token, Interest::READABLE).is_ok() {
                slab.insert(token, stream);
            }
        }

        if let Err(e) = poll.poll(&mut events, Some(POLL_TICK)) {
            if e.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            warn!(poll_id, error = %e, "poll() failed");
            continue;
        }

        for event in events.iter() {
            let token = event.token();
            let Some(mut stream) = slab.remove(&token) else {
                continue;
            };
            let _ = poll.registry().deregister(&mut stream);
            let request = Request {
                token,
                stream,
                return_tx: return_tx.clone(),
            };
            if work_tx.send(request).is_err() {
                state.num_conns.fetch_sub(1, Ordering::Relaxed);
            }
        }
    }
}
