//! Ties `AppState` together with the thread roster from spec.md §5: the
//! acceptor, the poll threads, the worker pool, the watchdog, and an
//! optional checkpoint thread.

use std::net::TcpListener;
use std::sync::Arc;
use std::thread::JoinHandle;

use mio::net::TcpStream as MioTcpStream;
use tracing::info;

use crate::app_state::AppState;
use crate::config::ServerConfig;
use crate::poll_thread::Request;
use crate::{acceptor, checkpoint, poll_thread, watchdog, worker_pool};

pub struct ParameterServer {
    state: Arc<AppState>,
    handles: Vec<JoinHandle<()>>,
}

impl ParameterServer {
    /// Binds the listening socket and spawns every thread in the roster.
    /// Returns once the server is accepting connections; `join` blocks
    /// until `shutdown` (or `KILL_SIGNAL`) is observed.
    pub fn start(config: ServerConfig) -> std::io::Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", config.ps_port))?;
        info!(port = config.ps_port, n_poll = config.n_poll, n_work = config.n_work, "parameter server starting");

        let state = Arc::new(AppState::new(&config, config.optimizer_rule, config.optimizer_params));

        let (work_tx, work_rx) = crossbeam_channel::unbounded::<Request>();

        let mut handles = Vec::new();
        let mut poll_conn_txs = Vec::with_capacity(config.n_poll);
        for poll_id in 0..config.n_poll {
            let (new_conn_tx, new_conn_rx) = crossbeam_channel::unbounded::<MioTcpStream>();
            poll_conn_txs.push(new_conn_tx);
            let work_tx = work_tx.clone();
            let state = Arc::clone(&state);
            handles.push(std::thread::Builder::new()
                .name(format!("ps-poll-{poll_id}"))
                .spawn(move || poll_thread::run(poll_id, new_conn_rx, work_tx, state))
                .expect("failed to spawn poll thread"));
        }

        for worker_id in 0..config.n_work {
            let work_rx = work_rx.clone();
            let state = Arc::clone(&state);
            handles.push(std::thread::Builder::new()
                .name(format!("ps-worker-{worker_id}"))
                .spawn(move || worker_pool::run(worker_id, work_rx, state))
                .expect("failed to spawn worker thread"));
        }

        {
            let state = Arc::clone(&state);
            handles.push(std::thread::Builder::new()
                .name("ps-watchdog".into())
                .spawn(move || watchdog::run(state))
                .expect("failed to spawn watchdog thread"));
        }

        if let Some(checkpoint_config) = config.checkpoint.clone() {
            let state = Arc::clone(&state);
            handles.push(std::thread::Builder::new()
                .name("ps-checkpoint".into())
                .spawn(move || checkpoint::run(checkpoint_config, state))
                .expect("failed to spawn checkpoint thread"));
        }

        let max_connections = config.max_connections;
        let acceptor_state = Arc::clone(&state);
        handles.push(std::thread::Builder::new()
            .name("ps-acceptor".into())
            .spawn(move || acceptor::run(listener, poll_conn_txs, max_connections, acceptor_state))
            .expect("failed to spawn acceptor thread"));

        Ok(Self { state, handles })
    }

    pub fn shutdown(&self) {
        self.state.request_shutdown();
    }

    /// Blocks until every thread in the roster has exited (spec.md §5:
    /// cooperative shutdown via the shared flag, observed at each thread's
    /// own blocking point).
    pub fn join(self) {
        for handle in self.handles {
            let _ = handle.join();
        }
        info!("parameter server exited cleanly");
    }
}
