//! The parameter server (C7, spec.md §4.5): acceptor thread, per-thread
//! `mio::Poll` I/O loops, a worker-thread pool, the model behind a single
//! lock, and the watchdog/checkpoint side threads.

pub mod acceptor;
pub mod app_state;
pub mod checkpoint;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod io_util;
pub mod poll_thread;
pub mod server;
pub mod watchdog;
pub mod worker_pool;

pub use app_state::AppState;
pub use config::{CheckpointConfig, LrModelConfig, MfModelConfig, ModelKind, ServerConfig};
pub use errors::ConnError;
pub use server::ParameterServer;
