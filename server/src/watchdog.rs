//! Watchdog thread (spec.md §4.5/§4.6): once a second, logs the live
//! counters and reaps any task registry entry past its liveness budget.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::app_state::AppState;

const TICK: Duration = Duration::from_secs(1);

pub fn run(state: Arc<AppState>) {
    loop {
        if state.is_shutting_down() {
            return;
        }
        std::thread::sleep(TICK);

        let reaped = state.task_registry.lock().reap_expired();
        if !reaped.is_empty() {
            info!(?reaped, "watchdog declared tasks dead");
        }
        info!(
            num_conns = state.num_conns.load(Ordering::Relaxed),
            num_updates = state.num_updates.load(Ordering::Relaxed),
            alive_tasks = state.task_registry.lock().alive_count(),
            "watchdog tick"
        );
    }
}
