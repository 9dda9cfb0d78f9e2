//! Task registry (C9, spec.md §4.6): register/deregister workers against a
//! remaining-time budget, reaped by the watchdog.
//!
//! Grounded on `PSSparseServerTask.cpp`'s `registered_tasks` /
//! `task_to_starttime` / `task_to_remaining_time` triple: an id, once ever
//! registered, is never forgotten (so a repeat `REGISTER_TASK` is always
//! rejected), while "alive" tracking (`task_to_starttime`) is a separate,
//! removable map that the watchdog (or an explicit deregister) clears.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

/// Watchdog liveness grace period (spec.md §4.5/§4.6).
pub const TIMEOUT_THRESHOLD: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    Registered,
    AlreadyRegistered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeregisterOutcome {
    Deregistered,
    NotRegistered,
    Unknown,
}

struct AliveEntry {
    registered_at: Instant,
    remaining: Duration,
}

#[derive(Default)]
pub struct TaskRegistry {
    ever_registered: HashSet<u32>,
    alive: HashMap<u32, AliveEntry>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `REGISTER_TASK`: registers `task_id` with a `remaining_seconds`
    /// budget. Returns `AlreadyRegistered` if this id was *ever* registered
    /// before, even if it was since declared dead — re-registration of a
    /// dead id is permanently rejected (spec.md §4.6).
    pub fn register(&mut self, task_id: u32, remaining_seconds: i32) -> RegisterOutcome {
        if !self.ever_registered.insert(task_id) {
            return RegisterOutcome::AlreadyRegistered;
        }
        self.alive.insert(
            task_id,
            AliveEntry {
                registered_at: Instant::now(),
                remaining: Duration::from_secs(remaining_seconds.max(0) as u64),
            },
        );
        RegisterOutcome::Registered
    }

    /// `DEREGISTER_TASK`: `Unknown` if `task_id` was never registered,
    /// `NotRegistered` if it was registered but is already dead (either via
    /// an earlier deregister or the watchdog reaping it), else
    /// `Deregistered`.
    pub fn deregister(&mut self, task_id: u32) -> DeregisterOutcome {
        if !self.ever_registered.contains(&task_id) {
            return DeregisterOutcome::Unknown;
        }
        self.declare_dead(task_id)
    }

    /// Marks a task dead without checking whether it was ever registered
    /// at all (used both by `deregister` and by the watchdog sweep).
    fn declare_dead(&mut self, task_id: u32) -> DeregisterOutcome {
        if self.alive.remove(&task_id).is_some() {
            DeregisterOutcome::Deregistered
        } else {
            DeregisterOutcome::NotRegistered
        }
    }

    /// Watchdog sweep (spec.md §4.5): declares dead any task whose
    /// wall-clock lifetime exceeds `remaining_seconds + TIMEOUT_THRESHOLD`.
    /// Returns the ids reaped this sweep.
    pub fn reap_expired(&mut self) -> Vec<u32> {
        let now = Instant::now();
        let expired: Vec<u32> = self
            .alive
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.registered_at) > entry.remaining + TIMEOUT_THRESHOLD)
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            self.declare_dead(*id);
        }
        expired
    }

    pub fn alive_count(&self) -> usize {
        self.alive.len()
    }

    pub fn is_alive(&self, task_id: u32) -> bool {
        self.alive.contains_key(&task_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// spec.md §8 property 3 and scenario S2 (as corrected in DESIGN.md: a
    /// rejected re-registration does not disturb the existing alive
    /// entry, so the very next deregister still succeeds).
    #[test]
    fn register_then_deregister_then_deregister_again() {
        let mut reg = TaskRegistry::new();
        assert_eq!(reg.register(17, 100), RegisterOutcome::Registered);
        assert_eq!(reg.deregister(17), DeregisterOutcome::Deregistered);
        assert_eq!(reg.deregister(17), DeregisterOutcome::NotRegistered);
    }

    #[test]
    fn s2_duplicate_register_then_deregister_unknown() {
        let mut reg = TaskRegistry::new();
        assert_eq!(reg.register(17, 100), RegisterOutcome::Registered);
        assert_eq!(reg.register(17, 100), RegisterOutcome::AlreadyRegistered);
        // the rejected re-registration left the original alive entry
        // untouched, so this still succeeds.
        assert_eq!(reg.deregister(17), DeregisterOutcome::Deregistered);
        assert_eq!(reg.deregister(99), DeregisterOutcome::Unknown);
    }

    #[test]
    fn reap_declares_expired_tasks_dead() {
        let mut reg = TaskRegistry::new();
        reg.register(1, 0);
        assert!(reg.is_alive(1));
        // can't sleep past TIMEOUT_THRESHOLD in a unit test; exercise the
        // comparison logic directly via a zero-budget task and a manual
        // clock fast-forward substitute: shrink the threshold expectation
        // by asserting reap is a no-op immediately after registration.
        assert!(reg.reap_expired().is_empty());
    }

    /// spec.md §8 property 4. Marked `#[ignore]` because it sleeps for
    /// real; run with `cargo test -- --ignored` when timing matters.
    #[test]
    #[ignore]
    fn property4_zero_budget_task_is_reaped_after_timeout() {
        let mut reg = TaskRegistry::new();
        reg.register(1, 0);
        std::thread::sleep(TIMEOUT_THRESHOLD + Duration::from_secs(1));
        assert_eq!(reg.reap_expired(), vec![1]);
        assert_eq!(reg.deregister(1), DeregisterOutcome::NotRegistered);
    }

    #[test]
    fn alive_count_tracks_register_and_deregister() {
        let mut reg = TaskRegistry::new();
        reg.register(1, 10);
        reg.register(2, 10);
        assert_eq!(reg.alive_count(), 2);
        reg.deregister(1);
        assert_eq!(reg.alive_count(), 1);
    }
}
