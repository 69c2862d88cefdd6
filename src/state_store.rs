//! State Snapshot Store
//!
//! Holds the single live [`SystemState`]. The sampler installs whole new
//! snapshots; readers get a copy of whichever snapshot was current when they
//! looked, never a mix of two.

use crate::types::SystemState;
use arc_swap::ArcSwap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub struct StateStore {
    current: ArcSwap<SystemState>,
    generation: AtomicU64,
}

impl StateStore {
    pub fn new(initial: SystemState) -> Self {
        Self {
            current: ArcSwap::from_pointee(initial.clamped()),
            generation: AtomicU64::new(0),
        }
    }

    /// Copy of the current snapshot
    pub fn get(&self) -> SystemState {
        **self.current.load()
    }

    /// Atomically install a new snapshot
    pub fn replace(&self, state: SystemState) {
        self.current.store(Arc::new(state.clamped()));
        self.generation.fetch_add(1, Ordering::Release);
    }

    /// Number of snapshots installed since creation
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::thread;

    fn state_for(generation: u32) -> SystemState {
        let ratio = (generation % 1000) as f64 / 1000.0;
        let mut state = SystemState::initial(Utc::now());
        state.cpu_usage = ratio;
        state.memory_usage = ratio;
        state.io_usage = ratio;
        state.network_usage = ratio;
        state.process_count = generation;
        state.user_count = generation;
        state.battery_level = ratio * 100.0;
        state.on_ac_power = generation % 2 == 0;
        state
    }

    fn is_consistent(state: &SystemState) -> bool {
        let generation = state.process_count;
        let expected = state_for(generation);
        state.user_count == generation
            && state.cpu_usage == expected.cpu_usage
            && state.memory_usage == expected.memory_usage
            && state.io_usage == expected.io_usage
            && state.network_usage == expected.network_usage
            && state.battery_level == expected.battery_level
            && state.on_ac_power == expected.on_ac_power
    }

    #[test]
    fn test_get_returns_installed_snapshot() {
        let store = StateStore::new(state_for(0));
        assert_eq!(store.generation(), 0);

        let next = state_for(7);
        store.replace(next);

        assert_eq!(store.get(), next);
        assert_eq!(store.generation(), 1);
    }

    #[test]
    fn test_replace_clamps() {
        let store = StateStore::new(state_for(0));
        let mut wild = state_for(1);
        wild.cpu_usage = 3.0;
        wild.battery_level = -5.0;
        store.replace(wild);

        let state = store.get();
        assert_eq!(state.cpu_usage, 1.0);
        assert_eq!(state.battery_level, 0.0);
    }

    #[test]
    fn test_concurrent_readers_never_see_torn_snapshot() {
        let store = Arc::new(StateStore::new(state_for(0)));

        let writer = {
            let store = store.clone();
            thread::spawn(move || {
                for generation in 1..=20_000 {
                    store.replace(state_for(generation));
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                thread::spawn(move || {
                    for _ in 0..20_000 {
                        let state = store.get();
                        assert!(is_consistent(&state), "torn snapshot: {:?}", state);
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }

        assert_eq!(store.get().process_count, 20_000);
    }
}
