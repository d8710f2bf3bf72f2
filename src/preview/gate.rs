//! Per-key render gates.
//!
//! Each cache key gets one binary gate. A worker holds the gate for the whole
//! check-render-store sequence, so a (page, size) pair is never rendered by two
//! workers at once. Gates are created on first use and shared by everyone who
//! asks for the same key while they are alive.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Condvar, Mutex, PoisonError};

struct Gate {
    held: Mutex<bool>,
    released: Condvar,
}

impl Gate {
    fn new() -> Self {
        Self {
            held: Mutex::new(false),
            released: Condvar::new(),
        }
    }

    fn acquire(&self) {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        while *held {
            held = self
                .released
                .wait(held)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *held = true;
    }

    fn release(&self) {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        *held = false;
        drop(held);
        self.released.notify_one();
    }

    fn is_held(&self) -> bool {
        *self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Exclusive hold on one key; released on drop
pub struct GateGuard {
    gate: Arc<Gate>,
}

impl Drop for GateGuard {
    fn drop(&mut self) {
        self.gate.release();
    }
}

/// Table of per-key binary gates
pub struct KeyedGate<K> {
    gates: Mutex<HashMap<K, Arc<Gate>>>,
}

impl<K: Eq + Hash + Clone> KeyedGate<K> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            gates: Mutex::new(HashMap::new()),
        }
    }

    fn gate(&self, key: &K) -> Arc<Gate> {
        let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            gates
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Gate::new())),
        )
    }

    /// Block until no one else holds `key`, then hold it.
    ///
    /// The table lock is released before waiting; only the gate itself blocks.
    pub fn acquire(&self, key: &K) -> GateGuard {
        let gate = self.gate(key);
        gate.acquire();
        GateGuard { gate }
    }

    /// Hold `key` if it is free right now
    pub fn try_acquire(&self, key: &K) -> Option<GateGuard> {
        let gate = self.gate(key);
        let mut held = gate.held.lock().unwrap_or_else(PoisonError::into_inner);
        if *held {
            return None;
        }
        *held = true;
        drop(held);
        Some(GateGuard { gate })
    }

    /// Drop the gate for `key` if nobody holds or waits on it.
    ///
    /// Returns true when the gate was removed.
    pub fn forget(&self, key: &K) -> bool {
        let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
        let idle = gates
            .get(key)
            .is_some_and(|gate| Arc::strong_count(gate) == 1 && !gate.is_held());
        if idle {
            gates.remove(key);
        }
        idle
    }

    /// Drop every idle gate whose key `keep` rejects. Returns how many went.
    pub fn retain_idle(&self, keep: impl Fn(&K) -> bool) -> usize {
        let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
        let before = gates.len();
        gates.retain(|key, gate| keep(key) || Arc::strong_count(gate) > 1 || gate.is_held());
        before - gates.len()
    }

    /// Number of gates currently tracked
    #[must_use]
    pub fn len(&self) -> usize {
        self.gates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K: Eq + Hash + Clone> Default for KeyedGate<K> {
    fn default() -> Self {
        Self::new()
    }
}
