//! In-process single-flight registry.
//!
//! At most one active attempt may mutate a given source record at any time,
//! across all job types. The registry is a concurrent set of record ids
//! checked-and-set before dequeue and released when the attempt finishes.
//! It is process-local; running multiple orchestrator processes against one
//! database requires promoting this to a shared lock row.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
pub struct SingleFlight {
    held: Mutex<HashSet<i64>>,
}

/// Exclusive right to mutate one source record. Released on drop.
#[derive(Debug)]
pub struct FlightPermit {
    registry: Arc<SingleFlight>,
    record_id: i64,
}

impl SingleFlight {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Atomically claim `record_id`. Returns `None` when another attempt for
    /// the same record is already in flight; the caller requeues, never runs
    /// concurrently and never drops the work.
    pub fn try_acquire(self: &Arc<Self>, record_id: i64) -> Option<FlightPermit> {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        if held.insert(record_id) {
            Some(FlightPermit {
                registry: Arc::clone(self),
                record_id,
            })
        } else {
            None
        }
    }

    /// Number of records currently being mutated, for diagnostics.
    pub fn held_count(&self) -> usize {
        self.held.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl FlightPermit {
    pub fn record_id(&self) -> i64 {
        self.record_id
    }
}

impl Drop for FlightPermit {
    fn drop(&mut self) {
        let mut held = self
            .registry
            .held
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        held.remove(&self.record_id);
    }
}
