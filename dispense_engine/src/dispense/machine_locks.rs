use std::{collections::HashMap, sync::Arc};

use log::*;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Per-machine mutual exclusion for dispense commands.
///
/// A machine has exactly one physical dispense mechanism, so two commands must never be in flight against the same
/// machine at the same time. Locks are keyed by the canonical machine uid; requests for different machines proceed
/// concurrently. Batch dispatch holds the lock for the whole batch so a concurrent single-slot request cannot
/// interleave with it.
#[derive(Clone, Debug, Default)]
pub struct MachineLocks {
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl MachineLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for and returns the lock for the given machine. The lock is released when the guard is dropped.
    pub async fn acquire(&self, machine_uid: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.entry(machine_uid.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
        };
        trace!("🔒️ Waiting for dispense lock on machine {machine_uid}");
        let guard = lock.lock_owned().await;
        trace!("🔒️ Acquired dispense lock on machine {machine_uid}");
        guard
    }
}
