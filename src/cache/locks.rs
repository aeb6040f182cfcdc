use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Table = Arc<Mutex<HashMap<String, Slot>>>;

struct Slot {
    lock: Arc<AsyncMutex<()>>,
    /// Holders plus waiters.
    users: usize,
}

/// Process-wide table of per-key mutual exclusion tokens.
///
/// Entries exist only while someone holds or waits on them.
#[derive(Clone, Default)]
pub struct KeyLocks {
    locks: Table,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive ownership of `key`.
    ///
    /// Dropping the returned future before it resolves still releases the
    /// caller's claim on the entry.
    pub async fn acquire(&self, key: &str) -> KeyGuard {
        let (registration, lock) = self.register(key);
        let guard = lock.lock_owned().await;

        KeyGuard {
            _guard: guard,
            _registration: registration,
        }
    }

    /// Number of keys currently held or awaited.
    pub fn in_flight(&self) -> usize {
        self.locks.lock().len()
    }

    fn register(&self, key: &str) -> (Registration, Arc<AsyncMutex<()>>) {
        let mut locks = self.locks.lock();
        let slot = locks.entry(key.to_string()).or_insert_with(|| Slot {
            lock: Arc::default(),
            users: 0,
        });
        slot.users += 1;
        let registration = Registration {
            key: key.to_string(),
            locks: self.locks.clone(),
        };
        (registration, slot.lock.clone())
    }
}

/// One holder's or waiter's claim on a table entry.
struct Registration {
    key: String,
    locks: Table,
}

impl Drop for Registration {
    fn drop(&mut self) {
        let mut locks = self.locks.lock();
        let idle = match locks.get_mut(&self.key) {
            Some(slot) => {
                slot.users -= 1;
                slot.users == 0
            }
            None => false,
        };
        if idle {
            locks.remove(&self.key);
        }
    }
}

/// Releases its key on drop, including when the owning task is aborted.
pub struct KeyGuard {
    // Dropped in declaration order: unlock first, then release the claim
    _guard: OwnedMutexGuard<()>,
    _registration: Registration,
}
