//! Per-key write serialization.
//!
//! Backups are versioned per holder and recovery requests are exclusive per
//! backup, so writers for the same key must queue up while writers for
//! different keys proceed in parallel. A global lock would be simpler and
//! would also make every holder wait on every other holder.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

/// A table of lazily created mutexes keyed by string.
///
/// Entries are never evicted. Each one is a pointer and an empty mutex, and
/// the key space (holders, backups) is bounded by what the stores hold anyway.
#[derive(Debug, Default)]
pub struct KeyedLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the mutex for `key`, creating it on first use.
    ///
    /// The shard guard is dropped before the caller locks the returned mutex,
    /// so holding one key's lock never blocks lookups of another.
    pub fn handle(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn same_key_shares_a_mutex() {
        let locks = KeyedLocks::new();
        let a = locks.handle("holder-1");
        let b = locks.handle("holder-1");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(locks.len(), 1);
    }

    #[test]
    fn different_keys_do_not_block() {
        let locks = KeyedLocks::new();
        let a = locks.handle("a");
        let _held = a.lock();
        let b = locks.handle("b");
        assert!(b.try_lock().is_some());
    }

    #[test]
    fn serializes_read_modify_write() {
        let locks = Arc::new(KeyedLocks::new());
        let counter = Arc::new(Mutex::new(0u32));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    for _ in 0..100 {
                        let lock = locks.handle("k");
                        let _guard = lock.lock();
                        let v = *counter.lock();
                        *counter.lock() = v + 1;
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*counter.lock(), 800);
    }
}
