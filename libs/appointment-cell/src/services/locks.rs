use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Unit of booking serialization: one doctor's day within one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotKey {
    pub tenant_id: String,
    pub doctor_id: String,
    pub date: NaiveDate,
}

impl SlotKey {
    pub fn new(tenant_id: impl Into<String>, doctor_id: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            doctor_id: doctor_id.into(),
            date,
        }
    }
}

/// Held for the duration of a read-check-write on one or more doctor days.
pub struct SlotGuard {
    _guards: Vec<OwnedMutexGuard<()>>,
}

const PRUNE_THRESHOLD: usize = 1024;

/// Async per-(tenant, doctor, date) locks.
#[derive(Default)]
pub struct SlotLocks {
    locks: Mutex<HashMap<SlotKey, Arc<AsyncMutex<()>>>>,
}

impl SlotLocks {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock_for(&self, key: &SlotKey) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock();
        if locks.len() >= PRUNE_THRESHOLD {
            // Only the map itself references an idle lock.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        }
        locks.entry(key.clone()).or_default().clone()
    }

    /// Locks every key, in sorted order so overlapping callers cannot deadlock.
    pub async fn acquire(&self, mut keys: Vec<SlotKey>) -> SlotGuard {
        keys.sort();
        keys.dedup();

        let mut guards = Vec::with_capacity(keys.len());
        for key in &keys {
            guards.push(self.lock_for(key).lock_owned().await);
        }
        SlotGuard { _guards: guards }
    }

    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn key(doctor: &str) -> SlotKey {
        SlotKey::new("t1", doctor, NaiveDate::from_ymd_opt(2025, 1, 6).unwrap())
    }

    #[tokio::test]
    async fn same_key_is_exclusive() {
        let locks = SlotLocks::new();
        let guard = locks.acquire(vec![key("d1")]).await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire(vec![key("d1")]).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn different_keys_do_not_block() {
        let locks = SlotLocks::new();
        let _a = locks.acquire(vec![key("d1")]).await;
        let _b = locks.acquire(vec![key("d2")]).await;
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn duplicate_keys_in_one_request_are_locked_once() {
        let locks = SlotLocks::new();
        let _guard = locks.acquire(vec![key("d1"), key("d1")]).await;
    }
}
