//! Lock storage contract and process-local implementations.

use super::coordinator::{LockInfo, LockKey};
use super::{LockStoreError, LockStoreResult};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

/// Result of one atomic acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// The candidate (or the session's existing lock) now holds the key.
    /// `replaced` carries an expired lock of another session that was taken over.
    Acquired {
        lock: LockInfo,
        replaced: Option<LockInfo>,
    },
    /// Another session holds the key.
    Conflict(LockInfo),
    /// The backing store does not support locking.
    Unsupported,
}

/// Storage backend shared by all sessions that must see each other's locks.
pub trait LockStore: Send + Sync {
    /// Atomically claims `candidate.key` for `candidate.holder_session`.
    ///
    /// A lock held by another session whose `acquired_at_ms` is older than
    /// `expire_before_ms` is replaced.
    fn try_acquire(
        &self,
        candidate: &LockInfo,
        expire_before_ms: Option<i64>,
    ) -> LockStoreResult<AcquireOutcome>;

    /// Removes the lock if `session` holds it. Returns whether a row was removed.
    fn release(&self, key: &LockKey, session: Uuid) -> LockStoreResult<bool>;

    fn find(&self, key: &LockKey) -> LockStoreResult<Option<LockInfo>>;
}

/// Decides an acquisition against the currently stored lock.
pub(crate) fn decide(
    existing: Option<LockInfo>,
    candidate: &LockInfo,
    expire_before_ms: Option<i64>,
) -> AcquireOutcome {
    match existing {
        None => AcquireOutcome::Acquired {
            lock: candidate.clone(),
            replaced: None,
        },
        Some(current) if current.holder_session == candidate.holder_session => {
            AcquireOutcome::Acquired {
                lock: current,
                replaced: None,
            }
        }
        Some(current) if expire_before_ms.is_some_and(|cutoff| current.acquired_at_ms < cutoff) => {
            AcquireOutcome::Acquired {
                lock: candidate.clone(),
                replaced: Some(current),
            }
        }
        Some(current) => AcquireOutcome::Conflict(current),
    }
}

/// Lock table kept in process memory; share one instance through `Arc`
/// between the coordinators of sessions that must contend.
#[derive(Debug, Default)]
pub struct InMemoryLockStore {
    locks: Mutex<HashMap<LockKey, LockInfo>>,
}

impl InMemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> LockStoreResult<usize> {
        Ok(self.locks.lock().map_err(|_| LockStoreError::Poisoned)?.len())
    }

    pub fn is_empty(&self) -> LockStoreResult<bool> {
        self.len().map(|len| len == 0)
    }
}

impl LockStore for InMemoryLockStore {
    fn try_acquire(
        &self,
        candidate: &LockInfo,
        expire_before_ms: Option<i64>,
    ) -> LockStoreResult<AcquireOutcome> {
        let mut locks = self.locks.lock().map_err(|_| LockStoreError::Poisoned)?;
        let outcome = decide(locks.get(&candidate.key).cloned(), candidate, expire_before_ms);
        if let AcquireOutcome::Acquired { lock, .. } = &outcome {
            locks.insert(lock.key.clone(), lock.clone());
        }
        Ok(outcome)
    }

    fn release(&self, key: &LockKey, session: Uuid) -> LockStoreResult<bool> {
        let mut locks = self.locks.lock().map_err(|_| LockStoreError::Poisoned)?;
        match locks.get(key) {
            Some(lock) if lock.holder_session == session => {
                locks.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn find(&self, key: &LockKey) -> LockStoreResult<Option<LockInfo>> {
        let locks = self.locks.lock().map_err(|_| LockStoreError::Poisoned)?;
        Ok(locks.get(key).cloned())
    }
}

/// Store for backends without locking support.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLockStore;

impl LockStore for NoopLockStore {
    fn try_acquire(&self, _: &LockInfo, _: Option<i64>) -> LockStoreResult<AcquireOutcome> {
        Ok(AcquireOutcome::Unsupported)
    }

    fn release(&self, _: &LockKey, _: Uuid) -> LockStoreResult<bool> {
        Ok(false)
    }

    fn find(&self, _: &LockKey) -> LockStoreResult<Option<LockInfo>> {
        Ok(None)
    }
}
