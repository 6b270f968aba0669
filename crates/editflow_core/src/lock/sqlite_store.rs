//! SQLite-backed lock store.
//!
//! # Responsibility
//! - Persist locks in `entity_locks` so sessions in different processes
//!   sharing one database file contend for real.
//!
//! # Invariants
//! - Each acquisition runs in an `IMMEDIATE` transaction, so the
//!   read-decide-write sequence is atomic across connections.

use super::coordinator::{LockInfo, LockKey};
use super::store::{decide, AcquireOutcome, LockStore};
use super::{LockStoreError, LockStoreResult};
use crate::db::{open_db, open_db_in_memory};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

const LOCK_SELECT_SQL: &str = "SELECT
    resource_type,
    resource_id,
    holder_user,
    holder_session,
    acquired_at_ms
FROM entity_locks
WHERE resource_type = ?1 AND resource_id = ?2";

#[derive(Debug)]
pub struct SqliteLockStore {
    conn: Mutex<Connection>,
}

impl SqliteLockStore {
    /// Wraps a connection whose migrations are already applied.
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    pub fn open(path: impl AsRef<Path>) -> LockStoreResult<Self> {
        Ok(Self::new(open_db(path)?))
    }

    pub fn open_in_memory() -> LockStoreResult<Self> {
        Ok(Self::new(open_db_in_memory()?))
    }

    fn conn(&self) -> LockStoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| LockStoreError::Poisoned)
    }
}

impl LockStore for SqliteLockStore {
    fn try_acquire(
        &self,
        candidate: &LockInfo,
        expire_before_ms: Option<i64>,
    ) -> LockStoreResult<AcquireOutcome> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let existing = find_lock(&tx, &candidate.key)?;
        let outcome = decide(existing, candidate, expire_before_ms);

        // A self-held row is returned as stored and needs no write.
        if let AcquireOutcome::Acquired { lock, .. } = &outcome {
            if lock == candidate {
                tx.execute(
                    "INSERT INTO entity_locks (
                        resource_type, resource_id, holder_user, holder_session, acquired_at_ms
                    ) VALUES (?1, ?2, ?3, ?4, ?5)
                    ON CONFLICT (resource_type, resource_id) DO UPDATE SET
                        holder_user = excluded.holder_user,
                        holder_session = excluded.holder_session,
                        acquired_at_ms = excluded.acquired_at_ms",
                    params![
                        lock.key.resource_type,
                        lock.key.resource_id.to_string(),
                        lock.holder_user,
                        lock.holder_session.to_string(),
                        lock.acquired_at_ms,
                    ],
                )?;
            }
        }
        tx.commit()?;
        Ok(outcome)
    }

    fn release(&self, key: &LockKey, session: Uuid) -> LockStoreResult<bool> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM entity_locks
             WHERE resource_type = ?1 AND resource_id = ?2 AND holder_session = ?3",
            params![
                key.resource_type,
                key.resource_id.to_string(),
                session.to_string()
            ],
        )?;
        Ok(removed > 0)
    }

    fn find(&self, key: &LockKey) -> LockStoreResult<Option<LockInfo>> {
        let conn = self.conn()?;
        find_lock(&conn, key)
    }
}

fn find_lock(conn: &Connection, key: &LockKey) -> LockStoreResult<Option<LockInfo>> {
    let lock = conn
        .query_row(
            LOCK_SELECT_SQL,
            params![key.resource_type, key.resource_id.to_string()],
            map_lock_row,
        )
        .optional()?;
    Ok(lock)
}

fn map_lock_row(row: &Row<'_>) -> rusqlite::Result<LockInfo> {
    Ok(LockInfo {
        key: LockKey {
            resource_type: row.get(0)?,
            resource_id: parse_uuid(row, 1)?,
        },
        holder_user: row.get(2)?,
        holder_session: parse_uuid(row, 3)?,
        acquired_at_ms: row.get(4)?,
    })
}

fn parse_uuid(row: &Row<'_>, index: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(index)?;
    Uuid::parse_str(&raw)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(err)))
}

#[cfg(test)]
mod tests {
    use super::SqliteLockStore;
    use crate::lock::coordinator::{LockInfo, LockKey};
    use crate::lock::store::{AcquireOutcome, LockStore};
    use uuid::Uuid;

    fn candidate(session: Uuid, user: &str) -> LockInfo {
        LockInfo {
            key: LockKey::new("Order", Uuid::nil()),
            holder_user: user.to_string(),
            holder_session: session,
            acquired_at_ms: 42,
        }
    }

    #[test]
    fn second_session_sees_conflict_until_release() {
        let store = SqliteLockStore::open_in_memory().expect("open store");
        let alice = candidate(Uuid::new_v4(), "alice");
        let bob = candidate(Uuid::new_v4(), "bob");

        assert!(matches!(
            store.try_acquire(&alice, None).expect("alice"),
            AcquireOutcome::Acquired { .. }
        ));
        assert_eq!(
            store.try_acquire(&bob, None).expect("bob"),
            AcquireOutcome::Conflict(alice.clone())
        );

        assert!(store.release(&alice.key, alice.holder_session).expect("release"));
        assert!(!store.release(&alice.key, alice.holder_session).expect("second release"));
        assert!(matches!(
            store.try_acquire(&bob, None).expect("bob again"),
            AcquireOutcome::Acquired { .. }
        ));
        assert_eq!(store.find(&bob.key).expect("find"), Some(bob));
    }
}
