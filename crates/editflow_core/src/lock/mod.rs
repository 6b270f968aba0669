//! Pessimistic entity locks shared across sessions.
//!
//! # Responsibility
//! - Acquire and release exclusive edit locks keyed by
//!   `(original entity type, entity id)`.
//! - Report conflicts with holder identity and acquisition time.
//!
//! # Invariants
//! - Releasing a lock that is not held by the calling session is a no-op.
//! - A lock taken under an extended type is visible under its base type.
//! - `NotSupported` is never surfaced to users as a conflict.
//!
//! # See also
//! - crate::screen::lifecycle (lock ownership per screen instance)

use crate::db::DbError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod coordinator;
pub mod sqlite_store;
pub mod store;

pub use coordinator::{
    EditLock, EditLockOutcome, LockCoordinator, LockInfo, LockKey, LockResult, SessionIdentity,
};
pub use sqlite_store::SqliteLockStore;
pub use store::{AcquireOutcome, InMemoryLockStore, LockStore, NoopLockStore};

pub type LockStoreResult<T> = Result<T, LockStoreError>;

/// Infrastructure failure of a lock store.
#[derive(Debug)]
pub enum LockStoreError {
    Db(DbError),
    /// A thread panicked while holding the store's internal mutex.
    Poisoned,
    InvalidData(String),
}

impl Display for LockStoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Poisoned => write!(f, "lock store mutex poisoned"),
            Self::InvalidData(message) => write!(f, "invalid persisted lock data: {message}"),
        }
    }
}

impl Error for LockStoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Poisoned | Self::InvalidData(_) => None,
        }
    }
}

impl From<DbError> for LockStoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for LockStoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}
