//! Session-side lock protocol.
//!
//! # Responsibility
//! - Translate entity types to their original (non-extended) name before
//!   touching the store.
//! - Decide expiry cutoffs and log every acquisition and release.
//! - Hand out [`EditLock`] tokens that can be released exactly once.
//!
//! # Invariants
//! - Only the session that holds a lock can release it.
//! - An already self-held lock is reported as `SelfHeld` by
//!   [`LockCoordinator::lock_for_edit`] without calling the store, so a
//!   re-entrant open never owns a second release.

use super::store::{AcquireOutcome, LockStore};
use super::{LockStoreError, LockStoreResult};
use crate::config::EditorConfig;
use crate::model::entity::EntityKey;
use crate::model::metadata::Metadata;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Identity of the user session acting on screens.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionIdentity {
    pub session_id: Uuid,
    pub user: String,
}

impl SessionIdentity {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            user: user.into(),
        }
    }
}

/// Lock resource name: original entity type plus entity id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LockKey {
    pub resource_type: String,
    pub resource_id: EntityKey,
}

impl LockKey {
    pub fn new(resource_type: impl Into<String>, resource_id: EntityKey) -> Self {
        Self {
            resource_type: resource_type.into(),
            resource_id,
        }
    }
}

impl Display for LockKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.resource_type, self.resource_id)
    }
}

/// A held lock and its holder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    pub key: LockKey,
    pub holder_user: String,
    pub holder_session: Uuid,
    pub acquired_at_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockResult {
    Acquired(LockInfo),
    HeldBy { holder: String, since_ms: i64 },
    /// Treated like `Acquired` by callers.
    NotSupported,
}

/// Lock freshly acquired for one editing session.
///
/// Not `Clone`: releasing consumes the token.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "an edit lock must be released when the editor closes"]
pub struct EditLock {
    entity_type: String,
    id: EntityKey,
}

impl EditLock {
    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn id(&self) -> EntityKey {
        self.id
    }

    /// Releases the lock. Store failures are logged, never raised, so a
    /// closing screen always completes.
    pub fn release(self, coordinator: &LockCoordinator) {
        if let Err(err) = coordinator.release(&self.entity_type, self.id) {
            warn!(
                "event=lock_release module=lock status=error entity_type={} entity_id={} error={err}",
                self.entity_type, self.id
            );
        }
    }
}

/// Result of locking an entity for editing.
#[derive(Debug)]
pub enum EditLockOutcome {
    /// This call acquired the lock; the caller owns its release.
    Locked(EditLock),
    /// The session already held the lock; nothing to release later.
    SelfHeld,
    NotSupported,
    Conflict { holder: String, since_ms: i64 },
    /// The store failed; callers fall back to read-only.
    Unavailable(LockStoreError),
}

type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

pub struct LockCoordinator {
    store: Arc<dyn LockStore>,
    session: SessionIdentity,
    metadata: Arc<Metadata>,
    timeout: Option<Duration>,
    clock: Clock,
}

impl Debug for LockCoordinator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockCoordinator")
            .field("session", &self.session)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl LockCoordinator {
    pub fn new(store: Arc<dyn LockStore>, session: SessionIdentity, metadata: Arc<Metadata>) -> Self {
        Self {
            store,
            session,
            metadata,
            timeout: None,
            clock: Arc::new(now_ms),
        }
    }

    /// Coordinator with the lock expiry from `config.lock_timeout_secs`.
    pub fn from_config(
        store: Arc<dyn LockStore>,
        session: SessionIdentity,
        metadata: Arc<Metadata>,
        config: &EditorConfig,
    ) -> Self {
        Self::new(store, session, metadata).with_timeout(config.lock_timeout())
    }

    /// Lets this session take over locks older than `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Replaces the wall clock, in milliseconds since the Unix epoch.
    pub fn with_clock(mut self, clock: impl Fn() -> i64 + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn session(&self) -> &SessionIdentity {
        &self.session
    }

    pub fn key_for(&self, entity_type: &str, id: EntityKey) -> LockKey {
        LockKey::new(self.metadata.original_name(entity_type), id)
    }

    /// Attempts to claim the lock for this session.
    pub fn acquire(&self, entity_type: &str, id: EntityKey) -> LockStoreResult<LockResult> {
        let key = self.key_for(entity_type, id);
        let now = (self.clock)();
        let candidate = LockInfo {
            key: key.clone(),
            holder_user: self.session.user.clone(),
            holder_session: self.session.session_id,
            acquired_at_ms: now,
        };
        let cutoff = self
            .timeout
            .map(|timeout| now - i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX));

        match self.store.try_acquire(&candidate, cutoff)? {
            AcquireOutcome::Acquired { lock, replaced } => {
                if let Some(previous) = replaced {
                    warn!(
                        "event=lock_takeover module=lock status=ok key={key} previous_holder={} previous_since_ms={}",
                        previous.holder_user, previous.acquired_at_ms
                    );
                }
                info!("event=lock_acquire module=lock status=ok key={key}");
                Ok(LockResult::Acquired(lock))
            }
            AcquireOutcome::Conflict(holder) => {
                info!(
                    "event=lock_conflict module=lock status=held key={key} holder={} since_ms={}",
                    holder.holder_user, holder.acquired_at_ms
                );
                Ok(LockResult::HeldBy {
                    holder: holder.holder_user,
                    since_ms: holder.acquired_at_ms,
                })
            }
            AcquireOutcome::Unsupported => {
                debug!("event=lock_acquire module=lock status=unsupported key={key}");
                Ok(LockResult::NotSupported)
            }
        }
    }

    /// Releases this session's lock. Unheld or foreign locks are left alone.
    pub fn release(&self, entity_type: &str, id: EntityKey) -> LockStoreResult<()> {
        let key = self.key_for(entity_type, id);
        let removed = self.store.release(&key, self.session.session_id)?;
        info!(
            "event=lock_release module=lock status={} key={key}",
            if removed { "ok" } else { "noop" }
        );
        Ok(())
    }

    pub fn lock_info(&self, entity_type: &str, id: EntityKey) -> LockStoreResult<Option<LockInfo>> {
        self.store.find(&self.key_for(entity_type, id))
    }

    pub fn is_held_by_self(&self, entity_type: &str, id: EntityKey) -> LockStoreResult<bool> {
        Ok(self
            .lock_info(entity_type, id)?
            .is_some_and(|lock| lock.holder_session == self.session.session_id))
    }

    /// Locks an entity for a write-mode screen.
    pub fn lock_for_edit(&self, entity_type: &str, id: EntityKey) -> EditLockOutcome {
        match self.is_held_by_self(entity_type, id) {
            Ok(true) => {
                debug!(
                    "event=lock_acquire module=lock status=self_held key={}",
                    self.key_for(entity_type, id)
                );
                return EditLockOutcome::SelfHeld;
            }
            Ok(false) => {}
            Err(err) => return EditLockOutcome::Unavailable(err),
        }

        match self.acquire(entity_type, id) {
            Ok(LockResult::Acquired(_)) => EditLockOutcome::Locked(EditLock {
                entity_type: entity_type.to_string(),
                id,
            }),
            Ok(LockResult::NotSupported) => EditLockOutcome::NotSupported,
            Ok(LockResult::HeldBy { holder, since_ms }) => {
                EditLockOutcome::Conflict { holder, since_ms }
            }
            Err(err) => {
                warn!(
                    "event=lock_acquire module=lock status=error key={} error={err}",
                    self.key_for(entity_type, id)
                );
                EditLockOutcome::Unavailable(err)
            }
        }
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}
