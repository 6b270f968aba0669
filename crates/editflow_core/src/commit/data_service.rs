//! Persistence collaborator contract and an in-memory implementation.
//!
//! # Responsibility
//! - Define the synchronous, all-or-nothing `reload` / `commit` boundary
//!   screens depend on.
//! - Provide `InMemoryDataService` with optimistic version checks for
//!   single-process use, demos and tests.
//!
//! # Invariants
//! - `InMemoryDataService::commit` validates the whole request before
//!   writing anything, so a failing commit leaves the store untouched.
//! - Committed versions increase by one per commit; new entities start at 1.

use super::{CommitResult, SaveRequest};
use crate::model::entity::{Entity, EntityRef, Value};
use log::{debug, info};
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub type DataResult<T> = Result<T, DataServiceError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataServiceError {
    /// Another session saved the entity since this snapshot was loaded.
    StaleVersion {
        reference: EntityRef,
        expected: Option<u32>,
        actual: Option<u32>,
    },
    Backend(String),
}

impl Display for DataServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StaleVersion {
                reference,
                expected,
                actual,
            } => write!(
                f,
                "{reference} was modified concurrently (expected version {expected:?}, found {actual:?})"
            ),
            Self::Backend(message) => write!(f, "data service failure: {message}"),
        }
    }
}

impl Error for DataServiceError {}

/// Persistence collaborator consumed by screens.
pub trait DataService: Send + Sync {
    /// Loads the authoritative snapshot restricted to `fetch_plan`.
    fn reload(&self, reference: &EntityRef, fetch_plan: &str) -> DataResult<Option<Entity>>;

    /// Saves and removes everything in `request` as one unit.
    fn commit(&self, request: &SaveRequest) -> DataResult<CommitResult>;
}

/// Map-backed data service.
///
/// Fetch plans are attribute allow-lists per entity type; an unknown plan
/// loads every attribute.
#[derive(Debug, Default)]
pub struct InMemoryDataService {
    entities: Mutex<BTreeMap<EntityRef, Entity>>,
    plans: BTreeMap<(String, String), Vec<String>>,
    commits: AtomicUsize,
}

impl InMemoryDataService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fetch_plan(
        mut self,
        entity_type: impl Into<String>,
        plan: impl Into<String>,
        attributes: &[&str],
    ) -> Self {
        self.plans.insert(
            (entity_type.into(), plan.into()),
            attributes.iter().map(|name| name.to_string()).collect(),
        );
        self
    }

    /// Stores `entity` as already persisted, assigning version 1 when new.
    pub fn seed(&self, mut entity: Entity) -> DataResult<Entity> {
        entity.strip_subscriptions();
        entity.version = Some(entity.version.unwrap_or(1));
        self.store()?.insert(entity.reference(), entity.clone());
        Ok(entity)
    }

    /// Returns the stored snapshot without plan filtering.
    pub fn stored(&self, reference: &EntityRef) -> DataResult<Option<Entity>> {
        Ok(self.store()?.get(reference).cloned())
    }

    /// Number of commit calls that reached the store.
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    fn store(&self) -> DataResult<std::sync::MutexGuard<'_, BTreeMap<EntityRef, Entity>>> {
        self.entities
            .lock()
            .map_err(|_| DataServiceError::Backend("entity store mutex poisoned".to_string()))
    }
}

impl DataService for InMemoryDataService {
    fn reload(&self, reference: &EntityRef, fetch_plan: &str) -> DataResult<Option<Entity>> {
        let store = self.store()?;
        let Some(stored) = store.get(reference) else {
            debug!("event=reload module=data status=not_found entity={reference}");
            return Ok(None);
        };

        let mut entity = hydrate(stored, &store, &mut Vec::new());
        if let Some(allowed) = self.plans.get(&(entity.entity_type.clone(), fetch_plan.to_string())) {
            entity.attributes.retain(|name, _| allowed.contains(name));
        }
        debug!("event=reload module=data status=ok entity={reference} fetch_plan={fetch_plan}");
        Ok(Some(entity))
    }

    fn commit(&self, request: &SaveRequest) -> DataResult<CommitResult> {
        let mut store = self.store()?;
        for instance in &request.commit_instances {
            let actual = store.get(&instance.reference()).and_then(|stored| stored.version);
            if actual != instance.version {
                return Err(DataServiceError::StaleVersion {
                    reference: instance.reference(),
                    expected: instance.version,
                    actual,
                });
            }
        }

        let mut committed: Vec<Entity> = request
            .commit_instances
            .iter()
            .cloned()
            .map(|mut entity| {
                entity.strip_subscriptions();
                entity.version = Some(entity.version.map_or(1, |version| version + 1));
                entity
            })
            .collect();
        let fresh: BTreeMap<EntityRef, Entity> = committed
            .iter()
            .map(|entity| (entity.reference(), entity.clone()))
            .collect();
        for entity in &mut committed {
            link_committed(entity, &fresh);
        }

        for removed in &request.remove_instances {
            store.remove(removed);
        }
        for entity in &committed {
            store.insert(entity.reference(), entity.clone());
        }
        self.commits.fetch_add(1, Ordering::SeqCst);
        info!(
            "event=data_commit module=data status=ok saved={} removed={}",
            committed.len(),
            request.remove_instances.len()
        );
        Ok(CommitResult { committed })
    }
}

/// Replaces embedded snapshots with their current stored state. Persisted
/// embedded entities missing from the store were removed and are dropped.
fn hydrate(entity: &Entity, store: &BTreeMap<EntityRef, Entity>, path: &mut Vec<EntityRef>) -> Entity {
    path.push(entity.reference());
    let mut out = entity.clone();
    for value in out.attributes.values_mut() {
        let replacement = match value {
            Value::Reference(target) => resolve(target, store, path)
                .map(|resolved| Value::Reference(Box::new(resolved)))
                .unwrap_or(Value::Null),
            Value::Composition(rows) => Value::Composition(
                rows.iter()
                    .filter_map(|row| resolve(row, store, path))
                    .collect(),
            ),
            _ => continue,
        };
        *value = replacement;
    }
    path.pop();
    out
}

fn resolve(
    embedded: &Entity,
    store: &BTreeMap<EntityRef, Entity>,
    path: &mut Vec<EntityRef>,
) -> Option<Entity> {
    let reference = embedded.reference();
    if path.contains(&reference) {
        return Some(embedded.clone());
    }
    match store.get(&reference) {
        Some(stored) => Some(hydrate(stored, store, path)),
        None if embedded.is_new() => Some(embedded.clone()),
        None => None,
    }
}

/// Points embedded snapshots at the versions produced by the same commit.
fn link_committed(entity: &mut Entity, fresh: &BTreeMap<EntityRef, Entity>) {
    let mut seen = BTreeSet::from([entity.reference()]);
    link_values(entity, fresh, &mut seen);
}

fn link_values(entity: &mut Entity, fresh: &BTreeMap<EntityRef, Entity>, seen: &mut BTreeSet<EntityRef>) {
    for value in entity.attributes.values_mut() {
        let targets: Vec<&mut Entity> = match value {
            Value::Reference(target) => vec![target.as_mut()],
            Value::Composition(rows) => rows.iter_mut().collect(),
            _ => continue,
        };
        for target in targets {
            if let Some(saved) = fresh.get(&target.reference()) {
                target.version = saved.version;
            }
            if seen.insert(target.reference()) {
                link_values(target, fresh, seen);
            }
        }
    }
}
