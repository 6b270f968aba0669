//! Entity snapshot model.
//!
//! # Responsibility
//! - Define the identity (`EntityRef`) and the in-memory snapshot (`Entity`)
//!   edited by screens.
//! - Track which attributes were loaded by the fetch plan that produced the
//!   snapshot.
//!
//! # Invariants
//! - Identity is `(entity_type, key)`; equality and ordering never look at
//!   `version` or attribute values.
//! - An entity without `version` has never been persisted ("new").
//! - An attribute missing from `attributes` is "not loaded", which is
//!   different from an attribute loaded as `Value::Null`.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};
use uuid::Uuid;

/// Primary key of a persistent entity.
pub type EntityKey = Uuid;

/// Identity of one entity instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRef {
    pub entity_type: String,
    pub key: EntityKey,
    /// `None` until the persistence collaborator has stored the entity.
    pub version: Option<u32>,
}

impl EntityRef {
    pub fn new(entity_type: impl Into<String>, key: EntityKey, version: Option<u32>) -> Self {
        Self {
            entity_type: entity_type.into(),
            key,
            version,
        }
    }

    /// Returns whether the referenced entity has no persisted identity yet.
    pub fn is_new(&self) -> bool {
        self.version.is_none()
    }
}

impl PartialEq for EntityRef {
    fn eq(&self, other: &Self) -> bool {
        self.entity_type == other.entity_type && self.key == other.key
    }
}

impl Eq for EntityRef {}

impl Hash for EntityRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.entity_type.hash(state);
        self.key.hash(state);
    }
}

impl PartialOrd for EntityRef {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EntityRef {
    fn cmp(&self, other: &Self) -> Ordering {
        self.entity_type
            .cmp(&other.entity_type)
            .then_with(|| self.key.cmp(&other.key))
    }
}

impl Display for EntityRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.entity_type, self.key)
    }
}

/// Attribute value held by an entity snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Null,
    Text(String),
    Integer(i64),
    Boolean(bool),
    /// Plain association or single-valued composition.
    Reference(Box<Entity>),
    /// Collection owned by the enclosing entity.
    Composition(Vec<Entity>),
}

impl Value {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

/// Handle of a live change-notification subscription attached to a snapshot.
///
/// Containers subscribe to the items they hold; the handle has no meaning
/// outside the tree that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub u64);

/// In-memory snapshot of one entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub entity_type: String,
    pub key: EntityKey,
    pub version: Option<u32>,
    pub attributes: BTreeMap<String, Value>,
    #[serde(skip)]
    pub subscriptions: BTreeSet<SubscriptionId>,
}

impl Entity {
    /// Creates a new, never persisted entity with a generated key.
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self::with_key(entity_type, Uuid::new_v4(), None)
    }

    /// Creates an entity with a caller-provided identity.
    pub fn with_key(entity_type: impl Into<String>, key: EntityKey, version: Option<u32>) -> Self {
        Self {
            entity_type: entity_type.into(),
            key,
            version,
            attributes: BTreeMap::new(),
            subscriptions: BTreeSet::new(),
        }
    }

    /// Builder-style attribute assignment used by fixtures and init hooks.
    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    pub fn reference(&self) -> EntityRef {
        EntityRef::new(self.entity_type.clone(), self.key, self.version)
    }

    pub fn is_new(&self) -> bool {
        self.version.is_none()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.attributes.insert(name.into(), value);
    }

    /// Returns whether the fetch plan that produced this snapshot loaded `name`.
    pub fn is_loaded(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    pub fn composition(&self, name: &str) -> Option<&[Entity]> {
        match self.attributes.get(name) {
            Some(Value::Composition(rows)) => Some(rows.as_slice()),
            _ => None,
        }
    }

    pub fn composition_mut(&mut self, name: &str) -> Option<&mut Vec<Entity>> {
        match self.attributes.get_mut(name) {
            Some(Value::Composition(rows)) => Some(rows),
            _ => None,
        }
    }

    /// Collects never-persisted entities directly referenced by this snapshot.
    ///
    /// Composition members are not included: they are owned by nested
    /// containers and tracked there.
    pub fn new_references(&self) -> Vec<Entity> {
        self.attributes
            .values()
            .filter_map(|value| match value {
                Value::Reference(target) if target.is_new() => Some(target.as_ref().clone()),
                _ => None,
            })
            .collect()
    }

    /// Copies identity and attributes onto an instance of `entity_type`.
    ///
    /// Used when the stored class is an extension or base of the class a
    /// container declares.
    pub fn copy_as(&self, entity_type: &str) -> Entity {
        let mut copy = Entity::with_key(entity_type, self.key, self.version);
        copy.attributes = self.attributes.clone();
        copy
    }

    pub fn subscribe(&mut self, subscription: SubscriptionId) {
        self.subscriptions.insert(subscription);
    }

    pub fn unsubscribe(&mut self, subscription: SubscriptionId) {
        self.subscriptions.remove(&subscription);
    }

    /// Removes every subscription from this snapshot and all owned values.
    pub fn strip_subscriptions(&mut self) {
        self.subscriptions.clear();
        for value in self.attributes.values_mut() {
            match value {
                Value::Reference(target) => target.strip_subscriptions(),
                Value::Composition(rows) => rows.iter_mut().for_each(Entity::strip_subscriptions),
                _ => {}
            }
        }
    }

    /// Returns whether any subscription remains on this snapshot or its owned values.
    pub fn has_subscriptions(&self) -> bool {
        !self.subscriptions.is_empty()
            || self.attributes.values().any(|value| match value {
                Value::Reference(target) => target.has_subscriptions(),
                Value::Composition(rows) => rows.iter().any(Entity::has_subscriptions),
                _ => false,
            })
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.entity_type == other.entity_type && self.key == other.key
    }
}

impl Eq for Entity {}

#[cfg(test)]
mod tests {
    use super::{Entity, EntityRef, SubscriptionId, Value};
    use uuid::Uuid;

    #[test]
    fn equality_ignores_version_and_values() {
        let key = Uuid::new_v4();
        let a = Entity::with_key("Order", key, Some(1)).with("number", Value::text("A-1"));
        let b = Entity::with_key("Order", key, Some(7)).with("number", Value::text("B-2"));
        assert_eq!(a, b);
        assert_eq!(a.reference(), b.reference());

        let other_type = Entity::with_key("Invoice", key, Some(1));
        assert_ne!(a, other_type);
    }

    #[test]
    fn null_attribute_is_loaded_but_missing_is_not() {
        let entity = Entity::new("Order").with("customer", Value::Null);
        assert!(entity.is_loaded("customer"));
        assert!(!entity.is_loaded("lines"));
    }

    #[test]
    fn new_references_only_reports_unsaved_targets() {
        let saved = Entity::with_key("Customer", Uuid::new_v4(), Some(3));
        let fresh = Entity::new("Address");
        let order = Entity::new("Order")
            .with("customer", Value::Reference(Box::new(saved)))
            .with("address", Value::Reference(Box::new(fresh.clone())));

        let refs = order.new_references();
        assert_eq!(refs, vec![fresh]);
    }

    #[test]
    fn strip_subscriptions_is_recursive() {
        let mut line = Entity::new("OrderLine");
        line.subscribe(SubscriptionId(2));
        let mut order = Entity::new("Order").with("lines", Value::Composition(vec![line]));
        order.subscribe(SubscriptionId(1));
        assert!(order.has_subscriptions());

        order.strip_subscriptions();
        assert!(!order.has_subscriptions());
    }

    #[test]
    fn entity_ref_display_is_type_and_key() {
        let key = Uuid::nil();
        let reference = EntityRef::new("Order", key, None);
        assert_eq!(
            reference.to_string(),
            "Order-00000000-0000-0000-0000-000000000000"
        );
        assert!(reference.is_new());
    }
}
