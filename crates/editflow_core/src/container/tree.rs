//! Container forest with pending-change tracking.
//!
//! # Responsibility
//! - Own every container of one screen in an arena addressed by
//!   `ContainerId`.
//! - Record create/update/delete intent and the `modified` flag, and
//!   propagate modification from nested children to their parents.
//! - Keep nested rows and the parent's composition value in sync.
//! - Subtract user-deleted composition rows from a reloaded parent item.
//!
//! # Invariants
//! - While a container's child tracking is suspended, descendants never
//!   set `modified`; their freshly created rows are registered as extra
//!   commit instances instead.
//! - A suspension always ends when its guard is dropped, including early
//!   returns through `?`.
//! - The tree is private to one screen and is never shared across sessions.

use super::{ContainerError, ContainerId, ContainerKind, ContainerSpec};
use crate::commit::FoldedCommit;
use crate::model::entity::{Entity, EntityKey, EntityRef, SubscriptionId, Value};
use crate::model::metadata::{MetaClass, Metadata};
use log::debug;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::ops::{Deref, DerefMut};

/// Resolved nesting of a container under its parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentLink {
    pub container: ContainerId,
    pub property: String,
}

/// One data container.
#[derive(Debug, Clone)]
pub struct Container {
    id: ContainerId,
    name: String,
    entity_type: String,
    kind: ContainerKind,
    fetch_plan: Option<String>,
    parent: Option<ParentLink>,
    item: Option<Entity>,
    rows: Vec<Entity>,
    selected: Option<EntityKey>,
    to_create: BTreeSet<EntityRef>,
    to_update: BTreeSet<EntityRef>,
    to_delete: BTreeSet<EntityRef>,
    modified: bool,
    suspended: u32,
}

impl Container {
    fn from_spec(id: ContainerId, spec: ContainerSpec) -> Self {
        Self {
            id,
            name: spec.name,
            entity_type: spec.entity_type,
            kind: spec.kind,
            fetch_plan: spec.fetch_plan,
            parent: None,
            item: None,
            rows: Vec::new(),
            selected: None,
            to_create: BTreeSet::new(),
            to_update: BTreeSet::new(),
            to_delete: BTreeSet::new(),
            modified: false,
            suspended: 0,
        }
    }

    pub fn id(&self) -> ContainerId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn kind(&self) -> ContainerKind {
        self.kind
    }

    pub fn fetch_plan(&self) -> Option<&str> {
        self.fetch_plan.as_deref()
    }

    pub fn parent(&self) -> Option<&ParentLink> {
        self.parent.as_ref()
    }

    /// Nested containers fold their commit into the parent's.
    pub fn is_nested(&self) -> bool {
        self.parent.is_some()
    }

    /// Current entity: the item, or the selected row of a collection.
    pub fn current(&self) -> Option<&Entity> {
        match self.kind {
            ContainerKind::Item => self.item.as_ref(),
            ContainerKind::Collection => {
                let selected = self.selected?;
                self.rows.iter().find(|row| row.key == selected)
            }
        }
    }

    fn current_mut(&mut self) -> Option<&mut Entity> {
        match self.kind {
            ContainerKind::Item => self.item.as_mut(),
            ContainerKind::Collection => {
                let selected = self.selected?;
                self.rows.iter_mut().find(|row| row.key == selected)
            }
        }
    }

    pub fn rows(&self) -> &[Entity] {
        &self.rows
    }

    pub fn selected(&self) -> Option<EntityKey> {
        self.selected
    }

    pub fn to_create(&self) -> &BTreeSet<EntityRef> {
        &self.to_create
    }

    pub fn to_update(&self) -> &BTreeSet<EntityRef> {
        &self.to_update
    }

    pub fn to_delete(&self) -> &BTreeSet<EntityRef> {
        &self.to_delete
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn has_pending(&self) -> bool {
        !(self.to_create.is_empty() && self.to_update.is_empty() && self.to_delete.is_empty())
    }

    /// Finds a held snapshot by identity.
    pub fn find(&self, reference: &EntityRef) -> Option<&Entity> {
        self.item
            .iter()
            .chain(self.rows.iter())
            .find(|entity| &entity.reference() == reference)
    }

    fn find_mut(&mut self, reference: &EntityRef) -> Option<&mut Entity> {
        self.item
            .iter_mut()
            .chain(self.rows.iter_mut())
            .find(|entity| &entity.reference() == reference)
    }

    fn subscription(&self) -> SubscriptionId {
        SubscriptionId(self.id.0 as u64)
    }

    fn clear_pending(&mut self) {
        self.to_create.clear();
        self.to_update.clear();
        self.to_delete.clear();
        self.modified = false;
    }
}

/// Snapshot of a parent container handed to a nested editor on open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentContainerView {
    pub container: ContainerId,
    pub entity_type: String,
    pub pending_create: BTreeSet<EntityRef>,
    pub pending_update: BTreeSet<EntityRef>,
    pub rows: BTreeSet<EntityRef>,
}

impl ParentContainerView {
    /// Returns whether the parent already carries unsaved state for `reference`.
    pub fn has_pending(&self, reference: &EntityRef) -> bool {
        self.pending_create.contains(reference) || self.pending_update.contains(reference)
    }

    pub fn is_pending_create(&self, reference: &EntityRef) -> bool {
        self.pending_create.contains(reference)
    }
}

/// Guard returned by [`ContainerTree::suspend_child_tracking`].
///
/// Dereferences to the tree so the suspended scope can keep editing it.
pub struct TrackingSuspension<'a> {
    tree: &'a mut ContainerTree,
    container: ContainerId,
}

impl Deref for TrackingSuspension<'_> {
    type Target = ContainerTree;

    fn deref(&self) -> &Self::Target {
        &*self.tree
    }
}

impl DerefMut for TrackingSuspension<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.tree
    }
}

impl Drop for TrackingSuspension<'_> {
    fn drop(&mut self) {
        if let Some(container) = self.tree.containers.get_mut(self.container.0) {
            container.suspended = container.suspended.saturating_sub(1);
        }
        debug!(
            "event=child_tracking module=container status=resumed container={}",
            self.container
        );
    }
}

type DeletedIndex = BTreeMap<(String, String), BTreeSet<EntityRef>>;

/// Acyclic forest of containers owned by one screen.
#[derive(Debug, Clone, Default)]
pub struct ContainerTree {
    containers: Vec<Container>,
    by_name: BTreeMap<String, ContainerId>,
    commit_instances: BTreeMap<EntityRef, Entity>,
    removals: BTreeSet<EntityRef>,
}

impl ContainerTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a tree from declarations; parents must be declared first.
    pub fn from_specs(specs: &[ContainerSpec]) -> Result<Self, ContainerError> {
        let mut tree = Self::new();
        for spec in specs {
            tree.add_container(spec.clone())?;
        }
        Ok(tree)
    }

    pub fn add_container(&mut self, spec: ContainerSpec) -> Result<ContainerId, ContainerError> {
        if self.by_name.contains_key(&spec.name) {
            return Err(ContainerError::DuplicateName(spec.name));
        }
        let parent = match &spec.nested {
            Some(link) => Some((self.require(&link.parent)?, link.property.clone())),
            None => None,
        };

        let id = ContainerId(self.containers.len());
        self.by_name.insert(spec.name.clone(), id);
        self.containers.push(Container::from_spec(id, spec));
        if let Some((parent, property)) = parent {
            self.attach_parent(id, parent, property)?;
        }
        Ok(id)
    }

    /// Nests `child` under `parent`'s composition `property`.
    pub fn attach_parent(
        &mut self,
        child: ContainerId,
        parent: ContainerId,
        property: impl Into<String>,
    ) -> Result<(), ContainerError> {
        self.slot(parent)?;
        if self.slot(child)?.parent.is_some() {
            return Err(ContainerError::ParentAlreadySet(child));
        }
        if child == parent || self.ancestors(parent).contains(&child) {
            return Err(ContainerError::CycleDetected { child, parent });
        }
        self.slot_mut(child)?.parent = Some(ParentLink {
            container: parent,
            property: property.into(),
        });
        Ok(())
    }

    pub fn id_of(&self, name: &str) -> Option<ContainerId> {
        self.by_name.get(name).copied()
    }

    pub fn require(&self, name: &str) -> Result<ContainerId, ContainerError> {
        self.id_of(name)
            .ok_or_else(|| ContainerError::UnknownContainer(name.to_string()))
    }

    pub fn container(&self, id: ContainerId) -> Option<&Container> {
        self.containers.get(id.0)
    }

    pub fn containers(&self) -> impl Iterator<Item = &Container> {
        self.containers.iter()
    }

    pub fn current(&self, id: ContainerId) -> Option<&Entity> {
        self.container(id).and_then(Container::current)
    }

    /// Strict ancestors of `id`, nearest first.
    pub fn ancestors(&self, id: ContainerId) -> Vec<ContainerId> {
        let mut ancestors = Vec::new();
        let mut cursor = self.parent_of(id);
        while let Some(current) = cursor {
            ancestors.push(current);
            cursor = self.parent_of(current);
        }
        ancestors
    }

    pub fn children(&self, id: ContainerId) -> Vec<ContainerId> {
        self.containers
            .iter()
            .filter(|container| {
                container
                    .parent
                    .as_ref()
                    .is_some_and(|link| link.container == id)
            })
            .map(Container::id)
            .collect()
    }

    /// All containers reachable below `id` through parent links, breadth first.
    pub fn descendants(&self, id: ContainerId) -> Vec<ContainerId> {
        let mut out = Vec::new();
        let mut queue = VecDeque::from([id]);
        while let Some(current) = queue.pop_front() {
            for child in self.children(current) {
                out.push(child);
                queue.push_back(child);
            }
        }
        out
    }

    pub fn is_modified(&self, id: ContainerId) -> bool {
        self.container(id).is_some_and(Container::is_modified)
    }

    /// Returns whether `id` or any descendant is modified.
    pub fn any_modified(&self, id: ContainerId) -> bool {
        self.is_modified(id)
            || self
                .descendants(id)
                .into_iter()
                .any(|child| self.is_modified(child))
    }

    pub fn is_tracking_suspended(&self, id: ContainerId) -> bool {
        self.container(id).is_some_and(|c| c.suspended > 0)
    }

    /// Places `item` as the current entity of an item container.
    ///
    /// A new entity is registered in `to_create` and marks the container
    /// modified. Nested children reload their rows from the item.
    pub fn set_item(&mut self, id: ContainerId, item: Option<Entity>) -> Result<(), ContainerError> {
        let container = self.slot_mut(id)?;
        if container.kind != ContainerKind::Item {
            return Err(ContainerError::KindMismatch {
                container: id,
                expected: ContainerKind::Item,
            });
        }

        let subscription = container.subscription();
        let mut created = false;
        container.item = match item {
            Some(mut entity) => {
                entity.subscribe(subscription);
                if entity.is_new() {
                    created = container.to_create.insert(entity.reference());
                }
                Some(entity)
            }
            None => None,
        };

        if created {
            self.mark_modified(id);
        }
        self.refresh_nested(id)
    }

    /// Replaces the rows of a collection container without recording changes.
    pub fn set_rows(&mut self, id: ContainerId, rows: Vec<Entity>) -> Result<(), ContainerError> {
        let container = self.collection_mut(id)?;
        let subscription = container.subscription();
        container.rows = rows
            .into_iter()
            .map(|mut row| {
                row.subscribe(subscription);
                row
            })
            .collect();
        if let Some(selected) = container.selected {
            if !container.rows.iter().any(|row| row.key == selected) {
                container.selected = None;
            }
        }
        self.refresh_nested(id)
    }

    pub fn select(&mut self, id: ContainerId, key: Option<EntityKey>) -> Result<(), ContainerError> {
        let container = self.collection_mut(id)?;
        if let Some(key) = key {
            if !container.rows.iter().any(|row| row.key == key) {
                return Err(ContainerError::ItemNotFound {
                    container: id,
                    reference: EntityRef::new(container.entity_type.clone(), key, None),
                });
            }
        }
        container.selected = key;
        self.refresh_nested(id)
    }

    /// Adds a row to a collection container and records the change.
    pub fn add_item(&mut self, id: ContainerId, mut entity: Entity) -> Result<(), ContainerError> {
        let container = self.collection_mut(id)?;
        let reference = entity.reference();
        entity.subscribe(container.subscription());
        match container
            .rows
            .iter()
            .position(|row| row.reference() == reference)
        {
            Some(index) => container.rows[index] = entity,
            None => container.rows.push(entity),
        }

        if container.to_delete.remove(&reference) {
            if !reference.is_new() {
                container.to_update.insert(reference.clone());
            }
        } else if reference.is_new() {
            container.to_create.insert(reference.clone());
        } else {
            container.to_update.insert(reference.clone());
        }
        self.removals.remove(&reference);

        self.mark_modified(id);
        self.write_through(id)
    }

    /// Replaces a held snapshot with an edited copy and records the update.
    pub fn modify_item(&mut self, id: ContainerId, entity: Entity) -> Result<(), ContainerError> {
        let container = self.slot_mut(id)?;
        let reference = entity.reference();
        let Some(target) = container.find_mut(&reference) else {
            return Err(ContainerError::ItemNotFound {
                container: id,
                reference,
            });
        };
        adopt(target, entity);
        if !container.to_create.contains(&reference) {
            container.to_update.insert(reference.clone());
        }
        if let Some(pending) = self.commit_instances.get_mut(&reference) {
            if let Some(current) = self.containers.get(id.0).and_then(|c| c.find(&reference)) {
                *pending = current.clone();
                pending.strip_subscriptions();
            }
        }

        self.mark_modified(id);
        self.write_through(id)
    }

    /// Sets one attribute on the current entity of `id`.
    pub fn set_attribute(
        &mut self,
        id: ContainerId,
        name: &str,
        value: Value,
    ) -> Result<(), ContainerError> {
        let mut edited = self
            .current(id)
            .cloned()
            .ok_or(ContainerError::NoCurrentItem(id))?;
        edited.set(name, value);
        self.modify_item(id, edited)
    }

    /// Removes a held entity. Removing a pending creation cancels it instead
    /// of scheduling a delete.
    pub fn remove_item(&mut self, id: ContainerId, reference: &EntityRef) -> Result<(), ContainerError> {
        let container = self.slot_mut(id)?;
        let removed = match container.kind {
            ContainerKind::Item => {
                if container.item.as_ref().map(Entity::reference).as_ref() == Some(reference) {
                    container.item.take()
                } else {
                    None
                }
            }
            ContainerKind::Collection => container
                .rows
                .iter()
                .position(|row| &row.reference() == reference)
                .map(|index| container.rows.remove(index)),
        };
        if removed.is_none() {
            return Err(ContainerError::ItemNotFound {
                container: id,
                reference: reference.clone(),
            });
        }

        if !container.to_create.remove(reference) {
            container.to_update.remove(reference);
            container.to_delete.insert(reference.clone());
        }
        if container.selected == Some(reference.key) {
            container.selected = None;
        }
        self.commit_instances.remove(reference);

        self.mark_modified(id);
        self.write_through(id)?;
        self.refresh_nested(id)
    }

    /// Reflects persisted state in a collection without recording a change.
    ///
    /// Replacing the selected row reloads nested children from it.
    pub fn upsert_row(&mut self, id: ContainerId, entity: Entity) -> Result<(), ContainerError> {
        let container = self.collection_mut(id)?;
        let reference = entity.reference();
        let selected = container.selected == Some(reference.key);
        match container.find_mut(&reference) {
            Some(row) => adopt(row, entity),
            None => {
                let mut row = entity;
                row.subscribe(container.subscription());
                container.rows.push(row);
            }
        }
        if selected {
            self.refresh_nested(id)?;
        }
        Ok(())
    }

    /// Drops a row from a collection without recording a change.
    pub fn remove_row(&mut self, id: ContainerId, reference: &EntityRef) -> Result<(), ContainerError> {
        let container = self.collection_mut(id)?;
        container.rows.retain(|row| &row.reference() != reference);
        if container.selected == Some(reference.key) {
            container.selected = None;
        }
        self.refresh_nested(id)
    }

    /// Drops pending sets and `modified` of `id` and all its descendants.
    pub fn discard(&mut self, id: ContainerId) -> Result<(), ContainerError> {
        self.slot_mut(id)?.clear_pending();
        for child in self.descendants(id) {
            self.slot_mut(child)?.clear_pending();
        }
        Ok(())
    }

    /// Clears pending state of every container plus extra commit instances.
    pub fn clear_all_pending(&mut self) {
        self.containers.iter_mut().for_each(Container::clear_pending);
        self.commit_instances.clear();
        self.removals.clear();
    }

    /// Suspends modification signals from descendants of `id` until the
    /// returned guard is dropped.
    pub fn suspend_child_tracking(
        &mut self,
        id: ContainerId,
    ) -> Result<TrackingSuspension<'_>, ContainerError> {
        self.slot_mut(id)?.suspended += 1;
        debug!("event=child_tracking module=container status=suspended container={id}");
        Ok(TrackingSuspension {
            tree: self,
            container: id,
        })
    }

    /// Registers an entity that must be saved with the next commit regardless
    /// of container `modified` flags.
    pub fn register_commit_instance(&mut self, mut entity: Entity) {
        entity.strip_subscriptions();
        self.commit_instances.insert(entity.reference(), entity);
    }

    /// Registers a removal that must be saved with the next commit.
    pub fn register_removal(&mut self, reference: EntityRef) {
        self.commit_instances.remove(&reference);
        self.removals.insert(reference);
    }

    pub fn commit_instances(&self) -> impl Iterator<Item = &Entity> {
        self.commit_instances.values()
    }

    pub fn removals(&self) -> &BTreeSet<EntityRef> {
        &self.removals
    }

    /// Subtracts rows the user deleted in nested containers from the
    /// composition values of the current item of `id`.
    ///
    /// Walks composition properties transitively. The first composition
    /// property that is not loaded ends the whole scan; removals applied
    /// before that point are kept. Returns the number of rows removed.
    pub fn reconcile_deleted_compositions(
        &mut self,
        id: ContainerId,
        metadata: &Metadata,
    ) -> Result<usize, ContainerError> {
        let mut deleted = DeletedIndex::new();
        for child in self.descendants(id) {
            let container = self.slot(child)?;
            let Some(link) = container.parent.as_ref() else {
                continue;
            };
            if container.to_delete.is_empty() {
                continue;
            }
            let owner = self.slot(link.container)?.entity_type.clone();
            deleted
                .entry((owner, link.property.clone()))
                .or_default()
                .extend(container.to_delete.iter().cloned());
        }
        if deleted.is_empty() {
            return Ok(0);
        }

        let container = self.slot_mut(id)?;
        let Some(item) = container.current_mut() else {
            return Ok(0);
        };
        let Some(class) = metadata.class(&item.entity_type) else {
            return Ok(0);
        };

        let mut removed = 0;
        let completed = strip_deleted(item, class, metadata, &deleted, &mut removed);
        debug!(
            "event=reconcile_deleted module=container status={} container={id} removed={removed}",
            if completed { "ok" } else { "aborted_not_loaded" }
        );

        self.refresh_nested(id)?;
        Ok(removed)
    }

    /// Captures the pending state a nested editor needs from its parent.
    pub fn parent_view(&self, id: ContainerId) -> Result<ParentContainerView, ContainerError> {
        let container = self.slot(id)?;
        Ok(ParentContainerView {
            container: id,
            entity_type: container.entity_type.clone(),
            pending_create: container.to_create.clone(),
            pending_update: container.to_update.clone(),
            rows: container
                .item
                .iter()
                .chain(container.rows.iter())
                .map(Entity::reference)
                .collect(),
        })
    }

    /// Takes over the result of a nested editor's commit.
    ///
    /// The edited item lands in `id` as a create or an update; everything
    /// else the nested editor would have saved is carried as extra commit
    /// instances so the next commit of this tree persists the whole graph.
    pub fn absorb_folded(&mut self, id: ContainerId, folded: FoldedCommit) -> Result<(), ContainerError> {
        let FoldedCommit {
            item,
            commit_instances,
            remove_instances,
            ..
        } = folded;
        let reference = item.reference();
        let container = self.slot(id)?;
        let held = container.find(&reference).is_some();
        match (container.kind, held) {
            (_, true) => self.modify_item(id, item)?,
            (ContainerKind::Collection, false) => self.add_item(id, item)?,
            (ContainerKind::Item, false) => {
                self.set_item(id, Some(item.clone()))?;
                if !reference.is_new() {
                    self.modify_item(id, item)?;
                }
            }
        }

        for entity in commit_instances {
            if entity.reference() != reference {
                self.register_commit_instance(entity);
            }
        }
        for removal in remove_instances {
            self.register_removal(removal);
        }
        debug!("event=absorb_folded module=container status=ok container={id} item={reference}");
        Ok(())
    }

    /// Adopts committed snapshots into `scope` and clears its pending state.
    pub(crate) fn apply_committed(&mut self, scope: &[ContainerId], committed: &[Entity]) {
        for id in scope {
            let Some(container) = self.containers.get_mut(id.0) else {
                continue;
            };
            for fresh in committed {
                if let Some(target) = container.find_mut(&fresh.reference()) {
                    adopt(target, fresh.clone());
                }
            }
            container.clear_pending();
        }
        self.commit_instances.clear();
        self.removals.clear();
    }

    fn parent_of(&self, id: ContainerId) -> Option<ContainerId> {
        self.containers
            .get(id.0)
            .and_then(|container| container.parent.as_ref())
            .map(|link| link.container)
    }

    fn slot(&self, id: ContainerId) -> Result<&Container, ContainerError> {
        self.containers.get(id.0).ok_or(ContainerError::UnknownId(id))
    }

    fn slot_mut(&mut self, id: ContainerId) -> Result<&mut Container, ContainerError> {
        self.containers
            .get_mut(id.0)
            .ok_or(ContainerError::UnknownId(id))
    }

    fn collection_mut(&mut self, id: ContainerId) -> Result<&mut Container, ContainerError> {
        let container = self.slot_mut(id)?;
        if container.kind != ContainerKind::Collection {
            return Err(ContainerError::KindMismatch {
                container: id,
                expected: ContainerKind::Collection,
            });
        }
        Ok(container)
    }

    fn mark_modified(&mut self, id: ContainerId) {
        let ancestors = self.ancestors(id);
        let muted = ancestors
            .iter()
            .any(|ancestor| self.is_tracking_suspended(*ancestor));
        if muted {
            self.register_pending_creates(id);
            debug!("event=container_modified module=container status=muted container={id}");
            return;
        }

        for target in std::iter::once(id).chain(ancestors) {
            if let Some(container) = self.containers.get_mut(target.0) {
                container.modified = true;
            }
        }
    }

    fn register_pending_creates(&mut self, id: ContainerId) {
        let Some(container) = self.containers.get(id.0) else {
            return;
        };
        let created: Vec<Entity> = container
            .to_create
            .iter()
            .filter_map(|reference| container.find(reference))
            .cloned()
            .collect();
        for entity in created {
            self.register_commit_instance(entity);
        }
    }

    /// Reloads nested children of `id` from its current entity.
    fn refresh_nested(&mut self, id: ContainerId) -> Result<(), ContainerError> {
        for child in self.children(id) {
            let Some(property) = self
                .slot(child)?
                .parent
                .as_ref()
                .map(|link| link.property.clone())
            else {
                continue;
            };
            let value = self
                .current(id)
                .and_then(|entity| entity.get(&property))
                .cloned();
            self.load_nested(child, value)?;
        }
        Ok(())
    }

    fn load_nested(&mut self, child: ContainerId, value: Option<Value>) -> Result<(), ContainerError> {
        let container = self.slot_mut(child)?;
        let subscription = container.subscription();
        let incoming = match value {
            Some(Value::Composition(rows)) => rows,
            Some(Value::Reference(entity)) => vec![*entity],
            _ => Vec::new(),
        };

        let mut fresh = false;
        match container.kind {
            ContainerKind::Collection => {
                container.rows = incoming
                    .into_iter()
                    .map(|mut row| {
                        row.subscribe(subscription);
                        row
                    })
                    .collect();
                if let Some(selected) = container.selected {
                    if !container.rows.iter().any(|row| row.key == selected) {
                        container.selected = None;
                    }
                }
            }
            ContainerKind::Item => {
                container.item = incoming.into_iter().next().map(|mut entity| {
                    entity.subscribe(subscription);
                    entity
                });
            }
        }
        for entity in container.item.iter().chain(container.rows.iter()) {
            if entity.is_new() && container.to_create.insert(entity.reference()) {
                fresh = true;
            }
        }

        if fresh {
            self.mark_modified(child);
        }
        self.refresh_nested(child)
    }

    /// Writes the rows of a nested container back into its parent's current
    /// entity, records that entity as updated, then continues upwards.
    fn write_through(&mut self, child: ContainerId) -> Result<(), ContainerError> {
        let container = self.slot(child)?;
        let Some(link) = container.parent.clone() else {
            return Ok(());
        };
        let value = match container.kind {
            ContainerKind::Collection => Value::Composition(
                container
                    .rows
                    .iter()
                    .cloned()
                    .map(|mut row| {
                        row.strip_subscriptions();
                        row
                    })
                    .collect(),
            ),
            ContainerKind::Item => match container.item.clone() {
                Some(mut entity) => {
                    entity.strip_subscriptions();
                    Value::Reference(Box::new(entity))
                }
                None => Value::Null,
            },
        };

        let parent = self.slot_mut(link.container)?;
        if let Some(owner) = parent.current_mut() {
            owner.set(link.property.clone(), value);
            let owner = owner.reference();
            if !parent.to_create.contains(&owner) {
                parent.to_update.insert(owner);
            }
        }
        self.write_through(link.container)
    }
}

/// Replaces `target` with `fresh` while keeping live subscriptions.
fn adopt(target: &mut Entity, fresh: Entity) {
    let subscriptions = std::mem::take(&mut target.subscriptions);
    *target = fresh;
    target.subscriptions.extend(subscriptions);
}

fn strip_deleted(
    entity: &mut Entity,
    class: &MetaClass,
    metadata: &Metadata,
    deleted: &DeletedIndex,
    removed: &mut usize,
) -> bool {
    for property in class.compositions() {
        if !entity.is_loaded(&property.name) {
            return false;
        }
        let Some(rows) = entity.composition_mut(&property.name) else {
            continue;
        };
        if let Some(gone) = deleted.get(&(class.name.clone(), property.name.clone())) {
            let before = rows.len();
            rows.retain(|row| !gone.contains(&row.reference()));
            *removed += before - rows.len();
        }
        if let Some(target) = property
            .target
            .as_deref()
            .and_then(|name| metadata.class(name))
        {
            for row in rows.iter_mut() {
                if !strip_deleted(row, target, metadata, deleted, removed) {
                    return false;
                }
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::ContainerTree;
    use crate::container::{ContainerError, ContainerSpec};
    use crate::model::entity::{Entity, Value};
    use crate::model::metadata::{MetaClass, Metadata};
    use uuid::Uuid;

    fn order_tree() -> ContainerTree {
        ContainerTree::from_specs(&[
            ContainerSpec::item("order", "Order"),
            ContainerSpec::collection("lines", "OrderLine").nested_in("order", "lines"),
        ])
        .expect("valid specs")
    }

    fn persisted(entity_type: &str) -> Entity {
        Entity::with_key(entity_type, Uuid::new_v4(), Some(1))
    }

    #[test]
    fn parent_link_is_set_once_and_never_cycles() {
        let mut tree = order_tree();
        let order = tree.require("order").expect("order");
        let lines = tree.require("lines").expect("lines");

        assert_eq!(
            tree.attach_parent(lines, order, "lines"),
            Err(ContainerError::ParentAlreadySet(lines))
        );
        assert_eq!(
            tree.attach_parent(order, lines, "x"),
            Err(ContainerError::CycleDetected {
                child: order,
                parent: lines
            })
        );
    }

    #[test]
    fn deleting_a_pending_create_cancels_it() {
        let mut tree = order_tree();
        let order = tree.require("order").expect("order");
        let lines = tree.require("lines").expect("lines");
        tree.set_item(order, Some(persisted("Order").with("lines", Value::Composition(vec![]))))
            .expect("set item");

        let line = Entity::new("OrderLine");
        tree.add_item(lines, line.clone()).expect("add");
        assert!(tree.container(lines).expect("lines").to_create().contains(&line.reference()));

        tree.remove_item(lines, &line.reference()).expect("remove");
        let container = tree.container(lines).expect("lines");
        assert!(container.to_create().is_empty());
        assert!(container.to_delete().is_empty());
    }

    #[test]
    fn child_changes_propagate_and_write_through() {
        let mut tree = order_tree();
        let order = tree.require("order").expect("order");
        let lines = tree.require("lines").expect("lines");
        let line = persisted("OrderLine");
        tree.set_item(
            order,
            Some(persisted("Order").with("lines", Value::Composition(vec![line.clone()]))),
        )
        .expect("set item");
        assert!(!tree.any_modified(order));

        tree.remove_item(lines, &line.reference()).expect("remove");
        assert!(tree.is_modified(lines));
        assert!(tree.is_modified(order));
        let composed = tree
            .current(order)
            .and_then(|item| item.composition("lines"))
            .expect("lines value");
        assert!(composed.is_empty());
    }

    #[test]
    fn suspended_parent_is_not_dirtied_by_child_side_effects() {
        let mut tree = order_tree();
        let order = tree.require("order").expect("order");
        let lines = tree.require("lines").expect("lines");
        let line = Entity::new("OrderLine");
        {
            let mut guard = tree.suspend_child_tracking(order).expect("suspend");
            guard
                .set_item(
                    order,
                    Some(persisted("Order").with("lines", Value::Composition(vec![line.clone()]))),
                )
                .expect("set item");
        }

        assert!(!tree.is_tracking_suspended(order));
        assert!(!tree.is_modified(order));
        assert!(!tree.is_modified(lines));
        let extras: Vec<_> = tree.commit_instances().cloned().collect();
        assert_eq!(extras, vec![line]);
    }

    #[test]
    fn upserting_the_selected_row_reloads_nested_rows() {
        let mut tree = ContainerTree::from_specs(&[
            ContainerSpec::collection("orders", "Order"),
            ContainerSpec::collection("lines", "OrderLine").nested_in("orders", "lines"),
        ])
        .expect("valid specs");
        let orders = tree.require("orders").expect("orders");
        let lines = tree.require("lines").expect("lines");
        let brief = persisted("Order");
        tree.set_rows(orders, vec![brief.clone()]).expect("rows");
        tree.select(orders, Some(brief.key)).expect("select");
        assert!(tree.container(lines).expect("lines").rows().is_empty());

        let full = brief.with(
            "lines",
            Value::Composition(vec![persisted("OrderLine"), persisted("OrderLine")]),
        );
        tree.upsert_row(orders, full).expect("upsert");
        assert_eq!(tree.container(lines).expect("lines").rows().len(), 2);
        assert!(!tree.any_modified(orders));
    }

    #[test]
    fn reconcile_removes_rows_deleted_in_children() {
        let mut metadata = Metadata::new();
        metadata.register(MetaClass::new("OrderLine")).expect("line");
        metadata
            .register(MetaClass::new("Order").composition("lines", "OrderLine"))
            .expect("order");

        let mut tree = order_tree();
        let order = tree.require("order").expect("order");
        let lines = tree.require("lines").expect("lines");
        let c1 = persisted("OrderLine");
        let c2 = persisted("OrderLine");
        let item = persisted("Order").with("lines", Value::Composition(vec![c1.clone(), c2.clone()]));
        tree.set_item(order, Some(item.clone())).expect("set");
        tree.remove_item(lines, &c1.reference()).expect("remove c1");

        tree.set_item(order, Some(item)).expect("reload");
        let removed = tree
            .reconcile_deleted_compositions(order, &metadata)
            .expect("reconcile");
        assert_eq!(removed, 1);
        let rows = tree.container(lines).expect("lines").rows().to_vec();
        assert_eq!(rows, vec![c2]);
    }

    #[test]
    fn reconcile_aborts_on_first_unloaded_composition() {
        let mut metadata = Metadata::new();
        metadata.register(MetaClass::new("OrderLine")).expect("line");
        metadata
            .register(
                MetaClass::new("Order")
                    .composition("notes", "OrderLine")
                    .composition("lines", "OrderLine"),
            )
            .expect("order");

        let mut tree = order_tree();
        let order = tree.require("order").expect("order");
        let lines = tree.require("lines").expect("lines");
        let c1 = persisted("OrderLine");
        let item = persisted("Order").with("lines", Value::Composition(vec![c1.clone()]));
        tree.set_item(order, Some(item.clone())).expect("set");
        tree.remove_item(lines, &c1.reference()).expect("remove");

        tree.set_item(order, Some(item)).expect("reload");
        let removed = tree
            .reconcile_deleted_compositions(order, &metadata)
            .expect("reconcile");
        assert_eq!(removed, 0);
        assert_eq!(tree.container(lines).expect("lines").rows().len(), 1);
    }
}
