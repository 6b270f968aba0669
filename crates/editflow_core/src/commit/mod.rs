//! Atomic commit of a container tree.
//!
//! # Responsibility
//! - Turn the pending sets of every modified container under a root into
//!   one `SaveRequest`, together with extra instances registered on the tree.
//! - Apply a successful result back to the tree, or fold the request into a
//!   parent editor's tree when the editor is nested.
//!
//! # Invariants
//! - A failing data service call leaves every container untouched.
//! - On success every container in scope has empty pending sets and
//!   `modified == false`.
//!
//! # See also
//! - crate::commit::data_service

use crate::container::{ContainerError, ContainerId, ContainerTree};
use crate::model::entity::{Entity, EntityRef};
use log::{error, info};
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;

pub mod data_service;

pub use data_service::{DataResult, DataService, DataServiceError, InMemoryDataService};

/// One unit of work for the persistence collaborator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SaveRequest {
    pub commit_instances: Vec<Entity>,
    pub remove_instances: Vec<EntityRef>,
    /// Fetch plan of the container each instance came from.
    pub fetch_plans: BTreeMap<EntityRef, String>,
}

impl SaveRequest {
    pub fn is_empty(&self) -> bool {
        self.commit_instances.is_empty() && self.remove_instances.is_empty()
    }

    pub fn contains(&self, reference: &EntityRef) -> bool {
        self.commit_instances
            .iter()
            .any(|entity| &entity.reference() == reference)
    }
}

/// Snapshots returned by the persistence collaborator after saving.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommitResult {
    pub committed: Vec<Entity>,
}

impl CommitResult {
    pub fn get(&self, reference: &EntityRef) -> Option<&Entity> {
        self.committed
            .iter()
            .find(|entity| &entity.reference() == reference)
    }
}

/// Instruction for the browse/list view that showed the edited item.
#[derive(Debug, Clone, PartialEq)]
pub enum ListUpdate {
    Insert(Entity),
    Replace(Entity),
}

impl ListUpdate {
    pub fn entity(&self) -> &Entity {
        match self {
            Self::Insert(entity) | Self::Replace(entity) => entity,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommitReport {
    pub committed: Vec<Entity>,
    /// Root item after the commit was applied.
    pub root_item: Option<Entity>,
    pub list_update: Option<ListUpdate>,
    /// False when nothing was pending and the data service was not called.
    pub persisted: bool,
}

/// Commit of a nested editor handed to its parent tree instead of the
/// data service.
#[derive(Debug, Clone, PartialEq)]
pub struct FoldedCommit {
    pub item: Entity,
    pub was_new: bool,
    pub commit_instances: Vec<Entity>,
    pub remove_instances: Vec<EntityRef>,
}

#[derive(Debug)]
pub enum CommitError {
    Container(ContainerError),
    Data(DataServiceError),
}

impl Display for CommitError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Container(err) => write!(f, "{err}"),
            Self::Data(err) => write!(f, "{err}"),
        }
    }
}

impl Error for CommitError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Container(err) => Some(err),
            Self::Data(err) => Some(err),
        }
    }
}

impl From<ContainerError> for CommitError {
    fn from(value: ContainerError) -> Self {
        Self::Container(value)
    }
}

impl From<DataServiceError> for CommitError {
    fn from(value: DataServiceError) -> Self {
        Self::Data(value)
    }
}

#[derive(Debug, Clone)]
pub struct CommitCoordinator {
    default_fetch_plan: String,
}

impl CommitCoordinator {
    pub fn new(default_fetch_plan: impl Into<String>) -> Self {
        Self {
            default_fetch_plan: default_fetch_plan.into(),
        }
    }

    /// Collects everything pending under `root` into one request.
    ///
    /// Unmodified containers contribute nothing; instances registered on the
    /// tree are always included.
    pub fn build_request(
        &self,
        tree: &ContainerTree,
        root: ContainerId,
    ) -> Result<SaveRequest, ContainerError> {
        let mut request = SaveRequest::default();
        let mut seen = BTreeSet::new();
        let mut removed = BTreeSet::new();

        for id in scope(tree, root) {
            let container = tree.container(id).ok_or(ContainerError::UnknownId(id))?;
            if !container.is_modified() {
                continue;
            }
            let plan = container
                .fetch_plan()
                .unwrap_or(self.default_fetch_plan.as_str())
                .to_string();
            for reference in container.to_create().iter().chain(container.to_update()) {
                let Some(entity) = container.find(reference) else {
                    continue;
                };
                if seen.insert(reference.clone()) {
                    let mut snapshot = entity.clone();
                    snapshot.strip_subscriptions();
                    request.fetch_plans.insert(reference.clone(), plan.clone());
                    request.commit_instances.push(snapshot);
                }
            }
            removed.extend(container.to_delete().iter().cloned());
        }

        for entity in tree.commit_instances() {
            if seen.insert(entity.reference()) {
                request.commit_instances.push(entity.clone());
            }
        }
        removed.extend(tree.removals().iter().cloned());
        request
            .commit_instances
            .retain(|entity| !removed.contains(&entity.reference()));
        request.remove_instances = removed.into_iter().collect();
        Ok(request)
    }

    /// Saves everything pending under `root` through `data`.
    pub fn commit(
        &self,
        tree: &mut ContainerTree,
        root: ContainerId,
        data: &dyn DataService,
    ) -> Result<CommitReport, CommitError> {
        let request = self.build_request(tree, root)?;
        let before = tree.current(root).cloned();
        if request.is_empty() {
            info!("event=commit module=commit status=skipped reason=nothing_pending");
            tree.discard(root)?;
            return Ok(CommitReport {
                committed: Vec::new(),
                root_item: before,
                list_update: None,
                persisted: false,
            });
        }

        let started_at = Instant::now();
        info!(
            "event=commit module=commit status=start instances={} removals={}",
            request.commit_instances.len(),
            request.remove_instances.len()
        );
        let result = data.commit(&request).map_err(|err| {
            error!(
                "event=commit module=commit status=error duration_ms={} error={err}",
                started_at.elapsed().as_millis()
            );
            err
        })?;

        let touched = scope(tree, root);
        tree.apply_committed(&touched, &result.committed);
        let root_item = tree.current(root).cloned();
        let list_update = before.as_ref().and_then(|item| {
            let saved = result.get(&item.reference())?.clone();
            Some(if item.is_new() {
                ListUpdate::Insert(saved)
            } else {
                ListUpdate::Replace(saved)
            })
        });
        info!(
            "event=commit module=commit status=ok duration_ms={} committed={}",
            started_at.elapsed().as_millis(),
            result.committed.len()
        );

        Ok(CommitReport {
            committed: result.committed,
            root_item,
            list_update,
            persisted: true,
        })
    }

    /// Packs everything pending under `root` for the parent editor and
    /// clears the local pending state.
    pub fn fold(&self, tree: &mut ContainerTree, root: ContainerId) -> Result<FoldedCommit, CommitError> {
        let request = self.build_request(tree, root)?;
        let mut item = tree
            .current(root)
            .cloned()
            .ok_or(ContainerError::NoCurrentItem(root))?;
        item.strip_subscriptions();

        let touched = scope(tree, root);
        tree.apply_committed(&touched, &[]);
        info!(
            "event=commit module=commit status=folded item={} instances={}",
            item.reference(),
            request.commit_instances.len()
        );
        Ok(FoldedCommit {
            was_new: item.is_new(),
            item,
            commit_instances: request.commit_instances,
            remove_instances: request.remove_instances,
        })
    }
}

impl Default for CommitCoordinator {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_FETCH_PLAN)
    }
}

fn scope(tree: &ContainerTree, root: ContainerId) -> Vec<ContainerId> {
    std::iter::once(root).chain(tree.descendants(root)).collect()
}

#[cfg(test)]
mod tests {
    use super::{CommitCoordinator, ListUpdate};
    use crate::commit::data_service::{DataService, InMemoryDataService};
    use crate::container::{ContainerSpec, ContainerTree};
    use crate::model::entity::{Entity, Value};

    fn tree() -> ContainerTree {
        ContainerTree::from_specs(&[
            ContainerSpec::item("order", "Order"),
            ContainerSpec::collection("lines", "OrderLine").nested_in("order", "lines"),
        ])
        .expect("specs")
    }

    #[test]
    fn unmodified_containers_are_left_out() {
        let service = InMemoryDataService::new();
        let order = service
            .seed(Entity::new("Order").with("lines", Value::Composition(vec![])))
            .expect("seed");
        let mut tree = tree();
        let root = tree.require("order").expect("order");
        tree.set_item(root, Some(order)).expect("set");

        let coordinator = CommitCoordinator::default();
        assert!(coordinator.build_request(&tree, root).expect("request").is_empty());

        let report = coordinator.commit(&mut tree, root, &service).expect("commit");
        assert!(!report.persisted);
        assert_eq!(service.commit_count(), 0);
    }

    #[test]
    fn new_root_with_rows_is_inserted_and_cleared() {
        let service = InMemoryDataService::new();
        let mut tree = tree();
        let root = tree.require("order").expect("order");
        let lines = tree.require("lines").expect("lines");
        let order = Entity::new("Order").with("lines", Value::Composition(vec![]));
        tree.set_item(root, Some(order.clone())).expect("set");
        tree.add_item(lines, Entity::new("OrderLine")).expect("line");

        let report = CommitCoordinator::default()
            .commit(&mut tree, root, &service)
            .expect("commit");
        assert_eq!(report.committed.len(), 2);
        assert!(matches!(report.list_update, Some(ListUpdate::Insert(_))));
        assert!(!tree.any_modified(root));
        assert_eq!(
            report.root_item.as_ref().and_then(|item| item.version),
            Some(1)
        );

        let reloaded = service
            .reload(&order.reference(), "_local")
            .expect("reload")
            .expect("found");
        assert_eq!(reloaded.composition("lines").map(<[Entity]>::len), Some(1));
    }

    #[test]
    fn fold_clears_local_state_without_persisting() {
        let mut tree = tree();
        let root = tree.require("order").expect("order");
        tree.set_item(root, Some(Entity::new("Order"))).expect("set");

        let folded = CommitCoordinator::default().fold(&mut tree, root).expect("fold");
        assert!(folded.was_new);
        assert_eq!(folded.commit_instances.len(), 1);
        assert!(!tree.is_modified(root));
    }
}
