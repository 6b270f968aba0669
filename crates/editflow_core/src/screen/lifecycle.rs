//! Editing-screen lifecycle state machine.
//!
//! # Responsibility
//! - Drive open -> (lock) -> edit -> validate -> commit/discard -> close for
//!   one screen instance.
//! - Own the instance's edit lock and release it exactly once.
//! - Model every data, permission, lock and validation condition as an
//!   outcome; only infrastructure and programming errors are `Err`.
//!
//! # Invariants
//! - Validation completes before any commit is issued; the cross-field pass
//!   only runs on a field-valid item.
//! - A lock is acquired before the screen becomes `Editing` and is released
//!   only by the instance that freshly acquired it.
//! - `save_settings` and close listeners fire exactly once, on `Closed`.
//! - A failed commit leaves the tree untouched and the state `Editing`.
//!
//! # See also
//! - crate::screen::browse_edit
//! - crate::screen::lookup

use super::capability::{Committable, Lockable, LookupCapable};
use super::collaborators::{Collaborators, ListViewSync, NotificationKind};
use super::descriptor::{ScreenDescriptor, ScreenError};
use super::hooks::EditorHooks;
use super::traversal::{plan_editable, plan_enabled, ComponentAction, ComponentPlan};
use crate::commit::{CommitCoordinator, CommitError, CommitReport, FoldedCommit};
use crate::container::{ContainerError, ContainerId, ContainerTree, ParentContainerView};
use crate::lock::{EditLock, EditLockOutcome};
use crate::model::entity::{Entity, EntityKey, EntityRef};
use crate::model::metadata::Metadata;
use crate::model::validation::ValidationErrors;
use crate::validation::ValidationPipeline;
use log::{info, warn};
use std::collections::BTreeSet;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenState {
    Initializing,
    Editing,
    ReadOnlyLocked,
    Validating,
    Committing,
    /// Waiting for a decision about unsaved changes, or tearing down.
    Closing,
    Closed,
}

/// Caller's reason for closing a screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseIntent {
    Commit,
    Discard,
    Cancel,
    /// Lookup screen closed because a selection was made.
    Select,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOnlyReason {
    PermissionDenied,
    LockedBy { holder: String, since_ms: i64 },
    /// The lock store failed; editing is refused rather than unguarded.
    LockUnavailable,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    Committed(CommitReport),
    /// Nested editor: the parent tree takes the result.
    Folded(FoldedCommit),
    ValidationFailed(ValidationErrors),
    Vetoed,
    ReadOnly,
}

impl CommitOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Committed(_) | Self::Folded(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CloseOutcome {
    Closed(CloseIntent),
    /// Unsaved changes; resolve with [`ScreenLifecycle::resolve_close`].
    AwaitingDecision,
    AlreadyClosed,
    StayedOpen,
    CommitBlocked(CommitOutcome),
}

/// Three-way answer to the unsaved-changes question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsavedChangesDecision {
    CommitAndClose,
    DiscardAndClose,
    StayOpen,
}

/// Delivered to close listeners once the screen is closed.
#[derive(Debug, Clone, PartialEq)]
pub struct CloseResult {
    pub intent: CloseIntent,
    /// Selected entities of a lookup closed with `Select`, listeners stripped.
    pub selection: Vec<Entity>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenMode {
    Editor,
    Lookup,
}

/// Arguments of [`ScreenLifecycle::open_editor`].
pub struct OpenRequest {
    pub item: Entity,
    /// Pending state of the parent container for nested editing.
    pub parent: Option<ParentContainerView>,
    /// Overrides the root container's fetch plan.
    pub fetch_plan: Option<String>,
    pub list_view: Option<Arc<dyn ListViewSync>>,
}

impl OpenRequest {
    pub fn new(item: Entity) -> Self {
        Self {
            item,
            parent: None,
            fetch_plan: None,
            list_view: None,
        }
    }

    pub fn nested_in(mut self, parent: ParentContainerView) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_fetch_plan(mut self, fetch_plan: impl Into<String>) -> Self {
        self.fetch_plan = Some(fetch_plan.into());
        self
    }

    pub fn with_list_view(mut self, list_view: Arc<dyn ListViewSync>) -> Self {
        self.list_view = Some(list_view);
        self
    }
}

type CloseListener = Box<dyn FnMut(&CloseResult)>;

pub struct ScreenLifecycle<H: EditorHooks> {
    descriptor: ScreenDescriptor,
    collaborators: Collaborators,
    hooks: H,
    tree: ContainerTree,
    root: ContainerId,
    pipeline: ValidationPipeline,
    coordinator: CommitCoordinator,
    state: ScreenState,
    mode: ScreenMode,
    parent: Option<ParentContainerView>,
    fetch_plan: String,
    list_view: Option<Arc<dyn ListViewSync>>,
    lock: Option<EditLock>,
    read_only: Option<ReadOnlyReason>,
    pending_close: Option<(CloseIntent, ScreenState)>,
    lookup_selection: BTreeSet<EntityKey>,
    folded: Option<FoldedCommit>,
    close_listeners: Vec<CloseListener>,
    close_result: Option<CloseResult>,
    settings_saved: bool,
}

impl<H: EditorHooks> Debug for ScreenLifecycle<H> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScreenLifecycle")
            .field("screen", &self.descriptor.id)
            .field("state", &self.state)
            .field("mode", &self.mode)
            .field("read_only", &self.read_only)
            .field("holds_lock", &self.lock.is_some())
            .finish_non_exhaustive()
    }
}

impl<H: EditorHooks> ScreenLifecycle<H> {
    /// Builds a screen in `Initializing`.
    ///
    /// # Errors
    /// - Descriptor problems (missing container, component or class).
    pub fn new(
        descriptor: ScreenDescriptor,
        collaborators: Collaborators,
        hooks: H,
    ) -> Result<Self, ScreenError> {
        let (tree, root) = descriptor.build_tree(&collaborators.metadata)?;
        let root_container = tree
            .container(root)
            .ok_or_else(|| ScreenError::MissingContainer(descriptor.root_container.clone()))?;
        let config = &collaborators.config;

        let mut pipeline = ValidationPipeline::new(config.validation_group.clone());
        if let Some(class) = collaborators.metadata.class(root_container.entity_type()) {
            pipeline = pipeline.with_required_attributes(class);
        }
        let fetch_plan = root_container
            .fetch_plan()
            .unwrap_or(config.default_fetch_plan.as_str())
            .to_string();

        Ok(Self {
            coordinator: CommitCoordinator::new(config.default_fetch_plan.clone()),
            descriptor,
            hooks,
            tree,
            root,
            pipeline,
            state: ScreenState::Initializing,
            mode: ScreenMode::Editor,
            parent: None,
            fetch_plan,
            list_view: None,
            lock: None,
            read_only: None,
            pending_close: None,
            lookup_selection: BTreeSet::new(),
            folded: None,
            close_listeners: Vec::new(),
            close_result: None,
            settings_saved: false,
            collaborators,
        })
    }

    pub fn state(&self) -> ScreenState {
        self.state
    }

    pub fn mode(&self) -> ScreenMode {
        self.mode
    }

    pub fn descriptor(&self) -> &ScreenDescriptor {
        &self.descriptor
    }

    pub fn root(&self) -> ContainerId {
        self.root
    }

    pub fn item(&self) -> Option<&Entity> {
        self.tree.current(self.root)
    }

    pub fn tree(&self) -> &ContainerTree {
        &self.tree
    }

    /// Mutable access for edits made through the screen's components.
    pub fn tree_mut(&mut self) -> &mut ContainerTree {
        &mut self.tree
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    pub fn pipeline_mut(&mut self) -> &mut ValidationPipeline {
        &mut self.pipeline
    }

    pub fn close_result(&self) -> Option<&CloseResult> {
        self.close_result.as_ref()
    }

    /// Takes the last nested commit for the parent to absorb.
    pub fn take_folded(&mut self) -> Option<FoldedCommit> {
        self.folded.take()
    }

    pub fn add_close_listener(&mut self, listener: impl FnMut(&CloseResult) + 'static) {
        self.close_listeners.push(Box::new(listener));
    }

    /// Opens the screen on `request.item`.
    ///
    /// # Errors
    /// - `ReloadFailed` / `EntityNotFound` when the persistent item cannot be
    ///   reloaded. The screen stays in `Initializing` and holds no lock.
    pub fn open_editor(&mut self, request: OpenRequest) -> Result<ScreenState, ScreenError> {
        self.expect_state("open", &[ScreenState::Initializing])?;
        let started_at = Instant::now();
        let OpenRequest {
            item,
            parent,
            fetch_plan,
            list_view,
        } = request;
        let reference = item.reference();
        info!(
            "event=screen_open module=screen status=start screen={} entity={reference}",
            self.descriptor.id
        );

        if let Some(plan) = fetch_plan {
            self.fetch_plan = plan;
        }
        let declared = self
            .tree
            .container(self.root)
            .map(|container| container.entity_type().to_string())
            .ok_or_else(|| ScreenError::MissingContainer(self.descriptor.root_container.clone()))?;
        let held_by_parent = parent
            .as_ref()
            .is_some_and(|view| view.has_pending(&reference));

        let mut item = if item.is_new() || held_by_parent {
            self.as_declared(item)
        } else {
            self.fetch_root(&reference)?
        };

        let is_new = item.is_new();
        let needs_init = is_new
            && !parent
                .as_ref()
                .is_some_and(|view| view.is_pending_create(&reference));
        {
            let mut guard = self.tree.suspend_child_tracking(self.root)?;
            if needs_init {
                self.hooks.init_new_item(&mut item, &mut guard);
                for created in item.new_references() {
                    guard.register_commit_instance(created);
                }
            }
            place_root(&mut guard, self.root, item, &self.collaborators.metadata)?;
            if let Some(current) = guard.current(self.root) {
                self.hooks.post_init(current);
            }
        }

        self.parent = parent;
        self.list_view = list_view;
        self.read_only = self.check_write_access(&declared, &reference.key, is_new);
        self.state = if self.read_only.is_some() {
            ScreenState::ReadOnlyLocked
        } else {
            ScreenState::Editing
        };
        info!(
            "event=screen_open module=screen status=ok screen={} entity={reference} state={:?} locked={} duration_ms={}",
            self.descriptor.id,
            self.state,
            self.lock.is_some(),
            started_at.elapsed().as_millis()
        );
        Ok(self.state)
    }

    /// Reloads the persisted root item without committing.
    ///
    /// Rows the user deleted in nested containers stay deleted; they are
    /// subtracted from the fresh item and still removed by the next commit.
    /// Returns the number of rows subtracted.
    ///
    /// # Errors
    /// - `InvalidState` outside an open editor or for an unsaved item.
    /// - `ReloadFailed` / `EntityNotFound` from the data service.
    pub fn reload(&mut self) -> Result<usize, ScreenError> {
        self.expect_state("reload", &[ScreenState::Editing, ScreenState::ReadOnlyLocked])?;
        let reference = match self.item() {
            Some(item) if self.mode == ScreenMode::Editor && !item.is_new() => item.reference(),
            _ => {
                return Err(ScreenError::InvalidState {
                    operation: "reload without a persisted item",
                    state: self.state,
                })
            }
        };
        let removed = self.reload_root(&reference)?;
        info!(
            "event=screen_reload module=screen status=ok screen={} entity={reference} kept_deleted={removed}",
            self.descriptor.id
        );
        Ok(removed)
    }

    /// Opens the screen as a lookup over `rows`. The root container must be
    /// a collection.
    pub fn open_lookup(&mut self, rows: Vec<Entity>) -> Result<ScreenState, ScreenError> {
        self.expect_state("open lookup", &[ScreenState::Initializing])?;
        self.tree.set_rows(self.root, rows)?;
        self.mode = ScreenMode::Lookup;
        self.state = ScreenState::Editing;
        info!(
            "event=screen_open module=screen status=ok screen={} mode=lookup",
            self.descriptor.id
        );
        Ok(self.state)
    }

    /// Replaces the lookup selection. Unknown keys are rejected.
    pub fn set_selection(&mut self, keys: &[EntityKey]) -> Result<(), ScreenError> {
        for key in keys {
            self.tree.select(self.root, Some(*key))?;
        }
        self.lookup_selection = keys.iter().copied().collect();
        Ok(())
    }

    pub fn is_modified(&self) -> bool {
        self.tree.any_modified(self.root)
    }

    pub fn read_only_reason(&self) -> Option<&ReadOnlyReason> {
        self.read_only.as_ref()
    }

    pub fn holds_lock(&self) -> bool {
        self.lock.is_some()
    }

    /// Validates and saves without closing. The screen keeps editing the
    /// reloaded, just-saved item.
    pub fn commit(&mut self) -> Result<CommitOutcome, ScreenError> {
        self.run_commit(false)
    }

    pub fn commit_and_close(&mut self) -> Result<CloseOutcome, ScreenError> {
        let outcome = self.run_commit(true)?;
        if !outcome.is_success() {
            return Ok(CloseOutcome::CommitBlocked(outcome));
        }
        Ok(self.finish_close(CloseIntent::Commit))
    }

    /// Starts closing with `intent`.
    ///
    /// Unsaved changes under a non-forcing intent suspend the close until
    /// [`resolve_close`](Self::resolve_close) or
    /// [`cancel_pending_close`](Self::cancel_pending_close).
    pub fn request_close(&mut self, intent: CloseIntent) -> Result<CloseOutcome, ScreenError> {
        if self.state == ScreenState::Closed {
            return Ok(CloseOutcome::AlreadyClosed);
        }
        if self.pending_close.is_some() {
            return Ok(CloseOutcome::AwaitingDecision);
        }

        match intent {
            CloseIntent::Commit => self.commit_and_close(),
            CloseIntent::Discard => {
                self.tree.discard(self.root)?;
                Ok(self.finish_close(intent))
            }
            CloseIntent::Cancel | CloseIntent::Unknown | CloseIntent::Select => {
                let unsaved = self.mode == ScreenMode::Editor
                    && self.read_only.is_none()
                    && self.is_modified();
                if !unsaved {
                    return Ok(self.finish_close(intent));
                }
                if !self.collaborators.config.confirm_unsaved_close {
                    self.tree.discard(self.root)?;
                    return Ok(self.finish_close(intent));
                }
                self.pending_close = Some((intent, self.state));
                self.state = ScreenState::Closing;
                info!(
                    "event=close module=screen status=awaiting_decision screen={} intent={intent:?}",
                    self.descriptor.id
                );
                Ok(CloseOutcome::AwaitingDecision)
            }
        }
    }

    /// Applies the user's answer to a suspended close.
    pub fn resolve_close(
        &mut self,
        decision: UnsavedChangesDecision,
    ) -> Result<CloseOutcome, ScreenError> {
        let Some((intent, resume)) = self.pending_close.take() else {
            return Err(ScreenError::InvalidState {
                operation: "resolve close",
                state: self.state,
            });
        };
        self.state = resume;

        match decision {
            UnsavedChangesDecision::CommitAndClose => self.commit_and_close(),
            UnsavedChangesDecision::DiscardAndClose => {
                self.tree.discard(self.root)?;
                Ok(self.finish_close(intent))
            }
            UnsavedChangesDecision::StayOpen => {
                info!(
                    "event=close module=screen status=cancelled screen={}",
                    self.descriptor.id
                );
                Ok(CloseOutcome::StayedOpen)
            }
        }
    }

    /// Withdraws a suspended close. Returns whether one was pending.
    pub fn cancel_pending_close(&mut self) -> bool {
        match self.pending_close.take() {
            Some((_, resume)) => {
                self.state = resume;
                true
            }
            None => false,
        }
    }

    /// Enable/disable plan for the current state.
    pub fn component_plan(&self) -> ComponentPlan {
        let components = &self.descriptor.components;
        let (editable, commit_enabled) = match (self.state, self.mode) {
            (ScreenState::Closed | ScreenState::Initializing, _) => {
                return plan_enabled(components, false)
            }
            (_, ScreenMode::Lookup) => (false, false),
            (ScreenState::ReadOnlyLocked, _) => (false, false),
            _ => (true, true),
        };
        let mut plan = plan_editable(components, editable);
        plan.push((
            self.descriptor.commit_action.clone(),
            ComponentAction::from_flag(commit_enabled),
        ));
        plan
    }

    fn run_commit(&mut self, closing: bool) -> Result<CommitOutcome, ScreenError> {
        if self.state == ScreenState::ReadOnlyLocked {
            return Ok(CommitOutcome::ReadOnly);
        }
        self.expect_state("commit", &[ScreenState::Editing])?;
        if self.mode == ScreenMode::Lookup {
            return Err(ScreenError::InvalidState {
                operation: "commit a lookup",
                state: self.state,
            });
        }
        let item = self
            .item()
            .cloned()
            .ok_or(ContainerError::NoCurrentItem(self.root))?;

        self.state = ScreenState::Validating;
        let errors = self.pipeline.run(&item);
        info!(
            "event=validation module=screen status={} screen={} entity={} errors={}",
            if errors.is_empty() { "ok" } else { "failed" },
            self.descriptor.id,
            item.reference(),
            errors.len()
        );
        if !errors.is_empty() {
            self.collaborators.notifier.notify(
                NotificationKind::Warning,
                "Validation failed",
                &errors.summary(),
            );
            self.state = ScreenState::Editing;
            return Ok(CommitOutcome::ValidationFailed(errors));
        }
        if !self.hooks.pre_commit(&item) {
            info!(
                "event=commit module=screen status=vetoed screen={} entity={}",
                self.descriptor.id,
                item.reference()
            );
            self.state = ScreenState::Editing;
            return Ok(CommitOutcome::Vetoed);
        }

        self.state = ScreenState::Committing;
        if self.parent.is_some() {
            return self.fold(closing);
        }

        let report = match self.coordinator.commit(
            &mut self.tree,
            self.root,
            self.collaborators.data.as_ref(),
        ) {
            Ok(report) => report,
            Err(CommitError::Data(err)) => {
                self.state = ScreenState::Editing;
                self.collaborators.notifier.notify(
                    NotificationKind::Error,
                    "Commit failed",
                    &err.to_string(),
                );
                return Err(ScreenError::CommitFailed(err));
            }
            Err(CommitError::Container(err)) => {
                self.state = ScreenState::Editing;
                return Err(err.into());
            }
        };

        if let (Some(list_view), Some(update)) = (&self.list_view, &report.list_update) {
            list_view.apply(update);
        }
        if let Some(saved) = &report.root_item {
            if report.persisted && self.collaborators.config.show_save_notification {
                self.collaborators.notifier.notify(
                    NotificationKind::Info,
                    "Changes saved",
                    &saved.reference().to_string(),
                );
            }
            self.hooks.post_commit(saved, closing);
        }
        if !closing && report.persisted {
            self.reinitialize(report.root_item.as_ref());
        }
        self.state = ScreenState::Editing;
        Ok(CommitOutcome::Committed(report))
    }

    fn fold(&mut self, closing: bool) -> Result<CommitOutcome, ScreenError> {
        let folded = match self.coordinator.fold(&mut self.tree, self.root) {
            Ok(folded) => folded,
            Err(err) => {
                self.state = ScreenState::Editing;
                return Err(match err {
                    CommitError::Container(err) => err.into(),
                    CommitError::Data(err) => ScreenError::CommitFailed(err),
                });
            }
        };
        self.hooks.post_commit(&folded.item, closing);
        self.folded = Some(folded.clone());
        self.state = ScreenState::Editing;
        Ok(CommitOutcome::Folded(folded))
    }

    /// Reloads the just-saved item so later edits see server-assigned state.
    /// Keeps the committed snapshot when the reload fails; never re-locks.
    fn reinitialize(&mut self, saved: Option<&Entity>) {
        let Some(reference) = saved.map(Entity::reference) else {
            return;
        };
        if let Err(err) = self.reload_root(&reference) {
            warn!("event=screen_reinit module=screen status=error entity={reference} error={err}");
        }
    }

    /// Reload step shared by open, explicit reload and the post-commit refresh.
    fn reload_root(&mut self, reference: &EntityRef) -> Result<usize, ScreenError> {
        let fresh = self.fetch_root(reference)?;
        let mut guard = self.tree.suspend_child_tracking(self.root)?;
        Ok(place_root(
            &mut guard,
            self.root,
            fresh,
            &self.collaborators.metadata,
        )?)
    }

    fn fetch_root(&self, reference: &EntityRef) -> Result<Entity, ScreenError> {
        let item = self
            .collaborators
            .data
            .reload(reference, &self.fetch_plan)
            .map_err(ScreenError::ReloadFailed)?
            .ok_or_else(|| ScreenError::EntityNotFound(reference.clone()))?;
        Ok(self.as_declared(item))
    }

    /// Converts an extension or base instance to the root container's type.
    fn as_declared(&self, item: Entity) -> Entity {
        match self.tree.container(self.root) {
            Some(root) if root.entity_type() != item.entity_type => item.copy_as(root.entity_type()),
            _ => item,
        }
    }

    /// Decides read-only mode and takes the edit lock when allowed.
    fn check_write_access(
        &mut self,
        entity_type: &str,
        key: &EntityKey,
        is_new: bool,
    ) -> Option<ReadOnlyReason> {
        let permissions = &self.collaborators.permissions;
        let permitted = if is_new {
            permissions.is_create_permitted(entity_type)
        } else {
            permissions.is_update_permitted(entity_type)
        };
        if !permitted {
            info!(
                "event=screen_open module=screen status=read_only reason=permission screen={} entity_type={entity_type}",
                self.descriptor.id
            );
            return Some(ReadOnlyReason::PermissionDenied);
        }

        let config = &self.collaborators.config;
        if is_new || self.parent.is_some() || !config.pessimistic_locking {
            return None;
        }
        match self.collaborators.locks.lock_for_edit(entity_type, *key) {
            EditLockOutcome::Locked(lock) => {
                self.lock = Some(lock);
                None
            }
            EditLockOutcome::SelfHeld | EditLockOutcome::NotSupported => None,
            EditLockOutcome::Conflict { holder, since_ms } => {
                self.collaborators.notifier.notify(
                    NotificationKind::Warning,
                    "Item is locked",
                    &format!("locked by {holder} since {since_ms}"),
                );
                Some(ReadOnlyReason::LockedBy { holder, since_ms })
            }
            EditLockOutcome::Unavailable(err) => {
                self.collaborators.notifier.notify(
                    NotificationKind::Warning,
                    "Item cannot be locked",
                    &err.to_string(),
                );
                Some(ReadOnlyReason::LockUnavailable)
            }
        }
    }

    fn finish_close(&mut self, intent: CloseIntent) -> CloseOutcome {
        if self.state == ScreenState::Closed {
            return CloseOutcome::AlreadyClosed;
        }
        self.state = ScreenState::Closing;
        self.pending_close = None;
        if let Some(lock) = self.lock.take() {
            lock.release(&self.collaborators.locks);
        }
        if !self.settings_saved {
            self.hooks.save_settings();
            self.settings_saved = true;
        }

        let selection = if intent == CloseIntent::Select {
            self.selection()
        } else {
            Vec::new()
        };
        let result = CloseResult { intent, selection };
        self.state = ScreenState::Closed;
        for listener in &mut self.close_listeners {
            listener(&result);
        }
        self.close_result = Some(result);
        info!(
            "event=close module=screen status=ok screen={} intent={intent:?}",
            self.descriptor.id
        );
        CloseOutcome::Closed(intent)
    }

    fn expect_state(
        &self,
        operation: &'static str,
        allowed: &[ScreenState],
    ) -> Result<(), ScreenError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(ScreenError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }
}

/// Places a root item and subtracts rows deleted in nested containers from
/// it. Returns the number of rows subtracted.
fn place_root(
    tree: &mut ContainerTree,
    root: ContainerId,
    item: Entity,
    metadata: &Metadata,
) -> Result<usize, ContainerError> {
    let is_new = item.is_new();
    tree.set_item(root, Some(item))?;
    if is_new {
        return Ok(0);
    }
    tree.reconcile_deleted_compositions(root, metadata)
}

impl<H: EditorHooks> Lockable for ScreenLifecycle<H> {
    fn holds_lock(&self) -> bool {
        self.lock.is_some()
    }

    fn read_only_reason(&self) -> Option<&ReadOnlyReason> {
        self.read_only.as_ref()
    }
}

impl<H: EditorHooks> Committable for ScreenLifecycle<H> {
    fn is_modified(&self) -> bool {
        self.tree.any_modified(self.root)
    }

    fn commit(&mut self) -> Result<CommitOutcome, ScreenError> {
        self.run_commit(false)
    }
}

impl<H: EditorHooks> LookupCapable for ScreenLifecycle<H> {
    fn is_lookup(&self) -> bool {
        self.mode == ScreenMode::Lookup && self.state != ScreenState::Closed
    }

    /// Selected rows in row order, subscriptions stripped.
    fn selection(&self) -> Vec<Entity> {
        let Some(container) = self.tree.container(self.root) else {
            return Vec::new();
        };
        container
            .rows()
            .iter()
            .filter(|row| self.lookup_selection.contains(&row.key))
            .cloned()
            .map(|mut row| {
                row.strip_subscriptions();
                row
            })
            .collect()
    }

    fn close_for_selection(&mut self) -> CloseOutcome {
        if self.mode != ScreenMode::Lookup {
            return CloseOutcome::StayedOpen;
        }
        self.finish_close(CloseIntent::Select)
    }
}
