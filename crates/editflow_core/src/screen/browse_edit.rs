//! Combined browse/edit screen: a list and an in-place editor sharing one
//! container tree.
//!
//! # Responsibility
//! - Begin editing the selected row without navigation, with a lock tracked
//!   independently of any other screen's.
//! - Disable the browse pane while an edit is in progress.
//! - Save through the regular commit path and fold the result back into
//!   the list; cancel with a targeted reload of the edited row only.
//!
//! # Invariants
//! - At most one edit session is open at a time.
//! - Cancel clears pending state of every container in the tree.
//! - Saving or cancelling withdraws a close that is waiting for a decision.

use super::capability::{Committable, Lockable};
use super::collaborators::{Collaborators, NotificationKind};
use super::descriptor::{ScreenDescriptor, ScreenError};
use super::hooks::EditorHooks;
use super::lifecycle::{
    CloseIntent, CloseOutcome, CommitOutcome, ReadOnlyReason, ScreenState, UnsavedChangesDecision,
};
use super::traversal::{plan_editable, plan_enabled, ComponentAction, ComponentPlan};
use crate::commit::{CommitCoordinator, CommitError};
use crate::container::{ContainerError, ContainerId, ContainerKind, ContainerTree};
use crate::lock::{EditLock, EditLockOutcome};
use crate::model::entity::{Entity, EntityKey, EntityRef};
use crate::validation::ValidationPipeline;
use log::{info, warn};

#[derive(Debug)]
struct EditSession {
    reference: EntityRef,
    creating: bool,
    /// Selection to restore when a creation is cancelled.
    previous_selection: Option<EntityKey>,
    lock: Option<EditLock>,
    read_only: Option<ReadOnlyReason>,
}

pub struct CombinedBrowseEditController<H: EditorHooks> {
    descriptor: ScreenDescriptor,
    collaborators: Collaborators,
    hooks: H,
    tree: ContainerTree,
    browse: ContainerId,
    entity_type: String,
    fetch_plan: String,
    pipeline: ValidationPipeline,
    coordinator: CommitCoordinator,
    session: Option<EditSession>,
    state: ScreenState,
    pending_close: Option<(CloseIntent, ScreenState)>,
    settings_saved: bool,
}

impl<H: EditorHooks> CombinedBrowseEditController<H> {
    /// # Errors
    /// - Descriptor problems, or a root container that is not a collection.
    pub fn new(
        descriptor: ScreenDescriptor,
        collaborators: Collaborators,
        hooks: H,
    ) -> Result<Self, ScreenError> {
        let (tree, browse) = descriptor.build_tree(&collaborators.metadata)?;
        let container = tree.container(browse).ok_or(ContainerError::UnknownId(browse))?;
        if container.kind() != ContainerKind::Collection {
            return Err(ContainerError::KindMismatch {
                container: browse,
                expected: ContainerKind::Collection,
            }
            .into());
        }
        let entity_type = container.entity_type().to_string();
        let config = &collaborators.config;
        let fetch_plan = container
            .fetch_plan()
            .unwrap_or(config.default_fetch_plan.as_str())
            .to_string();
        let mut pipeline = ValidationPipeline::new(config.validation_group.clone());
        if let Some(class) = collaborators.metadata.class(&entity_type) {
            pipeline = pipeline.with_required_attributes(class);
        }

        Ok(Self {
            coordinator: CommitCoordinator::new(config.default_fetch_plan.clone()),
            descriptor,
            hooks,
            tree,
            browse,
            entity_type,
            fetch_plan,
            pipeline,
            session: None,
            state: ScreenState::Editing,
            pending_close: None,
            settings_saved: false,
            collaborators,
        })
    }

    pub fn state(&self) -> ScreenState {
        self.state
    }

    pub fn browse_container(&self) -> ContainerId {
        self.browse
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    pub fn tree(&self) -> &ContainerTree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut ContainerTree {
        &mut self.tree
    }

    pub fn pipeline_mut(&mut self) -> &mut ValidationPipeline {
        &mut self.pipeline
    }

    pub fn rows(&self) -> &[Entity] {
        self.tree
            .container(self.browse)
            .map(|container| container.rows())
            .unwrap_or_default()
    }

    pub fn selected(&self) -> Option<&Entity> {
        self.tree.current(self.browse)
    }

    pub fn is_editing(&self) -> bool {
        self.session.is_some()
    }

    pub fn is_browse_enabled(&self) -> bool {
        self.session.is_none() && self.state != ScreenState::Closed
    }

    pub fn set_rows(&mut self, rows: Vec<Entity>) -> Result<(), ScreenError> {
        self.expect_browsing("load rows")?;
        self.tree.set_rows(self.browse, rows)?;
        Ok(())
    }

    pub fn select(&mut self, key: Option<EntityKey>) -> Result<(), ScreenError> {
        self.expect_browsing("select")?;
        self.tree.select(self.browse, key)?;
        Ok(())
    }

    /// Starts editing the selected row in place.
    pub fn edit_selected(&mut self) -> Result<ScreenState, ScreenError> {
        self.expect_browsing("edit")?;
        let selected = self
            .selected()
            .map(Entity::reference)
            .ok_or(ContainerError::NoCurrentItem(self.browse))?;

        let mut fresh = self
            .collaborators
            .data
            .reload(&selected, &self.fetch_plan)
            .map_err(ScreenError::ReloadFailed)?
            .ok_or_else(|| ScreenError::EntityNotFound(selected.clone()))?;
        if fresh.entity_type != self.entity_type {
            fresh = fresh.copy_as(&self.entity_type);
        }
        self.tree.upsert_row(self.browse, fresh)?;

        let (lock, read_only) = self.acquire_write_access(&selected, false);
        let previous = Some(selected.key);
        self.begin_session(selected, false, previous, lock, read_only);
        Ok(self.state)
    }

    /// Adds a new row and starts editing it.
    pub fn create(&mut self) -> Result<EntityKey, ScreenError> {
        self.expect_browsing("create")?;
        let previous = self.tree.current(self.browse).map(|row| row.key);
        let mut item = Entity::new(self.entity_type.clone());
        let key = item.key;
        {
            let mut guard = self.tree.suspend_child_tracking(self.browse)?;
            self.hooks.init_new_item(&mut item, &mut guard);
            for created in item.new_references() {
                guard.register_commit_instance(created);
            }
            guard.add_item(self.browse, item)?;
            guard.select(self.browse, Some(key))?;
            if let Some(current) = guard.current(self.browse) {
                self.hooks.post_init(current);
            }
        }

        let reference = self
            .selected()
            .map(Entity::reference)
            .ok_or(ContainerError::NoCurrentItem(self.browse))?;
        let (lock, read_only) = self.acquire_write_access(&reference, true);
        self.begin_session(reference, true, previous, lock, read_only);
        Ok(key)
    }

    /// Validates and commits the edited row, then folds it back into the list.
    pub fn save(&mut self) -> Result<CommitOutcome, ScreenError> {
        self.cancel_pending_close();
        let Some(session) = self.session.as_ref() else {
            return Err(ScreenError::InvalidState {
                operation: "save without an edit in progress",
                state: self.state,
            });
        };
        if session.read_only.is_some() {
            return Ok(CommitOutcome::ReadOnly);
        }
        let reference = session.reference.clone();
        let item = self
            .tree
            .container(self.browse)
            .and_then(|container| container.find(&reference))
            .cloned()
            .ok_or(ContainerError::NoCurrentItem(self.browse))?;

        let errors = self.pipeline.run(&item);
        if !errors.is_empty() {
            self.collaborators.notifier.notify(
                NotificationKind::Warning,
                "Validation failed",
                &errors.summary(),
            );
            return Ok(CommitOutcome::ValidationFailed(errors));
        }
        if !self.hooks.pre_commit(&item) {
            return Ok(CommitOutcome::Vetoed);
        }

        self.state = ScreenState::Committing;
        let report = match self.coordinator.commit(
            &mut self.tree,
            self.browse,
            self.collaborators.data.as_ref(),
        ) {
            Ok(report) => report,
            Err(err) => {
                self.state = self.session_state();
                return Err(match err {
                    CommitError::Data(err) => {
                        self.collaborators.notifier.notify(
                            NotificationKind::Error,
                            "Commit failed",
                            &err.to_string(),
                        );
                        ScreenError::CommitFailed(err)
                    }
                    CommitError::Container(err) => err.into(),
                });
            }
        };

        if let Some(update) = &report.list_update {
            let saved = update.entity().clone();
            self.tree.upsert_row(self.browse, saved)?;
        }
        self.tree.select(self.browse, Some(reference.key))?;
        if let Some(saved) = self.selected().cloned() {
            if report.persisted && self.collaborators.config.show_save_notification {
                self.collaborators.notifier.notify(
                    NotificationKind::Info,
                    "Changes saved",
                    &saved.reference().to_string(),
                );
            }
            self.hooks.post_commit(&saved, false);
        }
        self.end_session();
        info!(
            "event=browse_edit module=screen status=saved screen={} entity={reference}",
            self.descriptor.id
        );
        Ok(CommitOutcome::Committed(report))
    }

    /// Abandons the edit: clears pending state tree-wide and reloads only
    /// the edited row.
    pub fn cancel(&mut self) -> Result<(), ScreenError> {
        self.cancel_pending_close();
        let Some(session) = self.session.take() else {
            return Ok(());
        };
        if let Some(lock) = session.lock {
            lock.release(&self.collaborators.locks);
        }
        self.tree.clear_all_pending();
        self.state = ScreenState::Editing;

        if session.creating {
            self.tree.remove_row(self.browse, &session.reference)?;
            if let Some(previous) = session.previous_selection {
                self.tree.select(self.browse, Some(previous))?;
            }
        } else {
            let fresh = self
                .collaborators
                .data
                .reload(&session.reference, &self.fetch_plan)
                .map_err(ScreenError::ReloadFailed)?;
            match fresh {
                Some(row) => self.tree.upsert_row(self.browse, row)?,
                None => self.tree.remove_row(self.browse, &session.reference)?,
            }
        }
        info!(
            "event=browse_edit module=screen status=cancelled screen={} entity={}",
            self.descriptor.id, session.reference
        );
        Ok(())
    }

    /// Closes the screen. An edit with unsaved changes asks for a decision
    /// unless the intent forces commit or discard.
    ///
    /// A suspended close is answered with [`resolve_close`](Self::resolve_close);
    /// a forcing intent also settles it.
    pub fn close(&mut self, intent: CloseIntent) -> Result<CloseOutcome, ScreenError> {
        if self.state == ScreenState::Closed {
            return Ok(CloseOutcome::AlreadyClosed);
        }
        let forcing = matches!(intent, CloseIntent::Commit | CloseIntent::Discard);
        if let Some((_, resume)) = self.pending_close {
            if !forcing {
                return Ok(CloseOutcome::AwaitingDecision);
            }
            self.pending_close = None;
            self.state = resume;
        }

        match intent {
            CloseIntent::Commit if self.session.is_some() => {
                let outcome = self.save()?;
                if !outcome.is_success() {
                    return Ok(CloseOutcome::CommitBlocked(outcome));
                }
            }
            CloseIntent::Commit | CloseIntent::Discard => self.cancel()?,
            _ => {
                let unsaved = self
                    .session
                    .as_ref()
                    .is_some_and(|session| session.read_only.is_none())
                    && self.tree.any_modified(self.browse);
                if unsaved && self.collaborators.config.confirm_unsaved_close {
                    self.pending_close = Some((intent, self.state));
                    self.state = ScreenState::Closing;
                    info!(
                        "event=close module=screen status=awaiting_decision screen={} intent={intent:?}",
                        self.descriptor.id
                    );
                    return Ok(CloseOutcome::AwaitingDecision);
                }
                self.cancel()?;
            }
        }
        Ok(self.finish_close(intent))
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
            UnsavedChangesDecision::CommitAndClose => self.close(CloseIntent::Commit),
            UnsavedChangesDecision::DiscardAndClose => {
                self.cancel()?;
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

    /// Browse pane disabled while editing; form fields and commit action
    /// enabled only for a writable edit.
    pub fn component_plan(&self) -> ComponentPlan {
        let components = &self.descriptor.components;
        if self.state == ScreenState::Closed {
            return plan_enabled(components, false);
        }
        let writable = self
            .session
            .as_ref()
            .is_some_and(|session| session.read_only.is_none());

        let mut plan = Vec::new();
        if let Some(pane) = self
            .descriptor
            .browse_pane
            .as_deref()
            .and_then(|id| components.find(id))
        {
            plan.extend(plan_enabled(pane, self.session.is_none()));
        }
        plan.extend(plan_editable(components, writable));
        plan.push((
            self.descriptor.commit_action.clone(),
            ComponentAction::from_flag(writable),
        ));
        plan
    }

    fn finish_close(&mut self, intent: CloseIntent) -> CloseOutcome {
        self.state = ScreenState::Closing;
        if !self.settings_saved {
            self.hooks.save_settings();
            self.settings_saved = true;
        }
        self.state = ScreenState::Closed;
        info!(
            "event=close module=screen status=ok screen={} intent={intent:?}",
            self.descriptor.id
        );
        CloseOutcome::Closed(intent)
    }

    fn acquire_write_access(
        &self,
        reference: &EntityRef,
        creating: bool,
    ) -> (Option<EditLock>, Option<ReadOnlyReason>) {
        let permissions = &self.collaborators.permissions;
        let permitted = if creating {
            permissions.is_create_permitted(&self.entity_type)
        } else {
            permissions.is_update_permitted(&self.entity_type)
        };
        if !permitted {
            return (None, Some(ReadOnlyReason::PermissionDenied));
        }
        if creating || !self.collaborators.config.pessimistic_locking {
            return (None, None);
        }

        match self
            .collaborators
            .locks
            .lock_for_edit(&self.entity_type, reference.key)
        {
            EditLockOutcome::Locked(lock) => (Some(lock), None),
            EditLockOutcome::SelfHeld | EditLockOutcome::NotSupported => (None, None),
            EditLockOutcome::Conflict { holder, since_ms } => {
                self.collaborators.notifier.notify(
                    NotificationKind::Warning,
                    "Item is locked",
                    &format!("locked by {holder} since {since_ms}"),
                );
                (None, Some(ReadOnlyReason::LockedBy { holder, since_ms }))
            }
            EditLockOutcome::Unavailable(err) => {
                warn!(
                    "event=browse_edit module=screen status=lock_unavailable entity={reference} error={err}"
                );
                (None, Some(ReadOnlyReason::LockUnavailable))
            }
        }
    }

    fn begin_session(
        &mut self,
        reference: EntityRef,
        creating: bool,
        previous_selection: Option<EntityKey>,
        lock: Option<EditLock>,
        read_only: Option<ReadOnlyReason>,
    ) {
        info!(
            "event=browse_edit module=screen status=editing screen={} entity={reference} creating={creating} locked={}",
            self.descriptor.id,
            lock.is_some()
        );
        self.session = Some(EditSession {
            reference,
            creating,
            previous_selection,
            lock,
            read_only,
        });
        self.state = self.session_state();
    }

    fn end_session(&mut self) {
        if let Some(session) = self.session.take() {
            if let Some(lock) = session.lock {
                lock.release(&self.collaborators.locks);
            }
        }
        self.state = ScreenState::Editing;
    }

    fn session_state(&self) -> ScreenState {
        match &self.session {
            Some(session) if session.read_only.is_some() => ScreenState::ReadOnlyLocked,
            _ => ScreenState::Editing,
        }
    }

    fn expect_browsing(&self, operation: &'static str) -> Result<(), ScreenError> {
        if self.session.is_some() || self.state == ScreenState::Closed {
            return Err(ScreenError::InvalidState {
                operation,
                state: self.state,
            });
        }
        Ok(())
    }
}

impl<H: EditorHooks> Lockable for CombinedBrowseEditController<H> {
    fn holds_lock(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.lock.is_some())
    }

    fn read_only_reason(&self) -> Option<&ReadOnlyReason> {
        self.session
            .as_ref()
            .and_then(|session| session.read_only.as_ref())
    }
}

impl<H: EditorHooks> Committable for CombinedBrowseEditController<H> {
    fn is_modified(&self) -> bool {
        self.tree.any_modified(self.browse)
    }

    fn commit(&mut self) -> Result<CommitOutcome, ScreenError> {
        self.save()
    }
}
