//! Editing screens: lifecycle, combined browse/edit and lookup selection.
//!
//! # Responsibility
//! - Coordinate locks, containers, validation and commit for one screen
//!   instance at a time.
//! - Expose the enable/disable plan the presentation layer applies.
//!
//! # Invariants
//! - Screens receive every collaborator through [`Collaborators`].
//! - Capabilities (locking, committing, lookup) are opt-in traits.
//!
//! # See also
//! - crate::lock
//! - crate::commit

pub mod browse_edit;
pub mod capability;
pub mod collaborators;
pub mod descriptor;
pub mod hooks;
pub mod lifecycle;
pub mod lookup;
pub mod traversal;

pub use browse_edit::CombinedBrowseEditController;
pub use capability::{Committable, Lockable, LookupCapable};
pub use collaborators::{
    AllowAll, Collaborators, ListViewSync, LogNotifier, NotificationKind, Notifier,
    PermissionChecker,
};
pub use descriptor::{ScreenDescriptor, ScreenError, DEFAULT_COMMIT_ACTION};
pub use hooks::{EditorHooks, NoHooks};
pub use lifecycle::{
    CloseIntent, CloseOutcome, CloseResult, CommitOutcome, OpenRequest, ReadOnlyReason,
    ScreenLifecycle, ScreenMode, ScreenState, UnsavedChangesDecision,
};
pub use lookup::{SelectAction, SelectOutcome};
pub use traversal::{ComponentAction, ComponentNode, ComponentPlan};
