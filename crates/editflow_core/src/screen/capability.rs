//! Capabilities a screen kind opts into.

use super::descriptor::ScreenError;
use super::lifecycle::{CloseOutcome, CommitOutcome, ReadOnlyReason};
use crate::model::entity::Entity;

/// Screens that may hold a pessimistic lock.
pub trait Lockable {
    fn holds_lock(&self) -> bool;

    /// Why the screen is read-only, if it is.
    fn read_only_reason(&self) -> Option<&ReadOnlyReason>;
}

/// Screens that save their container tree.
pub trait Committable {
    fn is_modified(&self) -> bool;

    fn commit(&mut self) -> Result<CommitOutcome, ScreenError>;
}

/// Screens that can hand a selection back to their opener.
pub trait LookupCapable {
    fn is_lookup(&self) -> bool;

    fn selection(&self) -> Vec<Entity>;

    /// Closes with the select intent.
    fn close_for_selection(&mut self) -> CloseOutcome;
}
