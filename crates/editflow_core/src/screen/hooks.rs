//! Extension points a concrete screen supplies to the lifecycle.

use crate::container::ContainerTree;
use crate::model::entity::Entity;

/// Screen-specific behavior plugged into the lifecycle. Every method has a
/// no-op default.
pub trait EditorHooks {
    /// Fills defaults of a brand-new item before it is placed in the root
    /// container. Child tracking is suspended while this runs.
    fn init_new_item(&mut self, _item: &mut Entity, _tree: &mut ContainerTree) {}

    /// Runs once the item is in place, still inside the suspended scope.
    fn post_init(&mut self, _item: &Entity) {}

    /// Returning false aborts the commit; nothing is persisted.
    fn pre_commit(&mut self, _item: &Entity) -> bool {
        true
    }

    fn post_commit(&mut self, _committed: &Entity, _closing: bool) {}

    /// Called exactly once when the screen reaches `Closed`.
    fn save_settings(&mut self) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl EditorHooks for NoHooks {}
