//! Terminal "select" action of lookup screens.
//!
//! # Invariants
//! - Without a handler the action does nothing.
//! - The handler runs only after the screen closed, and receives the
//!   selection captured before the close with all subscriptions stripped.

use super::capability::LookupCapable;
use super::lifecycle::{CloseIntent, CloseOutcome};
use crate::model::entity::Entity;
use log::info;

type SelectHandler = Box<dyn FnMut(Vec<Entity>)>;
type SelectValidator = Box<dyn Fn(&[Entity]) -> bool>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectOutcome {
    /// No handler registered; the screen is left untouched.
    NoHandler,
    NotLookupMode,
    Rejected,
    /// Number of entities handed to the handler.
    Selected(usize),
    CloseVetoed,
}

#[derive(Default)]
pub struct SelectAction {
    handler: Option<SelectHandler>,
    validator: Option<SelectValidator>,
}

impl SelectAction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handler(mut self, handler: impl FnMut(Vec<Entity>) + 'static) -> Self {
        self.handler = Some(Box::new(handler));
        self
    }

    pub fn with_validator(mut self, validator: impl Fn(&[Entity]) -> bool + 'static) -> Self {
        self.validator = Some(Box::new(validator));
        self
    }

    pub fn invoke(&mut self, screen: &mut impl LookupCapable) -> SelectOutcome {
        let Some(handler) = self.handler.as_mut() else {
            return SelectOutcome::NoHandler;
        };
        if !screen.is_lookup() {
            return SelectOutcome::NotLookupMode;
        }

        let mut selection = screen.selection();
        selection.iter_mut().for_each(Entity::strip_subscriptions);
        if let Some(validator) = &self.validator {
            if !validator(&selection) {
                info!(
                    "event=lookup_select module=screen status=rejected count={}",
                    selection.len()
                );
                return SelectOutcome::Rejected;
            }
        }

        match screen.close_for_selection() {
            CloseOutcome::Closed(CloseIntent::Select) => {
                let count = selection.len();
                handler(selection);
                info!("event=lookup_select module=screen status=ok count={count}");
                SelectOutcome::Selected(count)
            }
            other => {
                info!("event=lookup_select module=screen status=close_vetoed outcome={other:?}");
                SelectOutcome::CloseVetoed
            }
        }
    }
}
