mod common;

use common::{order, order_editor, order_lookup, Fixture};
use editflow_core::model::entity::{Entity, EntityKey};
use editflow_core::screen::{
    CloseIntent, NoHooks, OpenRequest, ScreenLifecycle, ScreenMode, ScreenState, SelectAction,
    SelectOutcome,
};
use editflow_core::{ContainerError, ScreenError};
use std::cell::RefCell;
use std::rc::Rc;

fn open_lookup(fixture: &Fixture, rows: Vec<Entity>) -> ScreenLifecycle<NoHooks> {
    let mut screen = ScreenLifecycle::new(order_lookup(), fixture.session("alice"), NoHooks).unwrap();
    screen.open_lookup(rows).unwrap();
    screen
}

fn capture() -> (Rc<RefCell<Vec<Entity>>>, SelectAction) {
    let received = Rc::new(RefCell::new(Vec::new()));
    let sink = received.clone();
    let action = SelectAction::new().with_handler(move |selection| sink.borrow_mut().extend(selection));
    (received, action)
}

#[test]
fn select_closes_lookup_then_hands_over_stripped_selection() {
    let fixture = Fixture::new();
    let first = fixture.seed(order("L-1"));
    let second = fixture.seed(order("L-2"));
    let mut screen = open_lookup(&fixture, vec![first, second.clone()]);
    assert_eq!(screen.mode(), ScreenMode::Lookup);
    screen.set_selection(&[second.key]).unwrap();

    let (received, mut action) = capture();
    assert_eq!(action.invoke(&mut screen), SelectOutcome::Selected(1));

    assert_eq!(screen.state(), ScreenState::Closed);
    let result = screen.close_result().unwrap();
    assert_eq!(result.intent, CloseIntent::Select);
    let received = received.borrow();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].key, second.key);
    assert!(!received[0].has_subscriptions());
    assert!(fixture.store.is_empty().unwrap());
}

#[test]
fn select_without_handler_does_nothing() {
    let fixture = Fixture::new();
    let first = fixture.seed(order("L-3"));
    let mut screen = open_lookup(&fixture, vec![first.clone()]);
    screen.set_selection(&[first.key]).unwrap();

    assert_eq!(
        SelectAction::new().invoke(&mut screen),
        SelectOutcome::NoHandler
    );
    assert_eq!(screen.state(), ScreenState::Editing);
    assert!(screen.close_result().is_none());
}

#[test]
fn rejected_selection_keeps_lookup_open() {
    let fixture = Fixture::new();
    let first = fixture.seed(order("L-4"));
    let mut screen = open_lookup(&fixture, vec![first.clone()]);
    screen.set_selection(&[first.key]).unwrap();

    let (received, action) = capture();
    let mut action = action.with_validator(|selection| selection.len() > 1);
    assert_eq!(action.invoke(&mut screen), SelectOutcome::Rejected);
    assert_eq!(screen.state(), ScreenState::Editing);
    assert!(received.borrow().is_empty());
}

#[test]
fn select_on_editor_screen_is_ignored() {
    let fixture = Fixture::new();
    let stored = fixture.seed(order("L-5"));
    let mut screen = ScreenLifecycle::new(order_editor(), fixture.session("alice"), NoHooks).unwrap();
    screen.open_editor(OpenRequest::new(stored)).unwrap();

    let (received, mut action) = capture();
    assert_eq!(action.invoke(&mut screen), SelectOutcome::NotLookupMode);
    assert_eq!(screen.state(), ScreenState::Editing);
    assert!(received.borrow().is_empty());
}

#[test]
fn unknown_selection_key_is_rejected() {
    let fixture = Fixture::new();
    let first = fixture.seed(order("L-6"));
    let mut screen = open_lookup(&fixture, vec![first]);

    let err = screen.set_selection(&[EntityKey::new_v4()]).unwrap_err();
    assert!(matches!(
        err,
        ScreenError::Container(ContainerError::ItemNotFound { .. })
    ));
}
