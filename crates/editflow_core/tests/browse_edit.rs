mod common;

use common::{line, order, Fixture};
use editflow_core::model::entity::{Entity, Value};
use editflow_core::screen::{
    CloseIntent, CloseOutcome, CombinedBrowseEditController, CommitOutcome, ComponentAction,
    ComponentNode, EditorHooks, Lockable, NoHooks, ReadOnlyReason, ScreenDescriptor, ScreenState,
    UnsavedChangesDecision,
};
use editflow_core::{ContainerError, ContainerSpec, ListUpdate, ScreenError};

#[derive(Default)]
struct SettingsCounter {
    saved: usize,
}

impl EditorHooks for SettingsCounter {
    fn save_settings(&mut self) {
        self.saved += 1;
    }
}

fn order_browser() -> ScreenDescriptor {
    ScreenDescriptor::new("order-browse", "ordersDs")
        .container(ContainerSpec::collection("ordersDs", "Order"))
        .container(ContainerSpec::collection("linesDs", "OrderLine").nested_in("ordersDs", "lines"))
        .component(ComponentNode::new("ordersTable"))
        .component(
            ComponentNode::new("form")
                .with_child(ComponentNode::field("numberField"))
                .with_child(ComponentNode::field("customerField")),
        )
        .browse_pane("ordersTable")
}

fn action(plan: &[(String, ComponentAction)], id: &str) -> Option<ComponentAction> {
    plan.iter()
        .find(|(component, _)| component == id)
        .map(|(_, action)| *action)
}

#[test]
fn item_container_root_is_rejected() {
    let fixture = Fixture::new();
    let descriptor = ScreenDescriptor::new("order-browse", "orderDs")
        .container(ContainerSpec::item("orderDs", "Order"));

    let err = CombinedBrowseEditController::new(descriptor, fixture.session("alice"), NoHooks)
        .err()
        .unwrap();
    assert!(matches!(
        err,
        ScreenError::Container(ContainerError::KindMismatch { .. })
    ));
}

#[test]
fn editing_disables_browse_pane_and_cancel_restores_row() {
    let fixture = Fixture::new();
    let first = fixture.seed(order("A-1"));
    let second = fixture.seed(order("A-2"));

    let mut screen =
        CombinedBrowseEditController::new(order_browser(), fixture.session("alice"), NoHooks).unwrap();
    screen.set_rows(vec![first.clone(), second.clone()]).unwrap();
    screen.select(Some(first.key)).unwrap();
    assert_eq!(
        action(&screen.component_plan(), "ordersTable"),
        Some(ComponentAction::Enable)
    );
    assert_eq!(
        action(&screen.component_plan(), "numberField"),
        Some(ComponentAction::Disable)
    );

    assert_eq!(screen.edit_selected().unwrap(), ScreenState::Editing);
    assert!(screen.is_editing());
    assert!(!screen.is_browse_enabled());
    assert_eq!(fixture.store.len().unwrap(), 1);
    let plan = screen.component_plan();
    assert_eq!(action(&plan, "ordersTable"), Some(ComponentAction::Disable));
    assert_eq!(action(&plan, "numberField"), Some(ComponentAction::Enable));
    assert_eq!(action(&plan, "windowCommit"), Some(ComponentAction::Enable));
    assert!(matches!(
        screen.select(Some(second.key)),
        Err(ScreenError::InvalidState { .. })
    ));

    let browse = screen.browse_container();
    screen
        .tree_mut()
        .set_attribute(browse, "customer", Value::text("ACME"))
        .unwrap();
    screen.cancel().unwrap();

    assert!(!screen.is_editing());
    assert!(screen.is_browse_enabled());
    assert!(!screen.tree().any_modified(browse));
    assert!(fixture.store.is_empty().unwrap());
    let selected = screen.selected().unwrap();
    assert_eq!(selected.key, first.key);
    assert_eq!(selected.get("customer"), None);
    assert_eq!(screen.rows().len(), 2);
}

#[test]
fn save_replaces_row_in_list_and_releases_lock() {
    let fixture = Fixture::new();
    let stored = fixture.seed(order("B-1"));

    let mut screen =
        CombinedBrowseEditController::new(order_browser(), fixture.session("alice"), NoHooks).unwrap();
    screen.set_rows(vec![stored.clone()]).unwrap();
    screen.select(Some(stored.key)).unwrap();
    screen.edit_selected().unwrap();
    let browse = screen.browse_container();
    screen
        .tree_mut()
        .set_attribute(browse, "customer", Value::text("Globex"))
        .unwrap();

    let CommitOutcome::Committed(report) = screen.save().unwrap() else {
        panic!("expected a committed outcome");
    };
    assert!(matches!(report.list_update, Some(ListUpdate::Replace(_))));
    assert!(!screen.is_editing());
    assert!(fixture.store.is_empty().unwrap());
    assert_eq!(fixture.data.commit_count(), 1);

    assert_eq!(screen.rows().len(), 1);
    let selected = screen.selected().unwrap();
    assert_eq!(selected.version, Some(2));
    assert_eq!(selected.get("customer"), Some(&Value::text("Globex")));
}

#[test]
fn editing_a_brief_row_keeps_its_stored_lines_through_save() {
    let fixture = Fixture::new();
    let nut = fixture.seed(line("Nut"));
    let bolt = fixture.seed(line("Bolt"));
    let stored = fixture.seed(order("J-1").with("lines", Value::Composition(vec![nut, bolt])));
    let brief =
        Entity::with_key("Order", stored.key, stored.version).with("number", Value::text("J-1"));

    let mut screen =
        CombinedBrowseEditController::new(order_browser(), fixture.session("alice"), NoHooks).unwrap();
    screen.set_rows(vec![brief]).unwrap();
    screen.select(Some(stored.key)).unwrap();
    let lines = screen.tree().id_of("linesDs").unwrap();
    assert!(screen.tree().container(lines).unwrap().rows().is_empty());

    screen.edit_selected().unwrap();
    assert_eq!(screen.tree().container(lines).unwrap().rows().len(), 2);

    screen.tree_mut().add_item(lines, line("Washer")).unwrap();
    assert!(screen.save().unwrap().is_success());

    let saved = fixture.data.stored(&stored.reference()).unwrap().unwrap();
    assert_eq!(saved.composition("lines").map(<[Entity]>::len), Some(3));
    assert_eq!(screen.tree().container(lines).unwrap().rows().len(), 3);
}

#[test]
fn cancelled_edit_reloads_nested_lines_of_the_row() {
    let fixture = Fixture::new();
    let nut = fixture.seed(line("Nut"));
    let stored = fixture.seed(order("J-2").with("lines", Value::Composition(vec![nut.clone()])));

    let mut screen =
        CombinedBrowseEditController::new(order_browser(), fixture.session("alice"), NoHooks).unwrap();
    screen.set_rows(vec![stored.clone()]).unwrap();
    screen.select(Some(stored.key)).unwrap();
    screen.edit_selected().unwrap();
    let lines = screen.tree().id_of("linesDs").unwrap();
    screen.tree_mut().remove_item(lines, &nut.reference()).unwrap();
    assert!(screen.tree().container(lines).unwrap().rows().is_empty());

    screen.cancel().unwrap();
    let rows = screen.tree().container(lines).unwrap().rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].key, nut.key);
}

#[test]
fn cancelled_create_removes_row_and_restores_selection() {
    let fixture = Fixture::new();
    let stored = fixture.seed(order("C-1"));

    let mut screen =
        CombinedBrowseEditController::new(order_browser(), fixture.session("alice"), NoHooks).unwrap();
    screen.set_rows(vec![stored.clone()]).unwrap();
    screen.select(Some(stored.key)).unwrap();

    let created = screen.create().unwrap();
    assert_eq!(screen.rows().len(), 2);
    assert_eq!(screen.selected().unwrap().key, created);
    assert!(fixture.store.is_empty().unwrap());

    screen.cancel().unwrap();
    assert_eq!(screen.rows().len(), 1);
    assert_eq!(screen.selected().unwrap().key, stored.key);
    assert!(!screen.tree().any_modified(screen.browse_container()));

    let created = screen.create().unwrap();
    let browse = screen.browse_container();
    screen
        .tree_mut()
        .set_attribute(browse, "number", Value::text("C-2"))
        .unwrap();
    let CommitOutcome::Committed(report) = screen.save().unwrap() else {
        panic!("expected a committed outcome");
    };
    assert!(matches!(report.list_update, Some(ListUpdate::Insert(_))));
    assert_eq!(screen.rows().len(), 2);
    assert_eq!(screen.selected().unwrap().key, created);
    assert_eq!(screen.selected().unwrap().version, Some(1));
}

#[test]
fn row_locked_elsewhere_is_edited_read_only() {
    let fixture = Fixture::new();
    let stored = fixture.seed(order("D-1"));

    let mut alice =
        CombinedBrowseEditController::new(order_browser(), fixture.session("alice"), NoHooks).unwrap();
    alice.set_rows(vec![stored.clone()]).unwrap();
    alice.select(Some(stored.key)).unwrap();
    alice.edit_selected().unwrap();

    let mut bob =
        CombinedBrowseEditController::new(order_browser(), fixture.session("bob"), NoHooks).unwrap();
    bob.set_rows(vec![stored.clone()]).unwrap();
    bob.select(Some(stored.key)).unwrap();
    assert_eq!(bob.edit_selected().unwrap(), ScreenState::ReadOnlyLocked);
    assert!(matches!(
        bob.read_only_reason(),
        Some(ReadOnlyReason::LockedBy { holder, .. }) if holder == "alice"
    ));
    assert!(matches!(bob.save().unwrap(), CommitOutcome::ReadOnly));

    let plan = bob.component_plan();
    assert_eq!(action(&plan, "numberField"), Some(ComponentAction::Disable));
    assert_eq!(action(&plan, "windowCommit"), Some(ComponentAction::Disable));

    assert_eq!(
        bob.close(CloseIntent::Cancel).unwrap(),
        CloseOutcome::Closed(CloseIntent::Cancel)
    );
    assert_eq!(fixture.store.len().unwrap(), 1);
}

#[test]
fn close_with_unsaved_edit_asks_then_discards() {
    let fixture = Fixture::new();
    let stored = fixture.seed(order("E-1"));

    let mut screen = CombinedBrowseEditController::new(
        order_browser(),
        fixture.session("alice"),
        SettingsCounter::default(),
    )
    .unwrap();
    screen.set_rows(vec![stored.clone()]).unwrap();
    screen.select(Some(stored.key)).unwrap();
    screen.edit_selected().unwrap();
    let browse = screen.browse_container();
    screen
        .tree_mut()
        .set_attribute(browse, "customer", Value::text("Umbrella"))
        .unwrap();

    assert_eq!(
        screen.close(CloseIntent::Cancel).unwrap(),
        CloseOutcome::AwaitingDecision
    );
    assert!(screen.is_editing());
    assert_eq!(screen.hooks().saved, 0);

    assert_eq!(
        screen.close(CloseIntent::Discard).unwrap(),
        CloseOutcome::Closed(CloseIntent::Discard)
    );
    assert_eq!(screen.state(), ScreenState::Closed);
    assert_eq!(
        screen.close(CloseIntent::Cancel).unwrap(),
        CloseOutcome::AlreadyClosed
    );
    assert_eq!(screen.hooks().saved, 1);
    assert!(fixture.store.is_empty().unwrap());
    assert_eq!(fixture.data.commit_count(), 0);
}

#[test]
fn suspended_close_waits_for_decision() {
    let fixture = Fixture::new();
    let stored = fixture.seed(order("E-2"));

    let mut screen = CombinedBrowseEditController::new(
        order_browser(),
        fixture.session("alice"),
        SettingsCounter::default(),
    )
    .unwrap();
    screen.set_rows(vec![stored.clone()]).unwrap();
    screen.select(Some(stored.key)).unwrap();
    screen.edit_selected().unwrap();
    let browse = screen.browse_container();
    screen
        .tree_mut()
        .set_attribute(browse, "customer", Value::text("Wayne"))
        .unwrap();

    assert_eq!(
        screen.close(CloseIntent::Cancel).unwrap(),
        CloseOutcome::AwaitingDecision
    );
    assert_eq!(screen.state(), ScreenState::Closing);
    assert_eq!(
        screen.close(CloseIntent::Unknown).unwrap(),
        CloseOutcome::AwaitingDecision
    );
    assert_eq!(
        screen.resolve_close(UnsavedChangesDecision::StayOpen).unwrap(),
        CloseOutcome::StayedOpen
    );
    assert_eq!(screen.state(), ScreenState::Editing);
    assert!(screen.is_editing());

    screen.close(CloseIntent::Cancel).unwrap();
    assert!(screen.cancel_pending_close());
    assert!(!screen.cancel_pending_close());
    assert_eq!(screen.state(), ScreenState::Editing);

    screen.close(CloseIntent::Cancel).unwrap();
    assert_eq!(
        screen
            .resolve_close(UnsavedChangesDecision::CommitAndClose)
            .unwrap(),
        CloseOutcome::Closed(CloseIntent::Commit)
    );
    assert_eq!(screen.state(), ScreenState::Closed);
    assert_eq!(screen.hooks().saved, 1);
    let saved = fixture.data.stored(&stored.reference()).unwrap().unwrap();
    assert_eq!(saved.get("customer"), Some(&Value::text("Wayne")));
    assert!(fixture.store.is_empty().unwrap());
    assert!(matches!(
        screen.resolve_close(UnsavedChangesDecision::StayOpen),
        Err(ScreenError::InvalidState { .. })
    ));
}

#[test]
fn close_with_commit_intent_saves_first() {
    let fixture = Fixture::new();
    let stored = fixture.seed(order("F-1"));

    let mut screen =
        CombinedBrowseEditController::new(order_browser(), fixture.session("alice"), NoHooks).unwrap();
    screen.set_rows(vec![stored.clone()]).unwrap();
    screen.select(Some(stored.key)).unwrap();
    screen.edit_selected().unwrap();
    let browse = screen.browse_container();
    screen
        .tree_mut()
        .set_attribute(browse, "customer", Value::text("Soylent"))
        .unwrap();

    assert_eq!(
        screen.close(CloseIntent::Commit).unwrap(),
        CloseOutcome::Closed(CloseIntent::Commit)
    );
    let saved = fixture.data.stored(&stored.reference()).unwrap().unwrap();
    assert_eq!(saved.get("customer"), Some(&Value::text("Soylent")));
    assert!(fixture.store.is_empty().unwrap());
}
