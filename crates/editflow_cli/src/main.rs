//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `editflow_core` linkage end to end: lock contention between two
//!   sessions and one edit/commit round trip.
//! - Keep output deterministic for quick local sanity checks.

use editflow_core::lock::{InMemoryLockStore, LockStore};
use editflow_core::screen::{
    AllowAll, Collaborators, LogNotifier, NoHooks, OpenRequest, ScreenLifecycle,
};
use editflow_core::{
    init_logging, CloseIntent, CommitOutcome, ContainerSpec, Entity, EditorConfig,
    InMemoryDataService, LockCoordinator, LockResult, MetaClass, Metadata, ScreenDescriptor,
    SessionIdentity, SqliteLockStore, Value,
};
use log::info;
use std::error::Error;
use std::sync::Arc;
use uuid::Uuid;

fn main() -> Result<(), Box<dyn Error>> {
    let config = EditorConfig::default();
    init_logging(&config.logging)?;
    println!("editflow_core version={}", editflow_core::core_version());

    let mut metadata = Metadata::new();
    metadata.register(MetaClass::new("Order").required("number").data("customer"))?;
    let metadata = Arc::new(metadata);

    lock_probe(&metadata)?;
    edit_probe(metadata, config)?;
    Ok(())
}

/// Two sessions contend for one lock in a shared in-memory SQLite store.
fn lock_probe(metadata: &Arc<Metadata>) -> Result<(), Box<dyn Error>> {
    let store: Arc<dyn LockStore> = Arc::new(SqliteLockStore::open_in_memory()?);
    let alice = LockCoordinator::new(store.clone(), SessionIdentity::new("alice"), metadata.clone());
    let bob = LockCoordinator::new(store, SessionIdentity::new("bob"), metadata.clone());
    let id = Uuid::new_v4();

    let first = alice.acquire("Order", id)?;
    println!("lock alice acquired={}", matches!(first, LockResult::Acquired(_)));
    match bob.acquire("Order", id)? {
        LockResult::HeldBy { holder, .. } => println!("lock bob held_by={holder}"),
        other => println!("lock bob unexpected={other:?}"),
    }
    alice.release("Order", id)?;
    let retry = bob.acquire("Order", id)?;
    println!("lock bob acquired_after_release={}", matches!(retry, LockResult::Acquired(_)));
    Ok(())
}

/// Opens an editor on a stored order, edits it and commits.
fn edit_probe(metadata: Arc<Metadata>, config: EditorConfig) -> Result<(), Box<dyn Error>> {
    let data = Arc::new(InMemoryDataService::new());
    let stored = data.seed(Entity::new("Order").with("number", Value::text("CLI-1")))?;
    let store: Arc<dyn LockStore> = Arc::new(InMemoryLockStore::new());
    let collaborators = Collaborators {
        data: data.clone(),
        permissions: Arc::new(AllowAll),
        notifier: Arc::new(LogNotifier),
        locks: Arc::new(LockCoordinator::from_config(
            store,
            SessionIdentity::new("cli"),
            metadata.clone(),
            &config,
        )),
        metadata,
        config: Arc::new(config),
    };
    let descriptor = ScreenDescriptor::new("order-edit", "orderDs")
        .container(ContainerSpec::item("orderDs", "Order"));

    let mut screen = ScreenLifecycle::new(descriptor, collaborators, NoHooks)?;
    let state = screen.open_editor(OpenRequest::new(stored))?;
    println!("editor state={state:?} locked={}", screen.holds_lock());

    let root = screen.root();
    screen
        .tree_mut()
        .set_attribute(root, "customer", Value::text("ACME"))?;
    match screen.commit()? {
        CommitOutcome::Committed(report) => {
            let version = report.root_item.and_then(|item| item.version);
            println!("editor committed persisted={} version={version:?}", report.persisted);
        }
        other => println!("editor commit blocked outcome={other:?}"),
    }
    let closed = screen.request_close(CloseIntent::Cancel)?;
    println!("editor close={closed:?} commits={}", data.commit_count());
    info!("event=cli_probe module=cli status=ok");
    Ok(())
}
