#![allow(dead_code)]

use editflow_core::commit::{CommitResult, DataResult, DataService, DataServiceError, SaveRequest};
use editflow_core::lock::{InMemoryLockStore, LockCoordinator, LockStore, SessionIdentity};
use editflow_core::model::entity::{Entity, EntityRef, Value};
use editflow_core::model::metadata::{MetaClass, Metadata};
use editflow_core::screen::{
    AllowAll, Collaborators, NotificationKind, Notifier, PermissionChecker,
};
use editflow_core::{ContainerSpec, EditorConfig, InMemoryDataService, ScreenDescriptor};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

pub fn metadata() -> Arc<Metadata> {
    let mut metadata = Metadata::new();
    metadata
        .register(MetaClass::new("Address").data("city"))
        .unwrap();
    metadata
        .register(MetaClass::new("OrderLine").data("product").data("quantity"))
        .unwrap();
    metadata
        .register(
            MetaClass::new("Order")
                .required("number")
                .data("customer")
                .association("address", "Address")
                .composition("lines", "OrderLine"),
        )
        .unwrap();
    metadata
        .register(MetaClass::new("ExtOrder").extending("Order"))
        .unwrap();
    Arc::new(metadata)
}

pub fn order_editor() -> ScreenDescriptor {
    ScreenDescriptor::new("order-edit", "orderDs")
        .container(ContainerSpec::item("orderDs", "Order"))
        .container(ContainerSpec::collection("linesDs", "OrderLine").nested_in("orderDs", "lines"))
}

pub fn order_lookup() -> ScreenDescriptor {
    ScreenDescriptor::new("order-lookup", "ordersDs")
        .container(ContainerSpec::collection("ordersDs", "Order"))
}

pub fn order_line_editor() -> ScreenDescriptor {
    ScreenDescriptor::new("order-line-edit", "lineDs")
        .container(ContainerSpec::item("lineDs", "OrderLine"))
}

pub fn order(number: &str) -> Entity {
    Entity::new("Order").with("number", Value::text(number))
}

pub fn line(product: &str) -> Entity {
    Entity::new("OrderLine")
        .with("product", Value::text(product))
        .with("quantity", Value::Integer(1))
}

#[derive(Default)]
pub struct RecordingNotifier {
    seen: Mutex<Vec<(NotificationKind, String)>>,
}

impl RecordingNotifier {
    pub fn titles(&self) -> Vec<String> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .map(|(_, title)| title.clone())
            .collect()
    }

    pub fn count(&self, kind: NotificationKind) -> usize {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .filter(|(seen, _)| *seen == kind)
            .count()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, kind: NotificationKind, title: &str, _body: &str) {
        self.seen.lock().unwrap().push((kind, title.to_string()));
    }
}

/// Denies updates for the listed entity types.
#[derive(Default)]
pub struct ScriptedPermissions {
    read_only_types: BTreeSet<String>,
}

impl ScriptedPermissions {
    pub fn deny(entity_type: &str) -> Self {
        Self {
            read_only_types: [entity_type.to_string()].into_iter().collect(),
        }
    }
}

impl PermissionChecker for ScriptedPermissions {
    fn is_update_permitted(&self, entity_type: &str) -> bool {
        !self.read_only_types.contains(entity_type)
    }
}

/// Reloads from an inner store but rejects every commit.
pub struct FailingDataService {
    pub inner: InMemoryDataService,
}

impl DataService for FailingDataService {
    fn reload(&self, reference: &EntityRef, fetch_plan: &str) -> DataResult<Option<Entity>> {
        self.inner.reload(reference, fetch_plan)
    }

    fn commit(&self, _request: &SaveRequest) -> DataResult<CommitResult> {
        Err(DataServiceError::Backend("connection reset".to_string()))
    }
}

/// Hands out every reloaded entity as an instance of `extension`.
pub struct ExtendingDataService {
    pub inner: Arc<InMemoryDataService>,
    pub extension: &'static str,
}

impl DataService for ExtendingDataService {
    fn reload(&self, reference: &EntityRef, fetch_plan: &str) -> DataResult<Option<Entity>> {
        Ok(self
            .inner
            .reload(reference, fetch_plan)?
            .map(|entity| entity.copy_as(self.extension)))
    }

    fn commit(&self, request: &SaveRequest) -> DataResult<CommitResult> {
        self.inner.commit(request)
    }
}

pub struct Fixture {
    pub data: Arc<InMemoryDataService>,
    pub notifier: Arc<RecordingNotifier>,
    pub store: Arc<InMemoryLockStore>,
    pub metadata: Arc<Metadata>,
    pub config: EditorConfig,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            data: Arc::new(InMemoryDataService::new()),
            notifier: Arc::new(RecordingNotifier::default()),
            store: Arc::new(InMemoryLockStore::new()),
            metadata: metadata(),
            config: EditorConfig::default(),
        }
    }

    pub fn seed(&self, entity: Entity) -> Entity {
        self.data.seed(entity).unwrap()
    }

    pub fn coordinator(&self, user: &str) -> Arc<LockCoordinator> {
        let store: Arc<dyn LockStore> = self.store.clone();
        Arc::new(LockCoordinator::from_config(
            store,
            SessionIdentity::new(user),
            self.metadata.clone(),
            &self.config,
        ))
    }

    /// Collaborators for one session of `user`.
    pub fn session(&self, user: &str) -> Collaborators {
        self.session_with(user, self.data.clone(), Arc::new(AllowAll))
    }

    pub fn session_with(
        &self,
        user: &str,
        data: Arc<dyn DataService>,
        permissions: Arc<dyn PermissionChecker>,
    ) -> Collaborators {
        Collaborators {
            data,
            permissions,
            notifier: self.notifier.clone(),
            locks: self.coordinator(user),
            metadata: self.metadata.clone(),
            config: Arc::new(self.config.clone()),
        }
    }
}
