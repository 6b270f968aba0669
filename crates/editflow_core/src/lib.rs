//! Core editing-screen coordination for EditFlow.
//! This crate owns the lock, container, validation and commit invariants
//! every screen relies on.

pub mod commit;
pub mod config;
pub mod container;
pub mod db;
pub mod lock;
pub mod logging;
pub mod model;
pub mod screen;
pub mod validation;

pub use commit::{
    CommitCoordinator, CommitError, CommitReport, DataService, DataServiceError,
    InMemoryDataService, ListUpdate, SaveRequest,
};
pub use config::{ConfigError, EditorConfig, LoggingConfig};
pub use container::{ContainerError, ContainerId, ContainerKind, ContainerSpec, ContainerTree};
pub use lock::{
    EditLock, EditLockOutcome, InMemoryLockStore, LockCoordinator, LockResult, LockStore,
    SessionIdentity, SqliteLockStore,
};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::entity::{Entity, EntityKey, EntityRef, Value};
pub use model::metadata::{MetaClass, Metadata};
pub use model::validation::{ValidationError, ValidationErrors};
pub use screen::{
    CloseIntent, CloseOutcome, Collaborators, CombinedBrowseEditController, CommitOutcome,
    OpenRequest, ScreenDescriptor, ScreenError, ScreenLifecycle, ScreenState, SelectAction,
};
pub use validation::ValidationPipeline;

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
