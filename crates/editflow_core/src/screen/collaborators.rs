//! Collaborators injected into screens at construction.
//!
//! Screens never look collaborators up on their own; everything they call
//! outside the core arrives through [`Collaborators`].

use crate::commit::{DataService, ListUpdate};
use crate::config::EditorConfig;
use crate::lock::LockCoordinator;
use crate::model::metadata::Metadata;
use log::{error, info, warn};
use std::sync::Arc;

/// Permission verdicts; only the boolean answer is consumed.
pub trait PermissionChecker: Send + Sync {
    fn is_update_permitted(&self, entity_type: &str) -> bool;

    fn is_create_permitted(&self, entity_type: &str) -> bool {
        self.is_update_permitted(entity_type)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl PermissionChecker for AllowAll {
    fn is_update_permitted(&self, _: &str) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Info,
    Warning,
    Error,
}

/// Fire-and-forget user notifications.
pub trait Notifier: Send + Sync {
    fn notify(&self, kind: NotificationKind, title: &str, body: &str);
}

/// Writes notifications to the log; used by headless hosts.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, kind: NotificationKind, title: &str, body: &str) {
        match kind {
            NotificationKind::Info => info!("event=notify module=screen kind=info title={title:?} body={body:?}"),
            NotificationKind::Warning => {
                warn!("event=notify module=screen kind=warning title={title:?} body={body:?}")
            }
            NotificationKind::Error => {
                error!("event=notify module=screen kind=error title={title:?} body={body:?}")
            }
        }
    }
}

/// Browse/list view that displayed the edited item.
pub trait ListViewSync: Send + Sync {
    fn apply(&self, update: &ListUpdate);
}

#[derive(Clone)]
pub struct Collaborators {
    pub data: Arc<dyn DataService>,
    pub permissions: Arc<dyn PermissionChecker>,
    pub notifier: Arc<dyn Notifier>,
    pub locks: Arc<LockCoordinator>,
    pub metadata: Arc<Metadata>,
    pub config: Arc<EditorConfig>,
}
