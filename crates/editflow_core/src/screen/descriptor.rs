//! Static description of a screen and construction-time checks.
//!
//! # Invariants
//! - A screen is never constructed from a descriptor that names a missing
//!   container, component or entity class; those are programming errors and
//!   fail immediately.

use super::lifecycle::ScreenState;
use super::traversal::ComponentNode;
use crate::commit::DataServiceError;
use crate::container::{ContainerError, ContainerId, ContainerSpec, ContainerTree};
use crate::model::entity::EntityRef;
use crate::model::metadata::Metadata;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub const DEFAULT_COMMIT_ACTION: &str = "windowCommit";

#[derive(Debug)]
pub enum ScreenError {
    MissingContainer(String),
    MissingComponent(String),
    UnknownClass(String),
    Container(ContainerError),
    ReloadFailed(DataServiceError),
    EntityNotFound(EntityRef),
    CommitFailed(DataServiceError),
    InvalidState {
        operation: &'static str,
        state: ScreenState,
    },
}

impl Display for ScreenError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingContainer(name) => write!(f, "screen declares no container named {name}"),
            Self::MissingComponent(id) => write!(f, "screen declares no component with id {id}"),
            Self::UnknownClass(name) => write!(f, "entity class not registered: {name}"),
            Self::Container(err) => write!(f, "{err}"),
            Self::ReloadFailed(err) => write!(f, "failed to reload item: {err}"),
            Self::EntityNotFound(reference) => write!(f, "entity no longer exists: {reference}"),
            Self::CommitFailed(err) => write!(f, "commit failed: {err}"),
            Self::InvalidState { operation, state } => {
                write!(f, "cannot {operation} while screen is {state:?}")
            }
        }
    }
}

impl Error for ScreenError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Container(err) => Some(err),
            Self::ReloadFailed(err) | Self::CommitFailed(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ContainerError> for ScreenError {
    fn from(value: ContainerError) -> Self {
        Self::Container(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenDescriptor {
    pub id: String,
    pub containers: Vec<ContainerSpec>,
    /// Container holding the edited item, or the rows of a browse/lookup.
    pub root_container: String,
    pub components: ComponentNode,
    /// Components the screen's code refers to by id.
    pub required_components: Vec<String>,
    pub commit_action: String,
    /// List pane of a combined browse/edit screen.
    pub browse_pane: Option<String>,
}

impl ScreenDescriptor {
    pub fn new(id: impl Into<String>, root_container: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            components: ComponentNode::new(id.clone())
                .with_child(ComponentNode::new(DEFAULT_COMMIT_ACTION)),
            id,
            containers: Vec::new(),
            root_container: root_container.into(),
            required_components: Vec::new(),
            commit_action: DEFAULT_COMMIT_ACTION.to_string(),
            browse_pane: None,
        }
    }

    pub fn container(mut self, spec: ContainerSpec) -> Self {
        self.containers.push(spec);
        self
    }

    pub fn component(mut self, node: ComponentNode) -> Self {
        self.components.children.push(node);
        self
    }

    pub fn require_component(mut self, id: impl Into<String>) -> Self {
        self.required_components.push(id.into());
        self
    }

    pub fn browse_pane(mut self, id: impl Into<String>) -> Self {
        self.browse_pane = Some(id.into());
        self
    }

    /// Checks the descriptor and builds the screen's container tree.
    pub fn build_tree(&self, metadata: &Metadata) -> Result<(ContainerTree, ContainerId), ScreenError> {
        if let Some(spec) = self
            .containers
            .iter()
            .find(|spec| metadata.class(&spec.entity_type).is_none())
        {
            return Err(ScreenError::UnknownClass(spec.entity_type.clone()));
        }
        let referenced = self
            .required_components
            .iter()
            .chain(std::iter::once(&self.commit_action))
            .chain(self.browse_pane.iter());
        for id in referenced {
            if !self.components.contains(id) {
                return Err(ScreenError::MissingComponent(id.clone()));
            }
        }

        let tree = ContainerTree::from_specs(&self.containers)?;
        let root = tree
            .id_of(&self.root_container)
            .ok_or_else(|| ScreenError::MissingContainer(self.root_container.clone()))?;
        Ok((tree, root))
    }
}
