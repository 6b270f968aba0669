//! Data containers edited by screens.
//!
//! # Responsibility
//! - Hold the current entity snapshot(s) of a screen and the pending
//!   create/update/delete sets accumulated while editing.
//! - Model nested composition: a child container whose rows are a
//!   composition property of its parent's current item.
//!
//! # Invariants
//! - A container's parent link is set at most once and never reassigned.
//! - Parent links never form a cycle.
//! - `to_create` and `to_delete` never contain the same reference.

use crate::model::entity::EntityRef;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod tree;

pub use tree::{Container, ContainerTree, ParentContainerView, ParentLink, TrackingSuspension};

/// Arena index of one container inside its tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContainerId(pub(crate) usize);

impl ContainerId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl Display for ContainerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Shape of the data a container holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    /// Zero or one current entity.
    Item,
    /// Ordered rows with an optional selected row acting as current entity.
    Collection,
}

/// Declared nesting of a container under a parent's composition property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NestedLink {
    pub parent: String,
    pub property: String,
}

/// Declaration of one container, as found in a screen descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub entity_type: String,
    pub kind: ContainerKind,
    /// Falls back to the configured default plan when `None`.
    pub fetch_plan: Option<String>,
    pub nested: Option<NestedLink>,
}

impl ContainerSpec {
    pub fn item(name: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self::new(name, entity_type, ContainerKind::Item)
    }

    pub fn collection(name: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self::new(name, entity_type, ContainerKind::Collection)
    }

    fn new(name: impl Into<String>, entity_type: impl Into<String>, kind: ContainerKind) -> Self {
        Self {
            name: name.into(),
            entity_type: entity_type.into(),
            kind,
            fetch_plan: None,
            nested: None,
        }
    }

    pub fn nested_in(mut self, parent: impl Into<String>, property: impl Into<String>) -> Self {
        self.nested = Some(NestedLink {
            parent: parent.into(),
            property: property.into(),
        });
        self
    }

    pub fn with_fetch_plan(mut self, fetch_plan: impl Into<String>) -> Self {
        self.fetch_plan = Some(fetch_plan.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerError {
    DuplicateName(String),
    UnknownContainer(String),
    UnknownId(ContainerId),
    ParentAlreadySet(ContainerId),
    CycleDetected {
        child: ContainerId,
        parent: ContainerId,
    },
    KindMismatch {
        container: ContainerId,
        expected: ContainerKind,
    },
    ItemNotFound {
        container: ContainerId,
        reference: EntityRef,
    },
    NoCurrentItem(ContainerId),
}

impl Display for ContainerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateName(name) => write!(f, "container name already used: {name}"),
            Self::UnknownContainer(name) => write!(f, "container not found: {name}"),
            Self::UnknownId(id) => write!(f, "container id not found: {id}"),
            Self::ParentAlreadySet(id) => write!(f, "container {id} already has a parent"),
            Self::CycleDetected { child, parent } => {
                write!(f, "nesting {child} under {parent} would create a cycle")
            }
            Self::KindMismatch {
                container,
                expected,
            } => write!(f, "container {container} is not a {expected:?} container"),
            Self::ItemNotFound {
                container,
                reference,
            } => write!(f, "container {container} does not hold {reference}"),
            Self::NoCurrentItem(id) => write!(f, "container {id} has no current item"),
        }
    }
}

impl Error for ContainerError {}
