//! Entity class metadata.
//!
//! # Responsibility
//! - Describe entity classes, their properties and property kinds.
//! - Resolve type extension so lock keys use the original class name.
//!
//! # Invariants
//! - Class names are unique and match `[A-Za-z_][A-Za-z0-9_$.]*`.
//! - A class may only extend a class registered before it, so extension
//!   chains are acyclic.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

static CLASS_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_$.]*$").expect("valid class name regex"));

/// How a property relates its owner to the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyKind {
    /// Scalar value.
    Data,
    /// Reference to an independently owned entity.
    Association,
    /// Owned child collection; child lifetime is bound to the owner.
    Composition,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaProperty {
    pub name: String,
    pub kind: PropertyKind,
    /// Target class for associations and compositions.
    pub target: Option<String>,
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaClass {
    pub name: String,
    /// Class this one replaces through extension, if any.
    pub extends: Option<String>,
    pub properties: Vec<MetaProperty>,
}

impl MetaClass {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            extends: None,
            properties: Vec::new(),
        }
    }

    pub fn extending(mut self, original: impl Into<String>) -> Self {
        self.extends = Some(original.into());
        self
    }

    pub fn data(self, name: impl Into<String>) -> Self {
        self.push(name, PropertyKind::Data, None, false)
    }

    pub fn required(self, name: impl Into<String>) -> Self {
        self.push(name, PropertyKind::Data, None, true)
    }

    pub fn association(self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.push(name, PropertyKind::Association, Some(target.into()), false)
    }

    pub fn composition(self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.push(name, PropertyKind::Composition, Some(target.into()), false)
    }

    fn push(
        mut self,
        name: impl Into<String>,
        kind: PropertyKind,
        target: Option<String>,
        required: bool,
    ) -> Self {
        self.properties.push(MetaProperty {
            name: name.into(),
            kind,
            target,
            required,
        });
        self
    }

    pub fn property(&self, name: &str) -> Option<&MetaProperty> {
        self.properties.iter().find(|property| property.name == name)
    }

    /// Composition properties in declaration order.
    pub fn compositions(&self) -> impl Iterator<Item = &MetaProperty> {
        self.properties
            .iter()
            .filter(|property| property.kind == PropertyKind::Composition)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataError {
    InvalidClassName(String),
    DuplicateClass(String),
    UnknownBaseClass { class: String, base: String },
}

impl Display for MetadataError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidClassName(name) => write!(f, "invalid entity class name: `{name}`"),
            Self::DuplicateClass(name) => write!(f, "entity class already registered: {name}"),
            Self::UnknownBaseClass { class, base } => {
                write!(f, "class {class} extends unregistered class {base}")
            }
        }
    }
}

impl Error for MetadataError {}

/// Registry of entity classes known to the screens of one session.
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    classes: BTreeMap<String, MetaClass>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one class after name and extension checks.
    pub fn register(&mut self, class: MetaClass) -> Result<(), MetadataError> {
        if !CLASS_NAME_RE.is_match(&class.name) {
            return Err(MetadataError::InvalidClassName(class.name));
        }
        if self.classes.contains_key(&class.name) {
            return Err(MetadataError::DuplicateClass(class.name));
        }
        if let Some(base) = &class.extends {
            if !self.classes.contains_key(base) {
                return Err(MetadataError::UnknownBaseClass {
                    class: class.name.clone(),
                    base: base.clone(),
                });
            }
        }
        self.classes.insert(class.name.clone(), class);
        Ok(())
    }

    pub fn class(&self, name: &str) -> Option<&MetaClass> {
        self.classes.get(name)
    }

    /// Returns the root of the extension chain for `name`.
    ///
    /// Unknown names resolve to themselves.
    pub fn original_name<'a>(&'a self, name: &'a str) -> &'a str {
        let mut current = name;
        while let Some(base) = self
            .classes
            .get(current)
            .and_then(|class| class.extends.as_deref())
        {
            current = base;
        }
        current
    }

    /// Returns whether `a` and `b` share one extension chain root.
    pub fn same_original(&self, a: &str, b: &str) -> bool {
        self.original_name(a) == self.original_name(b)
    }
}
