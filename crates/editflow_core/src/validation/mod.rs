//! Two-pass entity validation.
//!
//! # Responsibility
//! - Run per-field validators, then whole-object cross-field validators of
//!   one configured group, and aggregate their errors.
//!
//! # Invariants
//! - The cross-field pass runs only when the field pass produced no errors.
//! - Cross-field validators without a group are never run.

use crate::model::entity::{Entity, Value};
use crate::model::metadata::MetaClass;
use crate::model::validation::{ValidationError, ValidationErrors};
use log::debug;

/// Validator collaborator contract.
pub trait Validator {
    fn validate(&self, candidate: &Entity) -> ValidationErrors;
}

type FieldCheck = Box<dyn Fn(Option<&Value>) -> Option<String>>;
type EntityCheck = Box<dyn Fn(&Entity) -> ValidationErrors>;

/// Checks one attribute. `check` returns an error message for bad input.
pub struct FieldValidator {
    field: String,
    check: FieldCheck,
}

impl FieldValidator {
    pub fn new(
        field: impl Into<String>,
        check: impl Fn(Option<&Value>) -> Option<String> + 'static,
    ) -> Self {
        Self {
            field: field.into(),
            check: Box::new(check),
        }
    }

    pub fn field(&self) -> &str {
        &self.field
    }
}

impl Validator for FieldValidator {
    fn validate(&self, candidate: &Entity) -> ValidationErrors {
        match (self.check)(candidate.get(&self.field)) {
            Some(message) => vec![ValidationError::for_field(self.field.clone(), message)].into(),
            None => ValidationErrors::new(),
        }
    }
}

/// Whole-object check that belongs to zero or more validation groups.
pub struct CrossFieldValidator {
    name: String,
    groups: Vec<String>,
    check: EntityCheck,
}

impl CrossFieldValidator {
    pub fn new(name: impl Into<String>, check: impl Fn(&Entity) -> ValidationErrors + 'static) -> Self {
        Self {
            name: name.into(),
            groups: Vec::new(),
            check: Box::new(check),
        }
    }

    pub fn in_group(mut self, group: impl Into<String>) -> Self {
        self.groups.push(group.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn belongs_to(&self, group: &str) -> bool {
        self.groups.iter().any(|candidate| candidate == group)
    }
}

impl Validator for CrossFieldValidator {
    fn validate(&self, candidate: &Entity) -> ValidationErrors {
        (self.check)(candidate)
    }
}

/// Reports required attributes that are loaded as null or blank text.
///
/// Attributes the fetch plan did not load are skipped.
#[derive(Debug, Clone)]
pub struct RequiredAttributesValidator {
    fields: Vec<String>,
}

impl RequiredAttributesValidator {
    pub fn from_class(class: &MetaClass) -> Self {
        Self {
            fields: class
                .properties
                .iter()
                .filter(|property| property.required)
                .map(|property| property.name.clone())
                .collect(),
        }
    }
}

impl Validator for RequiredAttributesValidator {
    fn validate(&self, candidate: &Entity) -> ValidationErrors {
        self.fields
            .iter()
            .filter(|field| match candidate.get(field) {
                Some(Value::Null) => true,
                Some(Value::Text(text)) => text.trim().is_empty(),
                _ => false,
            })
            .map(|field| ValidationError::for_field(field.clone(), "value is required"))
            .collect::<Vec<_>>()
            .into()
    }
}

/// Ordered field validators plus grouped cross-field validators.
pub struct ValidationPipeline {
    group: String,
    field_validators: Vec<Box<dyn Validator>>,
    cross_field_validators: Vec<CrossFieldValidator>,
}

impl ValidationPipeline {
    pub fn new(group: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            field_validators: Vec::new(),
            cross_field_validators: Vec::new(),
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn add_field_validator(&mut self, validator: impl Validator + 'static) -> &mut Self {
        self.field_validators.push(Box::new(validator));
        self
    }

    pub fn add_cross_field_validator(&mut self, validator: CrossFieldValidator) -> &mut Self {
        self.cross_field_validators.push(validator);
        self
    }

    pub fn with_required_attributes(mut self, class: &MetaClass) -> Self {
        self.field_validators
            .insert(0, Box::new(RequiredAttributesValidator::from_class(class)));
        self
    }

    /// Validates `candidate` and returns every error found.
    pub fn run(&self, candidate: &Entity) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        for validator in &self.field_validators {
            errors.extend(validator.validate(candidate));
        }
        if !errors.is_empty() {
            debug!(
                "event=validation module=validation status=field_errors entity={} count={}",
                candidate.reference(),
                errors.len()
            );
            return errors;
        }

        for validator in self
            .cross_field_validators
            .iter()
            .filter(|validator| validator.belongs_to(&self.group))
        {
            errors.extend(validator.validate(candidate));
        }
        debug!(
            "event=validation module=validation status={} entity={} count={}",
            if errors.is_empty() { "ok" } else { "cross_field_errors" },
            candidate.reference(),
            errors.len()
        );
        errors
    }
}

impl Default for ValidationPipeline {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_VALIDATION_GROUP)
    }
}

#[cfg(test)]
mod tests {
    use super::{CrossFieldValidator, FieldValidator, ValidationPipeline};
    use crate::model::entity::{Entity, Value};
    use crate::model::metadata::MetaClass;
    use crate::model::validation::{ValidationError, ValidationErrors};
    use std::cell::Cell;
    use std::rc::Rc;

    fn positive_quantity() -> FieldValidator {
        FieldValidator::new("quantity", |value| match value {
            Some(Value::Integer(n)) if *n > 0 => None,
            _ => Some("must be positive".to_string()),
        })
    }

    #[test]
    fn cross_field_pass_is_skipped_after_field_errors() {
        let calls = Rc::new(Cell::new(0));
        let seen = calls.clone();
        let mut pipeline = ValidationPipeline::new("ui");
        pipeline
            .add_field_validator(positive_quantity())
            .add_cross_field_validator(
                CrossFieldValidator::new("always", move |_| {
                    seen.set(seen.get() + 1);
                    vec![ValidationError::new("cross")].into()
                })
                .in_group("ui"),
            );

        let invalid = Entity::new("OrderLine").with("quantity", Value::Integer(0));
        let errors = pipeline.run(&invalid);
        assert_eq!(
            errors,
            ValidationErrors::from(vec![ValidationError::for_field(
                "quantity",
                "must be positive"
            )])
        );
        assert_eq!(calls.get(), 0);

        let valid = Entity::new("OrderLine").with("quantity", Value::Integer(2));
        assert_eq!(pipeline.run(&valid).len(), 1);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn only_the_configured_group_runs() {
        let mut pipeline = ValidationPipeline::new("ui");
        pipeline
            .add_cross_field_validator(CrossFieldValidator::new("ungrouped", |_| {
                vec![ValidationError::new("ungrouped")].into()
            }))
            .add_cross_field_validator(
                CrossFieldValidator::new("other", |_| vec![ValidationError::new("other")].into())
                    .in_group("import"),
            );
        assert!(pipeline.run(&Entity::new("Order")).is_empty());
    }

    #[test]
    fn required_attributes_ignore_unloaded_fields() {
        let class = MetaClass::new("Order").required("number").required("customer");
        let pipeline = ValidationPipeline::new("ui").with_required_attributes(&class);
        let entity = Entity::new("Order").with("number", Value::text("  "));

        let errors = pipeline.run(&entity);
        let fields: Vec<_> = errors.iter().filter_map(|e| e.field.as_deref()).collect();
        assert_eq!(fields, vec!["number"]);
    }
}
