//! Entity, metadata and validation model.
//!
//! # Responsibility
//! - Define the data shapes edited by screens and exchanged with the
//!   persistence collaborator.
//!
//! # Invariants
//! - Entity identity is `(type, key)`; value fields never take part in
//!   equality.

pub mod entity;
pub mod metadata;
pub mod validation;
