//! Entity contract, schema descriptors and the note schema.
//!
//! # Invariants
//! - Every entity is identified by an integral `EntityId` assigned on first
//!   persistence.

pub mod entity;
pub mod note;
pub mod notebook;
