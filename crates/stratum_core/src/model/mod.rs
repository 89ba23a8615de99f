//! Entity contract and supporting domain plumbing.
//!
//! # Responsibility
//! - Define the persistable-entity capability set shared by repositories
//!   and unit-of-work sessions.
//! - Keep identity, versioning and dirty-tracking concerns in one place.
//!
//! # Invariants
//! - Every persistable object is identified by a stable `(EntityType, id)`
//!   pair assigned at creation and never reassigned.
//! - Version starts at 0 and only moves through save paths.

pub mod entity;
pub mod ident;
pub mod value;
