//! Typed repository layer over storage and codec.
//!
//! # Responsibility
//! - Bind one entity kind to one storage backend and one codec.
//! - Keep key formatting and version stamping inside the persistence
//!   boundary.
//!
//! # Invariants
//! - Repositories are stateless per call: no identity map, no caching.
//! - Repository APIs return semantic errors (`NotFound`, `InvalidEntity`)
//!   in addition to transport errors.

pub mod repository;
