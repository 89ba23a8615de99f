//! Session-scoped persistence coordination.
//!
//! # Responsibility
//! - Track loaded/modified/deleted entities across entity kinds.
//! - Commit every tracked change as one atomic operation when the backend
//!   supports transactions.
//!
//! # Invariants
//! - Within one session at most one in-memory instance exists per
//!   `(type, id)` identity.
//! - Deletion set and identity map are mutually exclusive.

pub mod unit_of_work;
