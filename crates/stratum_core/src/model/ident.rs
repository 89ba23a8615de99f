//! Injectable entity ID generation.
//!
//! # Responsibility
//! - Provide opaque unique string IDs for newly created entities.
//! - Keep ID generation a constructor-injected service so tests can
//!   substitute deterministic IDs.

use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Source of opaque unique entity IDs.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> String;
}

/// Production generator backed by random v4 UUIDs.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn next_id(&self) -> String {
        Uuid::new_v4().to_string()
    }
}

/// Deterministic generator producing `<prefix>-1`, `<prefix>-2`, ...
///
/// Intended for tests and reproducible fixtures.
#[derive(Debug)]
pub struct SequenceGenerator {
    prefix: String,
    counter: AtomicU64,
}

impl SequenceGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: AtomicU64::new(0),
        }
    }
}

impl IdGenerator for SequenceGenerator {
    fn next_id(&self) -> String {
        let next = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}-{next}", self.prefix)
    }
}
