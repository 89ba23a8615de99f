//! Generic persistence runtime: entity contract, typed repository, unit of
//! work and capability-layered key-value storage with pluggable encoding.
//!
//! Callers obtain entities either through a [`Repository`] (single kind, no
//! cross-entity atomicity) or through a [`UnitOfWork`] (multi-kind, atomic
//! session). Both read and write through the same [`Storage`] contract using
//! a [`Codec`] to cross the byte boundary.

pub mod codec;
pub mod logging;
pub mod model;
pub mod repo;
pub mod session;
pub mod storage;

pub use codec::{Codec, CodecError, CodecResult};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::entity::{
    now_unix_seconds, BaseEntity, BaseSnapshot, EntityKey, EntityType, HasBase, Persistable,
};
pub use model::ident::{IdGenerator, SequenceGenerator, UuidGenerator};
pub use model::value::Value;
pub use repo::repository::{RepoError, RepoResult, Repository};
pub use session::unit_of_work::{
    decode_factory, DecodeFactory, SessionError, SessionResult, SessionStatus, UnitOfWork,
};
pub use storage::{
    BatchStorage, Capabilities, MemoryStorage, QueryableStorage, Record, SqliteStorage, Storage,
    StorageError, StorageResult, StorageTransaction, TransactionalStorage,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
