//! Capability-layered key-value storage substrate.
//!
//! # Responsibility
//! - Define the mandatory base contract every backend implements.
//! - Define optional batch/query/transaction capability extensions that
//!   callers probe at runtime and degrade without when absent.
//!
//! # Invariants
//! - Keys are flat strings, format `"<entity-type>:<entity-id>"`.
//! - `set` is an upsert; `delete` of an absent key is not an error.
//! - A second `close` fails with `StorageError::Closed`, as does any
//!   operation after close.
//! - Backends serialize physical writes so two writers never race on a key.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug)]
pub enum StorageError {
    NotFound { key: String },
    /// The storage instance has been closed.
    Closed,
    /// The transaction has already been committed or rolled back.
    TxClosed,
    UnsupportedSchema {
        db_version: u32,
        latest_supported: u32,
    },
    Sqlite(rusqlite::Error),
    InvalidRecord { key: String, message: String },
}

impl Display for StorageError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { key } => write!(f, "record not found: {key}"),
            Self::Closed => write!(f, "storage is closed"),
            Self::TxClosed => write!(f, "transaction is already finished"),
            Self::UnsupportedSchema {
                db_version,
                latest_supported,
            } => write!(
                f,
                "storage schema version {db_version} is newer than supported {latest_supported}"
            ),
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::InvalidRecord { key, message } => {
                write!(f, "invalid persisted record `{key}`: {message}")
            }
        }
    }
}

impl Error for StorageError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

/// Physical representation of one entity snapshot.
///
/// Carries no entity semantics; the payload is opaque to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: String,
    pub data: Vec<u8>,
    pub version: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Summary of the optional capabilities a backend exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub batch: bool,
    pub queryable: bool,
    pub transactional: bool,
}

impl Capabilities {
    pub const ALL: Self = Self {
        batch: true,
        queryable: true,
        transactional: true,
    };

    pub const BASIC: Self = Self {
        batch: false,
        queryable: false,
        transactional: false,
    };
}

impl Display for Capabilities {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "batch={} queryable={} transactional={}",
            self.batch, self.queryable, self.transactional
        )
    }
}

/// Mandatory base contract for every backend.
///
/// Capability accessors replace runtime type inspection: a backend returns
/// `Some(self)` for each extension it supports, and callers degrade
/// gracefully on `None`. Absence is never an error at construction time.
pub trait Storage: Send + Sync {
    /// Fetches the record stored under `key`.
    ///
    /// # Errors
    /// - `StorageError::NotFound` when the key is absent.
    fn get(&self, key: &str) -> StorageResult<Record>;

    /// Upserts: creates the record if absent, overwrites if present.
    fn set(&self, record: &Record) -> StorageResult<()>;

    /// Removes `key`; absent keys are ignored.
    fn delete(&self, key: &str) -> StorageResult<()>;

    fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Releases backend resources.
    ///
    /// # Errors
    /// - `StorageError::Closed` when called a second time.
    fn close(&self) -> StorageResult<()>;

    fn batch(&self) -> Option<&dyn BatchStorage> {
        None
    }

    fn queryable(&self) -> Option<&dyn QueryableStorage> {
        None
    }

    fn transactional(&self) -> Option<&dyn TransactionalStorage> {
        None
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            batch: self.batch().is_some(),
            queryable: self.queryable().is_some(),
            transactional: self.transactional().is_some(),
        }
    }
}

/// Optional multi-record operations.
pub trait BatchStorage {
    /// Fetches many records; missing keys are silently omitted, never a
    /// partial error.
    fn get_many(&self, keys: &[String]) -> StorageResult<Vec<Record>>;

    /// Upserts all records atomically: all or nothing.
    fn set_many(&self, records: &[Record]) -> StorageResult<()>;

    /// Removes all keys atomically.
    fn delete_many(&self, keys: &[String]) -> StorageResult<()>;
}

/// Optional key-space queries.
pub trait QueryableStorage {
    /// Lists keys starting with `prefix`, lexicographically ordered.
    fn list(&self, prefix: &str, limit: Option<u32>, offset: u32) -> StorageResult<Vec<String>>;

    fn count(&self, prefix: &str) -> StorageResult<u64>;
}

/// Optional native transactions.
pub trait TransactionalStorage {
    fn begin<'a>(&'a self) -> StorageResult<Box<dyn StorageTransaction + 'a>>;
}

/// Get/Set/Delete scoped to an uncommitted change set.
///
/// `commit` and `rollback` are terminal: any later call fails with
/// `StorageError::TxClosed`. Dropping an unfinished transaction discards it.
pub trait StorageTransaction {
    fn get(&self, key: &str) -> StorageResult<Record>;
    fn set(&mut self, record: &Record) -> StorageResult<()>;
    fn delete(&mut self, key: &str) -> StorageResult<()>;
    fn commit(&mut self) -> StorageResult<()>;
    fn rollback(&mut self) -> StorageResult<()>;
}
