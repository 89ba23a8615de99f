//! In-memory storage backend.
//!
//! # Responsibility
//! - Provide a full-capability backend for tests and ephemeral sessions.
//! - Allow construction with a reduced capability set so degradation paths
//!   can be exercised.
//!
//! # Invariants
//! - Keys iterate in lexicographic order (`BTreeMap`).
//! - At most one transaction is open at a time; the write gate serializes
//!   transactional writers.

use super::{
    BatchStorage, Capabilities, QueryableStorage, Record, Storage, StorageError, StorageResult,
    StorageTransaction, TransactionalStorage,
};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Default)]
struct MemoryInner {
    records: BTreeMap<String, Record>,
    closed: bool,
}

/// BTreeMap-backed storage with configurable capabilities.
#[derive(Debug)]
pub struct MemoryStorage {
    caps: Capabilities,
    write_gate: Mutex<()>,
    inner: RwLock<MemoryInner>,
}

impl MemoryStorage {
    /// Creates a backend exposing every capability.
    pub fn new() -> Self {
        Self::with_capabilities(Capabilities::ALL)
    }

    /// Creates a backend exposing only the given capabilities.
    pub fn with_capabilities(caps: Capabilities) -> Self {
        Self {
            caps,
            write_gate: Mutex::new(()),
            inner: RwLock::new(MemoryInner::default()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, MemoryInner> {
        self.inner.read().unwrap_or_else(|err| err.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, MemoryInner> {
        self.inner.write().unwrap_or_else(|err| err.into_inner())
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> StorageResult<Record> {
        let inner = self.read();
        if inner.closed {
            return Err(StorageError::Closed);
        }
        inner
            .records
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                key: key.to_string(),
            })
    }

    fn set(&self, record: &Record) -> StorageResult<()> {
        let mut inner = self.write();
        if inner.closed {
            return Err(StorageError::Closed);
        }
        inner.records.insert(record.key.clone(), record.clone());
        Ok(())
    }

    fn delete(&self, key: &str) -> StorageResult<()> {
        let mut inner = self.write();
        if inner.closed {
            return Err(StorageError::Closed);
        }
        inner.records.remove(key);
        Ok(())
    }

    fn exists(&self, key: &str) -> StorageResult<bool> {
        let inner = self.read();
        if inner.closed {
            return Err(StorageError::Closed);
        }
        Ok(inner.records.contains_key(key))
    }

    fn close(&self) -> StorageResult<()> {
        let mut inner = self.write();
        if inner.closed {
            return Err(StorageError::Closed);
        }
        inner.closed = true;
        inner.records.clear();
        Ok(())
    }

    fn batch(&self) -> Option<&dyn BatchStorage> {
        self.caps.batch.then_some(self as &dyn BatchStorage)
    }

    fn queryable(&self) -> Option<&dyn QueryableStorage> {
        self.caps.queryable.then_some(self as &dyn QueryableStorage)
    }

    fn transactional(&self) -> Option<&dyn TransactionalStorage> {
        self.caps
            .transactional
            .then_some(self as &dyn TransactionalStorage)
    }
}

impl BatchStorage for MemoryStorage {
    fn get_many(&self, keys: &[String]) -> StorageResult<Vec<Record>> {
        let inner = self.read();
        if inner.closed {
            return Err(StorageError::Closed);
        }
        Ok(keys
            .iter()
            .filter_map(|key| inner.records.get(key).cloned())
            .collect())
    }

    fn set_many(&self, records: &[Record]) -> StorageResult<()> {
        // One write lock for the whole batch makes it all-or-nothing.
        let mut inner = self.write();
        if inner.closed {
            return Err(StorageError::Closed);
        }
        for record in records {
            inner.records.insert(record.key.clone(), record.clone());
        }
        Ok(())
    }

    fn delete_many(&self, keys: &[String]) -> StorageResult<()> {
        let mut inner = self.write();
        if inner.closed {
            return Err(StorageError::Closed);
        }
        for key in keys {
            inner.records.remove(key);
        }
        Ok(())
    }
}

impl QueryableStorage for MemoryStorage {
    fn list(&self, prefix: &str, limit: Option<u32>, offset: u32) -> StorageResult<Vec<String>> {
        let inner = self.read();
        if inner.closed {
            return Err(StorageError::Closed);
        }
        let keys = inner
            .records
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .skip(offset as usize);
        Ok(match limit {
            Some(limit) => keys.take(limit as usize).collect(),
            None => keys.collect(),
        })
    }

    fn count(&self, prefix: &str) -> StorageResult<u64> {
        let inner = self.read();
        if inner.closed {
            return Err(StorageError::Closed);
        }
        Ok(inner
            .records
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .count() as u64)
    }
}

impl TransactionalStorage for MemoryStorage {
    fn begin<'a>(&'a self) -> StorageResult<Box<dyn StorageTransaction + 'a>> {
        if self.read().closed {
            return Err(StorageError::Closed);
        }
        let gate = self
            .write_gate
            .lock()
            .unwrap_or_else(|err| err.into_inner());
        Ok(Box::new(MemoryTransaction {
            storage: self,
            _gate: gate,
            pending: BTreeMap::new(),
            finished: false,
        }))
    }
}

/// Buffered change set applied in one step on commit.
///
/// `pending` maps key to `Some(record)` (upsert) or `None` (delete).
struct MemoryTransaction<'a> {
    storage: &'a MemoryStorage,
    _gate: MutexGuard<'a, ()>,
    pending: BTreeMap<String, Option<Record>>,
    finished: bool,
}

impl StorageTransaction for MemoryTransaction<'_> {
    fn get(&self, key: &str) -> StorageResult<Record> {
        if self.finished {
            return Err(StorageError::TxClosed);
        }
        match self.pending.get(key) {
            Some(Some(record)) => Ok(record.clone()),
            Some(None) => Err(StorageError::NotFound {
                key: key.to_string(),
            }),
            None => self.storage.get(key),
        }
    }

    fn set(&mut self, record: &Record) -> StorageResult<()> {
        if self.finished {
            return Err(StorageError::TxClosed);
        }
        self.pending.insert(record.key.clone(), Some(record.clone()));
        Ok(())
    }

    fn delete(&mut self, key: &str) -> StorageResult<()> {
        if self.finished {
            return Err(StorageError::TxClosed);
        }
        self.pending.insert(key.to_string(), None);
        Ok(())
    }

    fn commit(&mut self) -> StorageResult<()> {
        if self.finished {
            return Err(StorageError::TxClosed);
        }
        let mut inner = self.storage.write();
        if inner.closed {
            return Err(StorageError::Closed);
        }
        for (key, change) in std::mem::take(&mut self.pending) {
            match change {
                Some(record) => {
                    inner.records.insert(key, record);
                }
                None => {
                    inner.records.remove(&key);
                }
            }
        }
        self.finished = true;
        Ok(())
    }

    fn rollback(&mut self) -> StorageResult<()> {
        if self.finished {
            return Err(StorageError::TxClosed);
        }
        self.pending.clear();
        self.finished = true;
        Ok(())
    }
}
