//! Shared fixtures: a domain entity conforming to the persistable contract
//! and a failure-injecting storage wrapper for atomicity tests.
#![allow(dead_code)]

use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;
use stratum_core::{
    BaseEntity, BaseSnapshot, EntityType, HasBase, IdGenerator, MemoryStorage, Record, Storage,
    StorageError, StorageResult, StorageTransaction, TransactionalStorage, Value,
};

pub fn character_type() -> EntityType {
    EntityType::new("character")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct CharacterState {
    name: String,
    level: i64,
    attributes: BTreeMap<String, Value>,
}

#[derive(Serialize, Deserialize)]
struct CharacterSnapshot {
    base: BaseSnapshot,
    name: String,
    level: i64,
    attributes: BTreeMap<String, Value>,
}

/// Sample domain entity: lock-guarded mutable state over an embedded base.
///
/// Every public mutator marks the entity dirty and touches the timestamp.
#[derive(Debug)]
pub struct Character {
    base: BaseEntity,
    state: RwLock<CharacterState>,
}

impl Character {
    pub fn new(ids: &dyn IdGenerator, name: &str) -> Self {
        Self {
            base: BaseEntity::with_generated_id(character_type(), ids),
            state: RwLock::new(CharacterState {
                name: name.to_string(),
                level: 1,
                attributes: BTreeMap::new(),
            }),
        }
    }

    pub fn with_id(id: &str, name: &str) -> Self {
        Self {
            base: BaseEntity::new(character_type(), id),
            state: RwLock::new(CharacterState {
                name: name.to_string(),
                level: 1,
                attributes: BTreeMap::new(),
            }),
        }
    }

    pub fn name(&self) -> String {
        self.state.read().unwrap().name.clone()
    }

    pub fn level(&self) -> i64 {
        self.state.read().unwrap().level
    }

    pub fn rename(&self, name: &str) {
        self.state.write().unwrap().name = name.to_string();
        self.base.mark_dirty();
        self.base.touch();
    }

    pub fn set_level(&self, level: i64) {
        self.state.write().unwrap().level = level;
        self.base.mark_dirty();
        self.base.touch();
    }

    pub fn set_attribute(&self, key: &str, value: Value) {
        self.state
            .write()
            .unwrap()
            .attributes
            .insert(key.to_string(), value);
        self.base.mark_dirty();
        self.base.touch();
    }

    pub fn attribute(&self, key: &str) -> Option<Value> {
        self.state.read().unwrap().attributes.get(key).cloned()
    }
}

impl HasBase for Character {
    fn base(&self) -> &BaseEntity {
        &self.base
    }
}

impl Serialize for Character {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let state = self.state.read().unwrap();
        let snapshot = CharacterSnapshot {
            base: self.base.snapshot(),
            name: state.name.clone(),
            level: state.level,
            attributes: state.attributes.clone(),
        };
        snapshot.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Character {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let snapshot = CharacterSnapshot::deserialize(deserializer)?;
        Ok(Self {
            base: BaseEntity::from_snapshot(snapshot.base),
            state: RwLock::new(CharacterState {
                name: snapshot.name,
                level: snapshot.level,
                attributes: snapshot.attributes,
            }),
        })
    }
}

/// Transactional storage that fails transaction `set`s once a budget runs
/// out, for simulating mid-commit backend errors.
pub struct FlakyStorage {
    inner: MemoryStorage,
    remaining_sets: AtomicUsize,
}

impl FlakyStorage {
    pub fn failing_after(sets: usize) -> Self {
        Self {
            inner: MemoryStorage::new(),
            remaining_sets: AtomicUsize::new(sets),
        }
    }

    pub fn allow_sets(&self, sets: usize) {
        self.remaining_sets.store(sets, Ordering::SeqCst);
    }
}

impl Storage for FlakyStorage {
    fn get(&self, key: &str) -> StorageResult<Record> {
        self.inner.get(key)
    }

    fn set(&self, record: &Record) -> StorageResult<()> {
        self.inner.set(record)
    }

    fn delete(&self, key: &str) -> StorageResult<()> {
        self.inner.delete(key)
    }

    fn exists(&self, key: &str) -> StorageResult<bool> {
        self.inner.exists(key)
    }

    fn close(&self) -> StorageResult<()> {
        self.inner.close()
    }

    fn transactional(&self) -> Option<&dyn TransactionalStorage> {
        Some(self)
    }
}

impl TransactionalStorage for FlakyStorage {
    fn begin<'a>(&'a self) -> StorageResult<Box<dyn StorageTransaction + 'a>> {
        let tx = self
            .inner
            .transactional()
            .expect("memory storage is transactional")
            .begin()?;
        Ok(Box::new(FlakyTransaction {
            tx,
            remaining_sets: &self.remaining_sets,
        }))
    }
}

struct FlakyTransaction<'a> {
    tx: Box<dyn StorageTransaction + 'a>,
    remaining_sets: &'a AtomicUsize,
}

impl StorageTransaction for FlakyTransaction<'_> {
    fn get(&self, key: &str) -> StorageResult<Record> {
        self.tx.get(key)
    }

    fn set(&mut self, record: &Record) -> StorageResult<()> {
        let allowed = self
            .remaining_sets
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                remaining.checked_sub(1)
            })
            .is_ok();
        if !allowed {
            return Err(StorageError::InvalidRecord {
                key: record.key.clone(),
                message: "injected transaction failure".to_string(),
            });
        }
        self.tx.set(record)
    }

    fn delete(&mut self, key: &str) -> StorageResult<()> {
        self.tx.delete(key)
    }

    fn commit(&mut self) -> StorageResult<()> {
        self.tx.commit()
    }

    fn rollback(&mut self) -> StorageResult<()> {
        self.tx.rollback()
    }
}
