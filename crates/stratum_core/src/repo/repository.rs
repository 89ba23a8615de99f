//! Typed, stateless-per-call facade for one entity kind.
//!
//! # Responsibility
//! - Load/save/delete single entities through storage + codec.
//! - Use the batch capability when present, sequential fallback otherwise.
//! - Answer list/count through the queryable capability.
//!
//! # Invariants
//! - `save` stamps version (+1) and timestamp before the write and marks the
//!   entity clean after it.
//! - Loaded instances are fresh allocations, never identity-mapped; callers
//!   needing shared identity use the unit of work.
//! - `save_many` is atomic only when the batch capability is atomic; the
//!   sequential fallback can leave earlier saves committed on late failure.

use crate::codec::{Codec, CodecError};
use crate::model::entity::{EntityKey, EntityType, Persistable};
use crate::storage::{Record, Storage, StorageError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::marker::PhantomData;
use std::sync::Arc;

pub type RepoResult<T> = Result<T, RepoError>;

#[derive(Debug)]
pub enum RepoError {
    /// Entity failed a save precondition (empty ID, foreign entity type).
    InvalidEntity(String),
    NotFound(EntityKey),
    /// Reserved: no save path currently compares against the stored version.
    VersionConflict {
        key: EntityKey,
        stored: i64,
        attempted: i64,
    },
    /// Operation requires a capability the backend does not expose.
    Unsupported {
        operation: &'static str,
        capability: &'static str,
    },
    Codec(CodecError),
    Storage(StorageError),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidEntity(message) => write!(f, "invalid entity: {message}"),
            Self::NotFound(key) => write!(f, "entity not found: {key}"),
            Self::VersionConflict {
                key,
                stored,
                attempted,
            } => write!(
                f,
                "version conflict on {key}: stored {stored}, attempted {attempted}"
            ),
            Self::Unsupported {
                operation,
                capability,
            } => write!(
                f,
                "operation `{operation}` requires the `{capability}` storage capability"
            ),
            Self::Codec(err) => write!(f, "{err}"),
            Self::Storage(err) => write!(f, "{err}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Codec(err) => Some(err),
            Self::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl From<CodecError> for RepoError {
    fn from(value: CodecError) -> Self {
        Self::Codec(value)
    }
}

impl From<StorageError> for RepoError {
    fn from(value: StorageError) -> Self {
        Self::Storage(value)
    }
}

/// Typed repository binding one entity kind to storage + codec.
pub struct Repository<T> {
    storage: Arc<dyn Storage>,
    codec: Codec,
    entity_type: EntityType,
    _kind: PhantomData<fn() -> T>,
}

impl<T> Repository<T>
where
    T: Persistable + Serialize + DeserializeOwned,
{
    pub fn new(storage: Arc<dyn Storage>, codec: Codec, entity_type: EntityType) -> Self {
        Self {
            storage,
            codec,
            entity_type,
            _kind: PhantomData,
        }
    }

    pub fn entity_type(&self) -> &EntityType {
        &self.entity_type
    }

    /// Loads one entity by ID.
    ///
    /// The returned instance is a fresh allocation owned by the caller.
    ///
    /// # Errors
    /// - `RepoError::NotFound` when storage has no record for the ID.
    pub fn load(&self, id: &str) -> RepoResult<T> {
        let key = self.key_for(id);
        let record = self.storage.get(&key.record_key()).map_err(|err| match err {
            StorageError::NotFound { .. } => RepoError::NotFound(key.clone()),
            other => RepoError::Storage(other),
        })?;

        let entity: T = self.codec.decode(&record.data)?;
        entity.mark_clean();
        Ok(entity)
    }

    /// Persists one entity: bump version, touch timestamp, encode, upsert.
    ///
    /// No version-conflict detection against the stored copy is performed;
    /// the write unconditionally overwrites.
    ///
    /// # Errors
    /// - `RepoError::InvalidEntity` on empty ID or foreign entity type.
    pub fn save(&self, entity: &T) -> RepoResult<()> {
        self.validate(entity)?;

        entity.set_version(entity.version() + 1);
        entity.touch();

        let record = self.to_record(entity)?;
        self.storage.set(&record)?;
        entity.mark_clean();
        Ok(())
    }

    /// Removes the record for `id`; absent IDs are ignored.
    pub fn delete(&self, id: &str) -> RepoResult<()> {
        self.storage.delete(&self.key_for(id).record_key())?;
        Ok(())
    }

    pub fn exists(&self, id: &str) -> RepoResult<bool> {
        Ok(self.storage.exists(&self.key_for(id).record_key())?)
    }

    /// Best-effort batch read.
    ///
    /// Uses the batch capability when present, sequential loads otherwise.
    /// IDs that are missing or fail to decode are silently skipped.
    pub fn load_many(&self, ids: &[&str]) -> RepoResult<Vec<T>> {
        if let Some(batch) = self.storage.batch() {
            let keys: Vec<String> = ids.iter().map(|id| self.key_for(id).record_key()).collect();
            let records = batch.get_many(&keys)?;

            let mut entities = Vec::with_capacity(records.len());
            for record in records {
                if let Ok(entity) = self.codec.decode::<T>(&record.data) {
                    entity.mark_clean();
                    entities.push(entity);
                }
            }
            return Ok(entities);
        }

        let mut entities = Vec::with_capacity(ids.len());
        for id in ids {
            match self.load(id) {
                Ok(entity) => entities.push(entity),
                Err(RepoError::NotFound(_)) | Err(RepoError::Codec(_)) => continue,
                Err(other) => return Err(other),
            }
        }
        Ok(entities)
    }

    /// Persists many entities.
    ///
    /// Atomic when the batch capability is present (its `set_many` is
    /// all-or-nothing). The sequential fallback leaves earlier saves
    /// committed when a later one fails; callers needing cross-entity
    /// atomicity use the unit of work.
    pub fn save_many(&self, entities: &[T]) -> RepoResult<()> {
        for entity in entities {
            self.validate(entity)?;
        }

        let Some(batch) = self.storage.batch() else {
            for entity in entities {
                self.save(entity)?;
            }
            return Ok(());
        };

        let mut records = Vec::with_capacity(entities.len());
        for entity in entities {
            entity.set_version(entity.version() + 1);
            entity.touch();
            records.push(self.to_record(entity)?);
        }
        batch.set_many(&records)?;

        for entity in entities {
            entity.mark_clean();
        }
        Ok(())
    }

    /// Lists bare entity IDs of this kind, lexicographically ordered.
    ///
    /// # Errors
    /// - `RepoError::Unsupported` when the backend lacks the queryable
    ///   capability.
    pub fn list(&self, limit: Option<u32>, offset: u32) -> RepoResult<Vec<String>> {
        let queryable = self.storage.queryable().ok_or(RepoError::Unsupported {
            operation: "list",
            capability: "queryable",
        })?;

        let prefix = self.type_prefix();
        let keys = queryable.list(&prefix, limit, offset)?;
        Ok(keys
            .into_iter()
            .filter_map(|key| key.strip_prefix(&prefix).map(str::to_string))
            .collect())
    }

    /// Counts stored entities of this kind.
    pub fn count(&self) -> RepoResult<u64> {
        let queryable = self.storage.queryable().ok_or(RepoError::Unsupported {
            operation: "count",
            capability: "queryable",
        })?;
        Ok(queryable.count(&self.type_prefix())?)
    }

    fn validate(&self, entity: &T) -> RepoResult<()> {
        if entity.id().trim().is_empty() {
            return Err(RepoError::InvalidEntity(
                "entity id must not be empty".to_string(),
            ));
        }
        let entity_type = entity.entity_type();
        if entity_type != self.entity_type {
            return Err(RepoError::InvalidEntity(format!(
                "entity type `{entity_type}` does not belong to repository for `{}`",
                self.entity_type
            )));
        }
        Ok(())
    }

    fn to_record(&self, entity: &T) -> RepoResult<Record> {
        Ok(Record {
            key: entity.key().record_key(),
            data: entity.encode_snapshot(self.codec)?,
            version: entity.version(),
            created_at: entity.created_at(),
            updated_at: entity.updated_at(),
        })
    }

    fn key_for(&self, id: &str) -> EntityKey {
        EntityKey::new(self.entity_type.clone(), id)
    }

    fn type_prefix(&self) -> String {
        format!("{}:", self.entity_type.as_str())
    }
}
