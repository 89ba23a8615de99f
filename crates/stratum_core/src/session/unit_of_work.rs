//! Unit of work: identity map, dirty tracking and atomic commit.
//!
//! # Responsibility
//! - Guarantee one live instance per identity within a session.
//! - Apply all tracked deletions and dirty saves as one commit, using the
//!   transactional capability when the backend has it.
//!
//! # Invariants
//! - A failed commit leaves in-memory dirty/version state exactly as before
//!   the attempt, so the caller may retry.
//! - Registering an entity removes it from the deletion set (un-delete);
//!   deleting evicts it from the identity map.
//! - Rollback/clear never touch storage.

use crate::codec::{Codec, CodecError};
use crate::model::entity::{EntityKey, EntityType, Persistable};
use crate::storage::{Record, Storage, StorageError, TransactionalStorage};
use log::{error, info};
use serde::de::DeserializeOwned;
use std::collections::{HashMap, HashSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Debug)]
pub enum SessionError {
    /// The session is no longer open for mutation.
    Closed { status: SessionStatus },
    /// `get` was called for a type with no registered decode factory.
    NoFactory(EntityType),
    NotFound(EntityKey),
    Codec(CodecError),
    Storage(StorageError),
}

impl Display for SessionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed { status } => {
                write!(f, "unit of work is {} and no longer mutable", status.as_str())
            }
            Self::NoFactory(entity_type) => {
                write!(f, "no decode factory registered for type `{entity_type}`")
            }
            Self::NotFound(key) => write!(f, "entity not found: {key}"),
            Self::Codec(err) => write!(f, "{err}"),
            Self::Storage(err) => write!(f, "{err}"),
        }
    }
}

impl Error for SessionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Codec(err) => Some(err),
            Self::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl From<CodecError> for SessionError {
    fn from(value: CodecError) -> Self {
        Self::Codec(value)
    }
}

impl From<StorageError> for SessionError {
    fn from(value: StorageError) -> Self {
        Self::Storage(value)
    }
}

/// Session lifecycle.
///
/// `Open` is the only mutable state; the other three are terminal for
/// mutation. `close` is reachable from anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Open,
    Committed,
    RolledBack,
    Closed,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Committed => "committed",
            Self::RolledBack => "rolled_back",
            Self::Closed => "closed",
        }
    }
}

/// Per-type decoder turning record bytes into a live entity.
pub type DecodeFactory =
    Box<dyn Fn(Codec, &[u8]) -> Result<Arc<dyn Persistable>, CodecError> + Send + Sync>;

/// Builds a decode factory for any conforming entity type.
pub fn decode_factory<T>() -> DecodeFactory
where
    T: Persistable + DeserializeOwned + 'static,
{
    Box::new(|codec, bytes| {
        let entity: T = codec.decode(bytes)?;
        Ok(Arc::new(entity))
    })
}

struct SessionInner {
    status: SessionStatus,
    factories: HashMap<EntityType, DecodeFactory>,
    identity_map: HashMap<EntityKey, Arc<dyn Persistable>>,
    deleted: HashSet<EntityKey>,
}

/// Session-scoped coordinator over one storage backend and codec.
///
/// Internally lock-protected so concurrent calls are free of data races,
/// but designed for a single logical owner: two callers mutating the same
/// loaded entity and committing are last-write-wins with no detection.
pub struct UnitOfWork {
    storage: Arc<dyn Storage>,
    codec: Codec,
    inner: Mutex<SessionInner>,
}

impl UnitOfWork {
    pub fn new(storage: Arc<dyn Storage>, codec: Codec) -> Self {
        Self {
            storage,
            codec,
            inner: Mutex::new(SessionInner {
                status: SessionStatus::Open,
                factories: HashMap::new(),
                identity_map: HashMap::new(),
                deleted: HashSet::new(),
            }),
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.lock().status
    }

    /// Registers the decode factory for one entity type.
    ///
    /// Required before `get` can load an unseen type.
    pub fn register_factory(
        &self,
        entity_type: EntityType,
        factory: DecodeFactory,
    ) -> SessionResult<()> {
        let mut inner = self.lock();
        ensure_open(&inner)?;
        inner.factories.insert(entity_type, factory);
        Ok(())
    }

    /// Returns the session's instance for `(entity_type, id)`.
    ///
    /// This is the single read path: a second `get` for the same identity
    /// returns the same `Arc`, never a fresh decode.
    ///
    /// # Errors
    /// - `SessionError::NotFound` when the identity is deleted in this
    ///   session or absent from storage.
    /// - `SessionError::NoFactory` when the type was never registered.
    pub fn get(&self, entity_type: &EntityType, id: &str) -> SessionResult<Arc<dyn Persistable>> {
        let mut inner = self.lock();
        ensure_open(&inner)?;

        let key = EntityKey::new(entity_type.clone(), id);
        if inner.deleted.contains(&key) {
            return Err(SessionError::NotFound(key));
        }
        if let Some(existing) = inner.identity_map.get(&key) {
            return Ok(existing.clone());
        }
        if !inner.factories.contains_key(entity_type) {
            return Err(SessionError::NoFactory(entity_type.clone()));
        }

        let record = self
            .storage
            .get(&key.record_key())
            .map_err(|err| match err {
                StorageError::NotFound { .. } => SessionError::NotFound(key.clone()),
                other => SessionError::Storage(other),
            })?;

        let entity = {
            let factory = inner
                .factories
                .get(entity_type)
                .ok_or_else(|| SessionError::NoFactory(entity_type.clone()))?;
            factory(self.codec, &record.data)?
        };
        entity.mark_clean();
        inner.identity_map.insert(key, entity.clone());
        Ok(entity)
    }

    /// Attaches an entity to the session, overwriting any tracked instance
    /// for the same identity and removing it from the deletion set.
    ///
    /// Used both for brand-new entities and for re-attaching instances
    /// loaded outside the session.
    pub fn register(&self, entity: Arc<dyn Persistable>) -> SessionResult<()> {
        let mut inner = self.lock();
        ensure_open(&inner)?;

        let key = entity.key();
        inner.deleted.remove(&key);
        inner.identity_map.insert(key, entity);
        Ok(())
    }

    /// Schedules an entity for removal on commit.
    pub fn delete(&self, entity: &dyn Persistable) -> SessionResult<()> {
        self.delete_by_id(&entity.entity_type(), &entity.id())
    }

    /// Schedules `(entity_type, id)` for removal on commit.
    pub fn delete_by_id(&self, entity_type: &EntityType, id: &str) -> SessionResult<()> {
        let mut inner = self.lock();
        ensure_open(&inner)?;

        let key = EntityKey::new(entity_type.clone(), id);
        inner.identity_map.remove(&key);
        inner.deleted.insert(key);
        Ok(())
    }

    /// True when the deletion set is non-empty or any tracked entity is
    /// dirty.
    pub fn has_changes(&self) -> bool {
        let inner = self.lock();
        !inner.deleted.is_empty() || inner.identity_map.values().any(|entity| entity.is_dirty())
    }

    pub fn tracked_count(&self) -> usize {
        self.lock().identity_map.len()
    }

    pub fn dirty_count(&self) -> usize {
        self.lock()
            .identity_map
            .values()
            .filter(|entity| entity.is_dirty())
            .count()
    }

    /// Applies all deletions then all dirty saves as one operation.
    ///
    /// With the transactional capability the apply is atomic; without it
    /// writes go directly to storage and a late failure can leave earlier
    /// writes applied (best-effort mode).
    ///
    /// On failure the session stays open and every entity keeps its
    /// pre-commit version/timestamp/dirty state, so commit may be retried.
    /// On success the session becomes `Committed`.
    pub fn commit(&self) -> SessionResult<()> {
        let mut inner = self.lock();
        ensure_open(&inner)?;

        let started_at = Instant::now();
        let deletes: Vec<EntityKey> = inner.deleted.iter().cloned().collect();
        let dirty: Vec<Arc<dyn Persistable>> = inner
            .identity_map
            .values()
            .filter(|entity| entity.is_dirty())
            .cloned()
            .collect();
        let mode = if self.storage.transactional().is_some() {
            "transactional"
        } else {
            "direct"
        };
        info!(
            "event=uow_commit module=session status=start mode={mode} tracked={} dirty={} deletes={}",
            inner.identity_map.len(),
            dirty.len(),
            deletes.len()
        );

        let mut stamped: Vec<(Arc<dyn Persistable>, i64, i64)> = Vec::with_capacity(dirty.len());
        let mut records: Vec<Record> = Vec::with_capacity(dirty.len());
        for entity in &dirty {
            let prior_version = entity.version();
            let prior_updated_at = entity.updated_at();
            entity.set_version(prior_version + 1);
            entity.touch();
            stamped.push((entity.clone(), prior_version, prior_updated_at));

            match entity.encode_snapshot(self.codec) {
                Ok(data) => records.push(Record {
                    key: entity.key().record_key(),
                    data,
                    version: entity.version(),
                    created_at: entity.created_at(),
                    updated_at: entity.updated_at(),
                }),
                Err(err) => {
                    restore_stamps(&stamped);
                    error!(
                        "event=uow_commit module=session status=error mode={mode} duration_ms={} error={err}",
                        started_at.elapsed().as_millis()
                    );
                    return Err(SessionError::Codec(err));
                }
            }
        }

        let applied = match self.storage.transactional() {
            Some(transactional) => apply_in_transaction(transactional, &deletes, &records),
            None => self.apply_direct(&deletes, &records),
        };

        match applied {
            Ok(()) => {
                inner.deleted.clear();
                for entity in inner.identity_map.values() {
                    entity.mark_clean();
                }
                inner.status = SessionStatus::Committed;
                info!(
                    "event=uow_commit module=session status=ok mode={mode} duration_ms={} saves={} deletes={}",
                    started_at.elapsed().as_millis(),
                    records.len(),
                    deletes.len()
                );
                Ok(())
            }
            Err(err) => {
                restore_stamps(&stamped);
                error!(
                    "event=uow_commit module=session status=error mode={mode} duration_ms={} error={err}",
                    started_at.elapsed().as_millis()
                );
                Err(err)
            }
        }
    }

    /// Discards the identity map and deletion set without touching storage.
    ///
    /// Entities already mutated in memory keep their mutations; they are
    /// simply no longer tracked. The session becomes `RolledBack`.
    pub fn rollback(&self) -> SessionResult<()> {
        let mut inner = self.lock();
        ensure_open(&inner)?;
        inner.identity_map.clear();
        inner.deleted.clear();
        inner.status = SessionStatus::RolledBack;
        info!("event=uow_rollback module=session status=ok");
        Ok(())
    }

    /// Like `rollback`, but keeps the session open for reuse.
    pub fn clear(&self) -> SessionResult<()> {
        let mut inner = self.lock();
        ensure_open(&inner)?;
        inner.identity_map.clear();
        inner.deleted.clear();
        Ok(())
    }

    /// Releases session state. Safe to call from any state, repeatedly.
    pub fn close(&self) {
        let mut inner = self.lock();
        if inner.status == SessionStatus::Closed {
            return;
        }
        inner.identity_map.clear();
        inner.deleted.clear();
        inner.factories.clear();
        inner.status = SessionStatus::Closed;
    }

    fn apply_direct(&self, deletes: &[EntityKey], records: &[Record]) -> SessionResult<()> {
        for key in deletes {
            self.storage.delete(&key.record_key())?;
        }
        for record in records {
            self.storage.set(record)?;
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        // A poisoned lock still holds a consistent session; recover.
        self.inner.lock().unwrap_or_else(|err| err.into_inner())
    }
}

fn apply_in_transaction(
    transactional: &dyn TransactionalStorage,
    deletes: &[EntityKey],
    records: &[Record],
) -> SessionResult<()> {
    // An early `?` drops the transaction, which rolls it back.
    let mut tx = transactional.begin()?;
    for key in deletes {
        tx.delete(&key.record_key())?;
    }
    for record in records {
        tx.set(record)?;
    }
    tx.commit()?;
    Ok(())
}

fn ensure_open(inner: &SessionInner) -> SessionResult<()> {
    if inner.status == SessionStatus::Open {
        return Ok(());
    }
    Err(SessionError::Closed {
        status: inner.status,
    })
}

fn restore_stamps(stamped: &[(Arc<dyn Persistable>, i64, i64)]) {
    for (entity, version, updated_at) in stamped {
        entity.set_version(*version);
        entity.set_updated_at(*updated_at);
    }
}
