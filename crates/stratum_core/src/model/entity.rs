//! Persistable entity contract and embeddable base state.
//!
//! # Responsibility
//! - Define the capability set (`Persistable`) required by repositories and
//!   unit-of-work sessions.
//! - Provide `BaseEntity`, a lock-protected base struct any domain type can
//!   embed to satisfy the contract through `HasBase`.
//!
//! # Invariants
//! - `(EntityType, id)` is immutable for the lifetime of an entity.
//! - `version` starts at 0 and is only advanced by save paths.
//! - `dirty` is true from creation until a successful save or load.
//! - Concurrent readers never observe a torn (id, version, timestamp) tuple.

use crate::codec::{Codec, CodecResult};
use crate::model::ident::IdGenerator;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::any::Any;
use std::fmt::{Display, Formatter};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{SystemTime, UNIX_EPOCH};

/// Namespacing tag routing an entity to its storage partition.
///
/// Also disambiguates identity-map keys when multiple kinds share a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityType(String);

impl EntityType {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for EntityType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Global identity of one entity: the `(type, id)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityKey {
    pub entity_type: EntityType,
    pub id: String,
}

impl EntityKey {
    pub fn new(entity_type: EntityType, id: impl Into<String>) -> Self {
        Self {
            entity_type,
            id: id.into(),
        }
    }

    /// Flat storage key, format `"<type>:<id>"`.
    ///
    /// Prefix queries (`List("character:", ...)`) rely on this literal shape.
    pub fn record_key(&self) -> String {
        format!("{}:{}", self.entity_type.as_str(), self.id)
    }
}

impl Display for EntityKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.entity_type.as_str(), self.id)
    }
}

/// Wire form of the base fields, inlined into every entity snapshot.
///
/// The dirty flag is deliberately absent: it is session state, not data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseSnapshot {
    pub id: String,
    pub entity_type: EntityType,
    pub version: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug)]
struct BaseFields {
    id: String,
    entity_type: EntityType,
    version: i64,
    dirty: bool,
    created_at: i64,
    updated_at: i64,
}

/// Embeddable base state implementing the persistable capability set.
///
/// All accessors take `&self`; an internal read/write lock keeps the
/// (id, version, timestamp) tuple consistent under concurrent readers.
#[derive(Debug)]
pub struct BaseEntity {
    inner: RwLock<BaseFields>,
}

impl BaseEntity {
    /// Creates base state for a brand-new entity.
    ///
    /// # Invariants
    /// - `version` starts at 0.
    /// - `dirty` starts true and stays true until the first save or load.
    pub fn new(entity_type: EntityType, id: impl Into<String>) -> Self {
        let now = now_unix_seconds();
        Self {
            inner: RwLock::new(BaseFields {
                id: id.into(),
                entity_type,
                version: 0,
                dirty: true,
                created_at: now,
                updated_at: now,
            }),
        }
    }

    /// Creates base state with an ID drawn from the injected generator.
    pub fn with_generated_id(entity_type: EntityType, ids: &dyn IdGenerator) -> Self {
        let id = ids.next_id();
        Self::new(entity_type, id)
    }

    /// Rebuilds base state from a decoded snapshot.
    ///
    /// The result is clean: a decode is a load, not a mutation.
    pub fn from_snapshot(snapshot: BaseSnapshot) -> Self {
        Self {
            inner: RwLock::new(BaseFields {
                id: snapshot.id,
                entity_type: snapshot.entity_type,
                version: snapshot.version,
                dirty: false,
                created_at: snapshot.created_at,
                updated_at: snapshot.updated_at,
            }),
        }
    }

    /// Returns a consistent copy of the wire-visible base fields.
    pub fn snapshot(&self) -> BaseSnapshot {
        let fields = self.read();
        BaseSnapshot {
            id: fields.id.clone(),
            entity_type: fields.entity_type.clone(),
            version: fields.version,
            created_at: fields.created_at,
            updated_at: fields.updated_at,
        }
    }

    pub fn id(&self) -> String {
        self.read().id.clone()
    }

    pub fn entity_type(&self) -> EntityType {
        self.read().entity_type.clone()
    }

    pub fn key(&self) -> EntityKey {
        let fields = self.read();
        EntityKey::new(fields.entity_type.clone(), fields.id.clone())
    }

    pub fn version(&self) -> i64 {
        self.read().version
    }

    pub fn set_version(&self, version: i64) {
        self.write().version = version;
    }

    pub fn is_dirty(&self) -> bool {
        self.read().dirty
    }

    pub fn mark_dirty(&self) {
        self.write().dirty = true;
    }

    pub fn mark_clean(&self) {
        self.write().dirty = false;
    }

    pub fn created_at(&self) -> i64 {
        self.read().created_at
    }

    pub fn updated_at(&self) -> i64 {
        self.read().updated_at
    }

    /// Refreshes `updated_at` to the current time.
    pub fn touch(&self) {
        self.write().updated_at = now_unix_seconds();
    }

    pub fn set_updated_at(&self, updated_at: i64) {
        self.write().updated_at = updated_at;
    }

    fn read(&self) -> RwLockReadGuard<'_, BaseFields> {
        // A poisoned lock still holds consistent base fields; recover.
        self.inner.read().unwrap_or_else(|err| err.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BaseFields> {
        self.inner.write().unwrap_or_else(|err| err.into_inner())
    }
}

impl Serialize for BaseEntity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.snapshot().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for BaseEntity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let snapshot = BaseSnapshot::deserialize(deserializer)?;
        Ok(Self::from_snapshot(snapshot))
    }
}

/// Capability set required of any storable/loadable/trackable type.
///
/// Structural conformance only: embedding `BaseEntity` and implementing
/// `HasBase` satisfies this contract through a blanket impl, with no
/// inheritance relationship.
pub trait Persistable: Send + Sync {
    fn id(&self) -> String;
    fn entity_type(&self) -> EntityType;
    fn key(&self) -> EntityKey {
        EntityKey::new(self.entity_type(), self.id())
    }
    fn version(&self) -> i64;
    fn set_version(&self, version: i64);
    fn is_dirty(&self) -> bool;
    fn mark_dirty(&self);
    fn mark_clean(&self);
    fn created_at(&self) -> i64;
    fn updated_at(&self) -> i64;
    fn touch(&self);
    /// Restores a previously observed `updated_at`.
    ///
    /// Commit rollback uses this so a failed commit leaves no stamped
    /// timestamps behind.
    fn set_updated_at(&self, updated_at: i64);
    /// Serializes the full entity snapshot (base fields plus domain fields).
    fn encode_snapshot(&self, codec: Codec) -> CodecResult<Vec<u8>>;
    /// Downcast seam for callers holding `Arc<dyn Persistable>`.
    fn as_any(&self) -> &dyn Any;
}

/// Structural hook granting `Persistable` to any type embedding `BaseEntity`.
pub trait HasBase {
    fn base(&self) -> &BaseEntity;
}

impl<T> Persistable for T
where
    T: HasBase + Serialize + Any + Send + Sync,
{
    fn id(&self) -> String {
        self.base().id()
    }

    fn entity_type(&self) -> EntityType {
        self.base().entity_type()
    }

    fn key(&self) -> EntityKey {
        self.base().key()
    }

    fn version(&self) -> i64 {
        self.base().version()
    }

    fn set_version(&self, version: i64) {
        self.base().set_version(version);
    }

    fn is_dirty(&self) -> bool {
        self.base().is_dirty()
    }

    fn mark_dirty(&self) {
        self.base().mark_dirty();
    }

    fn mark_clean(&self) {
        self.base().mark_clean();
    }

    fn created_at(&self) -> i64 {
        self.base().created_at()
    }

    fn updated_at(&self) -> i64 {
        self.base().updated_at()
    }

    fn touch(&self) {
        self.base().touch();
    }

    fn set_updated_at(&self, updated_at: i64) {
        self.base().set_updated_at(updated_at);
    }

    fn encode_snapshot(&self, codec: Codec) -> CodecResult<Vec<u8>> {
        codec.encode(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Current wall-clock time in unix seconds.
pub fn now_unix_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::{BaseEntity, BaseSnapshot, EntityKey, EntityType};

    #[test]
    fn record_key_uses_type_colon_id_format() {
        let key = EntityKey::new(EntityType::new("character"), "c-1");
        assert_eq!(key.record_key(), "character:c-1");
    }

    #[test]
    fn new_base_starts_dirty_at_version_zero() {
        let base = BaseEntity::new(EntityType::new("character"), "c-1");
        assert_eq!(base.version(), 0);
        assert!(base.is_dirty());
        assert_eq!(base.created_at(), base.updated_at());
    }

    #[test]
    fn snapshot_roundtrip_preserves_base_fields_and_clears_dirty() {
        let base = BaseEntity::new(EntityType::new("character"), "c-1");
        base.set_version(3);
        base.mark_dirty();

        let restored = BaseEntity::from_snapshot(base.snapshot());
        assert_eq!(restored.id(), "c-1");
        assert_eq!(restored.entity_type(), EntityType::new("character"));
        assert_eq!(restored.version(), 3);
        assert_eq!(restored.created_at(), base.created_at());
        assert!(!restored.is_dirty());
    }

    #[test]
    fn touch_refreshes_updated_at_monotonically() {
        let base = BaseEntity::new(EntityType::new("character"), "c-1");
        let before = base.updated_at();
        base.set_updated_at(before - 100);
        base.touch();
        assert!(base.updated_at() >= before);
    }

    #[test]
    fn base_snapshot_serde_roundtrip() {
        let snapshot = BaseSnapshot {
            id: "c-1".to_string(),
            entity_type: EntityType::new("character"),
            version: 2,
            created_at: 1_700_000_000,
            updated_at: 1_700_000_100,
        };
        let encoded = serde_json::to_string(&snapshot).expect("snapshot serializes");
        let decoded: BaseSnapshot = serde_json::from_str(&encoded).expect("snapshot decodes");
        assert_eq!(decoded, snapshot);
    }
}
