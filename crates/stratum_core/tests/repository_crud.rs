mod common;

use common::{character_type, Character};
use std::sync::Arc;
use stratum_core::{
    Capabilities, Codec, EntityType, MemoryStorage, Persistable, Record, RepoError, Repository,
    SequenceGenerator, Storage, Value,
};

fn memory_repo() -> (Arc<MemoryStorage>, Repository<Character>) {
    let storage = Arc::new(MemoryStorage::new());
    let repo = Repository::new(storage.clone(), Codec::default(), character_type());
    (storage, repo)
}

#[test]
fn save_then_load_roundtrips_every_field() {
    let (_storage, repo) = memory_repo();
    let ids = SequenceGenerator::new("char");

    let character = Character::new(&ids, "Alaric");
    character.set_level(7);
    character.set_attribute("guild", Value::from("ember"));
    character.set_attribute("hardcore", Value::from(true));
    character.set_attribute("honor", Value::from(1200));
    repo.save(&character).unwrap();

    let loaded = repo.load("char-1").unwrap();
    assert_eq!(loaded.id(), character.id());
    assert_eq!(loaded.entity_type(), character_type());
    assert_eq!(loaded.version(), character.version());
    assert_eq!(loaded.created_at(), character.created_at());
    assert_eq!(loaded.updated_at(), character.updated_at());
    assert_eq!(loaded.name(), "Alaric");
    assert_eq!(loaded.level(), 7);
    assert_eq!(loaded.attribute("guild"), Some(Value::from("ember")));
    assert_eq!(loaded.attribute("hardcore"), Some(Value::from(true)));
    assert_eq!(loaded.attribute("honor"), Some(Value::from(1200)));
    assert!(!loaded.is_dirty());
}

#[test]
fn json_codec_roundtrips_identically() {
    let storage = Arc::new(MemoryStorage::new());
    let repo: Repository<Character> =
        Repository::new(storage, Codec::Json, character_type());

    let character = Character::with_id("e9", "Mira");
    character.set_attribute("guild", Value::from("ash"));
    repo.save(&character).unwrap();

    let loaded = repo.load("e9").unwrap();
    assert_eq!(loaded.name(), "Mira");
    assert_eq!(loaded.version(), 1);
    assert_eq!(loaded.attribute("guild"), Some(Value::from("ash")));
}

#[test]
fn repository_lifecycle_scenario() {
    let (_storage, repo) = memory_repo();

    let character = Character::with_id("e1", "Alaric");
    assert!(character.is_dirty());
    assert_eq!(character.version(), 0);

    repo.save(&character).unwrap();
    assert_eq!(character.version(), 1);
    assert!(!character.is_dirty());

    let loaded = repo.load("e1").unwrap();
    assert_eq!(loaded.name(), "Alaric");
    assert_eq!(loaded.version(), 1);
    assert!(!loaded.is_dirty());

    loaded.set_level(3);
    assert!(loaded.is_dirty());
    repo.save(&loaded).unwrap();
    assert_eq!(loaded.version(), 2);

    repo.delete("e1").unwrap();
    assert!(!repo.exists("e1").unwrap());
    assert!(matches!(repo.load("e1"), Err(RepoError::NotFound(_))));
}

#[test]
fn version_increments_by_one_per_save() {
    let (_storage, repo) = memory_repo();
    let character = Character::with_id("e1", "Alaric");

    for expected in 1..=5 {
        character.set_level(expected);
        repo.save(&character).unwrap();
        assert_eq!(character.version(), expected);
    }
    assert_eq!(repo.load("e1").unwrap().version(), 5);
}

#[test]
fn save_rejects_empty_id() {
    let (_storage, repo) = memory_repo();
    let character = Character::with_id("", "Nameless");
    assert!(matches!(
        repo.save(&character),
        Err(RepoError::InvalidEntity(_))
    ));

    let blank = Character::with_id("   ", "Blank");
    assert!(matches!(repo.save(&blank), Err(RepoError::InvalidEntity(_))));
}

#[test]
fn save_rejects_foreign_entity_type() {
    let storage = Arc::new(MemoryStorage::new());
    let repo: Repository<Character> = Repository::new(
        storage,
        Codec::default(),
        EntityType::new("account"),
    );

    let character = Character::with_id("e1", "Alaric");
    assert!(matches!(
        repo.save(&character),
        Err(RepoError::InvalidEntity(_))
    ));
}

// Version conflicts are reserved in the error taxonomy but save does not
// compare against the stored copy: the last write wins unconditionally.
// This test pins that behavior so any future conflict detection shows up
// as an explicit change.
#[test]
fn save_overwrites_stale_version_without_conflict() {
    let (_storage, repo) = memory_repo();
    repo.save(&Character::with_id("e1", "Alaric")).unwrap();

    let first = repo.load("e1").unwrap();
    let second = repo.load("e1").unwrap();

    first.set_level(10);
    repo.save(&first).unwrap();
    assert_eq!(first.version(), 2);

    // `second` is now stale at version 1, yet saving it succeeds.
    second.set_level(99);
    repo.save(&second).unwrap();
    assert_eq!(second.version(), 2);

    let settled = repo.load("e1").unwrap();
    assert_eq!(settled.version(), 2);
    assert_eq!(settled.level(), 99);
}

#[test]
fn load_many_skips_missing_and_undecodable_ids() {
    let (storage, repo) = memory_repo();
    repo.save(&Character::with_id("e1", "Alaric")).unwrap();
    repo.save(&Character::with_id("e2", "Mira")).unwrap();

    // A record that will not decode as a character.
    storage
        .set(&Record {
            key: "character:e3".to_string(),
            data: vec![0xde, 0xad],
            version: 1,
            created_at: 0,
            updated_at: 0,
        })
        .unwrap();

    let loaded = repo.load_many(&["e1", "ghost", "e3", "e2"]).unwrap();
    let mut names: Vec<String> = loaded.iter().map(Character::name).collect();
    names.sort();
    assert_eq!(names, ["Alaric", "Mira"]);
}

#[test]
fn save_many_updates_versions_and_marks_clean() {
    let (_storage, repo) = memory_repo();
    let entities = vec![
        Character::with_id("e1", "Alaric"),
        Character::with_id("e2", "Mira"),
    ];

    repo.save_many(&entities).unwrap();
    for entity in &entities {
        assert_eq!(entity.version(), 1);
        assert!(!entity.is_dirty());
    }
    assert_eq!(repo.count().unwrap(), 2);
}

#[test]
fn save_many_validates_before_writing_anything() {
    let (_storage, repo) = memory_repo();
    let entities = vec![
        Character::with_id("e1", "Alaric"),
        Character::with_id("", "Nameless"),
    ];

    assert!(matches!(
        repo.save_many(&entities),
        Err(RepoError::InvalidEntity(_))
    ));
    assert_eq!(repo.count().unwrap(), 0);
    assert_eq!(entities[0].version(), 0);
}

#[test]
fn list_strips_type_prefix_and_orders_ids() {
    let (storage, repo) = memory_repo();
    for id in ["c2", "a1", "b9"] {
        repo.save(&Character::with_id(id, "someone")).unwrap();
    }
    // A record of another kind must not leak into this repository's listing.
    storage
        .set(&Record {
            key: "account:z1".to_string(),
            data: vec![1],
            version: 1,
            created_at: 0,
            updated_at: 0,
        })
        .unwrap();

    assert_eq!(repo.list(None, 0).unwrap(), ["a1", "b9", "c2"]);
    assert_eq!(repo.list(Some(2), 0).unwrap(), ["a1", "b9"]);
    assert_eq!(repo.list(Some(2), 1).unwrap(), ["b9", "c2"]);
    assert_eq!(repo.list(None, 2).unwrap(), ["c2"]);
    assert_eq!(repo.count().unwrap(), 3);
}

#[test]
fn list_and_count_require_queryable_capability() {
    let storage = Arc::new(MemoryStorage::with_capabilities(Capabilities::BASIC));
    let repo: Repository<Character> =
        Repository::new(storage, Codec::default(), character_type());

    assert!(matches!(
        repo.list(None, 0),
        Err(RepoError::Unsupported {
            operation: "list",
            ..
        })
    ));
    assert!(matches!(
        repo.count(),
        Err(RepoError::Unsupported {
            operation: "count",
            ..
        })
    ));
}
