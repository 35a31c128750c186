use objectstore_storage::{MemoryStorageEngine, StorageEngine, StorageError};
use objectstore_types::{FieldMap, ObjectKey};
use pretty_assertions::assert_eq;

fn fields(pairs: &[(&str, &str)]) -> FieldMap {
    pairs
        .iter()
        .map(|(k, v)| (k.as_bytes().to_vec(), v.as_bytes().to_vec()))
        .collect()
}

fn key() -> ObjectKey {
    ObjectKey::from("dataobject://A/0/bundle/store/obj")
}

// ── Lifecycle ─────────────────────────────────────────────────────

#[test]
fn new_engine_is_closed() {
    let engine = MemoryStorageEngine::new();
    assert!(!engine.is_open());
    assert_eq!(engine.get_hash(&key()), Err(StorageError::NotOpen));
    assert_eq!(engine.put_hash(&key(), &FieldMap::new()), Err(StorageError::NotOpen));
    assert_eq!(engine.delete_key(&key()), Err(StorageError::NotOpen));
}

#[test]
fn open_is_idempotent() {
    let engine = MemoryStorageEngine::open_in_memory().unwrap();
    engine.put_hash(&key(), &fields(&[("a", "1")])).unwrap();
    engine.open().unwrap();
    assert_eq!(engine.get_hash(&key()).unwrap(), fields(&[("a", "1")]));
}

#[test]
fn close_drops_contents() {
    let engine = MemoryStorageEngine::open_in_memory().unwrap();
    engine.put_hash(&key(), &fields(&[("a", "1")])).unwrap();
    engine.close().unwrap();
    engine.close().unwrap();
    assert!(!engine.is_open());
    engine.open().unwrap();
    assert!(engine.get_hash(&key()).unwrap().is_empty());
}

#[test]
fn clear_removes_all_keys() {
    let engine = MemoryStorageEngine::open_in_memory().unwrap();
    engine.put_hash(&key(), &fields(&[("a", "1")])).unwrap();
    engine.put_hash(&ObjectKey::from("other"), &fields(&[("b", "2")])).unwrap();
    assert_eq!(engine.len().unwrap(), 2);
    engine.clear().unwrap();
    assert!(engine.is_empty().unwrap());
}

#[test]
fn clear_on_closed_engine_succeeds() {
    let engine = MemoryStorageEngine::new();
    assert!(engine.clear().is_ok());
}

// ── Hash operations ───────────────────────────────────────────────

#[test]
fn get_missing_key_is_empty() {
    let engine = MemoryStorageEngine::open_in_memory().unwrap();
    assert!(engine.get_hash(&key()).unwrap().is_empty());
}

#[test]
fn put_merges_with_stored_fields() {
    let engine = MemoryStorageEngine::open_in_memory().unwrap();
    engine.put_hash(&key(), &fields(&[("a", "1"), ("b", "2")])).unwrap();
    engine.put_hash(&key(), &fields(&[("b", "3"), ("c", "4")])).unwrap();
    assert_eq!(
        engine.get_hash(&key()).unwrap(),
        fields(&[("a", "1"), ("b", "3"), ("c", "4")])
    );
}

#[test]
fn delete_removes_key() {
    let engine = MemoryStorageEngine::open_in_memory().unwrap();
    engine.put_hash(&key(), &fields(&[("a", "1")])).unwrap();
    engine.delete_key(&key()).unwrap();
    assert!(engine.get_hash(&key()).unwrap().is_empty());
}

#[test]
fn delete_missing_key_succeeds() {
    let engine = MemoryStorageEngine::open_in_memory().unwrap();
    assert!(engine.delete_key(&key()).is_ok());
}

#[test]
fn engine_is_usable_as_trait_object() {
    let engine: Box<dyn StorageEngine> = Box::new(MemoryStorageEngine::open_in_memory().unwrap());
    engine.put_hash(&key(), &fields(&[("x", "y")])).unwrap();
    assert_eq!(engine.get_hash(&key()).unwrap().len(), 1);
}
