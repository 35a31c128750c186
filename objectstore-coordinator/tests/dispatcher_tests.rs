use objectstore_coordinator::{
    CoordinatorError, CoordinatorResult, DataType, MapStoreExecutor, ObjectValue, Operation,
    OperationDispatcher, OperationExecutor,
};
use objectstore_storage::{MemoryStorageEngine, StorageEngine};
use objectstore_types::{FieldMap, ObjectKey};
use pretty_assertions::assert_eq;
use std::sync::{Arc, Mutex};

fn fields(pairs: &[(&str, &str)]) -> FieldMap {
    pairs
        .iter()
        .map(|(k, v)| (k.as_bytes().to_vec(), v.as_bytes().to_vec()))
        .collect()
}

fn storage() -> Arc<MemoryStorageEngine> {
    Arc::new(MemoryStorageEngine::open_in_memory().unwrap())
}

/// Executor that only records the calls it receives.
#[derive(Default)]
struct Recorder {
    calls: Mutex<Vec<String>>,
}

impl OperationExecutor for Recorder {
    fn put(&self, key: &ObjectKey, _value: &ObjectValue) -> CoordinatorResult<()> {
        self.calls.lock().unwrap().push(format!("put {key}"));
        Ok(())
    }

    fn get(&self, _key: &ObjectKey) -> CoordinatorResult<ObjectValue> {
        Ok(ObjectValue::Map(fields(&[("extra", "1")])))
    }

    fn delete(&self, key: &ObjectKey) -> CoordinatorResult<()> {
        self.calls.lock().unwrap().push(format!("delete {key}"));
        Ok(())
    }

    fn publish(&self, key: &ObjectKey, _value: &ObjectValue) -> CoordinatorResult<()> {
        self.calls.lock().unwrap().push(format!("publish {key}"));
        Ok(())
    }

    fn publish_delete(&self, key: &ObjectKey) -> CoordinatorResult<()> {
        self.calls.lock().unwrap().push(format!("publish_delete {key}"));
        Ok(())
    }
}

// ── Registration ─────────────────────────────────────────────────

#[test]
fn missing_executor_is_an_init_error() {
    let dispatcher = OperationDispatcher::new();
    let err = dispatcher
        .get(DataType::Map, &ObjectKey::from("k"))
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::Init(_)));
}

#[test]
fn duplicate_registration_is_ignored() {
    let dispatcher = OperationDispatcher::new();
    let recorder = Arc::new(Recorder::default());
    let executor: Arc<dyn OperationExecutor> = recorder.clone();
    dispatcher.register(DataType::Map, Arc::clone(&executor));
    dispatcher.register(DataType::Map, Arc::clone(&executor));

    dispatcher
        .put(&ObjectKey::from("k"), &ObjectValue::Map(fields(&[("a", "1")])))
        .unwrap();
    assert_eq!(recorder.calls.lock().unwrap().len(), 1);

    dispatcher.unregister(DataType::Map, &executor);
    assert!(dispatcher.delete(DataType::Map, &ObjectKey::from("k")).is_err());
}

// ── Fan-out ──────────────────────────────────────────────────────

#[test]
fn get_merges_every_executor() {
    let store = storage();
    let dispatcher = OperationDispatcher::with_map_storage(store.clone());
    dispatcher.register(DataType::Map, Arc::new(Recorder::default()));

    let key = ObjectKey::from("k");
    store.put_hash(&key, &fields(&[("a", "1")])).unwrap();
    let value = dispatcher.get(DataType::Map, &key).unwrap();
    assert_eq!(value, ObjectValue::Map(fields(&[("a", "1"), ("extra", "1")])));
}

#[test]
fn operations_execute_through_map_store() {
    let store = storage();
    let dispatcher = OperationDispatcher::new();
    dispatcher.register(DataType::Map, Arc::new(MapStoreExecutor::new(store.clone())));
    let key = ObjectKey::from("k");

    Operation::put(key.clone(), fields(&[("a", "1")]))
        .execute(&dispatcher)
        .unwrap();
    Operation::put(key.clone(), fields(&[("b", "2")]))
        .execute(&dispatcher)
        .unwrap();
    let value = Operation::get(key.clone(), DataType::Map)
        .execute(&dispatcher)
        .unwrap();
    assert_eq!(value, Some(ObjectValue::Map(fields(&[("a", "1"), ("b", "2")]))));

    Operation::publish(key.clone(), fields(&[("a", "9")]))
        .execute(&dispatcher)
        .unwrap();
    assert_eq!(store.get_hash(&key).unwrap(), fields(&[("a", "9"), ("b", "2")]));

    Operation::delete(key.clone(), DataType::Map)
        .execute(&dispatcher)
        .unwrap();
    assert!(store.get_hash(&key).unwrap().is_empty());
}

#[test]
fn storage_failure_propagates() {
    let store = storage();
    let dispatcher = OperationDispatcher::with_map_storage(store.clone());
    store.close().unwrap();
    let err = dispatcher
        .put(&ObjectKey::from("k"), &ObjectValue::Map(fields(&[("a", "1")])))
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::Storage(_)));
}

#[test]
fn every_executor_runs_despite_an_error() {
    let store = storage();
    let dispatcher = OperationDispatcher::with_map_storage(store.clone());
    let recorder = Arc::new(Recorder::default());
    dispatcher.register(DataType::Map, recorder.clone());
    store.close().unwrap();

    let key = ObjectKey::from("k");
    assert!(dispatcher.delete(DataType::Map, &key).is_err());
    assert_eq!(*recorder.calls.lock().unwrap(), vec!["delete k".to_string()]);
}
