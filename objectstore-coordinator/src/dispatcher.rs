//! Routing of operations to storage executors by data type.

use crate::error::{CoordinatorError, CoordinatorResult};
use crate::operation::{DataType, ObjectValue};
use crate::sync;
use objectstore_storage::StorageEngine;
use objectstore_types::ObjectKey;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Carries out operations of one data type against a storage backend.
pub trait OperationExecutor: Send + Sync {
    fn put(&self, key: &ObjectKey, value: &ObjectValue) -> CoordinatorResult<()>;

    fn get(&self, key: &ObjectKey) -> CoordinatorResult<ObjectValue>;

    fn delete(&self, key: &ObjectKey) -> CoordinatorResult<()>;

    /// Applies a change pushed by the device that owns `key`.
    fn publish(&self, key: &ObjectKey, value: &ObjectValue) -> CoordinatorResult<()>;

    /// Applies a deletion pushed by the device that owns `key`.
    fn publish_delete(&self, key: &ObjectKey) -> CoordinatorResult<()>;
}

/// Registry of executors keyed by data type.
///
/// Every call fans out to all executors registered for the type and returns
/// the first error. A type with no executors is an initialization error.
#[derive(Default)]
pub struct OperationDispatcher {
    executors: RwLock<HashMap<DataType, Vec<Arc<dyn OperationExecutor>>>>,
}

impl OperationDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a dispatcher with a single map executor over `storage`.
    pub fn with_map_storage(storage: Arc<dyn StorageEngine>) -> Self {
        let dispatcher = Self::new();
        dispatcher.register(DataType::Map, Arc::new(MapStoreExecutor::new(storage)));
        dispatcher
    }

    /// Registers `executor` for `data_type`. Registering the same executor
    /// twice is a no-op.
    pub fn register(&self, data_type: DataType, executor: Arc<dyn OperationExecutor>) {
        let mut executors = sync::write(&self.executors);
        let entry = executors.entry(data_type).or_default();
        if !entry.iter().any(|e| Arc::ptr_eq(e, &executor)) {
            entry.push(executor);
        }
    }

    pub fn unregister(&self, data_type: DataType, executor: &Arc<dyn OperationExecutor>) {
        let mut executors = sync::write(&self.executors);
        if let Some(entry) = executors.get_mut(&data_type) {
            entry.retain(|e| !Arc::ptr_eq(e, executor));
            if entry.is_empty() {
                executors.remove(&data_type);
            }
        }
    }

    fn executors(&self, data_type: DataType) -> CoordinatorResult<Vec<Arc<dyn OperationExecutor>>> {
        match sync::read(&self.executors).get(&data_type) {
            Some(entry) if !entry.is_empty() => Ok(entry.clone()),
            _ => Err(CoordinatorError::Init(format!(
                "no executor registered for {data_type:?}"
            ))),
        }
    }

    fn for_each(
        &self,
        data_type: DataType,
        mut f: impl FnMut(&dyn OperationExecutor) -> CoordinatorResult<()>,
    ) -> CoordinatorResult<()> {
        let mut first_error = None;
        for executor in self.executors(data_type)? {
            if let Err(e) = f(executor.as_ref()) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    pub fn put(&self, key: &ObjectKey, value: &ObjectValue) -> CoordinatorResult<()> {
        self.for_each(value.data_type(), |e| e.put(key, value))
    }

    /// Reads `key`, merging what every executor returns.
    pub fn get(&self, data_type: DataType, key: &ObjectKey) -> CoordinatorResult<ObjectValue> {
        let mut result = ObjectValue::empty(data_type);
        for executor in self.executors(data_type)? {
            result.merge(&executor.get(key)?)?;
        }
        Ok(result)
    }

    pub fn delete(&self, data_type: DataType, key: &ObjectKey) -> CoordinatorResult<()> {
        self.for_each(data_type, |e| e.delete(key))
    }

    pub fn publish(&self, key: &ObjectKey, value: &ObjectValue) -> CoordinatorResult<()> {
        self.for_each(value.data_type(), |e| e.publish(key, value))
    }

    pub fn publish_delete(&self, data_type: DataType, key: &ObjectKey) -> CoordinatorResult<()> {
        self.for_each(data_type, |e| e.publish_delete(key))
    }
}

/// Executor for [`DataType::Map`] values backed by a [`StorageEngine`].
pub struct MapStoreExecutor {
    storage: Arc<dyn StorageEngine>,
}

impl MapStoreExecutor {
    pub fn new(storage: Arc<dyn StorageEngine>) -> Self {
        Self { storage }
    }

    fn put_map(&self, key: &ObjectKey, value: &ObjectValue) -> CoordinatorResult<()> {
        match value {
            ObjectValue::Map(map) if map.is_empty() => {
                debug!(key = %key, "skipping empty map write");
                Ok(())
            }
            ObjectValue::Map(map) => Ok(self.storage.put_hash(key, map)?),
        }
    }
}

impl OperationExecutor for MapStoreExecutor {
    fn put(&self, key: &ObjectKey, value: &ObjectValue) -> CoordinatorResult<()> {
        self.put_map(key, value)
    }

    fn get(&self, key: &ObjectKey) -> CoordinatorResult<ObjectValue> {
        Ok(ObjectValue::Map(self.storage.get_hash(key)?))
    }

    fn delete(&self, key: &ObjectKey) -> CoordinatorResult<()> {
        Ok(self.storage.delete_key(key)?)
    }

    fn publish(&self, key: &ObjectKey, value: &ObjectValue) -> CoordinatorResult<()> {
        self.put_map(key, value)
    }

    fn publish_delete(&self, key: &ObjectKey) -> CoordinatorResult<()> {
        Ok(self.storage.delete_key(key)?)
    }
}
