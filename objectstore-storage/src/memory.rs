//! In-memory storage engine.

use crate::{StorageEngine, StorageError, StorageResult};
use objectstore_types::{FieldMap, ObjectKey};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

type Table = Option<HashMap<ObjectKey, FieldMap>>;

/// Hash-map storage held entirely in process memory.
///
/// The table is `None` while the engine is closed.
#[derive(Debug, Default)]
pub struct MemoryStorageEngine {
    table: RwLock<Table>,
}

impl MemoryStorageEngine {
    /// Creates a closed engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an engine that is already open.
    pub fn open_in_memory() -> StorageResult<Self> {
        let engine = Self::new();
        engine.open()?;
        Ok(engine)
    }

    /// Number of keys currently stored.
    pub fn len(&self) -> StorageResult<usize> {
        Ok(self.read()?.as_ref().map_or(0, HashMap::len))
    }

    pub fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }

    fn read(&self) -> StorageResult<RwLockReadGuard<'_, Table>> {
        self.table.read().map_err(|_| StorageError::LockPoisoned)
    }

    fn write(&self) -> StorageResult<RwLockWriteGuard<'_, Table>> {
        self.table.write().map_err(|_| StorageError::LockPoisoned)
    }
}

impl StorageEngine for MemoryStorageEngine {
    fn open(&self) -> StorageResult<()> {
        let mut table = self.write()?;
        if table.is_none() {
            *table = Some(HashMap::new());
            info!("memory storage engine opened");
        }
        Ok(())
    }

    fn close(&self) -> StorageResult<()> {
        let mut table = self.write()?;
        if table.take().is_some() {
            info!("memory storage engine closed");
        }
        Ok(())
    }

    fn clear(&self) -> StorageResult<()> {
        if let Some(map) = self.write()?.as_mut() {
            map.clear();
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.read().map(|t| t.is_some()).unwrap_or(false)
    }

    fn put_hash(&self, key: &ObjectKey, fields: &FieldMap) -> StorageResult<()> {
        let mut table = self.write()?;
        let map = table.as_mut().ok_or(StorageError::NotOpen)?;
        let stored = map.entry(key.clone()).or_default();
        for (field, value) in fields {
            stored.insert(field.clone(), value.clone());
        }
        debug!(key = %key, fields = fields.len(), total = stored.len(), "put hash");
        Ok(())
    }

    fn get_hash(&self, key: &ObjectKey) -> StorageResult<FieldMap> {
        let table = self.read()?;
        let map = table.as_ref().ok_or(StorageError::NotOpen)?;
        let fields = map.get(key).cloned().unwrap_or_default();
        debug!(key = %key, fields = fields.len(), "get hash");
        Ok(fields)
    }

    fn delete_key(&self, key: &ObjectKey) -> StorageResult<()> {
        let mut table = self.write()?;
        let map = table.as_mut().ok_or(StorageError::NotOpen)?;
        map.remove(key);
        debug!(key = %key, "delete key");
        Ok(())
    }
}
