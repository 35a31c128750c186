//! Storage layer for the distributed object store.
//!
//! The coordinator only needs keyed hash-map storage: put a field map under a
//! key, read it back, delete the key. [`StorageEngine`] is that seam, and
//! [`MemoryStorageEngine`] is the in-process implementation used by default
//! and in tests.
//!
//! Writes merge: fields already stored under a key survive a `put_hash` that
//! does not mention them, and fields it does mention are overwritten.

mod error;
mod memory;

pub use error::{StorageError, StorageResult};
pub use memory::MemoryStorageEngine;

use objectstore_types::{FieldMap, ObjectKey};

/// Keyed hash-map storage.
///
/// Implementations are shared between the request handlers and background
/// tasks, so every method takes `&self`.
pub trait StorageEngine: Send + Sync {
    /// Opens the engine. Opening an open engine is a no-op.
    fn open(&self) -> StorageResult<()>;

    /// Closes the engine, dropping its contents. Closing twice is a no-op.
    fn close(&self) -> StorageResult<()>;

    /// Removes every key.
    fn clear(&self) -> StorageResult<()>;

    /// Whether the engine is currently open.
    fn is_open(&self) -> bool;

    /// Merges `fields` into the map stored under `key`.
    fn put_hash(&self, key: &ObjectKey, fields: &FieldMap) -> StorageResult<()>;

    /// Returns the map stored under `key`, empty if the key is absent.
    fn get_hash(&self, key: &ObjectKey) -> StorageResult<FieldMap>;

    /// Removes `key`. Removing an absent key succeeds.
    fn delete_key(&self, key: &ObjectKey) -> StorageResult<()>;
}
