// Storage abstraction for registry snapshots and claim queues
//
// The pool only ever reads and writes whole values: one singleton key for
// the provider snapshot, one key per provider id for its claim queue.
// Callers at the registry/claim-queue boundary treat a failed read as
// empty and a failed write as a no-op.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

/// Storage failure. Always swallowed (with a warning) above this layer;
/// availability of listing and leasing wins over strict durability.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Unified storage trait for opaque byte payloads
pub trait StorageBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;
}

/// In-memory storage useful for testing and single-instance deployments
#[derive(Clone, Default)]
pub struct MemoryStorage {
    data: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.data.read().get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.data.write().insert(key.to_string(), value.to_vec());
        Ok(())
    }
}

/// Durable storage backed by sled
pub struct SledStorage {
    db: sled::Db,
}

impl SledStorage {
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let db = sled::open(path).map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(Self { db })
    }
}

impl StorageBackend for SledStorage {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let value = self
            .db
            .get(key.as_bytes())
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(value.map(|ivec| ivec.to_vec()))
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.db
            .insert(key.as_bytes(), value)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        self.db
            .flush()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }
}
