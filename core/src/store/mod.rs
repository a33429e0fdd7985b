// Store module — key-value persistence for registry snapshots and claim queues

pub mod backend;

pub use backend::{MemoryStorage, SledStorage, StorageBackend, StoreError};
