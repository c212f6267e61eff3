//! Restore-state store
//!
//! Entities that want to come back with their previous value after a
//! restart (a light that was on, a cover that was closed) read their last
//! known [`State`](ha_core::State) from this store when they are created.
//! The host dumps the state table into the store on shutdown.
//!
//! Persistence uses the `.storage/` directory layout: one versioned JSON
//! document per key, written atomically.

mod restore;
mod storage;

pub use restore::{RestoreStateStore, StoredState, RESTORE_STATE_KEY};
pub use storage::{Storage, StorageError, StorageFile, StorageResult};
