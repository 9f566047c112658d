//! Persistence adapter: key layout plus the key-value store boundary.

pub mod keys;
pub mod store;

pub use store::{KeyValueStore, MemoryStore, StoreEvent, StoreHandle, TabId};
