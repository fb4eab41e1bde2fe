pub mod memory_store;
pub mod store;

pub use bson::oid::ObjectId;
pub use bson::DateTime;

pub use memory_store::MemoryGridStore;
pub use store::{GridStore, PayloadReader, StoreError, StoreResult, StoredFile};
