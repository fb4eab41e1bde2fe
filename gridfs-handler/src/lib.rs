#![allow(clippy::uninlined_format_args)]
#![deny(unused_qualifications)]

pub mod client;
pub mod config;
pub mod errors;
pub mod mongo_store;

pub use client::{FileStoreClient, PutOutcome, PutReceipt, FAILURE, SUCCESS};
pub use config::StoreConfig;
pub use errors::GridFsError;
pub use mongo_store::MongoGridStore;

pub use grid_store::{GridStore, MemoryGridStore, ObjectId, StoreError, StoredFile};
