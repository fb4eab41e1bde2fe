use std::error::Error;
use std::pin::Pin;

use async_trait::async_trait;
use bson::oid::ObjectId;
use bson::DateTime;
use futures::io::AsyncRead;
use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

/// Open read handle onto a stored payload. Dropping it closes the handle.
pub type PayloadReader = Pin<Box<dyn AsyncRead + Send>>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(#[from] Box<dyn Error + Send + Sync>),

    #[error("I/O error while moving payload bytes")]
    Io(#[from] std::io::Error),

    #[error("no file with id {0}")]
    FileNotFound(ObjectId),

    #[error("malformed files record: {0}")]
    MalformedRecord(String),

    #[error("store connection is closed")]
    Closed,
}

/// One record of a bucket's `.files` collection.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredFile {
    /// Identifier assigned by the store on write.
    pub id: ObjectId,
    /// Filename as supplied by the writer. Not unique.
    pub filename: String,
    /// Upload timestamp assigned by the store.
    pub upload_date: DateTime,
    /// Payload size in bytes.
    pub length: u64,
    /// Size of each chunk in `.chunks`, in bytes.
    pub chunk_size: u32,
    /// Hex encoded MD5 of the payload, when the record carries one.
    pub checksum: Option<String>,
}

/// A chunked-file store scoped to a single bucket.
///
/// Implementations own their network session (if any). Every operation runs
/// to completion or failure; nothing here retries.
#[async_trait]
pub trait GridStore: Send + Sync + 'static {
    /// Name of the bucket this handle is bound to.
    fn bucket_name(&self) -> &str;

    /// Writes `data` as a new file named `filename` and returns its fresh id.
    async fn put(&self, data: &[u8], filename: &str) -> StoreResult<ObjectId>;

    /// Opens the payload of the file with the given id.
    async fn open_download(&self, id: ObjectId) -> StoreResult<PayloadReader>;

    /// Removes the file record and all of its chunks.
    async fn delete(&self, id: ObjectId) -> StoreResult<()>;

    /// `find_one({_id: id})` projected onto the checksum field.
    ///
    /// `Ok(None)` means there is no record with that id.
    async fn checksum(&self, id: ObjectId) -> StoreResult<Option<String>>;

    /// `find_one({filename})` sorted by `uploadDate` descending.
    async fn latest_by_filename(&self, filename: &str) -> StoreResult<Option<StoredFile>>;

    /// Releases the underlying session. Later calls may fail with [`StoreError::Closed`].
    async fn close(&self) -> StoreResult<()>;
}
