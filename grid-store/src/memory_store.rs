use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bson::oid::ObjectId;
use bson::DateTime;
use tokio::sync::RwLock;

use crate::store::{GridStore, PayloadReader, StoreError, StoreResult, StoredFile};

/// Default GridFS chunk size, 255 KiB.
pub const DEFAULT_CHUNK_SIZE: u32 = 255 * 1024;

#[derive(Debug, Default)]
struct Bucket {
    files: BTreeMap<ObjectId, StoredFile>,
    chunks: HashMap<ObjectId, Vec<Vec<u8>>>,
}

/// A `GridStore` that keeps its `.files` and `.chunks` collections in memory.
///
/// Clones share the same bucket, so a test can keep one handle for inspection
/// while a client owns another.
#[derive(Clone, Debug)]
pub struct MemoryGridStore {
    bucket_name: String,
    chunk_size: u32,
    bucket: Arc<RwLock<Bucket>>,
    closed: Arc<AtomicBool>,
}

impl MemoryGridStore {
    pub fn new(bucket_name: impl Into<String>) -> Self {
        Self::with_chunk_size(bucket_name, DEFAULT_CHUNK_SIZE)
    }

    pub fn with_chunk_size(bucket_name: impl Into<String>, chunk_size: u32) -> Self {
        Self {
            bucket_name: bucket_name.into(),
            chunk_size: chunk_size.max(1),
            bucket: Arc::new(RwLock::new(Bucket::default())),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Writes a file with an explicit upload date instead of the current time.
    pub async fn insert_at(
        &self,
        data: &[u8],
        filename: &str,
        upload_date: DateTime,
    ) -> StoreResult<ObjectId> {
        self.ensure_open()?;
        let id = ObjectId::new();
        let chunks: Vec<Vec<u8>> = data
            .chunks(self.chunk_size as usize)
            .map(<[u8]>::to_vec)
            .collect();
        let record = StoredFile {
            id,
            filename: filename.to_string(),
            upload_date,
            length: data.len() as u64,
            chunk_size: self.chunk_size,
            checksum: Some(format!("{:x}", md5::compute(data))),
        };

        // Record and chunks become visible together.
        let mut bucket = self.bucket.write().await;
        bucket.chunks.insert(id, chunks);
        bucket.files.insert(id, record);
        tracing::debug!(bucket = %self.bucket_name, %id, filename, "stored file in memory");
        Ok(id)
    }

    pub async fn file(&self, id: ObjectId) -> Option<StoredFile> {
        self.bucket.read().await.files.get(&id).cloned()
    }

    pub async fn file_count(&self) -> usize {
        self.bucket.read().await.files.len()
    }

    pub async fn chunk_count(&self, id: ObjectId) -> usize {
        self.bucket
            .read()
            .await
            .chunks
            .get(&id)
            .map_or(0, Vec::len)
    }

    /// Drops the `.files` record but leaves the chunks behind.
    pub async fn forget_record(&self, id: ObjectId) -> Option<StoredFile> {
        self.bucket.write().await.files.remove(&id)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> StoreResult<()> {
        if self.is_closed() {
            return Err(StoreError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl GridStore for MemoryGridStore {
    fn bucket_name(&self) -> &str {
        &self.bucket_name
    }

    async fn put(&self, data: &[u8], filename: &str) -> StoreResult<ObjectId> {
        self.insert_at(data, filename, DateTime::now()).await
    }

    async fn open_download(&self, id: ObjectId) -> StoreResult<PayloadReader> {
        self.ensure_open()?;
        let bucket = self.bucket.read().await;
        if !bucket.files.contains_key(&id) {
            return Err(StoreError::FileNotFound(id));
        }
        let payload = bucket
            .chunks
            .get(&id)
            .map(|chunks| chunks.concat())
            .unwrap_or_default();
        Ok(Box::pin(futures::io::Cursor::new(payload)))
    }

    async fn delete(&self, id: ObjectId) -> StoreResult<()> {
        self.ensure_open()?;
        let mut bucket = self.bucket.write().await;
        let removed = bucket.files.remove(&id);
        bucket.chunks.remove(&id);
        match removed {
            Some(_) => Ok(()),
            None => Err(StoreError::FileNotFound(id)),
        }
    }

    async fn checksum(&self, id: ObjectId) -> StoreResult<Option<String>> {
        self.ensure_open()?;
        let bucket = self.bucket.read().await;
        match bucket.files.get(&id) {
            Some(record) => match &record.checksum {
                Some(checksum) => Ok(Some(checksum.clone())),
                None => Err(StoreError::MalformedRecord(format!(
                    "{} has no md5 field",
                    id
                ))),
            },
            None => Ok(None),
        }
    }

    async fn latest_by_filename(&self, filename: &str) -> StoreResult<Option<StoredFile>> {
        self.ensure_open()?;
        let bucket = self.bucket.read().await;
        let latest = bucket
            .files
            .values()
            .filter(|record| record.filename == filename)
            .max_by_key(|record| (record.upload_date, record.id))
            .cloned();
        Ok(latest)
    }

    async fn close(&self) -> StoreResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
