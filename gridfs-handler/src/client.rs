use std::fmt::{self, Display, Formatter};
use std::path::Path;

use futures::future::BoxFuture;
use futures::io::AsyncReadExt;
use grid_store::{GridStore, ObjectId, StoreError};
use serde::Serialize;

use crate::config::StoreConfig;
use crate::errors::GridFsError;
use crate::mongo_store::MongoGridStore;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = -1;

/// Upper bound on the buffer reserved up front from a record's `length`.
const MAX_PREALLOC: usize = 16 * 1024 * 1024;

/// What a successful put produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutReceipt {
    pub id: ObjectId,
    pub checksum: String,
}

/// The `(code, id, md5)` triple returned by [`FileStoreClient::put`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PutOutcome {
    pub code: i32,
    pub id: Option<String>,
    pub md5: Option<String>,
}

impl PutOutcome {
    pub fn failure() -> Self {
        Self {
            code: FAILURE,
            id: None,
            md5: None,
        }
    }

    pub fn code(&self) -> i32 {
        self.code
    }

    pub fn is_success(&self) -> bool {
        self.code == SUCCESS
    }

    pub fn into_tuple(self) -> (i32, Option<String>, Option<String>) {
        (self.code, self.id, self.md5)
    }
}

impl From<PutReceipt> for PutOutcome {
    fn from(receipt: PutReceipt) -> Self {
        Self {
            code: SUCCESS,
            id: Some(receipt.id.to_hex()),
            md5: Some(receipt.checksum),
        }
    }
}

impl Display for PutOutcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "retval: {}, id: {}, md5: {}",
            self.code,
            self.id.as_deref().unwrap_or("None"),
            self.md5.as_deref().unwrap_or("None")
        )
    }
}

/// Client for a single GridFS bucket.
///
/// Holds the store handle until [`close`](Self::close) is called. Dropping an
/// open client inside a tokio runtime spawns the close; outside one the
/// handle is simply dropped.
pub struct FileStoreClient<S: GridStore = MongoGridStore> {
    store: Option<S>,
    bucket: String,
}

impl FileStoreClient<MongoGridStore> {
    /// Connects to the MongoDB server named by `config` and binds its bucket.
    pub async fn connect(config: &StoreConfig) -> Result<Self, GridFsError> {
        match MongoGridStore::connect(config).await {
            Ok(store) => {
                tracing::info!(%config, "connected to gridfs");
                Ok(Self::with_store(store))
            }
            Err(source) => {
                tracing::error!(%config, error = %source, "failed to connect to gridfs");
                Err(GridFsError::Connection {
                    target: config.to_string(),
                    source,
                })
            }
        }
    }

    /// Connects, runs `f`, and closes the client whatever `f` returned.
    pub async fn with_connection<F, T>(config: &StoreConfig, f: F) -> Result<T, GridFsError>
    where
        F: for<'c> FnOnce(&'c FileStoreClient<MongoGridStore>) -> BoxFuture<'c, T>,
    {
        let client = Self::connect(config).await?;
        Ok(client.scoped(f).await)
    }
}

impl<S: GridStore> FileStoreClient<S> {
    pub fn with_store(store: S) -> Self {
        let bucket = store.bucket_name().to_string();
        Self {
            store: Some(store),
            bucket,
        }
    }

    pub fn bucket_name(&self) -> &str {
        &self.bucket
    }

    pub fn is_connected(&self) -> bool {
        self.store.is_some()
    }

    /// Releases the connection. Calling it on a closed client does nothing.
    pub async fn close(&mut self) {
        if let Some(store) = self.store.take() {
            match store.close().await {
                Ok(()) => tracing::info!(bucket = %self.bucket, "closed gridfs connection"),
                Err(err) => {
                    tracing::error!(bucket = %self.bucket, error = %err, "error while closing gridfs connection")
                }
            }
        }
    }

    /// Runs `f` against this client and closes it afterwards.
    pub async fn scoped<F, T>(mut self, f: F) -> T
    where
        F: for<'c> FnOnce(&'c Self) -> BoxFuture<'c, T>,
    {
        let output = f(&self).await;
        self.close().await;
        output
    }

    fn store(&self) -> Result<&S, GridFsError> {
        self.store.as_ref().ok_or(GridFsError::Closed)
    }

    /// Stores the local file at `path` under a filename equal to the path.
    ///
    /// Every failure is logged and collapses to [`PutOutcome::failure`].
    pub async fn put(&self, path: impl AsRef<Path>) -> PutOutcome {
        match self.try_put(path).await {
            Ok(receipt) => receipt.into(),
            Err(_) => PutOutcome::failure(),
        }
    }

    /// Like [`put`](Self::put), but reports why it failed.
    pub async fn try_put(&self, path: impl AsRef<Path>) -> Result<PutReceipt, GridFsError> {
        let result = self.put_file(path.as_ref()).await;
        if let Err(err) = &result {
            tracing::error!(bucket = %self.bucket, error = %err, "put failed");
        }
        result
    }

    async fn put_file(&self, path: &Path) -> Result<PutReceipt, GridFsError> {
        let store = self.store()?;
        let filename = validate_path(path)?;
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|_| invalid_input(filename, "no such file"))?;
        if !metadata.is_file() {
            return Err(invalid_input(filename, "not a regular file"));
        }
        let content = tokio::fs::read(path)
            .await
            .map_err(|source| GridFsError::LocalRead {
                path: filename.to_string(),
                source,
            })?;

        let id = store
            .put(&content, filename)
            .await
            .map_err(|source| GridFsError::WriteFailure {
                filename: filename.to_string(),
                source,
            })?;

        match store.checksum(id).await {
            Ok(Some(checksum)) => {
                tracing::info!(bucket = %self.bucket, %id, filename, bytes = content.len(), "put file");
                Ok(PutReceipt { id, checksum })
            }
            Ok(None) => Err(GridFsError::MetadataInconsistency { id, source: None }),
            Err(source) => Err(GridFsError::MetadataInconsistency {
                id,
                source: Some(source),
            }),
        }
    }

    /// Returns the content of the latest file stored under `filename`.
    ///
    /// `None` covers both "no such file" and any lookup or read failure; use
    /// [`try_get`](Self::try_get) to tell them apart.
    pub async fn get(&self, filename: &str) -> Option<Vec<u8>> {
        self.try_get(filename).await.ok().flatten()
    }

    /// Returns `Ok(None)` when no file is stored under `filename`.
    pub async fn try_get(&self, filename: &str) -> Result<Option<Vec<u8>>, GridFsError> {
        let result = self.get_latest(filename).await;
        match &result {
            Ok(None) => tracing::debug!(bucket = %self.bucket, filename, "no file with that name"),
            Ok(Some(_)) => {}
            Err(err) => tracing::error!(bucket = %self.bucket, filename, error = %err, "get failed"),
        }
        result
    }

    async fn get_latest(&self, filename: &str) -> Result<Option<Vec<u8>>, GridFsError> {
        let store = self.store()?;
        let record = store
            .latest_by_filename(filename)
            .await
            .map_err(|source| GridFsError::Lookup {
                filename: filename.to_string(),
                source,
            })?;
        let Some(record) = record else {
            return Ok(None);
        };

        let id = record.id;
        let read_failure = |source: StoreError| GridFsError::ReadFailure { id, source };
        let mut reader = store.open_download(id).await.map_err(read_failure)?;
        let reserve = usize::try_from(record.length).map_or(MAX_PREALLOC, |len| len.min(MAX_PREALLOC));
        let mut content = Vec::with_capacity(reserve);
        reader
            .read_to_end(&mut content)
            .await
            .map_err(|err| read_failure(StoreError::Io(err)))?;
        drop(reader);

        tracing::debug!(bucket = %self.bucket, %id, filename, bytes = content.len(), "read file");
        Ok(Some(content))
    }

    /// Deletes the file with the given hex id.
    pub async fn delete(&self, id: &str) -> Result<(), GridFsError> {
        let result = self.delete_by_id(id).await;
        match &result {
            Ok(()) => tracing::info!(bucket = %self.bucket, id, "deleted file"),
            Err(err) => tracing::error!(bucket = %self.bucket, id, error = %err, "delete failed"),
        }
        result
    }

    async fn delete_by_id(&self, id: &str) -> Result<(), GridFsError> {
        let store = self.store()?;
        let oid = ObjectId::parse_str(id).map_err(|source| GridFsError::InvalidId {
            id: id.to_string(),
            source,
        })?;
        store
            .delete(oid)
            .await
            .map_err(|source| GridFsError::DeleteFailure {
                id: id.to_string(),
                source,
            })
    }
}

impl<S: GridStore> Drop for FileStoreClient<S> {
    fn drop(&mut self) {
        let Some(store) = self.store.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let bucket = self.bucket.clone();
                tracing::debug!(bucket = %bucket, "client dropped while open, closing store");
                runtime.spawn(async move {
                    if let Err(err) = store.close().await {
                        tracing::error!(bucket = %bucket, error = %err, "error while closing dropped client");
                    }
                });
            }
            Err(_) => {
                tracing::debug!(bucket = %self.bucket, "client dropped outside a runtime, releasing store handle");
                drop(store);
            }
        }
    }
}

fn invalid_input(path: &str, reason: &'static str) -> GridFsError {
    GridFsError::InvalidInput {
        path: path.to_string(),
        reason,
    }
}

fn validate_path(path: &Path) -> Result<&str, GridFsError> {
    let filename = path
        .to_str()
        .ok_or_else(|| invalid_input(&path.to_string_lossy(), "path is not valid UTF-8"))?;
    if filename.is_empty() {
        return Err(invalid_input(filename, "empty path"));
    }
    Ok(filename)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, Write};
    use std::pin::Pin;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::task::{Context, Poll};
    use std::time::Duration;

    use async_trait::async_trait;
    use futures::io::AsyncRead;
    use grid_store::{DateTime, MemoryGridStore, PayloadReader, StoreResult, StoredFile};
    use tempfile::{tempdir, NamedTempFile};

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    enum Fault {
        None,
        ForgetRecord,
        HugeLength,
        OpenFails,
        ReadFails,
    }

    /// Wraps a `MemoryGridStore` and misbehaves in one chosen way.
    struct FaultyStore {
        inner: MemoryGridStore,
        fault: Fault,
        dropped: Arc<AtomicBool>,
    }

    impl FaultyStore {
        fn new(fault: Fault) -> (Self, MemoryGridStore, Arc<AtomicBool>) {
            let inner = MemoryGridStore::new("fs");
            let dropped = Arc::new(AtomicBool::new(false));
            let store = Self {
                inner: inner.clone(),
                fault,
                dropped: dropped.clone(),
            };
            (store, inner, dropped)
        }
    }

    impl Drop for FaultyStore {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    struct BrokenReader;

    impl AsyncRead for BrokenReader {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut [u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "chunk stream reset",
            )))
        }
    }

    #[async_trait]
    impl GridStore for FaultyStore {
        fn bucket_name(&self) -> &str {
            self.inner.bucket_name()
        }

        async fn put(&self, data: &[u8], filename: &str) -> StoreResult<ObjectId> {
            let id = self.inner.put(data, filename).await?;
            if self.fault == Fault::ForgetRecord {
                self.inner.forget_record(id).await;
            }
            Ok(id)
        }

        async fn open_download(&self, id: ObjectId) -> StoreResult<PayloadReader> {
            match self.fault {
                Fault::OpenFails => Err(StoreError::Backend("download stream unavailable".into())),
                Fault::ReadFails => Ok(Box::pin(BrokenReader)),
                _ => self.inner.open_download(id).await,
            }
        }

        async fn delete(&self, id: ObjectId) -> StoreResult<()> {
            self.inner.delete(id).await
        }

        async fn checksum(&self, id: ObjectId) -> StoreResult<Option<String>> {
            self.inner.checksum(id).await
        }

        async fn latest_by_filename(&self, filename: &str) -> StoreResult<Option<StoredFile>> {
            let latest = self.inner.latest_by_filename(filename).await?;
            if self.fault == Fault::HugeLength {
                return Ok(latest.map(|record| StoredFile {
                    length: u64::MAX,
                    ..record
                }));
            }
            Ok(latest)
        }

        async fn close(&self) -> StoreResult<()> {
            self.inner.close().await
        }
    }

    fn client() -> (FileStoreClient<MemoryGridStore>, MemoryGridStore) {
        let store = MemoryGridStore::new("fs");
        (FileStoreClient::with_store(store.clone()), store)
    }

    fn temp_file(content: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content).unwrap();
        file.flush().unwrap();
        file
    }

    #[tokio::test]
    async fn test_put_then_get_returns_same_bytes() {
        let (client, _) = client();
        let file = temp_file(b"0123456789");
        let filename = file.path().to_str().unwrap();

        let outcome = client.put(filename).await;

        assert!(outcome.is_success());
        assert_eq!(outcome.code(), SUCCESS);
        assert_eq!(outcome.id.as_ref().unwrap().len(), 24);
        assert_eq!(
            outcome.md5.as_deref(),
            Some("781e5e245d69b566979b86e28d23f2c7")
        );
        assert_eq!(client.get(filename).await.unwrap(), b"0123456789");
    }

    #[tokio::test]
    async fn test_put_missing_file_writes_nothing() {
        let (client, store) = client();
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing.png");

        let outcome = client.put(&missing).await;

        assert_eq!(outcome, PutOutcome::failure());
        assert_eq!(outcome.into_tuple(), (FAILURE, None, None));
        assert_eq!(store.file_count().await, 0);
        assert!(matches!(
            client.try_put(&missing).await,
            Err(GridFsError::InvalidInput { .. })
        ));
    }

    #[tokio::test]
    async fn test_put_empty_path_fails() {
        let (client, store) = client();

        assert_eq!(client.put("").await, PutOutcome::failure());
        assert_eq!(store.file_count().await, 0);
    }

    #[tokio::test]
    async fn test_put_directory_fails() {
        let (client, store) = client();
        let dir = tempdir().unwrap();

        assert_eq!(client.put(dir.path()).await, PutOutcome::failure());
        assert!(matches!(
            client.try_put(dir.path()).await,
            Err(GridFsError::InvalidInput { reason: "not a regular file", .. })
        ));
        assert_eq!(store.file_count().await, 0);
    }

    #[tokio::test]
    async fn test_put_write_failure_on_closed_store() {
        let store = MemoryGridStore::new("fs");
        let client = FileStoreClient::with_store(store.clone());
        let file = temp_file(b"payload");
        store.close().await.unwrap();

        let result = client.try_put(file.path()).await;

        assert!(matches!(result, Err(GridFsError::WriteFailure { .. })));
        assert_eq!(client.put(file.path()).await, PutOutcome::failure());
    }

    #[tokio::test]
    async fn test_get_unknown_filename_is_none() {
        let (client, _) = client();

        assert!(client.get("nope.txt").await.is_none());
        assert!(client.try_get("nope.txt").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_returns_latest_upload_date() {
        let (client, store) = client();
        store
            .insert_at(b"second", "a.txt", DateTime::from_millis(2_000))
            .await
            .unwrap();
        store
            .insert_at(b"third-but-older", "a.txt", DateTime::from_millis(1_500))
            .await
            .unwrap();
        store
            .insert_at(b"first", "a.txt", DateTime::from_millis(1_000))
            .await
            .unwrap();

        assert_eq!(client.get("a.txt").await.unwrap(), b"second");
    }

    #[tokio::test]
    async fn test_repeated_puts_of_same_path_keep_every_version() {
        let (client, store) = client();
        let file = temp_file(b"v1");

        let first = client.put(file.path()).await;
        std::fs::write(file.path(), b"v2").unwrap();
        let second = client.put(file.path()).await;

        assert!(first.is_success() && second.is_success());
        assert_ne!(first.id, second.id);
        assert_eq!(store.file_count().await, 2);
    }

    #[tokio::test]
    async fn test_try_get_reports_lookup_failure_on_closed_store() {
        let (client, store) = client();
        let id = store.put(b"data", "a.txt").await.unwrap();
        store.close().await.unwrap();

        assert!(client.get("a.txt").await.is_none());
        assert!(matches!(
            client.try_get("a.txt").await,
            Err(GridFsError::Lookup { .. })
        ));
        assert!(store.file(id).await.is_some());
    }

    #[tokio::test]
    async fn test_try_get_reports_read_failure_when_download_cannot_open() {
        let (store, inner, _) = FaultyStore::new(Fault::OpenFails);
        let id = inner.put(b"data", "a.txt").await.unwrap();
        let client = FileStoreClient::with_store(store);

        assert!(client.get("a.txt").await.is_none());
        assert!(matches!(
            client.try_get("a.txt").await,
            Err(GridFsError::ReadFailure { id: failed, .. }) if failed == id
        ));
    }

    #[tokio::test]
    async fn test_try_get_reports_read_failure_when_stream_breaks() {
        let (store, inner, _) = FaultyStore::new(Fault::ReadFails);
        let id = inner.put(b"data", "a.txt").await.unwrap();
        let client = FileStoreClient::with_store(store);

        assert!(client.get("a.txt").await.is_none());
        assert!(matches!(
            client.try_get("a.txt").await,
            Err(GridFsError::ReadFailure { id: failed, source: StoreError::Io(_) }) if failed == id
        ));
    }

    #[tokio::test]
    async fn test_get_ignores_absurd_record_length() {
        let (store, inner, _) = FaultyStore::new(Fault::HugeLength);
        inner.put(b"0123456789", "a.txt").await.unwrap();
        let client = FileStoreClient::with_store(store);

        assert_eq!(client.get("a.txt").await.unwrap(), b"0123456789");
    }

    #[tokio::test]
    async fn test_put_reports_missing_metadata_record() {
        let (store, _, _) = FaultyStore::new(Fault::ForgetRecord);
        let client = FileStoreClient::with_store(store);
        let file = temp_file(b"payload");

        assert!(matches!(
            client.try_put(file.path()).await,
            Err(GridFsError::MetadataInconsistency { source: None, .. })
        ));
        assert_eq!(client.put(file.path()).await, PutOutcome::failure());
    }

    #[tokio::test]
    async fn test_dropping_open_client_closes_store() {
        let (store, inner, dropped) = FaultyStore::new(Fault::None);
        let client = FileStoreClient::with_store(store);

        drop(client);

        tokio::time::timeout(Duration::from_secs(1), async {
            while !(inner.is_closed() && dropped.load(Ordering::SeqCst)) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("store was not closed after the client was dropped");
    }

    #[test]
    fn test_dropping_open_client_outside_runtime_releases_store() {
        let (store, inner, dropped) = FaultyStore::new(Fault::None);
        let client = FileStoreClient::with_store(store);

        drop(client);

        assert!(dropped.load(Ordering::SeqCst));
        assert!(!inner.is_closed());
    }

    #[tokio::test]
    async fn test_close_releases_store_immediately() {
        let (store, inner, dropped) = FaultyStore::new(Fault::None);
        let mut client = FileStoreClient::with_store(store);

        client.close().await;

        assert!(inner.is_closed());
        assert!(dropped.load(Ordering::SeqCst));
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_delete_removes_file_and_second_delete_fails() {
        let (client, store) = client();
        let id = store.put(b"bye", "gone.txt").await.unwrap();

        client.delete(&id.to_hex()).await.unwrap();

        assert!(store.open_download(id).await.is_err());
        assert!(client.get("gone.txt").await.is_none());
        assert!(matches!(
            client.delete(&id.to_hex()).await,
            Err(GridFsError::DeleteFailure { .. })
        ));
    }

    #[tokio::test]
    async fn test_delete_rejects_malformed_id() {
        let (client, _) = client();

        assert!(matches!(
            client.delete("not-an-object-id").await,
            Err(GridFsError::InvalidId { .. })
        ));
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_isolated() {
        let (mut first, first_store) = client();
        let (second, _) = client();

        first.close().await;
        first.close().await;

        assert!(!first.is_connected());
        assert!(first_store.is_closed());
        assert!(matches!(first.delete("51a6f2b1e4b0c1a2b3c4d5e6").await, Err(GridFsError::Closed)));
        assert_eq!(first.put("whatever").await, PutOutcome::failure());
        assert!(second.is_connected());
        let file = temp_file(b"still works");
        assert!(second.put(file.path()).await.is_success());
    }

    #[tokio::test]
    async fn test_scoped_closes_after_use() {
        let (client, store) = client();
        let file = temp_file(b"scoped");
        let path = file.path().to_path_buf();

        let outcome = client
            .scoped(|c| Box::pin(async move { c.put(&path).await }))
            .await;

        assert!(outcome.is_success());
        assert!(store.is_closed());
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(
            PutOutcome::failure().to_string(),
            "retval: -1, id: None, md5: None"
        );
        let receipt = PutReceipt {
            id: ObjectId::parse_str("51a6f2b1e4b0c1a2b3c4d5e6").unwrap(),
            checksum: "781e5e245d69b566979b86e28d23f2c7".to_string(),
        };
        assert_eq!(
            PutOutcome::from(receipt).to_string(),
            "retval: 0, id: 51a6f2b1e4b0c1a2b3c4d5e6, md5: 781e5e245d69b566979b86e28d23f2c7"
        );
    }
}
