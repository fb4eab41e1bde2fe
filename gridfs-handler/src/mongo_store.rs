use async_trait::async_trait;
use grid_store::{GridStore, ObjectId, PayloadReader, StoreError, StoreResult, StoredFile};
use mongodb::bson::{doc, Bson, Document};
use mongodb::options::{ClientOptions, FindOneOptions, GridFsBucketOptions, GridFsUploadOptions, ServerAddress};
use mongodb::gridfs::GridFsBucket;
use mongodb::{Client, Collection};
use std::fmt::{self, Debug, Formatter};

use crate::config::StoreConfig;

/// Field under `metadata` holding the hex MD5 of the payload.
///
/// Current GridFS drivers no longer write the top-level `md5` field, so the
/// checksum is recorded in the file's metadata document at upload time.
pub const CHECKSUM_FIELD: &str = "md5";

/// Projection returning only the checksum, wherever the record keeps it.
fn checksum_projection() -> Document {
    let mut projection = Document::new();
    projection.insert(CHECKSUM_FIELD, 1);
    projection.insert(format!("metadata.{}", CHECKSUM_FIELD), 1);
    projection
}

/// A `GridStore` backed by a MongoDB GridFS bucket.
#[derive(Clone)]
pub struct MongoGridStore {
    client: Client,
    bucket: GridFsBucket,
    files: Collection<Document>,
    bucket_name: String,
}

impl Debug for MongoGridStore {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("MongoGridStore")
            .field("bucket", &self.bucket_name)
            .finish_non_exhaustive()
    }
}

fn backend(err: mongodb::error::Error) -> StoreError {
    StoreError::Backend(Box::new(err))
}

impl MongoGridStore {
    /// Connects to the server and binds the database and bucket.
    ///
    /// The driver connects lazily, so a `ping` is issued to surface an
    /// unreachable server here instead of on the first put.
    pub async fn connect(config: &StoreConfig) -> StoreResult<Self> {
        let options = ClientOptions::builder()
            .hosts(vec![ServerAddress::Tcp {
                host: config.host.clone(),
                port: Some(config.port),
            }])
            .app_name(config.app_name.clone())
            .connect_timeout(config.connect_timeout)
            .server_selection_timeout(config.connect_timeout)
            .build();

        let client = Client::with_options(options).map_err(backend)?;
        let db = client.database(&config.database);
        db.run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(backend)?;

        let bucket = db.gridfs_bucket(
            GridFsBucketOptions::builder()
                .bucket_name(config.bucket.clone())
                .build(),
        );
        let files = db.collection::<Document>(&config.files_collection());
        tracing::debug!(%config, "bound gridfs bucket");

        Ok(Self {
            client,
            bucket,
            files,
            bucket_name: config.bucket.clone(),
        })
    }
}

/// Reads the checksum from either the legacy top-level field or the metadata document.
fn checksum_of(doc: &Document) -> Option<String> {
    if let Ok(md5) = doc.get_str(CHECKSUM_FIELD) {
        return Some(md5.to_string());
    }
    doc.get_document("metadata")
        .ok()
        .and_then(|metadata| metadata.get_str(CHECKSUM_FIELD).ok())
        .map(str::to_string)
}

fn integer_field(doc: &Document, key: &str) -> StoreResult<u64> {
    match doc.get(key) {
        Some(Bson::Int64(n)) if *n >= 0 => Ok(*n as u64),
        Some(Bson::Int32(n)) if *n >= 0 => Ok(*n as u64),
        Some(Bson::Double(n)) if *n >= 0.0 => Ok(*n as u64),
        other => Err(StoreError::MalformedRecord(format!(
            "field '{}' is not a non-negative integer: {:?}",
            key, other
        ))),
    }
}

fn parse_files_document(doc: &Document) -> StoreResult<StoredFile> {
    let malformed = |err: mongodb::bson::document::ValueAccessError| {
        StoreError::MalformedRecord(err.to_string())
    };
    let chunk_size = integer_field(doc, "chunkSize")?;

    Ok(StoredFile {
        id: doc.get_object_id("_id").map_err(malformed)?,
        filename: doc.get_str("filename").unwrap_or_default().to_string(),
        upload_date: *doc.get_datetime("uploadDate").map_err(malformed)?,
        length: integer_field(doc, "length")?,
        chunk_size: u32::try_from(chunk_size)
            .map_err(|_| StoreError::MalformedRecord(format!("chunkSize {} overflows", chunk_size)))?,
        checksum: checksum_of(doc),
    })
}

#[async_trait]
impl GridStore for MongoGridStore {
    fn bucket_name(&self) -> &str {
        &self.bucket_name
    }

    async fn put(&self, data: &[u8], filename: &str) -> StoreResult<ObjectId> {
        let checksum = format!("{:x}", md5::compute(data));
        let mut metadata = Document::new();
        metadata.insert(CHECKSUM_FIELD, checksum);
        let options = GridFsUploadOptions::builder().metadata(metadata).build();

        let id = self
            .bucket
            .upload_from_futures_0_3_reader(filename, data, options)
            .await
            .map_err(backend)?;
        tracing::debug!(bucket = %self.bucket_name, %id, filename, "uploaded file");
        Ok(id)
    }

    async fn open_download(&self, id: ObjectId) -> StoreResult<PayloadReader> {
        let stream = self
            .bucket
            .open_download_stream(Bson::ObjectId(id))
            .await
            .map_err(backend)?;
        Ok(Box::pin(stream))
    }

    async fn delete(&self, id: ObjectId) -> StoreResult<()> {
        self.bucket
            .delete(Bson::ObjectId(id))
            .await
            .map_err(backend)
    }

    async fn checksum(&self, id: ObjectId) -> StoreResult<Option<String>> {
        let options = FindOneOptions::builder()
            .projection(checksum_projection())
            .build();
        let found = self
            .files
            .find_one(doc! { "_id": id }, options)
            .await
            .map_err(backend)?;

        match found {
            Some(doc) => checksum_of(&doc).map(Some).ok_or_else(|| {
                StoreError::MalformedRecord(format!("{} has no {} field", id, CHECKSUM_FIELD))
            }),
            None => Ok(None),
        }
    }

    async fn latest_by_filename(&self, filename: &str) -> StoreResult<Option<StoredFile>> {
        let options = FindOneOptions::builder()
            .sort(doc! { "uploadDate": -1 })
            .build();
        let found = self
            .files
            .find_one(doc! { "filename": filename }, options)
            .await
            .map_err(backend)?;

        found.as_ref().map(parse_files_document).transpose()
    }

    async fn close(&self) -> StoreResult<()> {
        self.client.clone().shutdown().await;
        tracing::debug!(bucket = %self.bucket_name, "mongodb client shut down");
        Ok(())
    }
}
