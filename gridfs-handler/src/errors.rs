use grid_store::{ObjectId, StoreError};
use mongodb::bson::oid::Error as ObjectIdError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GridFsError {
    #[error("failed to connect to {target}")]
    Connection {
        target: String,
        #[source]
        source: StoreError,
    },

    #[error("not found file '{path}': {reason}")]
    InvalidInput { path: String, reason: &'static str },

    #[error("failed to read local file '{path}'")]
    LocalRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("put file '{filename}' failed")]
    WriteFailure {
        filename: String,
        #[source]
        source: StoreError,
    },

    #[error("not found document with id '{id}'")]
    MetadataInconsistency {
        id: ObjectId,
        #[source]
        source: Option<StoreError>,
    },

    #[error("lookup of '{filename}' failed")]
    Lookup {
        filename: String,
        #[source]
        source: StoreError,
    },

    #[error("failed to read content of '{id}'")]
    ReadFailure {
        id: ObjectId,
        #[source]
        source: StoreError,
    },

    #[error("'{id}' is not a valid file id")]
    InvalidId {
        id: String,
        #[source]
        source: ObjectIdError,
    },

    #[error("delete of '{id}' failed")]
    DeleteFailure {
        id: String,
        #[source]
        source: StoreError,
    },

    #[error("client connection is closed")]
    Closed,
}
