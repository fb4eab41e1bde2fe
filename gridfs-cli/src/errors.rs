use std::io;
use std::path::PathBuf;

use gridfs_handler::GridFsError;
use serde_json::error::Error as SerdeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    GridFs(#[from] GridFsError),

    #[error("I/O error on {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write to stdout")]
    Stdout(#[source] io::Error),

    #[error("Failed to encode JSON")]
    Json(#[from] SerdeError),
}
