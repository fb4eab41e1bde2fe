use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use gridfs_handler::StoreConfig;

#[derive(Parser, Debug)]
#[clap(name = "gridfs-cli", about = "Put, get and delete files in a MongoDB GridFS bucket")]
pub struct Args {
    #[clap(long, env = "GRIDFS_HOST", default_value = "localhost")]
    pub(crate) host: String,
    #[clap(long, env = "GRIDFS_PORT", default_value_t = 27017)]
    pub(crate) port: u16,
    #[clap(long = "db", env = "GRIDFS_DB")]
    pub(crate) database: String,
    #[clap(long, env = "GRIDFS_BUCKET", default_value = "fs")]
    pub(crate) bucket: String,
    /// Give up connecting after this many milliseconds.
    #[clap(long)]
    pub(crate) connect_timeout_ms: Option<u64>,
    #[clap(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Store a local file under its path.
    Put {
        path: PathBuf,
        /// Print the result as JSON.
        #[clap(long)]
        json: bool,
    },
    /// Fetch the latest file stored under a filename.
    Get {
        filename: String,
        #[clap(long, short)]
        output: Option<PathBuf>,
    },
    /// Delete a file by id.
    Delete { id: String },
    /// Put a file and read it back.
    Demo { path: PathBuf },
    /// Repeatedly put and read back a file, logging every step.
    Soak {
        path: PathBuf,
        #[clap(long, default_value_t = 100_000)]
        iterations: u64,
        #[clap(long, default_value_t = 1_000)]
        interval_ms: u64,
        #[clap(long, default_value = "log")]
        log: PathBuf,
    },
}

impl Args {
    pub fn store_config(&self) -> StoreConfig {
        let config = StoreConfig::new(self.host.clone(), self.port, self.database.clone())
            .with_bucket(self.bucket.clone())
            .with_app_name("gridfs-cli");
        match self.connect_timeout_ms {
            Some(ms) => config.with_connect_timeout(Duration::from_millis(ms)),
            None => config,
        }
    }
}
