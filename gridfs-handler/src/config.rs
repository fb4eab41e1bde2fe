use std::fmt::{self, Display, Formatter};
use std::time::Duration;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 27017;
pub const DEFAULT_DATABASE: &str = "test";
pub const DEFAULT_BUCKET: &str = "fs";

/// Where the GridFS bucket lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub bucket: String,
    /// Reported to the server in the connection handshake.
    pub app_name: Option<String>,
    /// Overrides the driver's connect and server selection timeouts.
    pub connect_timeout: Option<Duration>,
}

impl StoreConfig {
    pub fn new(host: impl Into<String>, port: u16, database: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            database: database.into(),
            ..Default::default()
        }
    }

    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = bucket.into();
        self
    }

    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = Some(app_name.into());
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn files_collection(&self) -> String {
        format!("{}.files", self.bucket)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            database: DEFAULT_DATABASE.to_string(),
            bucket: DEFAULT_BUCKET.to_string(),
            app_name: None,
            connect_timeout: None,
        }
    }
}

impl Display for StoreConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}.{}", self.host, self.port, self.database, self.bucket)
    }
}
