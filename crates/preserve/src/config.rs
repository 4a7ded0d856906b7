//! Command line and environment configuration

use crate::error::{PreserveError, Result};
use clap::{Parser, ValueEnum};
use preserve_storage::{LocalStorage, S3Options, S3Storage, Storage};
use std::net::SocketAddr;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StorageProvider {
    Local,
    S3,
    /// Print the available providers and exit
    List,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    /// Stackdriver-compatible JSON lines
    Json,
}

/// Every flag can also be set through the environment variable named next to it
#[derive(Debug, Clone, Parser)]
#[command(name = "preserve", version, about = "Pull-through HTTP cache")]
pub struct Config {
    /// [s3] Format: s3://bucket/prefix
    #[arg(long, env = "BUCKET_URI", default_value = "")]
    pub bucket_uri: String,

    /// Port/IP to listen on
    #[arg(long, env = "LISTEN", default_value = ":3000")]
    pub listen: String,

    /// Log level or filter directive (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// [s3] Custom endpoint, e.g. a MinIO server
    #[arg(long, env = "S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,

    /// [s3] Region, defaults to the AWS configuration chain
    #[arg(long, env = "S3_REGION")]
    pub s3_region: Option<String>,

    /// [local] Where to store cached files
    #[arg(long, env = "STORAGE_DIR", default_value = "./data/")]
    pub storage_dir: String,

    /// Storage provider to use ('list' to print a list)
    #[arg(long, env = "STORAGE_PROVIDER", value_enum, default_value_t = StorageProvider::Local)]
    pub storage_provider: StorageProvider,

    /// Override user-agent
    #[arg(long, env = "USER_AGENT", default_value = "")]
    pub user_agent: String,
}

impl Config {
    /// Listen address; a bare `:port` binds all interfaces
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        let listen = if self.listen.starts_with(':') {
            format!("0.0.0.0{}", self.listen)
        } else {
            self.listen.clone()
        };

        listen
            .parse()
            .map_err(|e| PreserveError::Config(format!("invalid listen address {:?}: {}", self.listen, e)))
    }

    pub fn user_agent(&self) -> Option<String> {
        Some(self.user_agent.clone()).filter(|ua| !ua.is_empty())
    }

    /// Construct the configured storage backend
    pub async fn build_storage(&self) -> Result<Arc<dyn Storage>> {
        match self.storage_provider {
            StorageProvider::Local => Ok(Arc::new(LocalStorage::new(&self.storage_dir))),
            StorageProvider::S3 => {
                let options = S3Options {
                    region: self.s3_region.clone(),
                    endpoint: self.s3_endpoint.clone(),
                };
                let storage = S3Storage::from_uri(&self.bucket_uri, options).await?;
                Ok(Arc::new(storage))
            }
            StorageProvider::List => Err(PreserveError::Config(
                "'list' is not a storage provider".to_string(),
            )),
        }
    }
}
