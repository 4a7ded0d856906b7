//! preserve - pull-through HTTP cache
//!
//! Fetches remote resources on demand, persists them under a
//! content-addressed key and serves later requests from the stored copy.

pub mod cache;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod httpdate;
pub mod serve;
pub mod server;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

pub use cache::{Cache, CacheError, CacheResponse, CacheStatus};
pub use config::{Config, LogFormat, StorageProvider};
pub use error::{PreserveError, Result};
pub use fetcher::{FetchError, Fetched, OriginFetcher};
pub use server::{create_router, start_server, ServerState, SharedState};
