//! Content-addressed storage for the preserve pull-through cache
//!
//! Every cached URL maps to a [`CacheKey`]. A backend persists one
//! metadata record and one content blob per key and hands the blob back
//! as a seekable stream. Two backends are provided: [`LocalStorage`]
//! (files on disk with a JSON sidecar) and [`S3Storage`] (one object per
//! key with the metadata carried as object attributes).

pub mod error;
pub mod key;
pub mod local;
pub mod s3;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::{Result, StorageError};
pub use key::CacheKey;
pub use local::LocalStorage;
pub use s3::{BucketUri, S3Options, S3Storage};
pub use types::Meta;

use async_trait::async_trait;
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncSeek};

/// Content handed to [`Storage::store_file`], read exactly once
pub type ContentStream = Pin<Box<dyn AsyncRead + Send>>;

/// A stored blob that can be read and repositioned
pub trait SeekableContent: AsyncRead + AsyncSeek + Send + Unpin {}

impl<T: AsyncRead + AsyncSeek + Send + Unpin> SeekableContent for T {}

/// Content returned by [`Storage::get_file`]
pub type CachedContent = Box<dyn SeekableContent>;

/// Persists and retrieves (metadata, blob) pairs keyed by [`CacheKey`]
///
/// Lookups for keys that were never stored fail with
/// [`StorageError::NotFound`], which callers tell apart from every other
/// failure through [`StorageError::is_not_found`].
#[async_trait]
pub trait Storage: Send + Sync {
    /// Short provider name used in logs and health output
    fn name(&self) -> &'static str;

    /// Open the blob stored for `key`
    async fn get_file(&self, key: &CacheKey) -> Result<CachedContent>;

    /// Load the metadata stored for `key`
    async fn load_meta(&self, key: &CacheKey) -> Result<Meta>;

    /// Persist `data` together with `meta` under `key`
    ///
    /// The stored `last_cached` is always the time of this call; whatever
    /// the caller put there is replaced. Returns the metadata as persisted.
    async fn store_file(&self, key: &CacheKey, meta: &Meta, data: ContentStream) -> Result<Meta>;
}
