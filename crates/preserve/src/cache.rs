//! Cache orchestration: HIT/MISS decisions and the fetch-and-store cycle

use crate::fetcher::{FetchError, OriginFetcher};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use preserve_storage::{CacheKey, CachedContent, Meta, Storage, StorageError};
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Whether a response came from an existing entry or needed a fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
        }
    }
}

/// A servable cache entry
pub struct CacheResponse {
    pub meta: Meta,
    pub content: CachedContent,
    pub status: CacheStatus,
}

#[derive(Debug)]
pub enum CacheError {
    InvalidRequest(String),
    /// No entry exists and none could be obtained from the origin
    NotFound,
    Storage(StorageError),
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
            CacheError::NotFound => write!(f, "Not found"),
            CacheError::Storage(err) => write!(f, "Storage error: {}", err),
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CacheError::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            CacheError::InvalidRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            CacheError::NotFound => (StatusCode::NOT_FOUND, "Not found".to_string()),
            CacheError::Storage(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Accessing cache entry failed".to_string(),
            ),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Failure of one fetch-and-store cycle
#[derive(Debug)]
pub enum RenewError {
    Fetch(FetchError),
    Store(StorageError),
    Aborted(String),
}

impl fmt::Display for RenewError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenewError::Fetch(err) => write!(f, "{}", err),
            RenewError::Store(err) => write!(f, "storing file: {}", err),
            RenewError::Aborted(msg) => write!(f, "refresh task aborted: {}", msg),
        }
    }
}

impl std::error::Error for RenewError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RenewError::Fetch(err) => Some(err),
            RenewError::Store(err) => Some(err),
            RenewError::Aborted(_) => None,
        }
    }
}

/// Decides HIT vs MISS and keeps storage populated from the origin
///
/// There is no per-key locking: concurrent misses for one key each fetch
/// and store, and the last writer wins.
#[derive(Clone)]
pub struct Cache {
    storage: Arc<dyn Storage>,
    fetcher: Arc<OriginFetcher>,
}

impl Cache {
    pub fn new(storage: Arc<dyn Storage>, fetcher: OriginFetcher) -> Self {
        Self {
            storage,
            fetcher: Arc::new(fetcher),
        }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Resolve `url` to a servable entry
    ///
    /// With `force_refresh` the origin is always fetched first. A failed
    /// fetch yields [`CacheError::NotFound`] even when an older copy exists.
    pub async fn serve(&self, url: &str, force_refresh: bool) -> Result<CacheResponse, CacheError> {
        validate_url(url)?;

        let key = CacheKey::from_url(url);
        debug!(url, path = %key, "Received request");

        let mut meta = match self.storage.load_meta(&key).await {
            Ok(meta) => Some(meta),
            Err(e) if e.is_not_found() => None,
            Err(e) => {
                error!(url, path = %key, error = %e, "Loading meta failed");
                return Err(CacheError::Storage(e));
            }
        };

        let mut status = CacheStatus::Hit;
        if force_refresh || meta.is_none() {
            debug!(url, path = %key, "Updating cache");
            status = CacheStatus::Miss;

            meta = match self.renew_detached(&key, url).await {
                Ok(meta) => Some(meta),
                Err(e) => {
                    warn!(url, path = %key, error = %e, "Refreshing file failed");
                    None
                }
            };
        }

        let Some(meta) = meta else {
            return Err(CacheError::NotFound);
        };

        let content = self.storage.get_file(&key).await.map_err(|e| {
            error!(url, path = %key, error = %e, "Loading cached file failed");
            CacheError::Storage(e)
        })?;

        Ok(CacheResponse {
            meta,
            content,
            status,
        })
    }

    /// Fetch `url` and store it under `key`
    pub async fn renew(&self, key: &CacheKey, url: &str) -> Result<Meta, RenewError> {
        let fetched = self.fetcher.fetch(url).await.map_err(RenewError::Fetch)?;
        self.storage
            .store_file(key, &fetched.meta, fetched.body)
            .await
            .map_err(RenewError::Store)
    }

    /// Run [`Cache::renew`] on its own task so the entry is still written
    /// when the waiting request goes away
    async fn renew_detached(&self, key: &CacheKey, url: &str) -> Result<Meta, RenewError> {
        let cache = self.clone();
        let key = key.clone();
        let url = url.to_string();

        tokio::spawn(async move { cache.renew(&key, &url).await })
            .await
            .map_err(|e| RenewError::Aborted(e.to_string()))?
    }
}

/// The requested URL must parse and carry a scheme
pub fn validate_url(url: &str) -> Result<(), CacheError> {
    match url::Url::parse(url) {
        Ok(parsed) if !parsed.scheme().is_empty() => Ok(()),
        _ => Err(CacheError::InvalidRequest(
            "parsing requested URL".to_string(),
        )),
    }
}
