//! Local filesystem backend
//!
//! Layout: content at `<base>/<shard>/<digest>`, JSON sidecar metadata at
//! `<base>/<shard>/<digest>.meta`. Both files are written to unique temp
//! names first and renamed into place, content before sidecar, so a reader
//! never sees a half-written file. A crash between the two renames can still
//! leave a new blob next to the previous sidecar.

use crate::error::Result;
use crate::key::CacheKey;
use crate::types::Meta;
use crate::{CachedContent, ContentStream, Storage};
use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

#[cfg(unix)]
const DIR_PERMISSION: u32 = 0o700;

/// Stores cache entries as plain files below a base directory
#[derive(Debug, Clone)]
pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn content_path(&self, key: &CacheKey) -> PathBuf {
        self.base_path.join(key.shard()).join(key.digest())
    }

    pub fn meta_path(&self, key: &CacheKey) -> PathBuf {
        self.base_path
            .join(key.shard())
            .join(format!("{}.meta", key.digest()))
    }

    async fn create_shard_dir(&self, key: &CacheKey) -> Result<PathBuf> {
        let dir = self.base_path.join(key.shard());
        let mut builder = fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        builder.mode(DIR_PERMISSION);
        builder.create(&dir).await?;
        Ok(dir)
    }

    async fn write_entry(
        &self,
        key: &CacheKey,
        meta: &Meta,
        mut data: ContentStream,
        content_tmp: &Path,
        meta_tmp: &Path,
    ) -> Result<u64> {
        let mut file = fs::File::create(content_tmp).await?;
        let written = tokio::io::copy(&mut data, &mut file).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        fs::write(meta_tmp, serde_json::to_vec(meta)?).await?;

        fs::rename(content_tmp, self.content_path(key)).await?;
        fs::rename(meta_tmp, self.meta_path(key)).await?;
        Ok(written)
    }
}

#[async_trait]
impl Storage for LocalStorage {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn get_file(&self, key: &CacheKey) -> Result<CachedContent> {
        let file = fs::File::open(self.content_path(key)).await?;
        Ok(Box::new(file))
    }

    async fn load_meta(&self, key: &CacheKey) -> Result<Meta> {
        let meta_path = self.meta_path(key);
        fs::metadata(&meta_path).await?;

        let raw = fs::read(&meta_path).await?;
        Ok(serde_json::from_slice(&raw)?)
    }

    async fn store_file(&self, key: &CacheKey, meta: &Meta, data: ContentStream) -> Result<Meta> {
        let stored = Meta {
            last_cached: Utc::now(),
            ..meta.clone()
        };

        let dir = self.create_shard_dir(key).await?;
        let tmp_id = Uuid::new_v4();
        let content_tmp = dir.join(format!("{}.{}.tmp", key.digest(), tmp_id));
        let meta_tmp = dir.join(format!("{}.meta.{}.tmp", key.digest(), tmp_id));

        match self
            .write_entry(key, &stored, data, &content_tmp, &meta_tmp)
            .await
        {
            Ok(size) => {
                debug!(path = %key, size, "Stored cache entry");
                Ok(stored)
            }
            Err(e) => {
                for tmp in [&content_tmp, &meta_tmp] {
                    if let Err(rm) = fs::remove_file(tmp).await {
                        if rm.kind() != std::io::ErrorKind::NotFound {
                            warn!(path = ?tmp, error = %rm, "Failed to remove temp file");
                        }
                    }
                }
                Err(e)
            }
        }
    }
}
