//! S3-compatible object storage backend
//!
//! One object per key at `<prefix>/<shard>/<digest>`. There is no separate
//! metadata object: the content type is the object's own `Content-Type`,
//! the two timestamps travel as user metadata attributes.

use crate::error::{Result, StorageError};
use crate::key::CacheKey;
use crate::types::Meta;
use crate::{CachedContent, ContentStream, Storage};
use async_trait::async_trait;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::HashMap;
use std::io::Cursor;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info, instrument, warn};

pub const META_LAST_CACHED: &str = "x-preserve-last-cached";
pub const META_LAST_MODIFIED: &str = "x-preserve-last-modified";

/// Upload part size; inputs shorter than this go up in a single PutObject
const PART_SIZE: usize = 8 * 1024 * 1024;

/// Bucket and object prefix parsed from `s3://bucket/prefix`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketUri {
    pub bucket: String,
    pub prefix: String,
}

impl BucketUri {
    pub fn parse(uri: &str) -> Result<Self> {
        let parsed = url::Url::parse(uri)
            .map_err(|e| StorageError::Config(format!("parse bucket URI: {}", e)))?;

        let bucket = parsed.host_str().unwrap_or_default();
        if parsed.scheme() != "s3" || bucket.is_empty() {
            return Err(StorageError::Config(format!(
                "invalid bucket URI {:?}, expected s3://bucket/prefix",
                uri
            )));
        }

        Ok(Self {
            bucket: bucket.to_string(),
            prefix: parsed.path().trim_matches('/').to_string(),
        })
    }
}

/// Client overrides for non-AWS deployments
#[derive(Debug, Clone, Default)]
pub struct S3Options {
    pub region: Option<String>,
    /// Custom endpoint such as a MinIO server; enables path-style addressing
    pub endpoint: Option<String>,
}

/// Stores cache entries as objects in an S3 bucket
pub struct S3Storage {
    client: Client,
    bucket: String,
    prefix: String,
}

impl S3Storage {
    pub fn new(client: Client, bucket: String, prefix: String) -> Self {
        Self {
            client,
            bucket,
            prefix,
        }
    }

    /// Build a client from the AWS default credential chain and connect it
    /// to the bucket named in `bucket_uri`
    pub async fn from_uri(bucket_uri: &str, options: S3Options) -> Result<Self> {
        let uri = BucketUri::parse(bucket_uri)?;

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = options.region.clone() {
            loader = loader.region(aws_config::Region::new(region));
        }
        let shared_config = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared_config);
        if let Some(endpoint) = options.endpoint.clone() {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }
        let client = Client::from_conf(builder.build());

        info!(
            bucket = %uri.bucket,
            prefix = %uri.prefix,
            endpoint = ?options.endpoint,
            "S3 client initialised"
        );
        Ok(Self::new(client, uri.bucket, uri.prefix))
    }

    fn object_key(&self, key: &CacheKey) -> String {
        object_name(&self.prefix, key)
    }

    async fn put_single(&self, object_key: &str, meta: &Meta, body: Vec<u8>) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(object_key)
            .content_type(&meta.content_type)
            .metadata(META_LAST_CACHED, format_timestamp(&meta.last_cached))
            .metadata(META_LAST_MODIFIED, format_timestamp(&meta.last_modified))
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| remote("upload content", e))?;
        Ok(())
    }

    async fn put_multipart(
        &self,
        object_key: &str,
        meta: &Meta,
        first: Vec<u8>,
        data: &mut ContentStream,
    ) -> Result<()> {
        let upload = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(object_key)
            .content_type(&meta.content_type)
            .metadata(META_LAST_CACHED, format_timestamp(&meta.last_cached))
            .metadata(META_LAST_MODIFIED, format_timestamp(&meta.last_modified))
            .send()
            .await
            .map_err(|e| remote("start upload", e))?;

        let upload_id = upload
            .upload_id()
            .ok_or_else(|| StorageError::Remote("start upload: no upload id returned".into()))?
            .to_string();

        let result = match self.upload_parts(object_key, &upload_id, first, data).await {
            Ok(parts) => self
                .client
                .complete_multipart_upload()
                .bucket(&self.bucket)
                .key(object_key)
                .upload_id(&upload_id)
                .multipart_upload(
                    CompletedMultipartUpload::builder()
                        .set_parts(Some(parts))
                        .build(),
                )
                .send()
                .await
                .map(|_| ())
                .map_err(|e| remote("finish upload", e)),
            Err(e) => Err(e),
        };

        if result.is_err() {
            if let Err(e) = self
                .client
                .abort_multipart_upload()
                .bucket(&self.bucket)
                .key(object_key)
                .upload_id(&upload_id)
                .send()
                .await
            {
                warn!(key = %object_key, error = %DisplayErrorContext(&e), "Failed to abort upload");
            }
        }

        result
    }

    async fn upload_parts(
        &self,
        object_key: &str,
        upload_id: &str,
        first: Vec<u8>,
        data: &mut ContentStream,
    ) -> Result<Vec<CompletedPart>> {
        let mut parts = Vec::new();
        let mut part_number = 1;
        let mut chunk = first;

        loop {
            let uploaded = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(object_key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(chunk))
                .send()
                .await
                .map_err(|e| remote("upload content", e))?;

            parts.push(
                CompletedPart::builder()
                    .set_e_tag(uploaded.e_tag().map(str::to_string))
                    .part_number(part_number)
                    .build(),
            );

            chunk = read_part(data).await?;
            if chunk.is_empty() {
                return Ok(parts);
            }
            part_number += 1;
        }
    }
}

#[async_trait]
impl Storage for S3Storage {
    fn name(&self) -> &'static str {
        "s3"
    }

    /// The object is buffered in memory since the remote reader cannot seek
    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn get_file(&self, key: &CacheKey) -> Result<CachedContent> {
        let object_key = self.object_key(key);

        let output = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .send()
            .await
        {
            Ok(output) => output,
            Err(e) if is_missing(&e) => return Err(StorageError::NotFound),
            Err(e) => return Err(remote("get object reader", e)),
        };

        let data = output
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Remote(format!("cache object in memory: {}", e)))?
            .into_bytes();

        debug!(size = data.len(), "Buffered object");
        Ok(Box::new(Cursor::new(data)))
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn load_meta(&self, key: &CacheKey) -> Result<Meta> {
        let object_key = self.object_key(key);

        let head = match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .send()
            .await
        {
            Ok(head) => head,
            Err(e) if is_missing(&e) => return Err(StorageError::NotFound),
            Err(e) => return Err(remote("get object meta", e)),
        };

        parse_object_meta(head.content_type(), head.metadata())
    }

    #[instrument(skip(self, meta, data), fields(bucket = %self.bucket))]
    async fn store_file(
        &self,
        key: &CacheKey,
        meta: &Meta,
        mut data: ContentStream,
    ) -> Result<Meta> {
        let object_key = self.object_key(key);
        let stored = Meta {
            last_cached: Utc::now(),
            ..meta.clone()
        };

        let first = read_part(&mut data).await?;
        if first.len() < PART_SIZE {
            let size = first.len();
            self.put_single(&object_key, &stored, first).await?;
            debug!(size, "Stored object");
        } else {
            self.put_multipart(&object_key, &stored, first, &mut data)
                .await?;
            debug!("Stored object in parts");
        }

        Ok(stored)
    }
}

/// Object name for `key` below `prefix`, without a leading slash
pub fn object_name(prefix: &str, key: &CacheKey) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        key.path()
    } else {
        format!("{}/{}", prefix, key.path())
    }
}

/// Rebuild [`Meta`] from the object's content type and user metadata
///
/// A missing or malformed timestamp is an error, not an absent entry.
pub fn parse_object_meta(
    content_type: Option<&str>,
    attributes: Option<&HashMap<String, String>>,
) -> Result<Meta> {
    let attribute = |name: &str| {
        attributes
            .and_then(|attrs| attrs.get(name))
            .map(String::as_str)
            .unwrap_or_default()
    };

    let last_cached = parse_timestamp(attribute(META_LAST_CACHED))
        .map_err(|e| StorageError::InvalidMeta(format!("parse last-cached date: {}", e)))?;
    let last_modified = parse_timestamp(attribute(META_LAST_MODIFIED))
        .map_err(|e| StorageError::InvalidMeta(format!("parse last-modified date: {}", e)))?;

    Ok(Meta {
        content_type: content_type.unwrap_or_default().to_string(),
        last_cached,
        last_modified,
    })
}

/// RFC 3339 with nanosecond precision
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(value: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(value).map(|ts| ts.with_timezone(&Utc))
}

/// Read up to one part from `reader`; empty only at end of input
async fn read_part<R>(reader: &mut R) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = Vec::with_capacity(PART_SIZE);
    reader.take(PART_SIZE as u64).read_to_end(&mut buf).await?;
    Ok(buf)
}

fn is_missing<E: ProvideErrorMetadata>(err: &SdkError<E, HttpResponse>) -> bool {
    if let Some(code) = err.as_service_error().and_then(|e| e.code()) {
        if code == "NoSuchKey" || code == "NotFound" {
            return true;
        }
    }
    err.raw_response()
        .is_some_and(|resp| resp.status().as_u16() == 404)
}

fn remote<E>(context: &str, err: SdkError<E, HttpResponse>) -> StorageError
where
    E: std::error::Error + 'static,
{
    StorageError::Remote(format!("{}: {}", context, DisplayErrorContext(&err)))
}
