//! In-process S3 endpoint for backend tests
//!
//! Understands the path-style subset the backend uses: PutObject,
//! multipart create/upload/complete/abort, GetObject and HeadObject.

use axum::{
    body::{Body, Bytes},
    extract::{DefaultBodyLimit, Query, State},
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Router,
};
use aws_sdk_s3::config::{
    BehaviorVersion, Credentials, Region, RequestChecksumCalculation, ResponseChecksumValidation,
};
use aws_sdk_s3::Client;
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

pub const BUCKET: &str = "preserve-test";

#[derive(Clone, Default)]
struct StoredObject {
    body: Bytes,
    /// `Content-Type` and `x-amz-meta-*` headers as uploaded
    headers: HeaderMap,
}

struct Upload {
    path: String,
    headers: HeaderMap,
    parts: BTreeMap<u32, Bytes>,
}

/// Counters for the calls the backend made
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Calls {
    pub put_object: usize,
    pub upload_part: usize,
    pub complete: usize,
    pub abort: usize,
}

#[derive(Default)]
struct Bucket {
    objects: HashMap<String, StoredObject>,
    uploads: HashMap<String, Upload>,
    next_upload: usize,
    calls: Calls,
}

type Shared = Arc<Mutex<Bucket>>;

pub struct FakeS3 {
    pub addr: SocketAddr,
    bucket: Shared,
}

impl FakeS3 {
    pub fn endpoint(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn calls(&self) -> Calls {
        self.bucket.lock().unwrap().calls
    }

    /// Raw bytes stored under `object_key`
    pub fn object(&self, object_key: &str) -> Option<Bytes> {
        let path = format!("/{}/{}", BUCKET, object_key);
        self.bucket
            .lock()
            .unwrap()
            .objects
            .get(&path)
            .map(|o| o.body.clone())
    }

    /// Client with static credentials, addressing this endpoint path-style
    pub fn client(&self) -> Client {
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .credentials_provider(Credentials::new("test", "test", None, None, "fake-s3"))
            .endpoint_url(self.endpoint())
            .force_path_style(true)
            .request_checksum_calculation(RequestChecksumCalculation::WhenRequired)
            .response_checksum_validation(ResponseChecksumValidation::WhenRequired)
            .build();
        Client::from_conf(config)
    }
}

fn kept_headers(headers: &HeaderMap) -> HeaderMap {
    headers
        .iter()
        .filter(|(name, _)| {
            name.as_str() == header::CONTENT_TYPE.as_str()
                || name.as_str().starts_with("x-amz-meta-")
        })
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

fn xml(body: String) -> Response {
    ([(header::CONTENT_TYPE, "application/xml")], body).into_response()
}

fn etag(tag: String) -> Response {
    ([(header::ETAG, format!("\"{}\"", tag))], "").into_response()
}

async fn handle(
    State(bucket): State<Shared>,
    method: Method,
    uri: Uri,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = uri.path().to_string();
    let mut bucket = bucket.lock().unwrap();

    match method {
        Method::PUT => {
            if let (Some(upload_id), Some(part)) = (query.get("uploadId"), query.get("partNumber")) {
                let Ok(part) = part.parse::<u32>() else {
                    return StatusCode::BAD_REQUEST.into_response();
                };
                let Some(upload) = bucket.uploads.get_mut(upload_id) else {
                    return StatusCode::NOT_FOUND.into_response();
                };
                upload.parts.insert(part, body);
                bucket.calls.upload_part += 1;
                return etag(format!("part-{}", part));
            }

            bucket.objects.insert(
                path,
                StoredObject {
                    body,
                    headers: kept_headers(&headers),
                },
            );
            bucket.calls.put_object += 1;
            etag("object".to_string())
        }
        Method::POST if query.contains_key("uploads") => {
            bucket.next_upload += 1;
            let upload_id = format!("upload-{}", bucket.next_upload);
            bucket.uploads.insert(
                upload_id.clone(),
                Upload {
                    path: path.clone(),
                    headers: kept_headers(&headers),
                    parts: BTreeMap::new(),
                },
            );
            xml(format!(
                "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
                 <InitiateMultipartUploadResult>\
                 <Bucket>{}</Bucket><Key>{}</Key><UploadId>{}</UploadId>\
                 </InitiateMultipartUploadResult>",
                BUCKET, path, upload_id
            ))
        }
        Method::POST => {
            let Some(upload) = query.get("uploadId").and_then(|id| bucket.uploads.remove(id))
            else {
                return StatusCode::NOT_FOUND.into_response();
            };
            let joined: Vec<u8> = upload.parts.values().flat_map(|p| p.iter().copied()).collect();
            bucket.objects.insert(
                upload.path.clone(),
                StoredObject {
                    body: Bytes::from(joined),
                    headers: upload.headers,
                },
            );
            bucket.calls.complete += 1;
            xml(format!(
                "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
                 <CompleteMultipartUploadResult>\
                 <Bucket>{}</Bucket><Key>{}</Key><ETag>\"joined\"</ETag>\
                 </CompleteMultipartUploadResult>",
                BUCKET, upload.path
            ))
        }
        Method::DELETE => {
            if let Some(id) = query.get("uploadId") {
                bucket.uploads.remove(id);
                bucket.calls.abort += 1;
            }
            StatusCode::NO_CONTENT.into_response()
        }
        Method::GET | Method::HEAD => match bucket.objects.get(&path) {
            Some(object) => {
                let mut response = Response::new(Body::from(object.body.clone()));
                response.headers_mut().extend(object.headers.clone());
                response
            }
            None if method == Method::HEAD => StatusCode::NOT_FOUND.into_response(),
            None => (
                StatusCode::NOT_FOUND,
                [(header::CONTENT_TYPE, "application/xml")],
                "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
                 <Error><Code>NoSuchKey</Code>\
                 <Message>The specified key does not exist.</Message></Error>",
            )
                .into_response(),
        },
        _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
    }
}

pub async fn spawn_fake_s3() -> FakeS3 {
    let bucket = Shared::default();
    let app = Router::new()
        .fallback(handle)
        .layer(DefaultBodyLimit::disable())
        .with_state(bucket.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    FakeS3 { addr, bucket }
}
