//! Serving stored content with conditional request and byte range support

use crate::httpdate;
use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use preserve_storage::CachedContent;
use std::io::SeekFrom;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tracing::error;

#[derive(Debug, PartialEq, Eq)]
enum Precondition {
    Proceed,
    NotModified,
    Failed,
}

/// Outcome of interpreting a `Range` header against a known size
#[derive(Debug, PartialEq, Eq)]
pub enum ByteRange {
    /// Serve the full content
    Full,
    /// Inclusive byte positions
    Partial { start: u64, end: u64 },
    Unsatisfiable,
}

/// Parse a `Range` header value for content of `size` bytes
///
/// Only a single `bytes=` range is honoured. Other units and multi-range
/// requests fall back to the full content with a 200; no
/// `multipart/byteranges` bodies are produced.
pub fn parse_range(value: &str, size: u64) -> ByteRange {
    let Some(set) = value.trim().strip_prefix("bytes=") else {
        return ByteRange::Full;
    };
    if set.contains(',') {
        return ByteRange::Full;
    }

    let Some((start, end)) = set.trim().split_once('-') else {
        return ByteRange::Unsatisfiable;
    };
    let (start, end) = (start.trim(), end.trim());

    if start.is_empty() {
        // Suffix range: the last N bytes
        let Ok(suffix) = end.parse::<u64>() else {
            return ByteRange::Unsatisfiable;
        };
        let suffix = suffix.min(size);
        if suffix == 0 {
            return ByteRange::Unsatisfiable;
        }
        return ByteRange::Partial {
            start: size - suffix,
            end: size - 1,
        };
    }

    let Ok(start) = start.parse::<u64>() else {
        return ByteRange::Unsatisfiable;
    };
    if start >= size {
        return ByteRange::Unsatisfiable;
    }

    let end = if end.is_empty() {
        size - 1
    } else {
        match end.parse::<u64>() {
            Ok(end) if end >= start => end.min(size - 1),
            _ => return ByteRange::Unsatisfiable,
        }
    };

    ByteRange::Partial { start, end }
}

fn header_date(headers: &HeaderMap, name: header::HeaderName) -> Option<DateTime<Utc>> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(httpdate::parse)
}

fn check_preconditions(
    method: &Method,
    headers: &HeaderMap,
    modified: DateTime<Utc>,
) -> Precondition {
    if let Some(since) = header_date(headers, header::IF_UNMODIFIED_SINCE) {
        if modified > since {
            return Precondition::Failed;
        }
    }

    if *method == Method::GET || *method == Method::HEAD {
        if let Some(since) = header_date(headers, header::IF_MODIFIED_SINCE) {
            if modified <= since {
                return Precondition::NotModified;
            }
        }
    }

    Precondition::Proceed
}

/// `If-Range` only supports the date form since entries carry no ETag
fn range_applies(headers: &HeaderMap, modified: DateTime<Utc>) -> bool {
    match headers.get(header::IF_RANGE) {
        None => true,
        Some(value) => value
            .to_str()
            .ok()
            .and_then(httpdate::parse)
            .is_some_and(|date| date == modified),
    }
}

/// Build the response for `content`, honouring conditional and range headers
pub async fn serve_content(
    method: &Method,
    headers: &HeaderMap,
    last_modified: DateTime<Utc>,
    mut content: CachedContent,
) -> Response {
    let size = match content.seek(SeekFrom::End(0)).await {
        Ok(size) => size,
        Err(e) => {
            error!(error = %e, "Determining content size failed");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let modified = httpdate::truncate(&last_modified);
    let last_modified_value = HeaderValue::from_str(&httpdate::format(&modified)).ok();

    match check_preconditions(method, headers, modified) {
        Precondition::Proceed => {}
        Precondition::NotModified => {
            let mut response = StatusCode::NOT_MODIFIED.into_response();
            if let Some(value) = last_modified_value {
                response.headers_mut().insert(header::LAST_MODIFIED, value);
            }
            return response;
        }
        Precondition::Failed => return StatusCode::PRECONDITION_FAILED.into_response(),
    }

    let range = match headers.get(header::RANGE).and_then(|v| v.to_str().ok()) {
        Some(value) if range_applies(headers, modified) => parse_range(value, size),
        _ => ByteRange::Full,
    };

    let (status, start, length) = match range {
        ByteRange::Full => (StatusCode::OK, 0, size),
        ByteRange::Partial { start, end } => (StatusCode::PARTIAL_CONTENT, start, end - start + 1),
        ByteRange::Unsatisfiable => {
            let mut response = StatusCode::RANGE_NOT_SATISFIABLE.into_response();
            if let Ok(value) = HeaderValue::from_str(&format!("bytes */{}", size)) {
                response.headers_mut().insert(header::CONTENT_RANGE, value);
            }
            return response;
        }
    };

    if let Err(e) = content.seek(SeekFrom::Start(start)).await {
        error!(error = %e, start, "Seeking content failed");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    let mut response = Response::new(Body::from_stream(ReaderStream::new(content.take(length))));
    *response.status_mut() = status;

    let response_headers = response.headers_mut();
    response_headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    response_headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    if let Some(value) = last_modified_value {
        response_headers.insert(header::LAST_MODIFIED, value);
    }
    if status == StatusCode::PARTIAL_CONTENT {
        let content_range = format!("bytes {}-{}/{}", start, start + length - 1, size);
        if let Ok(value) = HeaderValue::from_str(&content_range) {
            response_headers.insert(header::CONTENT_RANGE, value);
        }
    }

    response
}
