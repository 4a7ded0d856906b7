//! Origin fetching

use crate::httpdate;
use chrono::Utc;
use futures::TryStreamExt;
use preserve_storage::{ContentStream, Meta};
use reqwest::header::{CONTENT_TYPE, LAST_MODIFIED, USER_AGENT};
use reqwest::Client;
use std::fmt;
use tokio_util::io::StreamReader;
use tracing::debug;

/// Highest status code still treated as a successful fetch
const LAST_SUCCESS_STATUS: u16 = 299;

#[derive(Debug)]
pub enum FetchError {
    /// Network-level failure: DNS, refused connection, timeout, bad URL
    Transport(Box<reqwest::Error>),
    /// The origin answered with a non-success status code
    Status(u16),
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::Transport(err) => write!(f, "fetch source file: {}", err),
            FetchError::Status(code) => write!(f, "HTTP status signaled failure: {}", code),
        }
    }
}

impl std::error::Error for FetchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FetchError::Transport(err) => Some(err.as_ref()),
            FetchError::Status(_) => None,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        FetchError::Transport(Box::new(err))
    }
}

/// A successful origin response, body not yet read
pub struct Fetched {
    pub meta: Meta,
    pub body: ContentStream,
}

/// HTTP client for retrieving resources from their origin
pub struct OriginFetcher {
    client: Client,
    user_agent: Option<String>,
}

impl OriginFetcher {
    /// Create a fetcher; an empty `user_agent` keeps the client default
    pub fn new(user_agent: Option<String>) -> Self {
        Self::with_client(Client::new(), user_agent)
    }

    pub fn with_client(client: Client, user_agent: Option<String>) -> Self {
        Self {
            client,
            user_agent: user_agent.filter(|ua| !ua.is_empty()),
        }
    }

    /// Issue one GET for `url`
    ///
    /// The body is returned as a stream; it is never buffered here.
    pub async fn fetch(&self, url: &str) -> Result<Fetched, FetchError> {
        let mut request = self.client.get(url);
        if let Some(user_agent) = &self.user_agent {
            request = request.header(USER_AGENT, user_agent);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        if status > LAST_SUCCESS_STATUS {
            return Err(FetchError::Status(status));
        }

        let now = Utc::now();
        let headers = response.headers();
        let last_modified = headers
            .get(LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .and_then(httpdate::parse)
            .unwrap_or(now);
        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        debug!(url, status, content_type = %content_type, "Fetched from origin");

        let body = StreamReader::new(response.bytes_stream().map_err(std::io::Error::other));

        Ok(Fetched {
            meta: Meta {
                content_type,
                last_cached: now,
                last_modified,
            },
            body: Box::pin(body),
        })
    }
}
