//! Startup error types for preserve

use std::fmt;

#[derive(Debug)]
pub enum PreserveError {
    Config(String),
    Io(Box<std::io::Error>),
    Storage(preserve_storage::StorageError),
}

impl fmt::Display for PreserveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreserveError::Config(msg) => write!(f, "Configuration error: {}", msg),
            PreserveError::Io(err) => write!(f, "IO error: {}", err),
            PreserveError::Storage(err) => write!(f, "Storage error: {}", err),
        }
    }
}

impl std::error::Error for PreserveError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PreserveError::Io(err) => Some(err.as_ref()),
            PreserveError::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PreserveError {
    fn from(err: std::io::Error) -> Self {
        PreserveError::Io(Box::new(err))
    }
}

impl From<preserve_storage::StorageError> for PreserveError {
    fn from(err: preserve_storage::StorageError) -> Self {
        PreserveError::Storage(err)
    }
}

impl From<tracing_subscriber::filter::ParseError> for PreserveError {
    fn from(err: tracing_subscriber::filter::ParseError) -> Self {
        PreserveError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PreserveError>;
