//! Error types for the storage backends

use std::fmt;

#[derive(Debug)]
pub enum StorageError {
    /// No entry was ever stored for the key
    NotFound,
    Io(Box<std::io::Error>),
    Encoding(String),
    Remote(String),
    InvalidMeta(String),
    Config(String),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound)
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::NotFound => write!(f, "Cache entry not found"),
            StorageError::Io(err) => write!(f, "IO error: {}", err),
            StorageError::Encoding(msg) => write!(f, "Metadata encoding error: {}", msg),
            StorageError::Remote(msg) => write!(f, "Object storage error: {}", msg),
            StorageError::InvalidMeta(msg) => write!(f, "Invalid metadata: {}", msg),
            StorageError::Config(msg) => write!(f, "Storage configuration error: {}", msg),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StorageError::Io(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            StorageError::NotFound
        } else {
            StorageError::Io(Box::new(err))
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Encoding(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_maps_to_not_found() {
        let err: StorageError = std::io::Error::from(std::io::ErrorKind::NotFound).into();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_other_io_errors_are_not_absence() {
        let err: StorageError = std::io::Error::from(std::io::ErrorKind::PermissionDenied).into();
        assert!(!err.is_not_found());
        assert!(format!("{}", err).starts_with("IO error"));
    }

    #[test]
    fn test_invalid_meta_display() {
        let err = StorageError::InvalidMeta("parse last-cached date".to_string());
        assert_eq!(
            format!("{}", err),
            "Invalid metadata: parse last-cached date"
        );
        assert!(!err.is_not_found());
    }
}
