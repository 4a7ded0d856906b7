//! Cache entry metadata

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata stored alongside every cached blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Meta {
    pub content_type: String,
    /// When this copy was written to storage
    pub last_cached: DateTime<Utc>,
    /// As reported by the origin, or the fetch time when it reported none
    pub last_modified: DateTime<Utc>,
}
