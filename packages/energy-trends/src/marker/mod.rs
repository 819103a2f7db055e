//! Progress marker: the last version label that was fully published.
//!
//! The marker is passed in explicitly through a [`MarkerStore`] rather than
//! held in process state, so runs and tests can start from any position.

mod file;
mod memory;

pub use file::FileMarkerStore;
pub use memory::MemoryMarkerStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MarkerError;
use crate::quarter::Quarter;

/// Persisted record of the newest published release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressMarker {
    pub latest: Quarter,
    /// Spreadsheet the release was read from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_file: Option<String>,
    /// SHA-256 of that spreadsheet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ProgressMarker {
    pub fn new(latest: Quarter, updated_at: DateTime<Utc>) -> Self {
        Self {
            latest,
            source_file: None,
            sha256: None,
            updated_at,
        }
    }

    pub fn with_source(mut self, file_name: impl Into<String>, sha256: impl Into<String>) -> Self {
        self.source_file = Some(file_name.into());
        self.sha256 = Some(sha256.into());
        self
    }
}

/// Storage for the progress marker.
///
/// Read once at the start of a run and written once after output is published.
#[async_trait]
pub trait MarkerStore: Send + Sync {
    async fn load(&self) -> Result<Option<ProgressMarker>, MarkerError>;

    async fn save(&self, marker: &ProgressMarker) -> Result<(), MarkerError>;
}

/// Starting point for the gate: an explicit override wins, then the stored
/// marker, then the configured seed.
pub fn effective_marker(
    stored: Option<&ProgressMarker>,
    seed: Quarter,
    since: Option<Quarter>,
) -> Quarter {
    since
        .or_else(|| stored.map(|m| m.latest))
        .unwrap_or(seed)
}
