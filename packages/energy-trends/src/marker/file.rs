use async_trait::async_trait;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::{MarkerStore, ProgressMarker};
use crate::error::MarkerError;

/// Marker kept as a small JSON document on disk.
#[derive(Debug, Clone)]
pub struct FileMarkerStore {
    path: PathBuf,
}

impl FileMarkerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: io::Error) -> MarkerError {
        MarkerError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

#[async_trait]
impl MarkerStore for FileMarkerStore {
    async fn load(&self) -> Result<Option<ProgressMarker>, MarkerError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No stored marker");
                return Ok(None);
            }
            Err(e) => return Err(self.io_err(e)),
        };

        let marker: ProgressMarker =
            serde_json::from_str(&raw).map_err(|source| MarkerError::Corrupt {
                path: self.path.clone(),
                source,
            })?;
        debug!(path = %self.path.display(), latest = %marker.latest, "Loaded marker");
        Ok(Some(marker))
    }

    async fn save(&self, marker: &ProgressMarker) -> Result<(), MarkerError> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        std::fs::create_dir_all(dir).map_err(|e| self.io_err(e))?;

        let json = serde_json::to_vec_pretty(marker).map_err(|source| MarkerError::Corrupt {
            path: self.path.clone(),
            source,
        })?;

        let mut temp = tempfile::NamedTempFile::new_in(dir).map_err(|e| self.io_err(e))?;
        temp.write_all(&json).map_err(|e| self.io_err(e))?;
        temp.as_file().sync_all().map_err(|e| self.io_err(e))?;
        temp.persist(&self.path).map_err(|e| self.io_err(e.error))?;

        info!(path = %self.path.display(), latest = %marker.latest, "Saved marker");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quarter::Quarter;
    use chrono::{TimeZone, Utc};

    fn marker() -> ProgressMarker {
        ProgressMarker::new(
            Quarter::new(2024, 2).unwrap(),
            Utc.with_ymd_and_hms(2024, 9, 26, 9, 30, 0).unwrap(),
        )
        .with_source("ET_3.1.xlsx", "deadbeef")
    }

    #[tokio::test]
    async fn missing_file_means_no_marker() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileMarkerStore::new(dir.path().join("marker.json"));
        assert_eq!(store.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileMarkerStore::new(dir.path().join("state").join("marker.json"));

        store.save(&marker()).await.unwrap();

        assert_eq!(store.load().await.unwrap(), Some(marker()));
    }

    #[tokio::test]
    async fn corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("marker.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = FileMarkerStore::new(&path).load().await.unwrap_err();
        assert!(matches!(err, MarkerError::Corrupt { .. }));
    }
}
