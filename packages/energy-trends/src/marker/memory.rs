use async_trait::async_trait;
use std::sync::{Arc, RwLock};

use super::{MarkerStore, ProgressMarker};
use crate::error::MarkerError;

/// In-process marker store for tests and embedding.
///
/// Clones share state, so a test can hand one clone to the pipeline and
/// inspect the other.
#[derive(Debug, Default, Clone)]
pub struct MemoryMarkerStore {
    marker: Arc<RwLock<Option<ProgressMarker>>>,
    save_failure: Arc<RwLock<Option<String>>>,
    saves: Arc<RwLock<usize>>,
}

impl MemoryMarkerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing marker.
    pub fn with_marker(self, marker: ProgressMarker) -> Self {
        *self.marker.write().unwrap() = Some(marker);
        self
    }

    /// Make every `save` fail with the given message.
    pub fn failing_saves(self, message: impl Into<String>) -> Self {
        *self.save_failure.write().unwrap() = Some(message.into());
        self
    }

    pub fn current(&self) -> Option<ProgressMarker> {
        self.marker.read().unwrap().clone()
    }

    /// Number of successful saves.
    pub fn save_count(&self) -> usize {
        *self.saves.read().unwrap()
    }
}

#[async_trait]
impl MarkerStore for MemoryMarkerStore {
    async fn load(&self) -> Result<Option<ProgressMarker>, MarkerError> {
        Ok(self.current())
    }

    async fn save(&self, marker: &ProgressMarker) -> Result<(), MarkerError> {
        if let Some(message) = self.save_failure.read().unwrap().clone() {
            return Err(MarkerError::Unavailable(message));
        }
        *self.marker.write().unwrap() = Some(marker.clone());
        *self.saves.write().unwrap() += 1;
        Ok(())
    }
}
