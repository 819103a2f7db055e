//! Version gate: decide whether a discovered release supersedes the last one
//! processed.

use crate::quarter::Quarter;

/// True when `discovered` is strictly newer than the recorded marker.
///
/// A missing marker means nothing has been processed yet.
pub fn is_newer(discovered: &Quarter, marker: Option<&Quarter>) -> bool {
    match marker {
        Some(latest) => discovered > latest,
        None => true,
    }
}

/// Outcome of comparing a discovered label against the progress marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Proceed {
        discovered: Quarter,
        previous: Option<Quarter>,
    },
    UpToDate {
        discovered: Quarter,
        latest: Quarter,
    },
}

impl GateDecision {
    pub fn should_proceed(&self) -> bool {
        matches!(self, GateDecision::Proceed { .. })
    }
}

/// Stateless comparison against a marker the caller supplies.
#[derive(Debug, Clone, Copy, Default)]
pub struct VersionGate {
    force: bool,
}

impl VersionGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always proceed, regardless of the marker.
    pub fn forced() -> Self {
        Self { force: true }
    }

    pub fn decide(&self, discovered: Quarter, marker: Option<Quarter>) -> GateDecision {
        match marker {
            Some(latest) if !self.force && !is_newer(&discovered, Some(&latest)) => {
                GateDecision::UpToDate { discovered, latest }
            }
            previous => GateDecision::Proceed {
                discovered,
                previous,
            },
        }
    }
}
