//! Fetcher: download a located spreadsheet into a staging directory, retrying
//! transient failures with exponential backoff.

use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::error::DownloadError;
use crate::locator::ResourceReference;
use crate::transport::Transport;

/// Retry schedule for downloads.
///
/// The delay after failed attempt `n` (1-based) is
/// `base_delay * multiplier^(n-1)` plus up to `max_jitter` of random jitter.
/// No delay follows the final attempt, so total waiting is bounded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    multiplier: u32,
    max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(5))
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            multiplier: 2,
            max_jitter: Duration::ZERO,
        }
    }

    /// No waiting between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO)
    }

    pub fn with_multiplier(mut self, multiplier: u32) -> Self {
        self.multiplier = multiplier.max(1);
        self
    }

    pub fn with_max_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before the attempt following failed attempt `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.saturating_pow(attempt.saturating_sub(1));
        let backoff = self.base_delay.saturating_mul(factor);
        if self.max_jitter.is_zero() {
            return backoff;
        }
        let jitter_ms = fastrand::u64(0..=self.max_jitter.as_millis() as u64);
        backoff.saturating_add(Duration::from_millis(jitter_ms))
    }

    /// Upper bound on total sleep across all attempts.
    pub fn max_total_delay(&self) -> Duration {
        (1..self.max_attempts)
            .map(|attempt| {
                let factor = self.multiplier.saturating_pow(attempt - 1);
                self.base_delay
                    .saturating_mul(factor)
                    .saturating_add(self.max_jitter)
            })
            .fold(Duration::ZERO, Duration::saturating_add)
    }

    /// Statuses worth retrying: timeouts, throttling, and server errors.
    pub fn is_retryable_status(status: u16) -> bool {
        matches!(status, 408 | 425 | 429) || (500..600).contains(&status)
    }
}

/// A downloaded file waiting to be transformed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    pub path: PathBuf,
    pub file_name: String,
    pub size: u64,
    /// Hex-encoded SHA-256 of the content
    pub sha256: String,
}

impl StagedFile {
    pub fn read(&self) -> std::io::Result<Vec<u8>> {
        std::fs::read(&self.path)
    }

    /// Remove the staged bytes.
    pub fn discard(self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to remove staged file");
        } else {
            debug!(path = %self.path.display(), "Removed staged file");
        }
    }
}

/// Downloads resources into a staging directory.
#[derive(Debug, Clone)]
pub struct Fetcher {
    staging_dir: PathBuf,
    policy: RetryPolicy,
}

impl Fetcher {
    pub fn new(staging_dir: impl Into<PathBuf>, policy: RetryPolicy) -> Self {
        Self {
            staging_dir: staging_dir.into(),
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Download `resource`, retrying transient failures.
    pub async fn fetch(
        &self,
        transport: &dyn Transport,
        resource: &ResourceReference,
    ) -> Result<StagedFile, DownloadError> {
        let url = resource.url.as_str();
        let max_attempts = self.policy.max_attempts();
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            info!(url = %url, attempt, max_attempts, "Downloading spreadsheet");

            match transport.get(url).await {
                Ok(response) if response.is_success() => {
                    return self.stage(&resource.file_name, &response.body);
                }
                Ok(response) if RetryPolicy::is_retryable_status(response.status) => {
                    last_error = format!("HTTP {}", response.status);
                }
                Ok(response) => {
                    warn!(url = %url, status = response.status, "Download rejected");
                    return Err(DownloadError::Rejected {
                        url: url.to_string(),
                        status: response.status,
                    });
                }
                Err(e) if e.is_transient() => {
                    last_error = e.to_string();
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "Download cannot succeed, not retrying");
                    return Err(DownloadError::Unreachable {
                        url: url.to_string(),
                        source: e,
                    });
                }
            }

            if attempt < max_attempts {
                let delay = self.policy.delay_for(attempt);
                warn!(
                    url = %url,
                    error = %last_error,
                    retry = attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Download failed, retrying..."
                );
                tokio::time::sleep(delay).await;
            }
        }

        error!(url = %url, attempts = max_attempts, error = %last_error, "Download failed after all retries");
        Err(DownloadError::Exhausted {
            url: url.to_string(),
            attempts: max_attempts,
            last_error,
        })
    }

    /// Write bytes to `<staging_dir>/<file_name>` via a temp file and rename.
    fn stage(&self, file_name: &str, body: &[u8]) -> Result<StagedFile, DownloadError> {
        let staging_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| DownloadError::Staging { path, source }
        };

        std::fs::create_dir_all(&self.staging_dir).map_err(staging_err(&self.staging_dir))?;

        // Never let a crafted URL segment escape the staging directory
        let file_name = Path::new(file_name)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("download.xlsx")
            .to_string();
        let target = self.staging_dir.join(&file_name);

        let mut temp =
            tempfile::NamedTempFile::new_in(&self.staging_dir).map_err(staging_err(&target))?;
        temp.write_all(body).map_err(staging_err(&target))?;
        temp.flush().map_err(staging_err(&target))?;
        temp.persist(&target)
            .map_err(|e| DownloadError::Staging {
                path: target.clone(),
                source: e.error,
            })?;

        let sha256 = hex::encode(Sha256::digest(body));
        info!(path = %target.display(), bytes = body.len(), sha256 = %sha256, "Staged download");

        Ok(StagedFile {
            path: target,
            file_name,
            size: body.len() as u64,
            sha256,
        })
    }
}
