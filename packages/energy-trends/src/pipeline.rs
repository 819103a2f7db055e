//! Pipeline: locate, gate, fetch, transform, write, commit.
//!
//! A run publishes a release at most once. The marker is read once at the
//! start and written once at the end, after the output is in place; any
//! failure before that leaves it untouched. If the marker cannot be saved the
//! output is rolled back so the next run retries the same release.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{DownloadError, FetchError, Result, SchemaError};
use crate::fetcher::{Fetcher, StagedFile};
use crate::gate::{GateDecision, VersionGate};
use crate::locator::{Locator, ResourceReference};
use crate::marker::{effective_marker, FileMarkerStore, MarkerStore, ProgressMarker};
use crate::quarter::Quarter;
use crate::transform::{Transformer, WideTable};
use crate::transport::{HttpTransport, Transport};
use crate::writer::{archive_raw, same_file, ArchivedFile, CsvWriter, WrittenOutput};

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Per-run switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Publish even if the release is not newer than the marker
    pub force: bool,
    /// Compare against this label instead of the stored marker
    pub since: Option<Quarter>,
    /// Transform but write nothing
    pub dry_run: bool,
}

/// What a publishing run produced.
#[derive(Debug, Clone, Serialize)]
pub struct PublishReport {
    pub version: Quarter,
    pub previous: Quarter,
    pub records: usize,
    /// Records already present in the output (append mode)
    pub skipped: usize,
    /// `None` for dry runs
    pub output: Option<PathBuf>,
    pub archived: Option<PathBuf>,
    pub file_name: String,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    UpToDate { discovered: Quarter, latest: Quarter },
    Published(PublishReport),
}

/// Result of [`Pipeline::check`].
#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub url: String,
    pub file_name: String,
    pub discovered: Quarter,
    pub marker: Quarter,
    pub update_available: bool,
}

pub struct Pipeline {
    config: Config,
    transport: Arc<dyn Transport>,
    store: Arc<dyn MarkerStore>,
    clock: Clock,
}

impl Pipeline {
    pub fn new(config: Config, transport: Arc<dyn Transport>, store: Arc<dyn MarkerStore>) -> Self {
        Self {
            config,
            transport,
            store,
            clock: Arc::new(Utc::now),
        }
    }

    /// Real HTTP transport and an on-disk marker, both taken from `config`.
    pub fn from_config(config: Config) -> Result<Self> {
        let transport = HttpTransport::new(config.request_timeout(), &config.http.user_agent)
            .map_err(FetchError::from)?;
        let store = FileMarkerStore::new(config.marker_path());
        Ok(Self::new(config, Arc::new(transport), Arc::new(store)))
    }

    /// Override the processing timestamp source.
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn locator(&self) -> Locator {
        Locator::new(&self.config.search_term, self.config.label_format)
            .with_extensions(self.config.link_extensions.iter().cloned())
    }

    fn fetcher(&self) -> Fetcher {
        Fetcher::new(self.config.staging_dir(), self.config.retry.policy())
    }

    fn transformer(&self) -> Transformer {
        Transformer::new(self.config.table.clone())
    }

    fn writer(&self) -> CsvWriter {
        CsvWriter::new(self.config.output_path())
            .with_mode(self.config.output.write_mode)
            .with_quarter_format(self.config.output.quarter_format)
            .with_date_format(&self.config.output.date_format)
    }

    async fn starting_marker(
        &self,
        since: Option<Quarter>,
    ) -> Result<(Quarter, Option<ProgressMarker>)> {
        let stored = self.store.load().await?;
        let marker = effective_marker(stored.as_ref(), self.config.latest_quarter, since);
        info!(
            marker = %marker,
            stored = stored.is_some(),
            overridden = since.is_some(),
            "Starting from progress marker"
        );
        Ok((marker, stored))
    }

    /// Locate and gate only. Downloads only when the page carries no label.
    pub async fn check(&self, options: RunOptions) -> Result<CheckReport> {
        let (marker, _) = self.starting_marker(options.since).await?;
        let resource = self
            .locator()
            .locate(self.transport.as_ref(), &self.config.url)
            .await?;

        let discovered = match resource.version {
            Some(version) => version,
            None => {
                let staged = self.fetcher().fetch(self.transport.as_ref(), &resource).await?;
                let table = self.read_staged(&staged);
                staged.discard();
                newest_period(&table?)?
            }
        };

        let decision = gate_for(options).decide(discovered, Some(marker));
        Ok(CheckReport {
            url: resource.url,
            file_name: resource.file_name,
            discovered,
            marker,
            update_available: decision.should_proceed(),
        })
    }

    /// Run the pipeline once.
    pub async fn run(&self, options: RunOptions) -> Result<RunOutcome> {
        let (marker, stored) = self.starting_marker(options.since).await?;
        let gate = gate_for(options);

        let resource = self
            .locator()
            .locate(self.transport.as_ref(), &self.config.url)
            .await?;

        if let Some(version) = resource.version {
            if let GateDecision::UpToDate { discovered, latest } = gate.decide(version, Some(marker)) {
                info!(discovered = %discovered, latest = %latest, "Already up to date, nothing to do");
                return Ok(RunOutcome::UpToDate { discovered, latest });
            }
        }

        let staged = self.fetcher().fetch(self.transport.as_ref(), &resource).await?;
        let outcome = self
            .publish(&staged, &resource, marker, stored.as_ref(), gate, options)
            .await;

        // An archive written in place is the staged file itself
        let archived_in_place = matches!(
            &outcome,
            Ok(RunOutcome::Published(report))
                if report.archived.as_deref().is_some_and(|path| same_file(path, &staged.path))
        );
        if !archived_in_place {
            staged.discard();
        }

        match &outcome {
            Ok(RunOutcome::Published(report)) => info!(
                version = %report.version,
                previous = %report.previous,
                records = report.records,
                dry_run = options.dry_run,
                "Run complete"
            ),
            Ok(RunOutcome::UpToDate { .. }) => {}
            Err(e) => error!(error = %e, "Run failed, progress marker unchanged"),
        }
        outcome
    }

    async fn publish(
        &self,
        staged: &StagedFile,
        resource: &ResourceReference,
        marker: Quarter,
        stored: Option<&ProgressMarker>,
        gate: VersionGate,
        options: RunOptions,
    ) -> Result<RunOutcome> {
        let table = self.read_staged(staged)?;
        let newest = newest_period(&table)?;

        let version = match resource.version {
            Some(version) => {
                if version != newest {
                    warn!(
                        page = %version,
                        spreadsheet = %newest,
                        "Page label and newest spreadsheet column disagree"
                    );
                }
                version
            }
            None => match gate.decide(newest, Some(marker)) {
                GateDecision::UpToDate { discovered, latest } => {
                    info!(discovered = %discovered, latest = %latest, "Already up to date, nothing to do");
                    return Ok(RunOutcome::UpToDate { discovered, latest });
                }
                GateDecision::Proceed { discovered, .. } => discovered,
            },
        };

        let processed_at = (self.clock)();
        let records = self
            .transformer()
            .unpivot(&table, &staged.file_name, processed_at);

        let mut report = PublishReport {
            version,
            previous: marker,
            records: records.len(),
            skipped: 0,
            output: None,
            archived: None,
            file_name: staged.file_name.clone(),
            sha256: staged.sha256.clone(),
        };

        if options.dry_run {
            info!(records = records.len(), version = %version, "Dry run, skipping write");
            return Ok(RunOutcome::Published(report));
        }

        let written = self.writer().write(&records)?;
        report.records = written.written;
        report.skipped = written.skipped;
        report.output = Some(written.path.clone());

        let archived = if self.config.output.archive_raw {
            match archive_raw(&staged.path, &self.config.excel_save_path, &staged.file_name) {
                Ok(archived) => {
                    report.archived = Some(archived.path.clone());
                    Some(archived)
                }
                Err(e) => {
                    rollback(written);
                    return Err(e.into());
                }
            }
        } else {
            None
        };

        // The marker never moves backwards, even for forced republishes
        if let Some(stored) = stored.filter(|stored| stored.latest > version) {
            info!(
                version = %version,
                stored = %stored.latest,
                "Republished an older release, progress marker kept"
            );
            return Ok(RunOutcome::Published(report));
        }

        let next = ProgressMarker::new(version, processed_at)
            .with_source(&staged.file_name, &staged.sha256);
        if let Err(e) = self.store.save(&next).await {
            error!(error = %e, version = %version, "Failed to save progress marker, rolling back output");
            rollback(written);
            if let Some(archived) = archived {
                rollback_archive(archived);
            }
            return Err(e.into());
        }

        Ok(RunOutcome::Published(report))
    }

    fn read_staged(&self, staged: &StagedFile) -> Result<WideTable> {
        let bytes = staged.read().map_err(|source| DownloadError::Staging {
            path: staged.path.clone(),
            source,
        })?;
        Ok(self.transformer().read_table(bytes)?)
    }
}

fn gate_for(options: RunOptions) -> VersionGate {
    if options.force {
        VersionGate::forced()
    } else {
        VersionGate::new()
    }
}

fn newest_period(table: &WideTable) -> Result<Quarter> {
    Transformer::latest_period(table).ok_or_else(|| SchemaError::NoPeriodColumns.into())
}

fn rollback(written: WrittenOutput) {
    let path = written.path.clone();
    if let Err(e) = written.rollback() {
        error!(path = %path.display(), error = %e, "Rollback of output failed");
    }
}

fn rollback_archive(archived: ArchivedFile) {
    let path = archived.path.clone();
    if let Err(e) = archived.rollback() {
        error!(path = %path.display(), error = %e, "Rollback of archived spreadsheet failed");
    }
}
