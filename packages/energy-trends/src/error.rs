//! Typed errors for the refresh pipeline.
//!
//! Uses `thiserror` for library errors (not `anyhow`). Each pipeline stage has
//! its own error enum; [`Error`] wraps them so callers can match on the stage
//! that failed.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can abort a pipeline run.
#[derive(Debug, Error)]
pub enum Error {
    /// Source page unreachable or returned a non-success status
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    /// No matching spreadsheet link on the source page
    #[error("not found: {0}")]
    NotFound(#[from] NotFoundError),

    /// Spreadsheet download failed (retries exhausted or rejected)
    #[error("download failed: {0}")]
    Download(#[from] DownloadError),

    /// Spreadsheet did not have the expected structure
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Output could not be written
    #[error("write failed: {0}")]
    Write(#[from] WriteError),

    /// Progress marker could not be read or written
    #[error("progress marker error: {0}")]
    Marker(#[from] MarkerError),

    /// Invalid configuration
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

/// Network-level failures, before any HTTP status is seen.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("invalid URL: {url}")]
    InvalidUrl { url: String },

    #[error("timed out requesting {url}")]
    Timeout { url: String },

    #[error("connection to {url} failed: {message}")]
    Connect { url: String, message: String },

    #[error("request to {url} failed: {message}")]
    Other { url: String, message: String },
}

impl TransportError {
    /// Whether retrying the same request could succeed.
    pub fn is_transient(&self) -> bool {
        !matches!(self, TransportError::InvalidUrl { .. })
    }
}

/// Errors fetching the source page.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Errors locating the spreadsheet link.
#[derive(Debug, Error)]
pub enum NotFoundError {
    #[error("search term {term:?} does not appear on {url}")]
    SearchTermAbsent { term: String, url: String },

    #[error("no spreadsheet link found for {term:?}")]
    NoSpreadsheetLink { term: String },

    #[error("{} links share the latest version {version}: {}", urls.len(), urls.join(", "))]
    AmbiguousVersion { version: String, urls: Vec<String> },
}

/// Errors downloading the spreadsheet.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("gave up on {url} after {attempts} attempts: {last_error}")]
    Exhausted {
        url: String,
        attempts: u32,
        last_error: String,
    },

    #[error("HTTP {status} for {url} is not retryable")]
    Rejected { url: String, status: u16 },

    #[error("request for {url} cannot succeed: {source}")]
    Unreachable {
        url: String,
        #[source]
        source: TransportError,
    },

    #[error("could not stage download at {}: {source}", path.display())]
    Staging {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors validating or reshaping the spreadsheet.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("unreadable workbook: {0}")]
    UnreadableWorkbook(String),

    #[error("sheet {sheet:?} not found (available: {})", available.join(", "))]
    MissingSheet {
        sheet: String,
        available: Vec<String>,
    },

    #[error("no header row with period columns in the first {scanned} rows of {sheet:?}")]
    HeaderNotFound { sheet: String, scanned: usize },

    #[error("row {row} of {sheet:?} has no period columns")]
    NotAHeaderRow { sheet: String, row: usize },

    #[error("required column {column:?} is missing")]
    MissingColumn { column: String },

    #[error("table has no period columns")]
    NoPeriodColumns,

    #[error("period {label} appears in more than one column")]
    DuplicatePeriod { label: String },

    #[error("row ({category}, {sub_category}) appears more than once")]
    DuplicateRow {
        category: String,
        sub_category: String,
    },
}

/// Errors writing the tidy output.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error on {}: {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("existing file {} has header {found:?}, cannot append", path.display())]
    HeaderMismatch { path: PathBuf, found: Vec<String> },
}

/// Errors reading or writing the progress marker.
#[derive(Debug, Error)]
pub enum MarkerError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("marker file {} is corrupt: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("marker store unavailable: {0}")]
    Unavailable(String),
}

/// Errors loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid URL {url:?}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error(transparent)]
    InvalidQuarter(#[from] QuarterParseError),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// A version label that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid quarter label {input:?}")]
pub struct QuarterParseError {
    pub input: String,
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Result type alias for transport operations.
pub type TransportResult<T> = std::result::Result<T, TransportError>;
