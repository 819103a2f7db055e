//! Energy Trends Refresh Pipeline
//!
//! Watches a statistics page for a new quarterly release of a spreadsheet,
//! downloads it, reshapes the wide quarterly table into tidy rows and
//! publishes them as CSV. Each release is published exactly once: a
//! persisted progress marker records the newest quarter already handled.
//!
//! # Stages
//!
//! ```text
//! Locator -> Fetcher -> VersionGate -> Transformer -> Writer -> MarkerStore
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use energy_trends::{Config, Pipeline, RunOptions, RunOutcome};
//!
//! let config = Config::load("config.json")?;
//! let pipeline = Pipeline::from_config(config)?;
//!
//! match pipeline.run(RunOptions::default()).await? {
//!     RunOutcome::UpToDate { latest, .. } => println!("nothing newer than {latest}"),
//!     RunOutcome::Published(report) => println!("published {}", report.version),
//! }
//! ```
//!
//! # Modules
//!
//! - [`quarter`] - Version labels and their spellings
//! - [`locator`] - Find the spreadsheet link on the source page
//! - [`fetcher`] - Download with retry and backoff
//! - [`gate`] - Compare discovered labels against the marker
//! - [`transform`] - Wide to tidy reshaping
//! - [`writer`] - CSV output
//! - [`marker`] - Progress marker storage
//! - [`pipeline`] - Orchestration
//! - [`testing`] - Mock transport for tests

pub mod config;
pub mod error;
pub mod fetcher;
pub mod gate;
pub mod locator;
pub mod marker;
pub mod pipeline;
pub mod quarter;
pub mod testing;
pub mod transform;
pub mod transport;
pub mod writer;

pub use config::{Config, HttpConfig, OutputConfig, RetryConfig};
pub use error::{
    ConfigError, DownloadError, Error, FetchError, MarkerError, NotFoundError, QuarterParseError,
    Result, SchemaError, TransportError, WriteError,
};
pub use fetcher::{Fetcher, RetryPolicy, StagedFile};
pub use gate::{is_newer, GateDecision, VersionGate};
pub use locator::{Locator, ResourceReference};
pub use marker::{FileMarkerStore, MarkerStore, MemoryMarkerStore, ProgressMarker};
pub use pipeline::{CheckReport, Pipeline, PublishReport, RunOptions, RunOutcome};
pub use quarter::{LabelFormat, Quarter};
pub use transform::{GroupRule, NullPolicy, RollupRule, TableLayout, TidyRecord, Transformer};
pub use transport::{HttpTransport, Transport, TransportResponse};
pub use writer::{ArchivedFile, CsvWriter, WriteMode, WrittenOutput};
