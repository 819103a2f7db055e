//! Pipeline configuration.
//!
//! A JSON document carrying the four source keys (`url`, `search_term`,
//! `latest_quarter`, `excel_save_path`) plus optional sections with defaults.
//! Environment variables (and a `.env` file, if present) override the source
//! keys.

use chrono::format::{Item, StrftimeItems};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::ConfigError;
use crate::fetcher::RetryPolicy;
use crate::quarter::{LabelFormat, Quarter};
use crate::transform::TableLayout;
use crate::writer::WriteMode;

pub const ENV_URL: &str = "ENERGY_TRENDS_URL";
pub const ENV_SEARCH_TERM: &str = "ENERGY_TRENDS_SEARCH_TERM";
pub const ENV_LATEST_QUARTER: &str = "ENERGY_TRENDS_LATEST_QUARTER";
pub const ENV_SAVE_PATH: &str = "ENERGY_TRENDS_SAVE_PATH";

const MARKER_FILE_NAME: &str = ".latest_quarter.json";

/// Full pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Page listing the downloadable statistics
    pub url: String,

    /// Text identifying the table on that page
    pub search_term: String,

    /// Starting progress marker, used until a marker has been stored
    pub latest_quarter: Quarter,

    /// Directory receiving the CSV output (and the marker, by default)
    pub excel_save_path: PathBuf,

    /// How version labels are spelled on the source page
    #[serde(default)]
    pub label_format: LabelFormat,

    /// File extensions that identify spreadsheet links
    #[serde(default = "default_link_extensions")]
    pub link_extensions: Vec<String>,

    #[serde(default)]
    pub table: TableLayout,

    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub http: HttpConfig,

    /// Progress marker location; defaults to a hidden file in `excel_save_path`
    #[serde(default)]
    pub marker_path: Option<PathBuf>,

    /// Download staging directory; defaults to a folder under the system temp dir
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,
}

/// Where and how the tidy CSV is written.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub file_name: String,
    pub write_mode: WriteMode,
    /// Spelling of the `Quarter` column
    pub quarter_format: LabelFormat,
    /// chrono format string for the `ProcessedDate` column
    pub date_format: String,
    /// Keep a copy of the downloaded spreadsheet next to the output
    pub archive_raw: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            file_name: "TransformedEnergyData.csv".to_string(),
            write_mode: WriteMode::Overwrite,
            quarter_format: LabelFormat::Compact,
            date_format: "%d/%m/%Y".to_string(),
            archive_raw: false,
        }
    }
}

/// Retry settings for the spreadsheet download.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: u32,
    pub max_jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 5_000,
            multiplier: 2,
            max_jitter_ms: 0,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.base_delay_ms))
            .with_multiplier(self.multiplier)
            .with_max_jitter(Duration::from_millis(self.max_jitter_ms))
    }
}

/// HTTP client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            user_agent: concat!("energy-trends/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

fn default_link_extensions() -> Vec<String> {
    vec!["xlsx".to_string(), "xls".to_string(), "ods".to_string()]
}

impl Config {
    /// Minimal configuration for a source; everything else takes defaults.
    pub fn new(
        url: impl Into<String>,
        search_term: impl Into<String>,
        latest_quarter: Quarter,
        excel_save_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            url: url.into(),
            search_term: search_term.into(),
            latest_quarter,
            excel_save_path: excel_save_path.into(),
            label_format: LabelFormat::default(),
            link_extensions: default_link_extensions(),
            table: TableLayout::default(),
            output: OutputConfig::default(),
            retry: RetryConfig::default(),
            http: HttpConfig::default(),
            marker_path: None,
            staging_dir: None,
        }
    }

    /// Load a config file, apply environment overrides, and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut config = Self::from_file(path)?;
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a config file without touching the environment.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Override source keys from environment variables.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        // Load .env file if present (development)
        let _ = dotenvy::dotenv();

        if let Ok(url) = env::var(ENV_URL) {
            debug!(var = ENV_URL, "Overriding url from environment");
            self.url = url;
        }
        if let Ok(term) = env::var(ENV_SEARCH_TERM) {
            debug!(var = ENV_SEARCH_TERM, "Overriding search_term from environment");
            self.search_term = term;
        }
        if let Ok(label) = env::var(ENV_LATEST_QUARTER) {
            debug!(var = ENV_LATEST_QUARTER, "Overriding latest_quarter from environment");
            self.latest_quarter = Quarter::parse_any(&label)?;
        }
        if let Ok(path) = env::var(ENV_SAVE_PATH) {
            debug!(var = ENV_SAVE_PATH, "Overriding excel_save_path from environment");
            self.excel_save_path = PathBuf::from(path);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        url::Url::parse(&self.url).map_err(|source| ConfigError::InvalidUrl {
            url: self.url.clone(),
            source,
        })?;

        if self.search_term.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "search_term",
                reason: "must not be empty".to_string(),
            });
        }
        if self.link_extensions.is_empty() {
            return Err(ConfigError::Invalid {
                field: "link_extensions",
                reason: "at least one extension is required".to_string(),
            });
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "retry.max_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.retry.multiplier == 0 {
            return Err(ConfigError::Invalid {
                field: "retry.multiplier",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.output.file_name.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "output.file_name",
                reason: "must not be empty".to_string(),
            });
        }
        if StrftimeItems::new(&self.output.date_format).any(|item| matches!(item, Item::Error)) {
            return Err(ConfigError::Invalid {
                field: "output.date_format",
                reason: format!("{:?} is not a valid strftime format", self.output.date_format),
            });
        }
        if self.table.header_scan_rows == 0 && self.table.header_row.is_none() {
            return Err(ConfigError::Invalid {
                field: "table.header_scan_rows",
                reason: "must be at least 1 when header_row is not pinned".to_string(),
            });
        }
        for rollup in &self.table.rollups {
            if rollup.members.is_empty() {
                return Err(ConfigError::Invalid {
                    field: "table.rollups",
                    reason: format!("roll-up {:?} has no members", rollup.into),
                });
            }
        }
        Ok(())
    }

    /// Destination of the tidy CSV.
    pub fn output_path(&self) -> PathBuf {
        self.excel_save_path.join(&self.output.file_name)
    }

    pub fn marker_path(&self) -> PathBuf {
        self.marker_path
            .clone()
            .unwrap_or_else(|| self.excel_save_path.join(MARKER_FILE_NAME))
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.staging_dir
            .clone()
            .unwrap_or_else(|| env::temp_dir().join("energy-trends"))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.http.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::NullPolicy;

    const MINIMAL: &str = r#"{
        "url": "https://www.gov.uk/government/statistics/oil-and-oil-products-section-3-energy-trends",
        "search_term": "Supply and use of crude oil",
        "latest_quarter": "1984 1st quarter",
        "excel_save_path": "/data/energy"
    }"#;

    #[test]
    fn minimal_config_takes_defaults() {
        let config: Config = serde_json::from_str(MINIMAL).unwrap();

        assert_eq!(config.latest_quarter, Quarter::new(1984, 1).unwrap());
        assert_eq!(config.label_format, LabelFormat::Ordinal);
        assert_eq!(config.table.sheet_name, "Quarter");
        assert_eq!(config.table.null_policy, NullPolicy::Keep);
        assert_eq!(config.output.write_mode, WriteMode::Overwrite);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(
            config.output_path(),
            PathBuf::from("/data/energy/TransformedEnergyData.csv")
        );
        assert_eq!(
            config.marker_path(),
            PathBuf::from("/data/energy/.latest_quarter.json")
        );
        config.validate().unwrap();
    }

    #[test]
    fn nested_sections_override_defaults() {
        let raw = r#"{
            "url": "https://example.com/stats",
            "search_term": "crude",
            "latest_quarter": "2023Q4",
            "excel_save_path": "out",
            "table": { "sheet_name": "Data", "header_row": 4, "null_policy": "skip" },
            "output": { "write_mode": "append", "quarter_format": "numeric" },
            "retry": { "max_attempts": 5, "base_delay_ms": 10 }
        }"#;
        let config: Config = serde_json::from_str(raw).unwrap();

        assert_eq!(config.table.sheet_name, "Data");
        assert_eq!(config.table.header_row, Some(4));
        assert_eq!(config.table.null_policy, NullPolicy::Skip);
        assert_eq!(config.output.write_mode, WriteMode::Append);
        assert_eq!(config.output.quarter_format, LabelFormat::Numeric);
        assert_eq!(config.output.file_name, "TransformedEnergyData.csv");
        let policy = config.retry.policy();
        assert_eq!(policy.max_attempts(), 5);
        assert_eq!(policy.delay_for(1), Duration::from_millis(10));
    }

    #[test]
    fn rejects_bad_url_and_empty_term() {
        let mut config: Config = serde_json::from_str(MINIMAL).unwrap();
        config.url = "not a url".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidUrl { .. })
        ));

        let mut config: Config = serde_json::from_str(MINIMAL).unwrap();
        config.search_term = "  ".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "search_term",
                ..
            })
        ));
    }

    #[test]
    fn rejects_bad_date_format() {
        let mut config: Config = serde_json::from_str(MINIMAL).unwrap();
        config.output.date_format = "%d/%m/%!".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "output.date_format",
                ..
            })
        ));
    }

    #[test]
    fn rejects_zero_attempts() {
        let mut config: Config = serde_json::from_str(MINIMAL).unwrap();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn bad_quarter_fails_to_parse() {
        let raw = MINIMAL.replace("1984 1st quarter", "sometime in 1984");
        assert!(serde_json::from_str::<Config>(&raw).is_err());
    }

    #[test]
    fn reads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, MINIMAL).unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.search_term, "Supply and use of crude oil");

        let missing = Config::from_file(dir.path().join("nope.json"));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }
}
