//! Writer: persist tidy records as CSV.
//!
//! Files are replaced atomically (temp file in the destination directory, then
//! rename) so readers never see a half-written table. The previous contents are
//! kept in [`WrittenOutput`] until the caller commits the progress marker.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt::Write as _;
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::WriteError;
use crate::quarter::{LabelFormat, Quarter};
use crate::transform::TidyRecord;

/// Output columns, in order.
pub const HEADER: [&str; 6] = [
    "Category",
    "Sub_Category",
    "Quarter",
    "Quantity",
    "FileName",
    "ProcessedDate",
];

/// How new records combine with an existing output file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Replace the file
    #[default]
    Overwrite,
    /// Keep existing rows, add records for keys not already present
    Append,
}

/// Result of a write, able to undo itself.
#[derive(Debug)]
pub struct WrittenOutput {
    pub path: PathBuf,
    pub written: usize,
    /// Records not written because their key was already in the file
    pub skipped: usize,
    previous: Option<Vec<u8>>,
}

impl WrittenOutput {
    /// Put back whatever was at `path` before the write.
    pub fn rollback(self) -> Result<(), WriteError> {
        restore(&self.path, self.previous)
    }
}

/// A raw spreadsheet kept next to the output, able to undo itself.
#[derive(Debug)]
pub struct ArchivedFile {
    pub path: PathBuf,
    /// The source already lived at `path`; nothing was copied
    pub in_place: bool,
    previous: Option<Vec<u8>>,
}

impl ArchivedFile {
    /// Put back whatever was at `path` before the copy.
    pub fn rollback(self) -> Result<(), WriteError> {
        if self.in_place {
            return Ok(());
        }
        restore(&self.path, self.previous)
    }
}

/// Writes tidy records to one CSV file.
#[derive(Debug, Clone)]
pub struct CsvWriter {
    path: PathBuf,
    mode: WriteMode,
    quarter_format: LabelFormat,
    date_format: String,
}

impl CsvWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            mode: WriteMode::Overwrite,
            quarter_format: LabelFormat::Compact,
            date_format: "%d/%m/%Y".to_string(),
        }
    }

    pub fn with_mode(mut self, mode: WriteMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_quarter_format(mut self, format: LabelFormat) -> Self {
        self.quarter_format = format;
        self
    }

    pub fn with_date_format(mut self, format: impl Into<String>) -> Self {
        self.date_format = format.into();
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, records: &[TidyRecord]) -> Result<WrittenOutput, WriteError> {
        let previous = read_previous(&self.path)?;

        let existing = match (&self.mode, &previous) {
            (WriteMode::Append, Some(bytes)) if !bytes.is_empty() => self.read_existing(bytes)?,
            _ => Vec::new(),
        };

        let mut seen: HashSet<(String, String, String)> = existing
            .iter()
            .map(|row| (row[0].clone(), row[1].clone(), normalize_quarter(&row[2])))
            .collect();

        let mut rows = Vec::with_capacity(records.len());
        let mut skipped = 0usize;
        for record in records {
            let key = (
                record.category.clone(),
                record.sub_category.clone(),
                record.period.to_string(),
            );
            if !seen.insert(key) {
                skipped += 1;
                continue;
            }
            rows.push(self.render(record)?);
        }

        write_atomic(&self.path, |file| {
            let mut writer = csv::Writer::from_writer(file);
            writer.write_record(HEADER)?;
            for row in existing.iter().chain(rows.iter()) {
                writer.write_record(row)?;
            }
            writer.flush()?;
            Ok(())
        })?;

        info!(
            path = %self.path.display(),
            mode = ?self.mode,
            kept = existing.len(),
            written = rows.len(),
            skipped,
            "Wrote tidy output"
        );

        Ok(WrittenOutput {
            path: self.path.clone(),
            written: rows.len(),
            skipped,
            previous,
        })
    }

    fn read_existing(&self, bytes: &[u8]) -> Result<Vec<Vec<String>>, WriteError> {
        let csv_err = |source| WriteError::Csv {
            path: self.path.clone(),
            source,
        };

        let mut reader = csv::Reader::from_reader(bytes);
        let header: Vec<String> = reader
            .headers()
            .map_err(csv_err)?
            .iter()
            .map(str::to_string)
            .collect();
        if header != HEADER {
            return Err(WriteError::HeaderMismatch {
                path: self.path.clone(),
                found: header,
            });
        }

        let rows = reader
            .records()
            .map(|record| {
                record
                    .map(|r| r.iter().map(str::to_string).collect::<Vec<_>>())
                    .map_err(csv_err)
            })
            .collect::<Result<Vec<_>, _>>()?;
        debug!(path = %self.path.display(), rows = rows.len(), "Read existing output");
        Ok(rows)
    }

    fn render(&self, record: &TidyRecord) -> Result<Vec<String>, WriteError> {
        let mut processed = String::new();
        write!(processed, "{}", record.processed_at.format(&self.date_format)).map_err(|_| {
            WriteError::Io {
                path: self.path.clone(),
                source: io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("invalid date format {:?}", self.date_format),
                ),
            }
        })?;

        Ok(vec![
            record.category.clone(),
            record.sub_category.clone(),
            record.period.render(self.quarter_format),
            record.quantity.map(|q| q.to_string()).unwrap_or_default(),
            record.file_name.clone(),
            processed,
        ])
    }
}

/// Copy a downloaded spreadsheet next to the output.
///
/// When the source already is `<dir>/<file_name>` the file is left where it is
/// and the caller must not delete it afterwards.
pub fn archive_raw(source: &Path, dir: &Path, file_name: &str) -> Result<ArchivedFile, WriteError> {
    let target = dir.join(file_name);
    std::fs::create_dir_all(dir).map_err(|source| WriteError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    if same_file(source, &target) {
        debug!(path = %target.display(), "Raw spreadsheet already in place");
        return Ok(ArchivedFile {
            path: target,
            in_place: true,
            previous: None,
        });
    }

    let previous = read_previous(&target)?;
    std::fs::copy(source, &target).map_err(|source| WriteError::Io {
        path: target.clone(),
        source,
    })?;
    info!(path = %target.display(), "Archived raw spreadsheet");
    Ok(ArchivedFile {
        path: target,
        in_place: false,
        previous,
    })
}

/// Both paths resolve to the same existing file.
pub(crate) fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn read_previous(path: &Path) -> Result<Option<Vec<u8>>, WriteError> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(WriteError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn restore(path: &Path, previous: Option<Vec<u8>>) -> Result<(), WriteError> {
    match previous {
        Some(bytes) => {
            warn!(path = %path.display(), "Restoring previous contents");
            write_atomic(path, |file| file.write_all(&bytes).map_err(csv::Error::from))
        }
        None => {
            warn!(path = %path.display(), "Removing file written by failed run");
            std::fs::remove_file(path).map_err(|source| WriteError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    }
}

/// Existing files may spell quarters in any known format.
fn normalize_quarter(text: &str) -> String {
    Quarter::parse_any(text)
        .map(|q| q.to_string())
        .unwrap_or_else(|_| text.to_string())
}

fn write_atomic<F>(path: &Path, fill: F) -> Result<(), WriteError>
where
    F: FnOnce(&mut std::fs::File) -> Result<(), csv::Error>,
{
    let io_err = |source| WriteError::Io {
        path: path.to_path_buf(),
        source,
    };

    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    std::fs::create_dir_all(dir).map_err(io_err)?;

    let mut temp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
    fill(temp.as_file_mut()).map_err(|source| WriteError::Csv {
        path: path.to_path_buf(),
        source,
    })?;
    temp.as_file().sync_all().map_err(io_err)?;
    temp.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}
