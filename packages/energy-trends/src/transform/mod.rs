//! Transformer: reshape a wide quarterly table into tidy records.
//!
//! The source sheet has one row per category and one column per quarter. The
//! transformer finds the header row, resolves category and sub-category for
//! every row (directly from key columns or from configured groups), applies
//! roll-ups, then unpivots into one [`TidyRecord`] per row and period.
//!
//! ```text
//! Category   | 1999Q1 | 1999Q2          Crude Oil, NGLs, 1999Q1, 10
//! Crude Oil  |   10   |   20      ==>   Crude Oil, NGLs, 1999Q2, 20
//! ```

mod reshape;
mod sheet;

pub use reshape::{WideRow, WideTable};
pub use sheet::{CellValue, Grid, Workbook};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::SchemaError;
use crate::quarter::Quarter;

/// What to do with cells that hold no number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NullPolicy {
    /// Emit a record with an empty quantity
    #[default]
    Keep,
    /// Drop the record
    Skip,
}

/// Rows directly below a heading row that belong to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRule {
    /// Heading label, e.g. `Indigenous production`
    pub name: String,
    /// Labels of the rows that follow it
    pub members: Vec<String>,
}

/// Sum several rows of one category into a single row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollupRule {
    pub category: String,
    pub members: Vec<String>,
    /// Sub-category of the summed row
    pub into: String,
}

/// Where the table lives in the workbook and how its rows are keyed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableLayout {
    pub sheet_name: String,
    /// Pinned header row, 0-based from the top of the sheet
    pub header_row: Option<usize>,
    /// Rows searched for a header when none is pinned
    pub header_scan_rows: usize,
    pub category_column: Option<String>,
    /// Setting this switches from group labels to explicit key columns
    pub sub_category_column: Option<String>,
    pub groups: Vec<GroupRule>,
    pub rollups: Vec<RollupRule>,
    pub null_policy: NullPolicy,
}

impl Default for TableLayout {
    fn default() -> Self {
        Self {
            sheet_name: "Quarter".to_string(),
            header_row: None,
            header_scan_rows: 20,
            category_column: None,
            sub_category_column: None,
            groups: Vec::new(),
            rollups: Vec::new(),
            null_policy: NullPolicy::Keep,
        }
    }
}

/// One observation in tidy form.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TidyRecord {
    pub category: String,
    pub sub_category: String,
    pub period: Quarter,
    pub quantity: Option<f64>,
    /// Source spreadsheet the value came from
    pub file_name: String,
    pub processed_at: DateTime<Utc>,
}

/// Reshapes spreadsheets according to a [`TableLayout`].
#[derive(Debug, Clone, Default)]
pub struct Transformer {
    layout: TableLayout,
}

impl Transformer {
    pub fn new(layout: TableLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &TableLayout {
        &self.layout
    }

    /// Open a workbook and parse the configured sheet into a wide table.
    pub fn read_table(&self, bytes: Vec<u8>) -> Result<WideTable, SchemaError> {
        let mut workbook = Workbook::from_bytes(bytes)?;
        let grid = workbook.grid(&self.layout.sheet_name)?;
        self.table_from_grid(&grid)
    }

    /// Parse an already-loaded grid.
    pub fn table_from_grid(&self, grid: &Grid) -> Result<WideTable, SchemaError> {
        let table = reshape::parse_table(grid, &self.layout)?;
        info!(
            sheet = %self.layout.sheet_name,
            rows = table.rows.len(),
            periods = table.periods.len(),
            latest = ?table.latest_period().map(|q| q.to_string()),
            "Parsed wide table"
        );
        Ok(table)
    }

    /// Newest period column in the table.
    pub fn latest_period(table: &WideTable) -> Option<Quarter> {
        table.latest_period()
    }

    /// Unpivot into tidy records: source row order, then period column order.
    pub fn unpivot(
        &self,
        table: &WideTable,
        file_name: &str,
        processed_at: DateTime<Utc>,
    ) -> Vec<TidyRecord> {
        let mut records = Vec::with_capacity(table.rows.len() * table.periods.len());
        let mut dropped = 0usize;

        for row in &table.rows {
            for (period, quantity) in table.periods.iter().zip(&row.values) {
                if quantity.is_none() && self.layout.null_policy == NullPolicy::Skip {
                    dropped += 1;
                    continue;
                }
                records.push(TidyRecord {
                    category: row.category.clone(),
                    sub_category: row.sub_category.clone(),
                    period: *period,
                    quantity: *quantity,
                    file_name: file_name.to_string(),
                    processed_at,
                });
            }
        }

        debug!(records = records.len(), dropped, "Unpivoted table");
        records
    }

    /// Read, reshape and unpivot in one step.
    pub fn transform(
        &self,
        bytes: Vec<u8>,
        file_name: &str,
        processed_at: DateTime<Utc>,
    ) -> Result<Vec<TidyRecord>, SchemaError> {
        let table = self.read_table(bytes)?;
        Ok(self.unpivot(&table, file_name, processed_at))
    }
}
