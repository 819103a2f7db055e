//! Spreadsheet reading.
//!
//! calamine does the format detection (xlsx, xls, xlsb, ods). Everything past
//! this module works on a [`Grid`] of [`CellValue`]s so reshaping can be
//! tested without building workbooks.

use calamine::{open_workbook_auto_from_rs, Data, Reader, Sheets};
use std::io::Cursor;
use tracing::debug;

use crate::error::SchemaError;

/// A single cell, reduced to what reshaping cares about.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Empty,
    Number(f64),
    Text(String),
}

impl CellValue {
    pub fn text(value: impl Into<String>) -> Self {
        let value = value.into();
        if value.trim().is_empty() {
            CellValue::Empty
        } else {
            CellValue::Text(value)
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, CellValue::Empty)
    }

    /// Cell rendered as text, `None` when empty.
    pub fn as_text(&self) -> Option<String> {
        match self {
            CellValue::Empty => None,
            CellValue::Number(n) => Some(n.to_string()),
            CellValue::Text(s) => Some(s.clone()),
        }
    }
}

impl From<&Data> for CellValue {
    fn from(data: &Data) -> Self {
        match data {
            Data::Empty => CellValue::Empty,
            Data::Int(i) => CellValue::Number(*i as f64),
            Data::Float(f) => CellValue::Number(*f),
            Data::DateTime(dt) => CellValue::Number(dt.as_f64()),
            Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => {
                CellValue::text(s.as_str())
            }
            Data::Bool(b) => CellValue::Text(b.to_string()),
            Data::Error(e) => CellValue::Text(format!("#{e}")),
        }
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Number(value)
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::text(value)
    }
}

/// One sheet as rows of cells. Row and column indices are sheet-absolute and
/// 0-based: row 0 is the first row of the sheet even if it is blank.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Grid {
    rows: Vec<Vec<CellValue>>,
}

impl Grid {
    pub fn new(rows: Vec<Vec<CellValue>>) -> Self {
        Self { rows }
    }

    pub fn height(&self) -> usize {
        self.rows.len()
    }

    pub fn row(&self, index: usize) -> Option<&[CellValue]> {
        self.rows.get(index).map(Vec::as_slice)
    }

    pub fn cell(&self, row: usize, column: usize) -> &CellValue {
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .unwrap_or(&CellValue::Empty)
    }
}

/// An opened spreadsheet.
pub struct Workbook {
    sheets: Sheets<Cursor<Vec<u8>>>,
}

impl Workbook {
    /// Open a workbook from raw bytes, detecting the format.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, SchemaError> {
        let sheets = open_workbook_auto_from_rs(Cursor::new(bytes))
            .map_err(|e| SchemaError::UnreadableWorkbook(e.to_string()))?;
        Ok(Self { sheets })
    }

    pub fn sheet_names(&self) -> Vec<String> {
        self.sheets.sheet_names()
    }

    /// Read one sheet into a [`Grid`].
    pub fn grid(&mut self, sheet: &str) -> Result<Grid, SchemaError> {
        let available = self.sheet_names();
        let Some(name) = available
            .iter()
            .find(|name| name.trim().eq_ignore_ascii_case(sheet.trim()))
            .cloned()
        else {
            return Err(SchemaError::MissingSheet {
                sheet: sheet.to_string(),
                available,
            });
        };

        let range = self
            .sheets
            .worksheet_range(&name)
            .map_err(|e| SchemaError::UnreadableWorkbook(e.to_string()))?;

        // calamine ranges start at the first used cell; pad back to A1
        let (row_offset, col_offset) = range
            .start()
            .map(|(r, c)| (r as usize, c as usize))
            .unwrap_or((0, 0));

        let mut rows = vec![Vec::new(); row_offset];
        rows.extend(range.rows().map(|row| {
            std::iter::repeat(CellValue::Empty)
                .take(col_offset)
                .chain(row.iter().map(CellValue::from))
                .collect::<Vec<_>>()
        }));

        debug!(sheet = %name, rows = rows.len(), "Read worksheet");
        Ok(Grid::new(rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_calamine_cells() {
        assert_eq!(CellValue::from(&Data::Int(7)), CellValue::Number(7.0));
        assert_eq!(CellValue::from(&Data::Float(1.5)), CellValue::Number(1.5));
        assert_eq!(
            CellValue::from(&Data::String("Crude oil".into())),
            CellValue::Text("Crude oil".into())
        );
        assert_eq!(CellValue::from(&Data::String("   ".into())), CellValue::Empty);
        assert_eq!(CellValue::from(&Data::Empty), CellValue::Empty);
    }

    #[test]
    fn grid_out_of_bounds_is_empty() {
        let grid = Grid::new(vec![vec![CellValue::from("a")]]);
        assert_eq!(grid.cell(0, 0), &CellValue::Text("a".into()));
        assert_eq!(grid.cell(0, 5), &CellValue::Empty);
        assert_eq!(grid.cell(9, 0), &CellValue::Empty);
        assert!(grid.row(1).is_none());
    }

    #[test]
    fn garbage_bytes_are_unreadable() {
        let result = Workbook::from_bytes(b"definitely not a spreadsheet".to_vec());
        assert!(matches!(result, Err(SchemaError::UnreadableWorkbook(_))));
    }
}
