use std::collections::HashSet;
use tracing::{debug, warn};

use super::sheet::{CellValue, Grid};
use super::{RollupRule, TableLayout};
use crate::error::SchemaError;
use crate::quarter::{clean_label, Quarter};

const DEFAULT_CATEGORY_COLUMN: &str = "Category";

/// A parsed sheet still in wide form.
#[derive(Debug, Clone, PartialEq)]
pub struct WideTable {
    /// Period columns in sheet order
    pub periods: Vec<Quarter>,
    pub rows: Vec<WideRow>,
}

impl WideTable {
    pub fn latest_period(&self) -> Option<Quarter> {
        self.periods.iter().max().copied()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WideRow {
    pub category: String,
    pub sub_category: String,
    /// One entry per period column, `None` where the cell held no number
    pub values: Vec<Option<f64>>,
}

enum Keys {
    Explicit { category: usize, sub_category: usize },
    Label { column: usize },
}

pub(crate) fn parse_table(grid: &Grid, layout: &TableLayout) -> Result<WideTable, SchemaError> {
    let header_index = find_header(grid, layout)?;
    let header = grid.row(header_index).unwrap_or(&[]);

    let period_columns = period_columns(header);
    if period_columns.is_empty() {
        return Err(SchemaError::NoPeriodColumns);
    }
    check_unique_periods(&period_columns)?;

    let keys = resolve_keys(header, &period_columns, layout)?;
    let mut rows = Vec::new();
    let mut open_group: Option<usize> = None;

    for index in header_index + 1..grid.height() {
        let values: Vec<Option<f64>> = period_columns
            .iter()
            .map(|(column, _)| quantity(grid.cell(index, *column)))
            .collect();

        let (category, sub_category) = match keys {
            Keys::Explicit {
                category,
                sub_category,
            } => {
                let Some(category) = label(grid.cell(index, category)) else {
                    continue;
                };
                let sub_category =
                    label(grid.cell(index, sub_category)).unwrap_or_else(|| category.clone());
                (category, sub_category)
            }
            Keys::Label { column } => {
                let Some(text) = label(grid.cell(index, column)) else {
                    continue;
                };
                if let Some(group) = find_group(layout, &text) {
                    open_group = Some(group);
                    (text.clone(), text)
                } else if let Some(group) = open_group
                    .map(|g| &layout.groups[g])
                    .filter(|g| g.members.iter().any(|m| same_label(m, &text)))
                {
                    (group.name.clone(), text)
                } else {
                    open_group = None;
                    (text.clone(), text)
                }
            }
        };

        rows.push(WideRow {
            category,
            sub_category,
            values,
        });
    }

    for rollup in &layout.rollups {
        apply_rollup(&mut rows, rollup);
    }
    check_unique_rows(&rows)?;

    debug!(header_row = header_index, rows = rows.len(), "Resolved table rows");
    Ok(WideTable {
        periods: period_columns.into_iter().map(|(_, q)| q).collect(),
        rows,
    })
}

fn find_header(grid: &Grid, layout: &TableLayout) -> Result<usize, SchemaError> {
    if let Some(pinned) = layout.header_row {
        let has_periods = grid
            .row(pinned)
            .is_some_and(|row| !period_columns(row).is_empty());
        if !has_periods {
            return Err(SchemaError::NotAHeaderRow {
                sheet: layout.sheet_name.clone(),
                row: pinned,
            });
        }
        return Ok(pinned);
    }

    let scanned = layout.header_scan_rows.min(grid.height());
    (0..scanned)
        .find(|&index| {
            grid.row(index)
                .is_some_and(|row| !period_columns(row).is_empty())
        })
        .ok_or_else(|| SchemaError::HeaderNotFound {
            sheet: layout.sheet_name.clone(),
            scanned,
        })
}

fn period_columns(header: &[CellValue]) -> Vec<(usize, Quarter)> {
    header
        .iter()
        .enumerate()
        .filter_map(|(column, cell)| {
            let text = cell.as_text()?;
            Quarter::parse_any(&text).ok().map(|q| (column, q))
        })
        .collect()
}

fn check_unique_periods(columns: &[(usize, Quarter)]) -> Result<(), SchemaError> {
    let mut seen = HashSet::new();
    for (_, quarter) in columns {
        if !seen.insert(*quarter) {
            return Err(SchemaError::DuplicatePeriod {
                label: quarter.to_string(),
            });
        }
    }
    Ok(())
}

fn resolve_keys(
    header: &[CellValue],
    periods: &[(usize, Quarter)],
    layout: &TableLayout,
) -> Result<Keys, SchemaError> {
    let find = |name: &str| -> Result<usize, SchemaError> {
        header
            .iter()
            .position(|cell| {
                cell.as_text()
                    .is_some_and(|text| column_key(&text) == column_key(name))
            })
            .ok_or_else(|| SchemaError::MissingColumn {
                column: name.to_string(),
            })
    };

    if let Some(sub_category) = &layout.sub_category_column {
        let category = layout
            .category_column
            .as_deref()
            .unwrap_or(DEFAULT_CATEGORY_COLUMN);
        return Ok(Keys::Explicit {
            category: find(category)?,
            sub_category: find(sub_category)?,
        });
    }

    if let Some(category) = &layout.category_column {
        return Ok(Keys::Label {
            column: find(category)?,
        });
    }

    // Unnamed first column holds the row labels
    let period_set: HashSet<usize> = periods.iter().map(|(c, _)| *c).collect();
    let column = (0..header.len().max(1))
        .find(|c| !period_set.contains(c))
        .ok_or_else(|| SchemaError::MissingColumn {
            column: DEFAULT_CATEGORY_COLUMN.to_string(),
        })?;
    Ok(Keys::Label { column })
}

fn find_group(layout: &TableLayout, text: &str) -> Option<usize> {
    layout.groups.iter().position(|g| same_label(&g.name, text))
}

fn apply_rollup(rows: &mut Vec<WideRow>, rollup: &RollupRule) {
    let member_positions: Vec<usize> = rows
        .iter()
        .enumerate()
        .filter(|(_, row)| {
            same_label(&row.category, &rollup.category)
                && rollup.members.iter().any(|m| same_label(m, &row.sub_category))
        })
        .map(|(i, _)| i)
        .collect();

    let Some(&first) = member_positions.first() else {
        warn!(
            category = %rollup.category,
            into = %rollup.into,
            "No rows found for roll-up, skipping"
        );
        return;
    };

    let width = rows[first].values.len();
    let values: Vec<Option<f64>> = (0..width)
        .map(|column| {
            member_positions
                .iter()
                .filter_map(|&i| rows[i].values[column])
                .fold(None, |sum, v| Some(sum.unwrap_or(0.0) + v))
        })
        .collect();

    let merged = WideRow {
        category: rows[first].category.clone(),
        sub_category: rollup.into.clone(),
        values,
    };

    debug!(
        category = %merged.category,
        into = %merged.sub_category,
        members = member_positions.len(),
        "Applied roll-up"
    );

    for &i in member_positions.iter().rev() {
        rows.remove(i);
    }
    rows.insert(first, merged);
}

fn check_unique_rows(rows: &[WideRow]) -> Result<(), SchemaError> {
    let mut seen = HashSet::new();
    for row in rows {
        if !seen.insert((row.category.as_str(), row.sub_category.as_str())) {
            return Err(SchemaError::DuplicateRow {
                category: row.category.clone(),
                sub_category: row.sub_category.clone(),
            });
        }
    }
    Ok(())
}

/// Cleaned row label, `None` for blank cells.
fn label(cell: &CellValue) -> Option<String> {
    let cleaned = clean_label(&cell.as_text()?);
    (!cleaned.is_empty()).then_some(cleaned)
}

/// Numeric value of a data cell. Suppression markers and other text are null.
fn quantity(cell: &CellValue) -> Option<f64> {
    match cell {
        CellValue::Number(n) if n.is_finite() => Some(*n),
        CellValue::Number(_) | CellValue::Empty => None,
        CellValue::Text(text) => {
            let cleaned = clean_label(text).replace(',', "");
            cleaned.parse::<f64>().ok().filter(|n| n.is_finite())
        }
    }
}

fn same_label(a: &str, b: &str) -> bool {
    clean_label(a).eq_ignore_ascii_case(&clean_label(b))
}

fn column_key(name: &str) -> String {
    clean_label(&name.replace('-', " ")).to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::{GroupRule, NullPolicy};

    fn q(year: u16, number: u8) -> Quarter {
        Quarter::new(year, number).unwrap()
    }

    fn text(s: &str) -> CellValue {
        CellValue::from(s)
    }

    fn num(n: f64) -> CellValue {
        CellValue::Number(n)
    }

    fn energy_layout() -> TableLayout {
        TableLayout {
            groups: vec![
                GroupRule {
                    name: "Indigenous production".into(),
                    members: vec!["Crude oil".into(), "NGLs".into(), "Feedstocks".into()],
                },
                GroupRule {
                    name: "Imports".into(),
                    members: vec!["Crude oil".into(), "NGLs".into()],
                },
            ],
            rollups: vec![RollupRule {
                category: "Indigenous production".into(),
                members: vec!["Crude oil".into(), "NGLs".into()],
                into: "Crude Oil & NGLs".into(),
            }],
            ..TableLayout::default()
        }
    }

    /// A miniature of the published Quarter sheet: title rows, then the table.
    fn energy_grid() -> Grid {
        Grid::new(vec![
            vec![text("Supply and use of crude oil, natural gas liquids and feedstocks")],
            vec![text("Thousand tonnes")],
            vec![],
            vec![text("This worksheet contains one table")],
            vec![
                text("Column1"),
                text("2024\n1st quarter"),
                text("2024_2nd_quarter [note 3]"),
            ],
            vec![text("Indigenous production [note 1]"), num(9000.0), num(8500.0)],
            vec![text("Crude oil"), num(8000.0), num(7600.0)],
            vec![text("NGLs"), num(700.0), text("[x]")],
            vec![text("Feedstocks"), num(300.0), num(250.0)],
            vec![],
            vec![text("Imports"), num(5000.0), num(5100.0)],
            vec![text("Crude oil"), num(4000.0), num(4100.0)],
            vec![text("NGLs"), num(1000.0), num(1000.0)],
            vec![text("Stock change [note 2]"), text("-12.5"), text("1,024")],
        ])
    }

    fn keys(table: &WideTable) -> Vec<(String, String)> {
        table
            .rows
            .iter()
            .map(|r| (r.category.clone(), r.sub_category.clone()))
            .collect()
    }

    #[test]
    fn detects_header_below_title_rows() {
        let table = parse_table(&energy_grid(), &energy_layout()).unwrap();
        assert_eq!(table.periods, vec![q(2024, 1), q(2024, 2)]);
        assert_eq!(table.latest_period(), Some(q(2024, 2)));
    }

    #[test]
    fn groups_and_rollups_shape_the_keys() {
        let table = parse_table(&energy_grid(), &energy_layout()).unwrap();
        let pair = |a: &str, b: &str| (a.to_string(), b.to_string());

        assert_eq!(
            keys(&table),
            vec![
                pair("Indigenous production", "Indigenous production"),
                pair("Indigenous production", "Crude Oil & NGLs"),
                pair("Indigenous production", "Feedstocks"),
                pair("Imports", "Imports"),
                pair("Imports", "Crude oil"),
                pair("Imports", "NGLs"),
                pair("Stock change", "Stock change"),
            ]
        );

        // Nulls are ignored in the sum
        assert_eq!(table.rows[1].values, vec![Some(8700.0), Some(7600.0)]);
        assert_eq!(table.rows[6].values, vec![Some(-12.5), Some(1024.0)]);
    }

    #[test]
    fn group_closes_on_non_member() {
        let grid = Grid::new(vec![
            vec![text("Category"), text("2024Q1")],
            vec![text("Imports"), num(1.0)],
            vec![text("Crude oil"), num(2.0)],
            vec![text("Total supply"), num(3.0)],
            vec![text("NGLs"), num(4.0)],
        ]);
        let table = parse_table(&grid, &energy_layout()).unwrap();
        assert_eq!(table.rows[1].category, "Imports");
        assert_eq!(table.rows[3].category, "NGLs");
    }

    #[test]
    fn pinned_header_must_hold_periods() {
        let layout = TableLayout {
            header_row: Some(1),
            ..energy_layout()
        };
        let err = parse_table(&energy_grid(), &layout).unwrap_err();
        assert!(matches!(err, SchemaError::NotAHeaderRow { row: 1, .. }));

        let layout = TableLayout {
            header_row: Some(4),
            ..energy_layout()
        };
        assert!(parse_table(&energy_grid(), &layout).is_ok());
    }

    #[test]
    fn shifted_header_beyond_scan_window_is_not_found() {
        let layout = TableLayout {
            header_scan_rows: 3,
            ..energy_layout()
        };
        let err = parse_table(&energy_grid(), &layout).unwrap_err();
        assert!(matches!(err, SchemaError::HeaderNotFound { scanned: 3, .. }));
    }

    #[test]
    fn duplicate_period_columns_are_rejected() {
        let grid = Grid::new(vec![
            vec![text("Category"), text("2024Q1"), text("2024 1st quarter")],
            vec![text("Refineries"), num(1.0), num(2.0)],
        ]);
        let err = parse_table(&grid, &TableLayout::default()).unwrap_err();
        assert!(matches!(err, SchemaError::DuplicatePeriod { .. }));
    }

    #[test]
    fn duplicate_rows_without_rollup_are_rejected() {
        let grid = Grid::new(vec![
            vec![text("Category"), text("2024Q1")],
            vec![text("Crude oil"), num(1.0)],
            vec![text("Crude oil"), num(2.0)],
        ]);
        let err = parse_table(&grid, &TableLayout::default()).unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateRow { .. }));
    }

    #[test]
    fn explicit_columns_must_exist() {
        let grid = Grid::new(vec![
            vec![text("Category"), text("2024Q1")],
            vec![text("Crude oil"), num(1.0)],
        ]);
        let layout = TableLayout {
            sub_category_column: Some("Sub Category".into()),
            ..TableLayout::default()
        };
        let err = parse_table(&grid, &layout).unwrap_err();
        assert!(matches!(err, SchemaError::MissingColumn { column } if column == "Sub Category"));
    }

    #[test]
    fn explicit_column_names_match_loosely() {
        let grid = Grid::new(vec![
            vec![text("category"), text("Sub-Category"), text("2024Q1")],
            vec![text("Crude Oil"), text("NGLs"), num(10.0)],
        ]);
        let layout = TableLayout {
            sub_category_column: Some("Sub_Category".into()),
            null_policy: NullPolicy::Keep,
            ..TableLayout::default()
        };
        let table = parse_table(&grid, &layout).unwrap();
        assert_eq!(keys(&table), vec![("Crude Oil".into(), "NGLs".into())]);
    }

    #[test]
    fn sheet_without_period_headers_has_no_header() {
        let grid = Grid::new(vec![vec![text("Category"), text("Notes")]]);
        let err = parse_table(&grid, &TableLayout::default()).unwrap_err();
        assert!(matches!(err, SchemaError::HeaderNotFound { .. }));
    }

    #[test]
    fn rollup_without_members_is_skipped() {
        let grid = Grid::new(vec![
            vec![text("Category"), text("2024Q1")],
            vec![text("Stock change"), num(1.0)],
        ]);
        let table = parse_table(&grid, &energy_layout()).unwrap();
        assert_eq!(table.rows.len(), 1);
    }

    #[test]
    fn quantities_parse_leniently() {
        assert_eq!(quantity(&num(3.5)), Some(3.5));
        assert_eq!(quantity(&text("1,234.5")), Some(1234.5));
        assert_eq!(quantity(&text(" 42 ")), Some(42.0));
        assert_eq!(quantity(&text("[x]")), None);
        assert_eq!(quantity(&text("[c]")), None);
        assert_eq!(quantity(&text("-")), None);
        assert_eq!(quantity(&text("..")), None);
        assert_eq!(quantity(&CellValue::Empty), None);
    }
}
