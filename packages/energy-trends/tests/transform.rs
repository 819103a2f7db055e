//! Reshaping the sample workbook.

use chrono::{TimeZone, Utc};

use energy_trends::transform::Workbook;
use energy_trends::{
    GroupRule, NullPolicy, Quarter, RollupRule, SchemaError, TableLayout, Transformer,
};

const SAMPLE: &[u8] = include_bytes!("fixtures/et_3_1_sample.xlsx");

fn q(year: u16, number: u8) -> Quarter {
    Quarter::new(year, number).unwrap()
}

fn layout() -> TableLayout {
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
            GroupRule {
                name: "Exports".into(),
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

#[test]
fn workbook_lists_sheets() {
    let workbook = Workbook::from_bytes(SAMPLE.to_vec()).unwrap();
    assert_eq!(workbook.sheet_names(), vec!["Notes", "Quarter"]);
}

#[test]
fn sample_sheet_parses_into_wide_table() {
    let table = Transformer::new(layout()).read_table(SAMPLE.to_vec()).unwrap();

    assert_eq!(
        table.periods,
        vec![q(2023, 3), q(2023, 4), q(2024, 1), q(2024, 2)]
    );
    assert_eq!(Transformer::latest_period(&table), Some(q(2024, 2)));
    assert_eq!(table.rows.len(), 11);

    let subs: Vec<&str> = table.rows.iter().map(|r| r.sub_category.as_str()).collect();
    assert_eq!(
        subs,
        vec![
            "Indigenous production",
            "Crude Oil & NGLs",
            "Feedstocks",
            "Imports",
            "Crude oil",
            "NGLs",
            "Exports",
            "Crude oil",
            "NGLs",
            "Stock change",
            "Total supply",
        ]
    );
    assert_eq!(table.rows[4].category, "Imports");
    assert_eq!(table.rows[7].category, "Exports");
}

#[test]
fn rollup_sums_members_ignoring_nulls() {
    let table = Transformer::new(layout()).read_table(SAMPLE.to_vec()).unwrap();
    let merged = &table.rows[1];

    let expected = [7601.2 + 802.4, 7789.0 + 811.9, 7888.8 + 830.0, 7512.5];
    for (value, expected) in merged.values.iter().zip(expected) {
        let value = value.unwrap();
        assert!((value - expected).abs() < 1e-9, "{value} != {expected}");
    }
}

#[test]
fn tidy_output_is_rows_times_periods() {
    let processed_at = Utc.with_ymd_and_hms(2024, 9, 26, 9, 30, 0).unwrap();
    let records = Transformer::new(layout())
        .transform(SAMPLE.to_vec(), "ET_3.1_SEP_24.xlsx", processed_at)
        .unwrap();

    assert_eq!(records.len(), 11 * 4);
    assert_eq!(records.iter().filter(|r| r.quantity.is_none()).count(), 1);

    // Row order first, then period order
    assert_eq!(records[0].sub_category, "Indigenous production");
    assert_eq!(records[0].period, q(2023, 3));
    assert_eq!(records[3].period, q(2024, 2));
    assert_eq!(records[4].sub_category, "Crude Oil & NGLs");
}

#[test]
fn skip_policy_drops_suppressed_cells() {
    let layout = TableLayout {
        null_policy: NullPolicy::Skip,
        ..layout()
    };
    let records = Transformer::new(layout)
        .transform(SAMPLE.to_vec(), "f.xlsx", Utc::now())
        .unwrap();
    assert_eq!(records.len(), 11 * 4 - 1);
}

#[test]
fn pinned_header_row_matches_detection() {
    let pinned = TableLayout {
        header_row: Some(4),
        ..layout()
    };
    let detected = Transformer::new(layout()).read_table(SAMPLE.to_vec()).unwrap();
    let table = Transformer::new(pinned).read_table(SAMPLE.to_vec()).unwrap();
    assert_eq!(table, detected);
}

#[test]
fn shifted_header_is_rejected() {
    let layout = TableLayout {
        header_row: Some(3),
        ..layout()
    };
    let err = Transformer::new(layout)
        .read_table(SAMPLE.to_vec())
        .unwrap_err();
    assert!(matches!(err, SchemaError::NotAHeaderRow { row: 3, .. }));
}

#[test]
fn missing_sheet_lists_alternatives() {
    let layout = TableLayout {
        sheet_name: "Annual".into(),
        ..layout()
    };
    let err = Transformer::new(layout)
        .read_table(SAMPLE.to_vec())
        .unwrap_err();
    match err {
        SchemaError::MissingSheet { sheet, available } => {
            assert_eq!(sheet, "Annual");
            assert_eq!(available, vec!["Notes", "Quarter"]);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}
