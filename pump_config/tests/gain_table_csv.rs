use std::fs::File;
use std::io::Write;

use pump_config::{GainRow, load_gain_table_csv, save_gain_table_csv, validate_gain_rows};
use rstest::rstest;
use tempfile::tempdir;

#[rstest]
fn save_then_load_keeps_levels() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("gains.csv");
    save_gain_table_csv(&path, &[0.021, 0.019, 0.0125]).unwrap();

    let rows = load_gain_table_csv(&path).unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].pressure_bar, 0.0);
    assert_eq!(rows[2].pressure_bar, 2.0);
    assert!((rows[1].gain - 0.019).abs() < 1e-7);
    // Temp file is renamed away.
    assert!(!path.with_extension("new").exists());
}

#[rstest]
fn csv_with_wrong_header_errors() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bad_headers.csv");

    let mut f = File::create(&path).unwrap();
    writeln!(f, "bar,value").unwrap();
    writeln!(f, "0,0.02").unwrap();

    let err = load_gain_table_csv(&path).expect_err("should error on bad headers");
    assert!(format!("{err}").contains("headers 'pressure_bar,gain'"));
}

#[rstest]
fn csv_with_non_numeric_errors() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bad_numeric.csv");

    let mut f = File::create(&path).unwrap();
    writeln!(f, "pressure_bar,gain").unwrap();
    writeln!(f, "zero,fast").unwrap();

    let err = load_gain_table_csv(&path).expect_err("should error on non-numeric");
    assert!(format!("{err}").contains("invalid CSV row"));
}

#[rstest]
fn missing_file_errors() {
    let dir = tempdir().unwrap();
    let err = load_gain_table_csv(&dir.path().join("nope.csv")).unwrap_err();
    assert!(format!("{err}").contains("open gain table CSV"));
}

#[rstest]
#[case::gap(vec![(0.0, 0.02), (2.0, 0.02)], "must be at 1 bar")]
#[case::not_from_zero(vec![(1.0, 0.02)], "must be at 0 bar")]
#[case::negative_gain(vec![(0.0, -0.1)], "invalid gain")]
#[case::nan_gain(vec![(0.0, f32::NAN)], "invalid gain")]
#[case::empty(vec![], "empty")]
fn invalid_rows_rejected(#[case] rows: Vec<(f32, f32)>, #[case] needle: &str) {
    let rows: Vec<GainRow> = rows
        .into_iter()
        .map(|(pressure_bar, gain)| GainRow { pressure_bar, gain })
        .collect();
    let err = validate_gain_rows(&rows).expect_err("should reject");
    assert!(format!("{err}").contains(needle), "got: {err}");
}
