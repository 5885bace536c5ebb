use std::fs::File;
use std::io::Write;

use oref_config::load_readings_csv;
use rstest::rstest;
use tempfile::tempdir;

#[rstest]
fn loads_and_sorts_newest_first() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bg.csv");
    let mut f = File::create(&path).unwrap();
    writeln!(f, "date,glucose,device,type").unwrap();
    writeln!(f, "2025-01-26T11:50:00+01:00,110,g6,sgv").unwrap();
    writeln!(f, "2025-01-26T12:00:00+01:00,120,g6,sgv").unwrap();
    writeln!(f, "2025-01-26T11:55:00+01:00,115,,").unwrap();
    drop(f);

    let rows = load_readings_csv(&path).unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].glucose, Some(120.0));
    assert_eq!(rows[1].glucose, Some(115.0));
    assert_eq!(rows[1].device, None);
    assert_eq!(rows[2].glucose, Some(110.0));
}

#[rstest]
fn rejects_wrong_headers() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bg.csv");
    std::fs::write(&path, "time,sgv\n2025-01-26T12:00:00+01:00,120\n").unwrap();
    let err = load_readings_csv(&path).unwrap_err();
    assert!(format!("{err}").contains("must have headers 'date,glucose,device,type'"));
}

#[rstest]
fn reports_bad_row_number() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bg.csv");
    std::fs::write(
        &path,
        "date,glucose,device,type\n2025-01-26T12:00:00+01:00,120,g6,sgv\nyesterday,abc,g6,sgv\n",
    )
    .unwrap();
    let err = load_readings_csv(&path).unwrap_err();
    assert!(format!("{err}").contains("invalid CSV row 3"));
}

#[rstest]
fn rejects_empty_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bg.csv");
    std::fs::write(&path, "date,glucose,device,type\n").unwrap();
    let err = load_readings_csv(&path).unwrap_err();
    assert!(format!("{err}").contains("has no rows"));
}
