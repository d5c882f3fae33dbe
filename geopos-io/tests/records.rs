use std::fs;

use geopos_core::records::{MalformedRecordError, RecordSink, RecordSource, RecordSourceError};
use geopos_io::CsvRecords;
use tempfile::tempdir;

const SPUR: &str = "INFOS,XKOORD,YKOORD,SYMBOLID,SYMBOLDREHWINKEL,NR,DETAIL\n\
s1,683220,246380,,90,1,99\n\
s2,683210.5,246390,,0,2,\"3, links\"\n";

#[test]
fn reads_header_and_rows_in_file_order() {
    let dir = tempdir().expect("临时目录");
    fs::write(dir.path().join("SPUR.csv"), SPUR).expect("写入记录");

    let records = CsvRecords::new(dir.path());
    let table = records.load("SPUR").expect("读取").expect("存在 SPUR");
    assert_eq!(table.category(), "SPUR");
    assert_eq!(table.headers().len(), 7);
    let ids: Vec<_> = table.rows().iter().map(|r| r.id().to_string()).collect();
    assert_eq!(ids, vec!["s1", "s2"]);

    let second = table.find("s2").expect("行 s2");
    assert_eq!(second.number(1).expect("X"), Some(683_210.5));
    assert_eq!(second.field("DETAIL"), Some("3, links"));
    assert_eq!(second.column(3), Some(""));
}

#[test]
fn missing_file_is_not_an_error() {
    let dir = tempdir().expect("临时目录");
    let records = CsvRecords::new(dir.path());
    assert!(records.load("VVA").expect("读取").is_none());
}

#[test]
fn short_row_rejects_the_whole_category() {
    let dir = tempdir().expect("临时目录");
    fs::write(
        dir.path().join("DETEKTOR.csv"),
        "INFOS,XKOORD,YKOORD\nd1,1,2\nd2,3\n",
    )
    .expect("写入记录");

    let err = CsvRecords::new(dir.path())
        .load("DETEKTOR")
        .expect_err("第二行缺列");
    assert!(matches!(
        err,
        RecordSourceError::Malformed(MalformedRecordError::ColumnCount {
            row: 2,
            expected: 3,
            found: 2,
            ..
        })
    ));
}

#[test]
fn written_tables_land_in_the_target_directory() {
    let source = tempdir().expect("源目录");
    let target = tempdir().expect("目标目录");
    fs::write(source.path().join("SPUR.csv"), SPUR).expect("写入记录");

    let mut records = CsvRecords::new(source.path()).with_target(target.path().join("out"));
    let mut table = records.load("SPUR").expect("读取").expect("存在 SPUR");
    table
        .find_mut("s1")
        .expect("行 s1")
        .set_column(1, "683225")
        .expect("改写 X");
    records.store(&table).expect("写回");

    let original = fs::read_to_string(source.path().join("SPUR.csv")).expect("读源文件");
    assert_eq!(original, SPUR);

    let written = CsvRecords::new(target.path().join("out"))
        .load("SPUR")
        .expect("读取")
        .expect("写回的 SPUR");
    assert_eq!(written.headers(), table.headers());
    assert_eq!(written.find("s1").and_then(|r| r.column(1)), Some("683225"));
    assert_eq!(
        written.find("s2").and_then(|r| r.field("DETAIL")),
        Some("3, links")
    );
}
