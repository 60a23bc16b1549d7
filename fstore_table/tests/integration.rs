/// Integration tests: whole tables written to disk and read back through the
/// public API, including sub-range reads, column selection, key propagation
/// and damaged-file detection.
use std::fs;
use std::path::{Path, PathBuf};

use fstore_table::{
    read, read_metadata, write, Column, ColumnAttribute, ColumnVector, ErrorCategory, FactorVector, FstError,
    FstStore, RowRange, StoreConfig, Table, TimeScale,
};
use tempfile::TempDir;

const LEVELS: [u32; 5] = [0, 1, 50, 99, 100];

fn scratch() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("table.fst");
    (dir, path)
}

/// Deterministic LCG so every run writes the same table.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.0 >> 33
    }
}

fn mixed_table(rows: usize) -> Table {
    let mut rng = Lcg(42);
    let mut na = |every: u64| rng.next() % every == 0;

    let ints: Vec<Option<i32>> = (0..rows as i32).map(|i| (!na(11)).then_some(i * 2 - 500)).collect();
    let doubles: Vec<Option<f64>> = (0..rows).map(|i| (!na(13)).then_some(i as f64 * 0.25 - 7.5)).collect();
    let logicals: Vec<Option<bool>> = (0..rows).map(|i| (!na(7)).then_some(i % 3 == 0)).collect();
    let longs: Vec<Option<i64>> = (0..rows as i64)
        .map(|i| (!na(17)).then_some(i * 1_000_000_007))
        .collect();
    let bytes: Vec<u8> = (0..rows).map(|i| (i % 251) as u8).collect();
    let strings: Vec<Option<String>> = (0..rows)
        .map(|i| (!na(9)).then(|| format!("row-{}-{}", i % 97, "x".repeat(i % 5))))
        .collect();
    let factor = FactorVector {
        codes: (0..rows).map(|i| (!na(19)).then_some((i % 4) as u32)).collect(),
        levels: vec!["north".into(), "south".into(), "east".into(), "west".into()],
    };

    Table::new(vec![
        Column::new("int", ColumnVector::Int32(ints)),
        Column::new("double", ColumnVector::Double(doubles)),
        Column::new("logical", ColumnVector::Logical(logicals)),
        Column::new("int64", ColumnVector::Int64(longs))
            .with_attribute(ColumnAttribute::Int64TimeSeconds)
            .with_scale(TimeScale::Nanoseconds)
            .with_annotation("UTC"),
        Column::new("byte", ColumnVector::Byte(bytes)),
        Column::new("string", ColumnVector::Character(strings)),
        Column::new("factor", ColumnVector::Factor(factor)).with_attribute(ColumnAttribute::FactorOrdered),
    ])
    .unwrap()
    .with_keys(vec![0, 5])
    .unwrap()
}

fn sliced(table: &Table, start: usize, end: usize) -> Vec<ColumnVector> {
    table.columns().iter().map(|c| c.data.slice(start..end)).collect()
}

fn data_of(table: &Table) -> Vec<ColumnVector> {
    table.columns().iter().map(|c| c.data.clone()).collect()
}

// ── concrete scenarios ──────────────────────────────────────────────────────

fn three_columns() -> Table {
    Table::new(vec![
        Column::new("i", ColumnVector::Int32(vec![Some(1), Some(2), None, Some(4), Some(5)])),
        Column::new(
            "s",
            ColumnVector::Character(vec![
                Some("a".into()),
                None,
                Some("ccc".into()),
                Some("d".into()),
                Some(String::new()),
            ]),
        ),
        Column::new("d", ColumnVector::Double(vec![Some(1.1), Some(2.2), Some(3.3), None, Some(5.5)])),
    ])
    .unwrap()
}

#[test]
fn test_three_column_scenario() {
    let table = three_columns();
    for compression in [0, 50] {
        let (_dir, path) = scratch();
        write(&path, &table, compression).unwrap();
        assert_eq!(read(&path, None, RowRange::all()).unwrap(), table);

        let part = read(&path, None, RowRange::new(2, 4)).unwrap();
        assert_eq!(part.row_count(), 2);
        assert_eq!(part.columns()[0].data, ColumnVector::Int32(vec![None, Some(4)]));
        assert_eq!(
            part.columns()[1].data,
            ColumnVector::Character(vec![Some("ccc".into()), Some("d".into())])
        );
        assert_eq!(part.columns()[2].data, ColumnVector::Double(vec![Some(3.3), None]));
    }
}

#[test]
fn test_int32_block_boundary_scenario() {
    let values: Vec<Option<i32>> = (0..10_000).map(|i| Some(i * 7 - 3)).collect();
    let table = Table::new(vec![Column::new("v", ColumnVector::Int32(values.clone()))]).unwrap();
    for compression in [0, 30, 75] {
        let (_dir, path) = scratch();
        write(&path, &table, compression).unwrap();
        let part = read(&path, None, RowRange::new(4090, 4102)).unwrap();
        assert_eq!(part.columns()[0].data, ColumnVector::Int32(values[4090..4102].to_vec()));
    }
}

// ── properties ─────────────────────────────────────────────────────────────

#[test]
fn test_round_trip_every_type_and_level() {
    let table = mixed_table(20_000);
    for compression in LEVELS {
        let (_dir, path) = scratch();
        write(&path, &table, compression).unwrap();
        let back = read(&path, None, RowRange::all()).unwrap();
        assert_eq!(back, table, "compression {compression}");
    }
}

#[test]
fn test_random_access_matches_slices() {
    let table = mixed_table(12_345);
    let (_dir, path) = scratch();
    write(&path, &table, 60).unwrap();

    let store = FstStore::new(StoreConfig::default().threads(3));
    let ranges = [(0, 1), (2046, 2049), (4095, 4097), (8000, 12_345), (12_344, 12_345), (100, 9000)];
    for (start, end) in ranges {
        let part = store.read(&path, None, RowRange::new(start, end)).unwrap();
        assert_eq!(
            data_of(&part),
            sliced(&table, start as usize, end as usize),
            "rows {start}..{end}"
        );
    }

    let tail = store.read(&path, None, RowRange::starting_at(12_000)).unwrap();
    assert_eq!(data_of(&tail), sliced(&table, 12_000, 12_345));
}

#[test]
fn test_end_row_is_clamped() {
    let table = three_columns();
    let (_dir, path) = scratch();
    write(&path, &table, 10).unwrap();
    let part = read(&path, Some(&["d"]), RowRange::new(3, 1_000)).unwrap();
    assert_eq!(part.columns()[0].data, ColumnVector::Double(vec![None, Some(5.5)]));
}

#[test]
fn test_writes_are_deterministic() {
    let table = mixed_table(9_000);
    let (_dir_a, a) = scratch();
    let (_dir_b, b) = scratch();
    FstStore::new(StoreConfig::sequential()).write(&a, &table, 80).unwrap();
    FstStore::new(StoreConfig::default().threads(8)).write(&b, &table, 80).unwrap();
    assert_eq!(fs::read(&a).unwrap(), fs::read(&b).unwrap());
}

#[test]
fn test_metadata_is_idempotent() {
    let table = mixed_table(3_000);
    let (_dir, path) = scratch();
    write(&path, &table, 40).unwrap();
    let before = fs::read(&path).unwrap();

    let first = read_metadata(&path).unwrap();
    let second = read_metadata(&path).unwrap();
    assert_eq!(first, second);
    assert_eq!(fs::read(&path).unwrap(), before);

    assert_eq!(first.row_count, 3_000);
    assert_eq!(first.format_version, 1);
    assert_eq!(first.keys, vec!["int".to_string(), "string".to_string()]);
    let names: Vec<&str> = first.column_names().collect();
    assert_eq!(names, ["int", "double", "logical", "int64", "byte", "string", "factor"]);
    let int64 = &first.columns[3];
    assert_eq!(int64.column_type, "int64");
    assert_eq!(int64.attribute, ColumnAttribute::Int64TimeSeconds);
    assert_eq!(int64.scale, TimeScale::Nanoseconds);
    assert_eq!(int64.annotation.as_deref(), Some("UTC"));
    assert_eq!(first.columns[6].attribute, ColumnAttribute::FactorOrdered);
}

#[test]
fn test_column_selection_and_keys() {
    let table = mixed_table(500);
    let (_dir, path) = scratch();
    write(&path, &table, 20).unwrap();

    let picked = read(&path, Some(&["string", "byte", "int"]), RowRange::all()).unwrap();
    let names: Vec<&str> = picked.columns().iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, ["string", "byte", "int"]);
    assert_eq!(picked.keys(), &[2, 0]);

    let picked = read(&path, Some(&["string"]), RowRange::all()).unwrap();
    assert!(picked.keys().is_empty(), "second key without the first is not a key");

    let err = read(&path, Some(&["int", "missing"]), RowRange::all()).unwrap_err();
    assert!(matches!(err, FstError::ColumnNotFound(ref name) if name == "missing"));
}

// ── boundaries and errors ───────────────────────────────────────────────────

#[test]
fn test_zero_rows_rejected() {
    let (_dir, path) = scratch();
    let empty = Table::new(vec![Column::new("v", ColumnVector::Int32(Vec::new()))]).unwrap();
    let err = write(&path, &empty, 50).unwrap_err();
    assert!(matches!(err, FstError::NoData));
    assert_eq!(err.category(), ErrorCategory::Usage);
    assert!(!path.exists(), "no file is created for a rejected write");

    let no_columns = Table::new(Vec::new()).unwrap();
    assert!(matches!(write(&path, &no_columns, 0), Err(FstError::NoData)));
}

#[test]
fn test_compression_level_validated() {
    let (_dir, path) = scratch();
    assert!(matches!(
        write(&path, &three_columns(), 101),
        Err(FstError::InvalidCompressionLevel(101))
    ));
}

#[test]
fn test_integer_minimum_is_reserved_for_na() {
    let reserved = Table::new(vec![Column::new("i", ColumnVector::Int32(vec![Some(i32::MIN), Some(1)]))]);
    assert!(matches!(reserved, Err(FstError::InvalidTable(_))));
    let reserved = Table::new(vec![Column::new("l", ColumnVector::Int64(vec![Some(i64::MIN), Some(2)]))]);
    assert!(matches!(reserved, Err(FstError::InvalidTable(_))));

    let table = Table::new(vec![
        Column::new("i", ColumnVector::Int32(vec![Some(i32::MIN + 1), None, Some(i32::MAX)])),
        Column::new("l", ColumnVector::Int64(vec![Some(i64::MIN + 1), Some(i64::MAX), None])),
    ])
    .unwrap();
    for compression in [0, 50, 100] {
        let (_dir, path) = scratch();
        write(&path, &table, compression).unwrap();
        assert_eq!(read(&path, None, RowRange::all()).unwrap(), table, "compression {compression}");
    }
}

#[test]
fn test_zero_level_factor_is_all_na() {
    let table = Table::new(vec![
        Column::new("n", ColumnVector::Int32(vec![Some(1), Some(2), Some(3), Some(4)])),
        Column::new(
            "f",
            ColumnVector::Factor(FactorVector {
                codes: vec![None; 4],
                levels: Vec::new(),
            }),
        ),
    ])
    .unwrap();
    for compression in [0, 70] {
        let (_dir, path) = scratch();
        write(&path, &table, compression).unwrap();
        let back = read(&path, Some(&["f"]), RowRange::new(1, 4)).unwrap();
        let ColumnVector::Factor(f) = &back.columns()[0].data else {
            panic!("factor column came back as another type");
        };
        assert_eq!(f.codes, vec![None; 3]);
        assert!(f.levels.is_empty());
    }
}

#[test]
fn test_invalid_row_ranges() {
    let (_dir, path) = scratch();
    write(&path, &three_columns(), 0).unwrap();
    for range in [RowRange::new(5, 6), RowRange::new(3, 3), RowRange::new(4, 2)] {
        let err = read(&path, None, range).unwrap_err();
        assert!(matches!(err, FstError::InvalidRowRange { .. }), "{range:?}");
        assert_eq!(err.category(), ErrorCategory::Usage);
    }
}

fn corrupt_at(path: &Path, pos: usize) {
    let mut bytes = fs::read(path).unwrap();
    bytes[pos] ^= 0x5A;
    fs::write(path, bytes).unwrap();
}

#[test]
fn test_damaged_headers_detected() {
    let table = three_columns().with_keys(vec![0]).unwrap();

    // file header body
    let (_dir, path) = scratch();
    write(&path, &table, 0).unwrap();
    corrupt_at(&path, 30);
    let err = read_metadata(&path).unwrap_err();
    assert!(matches!(err, FstError::DamagedHeader(_)), "got {err}");
    assert_eq!(err.category(), ErrorCategory::Format);

    // magic
    let (_dir, path) = scratch();
    write(&path, &table, 0).unwrap();
    corrupt_at(&path, 46);
    assert!(matches!(read_metadata(&path), Err(FstError::NotFst)));

    // key index sits right after the 48-byte file header
    let (_dir, path) = scratch();
    write(&path, &table, 0).unwrap();
    corrupt_at(&path, 50);
    assert!(matches!(read_metadata(&path), Err(FstError::DamagedHeader(_))));

    // chunkset header: 48 + 16 bytes of key index, then the hashed body
    let (_dir, path) = scratch();
    write(&path, &table, 0).unwrap();
    corrupt_at(&path, 64 + 70);
    assert!(matches!(read_metadata(&path), Err(FstError::DamagedHeader(_))));
}

#[test]
fn test_not_an_fst_file() {
    let (_dir, path) = scratch();
    fs::write(&path, b"id,name\n1,a\n2,b\n").unwrap();
    assert!(matches!(read_metadata(&path), Err(FstError::NotFst)));

    fs::write(&path, vec![7u8; 4096]).unwrap();
    assert!(matches!(read(&path, None, RowRange::all()), Err(FstError::NotFst)));
}

#[test]
fn test_missing_file_is_io_error() {
    let (_dir, path) = scratch();
    let err = read_metadata(path.with_extension("nope")).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Io);
}
