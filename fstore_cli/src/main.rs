use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use fstore_core::{CompAlgorithm, ErrorCategory, StreamLayout};
use fstore_table::{
    compress_bytes, decompress_bytes, ByteAlgorithm, Column, ColumnAttribute, ColumnVector, FactorVector, FstStore,
    RowRange, StoreConfig, Table, TimeScale,
};

// ── CLI definition ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "fstore",
    about = "Columnar table files: write, inspect, and randomly read fstore tables",
    version
)]
struct Cli {
    /// Worker threads per column (default: all cores)
    #[arg(short = 'j', long, global = true)]
    threads: Option<usize>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a synthetic table covering every column type
    Generate {
        /// Destination table file
        output: PathBuf,
        /// Number of rows
        #[arg(short, long, default_value_t = 1_000_000)]
        rows: u64,
        /// Compression level (0–100)
        #[arg(short, long, default_value_t = 50)]
        compression: u32,
        /// Fixed random seed for reproducibility
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
    /// Print table metadata and per-column stream statistics
    Inspect {
        /// Table file to inspect
        file: PathBuf,
        /// Print the block layout of every column
        #[arg(long)]
        blocks: bool,
        /// Print metadata as JSON instead of text
        #[arg(long, conflicts_with = "blocks")]
        json: bool,
    },
    /// Print a range of rows
    ///
    /// Only the blocks overlapping the requested rows are read from disk.
    Head {
        /// Table file
        file: PathBuf,
        /// First row to print (zero-based)
        #[arg(short, long, default_value_t = 0)]
        from: u64,
        /// Number of rows to print
        #[arg(short = 'n', long, default_value_t = 10)]
        rows: u64,
        /// Comma-separated column names (default: all)
        #[arg(short, long, value_delimiter = ',')]
        columns: Vec<String>,
    },
    /// Decode every column in full and report damage
    Verify {
        /// Table file
        file: PathBuf,
    },
    /// Benchmark random row-range reads
    Bench {
        /// Table file
        file: PathBuf,
        /// Number of random ranges to read
        #[arg(short, long, default_value_t = 1000)]
        count: u64,
        /// Rows per range
        #[arg(short, long, default_value_t = 100)]
        rows: u64,
        /// Fixed random seed for reproducibility
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
    /// Compress an arbitrary file into a self-describing buffer
    Compress {
        /// Source file ("-" reads stdin)
        input: PathBuf,
        /// Destination file
        output: PathBuf,
        #[arg(short, long, value_enum, default_value_t = AlgorithmArg::Zstd)]
        algorithm: AlgorithmArg,
        /// Compression level (0–100)
        #[arg(short, long, default_value_t = 50)]
        level: u32,
    },
    /// Restore a file written by `compress`
    Decompress {
        /// Source file
        input: PathBuf,
        /// Destination file ("-" writes to stdout)
        output: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum AlgorithmArg {
    Lz4,
    Zstd,
}

impl From<AlgorithmArg> for ByteAlgorithm {
    fn from(arg: AlgorithmArg) -> Self {
        match arg {
            AlgorithmArg::Lz4 => ByteAlgorithm::Lz4,
            AlgorithmArg::Zstd => ByteAlgorithm::Zstd,
        }
    }
}

// ── Helpers ────────────────────────────────────────────────────────────────

fn human_bytes(n: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut v = n as f64;
    let mut unit = 0;
    while v >= 1024.0 && unit < UNITS.len() - 1 {
        v /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", n)
    } else {
        format!("{:.2} {}", v, UNITS[unit])
    }
}

fn throughput(bytes: u64, secs: f64) -> String {
    format!("{}/s", human_bytes((bytes as f64 / secs.max(1e-9)) as u64))
}

/// Simple LCG for reproducible data and positions.
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

fn synthetic_table(rows: usize, seed: u64) -> anyhow::Result<Table> {
    const CITIES: [&str; 6] = ["Amsterdam", "Berlin", "Lisbon", "Oslo", "Prague", "Vienna"];
    let mut rng = Lcg(seed);
    let mut id = Vec::with_capacity(rows);
    let mut price = Vec::with_capacity(rows);
    let mut active = Vec::with_capacity(rows);
    let mut stamp = Vec::with_capacity(rows);
    let mut grade = Vec::with_capacity(rows);
    let mut note = Vec::with_capacity(rows);
    let mut city = Vec::with_capacity(rows);

    for i in 0..rows {
        let r = rng.next();
        id.push(Some(i as i32));
        price.push((r % 50 != 0).then(|| (r % 100_000) as f64 / 100.0));
        active.push((r % 31 != 0).then_some(r % 3 == 0));
        stamp.push(Some(1_600_000_000 + i as i64 * 60 + (r % 60) as i64));
        grade.push((r % 5) as u8);
        note.push((r % 7 != 0).then(|| format!("note-{}", r % 1000)));
        city.push((r % 23 != 0).then_some((r % CITIES.len() as u64) as u32));
    }

    let table = Table::new(vec![
        Column::new("id", ColumnVector::Int32(id)),
        Column::new("price", ColumnVector::Double(price)),
        Column::new("active", ColumnVector::Logical(active)),
        Column::new("stamp", ColumnVector::Int64(stamp))
            .with_attribute(ColumnAttribute::Int64TimeSeconds)
            .with_scale(TimeScale::Seconds)
            .with_annotation("UTC"),
        Column::new("grade", ColumnVector::Byte(grade)),
        Column::new("note", ColumnVector::Character(note)),
        Column::new(
            "city",
            ColumnVector::Factor(FactorVector {
                codes: city,
                levels: CITIES.iter().map(|c| c.to_string()).collect(),
            }),
        ),
    ])?
    .with_keys(vec![0])?;
    Ok(table)
}

fn cell(data: &ColumnVector, row: usize) -> String {
    fn show<T: ToString>(value: &Option<T>) -> String {
        value.as_ref().map_or_else(|| "NA".to_string(), T::to_string)
    }
    match data {
        ColumnVector::Int32(v) => show(&v[row]),
        ColumnVector::Double(v) => show(&v[row]),
        ColumnVector::Logical(v) => show(&v[row]),
        ColumnVector::Int64(v) => show(&v[row]),
        ColumnVector::Byte(v) => v[row].to_string(),
        ColumnVector::Character(v) => show(&v[row]),
        ColumnVector::Factor(f) => f.codes[row]
            .and_then(|code| f.levels.get(code as usize).cloned())
            .unwrap_or_else(|| "NA".to_string()),
    }
}

fn algorithm_summary(blocks: &[(u64, CompAlgorithm)]) -> String {
    let mut counts: Vec<(CompAlgorithm, usize)> = Vec::new();
    // the last entry marks the end of the stream
    for (_, algorithm) in &blocks[..blocks.len().saturating_sub(1)] {
        match counts.iter_mut().find(|(a, _)| a == algorithm) {
            Some((_, n)) => *n += 1,
            None => counts.push((*algorithm, 1)),
        }
    }
    counts
        .iter()
        .map(|(a, n)| format!("{}×{}", a.name(), n))
        .collect::<Vec<_>>()
        .join(", ")
}

// ── Subcommand implementations ─────────────────────────────────────────────

fn run_generate(store: &FstStore, output: &Path, rows: u64, compression: u32, seed: u64) -> anyhow::Result<()> {
    let rows = usize::try_from(rows).context("row count does not fit in memory")?;
    let table = synthetic_table(rows, seed)?;

    let t0 = Instant::now();
    store
        .write(output, &table, compression)
        .with_context(|| format!("writing table {:?}", output))?;
    let elapsed = t0.elapsed();

    // fixed width columns plus the character payload
    let chars: u64 = match table.column("note").map(|c| &c.data) {
        Some(ColumnVector::Character(v)) => v.iter().flatten().map(|s| s.len() as u64).sum(),
        _ => 0,
    };
    let raw = rows as u64 * (4 + 8 + 4 + 8 + 1 + 4) + chars;
    let on_disk = std::fs::metadata(output)?.len();

    eprintln!("  rows        : {}", rows);
    eprintln!("  columns     : {}", table.columns().len());
    eprintln!("  compression : {}", compression);
    eprintln!("  raw size    : {}", human_bytes(raw));
    eprintln!("  on disk     : {}", human_bytes(on_disk));
    eprintln!("  ratio       : {:.2}x", raw as f64 / on_disk as f64);
    eprintln!("  throughput  : {}", throughput(raw, elapsed.as_secs_f64()));
    eprintln!("  elapsed     : {:.3}s", elapsed.as_secs_f64());
    Ok(())
}

fn run_inspect(store: &FstStore, file: &Path, show_blocks: bool, json: bool) -> anyhow::Result<()> {
    let mut reader = store.open(file).with_context(|| format!("opening table {:?}", file))?;
    let metadata = reader.metadata()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&metadata)?);
        return Ok(());
    }

    let file_size = std::fs::metadata(file)?.len();
    println!("=== fstore table: {:?} ===", file);
    println!();
    println!("  format version : {}", metadata.format_version);
    println!("  rows           : {}", metadata.row_count);
    println!("  columns        : {}", metadata.columns.len());
    println!("  keys           : {}", metadata.keys.join(", "));
    println!("  file on disk   : {}", human_bytes(file_size));
    println!();
    println!("  {:>4}  {:<20}  {:<10}  {:<28}  {:<12}  {}", "#", "name", "type", "attribute", "scale", "annotation");
    println!("  {}", "-".repeat(92));
    for (i, column) in metadata.columns.iter().enumerate() {
        println!(
            "  {:>4}  {:<20}  {:<10}  {:<28}  {:<12}  {}",
            i,
            column.name,
            column.column_type,
            format!("{:?}", column.attribute),
            format!("{:?}", column.scale),
            column.annotation.as_deref().unwrap_or("")
        );
    }

    if show_blocks {
        println!();
        println!("  {:<20}  {:>8}  {:>12}  {:>12}  {}", "column", "blocks", "block rows", "max block", "algorithms");
        println!("  {}", "-".repeat(80));
        for (i, column) in metadata.columns.iter().enumerate() {
            let Some(info) = reader.column_stream_info(i)? else {
                println!("  {:<20}  {:>8}  {:>12}  {:>12}  all NA", column.name, 0, "-", "-");
                continue;
            };
            match info.layout {
                StreamLayout::Unblocked { algorithm } => {
                    println!("  {:<20}  {:>8}  {:>12}  {:>12}  {}", column.name, 1, "-", "-", algorithm.name());
                }
                StreamLayout::Blocked {
                    max_comp_size,
                    block_size_elements,
                } => {
                    println!(
                        "  {:<20}  {:>8}  {:>12}  {:>12}  {}",
                        column.name,
                        info.blocks.len().saturating_sub(1),
                        block_size_elements,
                        human_bytes(max_comp_size as u64),
                        algorithm_summary(&info.blocks)
                    );
                }
            }
        }
    }

    Ok(())
}

fn run_head(store: &FstStore, file: &Path, from: u64, rows: u64, columns: &[String]) -> anyhow::Result<()> {
    let names: Vec<&str> = columns.iter().map(String::as_str).collect();
    let selection = (!names.is_empty()).then_some(names.as_slice());

    let t0 = Instant::now();
    let table = store
        .read(file, selection, RowRange::new(from, from.saturating_add(rows)))
        .with_context(|| format!("reading rows {}..{} of {:?}", from, from.saturating_add(rows), file))?;
    debug!(elapsed_ms = t0.elapsed().as_secs_f64() * 1000.0, "read rows");

    let header: Vec<&str> = table.columns().iter().map(|c| c.name.as_str()).collect();
    println!("{:>10}  {}", "row", header.join("\t"));
    for row in 0..table.row_count() {
        let cells: Vec<String> = table.columns().iter().map(|c| cell(&c.data, row)).collect();
        println!("{:>10}  {}", from + row as u64, cells.join("\t"));
    }
    Ok(())
}

fn run_verify(store: &FstStore, file: &Path) -> anyhow::Result<()> {
    let mut reader = match store.open(file) {
        Ok(reader) => reader,
        Err(e) if e.category() == ErrorCategory::Format => {
            anyhow::bail!("{:?} failed header validation: {}", file, e)
        }
        Err(e) => return Err(e).with_context(|| format!("opening table {:?}", file)),
    };
    let rows = reader.row_count();
    let names = reader.column_names().to_vec();

    let t0 = Instant::now();
    let mut failures = 0;
    for (i, name) in names.iter().enumerate() {
        match reader.read_column(i, 0, rows) {
            Ok(_) => eprintln!("  ok      {}", name),
            Err(e) => {
                failures += 1;
                eprintln!("  FAILED  {} ({:?}): {}", name, e.category(), e);
            }
        }
    }
    eprintln!("  elapsed : {:.3}s", t0.elapsed().as_secs_f64());

    if failures > 0 {
        anyhow::bail!("{} of {} columns failed to decode", failures, names.len());
    }
    println!("{:?}: {} columns × {} rows verified", file, names.len(), rows);
    Ok(())
}

fn run_bench(store: &FstStore, file: &Path, count: u64, rows: u64, seed: u64) -> anyhow::Result<()> {
    let mut reader = store.open(file).with_context(|| format!("opening table {:?}", file))?;
    let total = reader.row_count();
    let rows = rows.clamp(1, total);
    let columns = reader.column_names().len();

    let mut rng = Lcg(seed);
    let starts: Vec<u64> = (0..count).map(|_| rng.next() % (total - rows + 1)).collect();

    eprintln!(
        "benchmarking {} random reads of {} rows across {} rows × {} columns...",
        count, rows, total, columns
    );

    let t0 = Instant::now();
    let mut latencies_us: Vec<u64> = Vec::with_capacity(count as usize);
    for &start in &starts {
        let t = Instant::now();
        for index in 0..columns {
            reader.read_column(index, start, start + rows)?;
        }
        latencies_us.push(t.elapsed().as_micros() as u64);
    }
    let elapsed = t0.elapsed();

    let Some(&max) = latencies_us.iter().max() else {
        anyhow::bail!("no reads requested");
    };
    latencies_us.sort_unstable();
    let pct = |p: f64| latencies_us[((latencies_us.len() as f64 * p) as usize).min(latencies_us.len() - 1)];

    println!();
    println!("=== Random Range Read Benchmark ===");
    println!("  ranges read : {}", count);
    println!("  rows read   : {}", count * rows);
    println!("  elapsed     : {:.3}s", elapsed.as_secs_f64());
    println!(
        "  rows/s      : {:.0}",
        (count * rows) as f64 / elapsed.as_secs_f64().max(1e-9)
    );
    println!("  latency:");
    println!("    min  : {} µs", latencies_us[0]);
    println!("    p50  : {} µs", pct(0.50));
    println!("    p95  : {} µs", pct(0.95));
    println!("    p99  : {} µs", pct(0.99));
    println!("    max  : {} µs", max);

    Ok(())
}

fn run_compress(
    config: &StoreConfig,
    input: &Path,
    output: &Path,
    algorithm: AlgorithmArg,
    level: u32,
) -> anyhow::Result<()> {
    let mut data = Vec::new();
    if input.to_str() == Some("-") {
        io::stdin().lock().read_to_end(&mut data)?;
    } else {
        File::open(input)
            .with_context(|| format!("opening input file {:?}", input))?
            .read_to_end(&mut data)?;
    }

    let t0 = Instant::now();
    let packed = compress_bytes(&data, algorithm.into(), level, config.parallelism())?;
    let elapsed = t0.elapsed();
    std::fs::write(output, &packed).with_context(|| format!("writing output file {:?}", output))?;

    eprintln!("  raw size    : {}", human_bytes(data.len() as u64));
    eprintln!("  compressed  : {}", human_bytes(packed.len() as u64));
    eprintln!("  ratio       : {:.2}x", data.len() as f64 / packed.len() as f64);
    eprintln!("  throughput  : {}", throughput(data.len() as u64, elapsed.as_secs_f64()));
    eprintln!("  elapsed     : {:.3}s", elapsed.as_secs_f64());
    Ok(())
}

fn run_decompress(config: &StoreConfig, input: &Path, output: &Path) -> anyhow::Result<()> {
    let packed = std::fs::read(input).with_context(|| format!("reading input file {:?}", input))?;

    let t0 = Instant::now();
    let data = decompress_bytes(&packed, config.parallelism())
        .with_context(|| format!("decoding {:?}", input))?;
    let elapsed = t0.elapsed();

    if output.to_str() == Some("-") {
        io::stdout().lock().write_all(&data)?;
    } else {
        std::fs::write(output, &data).with_context(|| format!("creating output file {:?}", output))?;
    }

    eprintln!("  raw size    : {}", human_bytes(data.len() as u64));
    eprintln!("  throughput  : {}", throughput(data.len() as u64, elapsed.as_secs_f64()));
    eprintln!("  elapsed     : {:.3}s", elapsed.as_secs_f64());
    Ok(())
}

// ── Entry point ────────────────────────────────────────────────────────────

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match cli.threads {
        Some(n) => StoreConfig::default().threads(n),
        None => StoreConfig::default(),
    };
    let store = FstStore::new(config);

    match cli.command {
        Commands::Generate {
            output,
            rows,
            compression,
            seed,
        } => run_generate(&store, &output, rows, compression, seed),
        Commands::Inspect { file, blocks, json } => run_inspect(&store, &file, blocks, json),
        Commands::Head {
            file,
            from,
            rows,
            columns,
        } => run_head(&store, &file, from, rows, &columns),
        Commands::Verify { file } => run_verify(&store, &file),
        Commands::Bench {
            file,
            count,
            rows,
            seed,
        } => run_bench(&store, &file, count, rows, seed),
        Commands::Compress {
            input,
            output,
            algorithm,
            level,
        } => run_compress(&config, &input, &output, algorithm, level),
        Commands::Decompress { input, output } => run_decompress(&config, &input, &output),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_human_bytes() {
        assert_eq!(human_bytes(512), "512 B");
        assert_eq!(human_bytes(1536), "1.50 KB");
        assert_eq!(human_bytes(3 * 1024 * 1024), "3.00 MB");
    }

    #[test]
    fn test_cells_render_na() {
        assert_eq!(cell(&ColumnVector::Int32(vec![None, Some(7)]), 0), "NA");
        assert_eq!(cell(&ColumnVector::Int32(vec![None, Some(7)]), 1), "7");
        let factor = ColumnVector::Factor(FactorVector {
            codes: vec![Some(1), None],
            levels: vec!["low".into(), "high".into()],
        });
        assert_eq!(cell(&factor, 0), "high");
        assert_eq!(cell(&factor, 1), "NA");
    }

    #[test]
    fn test_algorithm_summary_skips_end_marker() {
        let blocks = [
            (16, CompAlgorithm::Lz4Shuffle4),
            (80, CompAlgorithm::None),
            (200, CompAlgorithm::Lz4Shuffle4),
            (260, CompAlgorithm::None),
        ];
        assert_eq!(algorithm_summary(&blocks), "lz4+shuffle4×2, none×1");
    }

    #[test]
    fn test_generate_then_verify() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("synthetic.fst");
        let store = FstStore::new(StoreConfig::default().threads(2));
        run_generate(&store, &path, 5_000, 40, 7).unwrap();
        run_verify(&store, &path).unwrap();

        let table = store.read(&path, Some(&["city", "id"]), RowRange::new(10, 20)).unwrap();
        assert_eq!(table.row_count(), 10);
        assert_eq!(table.keys(), &[1]);
        assert_eq!(table, {
            let full = synthetic_table(5_000, 7).unwrap();
            Table::new(vec![
                Column {
                    data: full.columns()[6].data.slice(10..20),
                    ..full.columns()[6].clone()
                },
                Column {
                    data: full.columns()[0].data.slice(10..20),
                    ..full.columns()[0].clone()
                },
            ])
            .unwrap()
            .with_keys(vec![1])
            .unwrap()
        });
    }

    #[test]
    fn test_compress_round_trip_through_files() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.txt");
        let packed = dir.path().join("input.fstm");
        let restored = dir.path().join("restored.txt");
        let text: Vec<u8> = b"columnar tables compress well. ".repeat(2000);
        std::fs::write(&input, &text).unwrap();

        let config = StoreConfig::sequential();
        run_compress(&config, &input, &packed, AlgorithmArg::Lz4, 80).unwrap();
        run_decompress(&config, &packed, &restored).unwrap();
        assert_eq!(std::fs::read(&restored).unwrap(), text);
    }
}
