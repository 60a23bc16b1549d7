//! Table file serializer.
//!
//! # File layout
//! ```text
//! [FILE HEADER  48 bytes]                       hash over bytes 8..48
//! [KEY INDEX]                                   only when key_length > 0
//! [CHUNKSET HEADER  80 + 8 × cols, padded]      types, row count, offsets
//! [COLUMN NAMES  24-byte header + character stream]
//! [CHUNK INDEX  96 bytes]
//! [DATA CHUNK HEADER  24 + 8 × cols]            absolute column offsets
//! [COLUMN REGION 0] [COLUMN REGION 1] ...
//! ```
//! The file header is written last, so an interrupted write never leaves a
//! file that passes the magic check.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use fstore_core::format::{
    ChunkIndex, ChunksetHeader, ColumnNamesHeader, ColumnTypeEntry, DataChunkHeader, FileHeader, KeyIndex,
    CHUNKSET_HEADER_SIZE, CHUNK_INDEX_SIZE, COLUMN_NAMES_HEADER_SIZE, FILE_HEADER_SIZE, FORMAT_VERSION,
};
use fstore_core::{ColumnType, FstError, Result, StreamInfo};
use tracing::{debug, info_span};

use crate::column::{self, read_strings, write_strings, ReadContext, WriteContext};
use crate::config::StoreConfig;
use crate::metadata::{ColumnMetadata, TableMetadata};
use crate::table::{Column, ColumnAttribute, Table, TimeScale};

/// Half-open row range `start..end`; `end: None` reads to the last row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RowRange {
    pub start: u64,
    pub end: Option<u64>,
}

impl RowRange {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end: Some(end) }
    }

    pub fn starting_at(start: u64) -> Self {
        Self { start, end: None }
    }

    /// Concrete bounds for a table of `rows` rows. An end past the last row
    /// is clamped; an empty or out-of-table range is a usage error.
    pub fn resolve(&self, rows: u64) -> Result<(u64, u64)> {
        let end = self.end.unwrap_or(rows).min(rows);
        if self.start >= rows || end <= self.start {
            return Err(FstError::InvalidRowRange {
                start: self.start,
                end: self.end.unwrap_or(rows),
                rows,
            });
        }
        Ok((self.start, end))
    }
}

/// Streaming table writer: [`begin`](Self::begin), then
/// [`write_column`](Self::write_column) for every column in order, then
/// [`finish`](Self::finish).
pub struct TableWriter<W: Write + Seek> {
    out: W,
    ctx: WriteContext,
    key_length: u32,
    row_count: u64,
    chunkset_offset: u64,
    chunkset: ChunksetHeader,
    names: Vec<String>,
    chunk_index_offset: u64,
    data_chunk_offset: u64,
    column_offsets: Vec<u64>,
}

impl<W: Write + Seek> TableWriter<W> {
    /// Write everything up to the first column region. Headers whose
    /// contents depend on the column regions are written as placeholders.
    pub fn begin(mut out: W, table: &Table, compression: u32, config: &StoreConfig) -> Result<Self> {
        if compression > 100 {
            return Err(FstError::InvalidCompressionLevel(compression));
        }
        if table.columns().is_empty() || table.row_count() == 0 {
            return Err(FstError::NoData);
        }
        let ctx = WriteContext {
            compression,
            parallelism: config.parallelism(),
        };
        let col_count = table.columns().len();

        out.write_all(&[0u8; FILE_HEADER_SIZE])?;
        if !table.keys().is_empty() {
            let keys = KeyIndex {
                keys: table.keys().iter().map(|&k| k as i32).collect(),
            };
            out.write_all(&keys.to_bytes())?;
        }

        let chunkset_offset = out.stream_position()?;
        let chunkset_len = ChunksetHeader::encoded_len(col_count);
        out.write_all(&vec![0u8; chunkset_len])?;

        let col_names_offset = out.stream_position()?;
        out.write_all(
            &ColumnNamesHeader {
                version: FORMAT_VERSION,
                flags: 0,
            }
            .to_bytes(),
        )?;
        let names: Vec<String> = table.columns().iter().map(|c| c.name.clone()).collect();
        let name_values: Vec<Option<String>> = names.iter().cloned().map(Some).collect();
        write_strings(&mut out, &name_values, &ctx)?;

        let chunk_index_offset = out.stream_position()?;
        out.write_all(&[0u8; CHUNK_INDEX_SIZE])?;
        let data_chunk_offset = out.stream_position()?;
        out.write_all(&vec![0u8; DataChunkHeader::encoded_len(col_count)])?;

        let chunkset = ChunksetHeader {
            version: FORMAT_VERSION,
            flags: 0,
            col_names_offset,
            next_chunkset_offset: 0,
            chunk_index_offset,
            row_count: table.row_count() as u64,
            columns: table
                .columns()
                .iter()
                .map(|c| ColumnTypeEntry {
                    attribute: c.attribute.id(),
                    base_type: c.column_type().code(),
                    scale: c.scale.id(),
                })
                .collect(),
        };

        debug!(columns = col_count, rows = table.row_count(), compression, "began table write");
        Ok(Self {
            out,
            ctx,
            key_length: table.keys().len() as u32,
            row_count: table.row_count() as u64,
            chunkset_offset,
            chunkset,
            names,
            chunk_index_offset,
            data_chunk_offset,
            column_offsets: Vec::with_capacity(col_count),
        })
    }

    /// Append the region of the next column.
    pub fn write_column(&mut self, column: &Column) -> Result<()> {
        let index = self.column_offsets.len();
        let expected = self.chunkset.columns.get(index).ok_or_else(|| {
            FstError::InvalidTable(format!("column '{}' is beyond the declared columns", column.name))
        })?;
        if column.name != self.names[index]
            || column.column_type().code() != expected.base_type
            || column.data.len() as u64 != self.row_count
        {
            return Err(FstError::InvalidTable(format!(
                "column '{}' does not match the declared column {index}",
                column.name
            )));
        }

        let offset = self.out.stream_position()?;
        let _span = info_span!("write_column", name = %column.name).entered();
        column::write_column(&mut self.out, &column.data, column.annotation.as_deref(), &self.ctx)?;
        self.column_offsets.push(offset);
        Ok(())
    }

    /// Rewrite the placeholder headers with their final contents and return
    /// the underlying writer.
    pub fn finish(mut self) -> Result<W> {
        let col_count = self.chunkset.columns.len();
        if self.column_offsets.len() != col_count {
            return Err(FstError::InvalidTable(format!(
                "{} of {col_count} columns were written",
                self.column_offsets.len()
            )));
        }
        let end = self.out.stream_position()?;

        let data_chunk = DataChunkHeader {
            version: FORMAT_VERSION,
            flags: 0,
            column_offsets: self.column_offsets.clone(),
        };
        self.out.seek(SeekFrom::Start(self.data_chunk_offset))?;
        self.out.write_all(&data_chunk.to_bytes())?;

        self.out.seek(SeekFrom::Start(self.chunk_index_offset))?;
        self.out
            .write_all(&ChunkIndex::single(self.data_chunk_offset, self.row_count).to_bytes())?;

        self.out.seek(SeekFrom::Start(self.chunkset_offset))?;
        self.out.write_all(&self.chunkset.to_bytes())?;

        let header = FileHeader::new(col_count as u32, self.key_length, self.chunkset_offset);
        self.out.seek(SeekFrom::Start(0))?;
        self.out.write_all(&header.to_bytes())?;
        self.out.seek(SeekFrom::Start(end))?;
        self.out.flush()?;

        debug!(bytes = end, "finished table write");
        Ok(self.out)
    }
}

/// Random-access table reader. [`open`](Self::open) validates every header
/// before any column data is read.
pub struct TableReader<R: Read + Seek> {
    input: R,
    ctx: ReadContext,
    header: FileHeader,
    keys: Vec<usize>,
    chunkset: ChunksetHeader,
    names: Vec<String>,
    column_offsets: Vec<u64>,
}

impl<R: Read + Seek> TableReader<R> {
    pub fn open(mut input: R, config: &StoreConfig) -> Result<Self> {
        let ctx = ReadContext::new(config.parallelism());

        input.seek(SeekFrom::Start(0))?;
        let mut buf = [0u8; FILE_HEADER_SIZE];
        read_header_bytes(&mut input, &mut buf)?;
        let header = FileHeader::from_bytes(&buf)?;
        let col_count = header.column_count as usize;

        let mut keys = Vec::with_capacity(header.key_length as usize);
        if header.key_length > 0 {
            let mut raw = vec![0u8; KeyIndex::encoded_len(header.key_length as usize)];
            input.read_exact(&mut raw)?;
            for key in KeyIndex::from_bytes(&raw, header.key_length as usize)?.keys {
                if key < 0 || key as usize >= col_count {
                    return Err(FstError::DamagedHeader("key refers to a missing column"));
                }
                keys.push(key as usize);
            }
        }

        input.seek(SeekFrom::Start(header.chunkset_offset))?;
        let mut fixed = [0u8; CHUNKSET_HEADER_SIZE];
        input.read_exact(&mut fixed)?;
        if ChunksetHeader::peek_col_count(&fixed) != col_count {
            return Err(FstError::DamagedHeader("chunkset and file header disagree on column count"));
        }
        let mut raw = fixed.to_vec();
        raw.resize(ChunksetHeader::encoded_len(col_count), 0);
        input.read_exact(&mut raw[CHUNKSET_HEADER_SIZE..])?;
        let chunkset = ChunksetHeader::from_bytes(&raw)?;
        for entry in &chunkset.columns {
            let column_type = ColumnType::from_code(entry.base_type)?;
            match ColumnAttribute::from_id(entry.attribute) {
                Some(attribute) if attribute.column_type() == column_type => {}
                _ => return Err(FstError::DamagedHeader("column attribute does not match its type")),
            }
            if TimeScale::from_id(entry.scale).is_none() {
                return Err(FstError::DamagedHeader("unknown time scale"));
            }
        }
        if chunkset.row_count == 0 {
            return Err(FstError::DamagedHeader("chunkset has no rows"));
        }

        input.seek(SeekFrom::Start(chunkset.col_names_offset))?;
        let mut names_header = [0u8; COLUMN_NAMES_HEADER_SIZE];
        input.read_exact(&mut names_header)?;
        ColumnNamesHeader::from_bytes(&names_header)?;
        let names = read_strings(
            &mut input,
            chunkset.col_names_offset + COLUMN_NAMES_HEADER_SIZE as u64,
            col_count as u64,
            0,
            col_count,
            &ctx,
        )
        .map_err(|e| match e {
            FstError::Corrupt(_) => FstError::DamagedHeader("column names are damaged"),
            other => other,
        })?
        .into_iter()
        .map(|name| name.ok_or(FstError::DamagedHeader("column name is NA")))
        .collect::<Result<Vec<_>>>()?;

        input.seek(SeekFrom::Start(chunkset.chunk_index_offset))?;
        let mut index_buf = [0u8; CHUNK_INDEX_SIZE];
        input.read_exact(&mut index_buf)?;
        let chunk_index = ChunkIndex::from_bytes(&index_buf)?;
        if chunk_index.slot_count != 1 || chunk_index.chunk_rows[0] != chunkset.row_count {
            return Err(FstError::DamagedChunkIndex);
        }

        input.seek(SeekFrom::Start(chunk_index.chunk_offsets[0]))?;
        let mut chunk_buf = vec![0u8; DataChunkHeader::encoded_len(col_count)];
        input.read_exact(&mut chunk_buf)?;
        let data_chunk = DataChunkHeader::from_bytes(&chunk_buf, col_count)?;

        debug!(columns = col_count, rows = chunkset.row_count, "opened table");
        Ok(Self {
            input,
            ctx,
            header,
            keys,
            chunkset,
            names,
            column_offsets: data_chunk.column_offsets,
        })
    }

    pub fn row_count(&self) -> u64 {
        self.chunkset.row_count
    }

    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    pub fn keys(&self) -> &[usize] {
        &self.keys
    }

    pub fn column_type(&self, index: usize) -> Result<ColumnType> {
        let entry = self.entry(index)?;
        ColumnType::from_code(entry.base_type)
    }

    fn entry(&self, index: usize) -> Result<&ColumnTypeEntry> {
        self.chunkset
            .columns
            .get(index)
            .ok_or_else(|| FstError::ColumnNotFound(format!("#{index}")))
    }

    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.names
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| FstError::ColumnNotFound(name.to_string()))
    }

    /// Read rows `start..end` of column `index`.
    pub fn read_column(&mut self, index: usize, start: u64, end: u64) -> Result<Column> {
        let entry = *self.entry(index)?;
        let column_type = ColumnType::from_code(entry.base_type)?;
        if start >= end || end > self.row_count() {
            return Err(FstError::InvalidRowRange {
                start,
                end,
                rows: self.row_count(),
            });
        }
        let rows = self.row_count();
        let _span = info_span!("read_column", name = %self.names[index]).entered();
        let (data, annotation) = column::read_column(
            &mut self.input,
            self.column_offsets[index],
            column_type,
            rows,
            start,
            (end - start) as usize,
            &self.ctx,
        )?;
        Ok(Column {
            name: self.names[index].clone(),
            data,
            attribute: ColumnAttribute::from_id(entry.attribute).unwrap_or(ColumnAttribute::base(column_type)),
            scale: TimeScale::from_id(entry.scale).unwrap_or_default(),
            annotation,
        })
    }

    /// Block layout of the main stream of column `index`.
    pub fn column_stream_info(&mut self, index: usize) -> Result<Option<StreamInfo>> {
        let column_type = self.column_type(index)?;
        let rows = self.row_count();
        column::stream_info(
            &mut self.input,
            self.column_offsets[index],
            column_type,
            rows,
            &self.ctx,
        )
    }

    pub fn metadata(&mut self) -> Result<TableMetadata> {
        let mut columns = Vec::with_capacity(self.names.len());
        for index in 0..self.names.len() {
            let entry = *self.entry(index)?;
            let column_type = ColumnType::from_code(entry.base_type)?;
            let (prelude, _) = column::read_prelude(&mut self.input, self.column_offsets[index])?;
            columns.push(ColumnMetadata {
                name: self.names[index].clone(),
                column_type: column_type.name().to_string(),
                attribute: ColumnAttribute::from_id(entry.attribute).unwrap_or(ColumnAttribute::base(column_type)),
                scale: TimeScale::from_id(entry.scale).unwrap_or_default(),
                annotation: prelude.annotation,
            });
        }
        Ok(TableMetadata {
            format_version: self.header.version,
            row_count: self.row_count(),
            columns,
            keys: self.keys.iter().map(|&k| self.names[k].clone()).collect(),
        })
    }

    /// Read the selected columns (all when `None`) over `range`.
    pub fn read_table(&mut self, columns: Option<&[&str]>, range: RowRange) -> Result<Table> {
        let (start, end) = range.resolve(self.row_count())?;
        let selected: Vec<usize> = match columns {
            Some(names) => names
                .iter()
                .map(|name| self.column_index(name))
                .collect::<Result<_>>()?,
            None => (0..self.names.len()).collect(),
        };

        let mut result = Vec::with_capacity(selected.len());
        for &index in &selected {
            result.push(self.read_column(index, start, end)?);
        }

        // Longest prefix of the file keys that survived the selection.
        let keys: Vec<usize> = self
            .keys
            .iter()
            .map_while(|key| selected.iter().position(|s| s == key))
            .collect();
        Table::new(result)?.with_keys(keys)
    }
}

/// A short file is reported as "not an fstore file" rather than an I/O error.
fn read_header_bytes<R: Read>(input: &mut R, buf: &mut [u8; FILE_HEADER_SIZE]) -> Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        match input.read(&mut buf[filled..])? {
            0 => return Err(FstError::NotFst),
            n => filled += n,
        }
    }
    Ok(())
}

/// Path-based entry point carrying a [`StoreConfig`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FstStore {
    config: StoreConfig,
}

impl FstStore {
    pub fn new(config: StoreConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Write `table` to `path` at `compression` (0..=100), replacing any
    /// existing file.
    pub fn write(&self, path: impl AsRef<Path>, table: &Table, compression: u32) -> Result<()> {
        let path = path.as_ref();
        // Validate before touching the file system.
        if compression > 100 {
            return Err(FstError::InvalidCompressionLevel(compression));
        }
        if table.columns().is_empty() || table.row_count() == 0 {
            return Err(FstError::NoData);
        }
        let out = BufWriter::new(File::create(path)?);
        let mut writer = TableWriter::begin(out, table, compression, &self.config)?;
        for column in table.columns() {
            writer.write_column(column)?;
        }
        let out = writer.finish()?;
        out.into_inner().map_err(|e| FstError::Io(e.into_error()))?.sync_all()?;
        debug!(path = %path.display(), "wrote table");
        Ok(())
    }

    pub fn open(&self, path: impl AsRef<Path>) -> Result<TableReader<BufReader<File>>> {
        let file = File::open(path.as_ref())?;
        TableReader::open(BufReader::new(file), &self.config)
    }

    pub fn read_metadata(&self, path: impl AsRef<Path>) -> Result<TableMetadata> {
        self.open(path)?.metadata()
    }

    pub fn read(&self, path: impl AsRef<Path>, columns: Option<&[&str]>, range: RowRange) -> Result<Table> {
        self.open(path)?.read_table(columns, range)
    }
}

/// [`FstStore::write`] with the default configuration.
pub fn write(path: impl AsRef<Path>, table: &Table, compression: u32) -> Result<()> {
    FstStore::default().write(path, table, compression)
}

pub fn read_metadata(path: impl AsRef<Path>) -> Result<TableMetadata> {
    FstStore::default().read_metadata(path)
}

pub fn read(path: impl AsRef<Path>, columns: Option<&[&str]>, range: RowRange) -> Result<Table> {
    FstStore::default().read(path, columns, range)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use fstore_core::StreamLayout;

    use super::*;
    use crate::table::ColumnVector;

    fn small_table() -> Table {
        Table::new(vec![
            Column::new("id", ColumnVector::Int32((1..=6).map(Some).collect())),
            Column::new("flag", ColumnVector::Logical(vec![Some(true), None, Some(false), Some(true), None, Some(false)])),
        ])
        .unwrap()
        .with_keys(vec![0])
        .unwrap()
    }

    fn to_bytes(table: &Table, compression: u32) -> Vec<u8> {
        let config = StoreConfig::sequential();
        let mut writer = TableWriter::begin(Cursor::new(Vec::new()), table, compression, &config).unwrap();
        for column in table.columns() {
            writer.write_column(column).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_row_range_resolution() {
        assert_eq!(RowRange::all().resolve(10).unwrap(), (0, 10));
        assert_eq!(RowRange::new(2, 50).resolve(10).unwrap(), (2, 10));
        assert!(RowRange::new(10, 12).resolve(10).is_err());
        assert!(RowRange::new(4, 4).resolve(10).is_err());
        assert!(RowRange::new(5, 3).resolve(10).is_err());
    }

    #[test]
    fn test_finish_requires_every_column() {
        let table = small_table();
        let mut writer =
            TableWriter::begin(Cursor::new(Vec::new()), &table, 0, &StoreConfig::sequential()).unwrap();
        writer.write_column(&table.columns()[0]).unwrap();
        assert!(matches!(writer.finish(), Err(FstError::InvalidTable(_))));
    }

    #[test]
    fn test_columns_must_follow_declaration() {
        let table = small_table();
        let mut writer =
            TableWriter::begin(Cursor::new(Vec::new()), &table, 0, &StoreConfig::sequential()).unwrap();
        assert!(writer.write_column(&table.columns()[1]).is_err());
    }

    #[test]
    fn test_header_fields_on_disk() {
        let bytes = to_bytes(&small_table(), 0);
        let header = FileHeader::from_bytes(bytes[..FILE_HEADER_SIZE].try_into().unwrap()).unwrap();
        assert_eq!(header.column_count, 2);
        assert_eq!(header.key_length, 1);
        assert_eq!(header.chunkset_offset as usize, FILE_HEADER_SIZE + KeyIndex::encoded_len(1));
    }

    #[test]
    fn test_read_back_from_memory() {
        let table = small_table();
        let bytes = to_bytes(&table, 60);
        let mut reader = TableReader::open(Cursor::new(bytes), &StoreConfig::sequential()).unwrap();
        assert_eq!(reader.column_names(), &["id".to_string(), "flag".to_string()]);
        let back = reader.read_table(None, RowRange::all()).unwrap();
        assert_eq!(back, table);
    }

    #[test]
    fn test_single_column_reads_and_layout() {
        let bytes = to_bytes(&small_table(), 60);
        let mut reader = TableReader::open(Cursor::new(bytes), &StoreConfig::sequential()).unwrap();

        let id = reader.read_column(0, 2, 5).unwrap();
        assert_eq!(id.data, ColumnVector::Int32(vec![Some(3), Some(4), Some(5)]));
        assert!(matches!(reader.read_column(0, 4, 7), Err(FstError::InvalidRowRange { .. })));

        let info = reader.column_stream_info(0).unwrap().unwrap();
        assert!(matches!(info.layout, StreamLayout::Blocked { .. }));
        assert_eq!(info.blocks.len(), 2, "one block plus the closing index entry");
    }

    #[test]
    fn test_short_input_is_not_fst() {
        let result = TableReader::open(Cursor::new(vec![1u8, 2, 3]), &StoreConfig::sequential());
        assert!(matches!(result, Err(FstError::NotFst)));
    }

    #[test]
    fn test_keys_follow_selection() {
        let table = Table::new(vec![
            Column::new("a", ColumnVector::Int32(vec![Some(1), Some(2)])),
            Column::new("b", ColumnVector::Int32(vec![Some(3), Some(4)])),
            Column::new("c", ColumnVector::Byte(vec![5, 6])),
        ])
        .unwrap()
        .with_keys(vec![0, 1])
        .unwrap();
        let bytes = to_bytes(&table, 0);
        let mut reader = TableReader::open(Cursor::new(bytes), &StoreConfig::sequential()).unwrap();

        let picked = reader.read_table(Some(&["c", "b", "a"]), RowRange::all()).unwrap();
        assert_eq!(picked.keys(), &[2, 1]);
        let picked = reader.read_table(Some(&["b", "c"]), RowRange::all()).unwrap();
        assert!(picked.keys().is_empty());
        let picked = reader.read_table(Some(&["a", "c"]), RowRange::all()).unwrap();
        assert_eq!(picked.keys(), &[0]);
    }
}
