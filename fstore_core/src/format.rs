use xxhash_rust::xxh64::xxh64;

use crate::error::{FstError, Result};

/// Seed for every XXH64 hash stored in an fstore file.
pub const HASH_SEED: u64 = 912_824_571;

/// Format version written by this library and the highest one it reads.
pub const FORMAT_VERSION: u32 = 1;

/// Identifies an fstore table file ("FST1" in little-endian byte order).
pub const MAGIC_NUMBER: u32 = 0x3154_5346;

/// Fixed size of the file header in bytes.
///   hash:u64 + version:u32 + flags:u32 + reserved[8] + max_version:u32
///   + column_count:u32 + chunkset_offset:u64 + key_length:u32 + magic:u32
///   = 8 + 4 + 4 + 8 + 4 + 4 + 8 + 4 + 4 = 48
pub const FILE_HEADER_SIZE: usize = 48;

/// Fixed part of the chunkset header, before the per-column type arrays.
pub const CHUNKSET_HEADER_SIZE: usize = 80;

/// Column names block header: hash + version + flags + reserved[8].
pub const COLUMN_NAMES_HEADER_SIZE: usize = 24;

/// hash + version + flags + reserved[8] + slot_count:u16 + reserved[6]
/// + 4 chunk offsets + 4 chunk row counts = 96
pub const CHUNK_INDEX_SIZE: usize = 96;

/// Fixed part of the data chunk header, before the column offsets.
pub const DATA_CHUNK_HEADER_SIZE: usize = 24;

/// Number of chunk slots in a chunk index.
pub const CHUNK_SLOTS: usize = 4;

/// Size of the header in front of every block stream.
pub const BLOCK_STREAM_HEADER_SIZE: usize = 8;

/// Size of the meta word that replaces the index when blocking is off.
pub const STREAM_META_SIZE: usize = 8;

/// Size of one packed block index entry.
pub const INDEX_ENTRY_SIZE: usize = 8;

/// Size of the header in front of each character block.
pub const CHAR_BLOCK_HEADER_SIZE: usize = 16;

/// Size of the header in front of a factor column region.
pub const FACTOR_HEADER_SIZE: usize = 16;

/// Fixed part of a column prelude, before the annotation bytes.
pub const COLUMN_PRELUDE_SIZE: usize = 8;

/// Largest file offset a packed index entry can carry (48 bits).
pub const MAX_INDEX_OFFSET: u64 = (1 << 48) - 1;

// ── Flags ──────────────────────────────────────────────────────────────────

/// All multi-byte integers in the file are little-endian.
pub const FLAG_LITTLE_ENDIAN: u32 = 1 << 0;

/// Factor region flag: no levels, every value is NA, nothing else follows.
pub const FACTOR_FLAG_ALL_NA: u32 = 1 << 0;

/// Column prelude flag: an annotation string follows the prelude.
pub const PRELUDE_FLAG_ANNOTATION: u32 = 1 << 0;

pub fn hash64(bytes: &[u8]) -> u64 {
    xxh64(bytes, HASH_SEED)
}

/// Rounds `len` up to the next multiple of 8.
pub fn pad8(len: usize) -> usize {
    (len + 7) & !7
}

fn get_u16(buf: &[u8], pos: usize) -> u16 {
    let mut b = [0u8; 2];
    b.copy_from_slice(&buf[pos..pos + 2]);
    u16::from_le_bytes(b)
}

fn get_u32(buf: &[u8], pos: usize) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&buf[pos..pos + 4]);
    u32::from_le_bytes(b)
}

fn get_u64(buf: &[u8], pos: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&buf[pos..pos + 8]);
    u64::from_le_bytes(b)
}

fn put_u16(buf: &mut [u8], pos: usize, v: u16) {
    buf[pos..pos + 2].copy_from_slice(&v.to_le_bytes());
}

fn put_u32(buf: &mut [u8], pos: usize, v: u32) {
    buf[pos..pos + 4].copy_from_slice(&v.to_le_bytes());
}

fn put_u64(buf: &mut [u8], pos: usize, v: u64) {
    buf[pos..pos + 8].copy_from_slice(&v.to_le_bytes());
}

/// Writes the hash of `buf[8..]` into `buf[0..8]`.
fn seal(buf: &mut [u8]) {
    let h = hash64(&buf[8..]);
    put_u64(buf, 0, h);
}

fn is_sealed(buf: &[u8]) -> bool {
    get_u64(buf, 0) == hash64(&buf[8..])
}

// ── Compression algorithms ─────────────────────────────────────────────────

/// Concrete block transforms. The discriminants are stored on disk and are
/// append-only.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompAlgorithm {
    None = 0,
    Lz4 = 1,
    Zstd = 2,
    Lz4Shuffle4 = 3,
    ZstdShuffle4 = 4,
    Lz4Shuffle8 = 5,
    ZstdShuffle8 = 6,
    Lz4Logical64 = 7,
    Logical64 = 8,
    ZstdLogical64 = 9,
    Lz4IntToByte = 10,
    Lz4IntToShortShuffle2 = 11,
    IntToByte = 12,
    IntToShort = 13,
    ZstdIntToByte = 14,
    ZstdIntToShortShuffle2 = 15,
}

/// Output size of a fixed-ratio algorithm per repetition unit: every
/// `src_unit` input bytes become exactly `dst_unit` output bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedRatio {
    pub src_unit: usize,
    pub dst_unit: usize,
}

impl FixedRatio {
    /// Compressed size of `src_len` input bytes. A trailing partial unit
    /// still occupies a full output unit.
    pub fn compressed_len(&self, src_len: usize) -> usize {
        src_len.div_ceil(self.src_unit) * self.dst_unit
    }
}

impl CompAlgorithm {
    pub const ALL: [CompAlgorithm; 16] = [
        CompAlgorithm::None,
        CompAlgorithm::Lz4,
        CompAlgorithm::Zstd,
        CompAlgorithm::Lz4Shuffle4,
        CompAlgorithm::ZstdShuffle4,
        CompAlgorithm::Lz4Shuffle8,
        CompAlgorithm::ZstdShuffle8,
        CompAlgorithm::Lz4Logical64,
        CompAlgorithm::Logical64,
        CompAlgorithm::ZstdLogical64,
        CompAlgorithm::Lz4IntToByte,
        CompAlgorithm::Lz4IntToShortShuffle2,
        CompAlgorithm::IntToByte,
        CompAlgorithm::IntToShort,
        CompAlgorithm::ZstdIntToByte,
        CompAlgorithm::ZstdIntToShortShuffle2,
    ];

    pub fn id(self) -> u16 {
        self as u16
    }

    pub fn from_id(id: u16) -> Result<Self> {
        Self::ALL
            .get(id as usize)
            .copied()
            .ok_or(FstError::UnknownAlgorithm(id))
    }

    pub fn name(self) -> &'static str {
        match self {
            CompAlgorithm::None => "none",
            CompAlgorithm::Lz4 => "lz4",
            CompAlgorithm::Zstd => "zstd",
            CompAlgorithm::Lz4Shuffle4 => "lz4+shuffle4",
            CompAlgorithm::ZstdShuffle4 => "zstd+shuffle4",
            CompAlgorithm::Lz4Shuffle8 => "lz4+shuffle8",
            CompAlgorithm::ZstdShuffle8 => "zstd+shuffle8",
            CompAlgorithm::Lz4Logical64 => "lz4+logical64",
            CompAlgorithm::Logical64 => "logical64",
            CompAlgorithm::ZstdLogical64 => "zstd+logical64",
            CompAlgorithm::Lz4IntToByte => "lz4+int2byte",
            CompAlgorithm::Lz4IntToShortShuffle2 => "lz4+int2short+shuffle2",
            CompAlgorithm::IntToByte => "int2byte",
            CompAlgorithm::IntToShort => "int2short",
            CompAlgorithm::ZstdIntToByte => "zstd+int2byte",
            CompAlgorithm::ZstdIntToShortShuffle2 => "zstd+int2short+shuffle2",
        }
    }

    /// `Some` for algorithms whose output size depends on the input size only.
    pub fn fixed_ratio(self) -> Option<FixedRatio> {
        match self {
            CompAlgorithm::Logical64 => Some(FixedRatio { src_unit: 128, dst_unit: 8 }),
            CompAlgorithm::IntToByte => Some(FixedRatio { src_unit: 4, dst_unit: 1 }),
            CompAlgorithm::IntToShort => Some(FixedRatio { src_unit: 4, dst_unit: 2 }),
            _ => None,
        }
    }
}

// ── Column types ───────────────────────────────────────────────────────────

/// Base type of a stored column. Codes are persisted and append-only.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Character = 6,
    Factor = 7,
    Int32 = 8,
    Double64 = 9,
    Bool2 = 10,
    Int64 = 11,
    Byte = 12,
}

impl ColumnType {
    pub fn code(self) -> u16 {
        self as u16
    }

    pub fn from_code(code: u16) -> Result<Self> {
        Ok(match code {
            6 => ColumnType::Character,
            7 => ColumnType::Factor,
            8 => ColumnType::Int32,
            9 => ColumnType::Double64,
            10 => ColumnType::Bool2,
            11 => ColumnType::Int64,
            12 => ColumnType::Byte,
            other => return Err(FstError::UnknownColumnType(other)),
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            ColumnType::Character => "character",
            ColumnType::Factor => "factor",
            ColumnType::Int32 => "int32",
            ColumnType::Double64 => "double",
            ColumnType::Bool2 => "logical",
            ColumnType::Int64 => "int64",
            ColumnType::Byte => "byte",
        }
    }
}

// ── File header ────────────────────────────────────────────────────────────

/// Decoded representation of the 48-byte file header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub version: u32,
    pub flags: u32,
    /// Highest format version the writer understood.
    pub max_version: u32,
    pub column_count: u32,
    pub chunkset_offset: u64,
    pub key_length: u32,
}

impl FileHeader {
    pub fn new(column_count: u32, key_length: u32, chunkset_offset: u64) -> Self {
        Self {
            version: FORMAT_VERSION,
            flags: FLAG_LITTLE_ENDIAN,
            max_version: FORMAT_VERSION,
            column_count,
            chunkset_offset,
            key_length,
        }
    }

    /// Serialize to exactly `FILE_HEADER_SIZE` bytes, hash included.
    pub fn to_bytes(&self) -> [u8; FILE_HEADER_SIZE] {
        let mut buf = [0u8; FILE_HEADER_SIZE];
        put_u32(&mut buf, 8, self.version);
        put_u32(&mut buf, 12, self.flags);
        // buf[16..24] reserved
        put_u32(&mut buf, 24, self.max_version);
        put_u32(&mut buf, 28, self.column_count);
        put_u64(&mut buf, 32, self.chunkset_offset);
        put_u32(&mut buf, 40, self.key_length);
        put_u32(&mut buf, 44, MAGIC_NUMBER);
        seal(&mut buf);
        buf
    }

    /// Deserialize and validate: magic, hash, byte order, then version.
    pub fn from_bytes(buf: &[u8; FILE_HEADER_SIZE]) -> Result<Self> {
        if get_u32(buf, 44) != MAGIC_NUMBER {
            return Err(FstError::NotFst);
        }
        if !is_sealed(buf) {
            return Err(FstError::DamagedHeader("file header hash mismatch"));
        }
        let header = Self {
            version: get_u32(buf, 8),
            flags: get_u32(buf, 12),
            max_version: get_u32(buf, 24),
            column_count: get_u32(buf, 28),
            chunkset_offset: get_u64(buf, 32),
            key_length: get_u32(buf, 40),
        };
        if header.flags & FLAG_LITTLE_ENDIAN == 0 {
            return Err(FstError::ByteOrder);
        }
        if header.version > FORMAT_VERSION {
            return Err(FstError::FutureVersion {
                found: header.version,
                supported: FORMAT_VERSION,
            });
        }
        Ok(header)
    }
}

// ── Key index ──────────────────────────────────────────────────────────────

/// Key column positions, present only when the table has sort keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyIndex {
    pub keys: Vec<i32>,
}

impl KeyIndex {
    pub fn encoded_len(key_length: usize) -> usize {
        pad8(8 + 4 * key_length)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; Self::encoded_len(self.keys.len())];
        for (i, key) in self.keys.iter().enumerate() {
            buf[8 + 4 * i..12 + 4 * i].copy_from_slice(&key.to_le_bytes());
        }
        seal(&mut buf);
        buf
    }

    pub fn from_bytes(buf: &[u8], key_length: usize) -> Result<Self> {
        if buf.len() != Self::encoded_len(key_length) || !is_sealed(buf) {
            return Err(FstError::DamagedHeader("key index hash mismatch"));
        }
        let keys = (0..key_length)
            .map(|i| get_u32(buf, 8 + 4 * i) as i32)
            .collect();
        Ok(Self { keys })
    }
}

// ── Chunkset header ────────────────────────────────────────────────────────

/// Per-column type information stored in the chunkset header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnTypeEntry {
    pub attribute: u16,
    pub base_type: u16,
    pub scale: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunksetHeader {
    pub version: u32,
    pub flags: u32,
    pub col_names_offset: u64,
    pub next_chunkset_offset: u64,
    pub chunk_index_offset: u64,
    pub row_count: u64,
    pub columns: Vec<ColumnTypeEntry>,
}

impl ChunksetHeader {
    pub fn encoded_len(col_count: usize) -> usize {
        pad8(CHUNKSET_HEADER_SIZE + 8 * col_count)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let n = self.columns.len();
        let mut buf = vec![0u8; Self::encoded_len(n)];
        put_u32(&mut buf, 8, self.version);
        put_u32(&mut buf, 12, self.flags);
        // buf[16..32] reserved
        put_u64(&mut buf, 32, self.col_names_offset);
        put_u64(&mut buf, 40, self.next_chunkset_offset);
        put_u64(&mut buf, 48, self.chunk_index_offset);
        // buf[56..64] reserved offset
        put_u64(&mut buf, 64, self.row_count);
        put_u32(&mut buf, 72, n as u32);
        // buf[76..80] reserved

        let base = CHUNKSET_HEADER_SIZE;
        for (i, col) in self.columns.iter().enumerate() {
            put_u16(&mut buf, base + 2 * i, col.attribute);
            put_u16(&mut buf, base + 2 * (n + i), col.base_type);
            put_u16(&mut buf, base + 2 * (2 * n + i), col.base_type);
            put_u16(&mut buf, base + 2 * (3 * n + i), col.scale);
        }
        seal(&mut buf);
        buf
    }

    /// Column count stored in the fixed part, needed to size the full read.
    pub fn peek_col_count(fixed: &[u8; CHUNKSET_HEADER_SIZE]) -> usize {
        get_u32(fixed, 72) as usize
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < CHUNKSET_HEADER_SIZE {
            return Err(FstError::DamagedHeader("chunkset header truncated"));
        }
        let n = get_u32(buf, 72) as usize;
        if buf.len() != Self::encoded_len(n) || !is_sealed(buf) {
            return Err(FstError::DamagedHeader("chunkset header hash mismatch"));
        }
        let base = CHUNKSET_HEADER_SIZE;
        let mut columns = Vec::with_capacity(n);
        for i in 0..n {
            let base_type = get_u16(buf, base + 2 * (n + i));
            if get_u16(buf, base + 2 * (2 * n + i)) != base_type {
                return Err(FstError::DamagedHeader("chunkset base type arrays disagree"));
            }
            columns.push(ColumnTypeEntry {
                attribute: get_u16(buf, base + 2 * i),
                base_type,
                scale: get_u16(buf, base + 2 * (3 * n + i)),
            });
        }
        Ok(Self {
            version: get_u32(buf, 8),
            flags: get_u32(buf, 12),
            col_names_offset: get_u64(buf, 32),
            next_chunkset_offset: get_u64(buf, 40),
            chunk_index_offset: get_u64(buf, 48),
            row_count: get_u64(buf, 64),
            columns,
        })
    }
}

// ── Column names header ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnNamesHeader {
    pub version: u32,
    pub flags: u32,
}

impl ColumnNamesHeader {
    pub fn to_bytes(&self) -> [u8; COLUMN_NAMES_HEADER_SIZE] {
        let mut buf = [0u8; COLUMN_NAMES_HEADER_SIZE];
        put_u32(&mut buf, 8, self.version);
        put_u32(&mut buf, 12, self.flags);
        seal(&mut buf);
        buf
    }

    pub fn from_bytes(buf: &[u8; COLUMN_NAMES_HEADER_SIZE]) -> Result<Self> {
        if !is_sealed(buf) {
            return Err(FstError::DamagedHeader("column names header hash mismatch"));
        }
        Ok(Self {
            version: get_u32(buf, 8),
            flags: get_u32(buf, 12),
        })
    }
}

// ── Chunk index ────────────────────────────────────────────────────────────

/// Locates the data chunks of a chunkset. Tables written by this library use
/// a single slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkIndex {
    pub version: u32,
    pub flags: u32,
    pub slot_count: u16,
    pub chunk_offsets: [u64; CHUNK_SLOTS],
    pub chunk_rows: [u64; CHUNK_SLOTS],
}

impl ChunkIndex {
    pub fn single(chunk_offset: u64, rows: u64) -> Self {
        let mut chunk_offsets = [0u64; CHUNK_SLOTS];
        let mut chunk_rows = [0u64; CHUNK_SLOTS];
        chunk_offsets[0] = chunk_offset;
        chunk_rows[0] = rows;
        Self {
            version: FORMAT_VERSION,
            flags: 0,
            slot_count: 1,
            chunk_offsets,
            chunk_rows,
        }
    }

    pub fn to_bytes(&self) -> [u8; CHUNK_INDEX_SIZE] {
        let mut buf = [0u8; CHUNK_INDEX_SIZE];
        put_u32(&mut buf, 8, self.version);
        put_u32(&mut buf, 12, self.flags);
        put_u16(&mut buf, 24, self.slot_count);
        for i in 0..CHUNK_SLOTS {
            put_u64(&mut buf, 32 + 8 * i, self.chunk_offsets[i]);
            put_u64(&mut buf, 64 + 8 * i, self.chunk_rows[i]);
        }
        seal(&mut buf);
        buf
    }

    pub fn from_bytes(buf: &[u8; CHUNK_INDEX_SIZE]) -> Result<Self> {
        if !is_sealed(buf) {
            return Err(FstError::DamagedChunkIndex);
        }
        let slot_count = get_u16(buf, 24);
        if slot_count == 0 || slot_count as usize > CHUNK_SLOTS {
            return Err(FstError::DamagedChunkIndex);
        }
        let mut chunk_offsets = [0u64; CHUNK_SLOTS];
        let mut chunk_rows = [0u64; CHUNK_SLOTS];
        for i in 0..CHUNK_SLOTS {
            chunk_offsets[i] = get_u64(buf, 32 + 8 * i);
            chunk_rows[i] = get_u64(buf, 64 + 8 * i);
        }
        Ok(Self {
            version: get_u32(buf, 8),
            flags: get_u32(buf, 12),
            slot_count,
            chunk_offsets,
            chunk_rows,
        })
    }
}

/// Absolute file position of every column region in one data chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataChunkHeader {
    pub version: u32,
    pub flags: u32,
    pub column_offsets: Vec<u64>,
}

impl DataChunkHeader {
    pub fn encoded_len(col_count: usize) -> usize {
        DATA_CHUNK_HEADER_SIZE + 8 * col_count
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; Self::encoded_len(self.column_offsets.len())];
        put_u32(&mut buf, 8, self.version);
        put_u32(&mut buf, 12, self.flags);
        for (i, offset) in self.column_offsets.iter().enumerate() {
            put_u64(&mut buf, DATA_CHUNK_HEADER_SIZE + 8 * i, *offset);
        }
        seal(&mut buf);
        buf
    }

    pub fn from_bytes(buf: &[u8], col_count: usize) -> Result<Self> {
        if buf.len() != Self::encoded_len(col_count) || !is_sealed(buf) {
            return Err(FstError::DamagedChunkIndex);
        }
        Ok(Self {
            version: get_u32(buf, 8),
            flags: get_u32(buf, 12),
            column_offsets: (0..col_count)
                .map(|i| get_u64(buf, DATA_CHUNK_HEADER_SIZE + 8 * i))
                .collect(),
        })
    }
}

// ── Block streams ──────────────────────────────────────────────────────────

/// The 8 bytes in front of every block stream.
///
/// `block_size_elements == 0` means the stream is not blocked: a
/// meta word (see [`stream_meta_to_bytes`]) follows instead of a block index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockStreamHeader {
    pub max_comp_size: u32,
    pub block_size_elements: u32,
}

impl BlockStreamHeader {
    pub fn to_bytes(&self) -> [u8; BLOCK_STREAM_HEADER_SIZE] {
        let mut buf = [0u8; BLOCK_STREAM_HEADER_SIZE];
        put_u32(&mut buf, 0, self.max_comp_size);
        put_u32(&mut buf, 4, self.block_size_elements);
        buf
    }

    pub fn from_bytes(buf: &[u8; BLOCK_STREAM_HEADER_SIZE]) -> Self {
        Self {
            max_comp_size: get_u32(buf, 0),
            block_size_elements: get_u32(buf, 4),
        }
    }
}

/// Algorithm of an unblocked stream: `None` for raw data, otherwise a
/// fixed-ratio algorithm.
pub fn stream_meta_to_bytes(algorithm: CompAlgorithm) -> [u8; STREAM_META_SIZE] {
    let mut buf = [0u8; STREAM_META_SIZE];
    put_u32(&mut buf, 4, algorithm.id() as u32);
    buf
}

pub fn stream_meta_from_bytes(buf: &[u8; STREAM_META_SIZE]) -> Result<CompAlgorithm> {
    if get_u32(buf, 0) != 0 {
        return Err(FstError::corrupt("stream meta word has a nonzero length field"));
    }
    let id = get_u32(buf, 4);
    if id > u16::MAX as u32 {
        return Err(FstError::UnknownAlgorithm(u16::MAX));
    }
    CompAlgorithm::from_id(id as u16)
}

/// Packs a block offset and its algorithm into one index word: algorithm in
/// the high 16 bits, offset in the low 48.
pub fn pack_index_entry(offset: u64, algorithm: CompAlgorithm) -> Result<u64> {
    if offset > MAX_INDEX_OFFSET {
        return Err(FstError::corrupt(format!(
            "block offset {offset} does not fit in 48 bits"
        )));
    }
    Ok(((algorithm.id() as u64) << 48) | offset)
}

pub fn unpack_index_entry(word: u64) -> Result<(u64, CompAlgorithm)> {
    let algorithm = CompAlgorithm::from_id((word >> 48) as u16)?;
    Ok((word & MAX_INDEX_OFFSET, algorithm))
}

// ── Column regions ─────────────────────────────────────────────────────────

/// Leads every column region; carries the optional annotation string
/// (a timezone, for example).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ColumnPrelude {
    pub annotation: Option<String>,
}

impl ColumnPrelude {
    pub fn to_bytes(&self) -> Vec<u8> {
        let text = self.annotation.as_deref().unwrap_or("");
        let mut buf = vec![0u8; pad8(COLUMN_PRELUDE_SIZE + text.len())];
        put_u32(&mut buf, 0, text.len() as u32);
        if self.annotation.is_some() {
            put_u32(&mut buf, 4, PRELUDE_FLAG_ANNOTATION);
        }
        buf[COLUMN_PRELUDE_SIZE..COLUMN_PRELUDE_SIZE + text.len()].copy_from_slice(text.as_bytes());
        buf
    }

    /// Returns `(annotation_len, flags)` from the fixed part.
    pub fn parse_fixed(buf: &[u8; COLUMN_PRELUDE_SIZE]) -> (usize, u32) {
        (get_u32(buf, 0) as usize, get_u32(buf, 4))
    }

    /// Bytes that follow the fixed part for an annotation of `len` bytes.
    pub fn tail_len(annotation_len: usize) -> usize {
        pad8(COLUMN_PRELUDE_SIZE + annotation_len) - COLUMN_PRELUDE_SIZE
    }

    pub fn from_parts(flags: u32, tail: &[u8], annotation_len: usize) -> Result<Self> {
        if flags & PRELUDE_FLAG_ANNOTATION == 0 {
            return Ok(Self { annotation: None });
        }
        let bytes = tail
            .get(..annotation_len)
            .ok_or_else(|| FstError::corrupt("column annotation is longer than its region"))?;
        let text = std::str::from_utf8(bytes)
            .map_err(|_| FstError::corrupt("column annotation is not valid UTF-8"))?;
        Ok(Self {
            annotation: Some(text.to_string()),
        })
    }
}

/// Header in front of each block of a character stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharBlockHeader {
    /// Compressed size of the lengths payload.
    pub lengths_size: u32,
    pub lengths_algorithm: CompAlgorithm,
    pub chars_algorithm: CompAlgorithm,
    /// Uncompressed size of the character payload.
    pub chars_size: u32,
    pub has_na: bool,
}

impl CharBlockHeader {
    pub fn to_bytes(&self) -> [u8; CHAR_BLOCK_HEADER_SIZE] {
        let mut buf = [0u8; CHAR_BLOCK_HEADER_SIZE];
        put_u32(&mut buf, 0, self.lengths_size);
        put_u16(&mut buf, 4, self.lengths_algorithm.id());
        put_u16(&mut buf, 6, self.chars_algorithm.id());
        put_u32(&mut buf, 8, self.chars_size);
        put_u16(&mut buf, 12, self.has_na as u16);
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < CHAR_BLOCK_HEADER_SIZE {
            return Err(FstError::corrupt("character block shorter than its header"));
        }
        Ok(Self {
            lengths_size: get_u32(buf, 0),
            lengths_algorithm: CompAlgorithm::from_id(get_u16(buf, 4))?,
            chars_algorithm: CompAlgorithm::from_id(get_u16(buf, 6))?,
            chars_size: get_u32(buf, 8),
            has_na: get_u16(buf, 12) != 0,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FactorHeader {
    pub level_count: u32,
    pub flags: u32,
    /// Absolute position of the codes block stream, 0 when all NA.
    pub codes_offset: u64,
}

impl FactorHeader {
    pub fn to_bytes(&self) -> [u8; FACTOR_HEADER_SIZE] {
        let mut buf = [0u8; FACTOR_HEADER_SIZE];
        put_u32(&mut buf, 0, self.level_count);
        put_u32(&mut buf, 4, self.flags);
        put_u64(&mut buf, 8, self.codes_offset);
        buf
    }

    pub fn from_bytes(buf: &[u8; FACTOR_HEADER_SIZE]) -> Self {
        Self {
            level_count: get_u32(buf, 0),
            flags: get_u32(buf, 4),
            codes_offset: get_u64(buf, 8),
        }
    }

    pub fn all_na(&self) -> bool {
        self.flags & FACTOR_FLAG_ALL_NA != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_header_layout() {
        let header = FileHeader::new(3, 1, 56);
        let bytes = header.to_bytes();
        assert_eq!(&bytes[8..12], &1u32.to_le_bytes());
        assert_eq!(&bytes[12..16], &FLAG_LITTLE_ENDIAN.to_le_bytes());
        assert_eq!(&bytes[16..24], &[0u8; 8]);
        assert_eq!(&bytes[28..32], &3u32.to_le_bytes());
        assert_eq!(&bytes[32..40], &56u64.to_le_bytes());
        assert_eq!(&bytes[40..44], &1u32.to_le_bytes());
        assert_eq!(&bytes[44..48], b"FST1");
        assert_eq!(&bytes[0..8], &hash64(&bytes[8..]).to_le_bytes());
        assert_eq!(FileHeader::from_bytes(&bytes).unwrap(), header);
    }

    #[test]
    fn test_file_header_rejects_damage() {
        let mut bytes = FileHeader::new(2, 0, 48).to_bytes();
        bytes[30] ^= 0xff;
        assert!(matches!(
            FileHeader::from_bytes(&bytes),
            Err(FstError::DamagedHeader(_))
        ));

        let mut foreign = [0u8; FILE_HEADER_SIZE];
        foreign[..5].copy_from_slice(b"hello");
        assert!(matches!(FileHeader::from_bytes(&foreign), Err(FstError::NotFst)));
    }

    #[test]
    fn test_file_header_rejects_future_version() {
        let mut header = FileHeader::new(1, 0, 48);
        header.version = FORMAT_VERSION + 1;
        let bytes = header.to_bytes();
        assert!(matches!(
            FileHeader::from_bytes(&bytes),
            Err(FstError::FutureVersion { found, .. }) if found == FORMAT_VERSION + 1
        ));
    }

    #[test]
    fn test_index_entry_packing() {
        let word = pack_index_entry(0x0000_1234_5678_9abc, CompAlgorithm::ZstdShuffle8).unwrap();
        assert_eq!(word >> 48, 6);
        assert_eq!(word & MAX_INDEX_OFFSET, 0x1234_5678_9abc);
        assert_eq!(
            unpack_index_entry(word).unwrap(),
            (0x1234_5678_9abc, CompAlgorithm::ZstdShuffle8)
        );
        assert!(pack_index_entry(1 << 48, CompAlgorithm::None).is_err());
        assert!(matches!(
            unpack_index_entry(99u64 << 48),
            Err(FstError::UnknownAlgorithm(99))
        ));
    }

    #[test]
    fn test_algorithm_ids_are_stable() {
        for (i, algo) in CompAlgorithm::ALL.iter().enumerate() {
            assert_eq!(algo.id() as usize, i);
            assert_eq!(CompAlgorithm::from_id(i as u16).unwrap(), *algo);
        }
        assert_eq!(CompAlgorithm::IntToShort.id(), 13);
        assert!(CompAlgorithm::from_id(16).is_err());
    }

    #[test]
    fn test_fixed_ratio_sizes() {
        let logical = CompAlgorithm::Logical64.fixed_ratio().unwrap();
        assert_eq!(logical.compressed_len(128), 8);
        assert_eq!(logical.compressed_len(132), 16);
        assert_eq!(CompAlgorithm::IntToShort.fixed_ratio().unwrap().compressed_len(40), 20);
        assert!(CompAlgorithm::Lz4IntToByte.fixed_ratio().is_none());
    }

    #[test]
    fn test_chunkset_header_arrays() {
        let header = ChunksetHeader {
            version: FORMAT_VERSION,
            flags: 0,
            col_names_offset: 200,
            next_chunkset_offset: 0,
            chunk_index_offset: 300,
            row_count: 10,
            columns: vec![
                ColumnTypeEntry { attribute: 4, base_type: 8, scale: 0 },
                ColumnTypeEntry { attribute: 1, base_type: 6, scale: 0 },
                ColumnTypeEntry { attribute: 11, base_type: 9, scale: 4 },
            ],
        };
        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), 104);
        // attribute array, then base type, base type again, scale
        assert_eq!(&bytes[80..86], &[4, 0, 1, 0, 11, 0]);
        assert_eq!(&bytes[86..92], &[8, 0, 6, 0, 9, 0]);
        assert_eq!(&bytes[92..98], &[8, 0, 6, 0, 9, 0]);
        assert_eq!(&bytes[98..104], &[0, 0, 0, 0, 4, 0]);
        assert_eq!(ChunksetHeader::from_bytes(&bytes).unwrap(), header);
    }

    #[test]
    fn test_chunk_index_layout() {
        let index = ChunkIndex::single(4096, 10_000);
        let bytes = index.to_bytes();
        assert_eq!(&bytes[24..26], &1u16.to_le_bytes());
        assert_eq!(&bytes[32..40], &4096u64.to_le_bytes());
        assert_eq!(&bytes[64..72], &10_000u64.to_le_bytes());
        assert_eq!(ChunkIndex::from_bytes(&bytes).unwrap(), index);

        let mut damaged = bytes;
        damaged[70] ^= 1;
        assert!(matches!(
            ChunkIndex::from_bytes(&damaged),
            Err(FstError::DamagedChunkIndex)
        ));
    }

    #[test]
    fn test_key_index_padding() {
        let keys = KeyIndex { keys: vec![2, 0, 1] };
        let bytes = keys.to_bytes();
        assert_eq!(bytes.len(), 24);
        assert_eq!(&bytes[8..12], &2i32.to_le_bytes());
        assert_eq!(KeyIndex::from_bytes(&bytes, 3).unwrap(), keys);
    }

    #[test]
    fn test_prelude_round_trip() {
        let prelude = ColumnPrelude {
            annotation: Some("Europe/Amsterdam".to_string()),
        };
        let bytes = prelude.to_bytes();
        assert_eq!(bytes.len(), 24);
        let mut fixed = [0u8; COLUMN_PRELUDE_SIZE];
        fixed.copy_from_slice(&bytes[..COLUMN_PRELUDE_SIZE]);
        let (len, flags) = ColumnPrelude::parse_fixed(&fixed);
        assert_eq!(ColumnPrelude::tail_len(len), 16);
        let decoded = ColumnPrelude::from_parts(flags, &bytes[COLUMN_PRELUDE_SIZE..], len).unwrap();
        assert_eq!(decoded, prelude);

        assert_eq!(ColumnPrelude::default().to_bytes(), vec![0u8; 8]);

        let short = ColumnPrelude::from_parts(flags, &bytes[COLUMN_PRELUDE_SIZE..], 64);
        assert!(matches!(short, Err(FstError::Corrupt(_))));
    }
}
