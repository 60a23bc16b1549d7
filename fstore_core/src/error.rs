use thiserror::Error;

pub type Result<T> = std::result::Result<T, FstError>;

/// Broad class of a failure, used by callers that need to tell a damaged
/// file apart from a bad argument without matching every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The file is not an fstore file, or its headers are damaged.
    Format,
    /// The operating system refused an open, read, write or seek.
    Io,
    /// Column data could not be decoded.
    Data,
    /// The call itself was invalid; nothing on disk was touched.
    Usage,
}

#[derive(Error, Debug)]
pub enum FstError {
    #[error("file is not an fstore file")]
    NotFst,
    #[error("damaged file header ({0})")]
    DamagedHeader(&'static str),
    #[error("damaged chunk index")]
    DamagedChunkIndex,
    #[error("file has format version {found}, this reader supports up to version {supported}; please upgrade")]
    FutureVersion { found: u32, supported: u32 },
    #[error("file was written with a byte order this reader cannot decode")]
    ByteOrder,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt column data: {0}")]
    Corrupt(String),
    #[error("unknown column type {0}")]
    UnknownColumnType(u16),
    #[error("unknown compression algorithm {0}")]
    UnknownAlgorithm(u16),

    #[error("the table contains no data")]
    NoData,
    #[error("invalid row range: start {start}, end {end}, the table has {rows} rows")]
    InvalidRowRange { start: u64, end: u64, rows: u64 },
    #[error("column not found: {0}")]
    ColumnNotFound(String),
    #[error("compression level {0} is outside 0..=100")]
    InvalidCompressionLevel(u32),
    #[error("invalid table: {0}")]
    InvalidTable(String),
}

impl FstError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            FstError::NotFst
            | FstError::DamagedHeader(_)
            | FstError::DamagedChunkIndex
            | FstError::FutureVersion { .. }
            | FstError::ByteOrder => ErrorCategory::Format,
            FstError::Io(_) => ErrorCategory::Io,
            FstError::Corrupt(_) | FstError::UnknownColumnType(_) | FstError::UnknownAlgorithm(_) => {
                ErrorCategory::Data
            }
            FstError::NoData
            | FstError::InvalidRowRange { .. }
            | FstError::ColumnNotFound(_)
            | FstError::InvalidCompressionLevel(_)
            | FstError::InvalidTable(_) => ErrorCategory::Usage,
        }
    }

    pub fn corrupt(msg: impl Into<String>) -> Self {
        FstError::Corrupt(msg.into())
    }

    /// A read that stops short inside a region the file says it contains is
    /// corruption, not an I/O failure.
    pub fn from_short_read(err: std::io::Error, region: &str) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            FstError::Corrupt(format!("{region} runs past the end of the file"))
        } else {
            FstError::Io(err)
        }
    }
}
