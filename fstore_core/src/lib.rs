pub mod codec;
pub mod error;
pub mod format;
pub mod pool;
pub mod reader;
pub mod writer;

pub use codec::{Compressor, Decompressor, StreamCompressor};
pub use error::{ErrorCategory, FstError, Result};
pub use format::{ColumnType, CompAlgorithm, FixedRatio};
pub use pool::{Parallelism, WorkerPool};
pub use reader::{BlockReader, BlockSpan, StreamInfo, StreamLayout};
pub use writer::BlockWriter;
