//! Columnar table files.
//!
//! ```no_run
//! use fstore_table::{Column, ColumnVector, RowRange, Table};
//!
//! let table = Table::new(vec![
//!     Column::new("id", ColumnVector::Int32(vec![Some(1), Some(2), None])),
//!     Column::new("name", ColumnVector::Character(vec![Some("a".into()), None, Some("c".into())])),
//! ])?;
//! fstore_table::write("table.fst", &table, 50)?;
//!
//! let tail = fstore_table::read("table.fst", Some(&["name"]), RowRange::new(1, 3))?;
//! assert_eq!(tail.row_count(), 2);
//! # Ok::<(), fstore_table::FstError>(())
//! ```

mod column;
pub mod config;
pub mod memory;
pub mod metadata;
pub mod store;
pub mod table;

pub use config::StoreConfig;
pub use memory::{compress_bytes, decompress_bytes, ByteAlgorithm};
pub use metadata::{ColumnMetadata, TableMetadata};
pub use store::{read, read_metadata, write, FstStore, RowRange, TableReader, TableWriter};
pub use table::{Column, ColumnAttribute, ColumnVector, FactorVector, Table, TimeScale};

pub use fstore_core::{ColumnType, ErrorCategory, FstError, Result};
