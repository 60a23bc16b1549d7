use serde::Serialize;

use crate::table::{ColumnAttribute, TimeScale};

/// Table description read from the headers alone; no column data is decoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableMetadata {
    pub format_version: u32,
    pub row_count: u64,
    pub columns: Vec<ColumnMetadata>,
    /// Names of the key columns, in key order.
    pub keys: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnMetadata {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: String,
    pub attribute: ColumnAttribute,
    pub scale: TimeScale,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotation: Option<String>,
}

impl TableMetadata {
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }
}
