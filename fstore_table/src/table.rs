//! In-memory table model handed to and returned from the serializer.

use std::ops::Range;

use fstore_core::{ColumnType, FstError, Result};
use serde::Serialize;

/// Categorical column: `codes[i]` indexes into `levels`, `None` is NA.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FactorVector {
    pub codes: Vec<Option<u32>>,
    pub levels: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnVector {
    Character(Vec<Option<String>>),
    Factor(FactorVector),
    Int32(Vec<Option<i32>>),
    Double(Vec<Option<f64>>),
    Logical(Vec<Option<bool>>),
    Int64(Vec<Option<i64>>),
    Byte(Vec<u8>),
}

impl ColumnVector {
    pub fn len(&self) -> usize {
        match self {
            ColumnVector::Character(v) => v.len(),
            ColumnVector::Factor(f) => f.codes.len(),
            ColumnVector::Int32(v) => v.len(),
            ColumnVector::Double(v) => v.len(),
            ColumnVector::Logical(v) => v.len(),
            ColumnVector::Int64(v) => v.len(),
            ColumnVector::Byte(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn column_type(&self) -> ColumnType {
        match self {
            ColumnVector::Character(_) => ColumnType::Character,
            ColumnVector::Factor(_) => ColumnType::Factor,
            ColumnVector::Int32(_) => ColumnType::Int32,
            ColumnVector::Double(_) => ColumnType::Double64,
            ColumnVector::Logical(_) => ColumnType::Bool2,
            ColumnVector::Int64(_) => ColumnType::Int64,
            ColumnVector::Byte(_) => ColumnType::Byte,
        }
    }

    /// Copy of the rows in `range`. Factors keep their full level set.
    pub fn slice(&self, range: Range<usize>) -> ColumnVector {
        match self {
            ColumnVector::Character(v) => ColumnVector::Character(v[range].to_vec()),
            ColumnVector::Factor(f) => ColumnVector::Factor(FactorVector {
                codes: f.codes[range].to_vec(),
                levels: f.levels.clone(),
            }),
            ColumnVector::Int32(v) => ColumnVector::Int32(v[range].to_vec()),
            ColumnVector::Double(v) => ColumnVector::Double(v[range].to_vec()),
            ColumnVector::Logical(v) => ColumnVector::Logical(v[range].to_vec()),
            ColumnVector::Int64(v) => ColumnVector::Int64(v[range].to_vec()),
            ColumnVector::Byte(v) => ColumnVector::Byte(v[range].to_vec()),
        }
    }
}

/// Semantic refinement of a base column type. Ids are persisted and
/// append-only; each attribute belongs to exactly one base type.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnAttribute {
    CharacterBase = 1,
    FactorBase = 2,
    FactorOrdered = 3,
    Int32Base = 4,
    Int32DateDays = 5,
    Int32TimestampSeconds = 6,
    Int32TimeIntervalSeconds = 7,
    Int32TimeOfDaySeconds = 8,
    DoubleBase = 9,
    DoubleDateDays = 10,
    DoubleTimestampSeconds = 11,
    DoubleTimeIntervalSeconds = 12,
    DoubleTimeOfDaySeconds = 13,
    LogicalBase = 14,
    Int64Base = 15,
    Int64TimeSeconds = 16,
    ByteBase = 17,
}

impl ColumnAttribute {
    const ALL: [ColumnAttribute; 17] = [
        ColumnAttribute::CharacterBase,
        ColumnAttribute::FactorBase,
        ColumnAttribute::FactorOrdered,
        ColumnAttribute::Int32Base,
        ColumnAttribute::Int32DateDays,
        ColumnAttribute::Int32TimestampSeconds,
        ColumnAttribute::Int32TimeIntervalSeconds,
        ColumnAttribute::Int32TimeOfDaySeconds,
        ColumnAttribute::DoubleBase,
        ColumnAttribute::DoubleDateDays,
        ColumnAttribute::DoubleTimestampSeconds,
        ColumnAttribute::DoubleTimeIntervalSeconds,
        ColumnAttribute::DoubleTimeOfDaySeconds,
        ColumnAttribute::LogicalBase,
        ColumnAttribute::Int64Base,
        ColumnAttribute::Int64TimeSeconds,
        ColumnAttribute::ByteBase,
    ];

    pub fn id(self) -> u16 {
        self as u16
    }

    pub fn from_id(id: u16) -> Option<Self> {
        Self::ALL.iter().copied().find(|a| a.id() == id)
    }

    /// The plain attribute of a base type.
    pub fn base(column_type: ColumnType) -> Self {
        match column_type {
            ColumnType::Character => ColumnAttribute::CharacterBase,
            ColumnType::Factor => ColumnAttribute::FactorBase,
            ColumnType::Int32 => ColumnAttribute::Int32Base,
            ColumnType::Double64 => ColumnAttribute::DoubleBase,
            ColumnType::Bool2 => ColumnAttribute::LogicalBase,
            ColumnType::Int64 => ColumnAttribute::Int64Base,
            ColumnType::Byte => ColumnAttribute::ByteBase,
        }
    }

    pub fn column_type(self) -> ColumnType {
        use ColumnAttribute as A;
        match self {
            A::CharacterBase => ColumnType::Character,
            A::FactorBase | A::FactorOrdered => ColumnType::Factor,
            A::Int32Base
            | A::Int32DateDays
            | A::Int32TimestampSeconds
            | A::Int32TimeIntervalSeconds
            | A::Int32TimeOfDaySeconds => ColumnType::Int32,
            A::DoubleBase
            | A::DoubleDateDays
            | A::DoubleTimestampSeconds
            | A::DoubleTimeIntervalSeconds
            | A::DoubleTimeOfDaySeconds => ColumnType::Double64,
            A::LogicalBase => ColumnType::Bool2,
            A::Int64Base | A::Int64TimeSeconds => ColumnType::Int64,
            A::ByteBase => ColumnType::Byte,
        }
    }
}

/// Unit of a time-valued column.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeScale {
    #[default]
    None = 0,
    Nanoseconds = 1,
    Microseconds = 2,
    Milliseconds = 3,
    Seconds = 4,
    Minutes = 5,
    Hours = 6,
    Days = 7,
    Weeks = 8,
}

impl TimeScale {
    pub fn id(self) -> u16 {
        self as u16
    }

    pub fn from_id(id: u16) -> Option<Self> {
        Some(match id {
            0 => TimeScale::None,
            1 => TimeScale::Nanoseconds,
            2 => TimeScale::Microseconds,
            3 => TimeScale::Milliseconds,
            4 => TimeScale::Seconds,
            5 => TimeScale::Minutes,
            6 => TimeScale::Hours,
            7 => TimeScale::Days,
            8 => TimeScale::Weeks,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub data: ColumnVector,
    pub attribute: ColumnAttribute,
    pub scale: TimeScale,
    /// Free text stored with the column, such as a timezone.
    pub annotation: Option<String>,
}

impl Column {
    /// Column with the base attribute of its type, no scale and no annotation.
    pub fn new(name: impl Into<String>, data: ColumnVector) -> Self {
        let attribute = ColumnAttribute::base(data.column_type());
        Self {
            name: name.into(),
            data,
            attribute,
            scale: TimeScale::None,
            annotation: None,
        }
    }

    pub fn with_attribute(mut self, attribute: ColumnAttribute) -> Self {
        self.attribute = attribute;
        self
    }

    pub fn with_scale(mut self, scale: TimeScale) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_annotation(mut self, annotation: impl Into<String>) -> Self {
        self.annotation = Some(annotation.into());
        self
    }

    pub fn column_type(&self) -> ColumnType {
        self.data.column_type()
    }

    fn validate(&self) -> Result<()> {
        if self.attribute.column_type() != self.column_type() {
            return Err(FstError::InvalidTable(format!(
                "column '{}' is {} but has attribute {:?}",
                self.name,
                self.column_type().name(),
                self.attribute
            )));
        }
        let reserved = match &self.data {
            ColumnVector::Int32(v) => v.contains(&Some(i32::MIN)),
            ColumnVector::Int64(v) => v.contains(&Some(i64::MIN)),
            _ => false,
        };
        if reserved {
            return Err(FstError::InvalidTable(format!(
                "column '{}' holds the type's minimum value, which is reserved for NA",
                self.name
            )));
        }
        if let ColumnVector::Factor(f) = &self.data {
            let levels = f.levels.len() as u64;
            if let Some(code) = f.codes.iter().flatten().find(|&&c| u64::from(c) >= levels) {
                return Err(FstError::InvalidTable(format!(
                    "factor column '{}' has code {code} but only {levels} levels",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

/// A set of equally long columns, optionally sorted on `keys`.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    columns: Vec<Column>,
    keys: Vec<usize>,
}

impl Table {
    pub fn new(columns: Vec<Column>) -> Result<Self> {
        if let Some(first) = columns.first() {
            let rows = first.data.len();
            for column in &columns {
                column.validate()?;
                if column.data.len() != rows {
                    return Err(FstError::InvalidTable(format!(
                        "column '{}' has {} rows, expected {rows}",
                        column.name,
                        column.data.len()
                    )));
                }
            }
        }
        Ok(Self {
            columns,
            keys: Vec::new(),
        })
    }

    /// Mark the table as sorted on the columns at `keys`, in key order.
    pub fn with_keys(mut self, keys: Vec<usize>) -> Result<Self> {
        for (i, &key) in keys.iter().enumerate() {
            if key >= self.columns.len() {
                return Err(FstError::InvalidTable(format!(
                    "key {key} does not name one of the {} columns",
                    self.columns.len()
                )));
            }
            if keys[..i].contains(&key) {
                return Err(FstError::InvalidTable(format!("key {key} is listed twice")));
            }
        }
        self.keys = keys;
        Ok(self)
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn keys(&self) -> &[usize] {
        &self.keys
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn row_count(&self) -> usize {
        self.columns.first().map_or(0, |c| c.data.len())
    }

    pub fn into_columns(self) -> Vec<Column> {
        self.columns
    }
}
