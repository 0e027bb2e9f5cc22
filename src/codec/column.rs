//! Columnar data passed between the writer, the replayer and the codec

use std::collections::BTreeMap;

use super::header::EPOCH_COLUMN;
use super::key::TimeBucketKey;
use super::types::{DataShape, ElementType};
use crate::error::{Result, StoreError};

/// A typed column vector
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Float32(Vec<f32>),
    Int32(Vec<i32>),
    Float64(Vec<f64>),
    Int64(Vec<i64>),
    Byte(Vec<u8>),
    Bool(Vec<bool>),
    Int16(Vec<i16>),
    Uint8(Vec<u8>),
    Uint16(Vec<u16>),
    Uint32(Vec<u32>),
    Uint64(Vec<u64>),
    /// At most sixteen characters per value
    String16(Vec<String>),
}

macro_rules! le_read {
    ($ty:ty, $bytes:expr) => {{
        let mut word = [0u8; std::mem::size_of::<$ty>()];
        word.copy_from_slice($bytes);
        <$ty>::from_le_bytes(word)
    }};
}

impl ColumnData {
    /// Empty column of the given type
    pub fn empty(element_type: ElementType) -> Result<Self> {
        Ok(match element_type {
            ElementType::Float32 => ColumnData::Float32(Vec::new()),
            ElementType::Int32 => ColumnData::Int32(Vec::new()),
            ElementType::Float64 => ColumnData::Float64(Vec::new()),
            ElementType::Int64 => ColumnData::Int64(Vec::new()),
            ElementType::Byte => ColumnData::Byte(Vec::new()),
            ElementType::Bool => ColumnData::Bool(Vec::new()),
            ElementType::Int16 => ColumnData::Int16(Vec::new()),
            ElementType::Uint8 => ColumnData::Uint8(Vec::new()),
            ElementType::Uint16 => ColumnData::Uint16(Vec::new()),
            ElementType::Uint32 => ColumnData::Uint32(Vec::new()),
            ElementType::Uint64 => ColumnData::Uint64(Vec::new()),
            ElementType::String16 => ColumnData::String16(Vec::new()),
            other => {
                return Err(StoreError::Codec(format!("{} columns cannot be stored", other)))
            }
        })
    }

    pub fn element_type(&self) -> ElementType {
        match self {
            ColumnData::Float32(_) => ElementType::Float32,
            ColumnData::Int32(_) => ElementType::Int32,
            ColumnData::Float64(_) => ElementType::Float64,
            ColumnData::Int64(_) => ElementType::Int64,
            ColumnData::Byte(_) => ElementType::Byte,
            ColumnData::Bool(_) => ElementType::Bool,
            ColumnData::Int16(_) => ElementType::Int16,
            ColumnData::Uint8(_) => ElementType::Uint8,
            ColumnData::Uint16(_) => ElementType::Uint16,
            ColumnData::Uint32(_) => ElementType::Uint32,
            ColumnData::Uint64(_) => ElementType::Uint64,
            ColumnData::String16(_) => ElementType::String16,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ColumnData::Float32(v) => v.len(),
            ColumnData::Int32(v) => v.len(),
            ColumnData::Float64(v) => v.len(),
            ColumnData::Int64(v) => v.len(),
            ColumnData::Byte(v) | ColumnData::Uint8(v) => v.len(),
            ColumnData::Bool(v) => v.len(),
            ColumnData::Int16(v) => v.len(),
            ColumnData::Uint16(v) => v.len(),
            ColumnData::Uint32(v) => v.len(),
            ColumnData::Uint64(v) => v.len(),
            ColumnData::String16(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append value `row` in little-endian stored form
    pub fn write_le(&self, row: usize, out: &mut Vec<u8>) -> Result<()> {
        let missing = || StoreError::Codec(format!("row {} out of range", row));
        match self {
            ColumnData::Float32(v) => out.extend_from_slice(&v.get(row).ok_or_else(missing)?.to_le_bytes()),
            ColumnData::Int32(v) => out.extend_from_slice(&v.get(row).ok_or_else(missing)?.to_le_bytes()),
            ColumnData::Float64(v) => out.extend_from_slice(&v.get(row).ok_or_else(missing)?.to_le_bytes()),
            ColumnData::Int64(v) => out.extend_from_slice(&v.get(row).ok_or_else(missing)?.to_le_bytes()),
            ColumnData::Byte(v) | ColumnData::Uint8(v) => out.push(*v.get(row).ok_or_else(missing)?),
            ColumnData::Bool(v) => out.push(*v.get(row).ok_or_else(missing)? as u8),
            ColumnData::Int16(v) => out.extend_from_slice(&v.get(row).ok_or_else(missing)?.to_le_bytes()),
            ColumnData::Uint16(v) => out.extend_from_slice(&v.get(row).ok_or_else(missing)?.to_le_bytes()),
            ColumnData::Uint32(v) => out.extend_from_slice(&v.get(row).ok_or_else(missing)?.to_le_bytes()),
            ColumnData::Uint64(v) => out.extend_from_slice(&v.get(row).ok_or_else(missing)?.to_le_bytes()),
            ColumnData::String16(v) => {
                let s = v.get(row).ok_or_else(missing)?;
                let mut count = 0;
                for ch in s.chars().take(16) {
                    out.extend_from_slice(&(ch as u32).to_le_bytes());
                    count += 1;
                }
                out.resize(out.len() + (16 - count) * 4, 0);
            }
        }
        Ok(())
    }

    /// Append one value decoded from exactly `element_type().size()` bytes
    pub fn push_le(&mut self, bytes: &[u8]) -> Result<()> {
        let want = self.element_type().size();
        if bytes.len() != want {
            return Err(StoreError::Codec(format!(
                "{} value needs {} bytes, got {}",
                self.element_type(),
                want,
                bytes.len()
            )));
        }
        match self {
            ColumnData::Float32(v) => v.push(le_read!(f32, bytes)),
            ColumnData::Int32(v) => v.push(le_read!(i32, bytes)),
            ColumnData::Float64(v) => v.push(le_read!(f64, bytes)),
            ColumnData::Int64(v) => v.push(le_read!(i64, bytes)),
            ColumnData::Byte(v) | ColumnData::Uint8(v) => v.push(bytes[0]),
            ColumnData::Bool(v) => v.push(bytes[0] != 0),
            ColumnData::Int16(v) => v.push(le_read!(i16, bytes)),
            ColumnData::Uint16(v) => v.push(le_read!(u16, bytes)),
            ColumnData::Uint32(v) => v.push(le_read!(u32, bytes)),
            ColumnData::Uint64(v) => v.push(le_read!(u64, bytes)),
            ColumnData::String16(v) => {
                let s: String = bytes
                    .chunks_exact(4)
                    .map(|c| le_read!(u32, c))
                    .take_while(|cp| *cp != 0)
                    .filter_map(char::from_u32)
                    .collect();
                v.push(s);
            }
        }
        Ok(())
    }
}

/// Ordered set of equally long, named columns
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnSeries {
    columns: Vec<(String, ColumnData)>,
}

impl ColumnSeries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a column, replacing any existing column with the same name
    pub fn add_column(&mut self, name: impl Into<String>, data: ColumnData) -> &mut Self {
        let name = name.into();
        match self.columns.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = data,
            None => self.columns.push((name, data)),
        }
        self
    }

    pub fn with_column(mut self, name: impl Into<String>, data: ColumnData) -> Self {
        self.add_column(name, data);
        self
    }

    pub fn remove_column(&mut self, name: &str) -> Option<ColumnData> {
        let pos = self.columns.iter().position(|(n, _)| n == name)?;
        Some(self.columns.remove(pos).1)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnData> {
        self.columns.iter().find(|(n, _)| n == name).map(|(_, c)| c)
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &ColumnData)> {
        self.columns.iter().map(|(n, c)| (n.as_str(), c))
    }

    pub fn names(&self) -> Vec<&str> {
        self.columns.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn shapes(&self) -> Vec<DataShape> {
        self.columns
            .iter()
            .map(|(n, c)| DataShape::new(n.clone(), c.element_type()))
            .collect()
    }

    /// Row count; zero when there are no columns
    pub fn len(&self) -> usize {
        self.columns.first().map(|(_, c)| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The leading `Epoch` column
    pub fn epoch(&self) -> Result<&[i64]> {
        match self.columns.first() {
            Some((name, ColumnData::Int64(v))) if name == EPOCH_COLUMN => Ok(v),
            _ => Err(StoreError::Codec(
                "column series must start with an Int64 Epoch column".to_string(),
            )),
        }
    }

    /// Check that every column has the same length and the series starts
    /// with `Epoch`
    pub fn validate(&self) -> Result<()> {
        let rows = self.epoch()?.len();
        for (name, data) in &self.columns {
            if data.len() != rows {
                return Err(StoreError::Codec(format!(
                    "column {} has {} rows, expected {}",
                    name,
                    data.len(),
                    rows
                )));
            }
        }
        Ok(())
    }
}

/// Column series keyed by bucket
pub type ColumnSeriesMap = BTreeMap<TimeBucketKey, ColumnSeries>;
