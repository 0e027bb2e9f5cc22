//! Element types, record types and data shapes
//!
//! The numeric codes are part of the on-disk format (file headers, WAL
//! data-shape vectors) and must never be renumbered.
//!
//! ## Data-shape vector (DSV) encoding
//! ```text
//! ┌───────────┬──────────────────────────────────────────────┐
//! │ Count (1) │ { NameLen (1) │ Name (NameLen) │ Type (1) }* │
//! └───────────┴──────────────────────────────────────────────┘
//! ```

use std::fmt;

use crate::error::{Result, StoreError};

/// Column storage type with a stable on-disk code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ElementType {
    Float32 = 0,
    Int32 = 1,
    Float64 = 2,
    Int64 = 3,
    Byte = 4,
    Bool = 5,
    None = 6,
    /// Variable-length string; never stored in bucket files
    String = 7,
    Int16 = 8,
    Uint8 = 9,
    Uint16 = 10,
    Uint32 = 11,
    Uint64 = 12,
    /// Sixteen UTF-32 code points, zero padded
    String16 = 13,
}

impl ElementType {
    /// Stored width in bytes
    pub fn size(self) -> usize {
        match self {
            ElementType::Float32 | ElementType::Int32 | ElementType::Uint32 => 4,
            ElementType::Float64 | ElementType::Int64 | ElementType::Uint64 => 8,
            ElementType::Byte | ElementType::Bool | ElementType::Uint8 => 1,
            ElementType::Int16 | ElementType::Uint16 => 2,
            ElementType::String16 => 64,
            ElementType::None | ElementType::String => 0,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Result<Self> {
        Ok(match code {
            0 => ElementType::Float32,
            1 => ElementType::Int32,
            2 => ElementType::Float64,
            3 => ElementType::Int64,
            4 => ElementType::Byte,
            5 => ElementType::Bool,
            6 => ElementType::None,
            7 => ElementType::String,
            8 => ElementType::Int16,
            9 => ElementType::Uint8,
            10 => ElementType::Uint16,
            11 => ElementType::Uint32,
            12 => ElementType::Uint64,
            13 => ElementType::String16,
            other => {
                return Err(StoreError::Codec(format!("unknown element type code {}", other)))
            }
        })
    }

    /// Whether values of this type can be written into a bucket file
    pub fn is_storable(self) -> bool {
        !matches!(self, ElementType::None | ElementType::String)
    }

    pub fn name(self) -> &'static str {
        match self {
            ElementType::Float32 => "float32",
            ElementType::Int32 => "int32",
            ElementType::Float64 => "float64",
            ElementType::Int64 => "int64",
            ElementType::Byte => "byte",
            ElementType::Bool => "bool",
            ElementType::None => "none",
            ElementType::String => "string",
            ElementType::Int16 => "int16",
            ElementType::Uint8 => "uint8",
            ElementType::Uint16 => "uint16",
            ElementType::Uint32 => "uint32",
            ElementType::Uint64 => "uint64",
            ElementType::String16 => "string16",
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Bucket record layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i8)]
pub enum RecordType {
    /// One fixed-width record per time interval, written in place
    Fixed = 0,
    /// Any number of rows per interval, stored out of line
    Variable = 1,
}

impl RecordType {
    pub fn code(self) -> i8 {
        self as i8
    }

    pub fn from_code(code: i64) -> Result<Self> {
        match code {
            0 => Ok(RecordType::Fixed),
            1 => Ok(RecordType::Variable),
            other => Err(StoreError::Codec(format!("unknown record type code {}", other))),
        }
    }
}

/// A named, typed column
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DataShape {
    pub name: String,
    pub element_type: ElementType,
}

impl DataShape {
    pub fn new(name: impl Into<String>, element_type: ElementType) -> Self {
        Self {
            name: name.into(),
            element_type,
        }
    }
}

impl fmt::Display for DataShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.element_type)
    }
}

/// Sum of the stored widths of `shapes`
pub fn shapes_byte_len(shapes: &[DataShape]) -> usize {
    shapes.iter().map(|s| s.element_type.size()).sum()
}

/// Round `n` up to a multiple of eight
pub fn align8(n: usize) -> usize {
    (n + 7) & !7
}

// =============================================================================
// DSV Encoding/Decoding
// =============================================================================

pub fn dsv_to_bytes(shapes: &[DataShape]) -> Result<Vec<u8>> {
    if shapes.len() > u8::MAX as usize {
        return Err(StoreError::Codec(format!(
            "too many data shapes: {} (max {})",
            shapes.len(),
            u8::MAX
        )));
    }

    let mut out = Vec::with_capacity(1 + shapes.len() * 8);
    out.push(shapes.len() as u8);
    for shape in shapes {
        let name = shape.name.as_bytes();
        if name.len() > u8::MAX as usize {
            return Err(StoreError::Codec(format!("column name too long: {}", shape.name)));
        }
        out.push(name.len() as u8);
        out.extend_from_slice(name);
        out.push(shape.element_type.code());
    }
    Ok(out)
}

/// Decode a DSV, returning the shapes and the number of bytes consumed
pub fn dsv_from_bytes(bytes: &[u8]) -> Result<(Vec<DataShape>, usize)> {
    let short = || StoreError::Codec("truncated data shape vector".to_string());

    let count = *bytes.first().ok_or_else(short)? as usize;
    let mut cursor = 1;
    let mut shapes = Vec::with_capacity(count);
    for _ in 0..count {
        let name_len = *bytes.get(cursor).ok_or_else(short)? as usize;
        cursor += 1;
        let name = bytes.get(cursor..cursor + name_len).ok_or_else(short)?;
        let name = String::from_utf8(name.to_vec())
            .map_err(|_| StoreError::Codec("column name is not UTF-8".to_string()))?;
        cursor += name_len;
        let code = *bytes.get(cursor).ok_or_else(short)?;
        cursor += 1;
        shapes.push(DataShape::new(name, ElementType::from_code(code)?));
    }
    Ok((shapes, cursor))
}
