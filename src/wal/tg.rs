//! Transaction groups
//!
//! A transaction group (TG) is the unit of commit, WAL logging and
//! replication: every write command drained from the pipe in one flush.
//!
//! ## Serialized form (little-endian)
//! ```text
//! ┌───────────┬───────────────┬──────────────────────────────┐
//! │ TGID (8)  │ WTCount (8)   │ WTSet × WTCount              │
//! └───────────┴───────────────┴──────────────────────────────┘
//!
//! WTSet:
//! ┌────────┬────────┬─────────┬─────────┬───────────┬──────────┬─────────┬─────────┬─────┐
//! │ RT (1) │ KL (2) │ Key(KL) │ DL (4)  │ VRL (4)   │ Off (8)  │ Idx (8) │ Data(DL)│ DSV │
//! └────────┴────────┴─────────┴─────────┴───────────┴──────────┴─────────┴─────────┴─────┘
//! ```
//!
//! `Key` is the bucket file path relative to the data root
//! (`SYM/TF/FORMAT/YEAR.bin`).

use crate::codec::{dsv_from_bytes, dsv_to_bytes, DataShape, RecordType};
use crate::error::{Result, StoreError};

/// Offset, index and payload of one interval's write, packed as
/// `offset:i64 ‖ index:i64 ‖ payload`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetIndexBuffer {
    bytes: Vec<u8>,
}

impl OffsetIndexBuffer {
    pub fn new(offset: i64, index: i64, payload: &[u8]) -> Self {
        let mut bytes = Vec::with_capacity(16 + payload.len());
        bytes.extend_from_slice(&offset.to_le_bytes());
        bytes.extend_from_slice(&index.to_le_bytes());
        bytes.extend_from_slice(payload);
        Self { bytes }
    }

    pub fn offset(&self) -> i64 {
        read_i64(&self.bytes[0..8])
    }

    pub fn index(&self) -> i64 {
        read_i64(&self.bytes[8..16])
    }

    pub fn payload(&self) -> &[u8] {
        &self.bytes[16..]
    }

    /// Index followed by payload: a fixed record exactly as stored on disk
    pub fn index_and_payload(&self) -> &[u8] {
        &self.bytes[8..]
    }

    /// Append more stored rows to the payload
    pub fn extend_payload(&mut self, more: &[u8]) {
        self.bytes.extend_from_slice(more);
    }
}

/// One write destined for one interval of one bucket file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WTSet {
    pub record_type: RecordType,
    /// Root-relative bucket file path
    pub file_path: String,
    /// Stored row length for variable records, zero for fixed
    pub var_rec_len: i32,
    /// Stored columns (no `Epoch`, no `Nanoseconds`)
    pub data_shapes: Vec<DataShape>,
    pub buffer: OffsetIndexBuffer,
}

impl WTSet {
    pub fn new(
        record_type: RecordType,
        file_path: impl Into<String>,
        var_rec_len: i32,
        offset: i64,
        index: i64,
        payload: &[u8],
        data_shapes: Vec<DataShape>,
    ) -> Self {
        Self {
            record_type,
            file_path: file_path.into(),
            var_rec_len,
            data_shapes,
            buffer: OffsetIndexBuffer::new(offset, index, payload),
        }
    }
}

/// A committed batch of write commands
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionGroup {
    pub tgid: i64,
    pub sets: Vec<WTSet>,
}

impl TransactionGroup {
    pub fn new(tgid: i64, sets: Vec<WTSet>) -> Self {
        Self { tgid, sets }
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(16 + self.sets.iter().map(|s| s.buffer.bytes.len() + 64).sum::<usize>());
        out.extend_from_slice(&self.tgid.to_le_bytes());
        out.extend_from_slice(&(self.sets.len() as i64).to_le_bytes());

        for set in &self.sets {
            let key = set.file_path.as_bytes();
            let key_len = i16::try_from(key.len())
                .map_err(|_| StoreError::Codec(format!("WAL key too long: {}", set.file_path)))?;
            let payload = set.buffer.payload();
            let data_len = i32::try_from(payload.len())
                .map_err(|_| StoreError::Codec(format!("WTSet payload too large: {}", payload.len())))?;

            out.push(set.record_type.code() as u8);
            out.extend_from_slice(&key_len.to_le_bytes());
            out.extend_from_slice(key);
            out.extend_from_slice(&data_len.to_le_bytes());
            out.extend_from_slice(&set.var_rec_len.to_le_bytes());
            out.extend_from_slice(&set.buffer.bytes);
            out.extend_from_slice(&dsv_to_bytes(&set.data_shapes)?);
        }
        Ok(out)
    }

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut cur = Cursor { bytes, pos: 0 };
        let tgid = cur.i64()?;
        let count = cur.i64()?;
        if count < 0 {
            return Err(StoreError::Codec(format!("negative WTSet count {}", count)));
        }

        // Each WTSet is at least 27 bytes; cap the allocation by what fits
        let mut sets = Vec::with_capacity((count as usize).min(bytes.len() / 27));
        for _ in 0..count {
            let record_type = RecordType::from_code(cur.take(1)?[0] as i8 as i64)?;
            let key_len = cur.i16()?;
            if key_len < 0 {
                return Err(StoreError::Codec(format!("negative WAL key length {}", key_len)));
            }
            let file_path = String::from_utf8(cur.take(key_len as usize)?.to_vec())
                .map_err(|_| StoreError::Codec("WAL key is not UTF-8".to_string()))?;
            let data_len = cur.i32()?;
            if data_len < 0 {
                return Err(StoreError::Codec(format!("negative WTSet data length {}", data_len)));
            }
            let var_rec_len = cur.i32()?;
            let buffer = OffsetIndexBuffer {
                bytes: cur.take(16 + data_len as usize)?.to_vec(),
            };
            let (data_shapes, used) = dsv_from_bytes(&bytes[cur.pos..])?;
            cur.pos += used;

            sets.push(WTSet {
                record_type,
                file_path,
                var_rec_len,
                data_shapes,
                buffer,
            });
        }

        if cur.pos != bytes.len() {
            return Err(StoreError::Codec(format!(
                "{} trailing bytes after transaction group {}",
                bytes.len() - cur.pos,
                tgid
            )));
        }
        Ok(Self { tgid, sets })
    }
}

/// Read just the TGID from serialized TG bytes
pub fn peek_tgid(bytes: &[u8]) -> Result<i64> {
    Cursor { bytes, pos: 0 }.i64()
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).filter(|end| *end <= self.bytes.len()).ok_or_else(|| {
            StoreError::Codec(format!(
                "transaction group truncated: need {} bytes at {}, have {}",
                n,
                self.pos,
                self.bytes.len()
            ))
        })?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn i64(&mut self) -> Result<i64> {
        Ok(read_i64(self.take(8)?))
    }

    fn i32(&mut self) -> Result<i32> {
        let mut word = [0u8; 4];
        word.copy_from_slice(self.take(4)?);
        Ok(i32::from_le_bytes(word))
    }

    fn i16(&mut self) -> Result<i16> {
        let mut word = [0u8; 2];
        word.copy_from_slice(self.take(2)?);
        Ok(i16::from_le_bytes(word))
    }
}

fn read_i64(bytes: &[u8]) -> i64 {
    let mut word = [0u8; 8];
    word.copy_from_slice(bytes);
    i64::from_le_bytes(word)
}
