//! Primary bucket files
//!
//! Each `{root}/{Symbol}/{Timeframe}/{Format}/{Year}.bin` file is a header
//! followed by one slot per interval of the year, pre-allocated at
//! creation so every write is positional.
//!
//! ```text
//! Fixed slot:     ┌───────────┬───────────────────────────┐
//!                 │ Index (8) │ Aligned column payload    │
//!                 └───────────┴───────────────────────────┘
//! Variable slot:  ┌───────────┬────────────┬──────────┐
//!                 │ Index (8) │ Offset (8) │ Len (8)  │ ──► rows appended past
//!                 └───────────┴────────────┴──────────┘     the slot region
//! ```
//!
//! A zero index marks an empty slot. Variable rows are kept sorted by
//! interval ticks; rows identical to ones already stored are not appended
//! again, so re-applying a transaction group leaves the file unchanged.
//! The comparison is on whole rows: two distinct trades with the same
//! ticks and the same values, even from different transaction groups,
//! are stored once.
//!
//! Write sets name their file by root-relative WAL key only; a key that
//! does not have that exact form is refused before any path is built.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};

use super::buffile::BufferedFile;
use crate::codec::{
    decode_rows, expand_rows, index_to_offset, BucketInfo, ColumnSeries, DataShape, RecordType,
    TimeBucketKey, HEADER_SIZE, INDIRECT_RECORD_LEN,
};
use crate::error::{Result, StoreError};
use crate::wal::WTSet;

/// Fixed writes per file at which the buffered writer takes over
const BUFFERED_WRITE_THRESHOLD: usize = 100;

pub struct PrimaryStore {
    root: PathBuf,

    /// Decoded headers by absolute file path
    infos: RwLock<HashMap<PathBuf, BucketInfo>>,

    /// Files written since the last checkpoint
    dirty: Mutex<HashSet<PathBuf>>,
}

impl PrimaryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            infos: RwLock::new(HashMap::new()),
            dirty: Mutex::new(HashSet::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // =========================================================================
    // Bucket lifecycle
    // =========================================================================

    /// Return the bucket's header, creating and pre-sizing the file if it
    /// does not exist yet. An existing bucket must match `shapes` and
    /// `record_type` exactly.
    pub fn ensure_bucket(
        &self,
        key: &TimeBucketKey,
        year: i32,
        shapes: &[DataShape],
        record_type: RecordType,
    ) -> Result<BucketInfo> {
        let path = key.year_file(&self.root, year);
        let wanted = BucketInfo::new(key.timeframe()?, "Created By Writer", year, shapes, record_type)?;

        if let Some(existing) = self.bucket_info(&path)? {
            if existing.record_type != wanted.record_type || existing.shapes != wanted.shapes {
                return Err(StoreError::SchemaMismatch {
                    key: key.to_string(),
                    reason: format!(
                        "bucket has {:?} {:?}, write has {:?} {:?}",
                        existing.record_type, existing.shapes, wanted.record_type, wanted.shapes
                    ),
                });
            }
            return Ok(existing);
        }

        fs::create_dir_all(key.dir(&self.root))?;
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;
        file.write_all(&wanted.encode())?;
        file.set_len(wanted.file_size()?)?;
        file.sync_all()?;

        tracing::info!(bucket = %key, year, path = %path.display(), "created bucket file");
        self.infos.write().insert(path, wanted.clone());
        Ok(wanted)
    }

    /// Header of the file at `path`, or None if it does not exist
    pub fn bucket_info(&self, path: &Path) -> Result<Option<BucketInfo>> {
        if let Some(info) = self.infos.read().get(path) {
            return Ok(Some(info.clone()));
        }
        if !path.exists() {
            return Ok(None);
        }
        let info = read_header(path)?;
        self.infos.write().insert(path.to_path_buf(), info.clone());
        Ok(Some(info))
    }

    /// Forget cached headers (after an external header rewrite)
    pub fn invalidate(&self) {
        self.infos.write().clear();
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Apply write sets in order, grouped per file.
    ///
    /// A file that cannot be written is logged and skipped; every other
    /// file is still written and the call then fails with
    /// [`StoreError::PartialWrite`].
    pub fn write_sets(&self, sets: &[WTSet]) -> Result<()> {
        let mut by_file: BTreeMap<PathBuf, Vec<&WTSet>> = BTreeMap::new();
        let mut rejected: BTreeMap<&str, String> = BTreeMap::new();
        for set in sets {
            match TimeBucketKey::from_wal_key(&set.file_path) {
                Ok((key, year)) => by_file.entry(key.year_file(&self.root, year)).or_default().push(set),
                Err(e) => {
                    rejected.insert(&set.file_path, e.to_string());
                }
            }
        }

        let total = by_file.len() + rejected.len();
        let mut failures: Vec<String> = Vec::new();
        for (file, reason) in rejected {
            tracing::error!(path = file, error = %reason, "refusing write set");
            failures.push(reason);
        }
        for (path, sets) in by_file {
            match self.write_file(&path, &sets) {
                Ok(()) => tracing::trace!(path = %path.display(), writes = sets.len(), "wrote bucket file"),
                Err(e) => {
                    tracing::error!(path = %path.display(), writes = sets.len(), error = %e, "failed to write bucket file");
                    failures.push(format!("{}: {}", path.display(), e));
                }
            }
        }

        let failed = failures.len();
        match failures.into_iter().next() {
            None => Ok(()),
            Some(first) => Err(StoreError::PartialWrite { failed, total, first }),
        }
    }

    /// Write every set of one bucket file, or none if any set does not fit
    fn write_file(&self, path: &Path, sets: &[&WTSet]) -> Result<()> {
        let info = self.bucket_for_set(path, sets[0])?;
        for set in sets {
            check_set(&info, set)?;
        }

        match info.record_type {
            RecordType::Fixed if sets.len() >= BUFFERED_WRITE_THRESHOLD => {
                let mut bf = BufferedFile::open(path)?;
                self.dirty.lock().insert(path.to_path_buf());
                for set in sets {
                    let data = set.buffer.index_and_payload();
                    let written = bf.write_at(data, set.buffer.offset() as u64)?;
                    if written != data.len() {
                        return Err(StoreError::Storage(format!(
                            "short write of {} of {} bytes at offset {} in {}",
                            written,
                            data.len(),
                            set.buffer.offset(),
                            path.display()
                        )));
                    }
                }
                bf.flush()?;
                bf.close()?;
            }
            RecordType::Fixed => {
                let mut file = OpenOptions::new().write(true).open(path)?;
                self.dirty.lock().insert(path.to_path_buf());
                for set in sets {
                    file.seek(SeekFrom::Start(set.buffer.offset() as u64))?;
                    file.write_all(set.buffer.index_and_payload())?;
                }
            }
            RecordType::Variable => {
                let mut file = OpenOptions::new().read(true).write(true).open(path)?;
                self.dirty.lock().insert(path.to_path_buf());
                for set in sets {
                    write_indirect(&mut file, set, info.var_rec_len())?;
                }
            }
        }
        Ok(())
    }

    /// fsync every file written since the last call; returns how many.
    ///
    /// Files not synced because of an error stay dirty for the next call.
    pub fn sync_dirty(&self) -> Result<usize> {
        let dirty: Vec<PathBuf> = self.dirty.lock().drain().collect();
        for (i, path) in dirty.iter().enumerate() {
            if let Err(e) = File::open(path).and_then(|f| f.sync_all()) {
                self.dirty.lock().extend(dirty[i..].iter().cloned());
                return Err(e.into());
            }
        }
        Ok(dirty.len())
    }

    fn bucket_for_set(&self, path: &Path, set: &WTSet) -> Result<BucketInfo> {
        if let Some(info) = self.bucket_info(path)? {
            return Ok(info);
        }
        let (key, year) = TimeBucketKey::from_wal_key(&set.file_path)?;
        self.ensure_bucket(&key, year, &set.data_shapes, set.record_type)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Read intervals `first..=last` of a bucket year back into columns
    pub fn read_range(&self, key: &TimeBucketKey, year: i32, first: i64, last: i64) -> Result<ColumnSeries> {
        let path = key.year_file(&self.root, year);
        let info = self
            .bucket_info(&path)?
            .ok_or_else(|| StoreError::Storage(format!("no bucket file {}", path.display())))?;
        let tf = key.timeframe()?;
        let first = first.max(1);
        let last = last.min(info.intervals_in_year()?);

        let mut file = File::open(&path)?;
        let mut rows = Vec::new();
        if first <= last {
            let slots = (last - first + 1) as usize;
            let mut region = vec![0u8; slots * info.record_len as usize];
            file.seek(SeekFrom::Start(index_to_offset(first, info.record_len) as u64))?;
            file.read_exact(&mut region)?;

            for slot in region.chunks_exact(info.record_len as usize) {
                let index = read_i64(&slot[..8]);
                if index == 0 {
                    continue;
                }
                let data = match info.record_type {
                    RecordType::Fixed => slot[8..].to_vec(),
                    RecordType::Variable => {
                        let (offset, len) = (read_i64(&slot[8..16]), read_i64(&slot[16..24]));
                        check_indirect(offset, len, &path)?;
                        let mut data = vec![0u8; len as usize];
                        file.seek(SeekFrom::Start(offset as u64))?;
                        file.read_exact(&mut data)?;
                        data
                    }
                };
                rows.extend(expand_rows(&data, &info.shapes, info.record_type, index, &tf, year)?);
            }
        }
        decode_rows(&rows, &info.shapes, info.record_type)
    }
}

/// Read and decode the header of a bucket file
pub fn read_header(path: &Path) -> Result<BucketInfo> {
    let mut buf = vec![0u8; HEADER_SIZE];
    File::open(path)?.read_exact(&mut buf)?;
    BucketInfo::decode(&buf)
}

/// A set must match the bucket's layout and land exactly on the slot of an
/// interval inside the bucket's year
fn check_set(info: &BucketInfo, set: &WTSet) -> Result<()> {
    let len = set.buffer.payload().len();
    let fits = match info.record_type {
        RecordType::Fixed => len as i64 + 8 == info.record_len,
        RecordType::Variable => {
            info.var_rec_len() > 0 && len % info.var_rec_len() == 0 && set.var_rec_len as usize == info.var_rec_len()
        }
    };
    let index = set.buffer.index();
    let placed = (1..=info.intervals_in_year()?).contains(&index)
        && set.buffer.offset() == index_to_offset(index, info.record_len);
    if set.record_type != info.record_type || !fits || !placed {
        return Err(StoreError::Storage(format!(
            "write of {} bytes for interval {} at offset {} does not fit bucket {} (record length {})",
            len,
            index,
            set.buffer.offset(),
            set.file_path,
            info.record_len
        )));
    }
    Ok(())
}

/// Merge new variable rows into an interval and rewrite its indirect slot
fn write_indirect(file: &mut File, set: &WTSet, var_rec_len: usize) -> Result<()> {
    let slot_offset = set.buffer.offset() as u64;
    let mut slot = [0u8; INDIRECT_RECORD_LEN];
    file.seek(SeekFrom::Start(slot_offset))?;
    file.read_exact(&mut slot)?;
    let (cur_index, cur_offset, cur_len) = (read_i64(&slot[..8]), read_i64(&slot[8..16]), read_i64(&slot[16..24]));

    let mut merged = Vec::new();
    if cur_index != 0 {
        check_indirect(cur_offset, cur_len, Path::new(&set.file_path))?;
        merged.resize(cur_len as usize, 0);
        file.seek(SeekFrom::Start(cur_offset as u64))?;
        file.read_exact(&mut merged)?;
    }
    let existing = merged.len() / var_rec_len;
    for row in set.buffer.payload().chunks_exact(var_rec_len) {
        if !merged[..existing * var_rec_len].chunks_exact(var_rec_len).any(|old| old == row) {
            merged.extend_from_slice(row);
        }
    }
    if cur_index != 0 && merged.len() == cur_len as usize {
        return Ok(());
    }

    let mut rows: Vec<&[u8]> = merged.chunks_exact(var_rec_len).collect();
    rows.sort_by_key(|row| ticks_of(row));
    let sorted: Vec<u8> = rows.concat();

    // Data already at the tail of the file is rewritten in place
    let eof = file.seek(SeekFrom::End(0))?;
    let write_offset = if cur_index != 0 && (cur_offset + cur_len) as u64 == eof {
        cur_offset as u64
    } else {
        eof
    };
    file.seek(SeekFrom::Start(write_offset))?;
    file.write_all(&sorted)?;

    let mut new_slot = Vec::with_capacity(INDIRECT_RECORD_LEN);
    new_slot.extend_from_slice(&set.buffer.index().to_le_bytes());
    new_slot.extend_from_slice(&(write_offset as i64).to_le_bytes());
    new_slot.extend_from_slice(&(sorted.len() as i64).to_le_bytes());
    file.seek(SeekFrom::Start(slot_offset))?;
    file.write_all(&new_slot)?;
    Ok(())
}

/// Variable data lives past the header; a slot pointing elsewhere is damage
fn check_indirect(offset: i64, len: i64, path: &Path) -> Result<()> {
    if offset < HEADER_SIZE as i64 || len < 0 {
        return Err(StoreError::Codec(format!(
            "bad indirect record (offset {}, length {}) in {}",
            offset,
            len,
            path.display()
        )));
    }
    Ok(())
}

fn ticks_of(row: &[u8]) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&row[row.len() - 4..]);
    u32::from_le_bytes(word)
}

fn read_i64(bytes: &[u8]) -> i64 {
    let mut word = [0u8; 8];
    word.copy_from_slice(bytes);
    i64::from_le_bytes(word)
}
