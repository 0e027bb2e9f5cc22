//! Bucket file integrity checksums
//!
//! Each bucket file is cut into a header chunk plus `n` data chunks and
//! every chunk is summarized by a wrapping sum of its little-endian i64
//! words (the last partial word zero-padded). Two copies of a file agree
//! when every printed chunk sum agrees.
//!
//! ```text
//! ┌──────────┬─────────┬─────────┬─────┬─────────────┐
//! │ Hdr      │ Jan     │ Feb     │ ... │ Dec (short) │
//! └──────────┴─────────┴─────────┴─────┴─────────────┘
//!   37024 B    chunk_size = align8(data/n + data%n)
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::codec::{align8, BucketInfo, ElementType, HEADER_SIZE};
use crate::error::{Result, StoreError};
use crate::storage::read_header;

const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

#[derive(Debug, Clone)]
pub struct IntegrityOptions {
    pub root_dir: PathBuf,
    pub chunks: usize,
    pub year_start: Option<i32>,
    pub year_end: Option<i32>,

    /// 1-based month range; only meaningful with 12 chunks
    pub month_start: Option<u32>,
    pub month_end: Option<u32>,

    pub parallel: bool,
    pub fix_headers: bool,
}

impl Default for IntegrityOptions {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("."),
            chunks: 12,
            year_start: None,
            year_end: None,
            month_start: None,
            month_end: None,
            parallel: false,
            fix_headers: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSum {
    pub name: String,
    pub sum: i64,
}

impl ChunkSum {
    /// The printed form of the sum
    pub fn short(&self) -> u64 {
        self.sum.unsigned_abs() % 10_000
    }
}

#[derive(Debug, Clone)]
pub struct FileReport {
    pub path: PathBuf,
    pub year: i32,
    pub chunks: Vec<ChunkSum>,
    pub header_fixed: bool,
}

impl std::fmt::Display for FileReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path.display())?;
        for chunk in &self.chunks {
            write!(f, " {}:{}", chunk.name, chunk.short())?;
        }
        if self.header_fixed {
            write!(f, " (header fixed)")?;
        }
        Ok(())
    }
}

/// Wrapping sum of little-endian i64 words, zero-padding the tail
pub fn chunk_sum(bytes: &[u8]) -> i64 {
    let mut words = bytes.chunks_exact(8);
    let mut sum = 0i64;
    for word in &mut words {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(word);
        sum = sum.wrapping_add(i64::from_le_bytes(buf));
    }
    let rest = words.remainder();
    if !rest.is_empty() {
        let mut buf = [0u8; 8];
        buf[..rest.len()].copy_from_slice(rest);
        sum = sum.wrapping_add(i64::from_le_bytes(buf));
    }
    sum
}

/// Size of each data chunk for a data region of `data_len` bytes
pub fn chunk_size(data_len: u64, chunks: usize) -> u64 {
    let n = chunks.max(1) as u64;
    align8((data_len / n + data_len % n) as usize) as u64
}

fn chunk_name(i: usize, chunks: usize) -> String {
    if chunks == MONTHS.len() {
        MONTHS[i].to_string()
    } else {
        format!("C{}", i + 1)
    }
}

/// Header chunk plus `chunks` data chunk sums for one file
pub fn checksum_file(path: &Path, chunks: usize) -> Result<Vec<ChunkSum>> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    if len < HEADER_SIZE as u64 {
        return Err(StoreError::Storage(format!(
            "{} is shorter than a bucket header",
            path.display()
        )));
    }

    let mut header = vec![0u8; HEADER_SIZE];
    file.read_exact(&mut header)?;
    let mut sums = vec![ChunkSum {
        name: "Hdr".to_string(),
        sum: chunk_sum(&header),
    }];

    let data_len = len - HEADER_SIZE as u64;
    let size = chunk_size(data_len, chunks);
    let mut buf = Vec::new();
    let mut remaining = data_len;
    for i in 0..chunks.max(1) {
        let take = size.min(remaining);
        buf.resize(take as usize, 0);
        file.read_exact(&mut buf)?;
        remaining -= take;
        sums.push(ChunkSum {
            name: chunk_name(i, chunks.max(1)),
            sum: chunk_sum(&buf),
        });
    }
    Ok(sums)
}

/// Rewrite a header whose four columns were all stored as Int32 to Float32.
///
/// Returns true if the header was changed.
pub fn fix_header(path: &Path) -> Result<bool> {
    let mut info: BucketInfo = read_header(path)?;
    let types: Vec<ElementType> = info.shapes.iter().map(|s| s.element_type).collect();
    if types.len() != 4 || types.iter().any(|t| *t != ElementType::Int32) {
        return Ok(false);
    }

    info.set_element_types(&[ElementType::Float32; 4])?;
    let mut file = OpenOptions::new().write(true).open(path)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&info.encode())?;
    file.sync_all()?;
    tracing::info!(path = %path.display(), "rewrote Int32 OHLC header as Float32");
    Ok(true)
}

/// All `{Symbol}/{Timeframe}/{Format}/{Year}.bin` files under `root`
pub fn find_bucket_files(root: &Path) -> Result<Vec<(PathBuf, i32)>> {
    let mut found = Vec::new();
    collect(root, 0, &mut found)?;
    found.sort();
    Ok(found)
}

fn collect(dir: &Path, depth: usize, found: &mut Vec<(PathBuf, i32)>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if depth < 3 {
            if path.is_dir() {
                collect(&path, depth + 1, found)?;
            }
            continue;
        }
        if path.extension().and_then(|e| e.to_str()) != Some("bin") {
            continue;
        }
        let year = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.parse::<i32>().ok());
        if let Some(year) = year {
            found.push((path, year));
        }
    }
    Ok(())
}

fn check_file(path: &Path, year: i32, opts: &IntegrityOptions) -> Result<FileReport> {
    let header_fixed = if opts.fix_headers { fix_header(path)? } else { false };
    let mut chunks = checksum_file(path, opts.chunks)?;

    if opts.chunks == MONTHS.len() && (opts.month_start.is_some() || opts.month_end.is_some()) {
        let first = opts.month_start.unwrap_or(1).max(1) as usize;
        let last = opts.month_end.unwrap_or(12).min(12) as usize;
        let mut kept = vec![chunks[0].clone()];
        kept.extend(
            chunks
                .drain(1..)
                .enumerate()
                .filter(|(i, _)| (first..=last).contains(&(i + 1)))
                .map(|(_, c)| c),
        );
        chunks = kept;
    }

    Ok(FileReport {
        path: path.to_path_buf(),
        year,
        chunks,
        header_fixed,
    })
}

/// Checksum every bucket file selected by `opts`
pub fn run(opts: &IntegrityOptions) -> Result<Vec<FileReport>> {
    if opts.chunks == 0 {
        return Err(StoreError::Config("chunk count must be at least 1".to_string()));
    }
    let files: Vec<(PathBuf, i32)> = find_bucket_files(&opts.root_dir)?
        .into_iter()
        .filter(|(_, year)| opts.year_start.map_or(true, |y| *year >= y))
        .filter(|(_, year)| opts.year_end.map_or(true, |y| *year <= y))
        .collect();
    tracing::debug!(files = files.len(), root = %opts.root_dir.display(), "checking bucket files");

    if !opts.parallel {
        return files.iter().map(|(path, year)| check_file(path, *year, opts)).collect();
    }

    let workers = std::thread::available_parallelism().map_or(4, |n| n.get());
    let per_worker = files.len().div_ceil(workers).max(1);
    std::thread::scope(|scope| {
        let handles: Vec<_> = files
            .chunks(per_worker)
            .map(|batch| {
                scope.spawn(move || {
                    batch
                        .iter()
                        .map(|(path, year)| check_file(path, *year, opts))
                        .collect::<Result<Vec<_>>>()
                })
            })
            .collect();

        let mut reports = Vec::with_capacity(files.len());
        for handle in handles {
            let batch = handle
                .join()
                .map_err(|_| StoreError::Storage("integrity worker panicked".to_string()))??;
            reports.extend(batch);
        }
        Ok(reports)
    })
}
