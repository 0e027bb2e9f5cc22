//! Buffered File Writer
//!
//! A single block-aligned read-modify-write window over a pre-sized file.
//! Many small positional writes that land close together (a burst of
//! fixed records for one bucket) turn into a handful of large reads and
//! writes.
//!
//! ```text
//!   file:   |....block....|....block....|....block....|
//!   buffer:               [=====================]
//!                         ^ buffer_offset (block aligned)
//! ```
//!
//! The window never grows past end-of-file: bytes that would land beyond
//! it are dropped and the short count is returned. No locking; one owner.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::Result;

/// Default window granularity (32 KiB)
pub const DEFAULT_BLOCK_SIZE: usize = 32 * 1024;

pub struct BufferedFile<F: Read + Write + Seek = File> {
    inner: F,
    block_size: usize,
    buffer: Vec<u8>,
    buffer_offset: u64,
    loaded: bool,
}

impl BufferedFile<File> {
    /// Open an existing file for buffered positional writes
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self::with_block_size(file, DEFAULT_BLOCK_SIZE))
    }
}

impl<F: Read + Write + Seek> BufferedFile<F> {
    pub fn with_block_size(inner: F, block_size: usize) -> Self {
        Self {
            inner,
            block_size: block_size.max(1),
            buffer: Vec::new(),
            buffer_offset: 0,
            loaded: false,
        }
    }

    /// Copy `data` into the window at absolute `offset`
    ///
    /// Returns the number of bytes accepted, which is short only when the
    /// write runs past end-of-file.
    pub fn write_at(&mut self, data: &[u8], offset: u64) -> Result<usize> {
        self.ensure_window(offset, data.len())?;

        let start = (offset - self.buffer_offset) as usize;
        if start >= self.buffer.len() {
            return Ok(0);
        }
        let n = data.len().min(self.buffer.len() - start);
        self.buffer[start..start + n].copy_from_slice(&data[..n]);
        Ok(n)
    }

    /// Write the window back to the file
    pub fn flush(&mut self) -> Result<()> {
        if self.loaded && !self.buffer.is_empty() {
            self.inner.seek(SeekFrom::Start(self.buffer_offset))?;
            self.inner.write_all(&self.buffer)?;
        }
        Ok(())
    }

    /// Flush and release the file
    ///
    /// A failed flush is logged; the file is closed regardless.
    pub fn close(mut self) -> Result<F> {
        if let Err(e) = self.flush() {
            tracing::error!(error = %e, "failed to write buffer before closing");
        }
        Ok(self.inner)
    }

    // =========================================================================
    // Window management
    // =========================================================================

    fn ensure_window(&mut self, offset: u64, len: usize) -> Result<()> {
        if !self.loaded {
            return self.load(offset, len);
        }
        let lower = self.buffer_offset;
        let upper = self.buffer_offset + self.buffer.len() as u64;
        if offset < lower || offset + len as u64 > upper {
            self.flush()?;
            self.load(offset, len)?;
        }
        Ok(())
    }

    fn load(&mut self, offset: u64, len: usize) -> Result<()> {
        let block = self.block_size as u64;
        let read_offset = offset - offset % block;
        let span = (offset % block) as usize + len;
        let read_size = span.div_ceil(self.block_size).max(1) * self.block_size;

        self.buffer.clear();
        self.buffer.resize(read_size, 0);
        self.inner.seek(SeekFrom::Start(read_offset))?;

        let mut filled = 0;
        while filled < read_size {
            match self.inner.read(&mut self.buffer[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        self.buffer.truncate(filled);
        self.buffer_offset = read_offset;
        self.loaded = true;
        Ok(())
    }
}
