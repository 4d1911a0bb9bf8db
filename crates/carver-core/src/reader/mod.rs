//! Bounded block-window file access.
//!
//! Every scan in carver pulls its data through a [`BoundedReader`]. The reader
//! exposes a logical view `[offset, offset + length)` of an underlying file and
//! never hands out bytes outside that view, except for the look-ahead produced
//! by [`BoundedReader::peek`].
//!
//! ## Blocks and peeking
//!
//! Scanners consume the view one block at a time with
//! [`BoundedReader::read_block`]. Each block is followed by up to `peek_size`
//! bytes of look-ahead so a pattern that straddles two blocks is still visible
//! in one buffer:
//!
//! ```text
//!   block N                      peek
//! |=============================|.....|
//!                               ^ consumed length
//! ```
//!
//! The peek bytes are context only. The cursor advances by the consumed length,
//! so the same bytes come back as the head of block `N + 1`.

mod swap;

use crate::error::{Error, Result};
use crate::finding::FileInfo;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};

pub use swap::swap_groups;

/// Default number of bytes returned by [`BoundedReader::read_block`]
pub const DEFAULT_BLOCK_SIZE: usize = 1024 * 1024;

/// Default number of look-ahead bytes appended to each block
pub const DEFAULT_PEEK_SIZE: usize = 8 * 1024;

/// Reference point for [`BoundedReader::seek`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    /// Absolute position in the underlying file
    Start,
    /// Relative to the logical cursor
    Current,
    /// Relative to the end of the underlying file
    End,
}

/// Geometry of a reader's logical view
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderOptions {
    /// Start of the view; negative values count back from the end of the file
    pub offset: i64,
    /// Bytes visible in the view (0 = everything after `offset`)
    pub length: u64,
    /// Size of the consumed portion of each block
    pub block_size: usize,
    /// Size of the look-ahead appended to each block
    pub peek_size: usize,
    /// Width of byte groups to reverse (0 = no swapping)
    pub swap_size: usize,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            offset: 0,
            length: 0,
            block_size: DEFAULT_BLOCK_SIZE,
            peek_size: DEFAULT_PEEK_SIZE,
            swap_size: 0,
        }
    }
}

impl ReaderOptions {
    /// Creates options with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the view offset
    pub fn offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }

    /// Sets the view length
    pub fn length(mut self, length: u64) -> Self {
        self.length = length;
        self
    }

    /// Sets the block size
    pub fn block_size(mut self, size: usize) -> Self {
        self.block_size = size;
        self
    }

    /// Sets the peek size
    pub fn peek_size(mut self, size: usize) -> Self {
        self.peek_size = size;
        self
    }

    /// Sets the byte-swap group width
    pub fn swap_size(mut self, size: usize) -> Self {
        self.swap_size = size;
        self
    }
}

/// A file handle restricted to a logical window of the underlying data.
///
/// The reader is generic over its transport so tests can substitute readers
/// that return short reads; production code uses [`File`].
#[derive(Debug)]
pub struct BoundedReader<T = File> {
    path: PathBuf,
    inner: T,
    /// Underlying size, `None` when it could not be determined
    size: Option<u64>,
    offset: u64,
    length: u64,
    /// Logical cursor relative to `offset`
    total_read: u64,
    block_size: usize,
    peek_size: usize,
    base_block_size: usize,
    base_peek_size: usize,
    swap_size: usize,
}

impl BoundedReader<File> {
    /// Opens `path` for reading with the given view geometry
    pub fn open(path: impl AsRef<Path>, options: &ReaderOptions) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| Error::io(path, e))?;

        let size = match file.metadata() {
            Ok(meta) => Some(meta.len()),
            Err(e) => {
                warn!("Could not determine size of {}: {}", path.display(), e);
                None
            }
        };

        Self::from_transport(path, file, size, options)
    }

    /// Creates (or truncates) `path` for writing
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| Error::io(path, e))?;

        Self::from_transport(path, file, Some(0), &ReaderOptions::default())
    }
}

impl<T: Read + Seek> BoundedReader<T> {
    /// Wraps an arbitrary transport.
    ///
    /// `size` is the size of the underlying data; pass `None` when unknown,
    /// which disables size-dependent clamping.
    pub fn from_transport(
        path: impl Into<PathBuf>,
        inner: T,
        size: Option<u64>,
        options: &ReaderOptions,
    ) -> Result<Self> {
        let (offset, length) = clamp_view(size, options.offset, options.length);

        let mut reader = Self {
            path: path.into(),
            inner,
            size,
            offset,
            length,
            total_read: 0,
            block_size: options.block_size.max(1),
            peek_size: options.peek_size,
            base_block_size: options.block_size.max(1),
            base_peek_size: options.peek_size,
            swap_size: options.swap_size,
        };

        reader.seek(offset as i64, Whence::Start)?;

        trace!(
            "Opened {} view {:#x}+{:#x} (size {:?})",
            reader.path.display(),
            offset,
            length,
            size
        );

        Ok(reader)
    }

    /// Reads up to `n` bytes without crossing the end of the logical view
    pub fn read(&mut self, n: usize) -> Result<Vec<u8>> {
        self.read_bounded(n, false)
    }

    /// Returns up to `n` bytes from the cursor without consuming them.
    ///
    /// The look-ahead ignores the logical length and stops only at the end of
    /// the underlying data.
    pub fn peek(&mut self, n: usize) -> Result<Vec<u8>> {
        let saved = self.total_read;
        let data = self.read_bounded(n, true)?;
        self.seek_logical(saved)?;
        Ok(data)
    }

    /// Reads one block plus its look-ahead.
    ///
    /// Returns the buffer and the number of bytes that belong to the block
    /// proper. Bytes past that length are look-ahead and will be returned
    /// again by the next call.
    pub fn read_block(&mut self) -> Result<(Vec<u8>, usize)> {
        let mut data = self.read(self.block_size)?;
        let consumed = data.len();

        if self.peek_size > 0 && consumed > 0 {
            data.extend(self.peek(self.peek_size)?);
        }

        Ok((data, consumed))
    }

    /// Moves the logical cursor
    pub fn seek(&mut self, pos: i64, whence: Whence) -> Result<()> {
        let target = match whence {
            Whence::Start => pos - self.offset as i64,
            Whence::Current => self.total_read as i64 + pos,
            Whence::End => self.size.unwrap_or(0) as i64 + pos,
        };
        self.seek_logical(target.max(0) as u64)
    }

    /// Rewinds the cursor and restores the base block and peek sizes
    pub fn reset(&mut self) -> Result<()> {
        self.block_size = self.base_block_size;
        self.peek_size = self.base_peek_size;
        self.seek_logical(0)
    }

    fn seek_logical(&mut self, logical: u64) -> Result<()> {
        let absolute = self.offset.saturating_add(logical);
        self.inner
            .seek(SeekFrom::Start(absolute))
            .map_err(|e| Error::io(&self.path, e))?;
        self.total_read = logical;
        Ok(())
    }

    fn read_bounded(&mut self, n: usize, override_length: bool) -> Result<Vec<u8>> {
        let wanted = if override_length {
            n as u64
        } else {
            (n as u64).min(self.length.saturating_sub(self.total_read))
        };

        let mut data = vec![0u8; wanted as usize];
        let mut filled = 0;

        // Short reads are retried until the request is met or the transport runs dry
        while filled < data.len() {
            match self.inner.read(&mut data[filled..]) {
                Ok(0) => break,
                Ok(count) => filled += count,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::io(&self.path, e)),
            }
        }

        data.truncate(filled);
        self.total_read += filled as u64;

        if self.swap_size > 0 {
            swap_groups(&mut data, self.swap_size);
        }

        Ok(data)
    }
}

impl<T: Write> BoundedReader<T> {
    /// Writes all of `data`, returning the number of bytes written
    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        let mut written = 0;

        while written < data.len() {
            match self.inner.write(&data[written..]) {
                Ok(0) => {
                    return Err(Error::io(
                        &self.path,
                        std::io::Error::new(ErrorKind::WriteZero, "transport accepted no bytes"),
                    ))
                }
                Ok(count) => written += count,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::io(&self.path, e)),
            }
        }

        self.total_read += written as u64;
        Ok(written)
    }

    /// Flushes buffered data to the transport
    pub fn flush(&mut self) -> Result<()> {
        self.inner.flush().map_err(|e| Error::io(&self.path, e))
    }
}

impl<T> BoundedReader<T> {
    /// Path this reader was opened from
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Final component of the path, for display
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }

    /// Size of the underlying data (0 when unknown)
    pub fn size(&self) -> u64 {
        self.size.unwrap_or(0)
    }

    /// Absolute start of the logical view
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Length of the logical view
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Bytes consumed from the view so far
    pub fn total_read(&self) -> u64 {
        self.total_read
    }

    /// Absolute position of the cursor in the underlying data
    pub fn tell(&self) -> u64 {
        self.offset + self.total_read
    }

    /// Current block size
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Current peek size
    pub fn peek_size(&self) -> usize {
        self.peek_size
    }

    /// Overrides the block size until the next [`reset`](Self::reset)
    pub fn set_block_size(&mut self, size: usize) {
        self.block_size = size.max(1);
    }

    /// Overrides the peek size until the next [`reset`](Self::reset)
    pub fn set_peek_size(&mut self, size: usize) {
        self.peek_size = size;
    }

    /// Byte-swap group width
    pub fn swap_size(&self) -> usize {
        self.swap_size
    }

    /// Describes the underlying file for findings
    pub fn file_info(&self) -> FileInfo {
        FileInfo::new(self.path.clone(), self.size())
    }
}

impl<T> Drop for BoundedReader<T> {
    fn drop(&mut self) {
        debug!("Closing {}", self.path.display());
    }
}

/// Clamps a requested view into the underlying data.
///
/// Returns the absolute `(offset, length)` of the view. With an unknown size
/// the offset is only floored at zero and the length is left unbounded.
fn clamp_view(size: Option<u64>, offset: i64, length: u64) -> (u64, u64) {
    let Some(size) = size else {
        let length = if length == 0 { u64::MAX } else { length };
        return (offset.max(0) as u64, length);
    };

    let start = if offset < 0 {
        (size as i64 + offset).max(0) as u64
    } else {
        (offset as u64).min(size)
    };

    let available = size - start;
    let requested = if length > 0 {
        length
    } else if offset < 0 {
        offset.unsigned_abs()
    } else {
        available
    };

    (start, requested.min(available))
}
