use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use memmap2::MmapOptions;
use tracing::trace;

use crate::error::IoError;

use super::RangeReader;

/// A file read by mapping exactly the requested range for each read.
///
/// Nothing beyond the requested range is mapped or buffered, so a reader over
/// a multi-gigabyte container costs a file handle and nothing else. The file
/// may still be growing (a container being written): a read past the last
/// known end re-checks the size once before failing.
#[derive(Debug)]
pub struct MappedFile {
    file: File,
    path: PathBuf,
    name: String,
    size: AtomicU64,
}

impl MappedFile {
    /// Open a file for positioned reads.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, IoError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            file,
            name: path.display().to_string(),
            path,
            size: AtomicU64::new(size),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the file length from the filesystem.
    pub fn refresh_size(&self) -> Result<u64, IoError> {
        let size = self.file.metadata()?.len();
        self.size.store(size, Ordering::Release);
        Ok(size)
    }

    fn ensure_in_bounds(&self, offset: u64, len: usize) -> Result<(), IoError> {
        let end = offset
            .checked_add(len as u64)
            .ok_or(IoError::RangeOutOfBounds {
                offset,
                requested: len as u64,
                size: self.size(),
            })?;
        if end <= self.size() {
            return Ok(());
        }
        let size = self.refresh_size()?;
        if end <= size {
            Ok(())
        } else {
            Err(IoError::RangeOutOfBounds {
                offset,
                requested: len as u64,
                size,
            })
        }
    }
}

impl RangeReader for MappedFile {
    fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        if len == 0 {
            return Ok(Bytes::new());
        }
        self.ensure_in_bounds(offset, len)?;

        // SAFETY: the range was bounds-checked against the current file length.
        // Container files are only ever appended to or patched in place while
        // mapped, never truncated.
        let map = unsafe { MmapOptions::new().offset(offset).len(len).map(&self.file)? };
        trace!(path = %self.name, offset, len, "mapped range");
        Ok(Bytes::copy_from_slice(&map[..]))
    }

    fn size(&self) -> u64 {
        self.size.load(Ordering::Acquire)
    }

    fn identifier(&self) -> &str {
        &self.name
    }
}
