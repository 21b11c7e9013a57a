//! The polymorphic file backend trait.

use std::path::Path;

use crate::error::{Error, Result};
use crate::stride::{MAX_CHUNK_LEN, StrideInfo};

/// File access modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Read-only.
    Read,
    /// Write-only.
    Write,
    /// Read and write.
    ReadWrite,
}

/// A byte-addressable backing store.
///
/// Two implementations exist: [`crate::DiskFile`] (direct I/O against a
/// block device) and [`crate::MemFile`] (in-memory, for tests and
/// already-resident inputs). All operations are blocking; completion
/// notification is layered on top by the I/O executor.
///
/// Strided operations move a *packed* buffer (no gaps) to or from a
/// *strided* file layout described by [`StrideInfo`].
pub trait FileHandle: Send + Sync {
    /// Current backing size in bytes.
    fn len(&self) -> u64;

    /// True if the backing is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Filesystem path of the backing, if it has one.
    fn path(&self) -> Option<&Path>;

    /// Read `buf.len()` bytes starting at `offset`.
    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Write `buf.len()` bytes starting at `offset`.
    fn write(&self, offset: u64, buf: &[u8]) -> Result<()>;

    /// Gather `sinfo.buffer_len()` bytes laid out per `sinfo` (relative
    /// to `offset`) into the packed `buf`.
    fn sread(&self, offset: u64, sinfo: StrideInfo, buf: &mut [u8]) -> Result<()>;

    /// Scatter the packed `buf` into the file per `sinfo` (relative to
    /// `offset`).
    fn swrite(&self, offset: u64, sinfo: StrideInfo, buf: &[u8]) -> Result<()>;

    /// Grow or shrink the backing to `new_len` bytes.
    fn truncate(&self, _new_len: u64) -> Result<()> {
        Err(Error::Unsupported("truncate"))
    }

    /// Copy `len` bytes from `self` at `self_offset` to `dest` at
    /// `dest_offset`, staging through memory one chunk at a time.
    fn copy_to(
        &self,
        self_offset: u64,
        dest: &dyn FileHandle,
        dest_offset: u64,
        len: u64,
    ) -> Result<()> {
        let mut staged = 0u64;
        while staged < len {
            let chunk = (len - staged).min(MAX_CHUNK_LEN) as usize;
            let mut buf = vec![0u8; chunk];
            self.read(self_offset + staged, &mut buf)?;
            dest.write(dest_offset + staged, &buf)?;
            staged += chunk as u64;
        }
        Ok(())
    }

    /// Copy a strided region from `self` to the same-shaped region of
    /// `dest`, staging through memory.
    fn scopy_to(
        &self,
        self_offset: u64,
        dest: &dyn FileHandle,
        dest_offset: u64,
        sinfo: StrideInfo,
    ) -> Result<()> {
        let mut buf = vec![0u8; sinfo.buffer_len() as usize];
        self.sread(self_offset, sinfo, &mut buf)?;
        dest.swrite(dest_offset, sinfo, &buf)?;
        Ok(())
    }
}
