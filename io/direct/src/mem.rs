//! In-memory file backing.

use parking_lot::RwLock;
use std::path::Path;
use tracing::warn;

use crate::error::{Error, Result};
use crate::handle::FileHandle;
use crate::stride::StrideInfo;

/// A [`FileHandle`] backed by heap memory.
///
/// Used for tests and for inputs that are already resident. There are no
/// alignment constraints; all offsets and lengths are byte-exact, and
/// requests beyond the backing return [`Error::OutOfBounds`].
pub struct MemFile {
    data: RwLock<Vec<u8>>,
}

impl MemFile {
    /// A zero-filled backing of `size` bytes.
    pub fn new(size: usize) -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self {
            data: RwLock::new(vec![0u8; size]),
        })
    }

    /// A backing initialized from `data`.
    pub fn from_vec(data: Vec<u8>) -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self {
            data: RwLock::new(data),
        })
    }

    fn check(&self, offset: u64, len: u64) -> Result<()> {
        let size = self.data.read().len() as u64;
        if offset + len > size {
            return Err(Error::OutOfBounds { offset, len, size });
        }
        Ok(())
    }
}

impl FileHandle for MemFile {
    fn len(&self) -> u64 {
        self.data.read().len() as u64
    }

    fn path(&self) -> Option<&Path> {
        None
    }

    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        if buf.is_empty() {
            warn!("zero length read");
            return Ok(());
        }
        self.check(offset, buf.len() as u64)?;
        let data = self.data.read();
        buf.copy_from_slice(&data[offset as usize..][..buf.len()]);
        Ok(())
    }

    fn write(&self, offset: u64, buf: &[u8]) -> Result<()> {
        if buf.is_empty() {
            warn!("zero length write");
            return Ok(());
        }
        self.check(offset, buf.len() as u64)?;
        let mut data = self.data.write();
        data[offset as usize..][..buf.len()].copy_from_slice(buf);
        Ok(())
    }

    fn sread(&self, offset: u64, sinfo: StrideInfo, buf: &mut [u8]) -> Result<()> {
        debug_assert!(sinfo.n_strides >= 1, "n_strides must be >= 1");
        debug_assert!(sinfo.len_per_stride <= sinfo.stride, "bad stride info");
        if sinfo.len_per_stride == 0 {
            warn!("zero length sread");
            return Ok(());
        }
        self.check(offset, sinfo.span())?;
        let lps = sinfo.len_per_stride as usize;
        let data = self.data.read();
        for k in 0..sinfo.n_strides as usize {
            let src = (offset + k as u64 * sinfo.stride) as usize;
            buf[k * lps..][..lps].copy_from_slice(&data[src..][..lps]);
        }
        Ok(())
    }

    fn swrite(&self, offset: u64, sinfo: StrideInfo, buf: &[u8]) -> Result<()> {
        debug_assert!(sinfo.n_strides >= 1, "n_strides must be >= 1");
        debug_assert!(sinfo.len_per_stride <= sinfo.stride, "bad stride info");
        if sinfo.len_per_stride == 0 {
            warn!("zero length swrite");
            return Ok(());
        }
        self.check(offset, sinfo.span())?;
        let lps = sinfo.len_per_stride as usize;
        let mut data = self.data.write();
        for k in 0..sinfo.n_strides as usize {
            let dst = (offset + k as u64 * sinfo.stride) as usize;
            data[dst..][..lps].copy_from_slice(&buf[k * lps..][..lps]);
        }
        Ok(())
    }

    fn truncate(&self, new_len: u64) -> Result<()> {
        self.data.write().resize(new_len as usize, 0);
        Ok(())
    }
}
