//! Disk-backed file handle using asynchronous direct I/O.
//!
//! Opens files with `O_DIRECT` when the filesystem allows it and degrades
//! to buffered descriptors otherwise. On the direct path every physical
//! request must be sector-aligned; unaligned logical requests are staged
//! through a bounce buffer, with read-modify-write for partial sectors on
//! the write path and merging of strips that share a sector after
//! rounding.

use std::fs::{File, OpenOptions};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, warn};

use crate::buffer::IoBuffer;
use crate::context::{self, PhysOp};
use crate::error::Result;
use crate::handle::{FileHandle, Mode};
use crate::stride::{
    MAX_CHUNK_LEN, SECTOR_LEN, StrideInfo, is_sector_aligned, ptr_is_sector_aligned,
    round_down_sector, round_up_sector,
};

/// A [`FileHandle`] backed by a file opened for direct I/O.
pub struct DiskFile {
    file: File,
    path: PathBuf,
    len: AtomicU64,
    direct: bool,
}

impl DiskFile {
    /// Open an existing file.
    ///
    /// `Mode::Write` still opens the descriptor readable because the
    /// write-back path reads partial sectors before patching them.
    pub fn open(path: impl AsRef<Path>, mode: Mode) -> Result<Arc<Self>> {
        let mut opts = OpenOptions::new();
        match mode {
            Mode::Read => {
                opts.read(true);
            }
            Mode::Write | Mode::ReadWrite => {
                opts.read(true).write(true);
            }
        }
        Self::open_with(opts, path.as_ref(), None)
    }

    /// Create (or reuse) a read-write file of `size` bytes.
    pub fn create(path: impl AsRef<Path>, size: u64) -> Result<Arc<Self>> {
        let mut opts = OpenOptions::new();
        opts.read(true).write(true).create(true).truncate(false);
        Self::open_with(opts, path.as_ref(), Some(size))
    }

    fn open_with(opts: OpenOptions, path: &Path, size: Option<u64>) -> Result<Arc<Self>> {
        let mut direct_opts = opts.clone();
        direct_opts.custom_flags(libc::O_DIRECT);
        let (file, direct) = match direct_opts.open(path) {
            Ok(f) => (f, true),
            Err(direct_err) => match opts.open(path) {
                Ok(f) => {
                    warn!(
                        "O_DIRECT unavailable for {} ({direct_err}); using buffered I/O",
                        path.display()
                    );
                    (f, false)
                }
                Err(_) => return Err(direct_err.into()),
            },
        };
        if let Some(size) = size {
            file.set_len(size)?;
        }
        let len = file.metadata()?.len();
        debug!("opened {} ({len} bytes, direct={direct})", path.display());
        Ok(Arc::new(Self {
            file,
            path: path.to_path_buf(),
            len: AtomicU64::new(len),
            direct,
        }))
    }

    /// Whether the descriptor was opened with `O_DIRECT`.
    pub fn is_direct(&self) -> bool {
        self.direct
    }

    #[inline]
    fn fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }

    fn execute(&self, ops: &[PhysOp], is_write: bool) -> Result<()> {
        context::with_context(|ctx| ctx.execute(self.fd(), ops, is_write))
    }
}

/// Split `[file_off, file_off + total)` into physical requests of at most
/// [`MAX_CHUNK_LEN`] bytes each.
fn push_chunked(ops: &mut Vec<PhysOp>, file_off: u64, ptr: *mut u8, total: u64) {
    let mut done = 0u64;
    while done < total {
        let sz = (total - done).min(MAX_CHUNK_LEN);
        ops.push(PhysOp {
            offset: file_off + done,
            len: sz as usize,
            // SAFETY: callers guarantee ptr..ptr+total is a live allocation.
            ptr: unsafe { ptr.add(done as usize) },
        });
        done += sz;
    }
}

impl FileHandle for DiskFile {
    fn len(&self) -> u64 {
        self.len.load(Ordering::Acquire)
    }

    fn path(&self) -> Option<&Path> {
        Some(&self.path)
    }

    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        if buf.is_empty() {
            warn!("zero length read");
            return Ok(());
        }
        let len = buf.len() as u64;

        if !self.direct {
            let mut ops = Vec::new();
            push_chunked(&mut ops, offset, buf.as_mut_ptr(), len);
            return self.execute(&ops, false);
        }

        let start = round_down_sector(offset);
        let end = round_up_sector(offset + len);
        let aligned =
            start == offset && end == offset + len && ptr_is_sector_aligned(buf.as_ptr());

        if aligned {
            let mut ops = Vec::new();
            push_chunked(&mut ops, start, buf.as_mut_ptr(), len);
            self.execute(&ops, false)
        } else {
            let phys = end - start;
            let bounce = IoBuffer::alloc(phys as usize);
            let mut lease = bounce.write();
            let mut ops = Vec::new();
            push_chunked(&mut ops, start, lease.as_mut_ptr(), phys);
            self.execute(&ops, false)?;
            buf.copy_from_slice(&lease[(offset - start) as usize..][..len as usize]);
            Ok(())
        }
    }

    fn write(&self, offset: u64, buf: &[u8]) -> Result<()> {
        if buf.is_empty() {
            warn!("zero length write");
            return Ok(());
        }
        let len = buf.len() as u64;

        if !self.direct {
            let mut ops = Vec::new();
            push_chunked(&mut ops, offset, buf.as_ptr() as *mut u8, len);
            return self.execute(&ops, true);
        }

        let start = round_down_sector(offset);
        let end = round_up_sector(offset + len);
        let aligned = start == offset && end == offset + len && ptr_is_sector_aligned(buf.as_ptr());

        if aligned {
            let mut ops = Vec::new();
            push_chunked(&mut ops, start, buf.as_ptr() as *mut u8, len);
            return self.execute(&ops, true);
        }

        // Read-modify-write: fetch the partial head and tail sectors,
        // patch the payload over them, write the rounded range back.
        let phys = end - start;
        let bounce = IoBuffer::alloc(phys as usize);
        let mut lease = bounce.write();
        let base = lease.as_mut_ptr();

        let mut pre = Vec::new();
        let head_partial = !is_sector_aligned(offset);
        let tail_partial = !is_sector_aligned(offset + len);
        if head_partial {
            pre.push(PhysOp {
                offset: start,
                len: SECTOR_LEN as usize,
                ptr: base,
            });
        }
        if tail_partial {
            let tail = end - SECTOR_LEN;
            // The head and tail may be the same sector.
            if !(head_partial && tail == start) {
                pre.push(PhysOp {
                    offset: tail,
                    len: SECTOR_LEN as usize,
                    // SAFETY: tail - start < phys, within the bounce.
                    ptr: unsafe { base.add((tail - start) as usize) },
                });
            }
        }
        if !pre.is_empty() {
            self.execute(&pre, false)?;
        }

        lease[(offset - start) as usize..][..len as usize].copy_from_slice(buf);

        let mut ops = Vec::new();
        push_chunked(&mut ops, start, base, phys);
        self.execute(&ops, true)
    }

    fn sread(&self, offset: u64, sinfo: StrideInfo, buf: &mut [u8]) -> Result<()> {
        debug_assert!(sinfo.n_strides >= 1, "n_strides must be >= 1");
        debug_assert!(sinfo.len_per_stride <= sinfo.stride, "bad stride info");
        if sinfo.len_per_stride == 0 {
            warn!("zero length sread");
            return Ok(());
        }
        let lps = sinfo.len_per_stride;
        if sinfo.is_contiguous() {
            return self.read(offset, &mut buf[..lps as usize]);
        }
        let n = sinfo.n_strides as usize;
        debug_assert!(buf.len() as u64 >= sinfo.buffer_len());

        let aligned = self.direct
            && ptr_is_sector_aligned(buf.as_ptr())
            && is_sector_aligned(lps)
            && is_sector_aligned(offset)
            && is_sector_aligned(sinfo.stride);

        if !self.direct || aligned {
            // Each strip lands directly at its packed position.
            let mut ops = Vec::new();
            for k in 0..n {
                // SAFETY: k * lps + lps <= buffer_len <= buf.len().
                let dst = unsafe { buf.as_mut_ptr().add(k * lps as usize) };
                push_chunked(&mut ops, offset + k as u64 * sinfo.stride, dst, lps);
            }
            return self.execute(&ops, false);
        }

        // Unaligned: fetch each strip's rounded range into a bounce
        // buffer, then pack.
        let mut starts = Vec::with_capacity(n);
        let mut buf_offsets = Vec::with_capacity(n);
        let mut total = 0u64;
        for k in 0..n {
            let s = offset + k as u64 * sinfo.stride;
            let start = round_down_sector(s);
            let end = round_up_sector(s + lps);
            starts.push(start);
            buf_offsets.push(total);
            total += end - start;
        }

        let bounce = IoBuffer::alloc(total as usize);
        let mut lease = bounce.write();
        let base = lease.as_mut_ptr();
        let mut ops = Vec::new();
        for k in 0..n {
            let end = round_up_sector(offset + k as u64 * sinfo.stride + lps);
            // SAFETY: buf_offsets[k] + size <= total.
            let dst = unsafe { base.add(buf_offsets[k] as usize) };
            push_chunked(&mut ops, starts[k], dst, end - starts[k]);
        }
        self.execute(&ops, false)?;

        for k in 0..n {
            let s = offset + k as u64 * sinfo.stride;
            let delta = (s - starts[k]) as usize;
            let src = (buf_offsets[k] as usize) + delta;
            buf[k * lps as usize..][..lps as usize].copy_from_slice(&lease[src..][..lps as usize]);
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
        let lps = sinfo.len_per_stride;
        if sinfo.is_contiguous() {
            return self.write(offset, &buf[..lps as usize]);
        }
        let n = sinfo.n_strides as usize;
        debug_assert!(buf.len() as u64 >= sinfo.buffer_len());

        let aligned = self.direct
            && ptr_is_sector_aligned(buf.as_ptr())
            && is_sector_aligned(lps)
            && is_sector_aligned(offset)
            && is_sector_aligned(sinfo.stride);

        if !self.direct || aligned {
            let mut ops = Vec::new();
            for k in 0..n {
                // SAFETY: k * lps + lps <= buffer_len <= buf.len().
                let src = unsafe { buf.as_ptr().add(k * lps as usize) as *mut u8 };
                push_chunked(&mut ops, offset + k as u64 * sinfo.stride, src, lps);
            }
            return self.execute(&ops, true);
        }

        // Rounded strip ranges.
        let mut starts = Vec::with_capacity(n);
        let mut ends = Vec::with_capacity(n);
        for k in 0..n {
            let s = offset + k as u64 * sinfo.stride;
            starts.push(round_down_sector(s));
            ends.push(round_up_sector(s + lps));
        }

        // Adjacent strips sharing a sector after rounding must be merged
        // into one read-modify-write block or the second write would
        // clobber the first.
        let merge_required = (0..n - 1).any(|k| ends[k] > starts[k + 1]);

        if !merge_required {
            let mut buf_offsets = Vec::with_capacity(n);
            let mut total = 0u64;
            for k in 0..n {
                buf_offsets.push(total);
                total += ends[k] - starts[k];
            }
            let bounce = IoBuffer::alloc(total as usize);
            let mut lease = bounce.write();
            let base = lease.as_mut_ptr();

            // Pre-read. Strips of three sectors or more only need their
            // partial head and tail sectors; the payload fully covers the
            // middle.
            let mut pre = Vec::new();
            if lps >= 3 * SECTOR_LEN {
                for k in 0..n {
                    let size = ends[k] - starts[k];
                    // SAFETY: offsets below are within the bounce.
                    pre.push(PhysOp {
                        offset: starts[k],
                        len: SECTOR_LEN as usize,
                        ptr: unsafe { base.add(buf_offsets[k] as usize) },
                    });
                    pre.push(PhysOp {
                        offset: ends[k] - SECTOR_LEN,
                        len: SECTOR_LEN as usize,
                        ptr: unsafe { base.add((buf_offsets[k] + size - SECTOR_LEN) as usize) },
                    });
                }
            } else {
                for k in 0..n {
                    let dst = unsafe { base.add(buf_offsets[k] as usize) };
                    push_chunked(&mut pre, starts[k], dst, ends[k] - starts[k]);
                }
            }
            self.execute(&pre, false)?;

            // Patch payloads over the fetched sectors.
            for k in 0..n {
                let s = offset + k as u64 * sinfo.stride;
                let dst = (buf_offsets[k] + (s - starts[k])) as usize;
                lease[dst..][..lps as usize].copy_from_slice(&buf[k * lps as usize..][..lps as usize]);
            }

            let mut ops = Vec::new();
            for k in 0..n {
                let src = unsafe { base.add(buf_offsets[k] as usize) };
                push_chunked(&mut ops, starts[k], src, ends[k] - starts[k]);
            }
            return self.execute(&ops, true);
        }

        // Merged blocks: group strips whose rounded ranges touch.
        struct Block {
            start: u64,
            end: u64,
            strips: std::ops::Range<usize>,
        }
        let mut blocks: Vec<Block> = Vec::new();
        let mut cur = Block {
            start: starts[0],
            end: ends[0],
            strips: 0..1,
        };
        for k in 1..n {
            if starts[k] < cur.end {
                cur.end = ends[k];
                cur.strips.end = k + 1;
            } else {
                blocks.push(cur);
                cur = Block {
                    start: starts[k],
                    end: ends[k],
                    strips: k..k + 1,
                };
            }
        }
        blocks.push(cur);

        let mut blk_offsets = Vec::with_capacity(blocks.len());
        let mut total = 0u64;
        for b in &blocks {
            blk_offsets.push(total);
            total += b.end - b.start;
        }
        let bounce = IoBuffer::alloc(total as usize);
        let mut lease = bounce.write();
        let base = lease.as_mut_ptr();

        let mut pre = Vec::new();
        for (b, &bo) in blocks.iter().zip(&blk_offsets) {
            // SAFETY: bo + block size <= total.
            let dst = unsafe { base.add(bo as usize) };
            push_chunked(&mut pre, b.start, dst, b.end - b.start);
        }
        self.execute(&pre, false)?;

        for (b, &bo) in blocks.iter().zip(&blk_offsets) {
            for k in b.strips.clone() {
                let s = offset + k as u64 * sinfo.stride;
                let dst = (bo + (s - b.start)) as usize;
                lease[dst..][..lps as usize].copy_from_slice(&buf[k * lps as usize..][..lps as usize]);
            }
        }

        let mut ops = Vec::new();
        for (b, &bo) in blocks.iter().zip(&blk_offsets) {
            let src = unsafe { base.add(bo as usize) };
            push_chunked(&mut ops, b.start, src, b.end - b.start);
        }
        self.execute(&ops, true)
    }

    fn truncate(&self, new_len: u64) -> Result<()> {
        self.file.set_len(new_len)?;
        self.len.store(new_len, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{deregister_thread, register_thread};
    use tempfile::tempdir;

    fn with_file<F: FnOnce(&DiskFile)>(size: u64, f: F) {
        register_thread().unwrap();
        let dir = tempdir().unwrap();
        let file = DiskFile::create(dir.path().join("t.dat"), size).unwrap();
        f(&file);
        drop(file);
        deregister_thread().unwrap();
    }

    #[test]
    fn test_aligned_roundtrip() {
        with_file(1 << 20, |f| {
            let buf = IoBuffer::alloc(8192);
            buf.write().iter_mut().enumerate().for_each(|(i, b)| *b = (i % 255) as u8);
            {
                let lease = buf.read();
                f.write(4096, &lease).unwrap();
            }
            let out = IoBuffer::alloc(8192);
            {
                let mut lease = out.write();
                f.read(4096, &mut lease).unwrap();
            }
            assert_eq!(&*buf.read(), &*out.read());
        });
    }

    #[test]
    fn test_unaligned_roundtrip() {
        with_file(1 << 20, |f| {
            let payload: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
            f.write(123, &payload).unwrap();
            let mut out = vec![0u8; 1000];
            f.read(123, &mut out).unwrap();
            assert_eq!(out, payload);
        });
    }

    #[test]
    fn test_unaligned_write_preserves_neighbors() {
        with_file(1 << 16, |f| {
            let before: Vec<u8> = (0..4096u32).map(|i| (i % 199) as u8).collect();
            f.write(0, &before).unwrap();
            // Overwrite a range in the middle of a sector.
            f.write(700, &[0xAA; 100]).unwrap();
            let mut out = vec![0u8; 4096];
            f.read(0, &mut out).unwrap();
            assert_eq!(&out[..700], &before[..700]);
            assert!(out[700..800].iter().all(|&b| b == 0xAA));
            assert_eq!(&out[800..], &before[800..]);
        });
    }

    #[test]
    fn test_strided_roundtrip_with_sector_sharing() {
        with_file(1 << 16, |f| {
            // Strips share sectors after rounding, forcing the merge path.
            let sinfo = StrideInfo::strided(300, 16, 100);
            let payload: Vec<u8> = (0..sinfo.buffer_len() as usize)
                .map(|i| (i % 253) as u8)
                .collect();
            f.swrite(50, sinfo, &payload).unwrap();
            let mut out = vec![0u8; payload.len()];
            f.sread(50, sinfo, &mut out).unwrap();
            assert_eq!(out, payload);
        });
    }

    #[test]
    fn test_strided_disjoint_strips() {
        with_file(1 << 18, |f| {
            // Rounded strips are disjoint; exercises the per-strip path.
            let sinfo = StrideInfo::strided(8192, 8, 2048);
            let payload: Vec<u8> = (0..sinfo.buffer_len() as usize)
                .map(|i| (i % 241) as u8)
                .collect();
            f.swrite(1024, sinfo, &payload).unwrap();
            let mut out = vec![0u8; payload.len()];
            f.sread(1024, sinfo, &mut out).unwrap();
            assert_eq!(out, payload);
        });
    }

    #[test]
    fn test_truncate_updates_len() {
        with_file(4096, |f| {
            assert_eq!(f.len(), 4096);
            f.truncate(8192).unwrap();
            assert_eq!(f.len(), 8192);
        });
    }
}
