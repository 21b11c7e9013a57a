//! Direct-I/O file handles with strided access patterns.
//!
//! This crate provides the leaf I/O abstraction used by the out-of-core
//! engine:
//!
//! - **[`StrideInfo`]**: a regular access pattern within a file (stride,
//!   strip count, bytes per strip); a contiguous access is the special
//!   case of one strip
//! - **[`FileSlice`]**: a cheap, typed handle denoting (backing file,
//!   byte offset) with element-unit arithmetic
//! - **[`FileHandle`]**: the polymorphic backend trait with two
//!   implementations, [`DiskFile`] (io_uring + `O_DIRECT`) and
//!   [`MemFile`] (in-memory, used for tests and already-resident inputs)
//! - **[`IoBuffer`]**: a sector-aligned allocation with dynamic lease
//!   guards for shared/exclusive access
//! - **per-thread submission context**: every thread that issues disk I/O
//!   must call [`register_thread`] first
//!
//! # Alignment contract
//!
//! Callers may pass arbitrary offsets, lengths, and buffer addresses.
//! [`DiskFile`] internally aligns to the 512-byte sector: unaligned
//! requests go through a bounce buffer, partial sectors are handled with
//! read-modify-write on the write path, and strided writes whose strips
//! share a sector after rounding are merged into a single
//! read-modify-write block. Contiguous requests larger than 32 MiB are
//! split into multiple physical requests.
//!
//! # Threading
//!
//! Handles are `Send + Sync` and may be shared freely. The submission
//! context is thread-local: a thread that has not registered gets
//! [`Error::NotRegistered`] from any [`DiskFile`] operation.

mod buffer;
mod context;
mod disk;
mod error;
mod handle;
mod mem;
mod slice;
mod stride;

pub use buffer::{IoBuffer, ReadLease, WriteLease};
pub use context::{deregister_thread, register_thread, thread_registered};
pub use disk::DiskFile;
pub use error::{Error, Result};
pub use handle::{FileHandle, Mode};
pub use mem::MemFile;
pub use slice::FileSlice;
pub use stride::{
    MAX_CHUNK_LEN, SECTOR_LEN, StrideInfo, is_sector_aligned, round_down_sector, round_up_sector,
};
