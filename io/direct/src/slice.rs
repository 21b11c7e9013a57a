//! Typed slices into backing files.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;

use crate::handle::FileHandle;

/// A pointer-like handle denoting (backing file, byte offset), with
/// arithmetic in element units of `T`.
///
/// Clones are cheap (one `Arc` bump) and share the backing file; the file
/// is closed when the last clone referring to it drops. Equality and
/// hashing use the backing object's identity plus the byte offset, never
/// the file contents.
pub struct FileSlice<T = u8> {
    handle: Arc<dyn FileHandle>,
    offset: u64,
    _elem: PhantomData<fn() -> T>,
}

impl<T> FileSlice<T> {
    /// A slice at `offset` bytes into `handle`.
    pub fn new(handle: Arc<dyn FileHandle>, offset: u64) -> Self {
        Self {
            handle,
            offset,
            _elem: PhantomData,
        }
    }

    /// The backing file.
    #[inline]
    pub fn handle(&self) -> &Arc<dyn FileHandle> {
        &self.handle
    }

    /// Byte offset from the start of the backing file.
    #[inline]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Stable identity of the backing object for the lifetime of the
    /// mapping. Used as the file component of cache keys.
    #[inline]
    pub fn file_id(&self) -> usize {
        Arc::as_ptr(&self.handle) as *const () as usize
    }

    /// Advance by `n` elements of `T`.
    pub fn add(&self, n: u64) -> Self {
        self.byte_add(n * std::mem::size_of::<T>() as u64)
    }

    /// Advance by `n` bytes.
    pub fn byte_add(&self, n: u64) -> Self {
        Self {
            handle: Arc::clone(&self.handle),
            offset: self.offset + n,
            _elem: PhantomData,
        }
    }

    /// Reinterpret the element type.
    pub fn cast<U>(&self) -> FileSlice<U> {
        FileSlice {
            handle: Arc::clone(&self.handle),
            offset: self.offset,
            _elem: PhantomData,
        }
    }

    /// The type-erased form used in cache keys.
    pub fn untyped(&self) -> FileSlice<u8> {
        self.cast()
    }
}

impl<T> Clone for FileSlice<T> {
    fn clone(&self) -> Self {
        Self {
            handle: Arc::clone(&self.handle),
            offset: self.offset,
            _elem: PhantomData,
        }
    }
}

impl<T> PartialEq for FileSlice<T> {
    fn eq(&self, other: &Self) -> bool {
        self.file_id() == other.file_id() && self.offset == other.offset
    }
}

impl<T> Eq for FileSlice<T> {}

impl<T> Hash for FileSlice<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.file_id().hash(state);
        self.offset.hash(state);
    }
}

impl<T> fmt::Debug for FileSlice<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:#x}+{}]", self.file_id(), self.offset)
    }
}
