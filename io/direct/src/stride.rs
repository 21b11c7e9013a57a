//! Access-pattern description and sector arithmetic.

use std::fmt;

/// Disk sector length. Direct I/O requires offsets, lengths, and buffer
/// addresses aligned to this.
pub const SECTOR_LEN: u64 = 512;

/// Largest single physical request. Logical requests beyond this are
/// split; some devices prefer many smaller requests over one large one.
pub const MAX_CHUNK_LEN: u64 = 1 << 25; // 32 MiB

/// Round `x` up to the next multiple of [`SECTOR_LEN`].
#[inline]
pub fn round_up_sector(x: u64) -> u64 {
    x.div_ceil(SECTOR_LEN) * SECTOR_LEN
}

/// Round `x` down to a multiple of [`SECTOR_LEN`].
#[inline]
pub fn round_down_sector(x: u64) -> u64 {
    (x / SECTOR_LEN) * SECTOR_LEN
}

/// Whether `x` is a multiple of [`SECTOR_LEN`].
#[inline]
pub fn is_sector_aligned(x: u64) -> bool {
    x % SECTOR_LEN == 0
}

#[inline]
pub(crate) fn ptr_is_sector_aligned(p: *const u8) -> bool {
    (p as usize) as u64 % SECTOR_LEN == 0
}

/// A regular access pattern within a file: `n_strides` strips of
/// `len_per_stride` bytes, the start of each strip `stride` bytes apart.
///
/// Invariants: `len_per_stride <= stride` and `n_strides >= 1`. A
/// contiguous access is the special case `n_strides == 1`.
///
/// The packed in-memory footprint of the pattern is
/// `n_strides * len_per_stride` bytes; the file span it touches is
/// `(n_strides - 1) * stride + len_per_stride`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StrideInfo {
    /// Distance between strip starts in the file.
    pub stride: u64,
    /// Number of strips.
    pub n_strides: u64,
    /// Bytes per strip.
    pub len_per_stride: u64,
}

impl StrideInfo {
    /// A contiguous access of `len` bytes.
    pub fn contiguous(len: u64) -> Self {
        Self {
            stride: len,
            n_strides: 1,
            len_per_stride: len,
        }
    }

    /// A strided access. Panics in debug builds if the invariants do not
    /// hold.
    pub fn strided(stride: u64, n_strides: u64, len_per_stride: u64) -> Self {
        debug_assert!(n_strides >= 1, "n_strides must be >= 1");
        debug_assert!(
            len_per_stride <= stride,
            "len_per_stride {len_per_stride} > stride {stride}"
        );
        Self {
            stride,
            n_strides,
            len_per_stride,
        }
    }

    /// Packed buffer footprint of this pattern in bytes.
    #[inline]
    pub fn buffer_len(&self) -> u64 {
        self.n_strides * self.len_per_stride
    }

    /// Bytes of file spanned from the pattern start to the end of the
    /// last strip.
    #[inline]
    pub fn span(&self) -> u64 {
        if self.n_strides == 0 {
            return 0;
        }
        (self.n_strides - 1) * self.stride + self.len_per_stride
    }

    /// Whether this pattern is a single contiguous range.
    #[inline]
    pub fn is_contiguous(&self) -> bool {
        self.n_strides == 1
    }
}

impl fmt::Display for StrideInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.stride, self.n_strides, self.len_per_stride
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rounding() {
        assert_eq!(round_up_sector(0), 0);
        assert_eq!(round_up_sector(1), 512);
        assert_eq!(round_up_sector(512), 512);
        assert_eq!(round_up_sector(513), 1024);
        assert_eq!(round_down_sector(511), 0);
        assert_eq!(round_down_sector(512), 512);
        assert_eq!(round_down_sector(1023), 512);
        assert!(is_sector_aligned(0));
        assert!(is_sector_aligned(4096));
        assert!(!is_sector_aligned(100));
    }

    #[test]
    fn test_stride_info() {
        let contig = StrideInfo::contiguous(4096);
        assert!(contig.is_contiguous());
        assert_eq!(contig.buffer_len(), 4096);
        assert_eq!(contig.span(), 4096);

        let s = StrideInfo::strided(1024, 8, 256);
        assert!(!s.is_contiguous());
        assert_eq!(s.buffer_len(), 8 * 256);
        assert_eq!(s.span(), 7 * 1024 + 256);
        assert_eq!(s.to_string(), "1024:8:256");
    }
}
