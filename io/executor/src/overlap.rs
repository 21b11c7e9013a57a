//! Byte-range overlap between strided accesses, at sector granularity.
//!
//! Direct I/O turns an unaligned write into a read-modify-write of whole
//! sectors, so two writes conflict as soon as their *rounded* ranges
//! share a sector, even when the byte ranges themselves are disjoint.
//! This module computes that predicate exactly.
//!
//! Only write/write pairs are hazards here: read-after-write and
//! write-after-read ordering is the task graph's job, and reads never
//! disturb each other.

use direct_io::{StrideInfo, round_down_sector, round_up_sector};

/// A published access: what one I/O worker is currently executing.
#[derive(Debug, Clone, Copy)]
pub struct Access {
    /// Identity of the backing file.
    pub file_id: usize,
    /// Byte offset of the pattern start.
    pub offset: u64,
    /// Access pattern.
    pub sinfo: StrideInfo,
    /// Whether this access writes.
    pub is_write: bool,
}

/// Whether two published accesses may not run concurrently.
pub fn accesses_conflict(a: &Access, b: &Access) -> bool {
    if a.file_id != b.file_id {
        return false;
    }
    // Reads never conflict with reads nor with writes.
    if !(a.is_write && b.is_write) {
        return false;
    }
    patterns_overlap(a.offset, a.sinfo, b.offset, b.sinfo)
}

/// Sector-rounded interval intersection.
fn strips_overlap(a0: u64, a1: u64, b0: u64, b1: u64) -> bool {
    let a0 = round_down_sector(a0);
    let a1 = round_up_sector(a1);
    let b0 = round_down_sector(b0);
    let b1 = round_up_sector(b1);
    a0 < b1 && b0 < a1
}

/// Whether any strip of pattern `a` shares a sector with any strip of
/// pattern `b`.
///
/// Cost is O(min(n_strides)) with a small per-strip constant, after a
/// bounding-interval rejection.
pub fn patterns_overlap(ao: u64, asi: StrideInfo, bo: u64, bsi: StrideInfo) -> bool {
    if !strips_overlap(ao, ao + asi.span(), bo, bo + bsi.span()) {
        return false;
    }
    if asi.is_contiguous() && bsi.is_contiguous() {
        // The bounding test was exact.
        return true;
    }
    // Walk the pattern with fewer strips, testing each strip against the
    // other pattern.
    let (xo, xsi, yo, ysi) = if asi.n_strides <= bsi.n_strides {
        (ao, asi, bo, bsi)
    } else {
        (bo, bsi, ao, asi)
    };
    for k in 0..xsi.n_strides {
        let s = xo + k * xsi.stride;
        if pattern_vs_strip(yo, ysi, s, s + xsi.len_per_stride) {
            return true;
        }
    }
    false
}

/// Whether pattern `p` shares a sector with the single strip `[s0, s1)`.
fn pattern_vs_strip(po: u64, psi: StrideInfo, s0: u64, s1: u64) -> bool {
    if !strips_overlap(po, po + psi.span(), s0, s1) {
        return false;
    }
    if psi.is_contiguous() {
        return true;
    }
    let rs0 = round_down_sector(s0);
    let rs1 = round_up_sector(s1);
    // Strips before k_start cannot reach rs0: strip ends are monotone, so
    // if strip k_start - 1 ends at or before rs0, all earlier ones do too.
    let k_start = if rs0 > po {
        ((rs0 - po) / psi.stride).saturating_sub(1)
    } else {
        0
    };
    let mut k = k_start;
    while k < psi.n_strides {
        let st = po + k * psi.stride;
        if round_down_sector(st) >= rs1 {
            break;
        }
        if strips_overlap(st, st + psi.len_per_stride, s0, s1) {
            return true;
        }
        k += 1;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use direct_io::SECTOR_LEN;

    fn contig(file_id: usize, offset: u64, len: u64, is_write: bool) -> Access {
        Access {
            file_id,
            offset,
            sinfo: StrideInfo::contiguous(len),
            is_write,
        }
    }

    #[test]
    fn test_different_files_never_conflict() {
        let a = contig(1, 0, 4096, true);
        let b = contig(2, 0, 4096, true);
        assert!(!accesses_conflict(&a, &b));
    }

    #[test]
    fn test_reads_never_conflict() {
        let a = contig(1, 0, 4096, false);
        let b = contig(1, 0, 4096, false);
        let w = contig(1, 0, 4096, true);
        assert!(!accesses_conflict(&a, &b));
        assert!(!accesses_conflict(&a, &w));
        assert!(!accesses_conflict(&w, &a));
    }

    #[test]
    fn test_identical_writes_conflict() {
        let a = contig(1, 0, 4096, true);
        let b = contig(1, 0, 4096, true);
        assert!(accesses_conflict(&a, &b));
    }

    #[test]
    fn test_disjoint_aligned_writes_do_not_conflict() {
        let a = contig(1, 0, 4096, true);
        let b = contig(1, 4096, 4096, true);
        assert!(!accesses_conflict(&a, &b));
    }

    #[test]
    fn test_sector_sharing_unaligned_writes_conflict() {
        // Byte-disjoint, but both touch the sector at [512, 1024).
        let a = contig(1, 0, 600, true);
        let b = contig(1, 700, 100, true);
        assert!(accesses_conflict(&a, &b));
    }

    #[test]
    fn test_interleaved_aligned_strides_do_not_conflict() {
        // Two column blocks of the same matrix: same stride, disjoint
        // aligned strips.
        let a = Access {
            file_id: 1,
            offset: 0,
            sinfo: StrideInfo::strided(8192, 16, 512),
            is_write: true,
        };
        let b = Access {
            file_id: 1,
            offset: 512,
            sinfo: StrideInfo::strided(8192, 16, 512),
            is_write: true,
        };
        assert!(!accesses_conflict(&a, &b));
    }

    #[test]
    fn test_interleaved_unaligned_strides_conflict() {
        let a = Access {
            file_id: 1,
            offset: 0,
            sinfo: StrideInfo::strided(1000, 4, 600),
            is_write: true,
        };
        let b = Access {
            file_id: 1,
            offset: 600,
            sinfo: StrideInfo::strided(1000, 4, 300),
            is_write: true,
        };
        assert!(accesses_conflict(&a, &b));
    }

    #[test]
    fn test_strided_vs_contiguous() {
        let strided = Access {
            file_id: 1,
            offset: 0,
            sinfo: StrideInfo::strided(4096, 8, 512),
            is_write: true,
        };
        // Falls in the gap between strips 0 and 1.
        let gap = contig(1, 1024, 2048, true);
        assert!(!accesses_conflict(&strided, &gap));
        // Covers strip 3.
        let hit = contig(1, 3 * 4096, 256, true);
        assert!(accesses_conflict(&strided, &hit));
    }

    #[test]
    fn test_heterogeneous_strides() {
        let a = Access {
            file_id: 1,
            offset: 0,
            sinfo: StrideInfo::strided(3 * SECTOR_LEN, 10, SECTOR_LEN),
            is_write: true,
        };
        // Strips at multiples of 5 sectors; first shared strip sector is
        // at lcm(3, 5) = 15 sectors.
        let b = Access {
            file_id: 1,
            offset: 0,
            sinfo: StrideInfo::strided(5 * SECTOR_LEN, 4, SECTOR_LEN),
            is_write: true,
        };
        assert!(accesses_conflict(&a, &b)); // both include sector 0
        let b_shifted = Access {
            file_id: 1,
            offset: SECTOR_LEN,
            sinfo: StrideInfo::strided(6 * SECTOR_LEN, 2, SECTOR_LEN),
            is_write: true,
        };
        // Sectors {1, 7} vs multiples of 3 up to 27: disjoint.
        assert!(!accesses_conflict(&a, &b_shifted));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;
        use std::collections::HashSet;

        /// Reference implementation: materialize the rounded sector sets.
        fn sector_set(offset: u64, sinfo: StrideInfo) -> HashSet<u64> {
            let mut set = HashSet::new();
            for k in 0..sinfo.n_strides {
                let s = offset + k * sinfo.stride;
                let lo = round_down_sector(s) / SECTOR_LEN;
                let hi = round_up_sector(s + sinfo.len_per_stride) / SECTOR_LEN;
                set.extend(lo..hi);
            }
            set
        }

        fn pattern() -> impl Strategy<Value = (u64, StrideInfo)> {
            (0u64..4096, 1u64..2048, 1u64..8, 0u64..2048).prop_map(
                |(offset, lps, n_strides, extra)| {
                    (offset, StrideInfo::strided(lps + extra, n_strides, lps))
                },
            )
        }

        proptest! {
            #[test]
            fn matches_sector_set_reference(a in pattern(), b in pattern()) {
                let expect = !sector_set(a.0, a.1).is_disjoint(&sector_set(b.0, b.1));
                let got = patterns_overlap(a.0, a.1, b.0, b.1);
                prop_assert_eq!(got, expect);
            }

            #[test]
            fn predicate_is_symmetric(a in pattern(), b in pattern()) {
                prop_assert_eq!(
                    patterns_overlap(a.0, a.1, b.0, b.1),
                    patterns_overlap(b.0, b.1, a.0, a.1)
                );
            }
        }
    }
}
