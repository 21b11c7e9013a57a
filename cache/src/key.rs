//! Cache key: the identity of a staged buffer.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::{BuildHasherDefault, Hash, Hasher};

use ahash::RandomState;
use direct_io::{FileSlice, StrideInfo};

// Fixed seeds keep key hashes stable across cache instances, which makes
// test failures reproducible.
const SEEDS: (u64, u64, u64, u64) = (
    0x243f_6a88_85a3_08d3,
    0x1319_8a2e_0370_7344,
    0xa409_3822_299f_31d0,
    0x082e_fa98_ec4e_6c89,
);

/// Identifies a cached buffer: the pair (file slice, stride pattern).
///
/// Two keys are equal iff the backing-file identity, byte offset, and all
/// three stride components match. A 64-bit hash is computed once at
/// construction and carried with the key; the cache maps use it verbatim.
#[derive(Clone)]
pub struct Key {
    slice: FileSlice<u8>,
    sinfo: StrideInfo,
    hash: u64,
}

impl Key {
    /// Build a key, precomputing its hash.
    pub fn new(slice: FileSlice<u8>, sinfo: StrideInfo) -> Self {
        let state = RandomState::with_seeds(SEEDS.0, SEEDS.1, SEEDS.2, SEEDS.3);
        let hash = state.hash_one((
            slice.file_id(),
            slice.offset(),
            sinfo.stride,
            sinfo.n_strides,
            sinfo.len_per_stride,
        ));
        Self { slice, sinfo, hash }
    }

    /// The file slice component.
    #[inline]
    pub fn slice(&self) -> &FileSlice<u8> {
        &self.slice
    }

    /// The stride pattern component.
    #[inline]
    pub fn sinfo(&self) -> StrideInfo {
        self.sinfo
    }

    /// The precomputed hash.
    #[inline]
    pub fn hash_value(&self) -> u64 {
        self.hash
    }

    /// Size of the buffer this key describes.
    #[inline]
    pub fn buf_len(&self) -> u64 {
        self.sinfo.buffer_len()
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        let eq = self.slice == other.slice && self.sinfo == other.sinfo;
        debug_assert!(
            eq == (self.hash == other.hash) || !eq,
            "hash collision between distinct keys"
        );
        eq
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}-{}", self.slice, self.sinfo)
    }
}

/// Hasher that passes the key's precomputed hash straight through.
#[derive(Default)]
pub struct PrehashedHasher {
    hash: u64,
}

impl Hasher for PrehashedHasher {
    fn finish(&self) -> u64 {
        self.hash
    }

    fn write(&mut self, _bytes: &[u8]) {
        unreachable!("keys hash via write_u64 only");
    }

    fn write_u64(&mut self, v: u64) {
        self.hash = v;
    }
}

/// Map keyed by [`Key`] using the precomputed hash.
pub type KeyMap<V> = HashMap<Key, V, BuildHasherDefault<PrehashedHasher>>;

/// Set of [`Key`]s using the precomputed hash.
pub type KeySet = HashSet<Key, BuildHasherDefault<PrehashedHasher>>;

#[cfg(test)]
mod tests {
    use super::*;
    use direct_io::MemFile;

    #[test]
    fn test_equality_by_components() {
        let f = MemFile::new(1 << 16);
        let slice: FileSlice = FileSlice::new(f.clone(), 128);
        let sinfo = StrideInfo::strided(1024, 4, 256);

        let a = Key::new(slice.clone(), sinfo);
        let b = Key::new(slice.clone(), sinfo);
        assert_eq!(a, b);
        assert_eq!(a.hash_value(), b.hash_value());

        let c = Key::new(slice.byte_add(1), sinfo);
        assert_ne!(a, c);
        let d = Key::new(slice, StrideInfo::strided(1024, 4, 128));
        assert_ne!(a, d);
    }

    #[test]
    fn test_map_lookup_uses_prehash() {
        let f = MemFile::new(1 << 16);
        let mut map: KeyMap<u32> = KeyMap::default();
        for i in 0..64u64 {
            let k = Key::new(FileSlice::new(f.clone(), i * 512), StrideInfo::contiguous(512));
            map.insert(k, i as u32);
        }
        for i in 0..64u64 {
            let k = Key::new(FileSlice::new(f.clone(), i * 512), StrideInfo::contiguous(512));
            assert_eq!(map.get(&k), Some(&(i as u32)));
        }
    }

    #[test]
    fn test_buf_len() {
        let f = MemFile::new(4096);
        let k = Key::new(FileSlice::new(f, 0), StrideInfo::strided(512, 4, 100));
        assert_eq!(k.buf_len(), 400);
    }
}
