//! The bounded buffer pool.
//!
//! Every staged buffer lives in exactly one of three maps or the
//! allocation backlog:
//!
//! - `active`: resident and pinned by at least one task, no I/O pending
//! - `in_io`: a read or eviction write is pending; an evicted entry's
//!   memory is released on completion, a non-evicted entry becomes
//!   active or zero-ref
//! - `zero_ref`: resident, unpinned, candidate for eviction
//! - `backlog`: ordered keys waiting for budget before allocation
//!
//! Two counters bound memory: `committed` (promised bytes, everything in
//! the four containers) and `real` (actually allocated bytes). Both stay
//! at or below `max_size`. While an eviction write drains, its bytes are
//! counted in `real` but no longer in `committed`.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error, warn};

use direct_io::IoBuffer;
use io_executor::IoExecutor;

use crate::key::{Key, KeyMap, KeySet};

#[derive(Default)]
struct Value {
    /// The staged buffer; `None` only while queued in the backlog.
    buf: Option<Arc<IoBuffer>>,
    refs: u64,
    write_back: bool,
    /// Entry is an eviction write; memory is released when it is reaped.
    evicted: bool,
    /// Skip the initial read: the buffer will be fully written.
    alloc_only: bool,
    /// Set by the I/O completion callback.
    complete: Option<Arc<AtomicBool>>,
}

impl Value {
    fn is_complete(&self) -> bool {
        self.complete
            .as_ref()
            .is_some_and(|c| c.load(Ordering::Acquire))
    }
}

struct State {
    active: KeyMap<Value>,
    in_io: KeyMap<Value>,
    zero_ref: KeyMap<Value>,
    backlog: VecDeque<(Key, Value)>,
    committed: u64,
}

impl State {
    fn is_queued(&self, key: &Key) -> bool {
        self.backlog.iter().any(|(k, _)| k == key)
    }
}

/// Point-in-time view of cache occupancy and traffic counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Promised bytes across all containers.
    pub committed: u64,
    /// Actually allocated bytes.
    pub real: u64,
    /// Entries in the active map.
    pub active: usize,
    /// Entries with pending I/O.
    pub in_io: usize,
    /// Unpinned resident entries.
    pub zero_ref: usize,
    /// Keys awaiting allocation.
    pub backlog: usize,
    /// Lookups satisfied from residency.
    pub hits: u64,
    /// Keys that had to be queued for allocation.
    pub misses: u64,
    /// Buffers evicted (including single-use discards).
    pub evictions: u64,
    /// Evictions that issued a write-back.
    pub writebacks: u64,
    /// Reads issued to fill buffers.
    pub reads_issued: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    writebacks: AtomicU64,
    reads_issued: AtomicU64,
}

/// Bounded-capacity buffer pool indexed by (file slice, stride pattern).
///
/// All state transitions happen under one mutex; I/O completions only
/// flip a per-entry atomic flag, which the next locked operation reaps.
pub struct Cache {
    state: Mutex<State>,
    real: AtomicU64,
    max_size: u64,
    single_use_discard: AtomicBool,
    io: Arc<IoExecutor>,
    counters: Counters,
}

impl Cache {
    /// A pool bounded at `max_size` bytes, issuing its I/O through `io`.
    pub fn new(io: Arc<IoExecutor>, max_size: u64) -> Self {
        Self {
            state: Mutex::new(State {
                active: KeyMap::default(),
                in_io: KeyMap::default(),
                zero_ref: KeyMap::default(),
                backlog: VecDeque::new(),
                committed: 0,
            }),
            real: AtomicU64::new(0),
            max_size,
            single_use_discard: AtomicBool::new(false),
            io,
            counters: Counters::default(),
        }
    }

    /// Free zero-ref buffers on release instead of caching them.
    pub fn set_single_use_discard(&self, enabled: bool) {
        self.single_use_discard.store(enabled, Ordering::Release);
    }

    /// Fast-path probe: a pinned buffer if the key is already resident.
    ///
    /// Hits in `active` bump the pin count; hits in `zero_ref` or a
    /// completed non-evicted `in_io` entry move the entry to `active`
    /// with one pin. Anything else returns `None`.
    pub fn get_buf(&self, key: &Key, write_back: bool) -> Option<Arc<IoBuffer>> {
        let mut st = self.state.lock();

        let found = if let Some(v) = st.active.get_mut(key) {
            v.refs += 1;
            true
        } else if st
            .in_io
            .get(key)
            .is_some_and(|v| !v.evicted && v.is_complete())
        {
            let mut v = st.in_io.remove(key).expect("checked above");
            v.complete = None;
            v.refs = 1;
            st.active.insert(key.clone(), v);
            true
        } else if let Some(mut v) = st.zero_ref.remove(key) {
            v.refs = 1;
            st.active.insert(key.clone(), v);
            true
        } else {
            false
        };

        if !found {
            return None;
        }
        let v = st.active.get_mut(key).expect("just placed");
        v.write_back |= write_back;
        self.counters.hits.fetch_add(1, Ordering::Relaxed);
        metrics::CACHE_HIT.increment();
        Some(Arc::clone(v.buf.as_ref().expect("resident entry has a buffer")))
    }

    /// Commit memory for every key a task reads and writes.
    ///
    /// Returns `None` if even after evicting every eligible zero-ref
    /// buffer the additional bytes would not fit; the cache may still
    /// have evicted in that case. On success returns the pins that could
    /// be satisfied immediately; the remaining keys are queued and picked
    /// up later via [`Cache::get_buf`].
    pub fn allocate(&self, reads: &[Key], writes: &[Key]) -> Option<Vec<(Key, Arc<IoBuffer>)>> {
        let ask: KeySet = reads.iter().chain(writes).cloned().collect();

        let mut st = self.state.lock();
        let mut ask_size = 0u64;
        for key in &ask {
            if st.active.contains_key(key) || st.zero_ref.contains_key(key) {
                continue;
            }
            if let Some(v) = st.in_io.get(key) {
                if v.evicted {
                    // will be re-read into memory
                    ask_size += key.buf_len();
                }
                continue;
            }
            ask_size += key.buf_len();
        }

        let fits = st.committed + ask_size <= self.max_size
            || self.try_evict_locked(&mut st, &ask, ask_size);
        if !fits {
            debug!("allocation of {ask_size} bytes deferred; committed={}", st.committed);
            return None;
        }

        Some(self.alloc_bufs_locked(&mut st, reads, writes))
    }

    /// Classify each key as read-only, write-only, or read-write and
    /// claim or queue it accordingly.
    fn alloc_bufs_locked(
        &self,
        st: &mut State,
        reads: &[Key],
        writes: &[Key],
    ) -> Vec<(Key, Arc<IoBuffer>)> {
        let read_keys: KeySet = reads.iter().cloned().collect();
        let write_keys: KeySet = writes.iter().cloned().collect();
        let mut pins = Vec::new();

        for key in &read_keys {
            let is_rw = write_keys.contains(key);

            if let Some(v) = st.active.get_mut(key) {
                v.refs += 1;
                v.write_back |= is_rw;
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                metrics::CACHE_HIT.increment();
                pins.push((key.clone(), Arc::clone(v.buf.as_ref().expect("resident"))));
            } else if let Some(v) = st.in_io.get(key) {
                if v.evicted {
                    // Being written out; queue a re-read. A read-write
                    // key queued by someone else keeps its flags; the
                    // write-back bit is set when it is next pinned.
                    self.add_backlog_locked(st, key.clone(), false, is_rw);
                } else if v.is_complete() {
                    let mut v = st.in_io.remove(key).expect("checked above");
                    v.complete = None;
                    v.refs = 1;
                    v.write_back |= is_rw;
                    self.counters.hits.fetch_add(1, Ordering::Relaxed);
                    metrics::CACHE_HIT.increment();
                    pins.push((key.clone(), Arc::clone(v.buf.as_ref().expect("resident"))));
                    st.active.insert(key.clone(), v);
                }
                // incomplete read: the scheduler polls get_buf for it
            } else if let Some(mut v) = st.zero_ref.remove(key) {
                v.refs = 1;
                v.write_back |= is_rw;
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                metrics::CACHE_HIT.increment();
                pins.push((key.clone(), Arc::clone(v.buf.as_ref().expect("resident"))));
                st.active.insert(key.clone(), v);
            } else {
                self.add_backlog_locked(st, key.clone(), false, is_rw);
            }
        }

        for key in &write_keys {
            if read_keys.contains(key) {
                continue; // handled above as read-write
            }
            if st.active.contains_key(key)
                || st.in_io.contains_key(key)
                || st.zero_ref.contains_key(key)
            {
                // Two unordered tasks writing the same key; the scheduler
                // pins it through get_buf instead.
                warn!("write-only key {key:?} already cached");
                continue;
            }
            self.add_backlog_locked(st, key.clone(), true, true);
        }

        pins
    }

    fn add_backlog_locked(&self, st: &mut State, key: Key, alloc_only: bool, write_back: bool) {
        if st.is_queued(&key) {
            return;
        }
        st.committed += key.buf_len();
        assert!(
            st.committed <= self.max_size,
            "committed {} exceeds budget {}",
            st.committed,
            self.max_size
        );
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        metrics::CACHE_MISS.increment();
        let v = Value {
            alloc_only,
            write_back,
            ..Value::default()
        };
        st.backlog.push_back((key, v));
    }

    /// Unpin every key the task held. Keys reaching zero pins move to
    /// `zero_ref`, or are freed immediately under single-use discard.
    pub fn release(&self, reads: &[Key], writes: &[Key]) {
        let keys: KeySet = reads.iter().chain(writes).cloned().collect();
        let discard = self.single_use_discard.load(Ordering::Acquire);

        let mut st = self.state.lock();
        for key in keys {
            let v = st
                .active
                .get_mut(&key)
                .unwrap_or_else(|| panic!("released key {key:?} not in active map"));
            assert!(v.refs >= 1, "release of unpinned key {key:?}");
            v.refs -= 1;
            if v.refs > 0 {
                continue;
            }
            if discard {
                let v = st.active.remove(&key).expect("present");
                let size = key.buf_len();
                st.committed -= size;
                drop(v);
                self.real.fetch_sub(size, Ordering::AcqRel);
                self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                metrics::CACHE_EVICT.increment();
            } else {
                let mut v = st.active.remove(&key).expect("present");
                debug_assert_eq!(v.refs, 0);
                v.complete = None;
                st.zero_ref.insert(key, v);
            }
        }
    }

    /// Evict zero-ref buffers until at least `need` bytes of commit are
    /// returned, never touching `exclude`. Returns `false` (and changes
    /// nothing) if the goal is unreachable.
    fn try_evict_locked(&self, st: &mut State, exclude: &KeySet, need: u64) -> bool {
        if st.zero_ref.is_empty() {
            return false;
        }
        let mut chosen = Vec::new();
        let mut freed = 0u64;
        for key in st.zero_ref.keys() {
            if exclude.contains(key) {
                continue;
            }
            chosen.push(key.clone());
            freed += key.buf_len();
            if freed >= need {
                break;
            }
        }
        if freed < need {
            return false;
        }
        self.evict_locked(st, chosen);
        true
    }

    /// Remove the chosen keys from `zero_ref`, issuing write-backs where
    /// required.
    fn evict_locked(&self, st: &mut State, keys: Vec<Key>) {
        for key in keys {
            let mut v = st
                .zero_ref
                .remove(&key)
                .unwrap_or_else(|| panic!("evicting key {key:?} not in zero-ref map"));
            debug_assert_eq!(v.refs, 0, "pinned buffer in zero-ref map");
            let size = key.buf_len();
            st.committed -= size;
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
            metrics::CACHE_EVICT.increment();
            debug!("evict {size} bytes, committed={}", st.committed);

            if v.write_back {
                let complete = Arc::new(AtomicBool::new(false));
                let buf = Arc::clone(v.buf.as_ref().expect("resident"));
                v.evicted = true;
                v.complete = Some(Arc::clone(&complete));
                st.in_io.insert(key.clone(), v);
                self.counters.writebacks.fetch_add(1, Ordering::Relaxed);
                metrics::CACHE_WRITEBACK.increment();
                // The buffer itself is released when the entry is reaped,
                // on this component's own thread, not the I/O worker's.
                self.io.add_write(key.slice().clone(), key.sinfo(), buf, move || {
                    complete.store(true, Ordering::Release);
                });
            } else {
                drop(v);
                self.real.fetch_sub(size, Ordering::AcqRel);
            }
        }
    }

    /// Reap completed I/O and feed the allocation backlog.
    ///
    /// Completed reads move to `active` with zero pins (so they are not
    /// instantly re-evicted before their task collects them); completed
    /// eviction writes release their memory. Then backlog entries are
    /// allocated in insertion order while `real` has room, each issuing
    /// its fill read unless flagged alloc-only.
    pub fn service_backlog(&self) {
        let mut st = self.state.lock();

        let done: Vec<Key> = st
            .in_io
            .iter()
            .filter(|(_, v)| v.is_complete())
            .map(|(k, _)| k.clone())
            .collect();
        for key in done {
            let mut v = st.in_io.remove(&key).expect("collected above");
            v.complete = None;
            if v.evicted {
                debug!("eviction of {key:?} complete");
                let size = key.buf_len();
                drop(v);
                self.real.fetch_sub(size, Ordering::AcqRel);
            } else {
                v.refs = 0;
                debug_assert!(
                    !st.active.contains_key(&key),
                    "reaped key already active"
                );
                st.active.insert(key, v);
            }
        }

        loop {
            let Some((key, _)) = st.backlog.front() else {
                break;
            };
            let size = key.buf_len();
            if self.real.load(Ordering::Acquire) + size > self.max_size {
                // Wait for eviction write-backs to release their memory.
                break;
            }
            if st.in_io.contains_key(key) {
                // The same key is still being written out; re-reading now
                // would race the eviction.
                warn!("deferring re-read of {key:?} until its eviction drains");
                break;
            }
            let (key, mut v) = st.backlog.pop_front().expect("front checked");

            // A buffer that skipped its initial read must always be
            // written back on eviction.
            v.write_back |= v.alloc_only;

            self.real.fetch_add(size, Ordering::AcqRel);
            let buf = Arc::new(IoBuffer::alloc(size as usize));
            v.buf = Some(Arc::clone(&buf));
            v.evicted = false;

            if v.alloc_only {
                // Parked in in-io as already complete so it cannot be
                // evicted before its first pin.
                v.complete = Some(Arc::new(AtomicBool::new(true)));
                st.in_io.insert(key, v);
            } else {
                let complete = Arc::new(AtomicBool::new(false));
                v.complete = Some(Arc::clone(&complete));
                st.in_io.insert(key.clone(), v);
                self.counters.reads_issued.fetch_add(1, Ordering::Relaxed);
                self.io.add_read(key.slice().clone(), key.sinfo(), buf, move || {
                    complete.store(true, Ordering::Release);
                });
            }
        }
    }

    /// Flush every write-back buffer and drop everything else.
    ///
    /// # Panics
    ///
    /// Panics if any buffer is still pinned.
    pub fn flush(&self) {
        {
            let mut st = self.state.lock();
            if !st.active.is_empty() {
                for (k, v) in &st.active {
                    error!("flush with active key {k:?}, refs={}", v.refs);
                }
                panic!("cache flushed while buffers are pinned");
            }
            let keys: Vec<Key> = st.zero_ref.keys().cloned().collect();
            self.evict_locked(&mut st, keys);
        }

        loop {
            self.service_backlog();
            let st = self.state.lock();
            if st.in_io.is_empty() {
                break;
            }
            drop(st);
            debug!("waiting for cache to flush to disk");
            std::thread::sleep(Duration::from_millis(100));
        }
        debug!("cache flushed");
    }

    /// Remove from `keys` everything currently cached (resident, filling,
    /// or queued).
    pub fn drop_if_cached(&self, keys: &mut KeySet) {
        let st = self.state.lock();
        keys.retain(|k| !Self::is_cached(&st, k));
    }

    /// Keep in `keys` only what is currently cached.
    pub fn retain_if_cached(&self, keys: &mut KeySet) {
        let st = self.state.lock();
        keys.retain(|k| Self::is_cached(&st, k));
    }

    fn is_cached(st: &State, key: &Key) -> bool {
        st.active.contains_key(key)
            || st.in_io.get(key).is_some_and(|v| !v.evicted)
            || st.zero_ref.contains_key(key)
            || st.is_queued(key)
    }

    /// Snapshot occupancy and counters.
    pub fn stats(&self) -> CacheStats {
        let st = self.state.lock();
        CacheStats {
            committed: st.committed,
            real: self.real.load(Ordering::Acquire),
            active: st.active.len(),
            in_io: st.in_io.len(),
            zero_ref: st.zero_ref.len(),
            backlog: st.backlog.len(),
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            writebacks: self.counters.writebacks.load(Ordering::Relaxed),
            reads_issued: self.counters.reads_issued.load(Ordering::Relaxed),
        }
    }
}

impl Drop for Cache {
    fn drop(&mut self) {
        let st = self.state.lock();
        for (k, v) in &st.active {
            error!("cache dropped with active key {k:?}, refs={}", v.refs);
        }
        for (k, _) in &st.in_io {
            error!("cache dropped with pending I/O for {k:?}");
        }
        debug_assert!(st.active.is_empty(), "active map not empty at drop");
        debug_assert!(st.in_io.is_empty(), "in-io map not empty at drop");
        debug!("cache destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::Key;
    use direct_io::{FileHandle, FileSlice, MemFile, StrideInfo};
    use std::sync::Arc;

    const BLOCK: u64 = 64 * 1024;

    fn setup(max_blocks: u64) -> (Arc<IoExecutor>, Cache, Arc<MemFile>) {
        let io = Arc::new(IoExecutor::new(2));
        let cache = Cache::new(Arc::clone(&io), max_blocks * BLOCK);
        let file = MemFile::new((32 * BLOCK) as usize);
        (io, cache, file)
    }

    fn key_at(file: &Arc<MemFile>, block: u64) -> Key {
        Key::new(
            FileSlice::new(file.clone(), block * BLOCK),
            StrideInfo::contiguous(BLOCK),
        )
    }

    /// Drive service_backlog until the key is pinned, like the scheduler
    /// does between pipeline stages.
    fn settle(cache: &Cache, key: &Key, write_back: bool) -> Arc<IoBuffer> {
        for _ in 0..1000 {
            if let Some(buf) = cache.get_buf(key, write_back) {
                return buf;
            }
            cache.service_backlog();
            std::thread::sleep(Duration::from_millis(1));
        }
        panic!("buffer for {key:?} never became resident");
    }

    #[test]
    fn test_read_flow() {
        let (_io, cache, file) = setup(4);
        // Known content so the fill read is observable.
        file.write(0, &vec![0x5Au8; BLOCK as usize]).unwrap();

        let k = key_at(&file, 0);
        let pins = cache.allocate(&[k.clone()], &[]).expect("fits");
        assert!(pins.is_empty(), "nothing resident yet");
        let buf = settle(&cache, &k, false);
        assert!(buf.read().iter().all(|&b| b == 0x5A));

        cache.release(&[k.clone()], &[]);
        let stats = cache.stats();
        assert_eq!(stats.zero_ref, 1);
        assert_eq!(stats.active, 0);
        assert_eq!(stats.committed, BLOCK);
        assert_eq!(stats.real, BLOCK);
        assert_eq!(stats.reads_issued, 1);

        cache.flush();
        let stats = cache.stats();
        assert_eq!(stats.committed, 0);
        assert_eq!(stats.real, 0);
    }

    #[test]
    fn test_write_back_on_flush() {
        let (_io, cache, file) = setup(4);
        let k = key_at(&file, 1);

        let pins = cache.allocate(&[], &[k.clone()]).expect("fits");
        assert!(pins.is_empty());
        let buf = settle(&cache, &k, true);
        buf.write().fill(0xEE);
        cache.release(&[], &[k.clone()]);
        cache.flush();

        let mut out = vec![0u8; BLOCK as usize];
        file.read(BLOCK, &mut out).unwrap();
        assert!(out.iter().all(|&b| b == 0xEE));
        assert_eq!(cache.stats().writebacks, 1);
    }

    #[test]
    fn test_budget_forces_eviction() {
        let (_io, cache, file) = setup(2);

        // Fill both budget slots and unpin them.
        for b in 0..2 {
            let k = key_at(&file, b);
            cache.allocate(&[k.clone()], &[]).expect("fits");
            let _buf = settle(&cache, &k, false);
            cache.release(&[k.clone()], &[]);
        }
        assert_eq!(cache.stats().zero_ref, 2);

        // A third block must evict one zero-ref entry.
        let k2 = key_at(&file, 2);
        cache.allocate(&[k2.clone()], &[]).expect("evicts to fit");
        let _buf = settle(&cache, &k2, false);
        let stats = cache.stats();
        assert!(stats.evictions >= 1);
        assert!(stats.committed <= 2 * BLOCK);
        assert!(stats.real <= 2 * BLOCK);

        cache.release(&[k2], &[]);
        cache.flush();
    }

    #[test]
    fn test_allocate_fails_when_everything_pinned() {
        let (_io, cache, file) = setup(2);

        let k0 = key_at(&file, 0);
        let k1 = key_at(&file, 1);
        cache.allocate(&[k0.clone(), k1.clone()], &[]).expect("fits");
        let _b0 = settle(&cache, &k0, false);
        let _b1 = settle(&cache, &k1, false);

        // Nothing evictable: both pinned.
        let k2 = key_at(&file, 2);
        assert!(cache.allocate(&[k2], &[]).is_none());

        cache.release(&[k0, k1], &[]);
        cache.flush();
    }

    #[test]
    fn test_pin_sharing_increments_refs() {
        let (_io, cache, file) = setup(4);
        let k = key_at(&file, 0);

        cache.allocate(&[k.clone()], &[]).expect("fits");
        let _b0 = settle(&cache, &k, false);

        // Second task hits the active entry directly in allocate.
        let pins = cache.allocate(&[k.clone()], &[]).expect("fits");
        assert_eq!(pins.len(), 1);

        // Both tasks release; only then does it become zero-ref.
        cache.release(&[k.clone()], &[]);
        assert_eq!(cache.stats().zero_ref, 0);
        cache.release(&[k.clone()], &[]);
        assert_eq!(cache.stats().zero_ref, 1);
        cache.flush();
    }

    #[test]
    fn test_single_use_discard_frees_on_release() {
        let (_io, cache, file) = setup(4);
        cache.set_single_use_discard(true);
        let k = key_at(&file, 0);

        cache.allocate(&[k.clone()], &[]).expect("fits");
        let _buf = settle(&cache, &k, false);
        cache.release(&[k.clone()], &[]);

        let stats = cache.stats();
        assert_eq!(stats.zero_ref, 0);
        assert_eq!(stats.committed, 0);
        assert_eq!(stats.real, 0);
        cache.flush();
    }

    #[test]
    fn test_disjointness_across_transitions() {
        let (_io, cache, file) = setup(2);
        let k = key_at(&file, 0);

        let in_one_container = |cache: &Cache, k: &Key| {
            let st = cache.state.lock();
            let places = [
                st.active.contains_key(k),
                st.in_io.contains_key(k),
                st.zero_ref.contains_key(k),
                st.is_queued(k),
            ];
            places.iter().filter(|&&p| p).count() <= 1
        };

        cache.allocate(&[k.clone()], &[]).expect("fits");
        assert!(in_one_container(&cache, &k));
        let _buf = settle(&cache, &k, false);
        assert!(in_one_container(&cache, &k));
        cache.release(&[k.clone()], &[]);
        assert!(in_one_container(&cache, &k));
        cache.flush();
        assert!(in_one_container(&cache, &k));
    }

    #[test]
    fn test_residency_queries() {
        let (_io, cache, file) = setup(4);
        let k0 = key_at(&file, 0);
        let k1 = key_at(&file, 1);

        cache.allocate(&[k0.clone()], &[]).expect("fits");
        let _buf = settle(&cache, &k0, false);

        let mut keys: KeySet = [k0.clone(), k1.clone()].into_iter().collect();
        cache.retain_if_cached(&mut keys);
        assert!(keys.contains(&k0) && !keys.contains(&k1));

        let mut keys: KeySet = [k0.clone(), k1].into_iter().collect();
        cache.drop_if_cached(&mut keys);
        assert_eq!(keys.len(), 1);

        cache.release(&[k0], &[]);
        cache.flush();
    }
}
