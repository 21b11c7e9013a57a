//! The I/O worker pool.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use parking_lot::Mutex;
use tracing::{debug, error, warn};

use direct_io::{FileSlice, IoBuffer, StrideInfo};

use crate::overlap::{Access, accesses_conflict};

/// Direction of an I/O descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoKind {
    /// File to buffer.
    Read,
    /// Buffer to file.
    Write,
}

/// One unit of work for an I/O worker: move `sinfo.buffer_len()` bytes
/// between `buf` and the pattern at `slice`, then run the callback.
pub struct IoDesc {
    /// Pattern start within the backing file.
    pub slice: FileSlice<u8>,
    /// Access pattern.
    pub sinfo: StrideInfo,
    /// Packed staging buffer.
    pub buf: Arc<IoBuffer>,
    /// Direction.
    pub kind: IoKind,
    /// Invoked synchronously once the physical I/O has reported done.
    pub on_complete: Box<dyn FnOnce() + Send>,
}

struct Slot {
    /// The worker's current access, including its is-write flag. Peers
    /// read it only under this mutex, so a worker that published before a
    /// peer's check is always visible to it.
    active: Mutex<Option<Access>>,
}

struct Shared {
    slots: Vec<Slot>,
    overlap_check: AtomicBool,
}

impl Shared {
    fn publish(&self, idx: usize, access: Access) {
        *self.slots[idx].active.lock() = Some(access);
    }

    fn clear(&self, idx: usize) {
        *self.slots[idx].active.lock() = None;
    }

    /// Pairwise check under both slot mutexes, locked in index order to
    /// avoid deadlock with the peer doing the same check.
    fn conflict(&self, a: usize, b: usize) -> bool {
        let (lo, hi) = if a < b { (a, b) } else { (b, a) };
        let lo_guard = self.slots[lo].active.lock();
        let hi_guard = self.slots[hi].active.lock();
        match (&*lo_guard, &*hi_guard) {
            (Some(x), Some(y)) => accesses_conflict(x, y),
            _ => false,
        }
    }
}

/// Fixed-size pool of worker threads executing [`IoDesc`]s from a shared
/// queue.
///
/// With overlap checking enabled (the default), no two workers execute
/// writes whose sector-rounded file ranges intersect: the later write is
/// pushed onto the worker's local backlog and retried before its next
/// queue pop. Ordering between descriptors is otherwise unspecified; the
/// task graph provides all happens-before.
///
/// Dropping the executor closes the queue; workers drain their backlogs
/// and exit.
pub struct IoExecutor {
    shared: Arc<Shared>,
    tx: Option<Sender<IoDesc>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl IoExecutor {
    /// Spawn `n_threads` workers.
    pub fn new(n_threads: usize) -> Self {
        assert!(n_threads >= 1, "need at least one I/O thread");
        let (tx, rx) = unbounded::<IoDesc>();
        let shared = Arc::new(Shared {
            slots: (0..n_threads)
                .map(|_| Slot {
                    active: Mutex::new(None),
                })
                .collect(),
            overlap_check: AtomicBool::new(true),
        });

        let mut threads = Vec::with_capacity(n_threads);
        for idx in 0..n_threads {
            let shared = Arc::clone(&shared);
            let rx = rx.clone();
            let handle = thread::Builder::new()
                .name(format!("io-worker-{idx}"))
                .spawn(move || worker(idx, &shared, &rx))
                .expect("failed to spawn I/O worker thread");
            threads.push(handle);
        }

        Self {
            shared,
            tx: Some(tx),
            threads: Mutex::new(threads),
        }
    }

    /// Enable or disable write/write hazard detection.
    pub fn set_overlap_check(&self, enabled: bool) {
        self.shared.overlap_check.store(enabled, Ordering::Release);
    }

    /// Whether hazard detection is enabled.
    pub fn overlap_check(&self) -> bool {
        self.shared.overlap_check.load(Ordering::Acquire)
    }

    /// Queue a read of the pattern into `buf`.
    pub fn add_read(
        &self,
        slice: FileSlice<u8>,
        sinfo: StrideInfo,
        buf: Arc<IoBuffer>,
        on_complete: impl FnOnce() + Send + 'static,
    ) {
        self.push(IoDesc {
            slice,
            sinfo,
            buf,
            kind: IoKind::Read,
            on_complete: Box::new(on_complete),
        });
    }

    /// Queue a write of `buf` out to the pattern.
    pub fn add_write(
        &self,
        slice: FileSlice<u8>,
        sinfo: StrideInfo,
        buf: Arc<IoBuffer>,
        on_complete: impl FnOnce() + Send + 'static,
    ) {
        self.push(IoDesc {
            slice,
            sinfo,
            buf,
            kind: IoKind::Write,
            on_complete: Box::new(on_complete),
        });
    }

    fn push(&self, desc: IoDesc) {
        self.tx
            .as_ref()
            .expect("executor is shutting down")
            .send(desc)
            .expect("I/O workers are gone");
    }
}

impl Drop for IoExecutor {
    fn drop(&mut self) {
        // Closing the channel is the shutdown signal.
        self.tx = None;
        for handle in self.threads.lock().drain(..) {
            if handle.join().is_err() {
                error!("I/O worker panicked during shutdown");
            }
        }
        debug!("I/O executor shut down");
    }
}

fn worker(idx: usize, shared: &Shared, rx: &Receiver<IoDesc>) {
    if let Err(e) = direct_io::register_thread() {
        error!("I/O worker {idx} could not register: {e}");
        return;
    }
    debug!("I/O worker {idx} up");

    let mut backlog: VecDeque<IoDesc> = VecDeque::new();
    let mut open = true;
    while open || !backlog.is_empty() {
        // Deferred descriptors get priority over new queue work.
        for _ in 0..backlog.len() {
            let desc = backlog.pop_front().expect("len checked");
            attempt(idx, shared, desc, &mut backlog);
        }

        let next = if backlog.is_empty() {
            match rx.recv() {
                Ok(desc) => Some(desc),
                Err(_) => {
                    open = false;
                    None
                }
            }
        } else {
            // A conflicting peer may finish at any moment; poll rather
            // than block so the backlog keeps getting retried.
            match rx.recv_timeout(Duration::from_millis(10)) {
                Ok(desc) => Some(desc),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => {
                    open = false;
                    thread::sleep(Duration::from_millis(1));
                    None
                }
            }
        };
        if let Some(desc) = next {
            attempt(idx, shared, desc, &mut backlog);
        }
    }

    let _ = direct_io::deregister_thread();
    debug!("I/O worker {idx} down");
}

fn attempt(idx: usize, shared: &Shared, desc: IoDesc, backlog: &mut VecDeque<IoDesc>) {
    let access = Access {
        file_id: desc.slice.file_id(),
        offset: desc.slice.offset(),
        sinfo: desc.sinfo,
        is_write: desc.kind == IoKind::Write,
    };
    shared.publish(idx, access);

    // Only writes can conflict, so readers skip the pairwise sweep.
    if access.is_write && shared.overlap_check.load(Ordering::Acquire) {
        for peer in 0..shared.slots.len() {
            if peer == idx {
                continue;
            }
            if shared.conflict(idx, peer) {
                warn!(
                    "write/write conflict at {:?}+{}, deferring",
                    desc.slice, desc.sinfo
                );
                metrics::IO_HAZARD_DEFER.increment();
                shared.clear(idx);
                backlog.push_back(desc);
                return;
            }
        }
    }

    execute(desc);
    shared.clear(idx);
}

fn execute(desc: IoDesc) {
    let offset = desc.slice.offset();
    let lps = desc.sinfo.len_per_stride as usize;
    let result = match desc.kind {
        IoKind::Read => {
            let mut lease = desc.buf.write();
            if desc.sinfo.is_contiguous() {
                desc.slice.handle().read(offset, &mut lease[..lps])
            } else {
                desc.slice.handle().sread(offset, desc.sinfo, &mut lease)
            }
        }
        IoKind::Write => {
            let lease = desc.buf.read();
            if desc.sinfo.is_contiguous() {
                desc.slice.handle().write(offset, &lease[..lps])
            } else {
                desc.slice.handle().swrite(offset, desc.sinfo, &lease)
            }
        }
    };

    match result {
        Ok(()) => match desc.kind {
            IoKind::Read => {
                metrics::IO_READ.increment();
            }
            IoKind::Write => {
                metrics::IO_WRITE.increment();
            }
        },
        Err(e) => {
            // Retries were exhausted below us; nothing left to do.
            error!("fatal I/O failure at {:?}+{}: {e}", desc.slice, desc.sinfo);
            std::process::abort();
        }
    }

    (desc.on_complete)();
}
