//! Units of compute and their I/O declarations.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use tracing::error;

use block_cache::{Key, KeyMap};
use direct_io::{FileSlice, IoBuffer, ReadLease, StrideInfo, WriteLease};

/// Process-wide monotonic task id source.
static TASK_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Lifecycle of a task. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum TaskStatus {
    /// Submitted; parents may still be pending.
    Wait = 0,
    /// All parents complete; eligible for memory commitment.
    AllocReady = 1,
    /// Memory committed; fill I/O may still be pending.
    Alloc = 2,
    /// Every buffer resident; queued for a compute thread.
    ComputeReady = 3,
    /// Kernel executing.
    Compute = 4,
    /// Kernel finished and buffers released. Terminal.
    Complete = 5,
}

impl TaskStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => TaskStatus::Wait,
            1 => TaskStatus::AllocReady,
            2 => TaskStatus::Alloc,
            3 => TaskStatus::ComputeReady,
            4 => TaskStatus::Compute,
            5 => TaskStatus::Complete,
            _ => unreachable!("invalid task status {v}"),
        }
    }
}

type KernelFn = Box<dyn FnOnce(&TaskBuffers) + Send>;

/// A unit of compute with declared byte-exact inputs and outputs.
///
/// Built with [`TaskBuilder`], submitted through the scheduler, observed
/// through [`Task::status`]. The scheduler populates the pinned-buffer
/// table before the kernel runs; the kernel reaches its buffers through
/// [`TaskBuffers`].
pub struct Task {
    id: u64,
    reads: Vec<(FileSlice<u8>, StrideInfo)>,
    writes: Vec<(FileSlice<u8>, StrideInfo)>,
    parents: Mutex<Vec<u64>>,
    status: AtomicU8,
    kernel: Mutex<Option<KernelFn>>,
    next: Mutex<Option<Arc<Task>>>,
    pins: Mutex<KeyMap<Arc<IoBuffer>>>,
}

impl Task {
    /// Start building a task.
    pub fn builder() -> TaskBuilder {
        TaskBuilder::new()
    }

    /// The unique, monotonically assigned id.
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Current lifecycle stage.
    pub fn status(&self) -> TaskStatus {
        TaskStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    /// True once the kernel has run and buffers are released.
    pub fn is_complete(&self) -> bool {
        self.status() == TaskStatus::Complete
    }

    /// Attach a continuation, re-admitted when this task completes. The
    /// continuation must not also be submitted directly.
    pub fn chain(&self, next: Arc<Task>) {
        *self.next.lock() = Some(next);
    }

    pub(crate) fn set_status(&self, status: TaskStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    pub(crate) fn read_keys(&self) -> Vec<Key> {
        self.reads
            .iter()
            .map(|(s, i)| Key::new(s.clone(), *i))
            .collect()
    }

    pub(crate) fn write_keys(&self) -> Vec<Key> {
        self.writes
            .iter()
            .map(|(s, i)| Key::new(s.clone(), *i))
            .collect()
    }

    pub(crate) fn parents_mut(&self) -> MutexGuard<'_, Vec<u64>> {
        self.parents.lock()
    }

    pub(crate) fn take_next(&self) -> Option<Arc<Task>> {
        self.next.lock().take()
    }

    pub(crate) fn pin(&self, key: Key, buf: Arc<IoBuffer>) {
        self.pins.lock().insert(key, buf);
    }

    pub(crate) fn has_pin(&self, key: &Key) -> bool {
        self.pins.lock().contains_key(key)
    }

    pub(crate) fn clear_pins(&self) {
        self.pins.lock().clear();
    }

    /// Run the kernel against the pinned buffers.
    ///
    /// Kernels have no error channel; a panic inside one aborts the
    /// process.
    pub(crate) fn run(&self) {
        let kernel = self
            .kernel
            .lock()
            .take()
            .expect("task dispatched twice or built without a kernel");
        let pins = self.pins.lock();
        let bufs = TaskBuffers { pins: &pins };
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| kernel(&bufs)));
        if outcome.is_err() {
            error!("kernel for task {} panicked; aborting", self.id);
            std::process::abort();
        }
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("status", &self.status())
            .field("reads", &self.reads.len())
            .field("writes", &self.writes.len())
            .finish()
    }
}

/// Builder for [`Task`].
pub struct TaskBuilder {
    reads: Vec<(FileSlice<u8>, StrideInfo)>,
    writes: Vec<(FileSlice<u8>, StrideInfo)>,
    parents: Vec<u64>,
    kernel: Option<KernelFn>,
}

impl TaskBuilder {
    /// An empty builder.
    pub fn new() -> Self {
        Self {
            reads: Vec::new(),
            writes: Vec::new(),
            parents: Vec::new(),
            kernel: None,
        }
    }

    /// Declare an input: the pattern at `slice` is read before compute.
    pub fn read<T>(mut self, slice: &FileSlice<T>, sinfo: StrideInfo) -> Self {
        debug_assert!(sinfo.len_per_stride < 1 << 35, "implausible strip length");
        self.reads.push((slice.untyped(), sinfo));
        self
    }

    /// Declare an output: the pattern at `slice` is written back after
    /// the buffer's last pin is released.
    pub fn write<T>(mut self, slice: &FileSlice<T>, sinfo: StrideInfo) -> Self {
        debug_assert!(sinfo.len_per_stride < 1 << 35, "implausible strip length");
        self.writes.push((slice.untyped(), sinfo));
        self
    }

    /// Require `parent` to be complete before this task may run.
    pub fn parent(mut self, parent: &Task) -> Self {
        self.parents.push(parent.id());
        self
    }

    /// Require a task id to be complete before this task may run.
    pub fn parent_id(mut self, id: u64) -> Self {
        self.parents.push(id);
        self
    }

    /// The compute body.
    pub fn kernel(mut self, f: impl FnOnce(&TaskBuffers) + Send + 'static) -> Self {
        self.kernel = Some(Box::new(f));
        self
    }

    /// Finish, assigning the task id.
    pub fn build(self) -> Arc<Task> {
        Arc::new(Task {
            id: TASK_COUNTER.fetch_add(1, Ordering::Relaxed),
            reads: self.reads,
            writes: self.writes,
            parents: Mutex::new(self.parents),
            status: AtomicU8::new(TaskStatus::Wait as u8),
            kernel: Mutex::new(Some(self.kernel.unwrap_or_else(|| Box::new(|_| {})))),
            next: Mutex::new(None),
            pins: Mutex::new(KeyMap::default()),
        })
    }
}

impl Default for TaskBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The pinned buffers of a task, as seen from its kernel.
///
/// Buffers are addressed by the same (slice, pattern) pair the task
/// declared. Inputs come back as shared leases, outputs as exclusive
/// leases; requesting an output twice, or an input of a buffer currently
/// leased for output, panics.
pub struct TaskBuffers<'a> {
    pins: &'a KeyMap<Arc<IoBuffer>>,
}

impl TaskBuffers<'_> {
    /// Lease a declared input. Use [`ReadLease::typed`] for an element
    /// view.
    pub fn input<T>(&self, slice: &FileSlice<T>, sinfo: StrideInfo) -> ReadLease<'_> {
        self.buffer(slice, sinfo).read()
    }

    /// Lease a declared output. Use [`WriteLease::typed_mut`] for an
    /// element view.
    pub fn output<T>(&self, slice: &FileSlice<T>, sinfo: StrideInfo) -> WriteLease<'_> {
        self.buffer(slice, sinfo).write()
    }

    fn buffer<T>(&self, slice: &FileSlice<T>, sinfo: StrideInfo) -> &IoBuffer {
        let key = Key::new(slice.untyped(), sinfo);
        self.pins
            .get(&key)
            .unwrap_or_else(|| panic!("buffer {key:?} was not declared by this task"))
    }
}

/// Sleep-poll until every task reports [`TaskStatus::Complete`].
pub fn wait_for(tasks: &[Arc<Task>], poll: Duration) {
    loop {
        if tasks.iter().all(|t| t.is_complete()) {
            return;
        }
        std::thread::sleep(poll);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use direct_io::MemFile;

    #[test]
    fn test_ids_are_monotonic() {
        let a = Task::builder().build();
        let b = Task::builder().build();
        assert!(b.id() > a.id());
    }

    #[test]
    fn test_status_transitions() {
        let t = Task::builder().build();
        assert_eq!(t.status(), TaskStatus::Wait);
        t.set_status(TaskStatus::AllocReady);
        assert!(t.status() < TaskStatus::Complete);
        t.set_status(TaskStatus::Complete);
        assert!(t.is_complete());
    }

    #[test]
    fn test_kernel_sees_pinned_buffers() {
        let file = MemFile::new(4096);
        let slice: FileSlice = FileSlice::new(file, 0);
        let sinfo = StrideInfo::contiguous(1024);

        let seen = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let seen2 = Arc::clone(&seen);
        let s2 = slice.clone();
        let t = Task::builder()
            .read(&slice, sinfo)
            .kernel(move |bufs| {
                let lease = bufs.input(&s2, sinfo);
                assert_eq!(lease.len(), 1024);
                seen2.store(true, Ordering::Release);
            })
            .build();

        let buf = Arc::new(IoBuffer::alloc(1024));
        t.pin(Key::new(slice.untyped(), sinfo), buf);
        t.run();
        assert!(seen.load(Ordering::Acquire));
    }

    #[test]
    fn test_parent_bookkeeping() {
        let p = Task::builder().build();
        let c = Task::builder().parent(&p).parent_id(9999).build();
        let mut parents = c.parents_mut();
        assert_eq!(parents.len(), 2);
        parents.retain(|&id| id != p.id());
        assert_eq!(*parents, vec![9999]);
    }

    #[test]
    fn test_continuation() {
        let a = Task::builder().build();
        let b = Task::builder().build();
        a.chain(Arc::clone(&b));
        let next = a.take_next().expect("chained");
        assert_eq!(next.id(), b.id());
        assert!(a.take_next().is_none());
    }
}
