//! Process-facing entry points.
//!
//! A [`Runtime`] owns one scheduler stack and the mount directory for
//! temporary backing files. Creating it registers the calling thread for
//! I/O; dropping it shuts the scheduler down, flushes the cache, and
//! deregisters the thread. There are no process-wide singletons beyond
//! the task id counter: kernels receive the runtime explicitly.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use block_cache::CacheStats;
use direct_io::{DiskFile, FileSlice, Mode};

use crate::config::{Config, SchedulerOptions};
use crate::error::EngineError;
use crate::scheduler::Scheduler;
use crate::task::Task;

/// Temporary allocations are rounded up to page granularity.
const PAGE_LEN: u64 = 4096;

/// One engine instance: scheduler, cache, I/O pool, and temp-file home.
pub struct Runtime {
    scheduler: Scheduler,
    mount_dir: PathBuf,
}

impl Runtime {
    /// Bring the engine up and register the calling thread for I/O.
    pub fn new(config: Config) -> Result<Self, EngineError> {
        std::fs::create_dir_all(&config.mount_dir)?;
        direct_io::register_thread()?;
        debug!("mount_dir = {}", config.mount_dir.display());
        let scheduler = match Scheduler::new(&config) {
            Ok(s) => s,
            Err(e) => {
                let _ = direct_io::deregister_thread();
                return Err(e);
            }
        };
        Ok(Self {
            scheduler,
            mount_dir: config.mount_dir,
        })
    }

    /// The scheduler, for callers that drive it directly.
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Map an existing file. The returned slice points at byte 0; offset
    /// with [`FileSlice::add`].
    pub fn map_file<T>(
        &self,
        path: impl AsRef<std::path::Path>,
        mode: Mode,
    ) -> Result<FileSlice<T>, EngineError> {
        let handle = DiskFile::open(path, mode)?;
        Ok(FileSlice::new(handle, 0))
    }

    /// Unmap a slice. The backing file closes when its last slice drops.
    pub fn unmap_file<T>(&self, slice: FileSlice<T>) {
        drop(slice);
    }

    /// Allocate an automatically named temporary backing file of at
    /// least `n_bytes` (rounded up to page granularity), opened
    /// read-write.
    pub fn temp_alloc<T>(&self, n_bytes: u64, tag: &str) -> Result<FileSlice<T>, EngineError> {
        if n_bytes == 0 {
            return Err(EngineError::Usage("cannot allocate zero bytes".into()));
        }
        let n_bytes = n_bytes.div_ceil(PAGE_LEN) * PAGE_LEN;
        let name = if tag.is_empty() {
            format!("tmp_{n_bytes}")
        } else {
            format!("tmp_{tag}_{n_bytes}")
        };
        let path = self.mount_dir.join(name);
        let handle = DiskFile::create(&path, n_bytes)?;
        Ok(FileSlice::new(handle, 0))
    }

    /// Unmap a temporary allocation and unlink its backing file.
    pub fn temp_free<T>(&self, slice: FileSlice<T>) -> Result<(), EngineError> {
        let path = slice
            .handle()
            .path()
            .ok_or_else(|| EngineError::Usage("slice is not file-backed".into()))?
            .to_path_buf();
        drop(slice);
        debug!("removing {}", path.display());
        std::fs::remove_file(path)?;
        Ok(())
    }

    /// Blocking read of `dest.len()` elements from `src`.
    pub fn read_sync<T: Copy>(&self, dest: &mut [T], src: &FileSlice<T>) -> Result<(), EngineError> {
        // SAFETY: T is Copy (plain data); viewing it as bytes is sound,
        // and the I/O writes every byte or fails.
        let bytes = unsafe {
            std::slice::from_raw_parts_mut(dest.as_mut_ptr() as *mut u8, std::mem::size_of_val(dest))
        };
        src.handle().read(src.offset(), bytes)?;
        Ok(())
    }

    /// Blocking write of `src.len()` elements to `dest`.
    pub fn write_sync<T: Copy>(&self, dest: &FileSlice<T>, src: &[T]) -> Result<(), EngineError> {
        // SAFETY: as in read_sync.
        let bytes = unsafe {
            std::slice::from_raw_parts(src.as_ptr() as *const u8, std::mem::size_of_val(src))
        };
        dest.handle().write(dest.offset(), bytes)?;
        Ok(())
    }

    /// Fill `n_bytes` at `dest` with `byte`.
    pub fn fill<T>(&self, dest: &FileSlice<T>, byte: u8, n_bytes: u64) -> Result<(), EngineError> {
        let buf = vec![byte; n_bytes as usize];
        dest.handle().write(dest.offset(), &buf)?;
        Ok(())
    }

    /// Device-internal copy of `n_bytes` from `src` to `dest`.
    pub fn copy_sync<T, W>(
        &self,
        dest: &FileSlice<T>,
        src: &FileSlice<W>,
        n_bytes: u64,
    ) -> Result<(), EngineError> {
        src.handle()
            .copy_to(src.offset(), dest.handle().as_ref(), dest.offset(), n_bytes)?;
        Ok(())
    }

    /// Truncate the backing file to `new_len` bytes past the slice.
    pub fn truncate<T>(&self, slice: &FileSlice<T>, new_len: u64) -> Result<(), EngineError> {
        slice.handle().truncate(slice.offset() + new_len)?;
        Ok(())
    }

    /// Submit a task to the scheduler.
    pub fn add_task(&self, task: Arc<Task>) {
        self.scheduler.add_task(task);
    }

    /// Sleep-poll until the given tasks are all complete.
    pub fn wait_for(&self, tasks: &[Arc<Task>]) {
        crate::task::wait_for(tasks, Duration::from_millis(10));
    }

    /// Flush write-back buffers to their backing files.
    pub fn flush_cache(&self) {
        self.scheduler.flush_cache();
    }

    /// Snapshot cache occupancy and counters.
    pub fn cache_stats(&self) -> CacheStats {
        self.scheduler.cache_stats()
    }

    /// Adjust behavioral switches.
    pub fn set_options(&self, options: &SchedulerOptions) {
        self.scheduler.set_options(options);
    }

    /// Retune the compute pool.
    pub fn set_num_compute_threads(&self, n: usize) {
        self.scheduler.set_num_compute_threads(n);
    }

    /// Current compute thread target.
    pub fn num_compute_threads(&self) -> usize {
        self.scheduler.num_compute_threads()
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        // The scheduler (and its cache flush) drops after this; its I/O
        // goes through the worker pool, not this thread's context.
        let _ = direct_io::deregister_thread();
    }
}
