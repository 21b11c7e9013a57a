//! Out-of-core execution engine.
//!
//! Executes DAGs of fine-grained tasks over matrices whose working sets
//! exceed RAM, staging blocks between a bounded in-memory buffer pool and
//! NVMe-class storage. Each task declares the byte-exact slices of
//! backing files it reads and writes; the scheduler coordinates prefetch,
//! admission, compute, write-back, and eviction so compute threads stay
//! busy while memory stays within budget.
//!
//! # Architecture
//!
//! ```text
//!   caller ──add_task──► wait ──parents done──► prio ──allocate──►
//!     alloced ──buffers resident──► compute queue ──kernel──►
//!     complete queue ──release──► (continuation back to wait)
//! ```
//!
//! Buffers live in the [`block_cache`] crate's pool; reads, write-backs,
//! and evictions flow through the [`io_executor`] worker pool over
//! [`direct_io`] file handles.
//!
//! # Example
//!
//! ```no_run
//! use engine::{Config, Runtime, StrideInfo, Task};
//!
//! let rt = Runtime::new(Config::default().with_mount_dir("/mnt/nvme0"))?;
//! let src = rt.temp_alloc::<f32>(1 << 20, "src")?;
//! let dst = rt.temp_alloc::<f32>(1 << 20, "dst")?;
//!
//! let sinfo = StrideInfo::contiguous(1 << 20);
//! let (s, d) = (src.clone(), dst.clone());
//! let task = Task::builder()
//!     .read(&src, sinfo)
//!     .write(&dst, sinfo)
//!     .kernel(move |bufs| {
//!         let input = bufs.input(&s, sinfo);
//!         let mut output = bufs.output(&d, sinfo);
//!         for (o, i) in output.typed_mut::<f32>().iter_mut().zip(input.typed::<f32>()) {
//!             *o = i * 2.0;
//!         }
//!     })
//!     .build();
//! rt.add_task(task.clone());
//! rt.wait_for(&[task]);
//! rt.flush_cache();
//! # Ok::<(), engine::EngineError>(())
//! ```

mod config;
mod error;
pub mod logging;
mod prioritizer;
mod runtime;
mod scheduler;
mod task;

pub use config::{Config, LogFormat, LoggingConfig, SchedulerConfig, SchedulerOptions};
pub use error::EngineError;
pub use runtime::Runtime;
pub use scheduler::Scheduler;
pub use task::{Task, TaskBuffers, TaskBuilder, TaskStatus, wait_for};

// The types callers need to describe I/O.
pub use block_cache::{CacheStats, Key};
pub use direct_io::{
    DiskFile, FileHandle, FileSlice, IoBuffer, MemFile, Mode, ReadLease, StrideInfo, WriteLease,
};
