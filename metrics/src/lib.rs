//! Engine-wide counters with metriken integration.
//!
//! Every counter here is a process-wide [`metriken::Counter`] registered
//! through the `#[metric]` attribute, so an embedding application can walk
//! the metriken registry and export everything to Prometheus or logs.
//!
//! These counters aggregate across all engine instances in the process.
//! Components that need per-instance numbers (the cache budget tests, for
//! example) keep their own plain-atomic snapshots and increment these in
//! addition.
//!
//! # Example
//!
//! ```
//! metrics::CACHE_HIT.increment();
//! metrics::IO_READ.add(3);
//! assert!(metrics::CACHE_HIT.value() >= 1);
//! ```

use metriken::{Counter, metric};

/// Buffer found resident (active, zero-ref, or completed in-io) on lookup.
#[metric(name = "cache_hit")]
pub static CACHE_HIT: Counter = Counter::new();

/// Buffer not resident; a read or allocation was queued.
#[metric(name = "cache_miss")]
pub static CACHE_MISS: Counter = Counter::new();

/// Zero-ref buffer evicted to make room.
#[metric(name = "cache_evict")]
pub static CACHE_EVICT: Counter = Counter::new();

/// Eviction that had to write the buffer back to its backing file.
#[metric(name = "cache_writeback")]
pub static CACHE_WRITEBACK: Counter = Counter::new();

/// Read descriptors executed by the I/O worker pool.
#[metric(name = "io_read")]
pub static IO_READ: Counter = Counter::new();

/// Write descriptors executed by the I/O worker pool.
#[metric(name = "io_write")]
pub static IO_WRITE: Counter = Counter::new();

/// Descriptors deferred to a worker-local backlog after a write/write
/// range conflict.
#[metric(name = "io_hazard_defer")]
pub static IO_HAZARD_DEFER: Counter = Counter::new();

/// Submission or reap retries at the file-handle layer.
#[metric(name = "io_retry")]
pub static IO_RETRY: Counter = Counter::new();

/// Tasks retired by the scheduler.
#[metric(name = "tasks_complete")]
pub static TASKS_COMPLETE: Counter = Counter::new();

/// Admissions deferred because the cache could not free enough memory.
#[metric(name = "tasks_admission_stall")]
pub static TASKS_ADMISSION_STALL: Counter = Counter::new();

// Re-export metriken so consumers can walk the registry without adding
// their own dependency on it.
pub use metriken;
