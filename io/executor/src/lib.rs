//! Worker-thread pool for I/O descriptors with hazard detection.
//!
//! The engine funnels every asynchronous read, write-back, and eviction
//! write through this pool. Each worker owns a private submission context
//! (registered at spawn), pops descriptors from a shared queue, and runs
//! the descriptor's callback synchronously once the physical I/O is done.
//!
//! # Hazard detection
//!
//! Two concurrent writes whose sector-rounded file ranges intersect would
//! race through the read-modify-write path of the direct-I/O layer.
//! Before executing, a worker publishes its descriptor into a per-worker
//! slot and checks every other active slot; on a write/write overlap the
//! descriptor is deferred to a worker-local backlog and retried. Reads
//! are never deferred: read/write ordering is the task graph's
//! responsibility.
//!
//! The overlap predicate itself is a pure function over
//! [`StrideInfo`](direct_io::StrideInfo) patterns, exact at sector
//! granularity; see [`overlap`].

mod executor;
pub mod overlap;

pub use executor::{IoDesc, IoExecutor, IoKind};
pub use overlap::{Access, accesses_conflict, patterns_overlap};
