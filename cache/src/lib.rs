//! Bounded buffer pool for out-of-core staging.
//!
//! The cache owns every staged buffer in the engine. Buffers are keyed by
//! [`Key`], the pair (file slice, stride pattern), and move through a
//! small state machine (active, in-io, zero-ref, allocation backlog)
//! under a single mutex. See [`Cache`] for the five operations the
//! scheduler drives it with.

mod cache;
mod key;

pub use cache::{Cache, CacheStats};
pub use key::{Key, KeyMap, KeySet, PrehashedHasher};
