//! # vcache — In-Memory Vector Cache
//!
//! Fixed-dimension `f32` vectors in SIMD-aligned slabs, exhaustive
//! nearest-neighbor scans under L2 squared distance or cosine
//! similarity, stable encoded ids across deletions.
//!
//! ## Architecture Overview
//!
//! ### Memory Layout: Bucketed Slabs
//!
//! The naive layout stores each vector as its own heap allocation
//! (`Vec<Vec<f32>>`). Each scan iteration then chases a pointer to a
//! random heap address, thrashing the cache with TLB misses.
//!
//! vcache instead carves vectors out of **contiguous 1 MiB slabs**, one
//! per bucket, at a fixed stride of `dims` rounded up to a multiple of 4
//! (zero-padded). The scan loop walks each slab sequentially, loading
//! whole cache lines straight into SIMD registers. The stride keeps
//! every vector 16-byte aligned and lets the kernels run 4 lanes at a
//! time with no remainder path.
//!
//! Buckets are append-only arenas: slots are assigned monotonically and
//! a deleted slot is zeroed, marked dead, and never reused, so an
//! encoded id stays valid for the lifetime of the table no matter what
//! is deleted around it. The table caps out at 128 buckets (128 MiB of
//! vector storage) and then refuses inserts rather than growing.
//!
//! ### Identifiers
//!
//! A stored vector is named by one 32-bit integer: bucket index in the
//! top 8 bits (signed), slot index in the low 24. `-1` means "no
//! match". See [`VectorId`].
//!
//! ### Concurrency
//!
//! One table-wide `parking_lot::RwLock` serializes writers and lets
//! scans run concurrently. `parking_lot` instead of `std::sync` because
//! uncontended acquisition is a single CAS with no futex call, and
//! readers do not have to thread poisoning through every search.
//!
//! ### The Boundary
//!
//! [`Registry`] pairs a table with a [`RecordStore`]: records persist as
//! JSON files keyed by a content hash of their first embedding, and the
//! index is rebuilt at startup by replaying the store. The index itself
//! is never persisted.

// Global allocator: mimalloc. Per-thread heaps with size-segregated free
// lists make the small allocations around the hot path (query padding,
// result buffers) nearly contention-free. Declared at the crate root so
// it covers every allocation in the process.
use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

mod bucket;
pub mod config;
mod error;
mod id;
mod kernel;
mod record;
mod registry;
mod scan;
mod store;
mod table;

pub use error::{CacheError, Result};
pub use id::{Match, VectorId};
pub use kernel::Mode;
pub use record::{external_id, Record};
pub use registry::Registry;
pub use store::{FsRecordStore, RecordStore};
pub use table::{Table, MAX_BUCKETS};
