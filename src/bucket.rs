//! Fixed-size arena buckets.
//!
//! Each bucket owns one contiguous 1 MiB slab of `f32` storage. Vectors
//! live at stride `dims_aligned` inside the slab, so the scan loop walks
//! one flat buffer sequentially instead of chasing per-vector heap
//! pointers; the slab is 64-byte aligned and the stride is a multiple of
//! 4 floats, which keeps every vector 16-byte aligned for the kernels.
//!
//! Slots are assigned monotonically: `high_water` counts slots ever
//! assigned and only grows. A deleted slot has its floats zeroed and its
//! liveness flag cleared, and is never reused; compaction is a rebuild,
//! not an in-place operation.

use crate::error::{CacheError, Result};

/// Slab size per bucket.
pub(crate) const SLAB_BYTES: usize = 1 << 20;
/// Slab size in floats.
pub(crate) const SLAB_FLOATS: usize = SLAB_BYTES / 4;

const BLOCK_FLOATS: usize = 16;
const SLAB_BLOCKS: usize = SLAB_FLOATS / BLOCK_FLOATS;

/// One 64-byte, cache-line-aligned group of floats. The slab is a boxed
/// slice of these so its base address is 64-byte aligned without reaching
/// for raw `std::alloc` calls.
#[derive(Clone, Copy)]
#[repr(C, align(64))]
struct SlabBlock([f32; BLOCK_FLOATS]);

impl SlabBlock {
    const ZERO: SlabBlock = SlabBlock([0.0; BLOCK_FLOATS]);
}

/// Zero-initialized aligned float storage.
struct Slab {
    blocks: Box<[SlabBlock]>,
}

impl Slab {
    /// Allocate a zeroed slab, surfacing allocation failure instead of
    /// aborting.
    fn try_zeroed() -> Result<Self> {
        let mut blocks = Vec::new();
        blocks
            .try_reserve_exact(SLAB_BLOCKS)
            .map_err(|_| CacheError::OutOfMemory)?;
        blocks.resize(SLAB_BLOCKS, SlabBlock::ZERO);
        Ok(Slab {
            blocks: blocks.into_boxed_slice(),
        })
    }

    /// View the slab as a flat float slice.
    ///
    /// SAFETY: `SlabBlock` is `repr(C)` over `[f32; 16]` with size 64 and
    /// alignment 64, so `SLAB_BLOCKS` contiguous blocks are exactly
    /// `SLAB_FLOATS` contiguous, initialized `f32` values.
    #[inline]
    fn as_floats(&self) -> &[f32] {
        unsafe { std::slice::from_raw_parts(self.blocks.as_ptr().cast::<f32>(), SLAB_FLOATS) }
    }

    /// Mutable flat view. SAFETY: same layout argument as `as_floats`;
    /// `&mut self` guarantees exclusivity.
    #[inline]
    fn as_floats_mut(&mut self) -> &mut [f32] {
        unsafe {
            std::slice::from_raw_parts_mut(self.blocks.as_mut_ptr().cast::<f32>(), SLAB_FLOATS)
        }
    }
}

/// One arena bucket: a slab, per-slot liveness, and the high-water mark.
pub(crate) struct Bucket {
    slab: Slab,
    live: Box<[bool]>,
    high_water: usize,
    stride: usize,
}

impl Bucket {
    /// Allocate a bucket for vectors of physical stride `stride` floats.
    /// Capacity is however many whole strides fit in the slab.
    pub(crate) fn try_new(stride: usize) -> Result<Self> {
        debug_assert!(stride > 0 && stride % 4 == 0);
        let capacity = SLAB_FLOATS / stride;
        debug_assert!(capacity > 0, "stride {stride} exceeds the slab");

        let slab = Slab::try_zeroed()?;
        let mut live = Vec::new();
        live.try_reserve_exact(capacity)
            .map_err(|_| CacheError::OutOfMemory)?;
        live.resize(capacity, false);

        Ok(Bucket {
            slab,
            live: live.into_boxed_slice(),
            high_water: 0,
            stride,
        })
    }

    /// Number of slots this bucket can ever hold.
    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.live.len()
    }

    /// Slots ever assigned. Monotonically non-decreasing.
    #[inline]
    pub(crate) fn high_water(&self) -> usize {
        self.high_water
    }

    #[inline]
    pub(crate) fn is_full(&self) -> bool {
        self.high_water == self.capacity()
    }

    /// Whether `slot` currently holds a vector.
    #[inline]
    pub(crate) fn is_live(&self, slot: usize) -> bool {
        slot < self.high_water && self.live[slot]
    }

    /// Copy `v` into the next slot and return its index. The tail of the
    /// slot beyond `v.len()` is zeroed so the kernels can read the full
    /// stride.
    ///
    /// Caller guarantees the bucket is not full and `v` fits the stride.
    pub(crate) fn append(&mut self, v: &[f32]) -> usize {
        debug_assert!(!self.is_full());
        debug_assert!(v.len() <= self.stride);

        let slot = self.high_water;
        let base = slot * self.stride;
        let dst = &mut self.slab.as_floats_mut()[base..base + self.stride];
        dst[..v.len()].copy_from_slice(v);
        dst[v.len()..].fill(0.0);

        self.live[slot] = true;
        self.high_water += 1;
        slot
    }

    /// Zero a slot and clear its liveness. A dead or never-assigned slot
    /// is left untouched; the slot index is never handed out again.
    /// Returns whether a live vector was removed.
    pub(crate) fn mark_deleted(&mut self, slot: usize) -> bool {
        if !self.is_live(slot) {
            return false;
        }
        let base = slot * self.stride;
        self.slab.as_floats_mut()[base..base + self.stride].fill(0.0);
        self.live[slot] = false;
        true
    }

    /// The full aligned stride of a slot. Caller guarantees the slot is
    /// live (the scan checks liveness before reading).
    #[inline]
    pub(crate) fn vector(&self, slot: usize) -> &[f32] {
        debug_assert!(self.is_live(slot));
        let base = slot * self.stride;
        &self.slab.as_floats()[base..base + self.stride]
    }
}
