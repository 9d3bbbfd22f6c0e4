//! Similarity kernels and their ordering semantics.
//!
//! Both kernels read exactly `dims_aligned` floats per operand, where
//! `dims_aligned` is the table dimension rounded up to a multiple of 4.
//! The padding tail is zero on both sides of every comparison (stored
//! vectors are written into a zeroed slab, queries are padded at the
//! search boundary), and zeros are neutral for both kernels: they add
//! nothing to an L2 sum of squared differences, nothing to a dot product,
//! and nothing to a norm. The fixed 4-wide stride is what lets the inner
//! loops below run without a remainder path.
//!
//! "Better" is mode-relative: L2 squared distance ranks lower-is-better,
//! cosine similarity higher-is-better. Each mode also defines a worst
//! value that doubles as the "no candidate yet" sentinel in scan results.

use std::fmt;
use std::str::FromStr;

use crate::error::CacheError;

/// Worst possible L2 squared distance.
const L2_WORST: f32 = f32::INFINITY;
/// Worst possible cosine similarity. Also the score assigned when either
/// operand has zero norm, so zero vectors never win a comparison.
const COSINE_WORST: f32 = -1.0;

/// Similarity mode, fixed at table open.
///
/// The mode selects the kernel, the comparator, and the sentinel in one
/// place; call sites dispatch with a plain `match`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Squared Euclidean distance, lower is better.
    L2,
    /// Cosine similarity, higher is better.
    Cosine,
}

impl Mode {
    /// Score two aligned vectors. Pure: no allocation, no state.
    #[inline]
    pub fn score(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Mode::L2 => l2_squared(a, b),
            Mode::Cosine => cosine(a, b),
        }
    }

    /// Strict "x ranks ahead of y". Strictness is the observable
    /// tie-break: an equal score never displaces an incumbent, so the
    /// earlier-inserted candidate keeps its position.
    #[inline]
    pub fn is_better(self, x: f32, y: f32) -> bool {
        match self {
            Mode::L2 => x < y,
            Mode::Cosine => x > y,
        }
    }

    /// The sentinel score meaning "no candidate yet".
    #[inline]
    pub fn worst(self) -> f32 {
        match self {
            Mode::L2 => L2_WORST,
            Mode::Cosine => COSINE_WORST,
        }
    }
}

impl FromStr for Mode {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "L2NORM" => Ok(Mode::L2),
            "COSINE" => Ok(Mode::Cosine),
            other => Err(CacheError::InvalidMode(other.to_string())),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::L2 => "L2NORM",
            Mode::Cosine => "COSINE",
        })
    }
}

/// Squared Euclidean distance over two aligned slices.
///
/// Four independent accumulators break the serial dependency chain
/// between iterations, so the CPU's out-of-order engine can keep both
/// FMA pipes busy; LLVM folds each loop body into packed SIMD ops.
///
/// SAFETY argument for the `get_unchecked` block: both slices are
/// exactly `dims_aligned` long (the slab stride and the padded query are
/// produced by the same table), and `dims_aligned` is a multiple of 4,
/// so `base + 3 < chunks * 4 == len` for every iteration.
#[inline(always)]
fn l2_squared(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    debug_assert_eq!(a.len() % 4, 0);

    let chunks = a.len() / 4;
    let mut acc0 = 0.0f32;
    let mut acc1 = 0.0f32;
    let mut acc2 = 0.0f32;
    let mut acc3 = 0.0f32;

    unsafe {
        for i in 0..chunks {
            let base = i * 4;
            let d0 = a.get_unchecked(base) - b.get_unchecked(base);
            let d1 = a.get_unchecked(base + 1) - b.get_unchecked(base + 1);
            let d2 = a.get_unchecked(base + 2) - b.get_unchecked(base + 2);
            let d3 = a.get_unchecked(base + 3) - b.get_unchecked(base + 3);
            acc0 += d0 * d0;
            acc1 += d1 * d1;
            acc2 += d2 * d2;
            acc3 += d3 * d3;
        }
    }

    acc0 + acc1 + acc2 + acc3
}

/// Cosine similarity over two aligned slices.
///
/// One pass accumulates the dot product and both squared norms in
/// 4-lane accumulator arrays; the horizontal reductions happen once at
/// the end. A zero norm on either side yields the mode's worst value.
///
/// SAFETY argument: identical to `l2_squared`; both slices are
/// `dims_aligned` long and the loop bound is `dims_aligned / 4`.
#[inline(always)]
fn cosine(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    debug_assert_eq!(a.len() % 4, 0);

    let chunks = a.len() / 4;
    let mut dot = [0.0f32; 4];
    let mut norm_a = [0.0f32; 4];
    let mut norm_b = [0.0f32; 4];

    unsafe {
        for i in 0..chunks {
            let base = i * 4;
            for lane in 0..4 {
                let x = *a.get_unchecked(base + lane);
                let y = *b.get_unchecked(base + lane);
                dot[lane] += x * y;
                norm_a[lane] += x * x;
                norm_b[lane] += y * y;
            }
        }
    }

    let dot: f32 = dot.iter().sum();
    let norm_a: f32 = norm_a.iter().sum();
    let norm_b: f32 = norm_b.iter().sum();

    if norm_a == 0.0 || norm_b == 0.0 {
        return COSINE_WORST;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
