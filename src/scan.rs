//! Exhaustive scans over all live slots.
//!
//! Both scans walk buckets in order and slots in assignment order, so the
//! candidate stream is insertion-ordered. Combined with the strict
//! `is_better` comparator this fixes the tie-break: an equal score never
//! displaces an incumbent, and the earlier-inserted vector wins.
//!
//! The caller (the table) holds the read lock for the whole traversal,
//! including result-buffer setup, so a scan observes every insert either
//! entirely or not at all.

use rayon::prelude::*;

use crate::bucket::Bucket;
use crate::error::{CacheError, Result};
use crate::id::{Match, VectorId};
use crate::kernel::Mode;

/// Best single match across all live slots, or `Match::none` for a table
/// with no live vectors.
pub(crate) fn top1(buckets: &[Bucket], mode: Mode, query: &[f32]) -> Match {
    let mut best = Match::none(mode);
    for (b, bucket) in buckets.iter().enumerate() {
        scan_bucket(bucket, b, mode, query, &mut best);
    }
    best
}

/// Sequential scan of one bucket, folding into `best`.
#[inline]
fn scan_bucket(bucket: &Bucket, b: usize, mode: Mode, query: &[f32], best: &mut Match) {
    for slot in 0..bucket.high_water() {
        if !bucket.is_live(slot) {
            continue;
        }
        let score = mode.score(bucket.vector(slot), query);
        if mode.is_better(score, best.score) {
            *best = Match {
                id: VectorId::encode(b, slot),
                score,
            };
        }
    }
}

/// Parallel top-1: each bucket scans sequentially on the rayon pool, then
/// per-bucket winners reduce to one. The reduction prefers the smaller
/// encoded id on equal scores, which reproduces the sequential tie-break
/// (encoded ids order by insertion position).
pub(crate) fn top1_parallel(buckets: &[Bucket], mode: Mode, query: &[f32]) -> Match {
    buckets
        .par_iter()
        .enumerate()
        .map(|(b, bucket)| {
            let mut best = Match::none(mode);
            scan_bucket(bucket, b, mode, query, &mut best);
            best
        })
        .reduce(|| Match::none(mode), |a, b| earlier_of(mode, a, b))
}

/// Deterministic two-way merge: strictly better score wins, equal scores
/// go to the earlier (smaller) id, and the sentinel loses to anything
/// real.
fn earlier_of(mode: Mode, a: Match, b: Match) -> Match {
    if mode.is_better(a.score, b.score) {
        return a;
    }
    if mode.is_better(b.score, a.score) {
        return b;
    }
    match (a.is_none(), b.is_none()) {
        (true, _) => b,
        (false, true) => a,
        (false, false) => {
            if a.id <= b.id {
                a
            } else {
                b
            }
        }
    }
}

/// Top-`n` scan. The result is sorted best-first; if fewer than `n` live
/// vectors exist the tail is `(NONE, worst_value)` sentinels.
pub(crate) fn top_n(buckets: &[Bucket], mode: Mode, query: &[f32], n: usize) -> Result<Vec<Match>> {
    let mut results = Vec::new();
    results
        .try_reserve_exact(n)
        .map_err(|_| CacheError::OutOfMemory)?;
    results.resize(n, Match::none(mode));
    if n == 0 {
        return Ok(results);
    }

    for (b, bucket) in buckets.iter().enumerate() {
        for slot in 0..bucket.high_water() {
            if !bucket.is_live(slot) {
                continue;
            }
            let score = mode.score(bucket.vector(slot), query);
            offer(&mut results, mode, VectorId::encode(b, slot), score);
        }
    }
    Ok(results)
}

/// Online insertion into the sorted result buffer: find the first rank
/// the candidate strictly beats, shift the tail right by one (dropping
/// the last entry), and take that rank. No strict win means no change,
/// so incumbents keep their position on ties.
#[inline]
fn offer(results: &mut [Match], mode: Mode, id: VectorId, score: f32) {
    let Some(rank) = results.iter().position(|r| mode.is_better(score, r.score)) else {
        return;
    };
    results[rank..].rotate_right(1);
    results[rank] = Match { id, score };
}
