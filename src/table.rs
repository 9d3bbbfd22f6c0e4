//! The index core: a bounded arena of buckets behind one table-wide
//! reader-writer lock.
//!
//! The public [`Table`] is a thin wrapper holding
//! `parking_lot::RwLock<TableCore>`; every mutation goes through
//! `write()` and every scan through `read()`, held for the whole
//! operation. That gives the full discipline in one place: inserts
//! linearize and hand out ascending ids, a scan observes an insert
//! entirely or not at all, and a delete cannot interleave with a scan.
//!
//! Storage is capped: once all 128 buckets are full, inserts fail with
//! `Capacity` instead of growing. Deleted slots are never reclaimed;
//! callers that need compaction rebuild a fresh table by replaying their
//! record store.

use std::borrow::Cow;

use parking_lot::RwLock;

use crate::bucket::{Bucket, SLAB_FLOATS};
use crate::error::{CacheError, Result};
use crate::id::{Match, VectorId};
use crate::kernel::Mode;
use crate::scan;

/// Bucket cap. The id codec stores the bucket index as a signed byte, so
/// 128 fills the representable range `0..=127` exactly; raising this
/// requires widening the encoding.
pub const MAX_BUCKETS: usize = 128;

/// Thread-safe vector index.
///
/// `parking_lot::RwLock` rather than `std::sync::RwLock`: uncontended
/// acquisition is a single CAS with no futex call, and there is no
/// poisoning to thread through the API.
pub struct Table {
    inner: RwLock<TableCore>,
}

impl Table {
    /// Open a table for vectors of `dims` dimensions under `mode`.
    ///
    /// Allocates bucket 0 eagerly; later buckets are allocated as the
    /// previous one fills.
    ///
    /// Fails with `InvalidDims` if `dims` is zero or too large for one
    /// aligned vector to fit a bucket slab; an unknown mode name fails
    /// earlier, at `Mode::from_str`.
    pub fn open(dims: usize, mode: Mode) -> Result<Table> {
        if dims == 0 {
            return Err(CacheError::InvalidDims {
                expected: 1,
                got: 0,
            });
        }
        let dims_aligned = dims.div_ceil(4) * 4;
        if dims_aligned > SLAB_FLOATS {
            return Err(CacheError::InvalidDims {
                expected: SLAB_FLOATS,
                got: dims_aligned,
            });
        }

        let mut buckets = Vec::new();
        buckets
            .try_reserve_exact(MAX_BUCKETS)
            .map_err(|_| CacheError::OutOfMemory)?;
        buckets.push(Bucket::try_new(dims_aligned)?);

        Ok(Table {
            inner: RwLock::new(TableCore {
                dims,
                dims_aligned,
                mode,
                buckets,
                live_count: 0,
            }),
        })
    }

    /// Insert a vector and return its encoded id.
    ///
    /// Fails with `InvalidDims` on a length mismatch, `Capacity` once all
    /// buckets are full, and `OutOfMemory` if a fresh bucket cannot be
    /// allocated. A failed insert leaves the table unchanged.
    pub fn insert(&self, v: &[f32]) -> Result<VectorId> {
        self.inner.write().insert(v)
    }

    /// Delete by id. Unknown, out-of-range, and already-deleted ids are a
    /// silent no-op; the slot is zeroed and never reused.
    pub fn delete(&self, id: VectorId) {
        self.inner.write().delete(id);
    }

    /// Best single match for `query`, or `Match::none` if no live vector
    /// exists. Holds the read lock for the entire scan.
    pub fn search(&self, query: &[f32]) -> Result<Match> {
        let core = self.inner.read();
        let query = core.check_and_pad(query)?;
        Ok(scan::top1(&core.buckets, core.mode, &query))
    }

    /// Top-1 on the rayon pool. Same contract and same result as
    /// [`Table::search`]; worth it once the live set is large enough to
    /// amortize thread dispatch.
    pub fn search_parallel(&self, query: &[f32]) -> Result<Match> {
        let core = self.inner.read();
        let query = core.check_and_pad(query)?;
        Ok(scan::top1_parallel(&core.buckets, core.mode, &query))
    }

    /// Best `n` matches, sorted best-first. If fewer than `n` live
    /// vectors exist the tail is `(NONE, worst_value)` sentinels; trim on
    /// [`Match::is_none`].
    pub fn search_n(&self, query: &[f32], n: usize) -> Result<Vec<Match>> {
        let core = self.inner.read();
        let query = core.check_and_pad(query)?;
        scan::top_n(&core.buckets, core.mode, &query, n)
    }

    /// Number of live vectors.
    pub fn len(&self) -> usize {
        self.inner.read().live_count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Configured dimension.
    pub fn dims(&self) -> usize {
        self.inner.read().dims
    }

    /// Similarity mode fixed at open.
    pub fn mode(&self) -> Mode {
        self.inner.read().mode
    }

    /// Buckets allocated so far (1 to `MAX_BUCKETS`).
    pub fn bucket_count(&self) -> usize {
        self.inner.read().buckets.len()
    }
}

/// The unsynchronized core. Invariants: `buckets` is never empty, never
/// longer than `MAX_BUCKETS`, and every bucket before the last is full.
struct TableCore {
    dims: usize,
    dims_aligned: usize,
    mode: Mode,
    buckets: Vec<Bucket>,
    live_count: usize,
}

impl TableCore {
    fn insert(&mut self, v: &[f32]) -> Result<VectorId> {
        if v.len() != self.dims {
            return Err(CacheError::InvalidDims {
                expected: self.dims,
                got: v.len(),
            });
        }

        if self.buckets[self.buckets.len() - 1].is_full() {
            if self.buckets.len() == MAX_BUCKETS {
                return Err(CacheError::Capacity {
                    max_buckets: MAX_BUCKETS,
                });
            }
            // Allocate before pushing: a failed allocation leaves the
            // bucket array untouched. The push itself cannot reallocate,
            // the vector was reserved to MAX_BUCKETS at open.
            let fresh = Bucket::try_new(self.dims_aligned)?;
            self.buckets.push(fresh);
        }

        let b = self.buckets.len() - 1;
        let slot = self.buckets[b].append(v);
        self.live_count += 1;
        Ok(VectorId::encode(b, slot))
    }

    fn delete(&mut self, id: VectorId) {
        let bucket = id.bucket();
        if bucket < 0 || bucket as usize >= self.buckets.len() {
            return;
        }
        if self.buckets[bucket as usize].mark_deleted(id.slot()) {
            self.live_count -= 1;
        }
    }

    /// Validate the query length and pad it to the aligned stride. When
    /// the dimension is already a multiple of 4 the query is borrowed
    /// as-is; otherwise a short zero-padded copy is made once per scan.
    fn check_and_pad<'q>(&self, query: &'q [f32]) -> Result<Cow<'q, [f32]>> {
        if query.len() != self.dims {
            return Err(CacheError::InvalidDims {
                expected: self.dims,
                got: query.len(),
            });
        }
        if self.dims == self.dims_aligned {
            return Ok(Cow::Borrowed(query));
        }
        let mut padded = vec![0.0f32; self.dims_aligned];
        padded[..self.dims].copy_from_slice(query);
        Ok(Cow::Owned(padded))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids_of(results: &[Match]) -> Vec<VectorId> {
        results.iter().map(|m| m.id).collect()
    }

    #[test]
    fn l2_exact_match_and_ordered_top_n() {
        let table = Table::open(3, Mode::L2).unwrap();
        let i0 = table.insert(&[1.0, 0.0, 0.0]).unwrap();
        let i1 = table.insert(&[0.0, 1.0, 0.0]).unwrap();
        let i2 = table.insert(&[0.0, 0.0, 1.0]).unwrap();

        let best = table.search(&[0.0, 0.0, 1.0]).unwrap();
        assert_eq!(best.id, i2);
        assert_eq!(best.score, 0.0);

        // The two orthogonal vectors tie at distance 2; the earlier
        // inserted one wins the second rank.
        let top2 = table.search_n(&[1.0, 0.0, 0.0], 2).unwrap();
        assert_eq!(top2[0].id, i0);
        assert_eq!(top2[0].score, 0.0);
        assert_eq!(top2[1].id, i1);
        assert_eq!(top2[1].score, 2.0);
    }

    #[test]
    fn cosine_ranks_by_angle() {
        let table = Table::open(2, Mode::Cosine).unwrap();
        let ix = table.insert(&[1.0, 0.0]).unwrap();
        let iy = table.insert(&[0.0, 1.0]).unwrap();
        let id = table.insert(&[1.0, 1.0]).unwrap();

        let best = table.search(&[2.0, 2.0]).unwrap();
        assert_eq!(best.id, id);
        assert!((best.score - 1.0).abs() < 1e-5);

        let top3 = table.search_n(&[1.0, 0.0], 3).unwrap();
        assert_eq!(ids_of(&top3), vec![ix, id, iy]);
        assert!((top3[0].score - 1.0).abs() < 1e-5);
        assert!((top3[1].score - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-4);
        assert!(top3[2].score.abs() < 1e-6);
    }

    #[test]
    fn delete_shifts_the_tie_to_the_earlier_survivor() {
        let table = Table::open(3, Mode::L2).unwrap();
        let i0 = table.insert(&[1.0, 0.0, 0.0]).unwrap();
        let _i1 = table.insert(&[0.0, 1.0, 0.0]).unwrap();
        let i2 = table.insert(&[0.0, 0.0, 1.0]).unwrap();

        table.delete(i2);
        let best = table.search(&[0.0, 0.0, 1.0]).unwrap();
        assert_eq!(best.id, i0);
        assert_eq!(best.score, 2.0);
    }

    #[test]
    fn insert_then_search_recovers_the_id() {
        let l2 = Table::open(8, Mode::L2).unwrap();
        let cos = Table::open(8, Mode::Cosine).unwrap();
        let v: Vec<f32> = (1..=8).map(|i| i as f32 * 0.3).collect();

        let id = l2.insert(&v).unwrap();
        let hit = l2.search(&v).unwrap();
        assert_eq!(hit.id, id);
        assert_eq!(hit.score, 0.0);

        let id = cos.insert(&v).unwrap();
        let hit = cos.search(&v).unwrap();
        assert_eq!(hit.id, id);
        assert!((hit.score - 1.0).abs() < 1e-5);
    }

    #[test]
    fn ids_are_unique_and_ascending() {
        let table = Table::open(4, Mode::L2).unwrap();
        let mut last = VectorId::NONE;
        for i in 0..1000 {
            let id = table.insert(&[i as f32, 0.0, 0.0, 0.0]).unwrap();
            assert!(id > last, "ids must be handed out in ascending order");
            last = id;
        }
        assert_eq!(table.len(), 1000);
    }

    #[test]
    fn delete_is_idempotent_and_search_never_returns_a_deleted_id() {
        let table = Table::open(2, Mode::L2).unwrap();
        let a = table.insert(&[1.0, 0.0]).unwrap();
        let b = table.insert(&[0.0, 1.0]).unwrap();

        table.delete(a);
        table.delete(a);
        assert_eq!(table.len(), 1);

        let best = table.search(&[1.0, 0.0]).unwrap();
        assert_eq!(best.id, b);

        let top = table.search_n(&[1.0, 0.0], 4).unwrap();
        assert!(top.iter().all(|m| m.id != a));
    }

    #[test]
    fn delete_ignores_garbage_ids() {
        let table = Table::open(2, Mode::L2).unwrap();
        table.insert(&[1.0, 0.0]).unwrap();
        table.delete(VectorId::NONE);
        table.delete(VectorId(i32::MAX));
        table.delete(VectorId::encode(5, 0));
        table.delete(VectorId::encode(0, 123));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn empty_table_returns_the_sentinel() {
        let table = Table::open(4, Mode::L2).unwrap();
        let best = table.search(&[0.0, 0.0, 0.0, 0.0]).unwrap();
        assert!(best.is_none());
        assert_eq!(best.score, f32::INFINITY);

        let table = Table::open(4, Mode::Cosine).unwrap();
        let best = table.search(&[1.0, 0.0, 0.0, 0.0]).unwrap();
        assert!(best.is_none());
        assert_eq!(best.score, -1.0);
    }

    #[test]
    fn short_result_sets_are_sentinel_padded() {
        let table = Table::open(2, Mode::L2).unwrap();
        table.insert(&[1.0, 0.0]).unwrap();
        table.insert(&[0.0, 1.0]).unwrap();

        let top5 = table.search_n(&[1.0, 0.0], 5).unwrap();
        assert_eq!(top5.len(), 5);
        assert!(!top5[0].is_none());
        assert!(!top5[1].is_none());
        for m in &top5[2..] {
            assert!(m.is_none());
            assert_eq!(m.score, f32::INFINITY);
        }

        assert!(table.search_n(&[1.0, 0.0], 0).unwrap().is_empty());
    }

    #[test]
    fn top_n_agrees_with_an_exhaustive_sort() {
        use rand::{rngs::StdRng, Rng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(7);
        let table = Table::open(6, Mode::Cosine).unwrap();
        let mut stored: Vec<(VectorId, Vec<f32>)> = Vec::new();
        for _ in 0..200 {
            let v: Vec<f32> = (0..6).map(|_| rng.gen::<f32>() * 2.0 - 1.0).collect();
            let id = table.insert(&v).unwrap();
            stored.push((id, v));
        }
        // Punch some holes.
        for i in (0..200).step_by(7) {
            table.delete(stored[i].0);
        }
        let live: Vec<&(VectorId, Vec<f32>)> = stored
            .iter()
            .enumerate()
            .filter(|(i, _)| i % 7 != 0)
            .map(|(_, e)| e)
            .collect();

        let query: Vec<f32> = (0..6).map(|_| rng.gen::<f32>() * 2.0 - 1.0).collect();
        let got = table.search_n(&query, 10).unwrap();

        // Naive oracle: score everything, sort descending, keep ties in
        // insertion order (sort_by is stable and `live` is id-ordered).
        let mut oracle: Vec<(VectorId, f32)> = live
            .iter()
            .map(|(id, v)| {
                let mut padded = v.clone();
                padded.resize(8, 0.0);
                let mut q = query.clone();
                q.resize(8, 0.0);
                (*id, Mode::Cosine.score(&padded, &q))
            })
            .collect();
        oracle.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());

        for (rank, m) in got.iter().enumerate() {
            assert_eq!(m.id, oracle[rank].0, "rank {rank}");
            assert!((m.score - oracle[rank].1).abs() < 1e-6, "rank {rank}");
        }
        // And the contract on result ordering itself.
        for w in got.windows(2) {
            assert!(!Mode::Cosine.is_better(w[1].score, w[0].score));
        }
    }

    #[test]
    fn padding_tail_is_invisible_to_scores() {
        let l2 = Table::open(3, Mode::L2).unwrap();
        let id = l2.insert(&[1.0, 2.0, 3.0]).unwrap();
        let hit = l2.search(&[1.0, 2.0, 3.0]).unwrap();
        assert_eq!((hit.id, hit.score), (id, 0.0));

        let cos = Table::open(3, Mode::Cosine).unwrap();
        let id = cos.insert(&[1.0, 2.0, 3.0]).unwrap();
        let hit = cos.search(&[1.0, 2.0, 3.0]).unwrap();
        assert_eq!(hit.id, id);
        assert!((hit.score - 1.0).abs() < 1e-5);
    }

    #[test]
    fn open_rejects_unusable_dimensions() {
        assert!(matches!(
            Table::open(0, Mode::L2),
            Err(CacheError::InvalidDims {
                expected: 1,
                got: 0
            })
        ));
        // One aligned vector must fit a bucket slab.
        assert!(matches!(
            Table::open(SLAB_FLOATS + 1, Mode::Cosine),
            Err(CacheError::InvalidDims { .. })
        ));
        assert!(Table::open(SLAB_FLOATS, Mode::L2).is_ok());
    }

    #[test]
    fn insert_and_query_validate_dimensions() {
        let table = Table::open(4, Mode::L2).unwrap();
        assert!(matches!(
            table.insert(&[1.0, 2.0]),
            Err(CacheError::InvalidDims {
                expected: 4,
                got: 2
            })
        ));
        assert!(matches!(
            table.search(&[1.0; 5]),
            Err(CacheError::InvalidDims {
                expected: 4,
                got: 5
            })
        ));
        assert!(matches!(
            table.search_n(&[1.0; 3], 2),
            Err(CacheError::InvalidDims { .. })
        ));
        assert_eq!(table.len(), 0, "failed inserts must not leave state");
    }

    #[test]
    fn rollover_starts_a_second_bucket_at_65536() {
        // At dims 4 a bucket holds 1 MiB / 16 B = 65,536 slots.
        let table = Table::open(4, Mode::L2).unwrap();
        let per_bucket = 65_536usize;

        let mut last = VectorId::NONE;
        for i in 0..per_bucket {
            last = table.insert(&[i as f32, 1.0, 2.0, 3.0]).unwrap();
        }
        assert_eq!(last.bucket(), 0);
        assert_eq!(last.slot(), per_bucket - 1);
        assert_eq!(table.bucket_count(), 1);

        let next = table.insert(&[9.0, 9.0, 9.0, 9.0]).unwrap();
        assert_eq!(next.bucket(), 1);
        assert_eq!(next.slot(), 0);
        assert_eq!(table.bucket_count(), 2);
    }

    #[test]
    fn capacity_error_after_the_last_bucket_fills() {
        let table = Table::open(4, Mode::L2).unwrap();
        let per_bucket = 65_536usize;
        let total = MAX_BUCKETS * per_bucket;

        let v = [1.0, 2.0, 3.0, 4.0];
        for _ in 0..total {
            table.insert(&v).unwrap();
        }
        assert_eq!(table.len(), total);
        assert_eq!(table.bucket_count(), MAX_BUCKETS);

        assert!(matches!(
            table.insert(&v),
            Err(CacheError::Capacity { max_buckets: 128 })
        ));

        // The table stays queryable and prior ids stay valid.
        let hit = table.search(&v).unwrap();
        assert_eq!(hit.id, VectorId::encode(0, 0));
        assert_eq!(hit.score, 0.0);
    }

    #[test]
    fn parallel_search_matches_sequential() {
        use rand::{rngs::StdRng, Rng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(11);
        for mode in [Mode::L2, Mode::Cosine] {
            let table = Table::open(16, mode).unwrap();
            for _ in 0..500 {
                let v: Vec<f32> = (0..16).map(|_| rng.gen::<f32>() * 2.0 - 1.0).collect();
                table.insert(&v).unwrap();
            }
            for _ in 0..20 {
                let q: Vec<f32> = (0..16).map(|_| rng.gen::<f32>() * 2.0 - 1.0).collect();
                let seq = table.search(&q).unwrap();
                let par = table.search_parallel(&q).unwrap();
                assert_eq!(seq.id, par.id);
                assert!((seq.score - par.score).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn concurrent_inserts_and_scans_stay_consistent() {
        use rand::{rngs::StdRng, Rng, SeedableRng};
        use std::sync::Arc;

        let table = Arc::new(Table::open(8, Mode::L2).unwrap());
        let writes = 3000usize;

        std::thread::scope(|s| {
            let writer_table = Arc::clone(&table);
            s.spawn(move || {
                let mut rng = StdRng::seed_from_u64(1);
                for _ in 0..writes {
                    let v: Vec<f32> = (0..8).map(|_| rng.gen::<f32>()).collect();
                    writer_table.insert(&v).unwrap();
                }
            });

            for reader in 0..4u64 {
                let reader_table = Arc::clone(&table);
                s.spawn(move || {
                    let mut rng = StdRng::seed_from_u64(100 + reader);
                    for _ in 0..300 {
                        let q: Vec<f32> = (0..8).map(|_| rng.gen::<f32>()).collect();
                        let results = reader_table.search_n(&q, 10).unwrap();
                        assert_eq!(results.len(), 10);
                        for w in results.windows(2) {
                            assert!(!Mode::L2.is_better(w[1].score, w[0].score));
                        }
                        for m in &results {
                            // L2 squared distance is never negative; a
                            // torn read would show up here.
                            assert!(m.is_none() || m.score >= 0.0);
                        }
                    }
                });
            }
        });

        assert_eq!(table.len(), writes);
    }

    #[test]
    fn cosine_search_with_only_zero_vectors_finds_nothing() {
        let table = Table::open(4, Mode::Cosine).unwrap();
        table.insert(&[0.0; 4]).unwrap();
        let best = table.search(&[1.0, 0.0, 0.0, 0.0]).unwrap();
        assert!(best.is_none(), "zero vectors must never win a comparison");
    }
}
