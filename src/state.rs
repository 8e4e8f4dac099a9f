use crate::api::KMeans;
use crate::geometry::{self, Metrics};
use crate::memory::{AlignedFloatVec, Primitive, SupportedSimdArray, LANES};
use rayon::prelude::*;
use std::ops::Range;
use std::simd::Simd;

/// Contiguous static partition of the point indices: worker `t` of `w` owns
/// `[n*t/w, n*(t+1)/w)` for the whole run.
pub(crate) fn worker_ranges(n: usize, workers: usize) -> Vec<Range<usize>> {
    (0..workers).map(|t| (n * t / workers)..(n * (t + 1) / workers)).collect()
}

/// Split a flat per-point array into one mutable slice per worker range.
/// `stride` is the number of array elements per point (k for the Elkan-style
/// lower bound matrix, 1 for everything else).
pub(crate) fn split_mut<'a, S>(mut slice: &'a mut [S], ranges: &[Range<usize>], stride: usize) -> Vec<&'a mut [S]> {
    let mut parts = Vec::with_capacity(ranges.len());
    for range in ranges {
        let (head, tail) = slice.split_at_mut((range.end - range.start) * stride);
        parts.push(head);
        slice = tail;
    }
    parts
}

/// Immutable counterpart of [`split_mut`].
pub(crate) fn split_ref<'a, S>(slice: &'a [S], ranges: &[Range<usize>], stride: usize) -> Vec<&'a [S]> {
    ranges.iter().map(|r| &slice[r.start * stride..r.end * stride]).collect()
}

/// Per-worker sufficient statistics: the coordinate sum and the population of
/// every cluster, restricted to the worker's point range. Maintained
/// incrementally by [`ClusterStats::reassign`] and merged once per iteration
/// when the centers are recomputed.
pub(crate) struct ClusterStats<T: Primitive> {
    pub sums: Vec<T>,
    pub counts: Vec<usize>,
    pub metrics: Metrics,
    p_dims: usize,
}

impl<T> ClusterStats<T>
where
    T: Primitive,
    Simd<T, LANES>: SupportedSimdArray<T>,
{
    fn new(k: usize, p_dims: usize) -> Self {
        Self {
            sums: AlignedFloatVec::new(k * p_dims),
            counts: vec![0usize; k],
            metrics: Metrics::default(),
            p_dims,
        }
    }

    /// Move one point between clusters, keeping the running sums and counts
    /// current. `slot` is the point's entry in the assignment array.
    #[inline]
    pub fn reassign(&mut self, row: &[T], slot: &mut usize, to: usize) {
        let from = *slot;
        self.counts[from] -= 1;
        self.counts[to] += 1;
        geometry::sub_assign(&mut self.sums[from * self.p_dims..(from + 1) * self.p_dims], row);
        geometry::add_assign(&mut self.sums[to * self.p_dims..(to + 1) * self.p_dims], row);
        *slot = to;
        self.metrics.count_assignment_change();
    }
}

/// The shared iteration state every algorithm variant drives: the mutable
/// center matrix, the assignment array, per-center movement of the last
/// re-centering step, and the per-worker sufficient statistics.
pub(crate) struct RunState<T: Primitive> {
    pub k: usize,
    pub p_dims: usize,
    pub centers: Vec<T>,
    pub assignment: Vec<usize>,
    pub movement: Vec<T>,
    pub furthest: usize,
    pub ranges: Vec<Range<usize>>,
    pub stats: Vec<ClusterStats<T>>,
    /// Counters for work done in the single-threaded phases.
    pub metrics: Metrics,
    scratch: Vec<T>,
}

impl<T> RunState<T>
where
    T: Primitive,
    Simd<T, LANES>: SupportedSimdArray<T>,
{
    /// Build the run state from an initial assignment. The initial centers
    /// are the means of the initial clusters; a cluster with no points keeps
    /// a zero center until it gains one (it never will, unless the caller
    /// handed in an assignment with an unused index).
    pub fn new(data: &KMeans<T>, k: usize, assignment: Vec<usize>, workers: usize) -> Self {
        let n = data.sample_cnt;
        assert!(workers >= 1, "worker count must be at least 1");
        assert_eq!(assignment.len(), n);

        let p_dims = data.p_sample_dims;
        let ranges = worker_ranges(n, workers);
        let mut stats: Vec<ClusterStats<T>> = ranges.iter().map(|_| ClusterStats::new(k, p_dims)).collect();
        stats.par_iter_mut().zip(ranges.par_iter()).for_each(|(stat, range)| {
            for i in range.clone() {
                let c = assignment[i];
                assert!(c < k, "initial assignment out of range: point {} -> cluster {}", i, c);
                stat.counts[c] += 1;
                geometry::add_assign(&mut stat.sums[c * p_dims..(c + 1) * p_dims], data.row(i));
            }
        });

        let mut state = Self {
            k,
            p_dims,
            centers: AlignedFloatVec::new(k * p_dims),
            assignment,
            movement: vec![T::zero(); k],
            furthest: 0,
            ranges,
            stats,
            metrics: Metrics::default(),
            scratch: AlignedFloatVec::new(k * p_dims),
        };
        state.means_into_scratch();
        std::mem::swap(&mut state.centers, &mut state.scratch);
        state
    }

    #[inline(always)]
    pub fn center(&self, c: usize) -> &[T] {
        &self.centers[c * self.p_dims..(c + 1) * self.p_dims]
    }

    /// Merge the per-worker statistics into `scratch` as the new center
    /// matrix. Empty clusters keep their previous position.
    fn means_into_scratch(&mut self) {
        let p_dims = self.p_dims;
        for c in 0..self.k {
            let count: usize = self.stats.iter().map(|s| s.counts[c]).sum();
            let row = &mut self.scratch[c * p_dims..(c + 1) * p_dims];
            if count == 0 {
                row.copy_from_slice(&self.centers[c * p_dims..(c + 1) * p_dims]);
                continue;
            }
            row.fill(T::zero());
            for stat in &self.stats {
                geometry::add_assign(row, &stat.sums[c * p_dims..(c + 1) * p_dims]);
            }
            let inv = Simd::<T, LANES>::splat(T::one() / T::from(count).unwrap());
            row.chunks_exact_mut(LANES).for_each(|chunk| (Simd::from_slice(chunk) * inv).copy_to_slice(chunk));
        }
    }

    /// Recompute all centers from the accumulated statistics and measure how
    /// far each one moved. Returns true when no center moved at all, which is
    /// the (exact, epsilon-free) convergence criterion.
    pub fn move_centers(&mut self) -> bool {
        self.means_into_scratch();
        let mut furthest = 0;
        for c in 0..self.k {
            let moved = geometry::distance2(
                &self.centers[c * self.p_dims..(c + 1) * self.p_dims],
                &self.scratch[c * self.p_dims..(c + 1) * self.p_dims],
            );
            self.movement[c] = moved.sqrt();
            if self.movement[c] > self.movement[furthest] {
                furthest = c;
            }
        }
        self.metrics.count_distances(self.k as u64);
        std::mem::swap(&mut self.centers, &mut self.scratch);
        self.furthest = furthest;
        self.movement[furthest] == T::zero()
    }

    /// The largest and second-largest center movement of the last step, with
    /// the index of the largest mover. Used by the single-lower-bound update
    /// rule: the bound of a point assigned to the furthest-moving center may
    /// only shrink by the second largest movement.
    pub fn movement_extremes(&self) -> (usize, T, T) {
        let mut furthest = 0;
        let mut longest = self.movement[0];
        let mut second = T::zero();
        for (c, &m) in self.movement.iter().enumerate().skip(1) {
            if longest < m {
                second = longest;
                longest = m;
                furthest = c;
            } else if second < m {
                second = m;
            }
        }
        (furthest, longest, second)
    }

    pub fn frequencies(&self) -> Vec<usize> {
        (0..self.k).map(|c| self.stats.iter().map(|s| s.counts[c]).sum()).collect()
    }

    pub fn merged_metrics(&self) -> Metrics {
        let mut total = self.metrics;
        for stat in &self.stats {
            total.merge(&stat.metrics);
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::KMeans;

    #[test]
    fn worker_ranges_cover_all_points() {
        for n in [0usize, 1, 5, 17, 100] {
            for w in 1usize..8 {
                let ranges = worker_ranges(n, w);
                assert_eq!(ranges.len(), w);
                assert_eq!(ranges[0].start, 0);
                assert_eq!(ranges[w - 1].end, n);
                for t in 1..w {
                    assert_eq!(ranges[t - 1].end, ranges[t].start);
                }
            }
        }
    }

    #[test]
    fn initial_centers_are_cluster_means() {
        let samples = vec![0.0f64, 0.0, 2.0, 0.0, 10.0, 4.0, 12.0, 4.0];
        let data = KMeans::new(samples, 4, 2);
        let state = RunState::new(&data, 2, vec![0, 0, 1, 1], 2);
        assert_eq!(state.center(0)[0], 1.0);
        assert_eq!(state.center(0)[1], 0.0);
        assert_eq!(state.center(1)[0], 11.0);
        assert_eq!(state.center(1)[1], 4.0);
        assert_eq!(state.frequencies(), vec![2, 2]);
    }

    #[test]
    fn reassignment_keeps_statistics_consistent() {
        let samples = vec![0.0f64, 0.0, 2.0, 0.0, 10.0, 4.0, 12.0, 4.0];
        let data = KMeans::new(samples, 4, 2);
        let mut state = RunState::new(&data, 2, vec![0, 1, 1, 1], 1);

        let RunState { assignment, stats, .. } = &mut state;
        let row = data.row(1);
        let slot = &mut assignment[1];
        stats[0].reassign(row, slot, 0);
        assert_eq!(state.assignment, vec![0, 0, 1, 1]);

        let converged = state.move_centers();
        assert!(!converged);
        assert_eq!(state.center(0)[0], 1.0);
        assert_eq!(state.center(1)[0], 11.0);
        // a second recomputation without reassignments must not move anything
        assert!(state.move_centers());
        assert_eq!(state.movement, vec![0.0, 0.0]);
    }

    #[test]
    fn movement_extremes_track_two_largest() {
        let samples = vec![0.0f64; 8];
        let data = KMeans::new(samples, 4, 2);
        let mut state = RunState::new(&data, 4, vec![0, 1, 2, 3], 1);
        state.movement = vec![0.5, 3.0, 1.0, 2.0];
        let (furthest, longest, second) = state.movement_extremes();
        assert_eq!(furthest, 1);
        assert_eq!(longest, 3.0);
        assert_eq!(second, 2.0);
    }
}
