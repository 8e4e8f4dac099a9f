use crate::api::{KMeans, KMeansConfig, KMeansState};
use crate::bounds::Bounds;
use crate::geometry;
use crate::memory::{Primitive, SupportedSimdArray, LANES};
use crate::state::{split_mut, split_ref, ClusterStats, RunState};
use crate::variants;
use rayon::prelude::*;
use std::simd::Simd;

/// Per-worker state of Drake's algorithm: how many of the allocated lower
/// bounds are still in active use, the scratch buffer for sorting candidate
/// centers by distance, and the per-iteration catch statistic.
struct DrakeWorker<T: Primitive> {
    active_bounds: usize,
    order: Vec<(T, usize)>,
    /// Deepest bound that caught a point this iteration; drives the adaptive
    /// shrinking of `active_bounds`.
    max_catcher: usize,
}

/// Drake's algorithm: `b` sorted lower bounds per point (`1 ≤ b < k`), the
/// j-th covering the j-th closest other center. A point whose upper bound is
/// caught by one of them only needs the centers inside the catching bound
/// re-sorted; only points no bound catches pay for a full scan. Each worker
/// shrinks its active bound count at runtime when the outer bounds stop
/// catching anything.
pub(crate) struct Drake<T> {
    _p: std::marker::PhantomData<T>,
}

impl<T> Drake<T>
where
    T: Primitive,
    Simd<T, LANES>: SupportedSimdArray<T>,
{
    pub fn calculate<'a, F>(
        data: &KMeans<T>,
        k: usize,
        max_iter: usize,
        num_bounds: Option<usize>,
        init: F,
        config: &KMeansConfig<'a, T>,
    ) -> KMeansState<T>
    where
        for<'c> F: FnOnce(&KMeans<T>, &mut KMeansState<T>, &KMeansConfig<'c, T>),
    {
        let b = num_bounds.unwrap_or_else(|| {
            // start at k/4, fixing any degenerate cases
            let mut b = k / 4;
            if b < 2 {
                b = 2;
            }
            if k <= b {
                b = k - 1;
            }
            b
        });
        assert!(b >= 1 && b < k, "number of lower bounds must be in 1..k, got {} for k={}", b, k);

        let mut state = variants::setup(data, k, "drake", init, config);
        let mut run = RunState::new(data, k, std::mem::take(&mut state.assignments), config.workers);

        let mut bounds = Bounds::new(data.sample_cnt, b);
        // per point, the centers its lower bounds refer to, closest first;
        // the seed values are arbitrary since the first iteration catches
        // nothing and recalculates everything
        let mut closest_others: Vec<usize> = (0..data.sample_cnt * b).map(|idx| idx % b + 1).collect();
        let mut workers: Vec<DrakeWorker<T>> = run
            .ranges
            .iter()
            .map(|_| DrakeWorker {
                active_bounds: b,
                order: vec![(T::zero(), 0usize); k],
                max_catcher: 0,
            })
            .collect();

        let mut iterations = 0;
        let mut converged = false;
        while iterations < max_iter && !converged {
            iterations += 1;

            Self::assign(data, &mut run, &mut bounds, &mut closest_others, &mut workers);
            converged = run.move_centers();

            if !converged {
                Self::update_bounds(&mut run, &mut bounds, &closest_others, &workers);

                // adaptively drop lower bounds that stopped catching points;
                // an empirical tuning rule, not load-bearing for correctness
                if iterations > 10 {
                    for worker in workers.iter_mut() {
                        if (k >> 3) <= worker.max_catcher {
                            worker.active_bounds = worker.max_catcher.max(1);
                        }
                    }
                }
            }
            (config.iteration_done)(iterations, run.movement[run.furthest]);
        }

        variants::finish(data, run, state, iterations)
    }

    fn assign(
        data: &KMeans<T>,
        run: &mut RunState<T>,
        bounds: &mut Bounds<T>,
        closest_others: &mut [usize],
        workers: &mut [DrakeWorker<T>],
    ) {
        let RunState { k, p_dims, centers, assignment, ranges, stats, .. } = run;
        let (k, p_dims) = (*k, *p_dims);
        let centers: &[T] = centers;
        let b = bounds.num_lower;

        workers
            .par_iter_mut()
            .zip(split_mut(assignment, ranges, 1))
            .zip(split_mut(&mut bounds.upper, ranges, 1))
            .zip(split_mut(&mut bounds.lower, ranges, b))
            .zip(split_mut(closest_others, ranges, b))
            .zip(stats.par_iter_mut())
            .zip(ranges.par_iter())
            .for_each(|((((((worker, assignment), upper), lower), closest_others), stats), range)| {
                let mut computed = 0u64;
                worker.max_catcher = 0;
                let remaining = worker.active_bounds;

                for (idx, i) in range.clone().enumerate() {
                    let row = data.row(i);
                    let lower = &mut lower[idx * b..(idx + 1) * b];
                    let closest_others = &mut closest_others[idx * b..(idx + 1) * b];

                    // check the bounds, widening the check outward, to see
                    // whether everything must be recalculated; strict
                    // comparison, so exact ties fall through to a re-sort
                    // and the result matches the naive scan exactly
                    let mut caught = None;
                    for j in 0..remaining {
                        if upper[idx] < lower[j] {
                            caught = Some(j);
                            break;
                        }
                    }

                    match caught {
                        Some(0) => {
                            // caught by the innermost bound: the assigned
                            // center cannot have changed
                        }
                        Some(catcher) => {
                            // only the centers within the catching bound can
                            // compete; re-sort those few
                            computed += Self::reorder_near_centers(
                                row,
                                centers,
                                p_dims,
                                catcher,
                                &mut worker.order,
                                upper,
                                lower,
                                closest_others,
                                &mut assignment[idx],
                                stats,
                                idx,
                            );
                        }
                        None => {
                            computed += Self::find_near_centers(
                                row,
                                centers,
                                k,
                                p_dims,
                                remaining,
                                &mut worker.order,
                                upper,
                                lower,
                                closest_others,
                                &mut assignment[idx],
                                stats,
                                idx,
                            );
                        }
                    }

                    if let Some(c) = caught {
                        let catcher = c + 1;
                        if worker.max_catcher < catcher && catcher < remaining {
                            worker.max_catcher = catcher;
                        }
                    }
                }
                stats.metrics.count_distances(computed);
            });
    }

    /// Sort all centers by increasing distance and rebuild the bound array
    /// from the closest `remaining` other centers.
    #[allow(clippy::too_many_arguments)]
    fn find_near_centers(
        row: &[T],
        centers: &[T],
        k: usize,
        p_dims: usize,
        remaining: usize,
        order: &mut [(T, usize)],
        upper: &mut [T],
        lower: &mut [T],
        closest_others: &mut [usize],
        slot: &mut usize,
        stats: &mut ClusterStats<T>,
        idx: usize,
    ) -> u64 {
        for j in 0..k {
            order[j] = (geometry::distance2(row, &centers[j * p_dims..(j + 1) * p_dims]), j);
        }
        // ties sort by center index, keeping the reassignment deterministic
        let cmp = |a: &(T, usize), b: &(T, usize)| a.partial_cmp(b).unwrap();
        if remaining + 1 < k {
            order.select_nth_unstable_by(remaining, cmp);
            order[..remaining].sort_unstable_by(cmp);
        } else {
            order.sort_unstable_by(cmp);
        }

        if *slot != order[0].1 {
            stats.reassign(row, slot, order[0].1);
        }

        upper[idx] = order[0].0.sqrt();
        for j in 0..remaining {
            closest_others[j] = order[j + 1].1;
            lower[j] = order[j + 1].0.sqrt();
        }
        k as u64
    }

    /// Re-sort only the assigned center and the centers inside the catching
    /// bound, and refresh that prefix of the bound array.
    #[allow(clippy::too_many_arguments)]
    fn reorder_near_centers(
        row: &[T],
        centers: &[T],
        p_dims: usize,
        catcher: usize,
        order: &mut [(T, usize)],
        upper: &mut [T],
        lower: &mut [T],
        closest_others: &mut [usize],
        slot: &mut usize,
        stats: &mut ClusterStats<T>,
        idx: usize,
    ) -> u64 {
        let a = *slot;
        order[0] = (geometry::distance2(row, &centers[a * p_dims..(a + 1) * p_dims]), a);
        for j in 0..catcher {
            let c = closest_others[j];
            order[j + 1] = (geometry::distance2(row, &centers[c * p_dims..(c + 1) * p_dims]), c);
        }
        order[..=catcher].sort_unstable_by(|a, b| a.partial_cmp(b).unwrap());

        if *slot != order[0].1 {
            stats.reassign(row, slot, order[0].1);
        }

        upper[idx] = order[0].0.sqrt();
        for j in 0..catcher {
            closest_others[j] = order[j + 1].1;
            lower[j] = order[j + 1].0.sqrt();
        }
        (catcher + 1) as u64
    }

    fn update_bounds(run: &mut RunState<T>, bounds: &mut Bounds<T>, closest_others: &[usize], workers: &[DrakeWorker<T>]) {
        let furthest = run.furthest;
        let RunState { assignment, movement, ranges, .. } = run;
        let movement: &[T] = movement;
        let assignment: &[usize] = assignment;
        let b = bounds.num_lower;

        workers
            .par_iter()
            .zip(split_mut(&mut bounds.upper, ranges, 1))
            .zip(split_mut(&mut bounds.lower, ranges, b))
            .zip(split_ref(closest_others, ranges, b))
            .zip(split_ref(assignment, ranges, 1))
            .for_each(|((((worker, upper), lower), closest_others), assignment)| {
                let remaining = worker.active_bounds;
                for (idx, &a) in assignment.iter().enumerate() {
                    let lower = &mut lower[idx * b..(idx + 1) * b];
                    let closest_others = &closest_others[idx * b..(idx + 1) * b];

                    // widen the upper bound by the closest center's movement
                    upper[idx] += movement[a];

                    // all but the outermost active bound shrink by exactly
                    // their center's movement
                    for j in 0..remaining - 1 {
                        lower[j] -= movement[closest_others[j]];
                    }
                    // the outermost bound covers every center beyond the
                    // tracked ones, so it must absorb the largest movement
                    lower[remaining - 1] -= movement[furthest];

                    // keep the bounds ordered by collapsing the circles from
                    // the outside inward
                    for j in (0..remaining - 1).rev() {
                        if lower[j + 1] < lower[j] {
                            lower[j] = lower[j + 1];
                        }
                    }
                }
            });
    }
}

#[cfg(test)]
mod tests {
    use crate::helpers::testing;
    use crate::KMeans;

    #[test]
    fn matches_lloyd_on_random_data() {
        for (shape_idx, &(n, d, k)) in testing::EQUIVALENCE_SHAPES.iter().enumerate() {
            for num_bounds in [None, Some(2), Some(k - 1)] {
                let samples = testing::random_samples::<f64>(n * d, 700 + shape_idx as u64);
                let data = KMeans::new(samples, n, d);
                let base = data.kmeans_lloyd(k, 500, KMeans::init_kmeanplusplus, &testing::seeded_config(61, 3));
                let accel = data.kmeans_drake(k, 500, num_bounds, KMeans::init_kmeanplusplus, &testing::seeded_config(61, 3));
                testing::assert_same_result(&base, &accel);
            }
        }
    }

    #[test]
    fn adaptive_run_stays_equivalent_over_many_iterations() {
        // enough points and clusters that the run exceeds the 10-iteration
        // threshold and the adaptive shrinking actually kicks in
        let (n, d, k) = (800, 2, 24);
        let samples = testing::random_samples::<f64>(n * d, 909);
        let data = KMeans::new(samples, n, d);
        let base = data.kmeans_lloyd(k, 500, KMeans::init_kmeanplusplus, &testing::seeded_config(71, 2));
        let accel = data.kmeans_drake(k, 500, None, KMeans::init_kmeanplusplus, &testing::seeded_config(71, 2));
        testing::assert_same_result(&base, &accel);
    }

    #[test]
    fn two_blobs_scenario() {
        let (samples, n, d) = testing::two_blobs::<f64>();
        let data = KMeans::new(samples, n, d);
        let res = data.kmeans_drake(2, 100, None, KMeans::init_precomputed(vec![0, 0, 1, 1, 1, 1]), &testing::seeded_config(1, 2));
        assert_eq!(res.assignments, vec![0, 0, 0, 1, 1, 1]);
        assert_eq!(res.iterations, 2);
    }

    #[test]
    fn tie_breaks_to_lower_index() {
        let (samples, n, d, init) = testing::tie_setup::<f64>();
        let data = KMeans::new(samples, n, d);
        let res = data.kmeans_drake(2, 1, None, KMeans::init_precomputed(init), &testing::seeded_config(1, 1));
        assert_eq!(res.assignments, testing::TIE_EXPECTED);
    }

    #[test]
    #[should_panic(expected = "number of lower bounds")]
    fn rejects_too_many_bounds() {
        let (samples, n, d) = testing::two_blobs::<f64>();
        let data = KMeans::new(samples, n, d);
        data.kmeans_drake(2, 10, Some(2), KMeans::init_precomputed(vec![0; 6]), &testing::seeded_config(1, 1));
    }
}
