use crate::api::{KMeans, KMeansConfig, KMeansState};
use crate::geometry;
use crate::memory::{Primitive, SupportedSimdArray, LANES};
use crate::state::{split_mut, RunState};
use crate::variants;
use rayon::prelude::*;
use std::simd::Simd;

/// The classic algorithm of assign, move, repeat. No pruning of the search;
/// every point is checked against every center in every iteration. This is
/// the correctness baseline all accelerated variants are measured against.
pub(crate) struct Lloyd<T> {
    _p: std::marker::PhantomData<T>,
}

impl<T> Lloyd<T>
where
    T: Primitive,
    Simd<T, LANES>: SupportedSimdArray<T>,
{
    pub fn calculate<'a, F>(data: &KMeans<T>, k: usize, max_iter: usize, init: F, config: &KMeansConfig<'a, T>) -> KMeansState<T>
    where
        for<'c> F: FnOnce(&KMeans<T>, &mut KMeansState<T>, &KMeansConfig<'c, T>),
    {
        let mut state = variants::setup(data, k, "lloyd", init, config);
        let mut run = RunState::new(data, k, std::mem::take(&mut state.assignments), config.workers);

        let mut iterations = 0;
        let mut converged = false;
        while iterations < max_iter && !converged {
            iterations += 1;

            Self::assign(data, &mut run);
            converged = run.move_centers();

            (config.iteration_done)(iterations, run.movement[run.furthest]);
        }

        variants::finish(data, run, state, iterations)
    }

    fn assign(data: &KMeans<T>, run: &mut RunState<T>) {
        let RunState { k, p_dims, centers, assignment, ranges, stats, .. } = run;
        let (k, p_dims) = (*k, *p_dims);
        let centers: &[T] = centers;

        split_mut(assignment, ranges, 1)
            .into_par_iter()
            .zip(stats.par_iter_mut())
            .zip(ranges.par_iter())
            .for_each(|((assignment, stats), range)| {
                for (slot, i) in assignment.iter_mut().zip(range.clone()) {
                    let row = data.row(i);
                    // look for the closest center; scanning in index order
                    // with a strict comparison makes the lowest index win ties
                    let mut closest = 0;
                    let mut closest_dist2 = T::infinity();
                    for j in 0..k {
                        let d2 = geometry::distance2(row, &centers[j * p_dims..(j + 1) * p_dims]);
                        if d2 < closest_dist2 {
                            closest = j;
                            closest_dist2 = d2;
                        }
                    }
                    stats.metrics.count_distances(k as u64);
                    if *slot != closest {
                        stats.reassign(row, slot, closest);
                    }
                }
            });
    }
}

#[cfg(test)]
mod tests {
    use crate::helpers::testing;
    use crate::{KMeans, KMeansConfig};
    use rand::prelude::*;

    #[test]
    fn stable_seed_converges_immediately() {
        let (samples, n, d) = testing::two_blobs::<f64>();
        let data = KMeans::new(samples, n, d);
        // seeded with the true partition the centers start on the blob means,
        // so the very first iteration detects zero movement
        let res = data.kmeans_lloyd(2, 100, KMeans::init_precomputed(vec![0, 0, 0, 1, 1, 1]), &KMeansConfig::default());

        assert_eq!(res.iterations, 1);
        assert_eq!(res.assignments, vec![0, 0, 0, 1, 1, 1]);
        assert_eq!(res.centroid_frequency, vec![3, 3]);
        let third = 1.0 / 3.0;
        assert_approx_eq!(res.centroids[0], third, 1e-12);
        assert_approx_eq!(res.centroids[1], third, 1e-12);
        assert_approx_eq!(res.centroids[2], 10.0 + third, 1e-12);
        assert_approx_eq!(res.centroids[3], 10.0 + third, 1e-12);
    }

    #[test]
    fn mixed_seed_takes_exactly_two_iterations() {
        let (samples, n, d) = testing::two_blobs::<f64>();
        let data = KMeans::new(samples, n, d);
        // one point seeded into the wrong blob: iteration 1 fixes the
        // assignment and re-centers, iteration 2 observes stability
        let res = data.kmeans_lloyd(2, 100, KMeans::init_precomputed(vec![0, 0, 1, 1, 1, 1]), &KMeansConfig::default());
        assert_eq!(res.assignments, vec![0, 0, 0, 1, 1, 1]);
        assert_eq!(res.iterations, 2);
    }

    #[test]
    fn k_equals_one_yields_global_centroid_in_one_iteration() {
        let (samples, n, d) = testing::two_blobs::<f64>();
        let data = KMeans::new(samples, n, d);
        let res = data.kmeans_lloyd(1, 100, KMeans::init_precomputed(vec![0; 6]), &KMeansConfig::default());

        assert_eq!(res.iterations, 1);
        let mean = (0.0 + 1.0 + 0.0 + 10.0 + 11.0 + 10.0) / 6.0;
        assert_approx_eq!(res.centroids[0], mean, 1e-12);
        assert_approx_eq!(res.centroids[1], mean, 1e-12);
        assert_eq!(res.centroid_frequency, vec![6]);
    }

    #[test]
    fn empty_cluster_keeps_its_center() {
        // no point is ever assigned to cluster 1; its center must stay put
        // with zero movement instead of producing NaNs
        let samples = vec![10.0f64, 10.0, 11.0, 10.0, 10.5, 14.0];
        let data = KMeans::new(samples, 3, 2);
        let res = data.kmeans_lloyd(2, 100, KMeans::init_precomputed(vec![0, 0, 0]), &KMeansConfig::default());
        assert!(res.centroids.iter().all(|c| c.is_finite()));
        assert_eq!(res.centroid_frequency, vec![3, 0]);
        assert_eq!(res.assignments, vec![0, 0, 0]);
    }

    #[test]
    fn tie_breaks_to_lower_index() {
        let (samples, n, d, init) = testing::tie_setup::<f64>();
        let data = KMeans::new(samples, n, d);
        let res = data.kmeans_lloyd(2, 1, KMeans::init_precomputed(init), &KMeansConfig::default());
        assert_eq!(res.assignments, testing::TIE_EXPECTED);
    }

    #[test]
    fn sse_is_monotonically_non_increasing() {
        // replay the same seeded run with growing iteration limits; the SSE
        // trace must fall strictly until the converging iteration, which may
        // only repeat the previous value
        let (n, d, k) = (200, 3, 6);
        let samples = testing::random_samples::<f64>(n * d, 13);
        let data = KMeans::new(samples, n, d);
        let full = data.kmeans_lloyd(k, 500, KMeans::init_kmeanplusplus, &testing::seeded_config(5, 2));
        assert!(full.iterations >= 3, "fixture converged too quickly to be meaningful");

        let trace: Vec<f64> = (1..=full.iterations)
            .map(|limit| {
                data.kmeans_lloyd(k, limit, KMeans::init_kmeanplusplus, &testing::seeded_config(5, 2)).distsum
            })
            .collect();
        for t in 1..trace.len() {
            assert!(trace[t] <= trace[t - 1], "SSE increased from {} to {}", trace[t - 1], trace[t]);
            if t + 1 < trace.len() {
                assert!(trace[t] < trace[t - 1], "SSE stalled before convergence at step {}", t);
            }
        }
    }

    #[test]
    fn movement_reaches_exact_zero() {
        let mut rnd = StdRng::seed_from_u64(77);
        let (n, d, k) = (400, 5, 7);
        let samples: Vec<f64> = (0..n * d).map(|_| rnd.gen_range(0.0..1.0)).collect();
        let data = KMeans::new(samples, n, d);

        let movements = std::cell::RefCell::new(Vec::new());
        let record = |_: usize, movement| movements.borrow_mut().push(movement);
        let conf = KMeansConfig::build()
            .random_generator(StdRng::seed_from_u64(1))
            .iteration_done(&record)
            .build();
        let res = data.kmeans_lloyd(k, 500, KMeans::init_kmeanplusplus, &conf);
        // the run must terminate by convergence: an exact zero movement in
        // the last iteration, strictly positive movement before
        let movements = movements.borrow();
        assert_eq!(*movements.last().unwrap(), 0.0);
        assert!(movements[..movements.len() - 1].iter().all(|&m| m > 0.0));
        assert_eq!(res.iterations, movements.len());
    }
}
