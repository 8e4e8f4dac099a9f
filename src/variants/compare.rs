use crate::api::{KMeans, KMeansConfig, KMeansState};
use crate::geometry;
use crate::memory::{Primitive, SupportedSimdArray, LANES};
use crate::state::{split_mut, RunState};
use crate::variants;
use rayon::prelude::*;
use std::simd::Simd;

/// Lloyd's iteration with center-center pruning: a candidate center `j` whose
/// quarter squared distance to the current best exceeds the point's current
/// best squared distance cannot win, so its point distance is never computed.
/// No per-point state survives an iteration.
pub(crate) struct Compare<T> {
    _p: std::marker::PhantomData<T>,
}

impl<T> Compare<T>
where
    T: Primitive,
    Simd<T, LANES>: SupportedSimdArray<T>,
{
    pub fn calculate<'a, F>(data: &KMeans<T>, k: usize, max_iter: usize, init: F, config: &KMeansConfig<'a, T>) -> KMeansState<T>
    where
        for<'c> F: FnOnce(&KMeans<T>, &mut KMeansState<T>, &KMeansConfig<'c, T>),
    {
        let mut state = variants::setup(data, k, "compare", init, config);
        let mut run = RunState::new(data, k, std::mem::take(&mut state.assignments), config.workers);

        // pairwise center distances squared, divided by four
        let mut div4 = vec![T::zero(); k * k];

        let mut iterations = 0;
        let mut converged = false;
        while iterations < max_iter && !converged {
            iterations += 1;

            Self::update_center_dists(&mut run, &mut div4);
            Self::assign(data, &mut run, &div4);

            converged = run.move_centers();
            (config.iteration_done)(iterations, run.movement[run.furthest]);
        }

        variants::finish(data, run, state, iterations)
    }

    fn update_center_dists(run: &mut RunState<T>, div4: &mut [T]) {
        let k = run.k;
        let p_dims = run.p_dims;
        let centers: &[T] = &run.centers;
        let four = T::from(4.0).unwrap();

        div4.par_chunks_mut(k).enumerate().for_each(|(c1, row)| {
            for c2 in 0..k {
                if c1 == c2 {
                    // the diagonal must never prune its own cluster
                    row[c2] = T::infinity();
                } else {
                    row[c2] = geometry::distance2(
                        &centers[c1 * p_dims..(c1 + 1) * p_dims],
                        &centers[c2 * p_dims..(c2 + 1) * p_dims],
                    ) / four;
                }
            }
        });
        run.metrics.count_distances((k * (k - 1)) as u64);
    }

    fn assign(data: &KMeans<T>, run: &mut RunState<T>, div4: &[T]) {
        let RunState { k, p_dims, centers, assignment, ranges, stats, .. } = run;
        let (k, p_dims) = (*k, *p_dims);
        let centers: &[T] = centers;

        split_mut(assignment, ranges, 1)
            .into_par_iter()
            .zip(stats.par_iter_mut())
            .zip(ranges.par_iter())
            .for_each(|((assignment, stats), range)| {
                let mut computed = 0u64;
                for (idx, i) in range.clone().enumerate() {
                    let row = data.row(i);
                    let mut min_class = assignment[idx];
                    let mut min_dist2 = geometry::distance2(row, &centers[min_class * p_dims..(min_class + 1) * p_dims]);
                    computed += 1;

                    for j in 0..k {
                        // quarter center-center distances prune strictly
                        // farther candidates without masking exact ties
                        if div4[j * k + min_class] > min_dist2 {
                            continue;
                        }
                        if j == min_class {
                            continue;
                        }

                        let dist2 = geometry::distance2(row, &centers[j * p_dims..(j + 1) * p_dims]);
                        computed += 1;
                        if dist2 < min_dist2 {
                            min_dist2 = dist2;
                            min_class = j;
                        } else if dist2 == min_dist2 && j < min_class {
                            min_class = j;
                        }
                    }

                    if assignment[idx] != min_class {
                        stats.reassign(row, &mut assignment[idx], min_class);
                    }
                }
                stats.metrics.count_distances(computed);
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
            let samples = testing::random_samples::<f64>(n * d, 300 + shape_idx as u64);
            let data = KMeans::new(samples, n, d);
            let base = data.kmeans_lloyd(k, 500, KMeans::init_kmeanplusplus, &testing::seeded_config(21, 3));
            let accel = data.kmeans_compare(k, 500, KMeans::init_kmeanplusplus, &testing::seeded_config(21, 3));
            testing::assert_same_result(&base, &accel);
        }
    }

    #[test]
    fn two_blobs_scenario() {
        let (samples, n, d) = testing::two_blobs::<f64>();
        let data = KMeans::new(samples, n, d);
        let res = data.kmeans_compare(2, 100, KMeans::init_precomputed(vec![0, 0, 1, 1, 1, 1]), &testing::seeded_config(1, 2));
        assert_eq!(res.assignments, vec![0, 0, 0, 1, 1, 1]);
        assert_eq!(res.iterations, 2);
    }

    #[test]
    fn tie_breaks_to_lower_index() {
        let (samples, n, d, init) = testing::tie_setup::<f64>();
        let data = KMeans::new(samples, n, d);
        let res = data.kmeans_compare(2, 1, KMeans::init_precomputed(init), &testing::seeded_config(1, 1));
        assert_eq!(res.assignments, testing::TIE_EXPECTED);
    }
}
