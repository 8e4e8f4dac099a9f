use crate::api::{KMeans, KMeansConfig, KMeansState};
use crate::geometry;
use crate::memory::{Primitive, SupportedSimdArray, LANES};
use crate::state::{split_mut, RunState};
use crate::variants;
use rayon::prelude::*;
use std::simd::Simd;

/// Lloyd's iteration with per-cluster sorted center lists: for every cluster
/// the other centers are kept ordered by distance, and the candidate scan
/// stops as soon as the next list entry is provably too far away. Switching
/// to a closer center restarts the scan on that center's list.
pub(crate) struct Sort<T> {
    _p: std::marker::PhantomData<T>,
}

impl<T> Sort<T>
where
    T: Primitive,
    Simd<T, LANES>: SupportedSimdArray<T>,
{
    pub fn calculate<'a, F>(data: &KMeans<T>, k: usize, max_iter: usize, init: F, config: &KMeansConfig<'a, T>) -> KMeansState<T>
    where
        for<'c> F: FnOnce(&KMeans<T>, &mut KMeansState<T>, &KMeansConfig<'c, T>),
    {
        let mut state = variants::setup(data, k, "sort", init, config);
        let mut run = RunState::new(data, k, std::mem::take(&mut state.assignments), config.workers);

        // per cluster: (quarter squared distance, center index), ascending;
        // entry 0 is always the cluster itself
        let mut sorted = vec![(T::zero(), 0usize); k * k];

        let mut iterations = 0;
        let mut converged = false;
        while iterations < max_iter && !converged {
            iterations += 1;

            Self::sort_centers(&mut run, &mut sorted);
            Self::assign(data, &mut run, &sorted);

            converged = run.move_centers();
            (config.iteration_done)(iterations, run.movement[run.furthest]);
        }

        variants::finish(data, run, state, iterations)
    }

    fn sort_centers(run: &mut RunState<T>, sorted: &mut [(T, usize)]) {
        let k = run.k;
        let p_dims = run.p_dims;
        let centers: &[T] = &run.centers;
        let four = T::from(4.0).unwrap();

        for j in 0..k {
            sorted[j * k + j] = (T::zero(), j);
            for p in j + 1..k {
                let quarter = geometry::distance2(
                    &centers[j * p_dims..(j + 1) * p_dims],
                    &centers[p * p_dims..(p + 1) * p_dims],
                ) / four;
                sorted[j * k + p] = (quarter, p);
                sorted[p * k + j] = (quarter, j);
            }
        }
        run.metrics.count_distances((k * (k - 1) / 2) as u64);

        for j in 0..k {
            sorted[j * k..(j + 1) * k].sort_unstable_by(|a, b| a.partial_cmp(b).unwrap());
        }
    }

    fn assign(data: &KMeans<T>, run: &mut RunState<T>, sorted: &[(T, usize)]) {
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
                    let mut closest = assignment[idx];
                    let mut min_distance = geometry::distance2(row, &centers[closest * p_dims..(closest + 1) * p_dims]);
                    computed += 1;

                    let mut o = 1;
                    while o < k {
                        let entry = sorted[closest * k + o];
                        // everything from here on is more than twice as far
                        // from the current cluster as the point itself
                        if min_distance < entry.0 {
                            break;
                        }
                        let j = entry.1;

                        let distance = geometry::distance2(row, &centers[j * p_dims..(j + 1) * p_dims]);
                        computed += 1;
                        if distance < min_distance {
                            min_distance = distance;
                            closest = j;
                            o = 0; // rescan on the new cluster's list
                        } else if j < closest && distance == min_distance {
                            closest = j;
                            o = 0;
                        }
                        o += 1;
                    }

                    if assignment[idx] != closest {
                        stats.reassign(row, &mut assignment[idx], closest);
                    }
                }
                stats.metrics.count_distances(computed);
            });
    }
}
