use crate::api::{KMeans, KMeansConfig, KMeansState};
use crate::bounds::{Bounds, CenterDistances};
use crate::geometry;
use crate::memory::{Primitive, SupportedSimdArray, LANES};
use crate::state::{split_mut, RunState};
use crate::tighter::TighterUpdate;
use crate::variants::{self, Hamerly};
use rayon::prelude::*;
use std::simd::Simd;

/// The annulus algorithm: Hamerly's bounds, plus the centers kept sorted by
/// their norms. When a point's bounds fail, the candidate centers are found
/// by bracketing `[‖x‖ - β, ‖x‖ + β]` in the norm-sorted order with two
/// binary searches, where β bounds the distance to the second-closest
/// center. Centers outside the bracket cannot beat either bound.
pub(crate) struct Annulus<T> {
    _p: std::marker::PhantomData<T>,
}

impl<T> Annulus<T>
where
    T: Primitive,
    Simd<T, LANES>: SupportedSimdArray<T>,
{
    pub fn calculate<'a, F>(
        data: &KMeans<T>,
        k: usize,
        max_iter: usize,
        tightened: bool,
        init: F,
        config: &KMeansConfig<'a, T>,
    ) -> KMeansState<T>
    where
        for<'c> F: FnOnce(&KMeans<T>, &mut KMeansState<T>, &KMeansConfig<'c, T>),
    {
        let mut state = variants::setup(data, k, "annulus", init, config);
        let mut run = RunState::new(data, k, std::mem::take(&mut state.assignments), config.workers);
        let p_dims = data.p_sample_dims;
        let n = data.sample_cnt;

        let mut bounds = Bounds::new(n, 1);
        let mut dists = CenterDistances::new(k);
        let mut tighter = tightened.then(|| TighterUpdate::new(k, p_dims, 1, &run.centers, &mut run.metrics));

        // guard: for each point, a center that is (or recently was) the
        // second-closest; it seeds the lower bound before the annulus scan
        let mut guard = vec![if k > 1 { 1usize } else { 0 }; n];
        let x_norm: Vec<T> = data.sample_norms2.iter().map(|&n2| n2.sqrt()).collect();
        let mut c_order = vec![(T::zero(), 0usize); k];

        dists.update(&run.centers, p_dims, &mut run.metrics);

        let mut iterations = 0;
        let mut converged = false;
        while iterations < max_iter && !converged {
            iterations += 1;
            if tighter.is_none() && iterations > 1 {
                dists.update(&run.centers, p_dims, &mut run.metrics);
            }
            Self::sort_centers_by_norm(&mut run, &mut c_order);

            Self::assign(data, &mut run, &mut bounds, &dists, &mut guard, &x_norm, &c_order);

            if let Some(t) = tighter.as_mut() {
                t.snapshot(&run.centers);
            }
            converged = run.move_centers();

            if !converged {
                if let Some(t) = tighter.as_mut() {
                    dists.update(&run.centers, p_dims, &mut run.metrics);
                    t.calculate_max_upper_bound(&bounds.upper, &run.assignment);
                    t.refresh_cached_inner_products(&run.centers, &run.movement, &mut run.metrics);
                    t.calculate_lower_bound_update(&run.centers, &run.movement, &dists, &mut run.metrics);
                }
                Hamerly::update_bounds(&mut run, &mut bounds, tighter.as_ref());
            }
            (config.iteration_done)(iterations, run.movement[run.furthest]);
        }

        variants::finish(data, run, state, iterations)
    }

    fn sort_centers_by_norm(run: &mut RunState<T>, c_order: &mut [(T, usize)]) {
        for (c, entry) in c_order.iter_mut().enumerate() {
            let row = run.center(c);
            *entry = (geometry::inner_product(row, row).sqrt(), c);
        }
        run.metrics.count_inner_products(run.k as u64);
        c_order.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap());
    }

    #[allow(clippy::too_many_arguments)]
    fn assign(
        data: &KMeans<T>,
        run: &mut RunState<T>,
        bounds: &mut Bounds<T>,
        dists: &CenterDistances<T>,
        guard: &mut [usize],
        x_norm: &[T],
        c_order: &[(T, usize)],
    ) {
        let RunState { p_dims, centers, assignment, ranges, stats, .. } = run;
        let p_dims = *p_dims;
        let centers: &[T] = centers;

        split_mut(assignment, ranges, 1)
            .into_par_iter()
            .zip(split_mut(&mut bounds.upper, ranges, 1))
            .zip(split_mut(&mut bounds.lower, ranges, 1))
            .zip(split_mut(guard, ranges, 1))
            .zip(stats.par_iter_mut())
            .zip(ranges.par_iter())
            .for_each(|(((((assignment, upper), lower), guard), stats), range)| {
                let mut computed = 0u64;
                for (idx, i) in range.clone().enumerate() {
                    let closest0 = assignment[idx];
                    let upper_comparison_bound = if dists.s[closest0] > lower[idx] { dists.s[closest0] } else { lower[idx] };

                    if upper[idx] < upper_comparison_bound {
                        continue;
                    }

                    let row = data.row(i);
                    let mut u2 = geometry::distance2(row, &centers[closest0 * p_dims..(closest0 + 1) * p_dims]);
                    computed += 1;
                    upper[idx] = u2.sqrt();
                    if upper[idx] < upper_comparison_bound {
                        continue;
                    }

                    // seed the second-closest estimate from the guard center
                    let mut l2 = geometry::distance2(row, &centers[guard[idx] * p_dims..(guard[idx] + 1) * p_dims]);
                    computed += 1;
                    lower[idx] = l2.sqrt();

                    let beta = if lower[idx] > upper[idx] { lower[idx] } else { upper[idx] };

                    // every center that could still beat either bound has a
                    // norm within beta of the point's norm
                    let begin = c_order.partition_point(|entry| entry.0 < x_norm[i] - beta);
                    let end = c_order.partition_point(|entry| entry.0 <= x_norm[i] + beta);

                    let mut closest = closest0;
                    for &(_, j) in &c_order[begin..end] {
                        if j == closest {
                            continue;
                        }
                        let dist2 = geometry::distance2(row, &centers[j * p_dims..(j + 1) * p_dims]);
                        computed += 1;
                        if dist2 < u2 {
                            l2 = u2;
                            u2 = dist2;
                            guard[idx] = closest;
                            closest = j;
                        } else if dist2 == u2 {
                            // exact tie with the current best: lower index
                            // wins, the loser is the second-closest
                            l2 = u2;
                            if j < closest {
                                guard[idx] = closest;
                                closest = j;
                            } else {
                                guard[idx] = j;
                            }
                        } else if dist2 < l2 {
                            // reduce the bound on the distance to the
                            // *second* closest center
                            l2 = dist2;
                            guard[idx] = j;
                        }
                    }

                    lower[idx] = l2.sqrt();
                    if closest != closest0 {
                        upper[idx] = u2.sqrt();
                        stats.reassign(row, &mut assignment[idx], closest);
                    }
                }
                stats.metrics.count_distances(computed);
            });
    }
}
