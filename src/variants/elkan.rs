use crate::api::{KMeans, KMeansConfig, KMeansState};
use crate::bounds::{Bounds, CenterDistances};
use crate::geometry;
use crate::memory::{Primitive, SupportedSimdArray, LANES};
use crate::neighbors::Neighbors;
use crate::state::{split_mut, split_ref, RunState};
use crate::tighter::TighterUpdate;
use crate::variants::{self, UpdatePolicy};
use rayon::prelude::*;
use std::simd::Simd;

/// Elkan's algorithm: one upper bound and k lower bounds per point, one for
/// every center. Per-point updates cost O(k), but a failing bound only forces
/// the distances it covers to be recomputed, never a full rescan.
pub(crate) struct Elkan<T> {
    _p: std::marker::PhantomData<T>,
}

impl<T> Elkan<T>
where
    T: Primitive,
    Simd<T, LANES>: SupportedSimdArray<T>,
{
    pub fn calculate<'a, F>(
        data: &KMeans<T>,
        k: usize,
        max_iter: usize,
        policy: UpdatePolicy,
        init: F,
        config: &KMeansConfig<'a, T>,
    ) -> KMeansState<T>
    where
        for<'c> F: FnOnce(&KMeans<T>, &mut KMeansState<T>, &KMeansConfig<'c, T>),
    {
        let mut state = variants::setup(data, k, "elkan", init, config);
        let mut run = RunState::new(data, k, std::mem::take(&mut state.assignments), config.workers);
        let p_dims = data.p_sample_dims;

        let mut bounds = Bounds::new(data.sample_cnt, k);
        let mut dists = CenterDistances::new(k);
        let mut tighter = (policy != UpdatePolicy::Movement)
            .then(|| TighterUpdate::new(k, p_dims, k, &run.centers, &mut run.metrics));
        let mut neighbors = (policy == UpdatePolicy::TightenedNeighbors).then(|| Neighbors::new_full(k));

        dists.update(&run.centers, p_dims, &mut run.metrics);

        let mut iterations = 0;
        let mut converged = false;
        while iterations < max_iter && !converged {
            iterations += 1;
            if tighter.is_none() && iterations > 1 {
                dists.update(&run.centers, p_dims, &mut run.metrics);
            }
            if iterations > 1 {
                if let Some(nb) = neighbors.as_mut() {
                    // keep only centers that can be closest to some point of
                    // the cluster (the stronger, s-free condition)
                    let t = tighter.as_ref().unwrap();
                    for c in 0..k {
                        let bound = t.max_upper[c] + run.movement[c];
                        nb.filter(c, k, |j| bound >= dists.div2(c, j));
                    }
                }
            }

            Self::assign(data, &mut run, &mut bounds, &dists, neighbors.as_ref());

            if let Some(t) = tighter.as_mut() {
                t.snapshot(&run.centers);
            }
            converged = run.move_centers();

            if !converged {
                if let Some(t) = tighter.as_mut() {
                    dists.update(&run.centers, p_dims, &mut run.metrics);
                    t.calculate_max_upper_bound(&bounds.upper, &run.assignment);
                    t.refresh_cached_inner_products(&run.centers, &run.movement, &mut run.metrics);
                    t.calculate_lower_bound_update_pairs(&run.centers, &run.movement, &mut run.metrics);
                }
                Self::update_bounds(&mut run, &mut bounds, tighter.as_ref());
            }
            (config.iteration_done)(iterations, run.movement[run.furthest]);
        }

        variants::finish(data, run, state, iterations)
    }

    fn assign(data: &KMeans<T>, run: &mut RunState<T>, bounds: &mut Bounds<T>, dists: &CenterDistances<T>, neighbors: Option<&Neighbors>) {
        let RunState { k, p_dims, centers, assignment, ranges, stats, .. } = run;
        let (k, p_dims) = (*k, *p_dims);
        let centers: &[T] = centers;

        split_mut(assignment, ranges, 1)
            .into_par_iter()
            .zip(split_mut(&mut bounds.upper, ranges, 1))
            .zip(split_mut(&mut bounds.lower, ranges, k))
            .zip(stats.par_iter_mut())
            .zip(ranges.par_iter())
            .for_each(|((((assignment, upper), lower), stats), range)| {
                let mut computed = 0u64;
                for (idx, i) in range.clone().enumerate() {
                    let closest0 = assignment[idx];
                    let mut closest = closest0;
                    let mut r = true;

                    if upper[idx] < dists.s[closest0] {
                        continue;
                    }

                    let row = data.row(i);
                    let lower = &mut lower[idx * k..(idx + 1) * k];
                    let candidates: &[usize] = match neighbors {
                        Some(nb) => nb.of(closest0),
                        None => &[],
                    };
                    let mut pos = 0;
                    loop {
                        let j = match neighbors {
                            Some(_) => {
                                if pos >= candidates.len() {
                                    break;
                                }
                                candidates[pos]
                            }
                            None => {
                                if pos >= k {
                                    break;
                                }
                                pos
                            }
                        };
                        pos += 1;

                        if j == closest {
                            continue;
                        }
                        if upper[idx] < lower[j] {
                            continue;
                        }
                        if upper[idx] < dists.div2(closest, j) {
                            continue;
                        }

                        // ELKAN 3(a): tighten the upper bound once, then retry
                        // both pruning conditions with the exact distance
                        if r {
                            upper[idx] = geometry::distance2(row, &centers[closest * p_dims..(closest + 1) * p_dims]).sqrt();
                            computed += 1;
                            lower[closest] = upper[idx];
                            r = false;
                            if upper[idx] < lower[j] || upper[idx] < dists.div2(closest, j) {
                                continue;
                            }
                        }

                        // ELKAN 3(b)
                        let dist = geometry::distance2(row, &centers[j * p_dims..(j + 1) * p_dims]).sqrt();
                        computed += 1;
                        lower[j] = dist;
                        if dist < upper[idx] {
                            closest = j;
                            upper[idx] = dist;
                        } else if dist == upper[idx] && j < closest {
                            closest = j;
                        }
                    }

                    if closest != closest0 {
                        stats.reassign(row, &mut assignment[idx], closest);
                    }
                }
                stats.metrics.count_distances(computed);
            });
    }

    fn update_bounds(run: &mut RunState<T>, bounds: &mut Bounds<T>, tighter: Option<&TighterUpdate<T>>) {
        let frequencies = run.frequencies();
        let RunState { k, assignment, movement, ranges, metrics, .. } = run;
        let k = *k;
        let movement: &[T] = movement;
        let assignment: &[usize] = assignment;

        let applied: T = match tighter {
            Some(t) => frequencies
                .iter()
                .enumerate()
                .map(|(c, &f)| {
                    let per_cluster: T = t.lower_update[c * k..(c + 1) * k].iter().cloned().sum();
                    T::from(f).unwrap() * per_cluster
                })
                .sum(),
            None => {
                let total: T = movement.iter().cloned().sum();
                T::from(assignment.len()).unwrap() * total
            }
        };
        metrics.count_bound_updates(applied);

        split_mut(&mut bounds.upper, ranges, 1)
            .into_par_iter()
            .zip(split_mut(&mut bounds.lower, ranges, k))
            .zip(split_ref(assignment, ranges, 1))
            .for_each(|((upper, lower), assignment)| {
                for (idx, &a) in assignment.iter().enumerate() {
                    upper[idx] += movement[a];
                    let lower = &mut lower[idx * k..(idx + 1) * k];
                    match tighter {
                        Some(t) => {
                            let updates = &t.lower_update[a * k..(a + 1) * k];
                            for j in 0..k {
                                lower[j] -= updates[j];
                            }
                        }
                        None => {
                            for j in 0..k {
                                lower[j] -= movement[j];
                            }
                        }
                    }
                }
            });
    }
}

/// Elkan with neighbor sets and bounds stored as deltas against per-cluster
/// accumulators (`upper_rel`, `lower_rel`). The per-iteration bound
/// maintenance then touches the k (respectively k²) accumulators instead of
/// all n points, making the update phase O(1) amortized per point.
pub(crate) struct ElkanRelative<T> {
    _p: std::marker::PhantomData<T>,
}

impl<T> ElkanRelative<T>
where
    T: Primitive,
    Simd<T, LANES>: SupportedSimdArray<T>,
{
    pub fn calculate<'a, F>(data: &KMeans<T>, k: usize, max_iter: usize, init: F, config: &KMeansConfig<'a, T>) -> KMeansState<T>
    where
        for<'c> F: FnOnce(&KMeans<T>, &mut KMeansState<T>, &KMeansConfig<'c, T>),
    {
        let mut state = variants::setup(data, k, "elkan-relative", init, config);
        let mut run = RunState::new(data, k, std::mem::take(&mut state.assignments), config.workers);
        let p_dims = data.p_sample_dims;

        let mut bounds = Bounds::new(data.sample_cnt, k);
        let mut dists = CenterDistances::new(k);
        let mut tighter = TighterUpdate::new(k, p_dims, k, &run.centers, &mut run.metrics);
        let mut neighbors = Neighbors::new_full(k);
        // accumulated growth of the upper bounds / shrinkage of the lower
        // bounds per cluster (pair of clusters, respectively)
        let mut upper_rel = vec![T::zero(); k];
        let mut lower_rel = vec![T::zero(); k * k];

        dists.update(&run.centers, p_dims, &mut run.metrics);

        let mut iterations = 0;
        let mut converged = false;
        while iterations < max_iter && !converged {
            iterations += 1;
            if iterations > 1 {
                for c in 0..k {
                    let bound = tighter.max_upper[c] + run.movement[c];
                    neighbors.filter(c, k, |j| bound >= dists.div2(c, j));
                }
            }

            Self::assign(data, &mut run, &mut bounds, &dists, &neighbors, &upper_rel, &lower_rel);

            tighter.snapshot(&run.centers);
            converged = run.move_centers();

            if !converged {
                dists.update(&run.centers, p_dims, &mut run.metrics);
                tighter.calculate_max_upper_bound(&bounds.upper, &run.assignment);
                // the stored upper bounds are smaller than the real ones by
                // the accumulated per-cluster growth
                for c in 0..k {
                    tighter.max_upper[c] += upper_rel[c];
                }
                tighter.refresh_cached_inner_products(&run.centers, &run.movement, &mut run.metrics);
                tighter.calculate_lower_bound_update_pairs(&run.centers, &run.movement, &mut run.metrics);

                // the whole bound update: grow the k accumulators instead of
                // touching all n points
                let frequencies = run.frequencies();
                let applied: T = frequencies
                    .iter()
                    .enumerate()
                    .map(|(c, &f)| {
                        let per_cluster: T = tighter.lower_update[c * k..(c + 1) * k].iter().cloned().sum();
                        T::from(f).unwrap() * per_cluster
                    })
                    .sum();
                run.metrics.count_bound_updates(applied);
                for c in 0..k {
                    upper_rel[c] += run.movement[c];
                }
                for idx in 0..k * k {
                    lower_rel[idx] += tighter.lower_update[idx];
                }
            }
            (config.iteration_done)(iterations, run.movement[run.furthest]);
        }

        variants::finish(data, run, state, iterations)
    }

    #[allow(clippy::too_many_arguments)]
    fn assign(
        data: &KMeans<T>,
        run: &mut RunState<T>,
        bounds: &mut Bounds<T>,
        dists: &CenterDistances<T>,
        neighbors: &Neighbors,
        upper_rel: &[T],
        lower_rel: &[T],
    ) {
        let RunState { k, p_dims, centers, assignment, ranges, stats, .. } = run;
        let (k, p_dims) = (*k, *p_dims);
        let centers: &[T] = centers;

        split_mut(assignment, ranges, 1)
            .into_par_iter()
            .zip(split_mut(&mut bounds.upper, ranges, 1))
            .zip(split_mut(&mut bounds.lower, ranges, k))
            .zip(stats.par_iter_mut())
            .zip(ranges.par_iter())
            .for_each(|((((assignment, upper), lower), stats), range)| {
                let mut computed = 0u64;
                for (idx, i) in range.clone().enumerate() {
                    let a0 = assignment[idx];
                    let mut closest = a0;
                    let mut r = true;
                    // the true value of the upper bound
                    let mut upper_i = upper[idx] + upper_rel[a0];

                    if upper_i < dists.s[a0] {
                        continue;
                    }

                    let row = data.row(i);
                    let lower = &mut lower[idx * k..(idx + 1) * k];
                    for &j in neighbors.of(a0) {
                        // the true value of this lower bound
                        let lower_ij = lower[j] - lower_rel[a0 * k + j];
                        if upper_i < lower_ij {
                            continue;
                        }
                        if upper_i < dists.div2(closest, j) {
                            continue;
                        }

                        if r {
                            upper_i = geometry::distance2(row, &centers[closest * p_dims..(closest + 1) * p_dims]).sqrt();
                            computed += 1;
                            // store relative to the accumulated shrinkage
                            lower[closest] = upper_i + lower_rel[a0 * k + closest];
                            r = false;
                            if upper_i < lower_ij || upper_i < dists.div2(closest, j) {
                                continue;
                            }
                        }

                        let dist = geometry::distance2(row, &centers[j * p_dims..(j + 1) * p_dims]).sqrt();
                        computed += 1;
                        lower[j] = dist + lower_rel[a0 * k + j];
                        if dist < upper_i {
                            closest = j;
                            upper_i = dist;
                        } else if dist == upper_i && j < closest {
                            closest = j;
                        }
                    }

                    // store the upper bound relative to the old cluster again
                    upper[idx] = upper_i - upper_rel[a0];
                    if closest != a0 {
                        // rebase the stored bounds onto the new cluster's
                        // accumulators
                        upper[idx] += upper_rel[a0] - upper_rel[closest];
                        for j in 0..k {
                            lower[j] -= lower_rel[a0 * k + j] - lower_rel[closest * k + j];
                        }
                        stats.reassign(row, &mut assignment[idx], closest);
                    }
                }
                stats.metrics.count_distances(computed);
            });
    }
}
