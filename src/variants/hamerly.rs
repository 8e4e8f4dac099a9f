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

/// Hamerly's algorithm: one upper bound per point (distance to the assigned
/// center) and a single lower bound per point covering all other centers,
/// representing the distance to the second-closest one. A point is skipped
/// when the upper bound cannot exceed `max(s[assigned], lower)`.
pub(crate) struct Hamerly<T> {
    _p: std::marker::PhantomData<T>,
}

impl<T> Hamerly<T>
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
        let mut state = variants::setup(data, k, "hamerly", init, config);
        let mut run = RunState::new(data, k, std::mem::take(&mut state.assignments), config.workers);
        let p_dims = data.p_sample_dims;

        let mut bounds = Bounds::new(data.sample_cnt, 1);
        let mut dists = CenterDistances::new(k);
        let mut tighter = (policy != UpdatePolicy::Movement)
            .then(|| TighterUpdate::new(k, p_dims, 1, &run.centers, &mut run.metrics));
        let mut neighbors = (policy == UpdatePolicy::TightenedNeighbors).then(|| Neighbors::new_full(k));

        // needed before the first iteration; afterwards the tightened
        // variants refresh it inside the center-move phase
        dists.update(&run.centers, p_dims, &mut run.metrics);

        let mut iterations = 0;
        let mut converged = false;
        while iterations < max_iter && !converged {
            iterations += 1;
            if tighter.is_none() && iterations > 1 {
                dists.update(&run.centers, p_dims, &mut run.metrics);
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
                    match neighbors.as_mut() {
                        Some(nb) => t.calculate_lower_bound_update_neighbors(&run.centers, &run.movement, &dists, nb, &mut run.metrics),
                        None => t.calculate_lower_bound_update(&run.centers, &run.movement, &dists, &mut run.metrics),
                    }
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
            .zip(split_mut(&mut bounds.lower, ranges, 1))
            .zip(stats.par_iter_mut())
            .zip(ranges.par_iter())
            .for_each(|((((assignment, upper), lower), stats), range)| {
                let mut computed = 0u64;
                for (idx, i) in range.clone().enumerate() {
                    let closest0 = assignment[idx];
                    let upper_comparison_bound = if dists.s[closest0] > lower[idx] { dists.s[closest0] } else { lower[idx] };

                    // first check: if u(x) is strictly below both s(c(x)) and
                    // lower(x), no other center can be closest (not even tied)
                    if upper[idx] < upper_comparison_bound {
                        continue;
                    }

                    // tighten the upper bound to the true distance and retry
                    let row = data.row(i);
                    let mut u2 = geometry::distance2(row, &centers[closest0 * p_dims..(closest0 + 1) * p_dims]);
                    computed += 1;
                    upper[idx] = u2.sqrt();
                    if upper[idx] < upper_comparison_bound {
                        continue;
                    }

                    // full (or neighbor-restricted) scan, tracking the best
                    // center and the distance to the second-best
                    let mut closest = closest0;
                    let mut l2 = T::infinity();
                    let candidates: &[usize] = match neighbors {
                        Some(nb) => nb.of(closest0),
                        None => &[],
                    };
                    let examine = |j: usize, u2: &mut T, l2: &mut T, closest: &mut usize| {
                        let dist2 = geometry::distance2(row, &centers[j * p_dims..(j + 1) * p_dims]);
                        if dist2 < *u2 {
                            *l2 = *u2;
                            *u2 = dist2;
                            *closest = j;
                        } else if dist2 == *u2 {
                            // exactly tied with the current best: the lower
                            // index wins, and the second-best distance ties too
                            if j < *closest {
                                *closest = j;
                            }
                            if dist2 < *l2 {
                                *l2 = dist2;
                            }
                        } else if dist2 < *l2 {
                            *l2 = dist2;
                        }
                    };
                    if neighbors.is_some() {
                        for &j in candidates {
                            examine(j, &mut u2, &mut l2, &mut closest);
                        }
                        computed += candidates.len() as u64;
                    } else {
                        for j in 0..k {
                            if j == closest0 {
                                continue;
                            }
                            examine(j, &mut u2, &mut l2, &mut closest);
                        }
                        computed += (k - 1) as u64;
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

    /// Shared with the annulus variant, which keeps Hamerly's bound layout.
    pub(super) fn update_bounds(run: &mut RunState<T>, bounds: &mut Bounds<T>, tighter: Option<&TighterUpdate<T>>) {
        let extremes = run.movement_extremes();
        let frequencies = run.frequencies();
        let RunState { assignment, movement, ranges, metrics, .. } = run;
        let movement: &[T] = movement;
        let assignment: &[usize] = assignment;

        match tighter {
            Some(t) => {
                let applied: T = frequencies
                    .iter()
                    .zip(t.lower_update.iter())
                    .map(|(&f, &u)| T::from(f).unwrap() * u)
                    .sum();
                metrics.count_bound_updates(applied);

                split_mut(&mut bounds.upper, ranges, 1)
                    .into_par_iter()
                    .zip(split_mut(&mut bounds.lower, ranges, 1))
                    .zip(split_ref(assignment, ranges, 1))
                    .for_each(|((upper, lower), assignment)| {
                        for (idx, &a) in assignment.iter().enumerate() {
                            // the upper bound widens by its center's movement,
                            // the lower bound narrows by the tightened update
                            upper[idx] += movement[a];
                            lower[idx] -= t.lower_update[a];
                        }
                    });
            }
            None => {
                let (furthest, longest, second) = extremes;
                let n = assignment.len();
                let applied = T::from(frequencies[furthest]).unwrap() * second
                    + T::from(n - frequencies[furthest]).unwrap() * longest;
                metrics.count_bound_updates(applied);

                split_mut(&mut bounds.upper, ranges, 1)
                    .into_par_iter()
                    .zip(split_mut(&mut bounds.lower, ranges, 1))
                    .zip(split_ref(assignment, ranges, 1))
                    .for_each(|((upper, lower), assignment)| {
                        for (idx, &a) in assignment.iter().enumerate() {
                            upper[idx] += movement[a];
                            // the single lower bound covers every other
                            // center: it must absorb the largest movement,
                            // or the second largest when the assigned center
                            // itself moved the most
                            lower[idx] -= if a == furthest { second } else { longest };
                        }
                    });
            }
        }
    }
}
