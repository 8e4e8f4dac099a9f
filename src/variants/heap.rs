use crate::api::{KMeans, KMeansConfig, KMeansState};
use crate::bounds::{Bounds, CenterDistances};
use crate::geometry;
use crate::memory::{Primitive, SupportedSimdArray, LANES};
use crate::state::{split_mut, RunState};
use crate::tighter::TighterUpdate;
use crate::variants::{self, HeapPolicy};
use rayon::prelude::*;
use std::collections::BinaryHeap;
use std::simd::Simd;

/// Entry of the per-(worker, cluster) slack heaps: `(key, point)`, ordered as
/// a min-heap on the key (ties on the point index). The key is the cluster's
/// accumulated bound drift at insertion time plus the point's slack
/// (second-closest distance minus closest distance); the point only needs
/// re-examination once the cluster's drift exceeds the key.
#[derive(Clone, Copy, PartialEq)]
struct Slack<T: Primitive>(T, usize);
impl<T: Primitive> Eq for Slack<T> {}
impl<T: Primitive> PartialOrd for Slack<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl<T: Primitive> Ord for Slack<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // reversed, BinaryHeap is a max-heap but the smallest key must surface
        other.0.partial_cmp(&self.0).unwrap().then_with(|| other.1.cmp(&self.1))
    }
}

/// Entry of the upper-bound heaps (UBarr policy): `(relative upper, point)`,
/// ordered as a max-heap so the cluster's largest upper bound is on top.
#[derive(Clone, Copy, PartialEq)]
struct UpperEntry<T: Primitive>(T, usize);
impl<T: Primitive> Eq for UpperEntry<T> {}
impl<T: Primitive> PartialOrd for UpperEntry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl<T: Primitive> Ord for UpperEntry<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.partial_cmp(&other.0).unwrap().then_with(|| self.1.cmp(&other.1))
    }
}

/// One worker's heap state, bound to its fixed point range for the whole run.
struct WorkerHeaps<T: Primitive> {
    heaps: Vec<BinaryHeap<Slack<T>>>,
    /// Max-heaps over the (relative) upper bounds, UBarr policy only.
    ub_heaps: Vec<BinaryHeap<UpperEntry<T>>>,
    /// Maxima of the exact distances computed this iteration, merged into the
    /// shared per-cluster maximum after the scan (Tightened policy only).
    local_max: Vec<T>,
}

/// Heap-organized bounds: instead of per-point bound updates, each cluster
/// accumulates its total bound drift (`heap_bounds`), and each point sits in
/// its cluster's min-heap keyed by drift-at-insertion plus slack. Only points
/// whose key falls below the cluster's drift are re-examined; the rest are
/// not even touched.
pub(crate) struct Heap<T> {
    _p: std::marker::PhantomData<T>,
}

impl<T> Heap<T>
where
    T: Primitive,
    Simd<T, LANES>: SupportedSimdArray<T>,
{
    pub fn calculate<'a, F>(
        data: &KMeans<T>,
        k: usize,
        max_iter: usize,
        policy: HeapPolicy,
        init: F,
        config: &KMeansConfig<'a, T>,
    ) -> KMeansState<T>
    where
        for<'c> F: FnOnce(&KMeans<T>, &mut KMeansState<T>, &KMeansConfig<'c, T>),
    {
        let mut state = variants::setup(data, k, "heap", init, config);
        let mut run = RunState::new(data, k, std::mem::take(&mut state.assignments), config.workers);
        let p_dims = data.p_sample_dims;

        // only the UBarr policy keeps a per-point (relative) upper bound
        let mut bounds = Bounds::new(data.sample_cnt, 0);
        let mut dists = CenterDistances::new(k);
        let mut tighter = (policy != HeapPolicy::Movement)
            .then(|| TighterUpdate::new(k, p_dims, 1, &run.centers, &mut run.metrics));

        let mut heap_bounds = vec![T::zero(); k];
        let mut ub_heap_bounds = vec![T::zero(); k];
        let mut workers: Vec<WorkerHeaps<T>> = run
            .ranges
            .iter()
            .map(|range| {
                let mut heaps: Vec<BinaryHeap<Slack<T>>> = (0..k).map(|_| BinaryHeap::new()).collect();
                // all points start in heap 0 with an always-expired key, so
                // the first iteration examines every point exactly once
                heaps[0] = range.clone().map(|i| Slack(T::from(-1.0).unwrap(), i)).collect();
                WorkerHeaps {
                    heaps,
                    ub_heaps: (0..k).map(|_| BinaryHeap::new()).collect(),
                    local_max: vec![T::zero(); k],
                }
            })
            .collect();

        if policy == HeapPolicy::UpperBoundHeaps {
            dists.update(&run.centers, p_dims, &mut run.metrics);
        }

        let mut iterations = 0;
        let mut converged = false;
        while iterations < max_iter && !converged {
            iterations += 1;

            match policy {
                HeapPolicy::UpperBoundHeaps => {
                    Self::scan_ubarr(data, &mut run, &mut workers, &mut bounds, &dists, &heap_bounds, &ub_heap_bounds, iterations)
                }
                _ => Self::scan(data, &mut run, &mut workers, &heap_bounds, policy == HeapPolicy::Tightened),
            }

            if let Some(t) = tighter.as_mut() {
                if policy == HeapPolicy::Tightened {
                    // the per-cluster maximum upper bound is maintained
                    // incrementally: scan maxima now, plus movement later
                    for worker in &workers {
                        for c in 0..k {
                            if t.max_upper[c] < worker.local_max[c] {
                                t.max_upper[c] = worker.local_max[c];
                            }
                        }
                    }
                }
                t.snapshot(&run.centers);
            }
            converged = run.move_centers();

            if !converged {
                if let Some(t) = tighter.as_mut() {
                    dists.update(&run.centers, p_dims, &mut run.metrics);
                    if policy == HeapPolicy::UpperBoundHeaps {
                        Self::aggregate_max_upper(t, &mut workers, &bounds.upper, &run.assignment, &ub_heap_bounds);
                    }
                    t.refresh_cached_inner_products(&run.centers, &run.movement, &mut run.metrics);
                    t.calculate_lower_bound_update(&run.centers, &run.movement, &dists, &mut run.metrics);
                }
                Self::update_bounds(&mut run, policy, tighter.as_mut(), &mut heap_bounds, &mut ub_heap_bounds);
            }
            (config.iteration_done)(iterations, run.movement[run.furthest]);
        }

        variants::finish(data, run, state, iterations)
    }

    /// Scan for the plain and tightened policies: drain every expired heap
    /// entry, re-evaluate the point exactly, and re-insert it keyed by its
    /// fresh slack.
    fn scan(data: &KMeans<T>, run: &mut RunState<T>, workers: &mut [WorkerHeaps<T>], heap_bounds: &[T], track_max: bool) {
        let RunState { k, p_dims, centers, assignment, ranges, stats, .. } = run;
        let (k, p_dims) = (*k, *p_dims);
        let centers: &[T] = centers;

        workers
            .par_iter_mut()
            .zip(split_mut(assignment, ranges, 1))
            .zip(stats.par_iter_mut())
            .zip(ranges.par_iter())
            .for_each(|(((worker, assignment), stats), range)| {
                let mut computed = 0u64;
                worker.local_max.fill(T::zero());
                for h in 0..k {
                    loop {
                        let Some(&Slack(key, i)) = worker.heaps[h].peek() else { break };
                        if heap_bounds[h] <= key {
                            break;
                        }
                        worker.heaps[h].pop();

                        let slot = i - range.start;
                        let mut closest = assignment[slot];
                        let mut next_closest = 0;
                        let row = data.row(i);

                        let mut u2 = geometry::distance2(row, &centers[closest * p_dims..(closest + 1) * p_dims]);
                        let mut l2 = T::infinity();
                        computed += 1;

                        for j in 0..k {
                            if j == closest {
                                continue;
                            }
                            let dist2 = geometry::distance2(row, &centers[j * p_dims..(j + 1) * p_dims]);
                            computed += 1;
                            if dist2 < u2 {
                                l2 = u2;
                                u2 = dist2;
                                next_closest = closest;
                                closest = j;
                            } else if dist2 < l2 {
                                l2 = dist2;
                                next_closest = j;
                            }
                        }

                        let u = u2.sqrt();
                        let bound = l2.sqrt() - u;

                        // break ties consistently with Lloyd (also prevents
                        // an infinite re-examination cycle)
                        if bound == T::zero() && next_closest < closest {
                            closest = next_closest;
                        }

                        if track_max && u > worker.local_max[closest] {
                            worker.local_max[closest] = u;
                        }

                        if closest != assignment[slot] {
                            stats.reassign(row, &mut assignment[slot], closest);
                        }

                        worker.heaps[closest].push(Slack(heap_bounds[closest] + bound, i));
                    }
                }
                stats.metrics.count_distances(computed);
            });
    }

    /// Scan for the UBarr policy: like the tightened scan, but a per-point
    /// relative upper bound allows re-keying a point without the full
    /// k-wide distance loop whenever its own tightened distance suffices.
    #[allow(clippy::too_many_arguments)]
    fn scan_ubarr(
        data: &KMeans<T>,
        run: &mut RunState<T>,
        workers: &mut [WorkerHeaps<T>],
        bounds: &mut Bounds<T>,
        dists: &CenterDistances<T>,
        heap_bounds: &[T],
        ub_heap_bounds: &[T],
        iteration: usize,
    ) {
        let RunState { k, p_dims, centers, assignment, ranges, stats, .. } = run;
        let (k, p_dims) = (*k, *p_dims);
        let centers: &[T] = centers;
        let two = T::from(2.0).unwrap();

        workers
            .par_iter_mut()
            .zip(split_mut(assignment, ranges, 1))
            .zip(split_mut(&mut bounds.upper, ranges, 1))
            .zip(stats.par_iter_mut())
            .zip(ranges.par_iter())
            .for_each(|((((worker, assignment), upper), stats), range)| {
                let mut computed = 0u64;
                for h in 0..k {
                    loop {
                        let Some(&Slack(key, i)) = worker.heaps[h].peek() else { break };
                        if heap_bounds[h] <= key {
                            break;
                        }

                        let slot = i - range.start;
                        let mut closest = assignment[slot];
                        let mut next_closest = 0;
                        let bound = key - heap_bounds[closest];
                        worker.heaps[h].pop();

                        let row = data.row(i);
                        // the real value of the upper bound
                        let mut u = upper[slot] + ub_heap_bounds[closest];
                        let original_lower = bound + u;

                        // using s[closest] to estimate the lower bound is
                        // the heap rendition of tightening the upper bound
                        // (cannot trigger in iteration 1 with more than one
                        // center, u is still maximal)
                        if u <= dists.s[closest] {
                            let new_key = heap_bounds[closest] + two * (dists.s[closest] - u);
                            worker.heaps[closest].push(Slack(new_key, i));
                            continue;
                        }

                        let mut u2 = geometry::distance2(row, &centers[closest * p_dims..(closest + 1) * p_dims]);
                        computed += 1;
                        u = u2.sqrt();

                        let s_or_lower = if dists.s[closest] > original_lower { dists.s[closest] } else { original_lower };
                        if u <= s_or_lower && iteration != 1 {
                            upper[slot] = u - ub_heap_bounds[closest];
                            let recovered = if original_lower > two * dists.s[closest] - u {
                                original_lower
                            } else {
                                two * dists.s[closest] - u
                            };
                            worker.heaps[closest].push(Slack(heap_bounds[closest] + recovered - u, i));
                            continue;
                        } else if iteration == 1 && u < dists.s[closest] {
                            upper[slot] = u - ub_heap_bounds[closest];
                            worker.heaps[closest].push(Slack(heap_bounds[closest] + two * (dists.s[closest] - u), i));
                            // every point must enter the upper-bound heap in
                            // the first iteration
                            worker.ub_heaps[closest].push(UpperEntry(u - ub_heap_bounds[closest], i));
                            continue;
                        }

                        let mut l2 = T::infinity();
                        for j in 0..k {
                            if j == closest {
                                continue;
                            }
                            let dist2 = geometry::distance2(row, &centers[j * p_dims..(j + 1) * p_dims]);
                            computed += 1;
                            if dist2 < u2 {
                                l2 = u2;
                                u2 = dist2;
                                next_closest = closest;
                                closest = j;
                            } else if dist2 < l2 {
                                l2 = dist2;
                                next_closest = j;
                            }
                        }

                        u = u2.sqrt();
                        let bound = l2.sqrt() - u;
                        if bound == T::zero() && next_closest < closest {
                            closest = next_closest;
                        }

                        if closest != assignment[slot] || iteration == 1 {
                            worker.ub_heaps[closest].push(UpperEntry(u - ub_heap_bounds[closest], i));
                        }
                        if closest != assignment[slot] {
                            stats.reassign(row, &mut assignment[slot], closest);
                        }

                        upper[slot] = u - ub_heap_bounds[closest];
                        worker.heaps[closest].push(Slack(heap_bounds[closest] + bound, i));
                    }
                }
                stats.metrics.count_distances(computed);
            });
    }

    /// UBarr: each cluster's maximum upper bound is the top of its upper
    /// bound heap, after dropping entries that became stale (point moved to
    /// another cluster, or its stored bound was tightened since).
    fn aggregate_max_upper(
        tighter: &mut TighterUpdate<T>,
        workers: &mut [WorkerHeaps<T>],
        upper: &[T],
        assignment: &[usize],
        ub_heap_bounds: &[T],
    ) {
        let k = tighter.max_upper.len();
        workers.par_iter_mut().for_each(|worker| {
            for c in 0..k {
                let heap = &mut worker.ub_heaps[c];
                while heap.len() > 1 {
                    let &UpperEntry(key, i) = heap.peek().unwrap();
                    if assignment[i] == c {
                        if upper[i] == key {
                            break;
                        }
                        // replace the outdated entry with the current bound
                        heap.push(UpperEntry(upper[i], i));
                    }
                    heap.pop();
                }
            }
        });

        tighter.max_upper.fill(T::zero());
        for worker in workers.iter() {
            for c in 0..k {
                if let Some(&UpperEntry(key, _)) = worker.ub_heaps[c].peek() {
                    let real = key + ub_heap_bounds[c];
                    if tighter.max_upper[c] < real {
                        tighter.max_upper[c] = real;
                    }
                }
            }
        }
    }

    fn update_bounds(
        run: &mut RunState<T>,
        policy: HeapPolicy,
        tighter: Option<&mut TighterUpdate<T>>,
        heap_bounds: &mut [T],
        ub_heap_bounds: &mut [T],
    ) {
        let movement: &[T] = &run.movement;
        match (policy, tighter) {
            (HeapPolicy::Movement, _) => {
                let (furthest, longest, second) = run.movement_extremes();
                for (j, hb) in heap_bounds.iter_mut().enumerate() {
                    *hb += movement[j];
                    *hb += if j == furthest { second } else { longest };
                }
            }
            (HeapPolicy::Tightened, Some(t)) => {
                let frequencies = run.frequencies();
                let applied: T = frequencies
                    .iter()
                    .zip(t.lower_update.iter())
                    .map(|(&f, &u)| T::from(f).unwrap() * u)
                    .sum();
                run.metrics.count_bound_updates(applied);
                for j in 0..heap_bounds.len() {
                    t.max_upper[j] += movement[j];
                    heap_bounds[j] += movement[j] + t.lower_update[j];
                }
            }
            (HeapPolicy::UpperBoundHeaps, Some(t)) => {
                let frequencies = run.frequencies();
                let applied: T = frequencies
                    .iter()
                    .zip(t.lower_update.iter())
                    .map(|(&f, &u)| T::from(f).unwrap() * u)
                    .sum();
                run.metrics.count_bound_updates(applied);
                for j in 0..heap_bounds.len() {
                    ub_heap_bounds[j] += movement[j];
                    heap_bounds[j] += movement[j] + t.lower_update[j];
                }
            }
            _ => unreachable!("tightened heap policies always carry the update state"),
        }
    }
}
