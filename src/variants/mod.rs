use crate::api::{KMeans, KMeansConfig, KMeansState};
use crate::memory::{Primitive, SupportedSimdArray, LANES};
use crate::state::RunState;
use log::debug;
use std::simd::Simd;

mod annulus;
mod compare;
mod drake;
mod elkan;
mod hamerly;
mod heap;
mod lloyd;
mod sort;

pub(crate) use annulus::Annulus;
pub(crate) use compare::Compare;
pub(crate) use drake::Drake;
pub(crate) use elkan::{Elkan, ElkanRelative};
pub(crate) use hamerly::Hamerly;
pub(crate) use heap::Heap;
pub(crate) use lloyd::Lloyd;
pub(crate) use sort::Sort;

/// How the lower bounds are relaxed after the centers move.
///
/// All policies yield the exact same clustering; a tighter policy only prunes
/// more of the per-iteration distance work.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdatePolicy {
    /// Classic triangle-inequality rule: a lower bound decreases by the full
    /// movement of the center(s) it covers.
    Movement,
    /// Tighter geometric rule, exploiting that all points of a cluster lie in
    /// a ball of known radius around its center.
    Tightened,
    /// The tighter rule restricted to each cluster's neighbor set; the
    /// assignment scan also only examines neighbors.
    TightenedNeighbors,
}

/// Bound relaxation rule for the heap-organized variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeapPolicy {
    /// Per-cluster heap keys decrease by the largest center movement
    /// (second-largest for the furthest-moving center's own heap).
    Movement,
    /// Heap keys decrease by the tightened geometric update.
    Tightened,
    /// Like [`HeapPolicy::Tightened`], plus a second set of heaps tracking
    /// every cluster's maximum upper bound without O(n) scans.
    UpperBoundHeaps,
}

/// Shared entry work of every variant: validate the request, run the
/// initialization method, announce it, and hand back the state carrying the
/// initial assignment.
pub(crate) fn setup<'a, T, F>(
    data: &KMeans<T>,
    k: usize,
    name: &str,
    init: F,
    config: &KMeansConfig<'a, T>,
) -> KMeansState<T>
where
    T: Primitive,
    Simd<T, LANES>: SupportedSimdArray<T>,
    for<'c> F: FnOnce(&KMeans<T>, &mut KMeansState<T>, &KMeansConfig<'c, T>),
{
    assert!(k >= 1, "cannot cluster into zero clusters");
    assert!(k <= data.sample_cnt, "more clusters requested than there are samples");
    debug!(
        "{}: n={} d={} k={} workers={}",
        name, data.sample_cnt, data.sample_dims, k, config.workers
    );
    let mut state = KMeansState::new(data.sample_cnt, data.p_sample_dims, k);
    init(data, &mut state, config);
    (config.init_done)(&state);
    state
}

/// Shared exit work: fold the run state back into the public result, compute
/// the final per-point distances and their sum, and strip the padding.
pub(crate) fn finish<T>(
    data: &KMeans<T>,
    run: RunState<T>,
    mut state: KMeansState<T>,
    iterations: usize,
) -> KMeansState<T>
where
    T: Primitive,
    Simd<T, LANES>: SupportedSimdArray<T>,
{
    state.iterations = iterations;
    state.centroids.copy_from_slice(&run.centers);
    state.centroid_frequency = run.frequencies();
    state.metrics = run.merged_metrics();
    state.assignments = run.assignment;
    data.update_centroid_distances(&mut state);
    state.distsum = state.centroid_distances.iter().cloned().sum();
    debug!("done after {} iterations, sse {}", iterations, state.distsum);
    state.remove_padding(data.sample_dims)
}
