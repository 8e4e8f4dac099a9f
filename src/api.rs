use crate::geometry::{self, Metrics};
use crate::helpers;
use crate::memory::{AlignedFloatVec, Primitive, SupportedSimdArray, LANES};
use rand::prelude::*;
use rayon::prelude::*;
use std::cell::RefCell;
use std::simd::Simd;

pub type InitDoneCallbackFn<'a, T> = &'a dyn Fn(&KMeansState<T>);
pub type IterationDoneCallbackFn<'a, T> = &'a dyn Fn(usize, T);

/// This is a structure holding various configuration options for the k-means calculations, such as
/// the random number generator to use, the number of workers, or a couple of callbacks that can be
/// set to get status information from a running k-means calculation.
///
/// For more detailed information about all possible options, have a look at [`KMeansConfigBuilder`].
pub struct KMeansConfig<'a, T: Primitive> {
    /// Callback that is called when the initialization phase finished
    /// ## Arguments
    /// - **state**: Current [`KMeansState`] after the initialization (holding the initial assignment)
    pub(crate) init_done: InitDoneCallbackFn<'a, T>,
    /// Callback that is called after each iteration
    /// ## Arguments
    /// - **iteration_id**: Number of the current iteration
    /// - **movement**: Largest distance any center moved in this iteration (0.0 on the converging iteration)
    pub(crate) iteration_done: IterationDoneCallbackFn<'a, T>,
    /// Random number generator to use (initialization methods only; the iteration itself is deterministic)
    pub(crate) rnd: Box<RefCell<dyn RngCore>>,
    /// Number of workers the point set is partitioned over. Each worker owns a
    /// fixed contiguous range of points for the whole run.
    pub(crate) workers: usize,
}
impl<'a, T: Primitive> Default for KMeansConfig<'a, T> {
    fn default() -> Self {
        Self {
            init_done: &|_| {},
            iteration_done: &|_, _| {},
            rnd: Box::new(RefCell::new(rand::thread_rng())),
            workers: rayon::current_num_threads(),
        }
    }
}
impl<'a, T: Primitive> KMeansConfig<'a, T> {
    /// Use the [`KMeansConfigBuilder`] to build a [`KMeansConfig`] instance.
    pub fn build() -> KMeansConfigBuilder<'a, T> {
        KMeansConfigBuilder { config: KMeansConfig::default() }
    }
}
impl<'a, T: Primitive> std::fmt::Debug for KMeansConfig<'a, T> {
    fn fmt(&self, _: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { Ok(()) }
}

pub struct KMeansConfigBuilder<'a, T: Primitive> {
    config: KMeansConfig<'a, T>,
}
impl<'a, T: Primitive> KMeansConfigBuilder<'a, T> {
    /// Set the callback that should be called after the initial assignment was computed,
    /// before the iteration starts.
    pub fn init_done(mut self, init_done: InitDoneCallbackFn<'a, T>) -> Self {
        self.config.init_done = init_done; self
    }
    /// Set the callback that should be called after each iteration during a running k-means calculation.
    pub fn iteration_done(mut self, iteration_done: IterationDoneCallbackFn<'a, T>) -> Self {
        self.config.iteration_done = iteration_done; self
    }
    /// Set the random number generator that should be used in the k-means calculation.
    /// Use a seeded generator for deterministically repeatable results.
    pub fn random_generator<R: RngCore + 'static>(mut self, rnd: R) -> Self {
        self.config.rnd = Box::new(RefCell::new(rnd)); self
    }
    /// Set the number of workers the point set is partitioned over.
    /// ## Default
    /// The rayon thread-pool size.
    pub fn workers(mut self, workers: usize) -> Self {
        assert!(workers >= 1, "worker count must be at least 1");
        self.config.workers = workers; self
    }
    /// Return the internally built configuration structure.
    pub fn build(self) -> KMeansConfig<'a, T> { self.config }
}

/// This is the internally used data-structure, storing the current state during calculation, as
/// well as the final result, as returned by the API.
/// All mutations are done in this structure, making [`KMeans`] immutable, and therefore allowing
/// it to be used in parallel, without having to duplicate the input-data.
///
/// ## Generics
/// - **T**: Underlying primitive type that was used for the calculation
///
/// ## Fields
/// - **k**: The amount of clusters that were requested when calculating this k-means result
/// - **iterations**: Executed iterations until convergence (zero center movement) or the iteration limit
/// - **distsum**: The total sum of (squared) distances from all samples to their respective centroids
/// - **centroids**: Calculated cluster centers [row-major] = [<centroid0>,<centroid1>,<centroid2>,...]
/// - **centroid_frequency**: Amount of samples in each centroid
/// - **assignments**: Vector mapping each sample to its respective nearest cluster
/// - **centroid_distances**: Vector containing each sample's (squared) distance to its centroid
/// - **metrics**: Operation counters (only filled when built with the `diagnostics` feature)
#[derive(Clone, Debug)]
pub struct KMeansState<T: Primitive> {
    pub k: usize,
    pub iterations: usize,
    pub distsum: T,
    pub centroids: Vec<T>,
    pub centroid_frequency: Vec<usize>,
    pub assignments: Vec<usize>,
    pub centroid_distances: Vec<T>,
    pub metrics: Metrics,

    pub(crate) sample_dims: usize,
}
impl<T: Primitive> KMeansState<T> {
    pub(crate) fn new(sample_cnt: usize, sample_dims: usize, k: usize) -> Self {
        Self {
            k,
            iterations: 0,
            distsum: T::zero(),
            centroids: AlignedFloatVec::new(sample_dims * k),
            centroid_frequency: vec![0usize; k],
            assignments: vec![0usize; sample_cnt],
            centroid_distances: vec![T::infinity(); sample_cnt],
            metrics: Metrics::default(),
            sample_dims,
        }
    }
    pub(crate) fn set_centroid_from_iter(&mut self, idx: usize, src: impl Iterator<Item = T>) {
        self.centroids.iter_mut().skip(self.sample_dims * idx).take(self.sample_dims)
                .zip(src)
                .for_each(|(c, s)| *c = s);
    }

    pub(crate) fn remove_padding(mut self, sample_dims: usize) -> Self {
        if self.sample_dims != sample_dims { // Datastructure was padded -> undo
            self.centroids = self.centroids.chunks_exact(self.sample_dims)
                .flat_map(|chunk| chunk.iter().cloned().take(sample_dims)).collect();
            self.sample_dims = sample_dims;
        }
        self
    }
}

/// Entrypoint of this crate's API-Surface.
///
/// Create an instance of this struct, giving the samples you want to operate on. The primitive type
/// of the passed samples array will be the type used internally for all calculations, as well as the result
/// as stored in the returned [`KMeansState`] structure.
///
/// Every algorithm variant produces the exact same result (assignment, centers, iteration count) as
/// the plain Lloyd iteration in [`KMeans::kmeans_lloyd`]; they only differ in how much of the
/// per-iteration distance work they can prove unnecessary and skip.
///
/// ## Supported variants
/// - Lloyd (naive baseline) [`KMeans::kmeans_lloyd`]
/// - Center-center distance pruning [`KMeans::kmeans_compare`]
/// - Sorted center lists [`KMeans::kmeans_sort`]
/// - Hamerly's algorithm (one lower bound per point) [`KMeans::kmeans_hamerly`]
/// - Elkan's algorithm (k lower bounds per point) [`KMeans::kmeans_elkan`]
/// - Elkan with neighbor sets and relative bounds [`KMeans::kmeans_elkan_relative`]
/// - Annulus (norm-ordered center search) [`KMeans::kmeans_annulus`]
/// - Heap-organized bounds [`KMeans::kmeans_heap`]
/// - Drake's adaptive bound count [`KMeans::kmeans_drake`]
///
/// ## Supported initialization methods
/// - K-Means++ [`KMeans::init_kmeanplusplus`]
/// - Random-Sample [`KMeans::init_random_sample`]
/// - Random-Partition [`KMeans::init_random_partition`]
/// - Precomputed assignment [`KMeans::init_precomputed`]
pub struct KMeans<T: Primitive> {
    pub(crate) sample_cnt: usize,
    pub(crate) sample_dims: usize,
    pub(crate) p_sample_dims: usize,
    pub(crate) p_samples: Vec<T>,
    /// Cached squared norm of every sample row.
    pub(crate) sample_norms2: Vec<T>,
}

impl<T> KMeans<T>
where
    T: Primitive,
    Simd<T, LANES>: SupportedSimdArray<T>,
{
    /// Create a new instance of the [`KMeans`] structure.
    ///
    /// ## Arguments
    /// - **samples**: Vector of samples [row-major] = [<sample0>,<sample1>,<sample2>,...]
    /// - **sample_cnt**: Amount of samples, contained in the passed **samples** vector
    /// - **sample_dims**: Amount of dimensions each sample from the **sample** vector has
    pub fn new(samples: Vec<T>, sample_cnt: usize, sample_dims: usize) -> Self {
        assert!(samples.len() == sample_cnt * sample_dims);
        let p_sample_dims = helpers::multiple_roundup(sample_dims, LANES);

        // Recopy into new, properly aligned + padded buffer
        let mut aligned_samples = AlignedFloatVec::new(sample_cnt * p_sample_dims);
        if p_sample_dims == sample_dims {
            aligned_samples.copy_from_slice(&samples);
        } else {
            for s in 0..sample_cnt {
                for d in 0..sample_dims {
                    aligned_samples[s * p_sample_dims + d] = samples[s * sample_dims + d];
                }
            }
        };

        let sample_norms2 = aligned_samples
            .chunks_exact(p_sample_dims)
            .map(|row| geometry::inner_product(row, row))
            .collect();

        Self {
            sample_cnt,
            sample_dims,
            p_sample_dims,
            p_samples: aligned_samples,
            sample_norms2,
        }
    }

    #[inline(always)]
    pub(crate) fn row(&self, i: usize) -> &[T] {
        &self.p_samples[i * self.p_sample_dims..(i + 1) * self.p_sample_dims]
    }

    pub(crate) fn update_centroid_distances(&self, state: &mut KMeansState<T>) {
        let centroids = &state.centroids;
        let p_sample_dims = self.p_sample_dims;

        // manually calculate work-packet size, because rayon does not do static scheduling
        // (which is more appropriate here)
        let work_packet_size = (self.sample_cnt / rayon::current_num_threads()).max(1);
        self.p_samples.par_chunks(p_sample_dims)
            .with_min_len(work_packet_size)
            .zip(state.assignments.par_iter().cloned())
            .zip(state.centroid_distances.par_iter_mut())
            .for_each(|((s, assignment), centroid_dist)| {
                let centroid = &centroids[assignment * p_sample_dims..(assignment + 1) * p_sample_dims];
                *centroid_dist = geometry::distance2(s, centroid);
            });
    }

    pub(crate) fn update_cluster_assignments(&self, state: &mut KMeansState<T>, limit_k: Option<usize>) {
        let centroids = &state.centroids;
        let k = limit_k.unwrap_or(state.k);
        let p_sample_dims = self.p_sample_dims;

        // manually calculate work-packet size, because rayon does not do static scheduling
        // (which is more appropriate here)
        let work_packet_size = (self.sample_cnt / rayon::current_num_threads()).max(1);
        self.p_samples.par_chunks(p_sample_dims)
            .with_min_len(work_packet_size)
            .zip(state.assignments.par_iter_mut())
            .zip(state.centroid_distances.par_iter_mut())
            .for_each(|((s, assignment), centroid_dist)| {
                // scan in index order with a strict comparison, so that of
                // several equidistant centroids the lowest index wins
                let mut best_idx = 0;
                let mut best_dist = T::infinity();
                for (idx, c) in centroids.chunks_exact(p_sample_dims).take(k).enumerate() {
                    let dist = geometry::distance2(s, c);
                    if dist < best_dist {
                        best_dist = dist;
                        best_idx = idx;
                    }
                }
                *assignment = best_idx;
                *centroid_dist = best_dist;
            });
    }

    /// Normal K-Means algorithm implementation (Lloyd's algorithm). Assigns every point to its
    /// nearest center, recomputes the centers, and repeats until no center moves or **max_iter**
    /// is reached. This is the reference every accelerated variant is measured against.
    ///
    /// ## Arguments
    /// - **k**: Amount of clusters to search for
    /// - **max_iter**: Limit the maximum amount of iterations (just pass a high number for infinite)
    /// - **init**: Initialization-Method to use for the initialization of the **k** centroids
    /// - **config**: [`KMeansConfig`] instance, containing several configuration options for the calculation
    ///
    /// ## Returns
    /// Instance of [`KMeansState`], containing the final state (result).
    ///
    /// ## Example
    /// ```rust
    /// use fastkmeans::*;
    ///
    /// let (sample_cnt, sample_dims, k, max_iter) = (2000, 20, 4, 100);
    /// let mut samples = vec![0.0f64; sample_cnt * sample_dims];
    /// samples.iter_mut().for_each(|v| *v = rand::random());
    ///
    /// let kmean = KMeans::new(samples, sample_cnt, sample_dims);
    /// let result = kmean.kmeans_lloyd(k, max_iter, KMeans::init_kmeanplusplus, &KMeansConfig::default());
    ///
    /// println!("Centroids: {:?}", result.centroids);
    /// println!("Cluster-Assignments: {:?}", result.assignments);
    /// println!("Error: {}", result.distsum);
    /// println!("Iterations: {}", result.iterations);
    /// ```
    pub fn kmeans_lloyd<'a, F>(&self, k: usize, max_iter: usize, init: F, config: &KMeansConfig<'a, T>) -> KMeansState<T>
                where for<'c> F: FnOnce(&KMeans<T>, &mut KMeansState<T>, &KMeansConfig<'c, T>) {
        crate::variants::Lloyd::calculate(self, k, max_iter, init, config)
    }

    /// K-Means accelerated with precomputed pairwise center distances: a candidate center provably
    /// farther than the current best is skipped without computing its distance. No per-point state
    /// is kept across iterations.
    pub fn kmeans_compare<'a, F>(&self, k: usize, max_iter: usize, init: F, config: &KMeansConfig<'a, T>) -> KMeansState<T>
                where for<'c> F: FnOnce(&KMeans<T>, &mut KMeansState<T>, &KMeansConfig<'c, T>) {
        crate::variants::Compare::calculate(self, k, max_iter, init, config)
    }

    /// K-Means accelerated with per-cluster center lists sorted by distance: the scan over
    /// candidate centers stops as soon as the remaining ones are provably too far away.
    pub fn kmeans_sort<'a, F>(&self, k: usize, max_iter: usize, init: F, config: &KMeansConfig<'a, T>) -> KMeansState<T>
                where for<'c> F: FnOnce(&KMeans<T>, &mut KMeansState<T>, &KMeansConfig<'c, T>) {
        crate::variants::Sort::calculate(self, k, max_iter, init, config)
    }

    /// Hamerly's algorithm: one upper bound (distance to the assigned center) and one lower bound
    /// (distance to the second-closest center) per point. Points whose bounds prove their
    /// assignment unchanged are skipped without any distance computation.
    ///
    /// The **policy** selects how the lower bound is relaxed after the centers move — see
    /// [`UpdatePolicy`](crate::UpdatePolicy).
    pub fn kmeans_hamerly<'a, F>(&self, k: usize, max_iter: usize, policy: crate::UpdatePolicy, init: F, config: &KMeansConfig<'a, T>) -> KMeansState<T>
                where for<'c> F: FnOnce(&KMeans<T>, &mut KMeansState<T>, &KMeansConfig<'c, T>) {
        crate::variants::Hamerly::calculate(self, k, max_iter, policy, init, config)
    }

    /// Elkan's algorithm: one upper bound and k lower bounds (one per center) per point. Uses more
    /// memory than [`KMeans::kmeans_hamerly`] but avoids full rescans when a single bound fails.
    ///
    /// The **policy** selects how the lower bounds are relaxed after the centers move — see
    /// [`UpdatePolicy`](crate::UpdatePolicy).
    pub fn kmeans_elkan<'a, F>(&self, k: usize, max_iter: usize, policy: crate::UpdatePolicy, init: F, config: &KMeansConfig<'a, T>) -> KMeansState<T>
                where for<'c> F: FnOnce(&KMeans<T>, &mut KMeansState<T>, &KMeansConfig<'c, T>) {
        crate::variants::Elkan::calculate(self, k, max_iter, policy, init, config)
    }

    /// Elkan's algorithm with neighbor pruning and bounds stored relative to per-cluster
    /// accumulated updates, which turns the O(k) per-point bound maintenance into O(1) amortized
    /// work per iteration.
    pub fn kmeans_elkan_relative<'a, F>(&self, k: usize, max_iter: usize, init: F, config: &KMeansConfig<'a, T>) -> KMeansState<T>
                where for<'c> F: FnOnce(&KMeans<T>, &mut KMeansState<T>, &KMeansConfig<'c, T>) {
        crate::variants::ElkanRelative::calculate(self, k, max_iter, init, config)
    }

    /// The annulus algorithm: Hamerly's bounds plus centers kept sorted by norm. When a point's
    /// bounds fail, candidate centers are found with two binary searches over the norm-sorted
    /// list instead of a full k-scan.
    ///
    /// With **tightened** set, the lower bound update uses the tighter geometric rule instead of
    /// the plain movement subtraction.
    pub fn kmeans_annulus<'a, F>(&self, k: usize, max_iter: usize, tightened: bool, init: F, config: &KMeansConfig<'a, T>) -> KMeansState<T>
                where for<'c> F: FnOnce(&KMeans<T>, &mut KMeansState<T>, &KMeansConfig<'c, T>) {
        crate::variants::Annulus::calculate(self, k, max_iter, tightened, init, config)
    }

    /// Heap-organized bounds: one min-heap per (worker, cluster), keyed by the point's bound slack
    /// offset by the cluster's accumulated movement. Only points whose slack went negative are
    /// re-examined; everything else is untouched, without even a per-point bound update.
    ///
    /// The **policy** selects the bound relaxation rule — see [`HeapPolicy`](crate::HeapPolicy).
    pub fn kmeans_heap<'a, F>(&self, k: usize, max_iter: usize, policy: crate::HeapPolicy, init: F, config: &KMeansConfig<'a, T>) -> KMeansState<T>
                where for<'c> F: FnOnce(&KMeans<T>, &mut KMeansState<T>, &KMeansConfig<'c, T>) {
        crate::variants::Heap::calculate(self, k, max_iter, policy, init, config)
    }

    /// Drake's algorithm: a tunable number `b` of sorted lower bounds per point (`1 ≤ b < k`),
    /// covering the b closest other centers. The number of active bounds adapts downward at
    /// runtime when fewer bounds suffice to catch most points.
    ///
    /// Pass `None` for **num_bounds** to start with the default of `k/4` (clamped to a valid
    /// value), matching the behavior tuned in the original evaluation.
    pub fn kmeans_drake<'a, F>(&self, k: usize, max_iter: usize, num_bounds: Option<usize>, init: F, config: &KMeansConfig<'a, T>) -> KMeansState<T>
                where for<'c> F: FnOnce(&KMeans<T>, &mut KMeansState<T>, &KMeansConfig<'c, T>) {
        crate::variants::Drake::calculate(self, k, max_iter, num_bounds, init, config)
    }

    /// K-Means++ initialization method
    ///
    /// ## Description
    /// This initialization method starts by selecting one sample as the first centroid.
    /// Proceeding from there, the method iteratively selects one new centroid (per iteration) by
    /// calculating each sample's probability of "being a centroid". This probability is bigger,
    /// the farther away a sample is from its centroid. Then, one sample is randomly selected,
    /// while taking their probability of being the next centroid into account. This leads to a
    /// tendency of selecting centroids that are far away from their currently assigned cluster's
    /// centroid. The initial assignment handed to the iteration maps every sample to its nearest
    /// seed.
    ///
    /// ## Note
    /// This method is not meant for direct invocation. Pass a reference to it to an
    /// instance-method of [`KMeans`].
    pub fn init_kmeanplusplus<'a>(kmean: &KMeans<T>, state: &mut KMeansState<T>, config: &KMeansConfig<'a, T>) {
        crate::inits::kmeanplusplus::calculate(kmean, state, config);
    }

    /// Random-Partition initialization method
    ///
    /// ## Description
    /// This initialization method randomly assigns each sample to one of the k clusters. The
    /// initial centers are then the means of these random partitions.
    pub fn init_random_partition<'a>(kmean: &KMeans<T>, state: &mut KMeansState<T>, config: &KMeansConfig<'a, T>) {
        crate::inits::randompartition::calculate(kmean, state, config);
    }

    /// Random sample initialization method (a.k.a. Forgy)
    ///
    /// ## Description
    /// This initialization method randomly selects k samples as seed centroids; the initial
    /// assignment maps every sample to its nearest seed.
    ///
    /// ## Note
    /// This method is not meant for direct invocation. Pass a reference to it to an
    /// instance-method of [`KMeans`].
    pub fn init_random_sample<'a>(kmean: &KMeans<T>, state: &mut KMeansState<T>, config: &KMeansConfig<'a, T>) {
        crate::inits::randomsample::calculate(kmean, state, config);
    }

    /// Precomputed initialization: use the given per-sample cluster assignment as-is.
    ///
    /// ## Description
    /// Returns an initialization method that seeds the run with the passed assignment
    /// (one entry per sample, each in `0..k`). This is the natural entry point when the caller
    /// already decided an initialization externally.
    pub fn init_precomputed(assignments: Vec<usize>) -> impl for<'c> FnOnce(&KMeans<T>, &mut KMeansState<T>, &KMeansConfig<'c, T>) {
        move |kmean: &KMeans<T>, state: &mut KMeansState<T>, config: &KMeansConfig<'_, T>| {
            crate::inits::precomputed::calculate(kmean, state, config, assignments);
        }
    }
}
