#![feature(portable_simd)]
#![cfg_attr(test, feature(test))]

//! # fastkmeans - API documentation
//!
//! fastkmeans is a rust library for exact, accelerated k-means clustering.
//!
//! ## Design target
//! Every algorithm in this crate computes the same result as the textbook
//! "assign each point to its nearest center, recompute the centers, repeat
//! until stable" procedure (Lloyd's algorithm) — the same assignment, the
//! same centers, the same iteration count. The acceleration comes entirely
//! from proving distance computations unnecessary: per-point upper and lower
//! distance bounds maintained through the triangle inequality, a tightened
//! geometric bound-update rule, neighbor pruning between centers, and
//! several ways of organizing the bounds (a single lower bound, k lower
//! bounds, norm-sorted center search, per-cluster heaps, adaptively sized
//! bound arrays).
//!
//! The main performance target is throughput, so the API surface is rather
//! plain: samples are handed over as a raw row-major vector instead of any
//! high-level matrix crate, and the kernels use explicit SIMD over rows
//! padded to the vector width.
//!
//! ## Supported variants
//! K-Means acceleration is not one algorithm but a family; which member wins
//! depends on n, d, k and the data. For the list of implemented variants,
//! have a look at the documentation of [`KMeans`].
//!
//! ## Supported centroid initializations
//! The outcome of each run depends on the initialization. All methods end in
//! the same place: an initial per-point cluster assignment, from which the
//! run derives its starting centers (the cluster means). For the list of
//! implemented initialization methods, see [`KMeans`].
//!
//! ## Supported primitive types
//! - [`f32`]
//! - [`f64`]
//!
//! ## Example
//! Variants and initializations can be combined at will. Here is Hamerly's
//! algorithm with the tightened bound update, seeded by k-means++:
//!
//! ```rust
//! use fastkmeans::*;
//!
//! let (sample_cnt, sample_dims, k, max_iter) = (2000, 20, 8, 500);
//!
//! // Generate some random data
//! let mut samples = vec![0.0f64; sample_cnt * sample_dims];
//! samples.iter_mut().for_each(|v| *v = rand::random());
//!
//! let kmean = KMeans::new(samples, sample_cnt, sample_dims);
//! let result = kmean.kmeans_hamerly(k, max_iter, UpdatePolicy::Tightened,
//!     KMeans::init_kmeanplusplus, &KMeansConfig::default());
//!
//! println!("Centroids: {:?}", result.centroids);
//! println!("Cluster-Assignments: {:?}", result.assignments);
//! println!("Error: {}", result.distsum);
//! println!("Iterations: {}", result.iterations);
//! ```
//!
//! ## Example (using the status event callbacks)
//! ```rust
//! use fastkmeans::*;
//!
//! let (sample_cnt, sample_dims, k) = (2000, 16, 8);
//!
//! let mut samples = vec![0.0f64; sample_cnt * sample_dims];
//! samples.iter_mut().for_each(|v| *v = rand::random());
//!
//! let conf = KMeansConfig::build()
//!     .init_done(&|_| println!("Initialization completed."))
//!     .iteration_done(&|nr, movement|
//!         println!("Iteration {} - largest center movement: {:.6}", nr, movement))
//!     .build();
//!
//! let kmean = KMeans::new(samples, sample_cnt, sample_dims);
//! let result = kmean.kmeans_elkan(k, 500, UpdatePolicy::TightenedNeighbors,
//!     KMeans::init_kmeanplusplus, &conf);
//! println!("Error: {}", result.distsum);
//! ```
//!
//! ## Short API-Overview / Description
//! Entry-point of the library is the [`KMeans`] struct. This struct is generic over the underlying
//! primitive type, that should be used for the calculations. To use KMeans, an instance of this
//! struct is created, taking over the sample data into its ownership (and doing some
//! memory-related optimizations).
//!
//! The [`KMeans`] struct's instance-methods represent the supported k-means variants. Calling such
//! a method (e.g. [`KMeans::kmeans_elkan`]) does not mutate the struct, so multiple runs can be
//! done in parallel (each run is already parallelized internally over a configurable number of
//! workers). Internally, a new instance of [`KMeansState`] is used to store the state (and finally
//! the result) of a calculation.
//!
//! All of the instance-methods take multiple arguments. One of which is the chosen centroid
//! initialization method. These initialization-method implementations are static methods within
//! the [`KMeans`] struct, which are simply passed in as reference.

#[cfg(test)]
extern crate test;

#[macro_use]
mod helpers;
mod api;
mod bounds;
mod geometry;
mod inits;
mod memory;
mod neighbors;
mod state;
mod tighter;
mod variants;

pub use api::{KMeans, KMeansConfig, KMeansConfigBuilder, KMeansState};
pub use geometry::Metrics;
pub use memory::Primitive;
pub use variants::{HeapPolicy, UpdatePolicy};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helpers::testing;
    use crate::memory::{SupportedSimdArray, LANES};
    use rand::prelude::*;
    use std::simd::Simd;
    use test::Bencher;

    /// Run every variant on the same input and demand identical outcomes,
    /// mirroring how the reference implementation cross-validated iteration
    /// counts and SSE across its algorithm roster.
    fn run_all_variants<T: Primitive>(n: usize, d: usize, k: usize, seed: u64)
    where
        Simd<T, LANES>: SupportedSimdArray<T>,
    {
        let samples = testing::random_samples::<T>(n * d, seed);
        let data = KMeans::new(samples, n, d);
        let runs: Vec<(&str, KMeansState<T>)> = vec![
            ("lloyd", data.kmeans_lloyd(k, 500, KMeans::init_kmeanplusplus, &testing::seeded_config(seed, 3))),
            ("compare", data.kmeans_compare(k, 500, KMeans::init_kmeanplusplus, &testing::seeded_config(seed, 3))),
            ("sort", data.kmeans_sort(k, 500, KMeans::init_kmeanplusplus, &testing::seeded_config(seed, 3))),
            (
                "hamerly",
                data.kmeans_hamerly(k, 500, UpdatePolicy::Movement, KMeans::init_kmeanplusplus, &testing::seeded_config(seed, 3)),
            ),
            (
                "hamerly-tightened",
                data.kmeans_hamerly(k, 500, UpdatePolicy::TightenedNeighbors, KMeans::init_kmeanplusplus, &testing::seeded_config(seed, 3)),
            ),
            (
                "elkan",
                data.kmeans_elkan(k, 500, UpdatePolicy::Tightened, KMeans::init_kmeanplusplus, &testing::seeded_config(seed, 3)),
            ),
            (
                "elkan-relative",
                data.kmeans_elkan_relative(k, 500, KMeans::init_kmeanplusplus, &testing::seeded_config(seed, 3)),
            ),
            (
                "annulus",
                data.kmeans_annulus(k, 500, true, KMeans::init_kmeanplusplus, &testing::seeded_config(seed, 3)),
            ),
            (
                "heap",
                data.kmeans_heap(k, 500, HeapPolicy::UpperBoundHeaps, KMeans::init_kmeanplusplus, &testing::seeded_config(seed, 3)),
            ),
            (
                "drake",
                data.kmeans_drake(k, 500, None, KMeans::init_kmeanplusplus, &testing::seeded_config(seed, 3)),
            ),
        ];

        let (_, baseline) = &runs[0];
        for (name, run) in &runs[1..] {
            let _ = name;
            testing::assert_same_result(baseline, run);
        }
    }

    #[test]
    fn all_variants_agree_f64() {
        run_all_variants::<f64>(400, 6, 10, 1234);
    }

    #[test]
    fn all_variants_agree_f64_low_dim() {
        run_all_variants::<f64>(600, 2, 16, 99);
    }

    #[test]
    fn all_variants_agree_f32() {
        run_all_variants::<f32>(300, 4, 8, 4321);
    }

    #[test]
    fn rerunning_a_converged_result_changes_nothing() {
        // idempotence at convergence: seeding a fresh run with a converged
        // assignment must converge in a single iteration to the same state
        let (n, d, k) = (300, 5, 7);
        let samples = testing::random_samples::<f64>(n * d, 31);
        let data = KMeans::new(samples, n, d);
        let first = data.kmeans_lloyd(k, 500, KMeans::init_kmeanplusplus, &testing::seeded_config(2, 2));
        let second = data.kmeans_lloyd(
            k,
            500,
            KMeans::init_precomputed(first.assignments.clone()),
            &testing::seeded_config(2, 2),
        );
        assert_eq!(second.iterations, 1);
        assert_eq!(second.assignments, first.assignments);
        for (a, b) in first.centroids.iter().zip(second.centroids.iter()) {
            assert_approx_eq!(*a, *b, 1e-12);
        }
    }

    #[test]
    fn worker_count_does_not_change_the_result() {
        let (n, d, k) = (250, 3, 6);
        let samples = testing::random_samples::<f64>(n * d, 77);
        let data = KMeans::new(samples, n, d);
        let single = data.kmeans_hamerly(k, 500, UpdatePolicy::Tightened, KMeans::init_kmeanplusplus, &testing::seeded_config(7, 1));
        for workers in [2, 3, 5, 8] {
            let multi =
                data.kmeans_hamerly(k, 500, UpdatePolicy::Tightened, KMeans::init_kmeanplusplus, &testing::seeded_config(7, workers));
            assert_eq!(single.assignments, multi.assignments);
            assert_eq!(single.iterations, multi.iterations);
        }
    }

    #[bench]
    fn complete_benchmark_lloyd_f64(b: &mut Bencher) {
        complete_benchmark::<f64>(b, |data, k, conf| data.kmeans_lloyd(k, 100, KMeans::init_kmeanplusplus, conf));
    }
    #[bench]
    fn complete_benchmark_hamerly_f64(b: &mut Bencher) {
        complete_benchmark::<f64>(b, |data, k, conf| {
            data.kmeans_hamerly(k, 100, UpdatePolicy::Tightened, KMeans::init_kmeanplusplus, conf)
        });
    }
    #[bench]
    fn complete_benchmark_elkan_f64(b: &mut Bencher) {
        complete_benchmark::<f64>(b, |data, k, conf| {
            data.kmeans_elkan(k, 100, UpdatePolicy::TightenedNeighbors, KMeans::init_kmeanplusplus, conf)
        });
    }
    #[bench]
    fn complete_benchmark_heap_f64(b: &mut Bencher) {
        complete_benchmark::<f64>(b, |data, k, conf| {
            data.kmeans_heap(k, 100, HeapPolicy::Tightened, KMeans::init_kmeanplusplus, conf)
        });
    }

    fn complete_benchmark<T: Primitive>(
        b: &mut Bencher,
        run: impl Fn(&KMeans<T>, usize, &KMeansConfig<T>) -> KMeansState<T>,
    ) where
        Simd<T, LANES>: SupportedSimdArray<T>,
    {
        let (sample_cnt, sample_dims, k) = (2000, 32, 16);
        let mut rnd = StdRng::seed_from_u64(1337);
        let mut samples = vec![T::zero(); sample_cnt * sample_dims];
        samples.iter_mut().for_each(|v| *v = rnd.gen_range(T::zero()..T::one()));
        let kmean = KMeans::new(samples, sample_cnt, sample_dims);
        b.iter(|| {
            let conf = testing::seeded_config(1337, 4);
            run(&kmean, k, &conf)
        });
    }
}
