//! Runs the whole algorithm roster on one dataset from the same seed and
//! prints iterations, SSE and wall time per variant. All rows must report the
//! same iteration count and SSE; only the runtime may differ.

use fastkmeans::*;
use rand::prelude::*;
use std::time::Instant;

fn config<'a>(seed: u64) -> KMeansConfig<'a, f64> {
    KMeansConfig::build().random_generator(StdRng::seed_from_u64(seed)).build()
}

fn main() {
    let (sample_cnt, sample_dims, k, max_iter, seed) = (10000, 16, 32, 500, 1337);

    let mut rnd = StdRng::seed_from_u64(seed);
    let mut samples = vec![0.0f64; sample_cnt * sample_dims];
    samples.iter_mut().for_each(|v| *v = rnd.gen_range(0.0..1.0));
    let kmean = KMeans::new(samples, sample_cnt, sample_dims);

    let runs: Vec<(&str, Box<dyn Fn() -> KMeansState<f64> + '_>)> = vec![
        ("lloyd", Box::new(|| kmean.kmeans_lloyd(k, max_iter, KMeans::init_kmeanplusplus, &config(seed)))),
        ("compare", Box::new(|| kmean.kmeans_compare(k, max_iter, KMeans::init_kmeanplusplus, &config(seed)))),
        ("sort", Box::new(|| kmean.kmeans_sort(k, max_iter, KMeans::init_kmeanplusplus, &config(seed)))),
        ("hamerly", Box::new(|| {
            kmean.kmeans_hamerly(k, max_iter, UpdatePolicy::Movement, KMeans::init_kmeanplusplus, &config(seed))
        })),
        ("hamerlymodified", Box::new(|| {
            kmean.kmeans_hamerly(k, max_iter, UpdatePolicy::Tightened, KMeans::init_kmeanplusplus, &config(seed))
        })),
        ("hamerlyneighbors", Box::new(|| {
            kmean.kmeans_hamerly(k, max_iter, UpdatePolicy::TightenedNeighbors, KMeans::init_kmeanplusplus, &config(seed))
        })),
        ("elkan", Box::new(|| {
            kmean.kmeans_elkan(k, max_iter, UpdatePolicy::Movement, KMeans::init_kmeanplusplus, &config(seed))
        })),
        ("elkanmodified", Box::new(|| {
            kmean.kmeans_elkan(k, max_iter, UpdatePolicy::Tightened, KMeans::init_kmeanplusplus, &config(seed))
        })),
        ("elkanneighbors", Box::new(|| {
            kmean.kmeans_elkan(k, max_iter, UpdatePolicy::TightenedNeighbors, KMeans::init_kmeanplusplus, &config(seed))
        })),
        ("elkanrelative", Box::new(|| kmean.kmeans_elkan_relative(k, max_iter, KMeans::init_kmeanplusplus, &config(seed)))),
        ("annulus", Box::new(|| kmean.kmeans_annulus(k, max_iter, false, KMeans::init_kmeanplusplus, &config(seed)))),
        ("annulusmodified", Box::new(|| kmean.kmeans_annulus(k, max_iter, true, KMeans::init_kmeanplusplus, &config(seed)))),
        ("heap", Box::new(|| {
            kmean.kmeans_heap(k, max_iter, HeapPolicy::Movement, KMeans::init_kmeanplusplus, &config(seed))
        })),
        ("heapmodified", Box::new(|| {
            kmean.kmeans_heap(k, max_iter, HeapPolicy::Tightened, KMeans::init_kmeanplusplus, &config(seed))
        })),
        ("heapubarr", Box::new(|| {
            kmean.kmeans_heap(k, max_iter, HeapPolicy::UpperBoundHeaps, KMeans::init_kmeanplusplus, &config(seed))
        })),
        ("drake", Box::new(|| kmean.kmeans_drake(k, max_iter, None, KMeans::init_kmeanplusplus, &config(seed)))),
    ];

    println!("{:>18}  {:>10}  {:>14}  {:>10}", "algorithm", "iterations", "sse", "time");
    let mut reference: Option<(usize, f64)> = None;
    for (name, run) in runs {
        let start = Instant::now();
        let result = run();
        let elapsed = start.elapsed();
        println!(
            "{:>18}  {:>10}  {:>14.6}  {:>8.3}s",
            name,
            result.iterations,
            result.distsum,
            elapsed.as_secs_f64()
        );

        match reference {
            None => reference = Some((result.iterations, result.distsum)),
            Some((iterations, sse)) => {
                assert_eq!(result.iterations, iterations, "{} diverged from the baseline iteration count", name);
                assert!(
                    (result.distsum - sse).abs() < 1e-6 * sse.max(1.0),
                    "{} diverged from the baseline SSE",
                    name
                );
            }
        }
    }
}
