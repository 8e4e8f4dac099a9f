use crate::memory::{Primitive, SupportedSimdArray, LANES};
use crate::{KMeans, KMeansConfig, KMeansState};
use rand::distributions::WeightedIndex;
use rand::prelude::*;
use std::ops::DerefMut;
use std::simd::Simd;

#[inline(always)]
pub fn calculate<'a, T>(kmean: &KMeans<T>, state: &mut KMeansState<T>, config: &KMeansConfig<'a, T>)
where
    T: Primitive,
    Simd<T, LANES>: SupportedSimdArray<T>,
{
    {
        // Randomly select first centroid
        let first_idx = config.rnd.borrow_mut().gen_range(0..kmean.sample_cnt);
        state.set_centroid_from_iter(0, kmean.row(first_idx).iter().cloned());
    }
    for k in 1..state.k {
        // For each following centroid...
        // Calculate distances & update cluster-assignments
        kmean.update_cluster_assignments(state, Some(k));

        // Calculate sum of distances per centroid
        let distsum: T = state.centroid_distances.iter().cloned().sum();

        // Calculate probabilities for each of the samples, to be the new centroid
        let centroid_probabilities: Vec<T> = state.centroid_distances.iter().cloned().map(|d| d / distsum).collect();
        // Use rand's WeightedIndex to randomly draw a centroid, while respecting their probabilities
        let centroid_index = WeightedIndex::new(centroid_probabilities).unwrap();
        let sampled_centroid_id = centroid_index.sample(config.rnd.borrow_mut().deref_mut());
        state.set_centroid_from_iter(k, kmean.row(sampled_centroid_id).iter().cloned());
    }

    // the iteration consumes an assignment, not the seeds: map every sample
    // to its nearest seed
    kmean.update_cluster_assignments(state, None);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeds_produce_a_full_assignment() {
        let sample_cnt = 200;
        let sample_dims = 3;
        let k = 6;
        let mut rnd = StdRng::seed_from_u64(17);
        let mut samples = vec![0.0f64; sample_cnt * sample_dims];
        samples.iter_mut().for_each(|v| *v = rnd.gen_range(0.0..1.0));

        let kmean = KMeans::new(samples, sample_cnt, sample_dims);
        let mut state = KMeansState::new(sample_cnt, kmean.p_sample_dims, k);
        let config = KMeansConfig::build().random_generator(StdRng::seed_from_u64(4)).build();
        calculate(&kmean, &mut state, &config);

        assert!(state.assignments.iter().all(|&a| a < k));
        // with well spread random data every seed keeps at least itself
        let mut seen = vec![false; k];
        state.assignments.iter().for_each(|&a| seen[a] = true);
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn same_seed_same_assignment() {
        let (sample_cnt, sample_dims, k) = (120, 2, 4);
        let mut rnd = StdRng::seed_from_u64(5);
        let mut samples = vec![0.0f64; sample_cnt * sample_dims];
        samples.iter_mut().for_each(|v| *v = rnd.gen_range(0.0..1.0));
        let kmean = KMeans::new(samples, sample_cnt, sample_dims);

        let mut first = KMeansState::new(sample_cnt, kmean.p_sample_dims, k);
        let config = KMeansConfig::build().random_generator(StdRng::seed_from_u64(8)).build();
        calculate(&kmean, &mut first, &config);

        let mut second = KMeansState::new(sample_cnt, kmean.p_sample_dims, k);
        let config = KMeansConfig::build().random_generator(StdRng::seed_from_u64(8)).build();
        calculate(&kmean, &mut second, &config);

        assert_eq!(first.assignments, second.assignments);
    }
}
