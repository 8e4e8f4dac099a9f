use crate::memory::{Primitive, SupportedSimdArray, LANES};
use crate::{KMeans, KMeansConfig, KMeansState};
use rand::prelude::*;
use std::ops::DerefMut;
use std::simd::Simd;

#[inline(always)]
pub fn calculate<'a, T>(kmean: &KMeans<T>, state: &mut KMeansState<T>, config: &KMeansConfig<'a, T>)
where
    T: Primitive,
    Simd<T, LANES>: SupportedSimdArray<T>,
{
    kmean
        .p_samples
        .chunks_exact(kmean.p_sample_dims)
        .choose_multiple(config.rnd.borrow_mut().deref_mut(), state.k)
        .iter()
        .cloned()
        .enumerate()
        .for_each(|(ci, c)| {
            // Copy randomly chosen centroids into state.centroids
            state.set_centroid_from_iter(ci, c.iter().cloned());
        });

    kmean.update_cluster_assignments(state, None);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_sample_gets_its_nearest_seed() {
        let samples = vec![0.0f64, 0.1, 10.0, 10.1, 20.0, 19.9];
        let kmean = KMeans::new(samples, 3, 2);
        let mut state = KMeansState::new(3, kmean.p_sample_dims, 3);
        let config = KMeansConfig::build().random_generator(StdRng::seed_from_u64(2)).build();
        calculate(&kmean, &mut state, &config);

        // three maximally distinct samples, three seeds: a permutation
        let mut sorted = state.assignments.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, vec![0, 1, 2]);
    }
}
