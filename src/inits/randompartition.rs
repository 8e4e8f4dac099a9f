use crate::memory::Primitive;
use crate::{KMeans, KMeansConfig, KMeansState};
use rand::prelude::*;

#[inline(always)]
pub fn calculate<'a, T>(_kmean: &KMeans<T>, state: &mut KMeansState<T>, config: &KMeansConfig<'a, T>)
where
    T: Primitive,
{
    let k = state.k;
    let mut rnd = config.rnd.borrow_mut();
    state.assignments.iter_mut().for_each(|a| {
        *a = rnd.gen_range(0..k);
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partitions_stay_in_range() {
        let sample_cnt = 500;
        let k = 7;
        let samples = vec![0.25f64; sample_cnt * 2];
        let kmean = KMeans::new(samples, sample_cnt, 2);
        let mut state = KMeansState::new(sample_cnt, kmean.p_sample_dims, k);
        let config = KMeansConfig::build().random_generator(StdRng::seed_from_u64(3)).build();
        calculate(&kmean, &mut state, &config);

        assert!(state.assignments.iter().all(|&a| a < k));
        // a uniform random partition of 500 samples over 7 clusters leaves
        // no cluster empty for this seed
        let mut counts = vec![0usize; k];
        state.assignments.iter().for_each(|&a| counts[a] += 1);
        assert!(counts.iter().all(|&c| c > 0));
    }
}
