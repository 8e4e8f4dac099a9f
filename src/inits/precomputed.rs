use crate::memory::Primitive;
use crate::{KMeans, KMeansConfig, KMeansState};

#[inline(always)]
pub fn calculate<'a, T>(kmean: &KMeans<T>, state: &mut KMeansState<T>, _config: &KMeansConfig<'a, T>, assignments: Vec<usize>)
where
    T: Primitive,
{
    assert_eq!(
        assignments.len(),
        kmean.sample_cnt,
        "precomputed initialization needs one cluster index per sample"
    );
    assert!(
        assignments.iter().all(|&a| a < state.k),
        "precomputed initialization contains a cluster index >= k"
    );
    state.assignments.copy_from_slice(&assignments);
}

#[cfg(test)]
mod tests {
    use crate::{KMeans, KMeansConfig};

    #[test]
    fn train_with_precomputed_assignment() {
        let samples = vec![0.0, 1.0, 10.0, 11.0, 20.0, 21.0];
        let (sample_cnt, sample_dims) = (samples.len(), 1);

        let kmean: KMeans<f64> = KMeans::new(samples, sample_cnt, sample_dims);
        let result = kmean.kmeans_lloyd(
            2,
            200,
            KMeans::init_precomputed(vec![0, 0, 0, 1, 1, 1]),
            &KMeansConfig::default(),
        );

        assert_eq!(result.assignments, vec![0, 0, 0, 1, 1, 1]);
        assert_approx_eq!(result.centroids[0], 11.0 / 3.0, 1e-12);
        assert_approx_eq!(result.centroids[1], 52.0 / 3.0, 1e-12);
    }

    #[test]
    #[should_panic(expected = "one cluster index per sample")]
    fn rejects_wrong_length() {
        let samples = vec![0.0f64, 1.0, 2.0];
        let kmean = KMeans::new(samples, 3, 1);
        kmean.kmeans_lloyd(2, 10, KMeans::init_precomputed(vec![0, 1]), &KMeansConfig::default());
    }

    #[test]
    #[should_panic(expected = "cluster index >= k")]
    fn rejects_out_of_range_cluster() {
        let samples = vec![0.0f64, 1.0, 2.0];
        let kmean = KMeans::new(samples, 3, 1);
        kmean.kmeans_lloyd(2, 10, KMeans::init_precomputed(vec![0, 1, 2]), &KMeansConfig::default());
    }
}
