use fastkmeans::*;

fn main() {
    let (sample_cnt, sample_dims, k, max_iter) = (20000, 32, 16, 500);

    // Generate some random data
    let mut samples = vec![0.0f64; sample_cnt * sample_dims];
    samples.iter_mut().for_each(|v| *v = rand::random());

    // Calculate kmeans, using kmean++ as initialization-method
    let kmean = KMeans::new(samples, sample_cnt, sample_dims);
    let result = kmean.kmeans_hamerly(k, max_iter, UpdatePolicy::Tightened, KMeans::init_kmeanplusplus, &KMeansConfig::default());

    println!("Iterations: {}", result.iterations);
    println!("Error: {}", result.distsum);
    println!("Cluster sizes: {:?}", result.centroid_frequency);
}
