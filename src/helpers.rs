pub(crate) fn multiple_roundup(val: usize, multiple_of: usize) -> usize {
    if val % multiple_of != 0 {
        val + multiple_of - (val % multiple_of)
    } else {
        val
    }
}

#[cfg(test)]
macro_rules! assert_approx_eq {
	($left: expr, $right: expr, $tol: expr) => ({
		match ($left, $right, $tol) {
			(left_val , right_val, tol_val) => {
				let delta = (left_val - right_val).abs();
				if !(delta < tol_val) {
					panic!(
						"assertion failed: `(left ≈ right)` \
						(left: `{}`, right: `{}`) \
						with ∆={:1.1e} (allowed ∆={:e})",
						left_val , right_val, delta, tol_val
					)
				}
			}
		}
	});
	($left: expr, $right: expr) => (assert_approx_eq!(($left), ($right), 1e-15))
}

#[cfg(test)]
pub(crate) mod testing {
	use crate::{KMeansState, Primitive};

	/// Compare two finished runs for equality up to floating-point noise
	/// (the variants may accumulate the cluster sums in different orders).
	/// The accelerated variants must agree with the baseline not only on the
	/// partition but on center indices, iteration count and per-point costs.
	pub fn assert_same_result<T: Primitive>(baseline: &KMeansState<T>, other: &KMeansState<T>) {
		let cmp_epsilon = T::epsilon().sqrt();
		assert_eq!(baseline.assignments, other.assignments, "cluster assignments diverged");
		assert_eq!(baseline.iterations, other.iterations, "iteration counts diverged");
		assert_eq!(baseline.centroid_frequency, other.centroid_frequency);
		assert_eq!(baseline.centroids.len(), other.centroids.len());
		for (a, b) in baseline.centroids.iter().zip(other.centroids.iter()) {
			assert_approx_eq!(*a, *b, cmp_epsilon);
		}
		let distsum_tolerance = cmp_epsilon * if baseline.distsum > T::one() { baseline.distsum } else { T::one() };
		assert_approx_eq!(baseline.distsum, other.distsum, distsum_tolerance);
	}

	/// Two well separated blobs around (0,0) and (10,10), three points each.
	pub fn two_blobs<T: Primitive>() -> (Vec<T>, usize, usize) {
		let raw = [
			0.0, 0.0, 1.0, 0.0, 0.0, 1.0, //
			10.0, 10.0, 11.0, 10.0, 10.0, 11.0,
		];
		(raw.iter().map(|&v| T::from(v).unwrap()).collect(), 6, 2)
	}

	/// Fixture for the tie-break property: with the seed assignment the
	/// centers land at -0.5 and 0.5, so both points at the origin are exactly
	/// equidistant in the first scan. The lower-indexed center must win:
	/// point 2 stays in cluster 0, point 3 must switch from 1 to 0.
	pub fn tie_setup<T: Primitive>() -> (Vec<T>, usize, usize, Vec<usize>) {
		let samples = [-1.0, 1.0, 0.0, 0.0].iter().map(|&v| T::from(v).unwrap()).collect();
		(samples, 4, 1, vec![0, 1, 0, 1])
	}
	pub const TIE_EXPECTED: [usize; 4] = [0, 1, 0, 0];

	/// Uniform random samples in [0, 1), reproducible via the seed.
	pub fn random_samples<T: Primitive>(len: usize, seed: u64) -> Vec<T> {
		use rand::prelude::*;
		let mut rnd = StdRng::seed_from_u64(seed);
		(0..len).map(|_| rnd.gen_range(T::zero()..T::one())).collect()
	}

	/// Shapes used by the per-variant equivalence tests: (n, d, k).
	pub const EQUIVALENCE_SHAPES: [(usize, usize, usize); 4] = [(300, 3, 8), (500, 7, 16), (200, 10, 5), (120, 2, 12)];

	/// A config with a fixed RNG seed; two configs with the same seed make two
	/// runs start from the identical initial assignment.
	pub fn seeded_config<'a, T: Primitive>(seed: u64, workers: usize) -> crate::KMeansConfig<'a, T> {
		use rand::prelude::*;
		crate::KMeansConfig::build()
			.random_generator(StdRng::seed_from_u64(seed))
			.workers(workers)
			.build()
	}
}
