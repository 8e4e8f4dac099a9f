use crate::geometry::{self, Metrics};
use crate::memory::{Primitive, SupportedSimdArray, LANES};
use rayon::prelude::*;
use std::simd::Simd;

/// Per-point distance bounds. `upper[i]` is always ≥ the true distance from
/// point `i` to its assigned center; each of the `num_lower` lower bounds per
/// point is always ≤ the true distance to the center(s) it covers. The
/// initial values (maximal upper, 0 lower) are deliberately invalid so the
/// first iteration does full, unpruned work.
pub(crate) struct Bounds<T: Primitive> {
    pub upper: Vec<T>,
    pub lower: Vec<T>,
    pub num_lower: usize,
}

impl<T: Primitive> Bounds<T> {
    pub fn new(n: usize, num_lower: usize) -> Self {
        // max_value rather than infinity: the relative-bound variants form
        // differences of two invalid bounds, which must stay a number
        Self {
            upper: vec![T::max_value(); n],
            lower: vec![T::zero(); n * num_lower],
            num_lower,
        }
    }
}

/// Inter-center geometry recomputed once per iteration after the centers
/// move: all pairwise center distances divided by two, and `s[c]` = half the
/// distance from `c` to its nearest other center.
pub(crate) struct CenterDistances<T: Primitive> {
    pub s: Vec<T>,
    div2: Vec<T>,
    k: usize,
}

impl<T> CenterDistances<T>
where
    T: Primitive,
    Simd<T, LANES>: SupportedSimdArray<T>,
{
    pub fn new(k: usize) -> Self {
        Self {
            s: vec![T::max_value(); k],
            div2: vec![T::zero(); k * k],
            k,
        }
    }

    #[inline(always)]
    pub fn div2(&self, c1: usize, c2: usize) -> T {
        self.div2[c1 * self.k + c2]
    }

    pub fn update(&mut self, centers: &[T], p_dims: usize, metrics: &mut Metrics) {
        let k = self.k;
        let two = T::from(2.0).unwrap();
        self.s
            .par_iter_mut()
            .zip(self.div2.par_chunks_mut(k))
            .enumerate()
            .for_each(|(c1, (s, row))| {
                *s = T::max_value();
                for c2 in 0..k {
                    if c1 != c2 {
                        // always keep the inter-center distances divided by 2
                        let half = geometry::distance2(
                            &centers[c1 * p_dims..(c1 + 1) * p_dims],
                            &centers[c2 * p_dims..(c2 + 1) * p_dims],
                        )
                        .sqrt()
                            / two;
                        row[c2] = half;
                        if half < *s {
                            *s = half;
                        }
                    }
                }
            });
        metrics.count_distances((k * (k - 1)) as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Metrics;
    use crate::memory::AlignedFloatVec;

    #[test]
    fn fresh_bounds_force_full_first_iteration() {
        let bounds = Bounds::<f64>::new(3, 2);
        assert!(bounds.upper.iter().all(|u| *u == f64::MAX));
        assert!(bounds.lower.iter().all(|l| *l == 0.0));
        assert_eq!(bounds.lower.len(), 6);
    }

    #[test]
    fn center_distances_and_s() {
        // three centers on a line at 0, 2 and 10 (one padded dimension)
        let p_dims = crate::memory::LANES;
        let mut centers = AlignedFloatVec::new::<f64>(3 * p_dims);
        centers[0] = 0.0;
        centers[p_dims] = 2.0;
        centers[2 * p_dims] = 10.0;

        let mut dists = CenterDistances::new(3);
        dists.update(&centers, p_dims, &mut Metrics::default());

        assert_approx_eq!(dists.div2(0, 1), 1.0, 1e-12);
        assert_approx_eq!(dists.div2(1, 0), 1.0, 1e-12);
        assert_approx_eq!(dists.div2(0, 2), 5.0, 1e-12);
        assert_approx_eq!(dists.div2(1, 2), 4.0, 1e-12);
        assert_approx_eq!(dists.s[0], 1.0, 1e-12);
        assert_approx_eq!(dists.s[1], 1.0, 1e-12);
        assert_approx_eq!(dists.s[2], 4.0, 1e-12);
    }
}
