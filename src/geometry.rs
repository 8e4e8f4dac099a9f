use crate::memory::{Primitive, SupportedSimdArray, LANES};
use std::simd::num::SimdFloat;
use std::simd::Simd;

/// Squared Euclidean distance between two padded rows.
#[inline(always)]
pub(crate) fn distance2<T>(a: &[T], b: &[T]) -> T
where
    T: Primitive,
    Simd<T, LANES>: SupportedSimdArray<T>,
{
    a.chunks_exact(LANES)
        .map(|i| Simd::from_slice(i))
        .zip(b.chunks_exact(LANES).map(|i| Simd::from_slice(i)))
        .map(|(ap, bp)| ap - bp) // <a> - <b>
        .map(|v| v * v) // <components> ^2
        .sum::<Simd<T, LANES>>() // sum(<components>^2)
        .reduce_sum()
}

#[inline(always)]
pub(crate) fn inner_product<T>(a: &[T], b: &[T]) -> T
where
    T: Primitive,
    Simd<T, LANES>: SupportedSimdArray<T>,
{
    a.chunks_exact(LANES)
        .map(|i| Simd::from_slice(i))
        .zip(b.chunks_exact(LANES).map(|i| Simd::from_slice(i)))
        .map(|(ap, bp)| ap * bp)
        .sum::<Simd<T, LANES>>()
        .reduce_sum()
}

/// `dst += src`, element-wise. Both slices must be padded rows.
#[inline(always)]
pub(crate) fn add_assign<T>(dst: &mut [T], src: &[T])
where
    T: Primitive,
    Simd<T, LANES>: SupportedSimdArray<T>,
{
    dst.chunks_exact_mut(LANES)
        .zip(src.chunks_exact(LANES).map(|i| Simd::from_slice(i)))
        .for_each(|(d, s)| (Simd::from_slice(d) + s).copy_to_slice(d));
}

/// `dst -= src`, element-wise. Both slices must be padded rows.
#[inline(always)]
pub(crate) fn sub_assign<T>(dst: &mut [T], src: &[T])
where
    T: Primitive,
    Simd<T, LANES>: SupportedSimdArray<T>,
{
    dst.chunks_exact_mut(LANES)
        .zip(src.chunks_exact(LANES).map(|i| Simd::from_slice(i)))
        .for_each(|(d, s)| (Simd::from_slice(d) - s).copy_to_slice(d));
}

/// Operation counters for a single run. The fields only exist when the crate
/// is built with the `diagnostics` feature; without it every count method
/// compiles to nothing. Counts are collected per worker and merged when the
/// run finishes, so they are exact for any worker count.
#[derive(Clone, Copy, Debug, Default)]
pub struct Metrics {
    /// Exact point-center and center-center distance evaluations.
    #[cfg(feature = "diagnostics")]
    pub distances: u64,
    /// Inner products computed for the cached-norm bound tightening
    /// (does not include the ones hidden inside distance evaluations).
    #[cfg(feature = "diagnostics")]
    pub inner_products: u64,
    /// How many times a point changed its assignment.
    #[cfg(feature = "diagnostics")]
    pub assignment_changes: u64,
    /// Cumulative magnitude of all lower-bound decreases.
    #[cfg(feature = "diagnostics")]
    pub bound_updates: f64,
}

impl Metrics {
    #[inline(always)]
    pub(crate) fn count_distances(&mut self, _n: u64) {
        #[cfg(feature = "diagnostics")]
        {
            self.distances += _n;
        }
    }

    #[inline(always)]
    pub(crate) fn count_inner_products(&mut self, _n: u64) {
        #[cfg(feature = "diagnostics")]
        {
            self.inner_products += _n;
        }
    }

    #[inline(always)]
    pub(crate) fn count_assignment_change(&mut self) {
        #[cfg(feature = "diagnostics")]
        {
            self.assignment_changes += 1;
        }
    }

    #[inline(always)]
    pub(crate) fn count_bound_updates<T: Primitive>(&mut self, _amount: T) {
        #[cfg(feature = "diagnostics")]
        {
            self.bound_updates += num::ToPrimitive::to_f64(&_amount).unwrap();
        }
    }

    pub(crate) fn merge(&mut self, _other: &Metrics) {
        #[cfg(feature = "diagnostics")]
        {
            self.distances += _other.distances;
            self.inner_products += _other.inner_products;
            self.assignment_changes += _other.assignment_changes;
            self.bound_updates += _other.bound_updates;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{AlignedFloatVec, LANES};

    #[test]
    fn distance2_matches_scalar() {
        let mut a = AlignedFloatVec::new::<f64>(2 * LANES);
        let mut b = AlignedFloatVec::new::<f64>(2 * LANES);
        for i in 0..2 * LANES {
            a[i] = i as f64 * 0.5;
            b[i] = 16.0 - i as f64;
        }
        let should: f64 = a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum();
        assert_approx_eq!(distance2(&a, &b), should, 1e-12);
    }

    #[test]
    fn inner_product_matches_scalar() {
        let mut a = AlignedFloatVec::new::<f64>(LANES);
        let mut b = AlignedFloatVec::new::<f64>(LANES);
        for i in 0..LANES {
            a[i] = 1.0 + i as f64;
            b[i] = 2.0 * i as f64 - 3.0;
        }
        let should: f64 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        assert_approx_eq!(inner_product(&a, &b), should, 1e-12);
    }

    #[test]
    fn add_sub_assign_roundtrip() {
        let mut dst = AlignedFloatVec::new::<f64>(LANES);
        let mut src = AlignedFloatVec::new::<f64>(LANES);
        for i in 0..LANES {
            dst[i] = i as f64;
            src[i] = 10.0 + i as f64;
        }
        let orig = dst.clone();
        add_assign(&mut dst, &src);
        for i in 0..LANES {
            assert_approx_eq!(dst[i], orig[i] + src[i], 1e-12);
        }
        sub_assign(&mut dst, &src);
        for i in 0..LANES {
            assert_approx_eq!(dst[i], orig[i], 1e-12);
        }
    }
}
