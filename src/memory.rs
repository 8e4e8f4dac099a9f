use num::{Float, NumCast, Zero};
use rand::distributions::uniform::SampleUniform;
use std::{
    fmt::{Debug, Display, LowerExp},
    iter::Sum,
    ops::{Add, AddAssign, Div, Mul, Sub, SubAssign},
    simd::{num::SimdFloat, SimdElement},
};

/// Lane count used for all SIMD operations. Sample rows, center rows and the
/// per-cluster coordinate sums are padded to a multiple of this, so row slices
/// can always be chunked exactly.
pub(crate) const LANES: usize = 8;

pub trait Primitive:
    Add
    + AddAssign
    + Sum
    + Sub
    + SubAssign
    + Zero
    + Float
    + NumCast
    + SampleUniform
    + SimdElement
    + PartialOrd
    + Copy
    + Default
    + Display
    + Debug
    + Sync
    + Send
    + LowerExp
    + 'static
    + for<'a> AddAssign<&'a Self>
    + for<'a> Sub<&'a Self>
{
}
impl Primitive for f32 {}
impl Primitive for f64 {}

/// Bundle of the `Simd` operations the kernels need, so generic code can state
/// a single bound instead of repeating the whole operator list.
pub trait SupportedSimdArray<T: Primitive>:
    Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Sum<Self>
    + SimdFloat<Scalar = T>
    + Copy
{
}
impl<T: Primitive, S> SupportedSimdArray<T> for S where
    S: Add<Output = S>
        + Sub<Output = S>
        + Mul<Output = S>
        + Div<Output = S>
        + Sum<S>
        + SimdFloat<Scalar = T>
        + Copy
{
}

pub(crate) struct AlignedFloatVec;
impl AlignedFloatVec {
    pub fn new<T: Primitive>(size: usize) -> Vec<T> {
        use std::alloc::{alloc_zeroed, Layout};

        assert_eq!(size % LANES, 0);
        let layout = Layout::from_size_align(size * std::mem::size_of::<T>(), LANES * std::mem::size_of::<T>())
            .expect("Illegal aligned allocation");
        unsafe {
            let aligned_ptr = alloc_zeroed(layout) as *mut T;
            let resvec = Vec::from_raw_parts(aligned_ptr, size, size);
            debug_assert_eq!((resvec.get_unchecked(0) as *const T).align_offset(LANES * std::mem::size_of::<T>()), 0);
            resvec
        }
    }
}
