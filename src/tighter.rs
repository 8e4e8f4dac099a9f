use crate::bounds::CenterDistances;
use crate::geometry::{self, Metrics};
use crate::memory::{AlignedFloatVec, Primitive, SupportedSimdArray, LANES};
use crate::neighbors::Neighbors;
use std::simd::Simd;

/// State for the tightened lower-bound update. Instead of relaxing a
/// cluster's lower bound by the full movement of another center, the update
/// is derived from the geometry of the move: all points of cluster `C` live
/// in a ball of radius `maxUpperBound[C]` around `C`'s (old) center, and the
/// mover's old and new positions span a line. Projecting the ball onto that
/// line turns the d-dimensional problem into a 2D circle/line intersection
/// with a closed-form solution, using only cached norms and inner products.
///
/// `stride` is 1 when one update per cluster is kept (Hamerly-style bounds,
/// heaps) and `k` for the per-pair updates of the Elkan-style variants.
pub(crate) struct TighterUpdate<T: Primitive> {
    pub max_upper: Vec<T>,
    pub lower_update: Vec<T>,
    /// Center indices ordered by decreasing movement; lets consumers stop
    /// scanning as soon as the remaining movements cannot beat the best
    /// update found so far.
    pub by_movement: Vec<usize>,
    old_centers: Vec<T>,
    old_norm2: Vec<T>,
    norm2: Vec<T>,
    old_new_inner: Vec<T>,
    stride: usize,
    k: usize,
    p_dims: usize,
}

impl<T> TighterUpdate<T>
where
    T: Primitive,
    Simd<T, LANES>: SupportedSimdArray<T>,
{
    pub fn new(k: usize, p_dims: usize, stride: usize, centers: &[T], metrics: &mut Metrics) -> Self {
        let mut norm2 = vec![T::zero(); k];
        for c in 0..k {
            norm2[c] = geometry::inner_product(&centers[c * p_dims..(c + 1) * p_dims], &centers[c * p_dims..(c + 1) * p_dims]);
        }
        metrics.count_inner_products(k as u64);
        Self {
            max_upper: vec![T::zero(); k],
            lower_update: vec![T::zero(); k * stride],
            by_movement: (0..k).collect(),
            old_centers: AlignedFloatVec::new(k * p_dims),
            old_norm2: vec![T::zero(); k],
            norm2,
            old_new_inner: vec![T::zero(); k],
            stride,
            k,
            p_dims,
        }
    }

    /// Snapshot the center matrix; must run right before the centers move.
    pub fn snapshot(&mut self, centers: &[T]) {
        self.old_centers.copy_from_slice(centers);
    }

    /// The largest upper bound among the points of each cluster, a
    /// conservative radius for the ball containing the cluster.
    pub fn calculate_max_upper_bound(&mut self, upper: &[T], assignment: &[usize]) {
        self.max_upper.fill(T::zero());
        for (u, &c) in upper.iter().zip(assignment.iter()) {
            if self.max_upper[c] < *u {
                self.max_upper[c] = *u;
            }
        }
    }

    /// Refresh the cached center norms and old×new inner products, and keep
    /// the movement ordering current. Must run after the centers moved.
    pub fn refresh_cached_inner_products(&mut self, centers: &[T], movement: &[T], metrics: &mut Metrics) {
        let p_dims = self.p_dims;
        self.old_norm2.copy_from_slice(&self.norm2);
        for c in 0..self.k {
            let row = &centers[c * p_dims..(c + 1) * p_dims];
            self.norm2[c] = geometry::inner_product(row, row);
            self.old_new_inner[c] = geometry::inner_product(row, &self.old_centers[c * p_dims..(c + 1) * p_dims]);
        }
        metrics.count_inner_products(2 * self.k as u64);
        self.by_movement
            .sort_unstable_by(|&c1, &c2| movement[c2].partial_cmp(&movement[c1]).unwrap());
    }

    /// The provably sufficient decrease of cluster `big_c`'s lower bound
    /// toward center `c`, which moved by `movement[c]`. Always in
    /// `[0, movement[c]]`; the plain triangle-inequality rule would always
    /// return `movement[c]`.
    pub fn calculate_update(
        &self,
        centers: &[T],
        movement: &[T],
        big_c: usize,
        c: usize,
        consider_negative: bool,
        metrics: &mut Metrics,
    ) -> T {
        let p_dims = self.p_dims;
        let one = T::one();
        let two = T::from(2.0).unwrap();

        let c_c_inner = geometry::inner_product(
            &self.old_centers[c * p_dims..(c + 1) * p_dims],
            &self.old_centers[big_c * p_dims..(big_c + 1) * p_dims],
        );
        let c_prime_c_inner = geometry::inner_product(
            &centers[c * p_dims..(c + 1) * p_dims],
            &self.old_centers[big_c * p_dims..(big_c + 1) * p_dims],
        );
        metrics.count_inner_products(2);
        let c_c_prime_inner = self.old_new_inner[c];
        let c_norm2 = self.old_norm2[c];
        let c_prime_norm2 = self.norm2[c];
        let big_c_norm2 = self.old_norm2[big_c];

        let max_upper_c = self.max_upper[big_c];
        let c_movement = movement[c];

        // project C's old center onto the line spanned by c's old and new
        // positions; everything below happens in that 2D plane
        let factor = (c_norm2 - c_c_inner + c_prime_c_inner - c_c_prime_inner) / c_movement / c_movement;

        let mut dist_from_line2 = c_norm2 * (one - factor) * (one - factor)
            + c_c_prime_inner * two * factor * (one - factor)
            - c_c_inner * two * (one - factor)
            - two * factor * c_prime_c_inner
            + big_c_norm2
            + factor * factor * c_prime_norm2;
        // rounding errors make this sometimes negative when the distance is
        // small; the sqrt would turn that into a NaN
        if dist_from_line2 < T::zero() {
            dist_from_line2 = -dist_from_line2;
        }
        let dist_from_line = dist_from_line2.sqrt();

        // the sign does not matter here, + and - give the same bound
        let mut y = one - factor * two;
        let r = two * max_upper_c / c_movement;

        let update = if dist_from_line < max_upper_c {
            // the ball straddles the line: fall back to the hyperplane bound,
            // clamped into [0, movement]
            let u = r - y;
            if u > one {
                one
            } else if u < T::zero() {
                // the sphere can be curved less than the hyperbola, so the
                // negative branch is not valid here
                T::zero()
            } else {
                u
            }
        } else {
            let x = two * dist_from_line / c_movement;
            let mut x2_plus_y2 = x * x + y * y;
            let mut a_norm = (x2_plus_y2 - r * r).max(T::zero()).sqrt();
            let mut u = (x * r - y * a_norm) / x2_plus_y2;

            // a negative update here is the same as decreasing y by 1, i.e.
            // moving the sphere down by half the center movement
            if consider_negative && u < T::zero() {
                y = y - one;
                x2_plus_y2 = x * x + y * y;
                a_norm = (x2_plus_y2 - r * r).max(T::zero()).sqrt();
                u = (x * r - y * a_norm) / x2_plus_y2;
            }
            u
        };

        update * c_movement
    }

    /// One update per cluster (Hamerly-style single lower bound and the heap
    /// variants): the maximum tightened update over all centers that both
    /// moved far enough and are close enough to matter.
    pub fn calculate_lower_bound_update(
        &mut self,
        centers: &[T],
        movement: &[T],
        dists: &CenterDistances<T>,
        metrics: &mut Metrics,
    ) {
        debug_assert_eq!(self.stride, 1);
        for big_c in 0..self.k {
            let mut max_update = T::zero();
            let bound_on_other_distance = self.max_upper[big_c] + dists.s[big_c] + movement[big_c];

            for &c in &self.by_movement {
                if movement[c] <= max_update {
                    break;
                }
                if c != big_c && bound_on_other_distance >= dists.div2(big_c, c) {
                    let update = self.calculate_update(centers, movement, big_c, c, false, metrics);
                    if update > max_update {
                        max_update = update;
                    }
                }
            }

            self.lower_update[big_c] = max_update;
        }
    }

    /// Like [`Self::calculate_lower_bound_update`], but materializes the
    /// neighbor set of every cluster on the way, so the next assignment pass
    /// can restrict its scan to the same candidates.
    pub fn calculate_lower_bound_update_neighbors(
        &mut self,
        centers: &[T],
        movement: &[T],
        dists: &CenterDistances<T>,
        neighbors: &mut Neighbors,
        metrics: &mut Metrics,
    ) {
        debug_assert_eq!(self.stride, 1);
        for big_c in 0..self.k {
            let bound_on_other_distance = self.max_upper[big_c] + dists.s[big_c] + movement[big_c];
            // keep the lists ordered by movement, the scan below and the
            // per-point pruning both rely on the early exit this enables
            neighbors.rebuild(big_c, &self.by_movement, |c| bound_on_other_distance >= dists.div2(big_c, c));

            let mut max_update = T::zero();
            for &c in neighbors.of(big_c) {
                if movement[c] <= max_update {
                    break;
                }
                let update = self.calculate_update(centers, movement, big_c, c, false, metrics);
                if update > max_update {
                    max_update = update;
                }
            }

            self.lower_update[big_c] = max_update;
        }
    }

    /// Per-(cluster, mover) updates for the Elkan-style variants with k lower
    /// bounds per point.
    pub fn calculate_lower_bound_update_pairs(&mut self, centers: &[T], movement: &[T], metrics: &mut Metrics) {
        debug_assert_eq!(self.stride, self.k);
        for big_c in 0..self.k {
            for c in 0..self.k {
                if c != big_c {
                    let update = if movement[c] != T::zero() {
                        self.calculate_update(centers, movement, big_c, c, true, metrics)
                    } else {
                        T::zero()
                    };
                    self.lower_update[big_c * self.k + c] = update;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Metrics;
    use crate::memory::{AlignedFloatVec, LANES};

    /// Cluster center `C` at the origin; center 1 moves from (10, 0) to the
    /// given target in the xy plane.
    fn setup_mover(target: (f64, f64), radius: f64) -> (TighterUpdate<f64>, Vec<f64>, Vec<f64>) {
        let p = LANES;
        let mut old = AlignedFloatVec::new::<f64>(2 * p);
        old[p] = 10.0;
        let mut metrics = Metrics::default();
        let mut tighter = TighterUpdate::new(2, p, 1, &old, &mut metrics);
        tighter.snapshot(&old);

        let mut centers = old.clone();
        centers[p] = target.0;
        centers[p + 1] = target.1;
        let movement = vec![0.0, ((target.0 - 10.0).powi(2) + target.1.powi(2)).sqrt()];
        tighter.max_upper = vec![radius, radius];
        tighter.refresh_cached_inner_products(&centers, &movement, &mut metrics);
        (tighter, centers, movement)
    }

    /// Largest true decrease of dist(p, mover) over points p in the ball
    /// around the origin, sampled on concentric circles.
    fn worst_decrease(target: (f64, f64), radius: f64) -> f64 {
        let mut worst = f64::NEG_INFINITY;
        for a in 0..720 {
            let angle = a as f64 / 720.0 * std::f64::consts::TAU;
            for rad in [radius, radius * 0.5, radius * 0.12, 0.0] {
                let (px, py) = (rad * angle.cos(), rad * angle.sin());
                let d_old = ((px - 10.0).powi(2) + py * py).sqrt();
                let d_new = ((px - target.0).powi(2) + (py - target.1).powi(2)).sqrt();
                worst = worst.max(d_old - d_new);
            }
        }
        worst
    }

    const CASES: [((f64, f64), f64); 8] = [
        ((8.0, 0.0), 1.0),
        ((12.0, 0.0), 2.0),
        ((9.5, 0.0), 0.25),
        ((4.0, 0.0), 3.0),
        ((10.0, 2.0), 0.25),
        ((9.0, 3.0), 1.0),
        ((12.0, 1.0), 0.5),
        ((7.0, -2.0), 0.75),
    ];

    #[test]
    fn clamped_update_is_sound() {
        // how every single-bound consumer uses the value: max(update, 0)
        for (target, radius) in CASES {
            let (tighter, centers, movement) = setup_mover(target, radius);
            let update = tighter
                .calculate_update(&centers, &movement, 0, 1, false, &mut Metrics::default())
                .max(0.0);
            let worst = worst_decrease(target, radius);
            assert!(update >= worst - 1e-9, "update {} misses decrease {} for {:?}", update, worst, target);
            assert!(update <= movement[1] + 1e-12);
        }
    }

    #[test]
    fn negative_branch_is_sound() {
        // the Elkan-style per-pair update keeps negative values (the bound
        // may grow when a center moves away); they must still be covering
        for (target, radius) in CASES {
            let (tighter, centers, movement) = setup_mover(target, radius);
            let update = tighter.calculate_update(&centers, &movement, 0, 1, true, &mut Metrics::default());
            let worst = worst_decrease(target, radius);
            assert!(update >= worst - 1e-9, "update {} misses decrease {} for {:?}", update, worst, target);
        }
    }

    #[test]
    fn mover_towards_cluster_costs_full_movement() {
        // collinear approach: no tightening is possible
        let (tighter, centers, movement) = setup_mover((8.0, 0.0), 1.0);
        let update = tighter.calculate_update(&centers, &movement, 0, 1, false, &mut Metrics::default());
        assert_approx_eq!(update, movement[1], 1e-9);
    }

    #[test]
    fn mover_retreating_costs_nothing() {
        let (tighter, centers, movement) = setup_mover((12.0, 0.0), 2.0);
        let update = tighter.calculate_update(&centers, &movement, 0, 1, false, &mut Metrics::default());
        assert_eq!(update, 0.0);
        let _ = movement;
    }

    #[test]
    fn perpendicular_mover_beats_plain_rule() {
        // small ball, sideways movement: the plain rule would charge the
        // full movement of 2, the tightened update charges nothing
        let (tighter, centers, movement) = setup_mover((10.0, 2.0), 0.25);
        let update = tighter
            .calculate_update(&centers, &movement, 0, 1, false, &mut Metrics::default())
            .max(0.0);
        assert!(update < movement[1] * 0.5, "update {} not tighter than movement {}", update, movement[1]);
    }

    #[test]
    fn max_upper_bound_per_cluster() {
        let p = LANES;
        let centers = AlignedFloatVec::new::<f64>(2 * p);
        let mut tighter = TighterUpdate::new(2, p, 1, &centers, &mut Metrics::default());
        tighter.calculate_max_upper_bound(&[1.0, 5.0, 2.0, 0.5], &[0, 0, 1, 1]);
        assert_eq!(tighter.max_upper, vec![5.0, 2.0]);
    }

    #[test]
    fn movement_ordering_is_decreasing() {
        let p = LANES;
        let centers = AlignedFloatVec::new::<f64>(4 * p);
        let mut tighter = TighterUpdate::new(4, p, 1, &centers, &mut Metrics::default());
        tighter.snapshot(&centers);
        tighter.refresh_cached_inner_products(&centers, &[0.5, 2.0, 0.1, 1.0], &mut Metrics::default());
        assert_eq!(tighter.by_movement, vec![1, 3, 0, 2]);
    }
}
