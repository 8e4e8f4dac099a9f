/// Per-center candidate sets: for cluster `C`, the centers that could be
/// closest or second-closest to some point currently assigned to `C`. Stored
/// as one list per center, refilled once per iteration. Starts out as "all
/// other centers" so the first iteration, with its invalid bounds, scans
/// everything.
pub(crate) struct Neighbors {
    lists: Vec<Vec<usize>>,
}

impl Neighbors {
    pub fn new_full(k: usize) -> Self {
        Self {
            lists: (0..k).map(|c| (0..k).filter(|&j| j != c).collect()).collect(),
        }
    }

    #[inline(always)]
    pub fn of(&self, c: usize) -> &[usize] {
        &self.lists[c]
    }

    /// Refill cluster `c`'s list from `order` (the movement-sorted center
    /// indices), keeping only candidates accepted by `keep`. The resulting
    /// list preserves the movement ordering, which both the tightened update
    /// and the assignment scan rely on for their early exit.
    pub fn rebuild(&mut self, c: usize, order: &[usize], mut keep: impl FnMut(usize) -> bool) {
        let list = &mut self.lists[c];
        list.clear();
        for &j in order {
            if j != c && keep(j) {
                list.push(j);
            }
        }
    }

    /// The stricter Elkan-style filter, in plain index order: keep only the
    /// centers that could be closest to *some* point of the cluster.
    pub fn filter(&mut self, c: usize, k: usize, mut keep: impl FnMut(usize) -> bool) {
        let list = &mut self.lists[c];
        list.clear();
        for j in 0..k {
            if j != c && keep(j) {
                list.push(j);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_lists_exclude_self() {
        let nb = Neighbors::new_full(4);
        assert_eq!(nb.of(0), &[1, 2, 3]);
        assert_eq!(nb.of(2), &[0, 1, 3]);
    }

    #[test]
    fn rebuild_keeps_given_order() {
        let mut nb = Neighbors::new_full(4);
        nb.rebuild(1, &[3, 0, 1, 2], |c| c != 2);
        assert_eq!(nb.of(1), &[3, 0]);
    }

    #[test]
    fn filter_uses_index_order() {
        let mut nb = Neighbors::new_full(4);
        nb.filter(2, 4, |c| c != 1);
        assert_eq!(nb.of(2), &[0, 3]);
    }
}
