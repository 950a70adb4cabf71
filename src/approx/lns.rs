use super::*;

use fnv::{FnvHashSet, FnvHasher};
use rand::Rng;
use smallvec::SmallVec;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};

/// Destroy-and-repair moves on the incumbent.
///
/// A handful of random bins are emptied and their cuts re-inserted with the
/// randomized constructor, on top of the bins that were left alone. Destroy
/// patterns already tried against the same incumbent are skipped.
pub(crate) struct LargeNeighbourhood {
    max_destroy: usize,
    capacity: usize,
    seen: FnvHashSet<u64>,
    order: VecDeque<u64>,
}

impl LargeNeighbourhood {
    pub(crate) fn new(max_destroy: usize, capacity: usize) -> Self {
        LargeNeighbourhood {
            max_destroy,
            capacity,
            seen: FnvHashSet::default(),
            order: VecDeque::with_capacity(capacity.min(1024)),
        }
    }

    /// Returns a repaired plan if it beats `incumbent`.
    pub(crate) fn apply<R: Rng>(
        &mut self,
        incumbent: &Solution,
        instance: &Instance,
        rng: &mut R,
    ) -> Option<Solution> {
        let bins = incumbent.bins.len();
        if bins == 0 || self.max_destroy == 0 {
            return None;
        }

        let count = rng.gen_range(1..=self.max_destroy.min(bins));
        let mut destroyed: SmallVec<[usize; 8]> =
            rand::seq::index::sample(rng, bins, count).into_iter().collect();
        destroyed.sort_unstable();

        if !self.remember(signature(incumbent, &destroyed)) {
            return None;
        }

        let mut cuts = Vec::new();
        let mut kept = Vec::with_capacity(bins - count);
        for (index, bin) in incumbent.bins.iter().enumerate() {
            if destroyed.binary_search(&index).is_ok() {
                cuts.extend_from_slice(bin.cuts());
            } else {
                kept.push(bin.clone());
            }
        }

        let repaired = Solution::from_bins(
            construct::build(&cuts, kept, instance, rng),
            instance.kerf(),
        );
        repaired.is_better_than(incumbent).then_some(repaired)
    }

    /// Records `signature`; `false` if it was already seen.
    fn remember(&mut self, signature: u64) -> bool {
        if self.capacity == 0 {
            return true;
        }
        if !self.seen.insert(signature) {
            return false;
        }

        self.order.push_back(signature);
        if self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        true
    }
}

fn signature(incumbent: &Solution, destroyed: &[usize]) -> u64 {
    let mut hasher = FnvHasher::default();
    incumbent.objective().to_bits().hash(&mut hasher);
    incumbent.bin_count.hash(&mut hasher);
    destroyed.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seen_set_is_bounded_fifo() {
        let mut lns = LargeNeighbourhood::new(3, 2);
        assert!(lns.remember(1));
        assert!(lns.remember(2));
        assert!(!lns.remember(1));
        assert!(lns.remember(3));
        // 1 was evicted.
        assert!(lns.remember(1));
        assert!(!lns.remember(3));
        assert_eq!(lns.order.len(), 2);
    }

    #[test]
    fn repair_merges_underfilled_bins() {
        let instance = Instance::new([30.0, 30.0, 30.0], [96.0], 0.0).unwrap();
        let incumbent = Solution::from_bins(
            vec![
                Bin::with_cut(96.0, 30.0),
                Bin::with_cut(96.0, 30.0),
                Bin::with_cut(96.0, 30.0),
            ],
            0.0,
        );
        let mut lns = LargeNeighbourhood::new(3, 64);
        let mut rng = ChaCha8Rng::seed_from_u64(8);

        let mut best: Option<Solution> = None;
        for _ in 0..64 {
            if let Some(repaired) = lns.apply(&incumbent, &instance, &mut rng) {
                assert!(repaired.is_better_than(&incumbent));
                assert_eq!(repaired.cuts().count(), 3);
                best = Some(repaired);
            }
        }
        assert!(best.is_some_and(|solution| solution.bin_count < 3));
    }

    #[test]
    fn never_repeats_a_pattern_on_the_same_incumbent() {
        let instance = Instance::new([50.0, 50.0], [96.0], 0.0).unwrap();
        let incumbent = heuristic::best_fit_decreasing(&instance);
        assert_eq!(incumbent.bin_count, 2);

        // Two bins, one destroy size: only {0} and {1} exist.
        let mut lns = LargeNeighbourhood::new(1, 64);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        for _ in 0..32 {
            lns.apply(&incumbent, &instance, &mut rng);
        }
        assert_eq!(lns.order.len(), 2);
    }
}
