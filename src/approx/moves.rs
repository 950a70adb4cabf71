//! First-improvement local search over a packed plan.
//!
//! A move only touches two or three bins, one of which may be a fresh bin.
//! Every touched bin is re-sized to the smallest stock holding its new
//! contents (growing if needed) and a bin left empty is dropped. The move is
//! applied only if the summed `stock_length + kerf` of the touched bins
//! strictly drops.

use super::*;

use rand::Rng;

/// Polls the deadline every this many attempted moves.
const LIMIT_CHECK_INTERVAL: u32 = 16;

/// Relative frequency of the local moves.
#[cfg_attr(feature = "serialize", derive(Deserialize, Serialize))]
#[cfg_attr(feature = "serialize", serde(rename_all = "camelCase"))]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MoveWeights {
    /// Move one cut to another bin or a fresh one.
    pub relocate: u32,
    /// Exchange two cuts between bins.
    pub swap: u32,
    /// Move a cut into a bin, pushing one of its cuts into a third bin or a fresh one.
    pub ejection: u32,
}

impl Default for MoveWeights {
    fn default() -> Self {
        MoveWeights {
            relocate: 5,
            swap: 3,
            ejection: 2,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Move {
    Relocate,
    Swap,
    Ejection,
}

impl MoveWeights {
    fn total(&self) -> u32 {
        self.relocate + self.swap + self.ejection
    }

    fn pick<R: Rng>(&self, rng: &mut R) -> Move {
        let roll = rng.gen_range(0..self.total());
        if roll < self.relocate {
            Move::Relocate
        } else if roll < self.relocate + self.swap {
            Move::Swap
        } else {
            Move::Ejection
        }
    }
}

/// Applies random improving moves until too many fail in a row.
pub(crate) fn local_search<R: Rng>(
    bins: &mut Vec<Bin>,
    instance: &Instance,
    config: &ApproxConfig,
    limits: &Limits<'_>,
    rng: &mut R,
) {
    let weights = config.move_weights;
    if weights.total() == 0 {
        return;
    }

    let neighbourhood = Neighbourhood {
        catalog: instance.catalog(),
        kerf: instance.kerf(),
    };
    let mut failures = 0;
    let mut attempts = 0u32;

    while failures < config.local_search_failures && !bins.is_empty() {
        if attempts % LIMIT_CHECK_INTERVAL == 0 && limits.reached() {
            break;
        }
        attempts = attempts.wrapping_add(1);

        let accepted = match weights.pick(rng) {
            Move::Relocate => neighbourhood.relocate(bins, rng),
            Move::Swap => neighbourhood.swap(bins, rng),
            Move::Ejection => neighbourhood.eject(bins, rng),
        };

        if accepted {
            failures = 0;
        } else {
            failures += 1;
        }
    }
}

struct Neighbourhood<'a> {
    catalog: &'a StockCatalog,
    kerf: f64,
}

impl Neighbourhood<'_> {
    /// Smallest stock holding `used`, if any.
    fn stock_for(&self, used: f64) -> Option<f64> {
        self.catalog.smallest_fitting(used)
    }

    /// Objective contribution of a bin cut from `stock_length`.
    fn charge(&self, stock_length: f64) -> f64 {
        stock_length + self.kerf
    }

    /// Contribution of `bin` once cut `index` is gone. Zero if it empties.
    fn charge_without(&self, bin: &Bin, index: usize) -> f64 {
        if bin.cuts().len() <= 1 {
            return 0.0;
        }
        // Removing a cut never grows a bin.
        let stock_length = self
            .stock_for(bin.used_without(index, self.kerf))
            .unwrap_or(bin.stock_length());
        self.charge(stock_length)
    }

    /// Moves one cut to another bin, or to a fresh bin in the smallest stock
    /// that holds it.
    fn relocate<R: Rng>(&self, bins: &mut Vec<Bin>, rng: &mut R) -> bool {
        let from = rng.gen_range(0..bins.len());
        let index = rng.gen_range(0..bins[from].cuts().len());
        let cut = bins[from].cuts()[index];
        let target = other_or_fresh(bins.len(), &[from], rng);

        let (before, target_stock) = match target {
            Some(to) => {
                let Some(stock) =
                    self.stock_for(bins[to].used() + cut + bins[to].extra_kerf(self.kerf))
                else {
                    return false;
                };
                (self.charge(bins[to].stock_length()), stock)
            }
            None => match self.stock_for(cut) {
                Some(stock) => (0.0, stock),
                None => return false,
            },
        };

        let before = before + self.charge(bins[from].stock_length());
        let after = self.charge_without(&bins[from], index) + self.charge(target_stock);
        if after >= before - EPSILON {
            return false;
        }

        bins[from].remove(index, self.kerf);
        match target {
            Some(to) => grow_and_push(&mut bins[to], cut, target_stock, self.kerf),
            None => bins.push(Bin::with_cut(target_stock, cut)),
        }
        self.settle(bins, from);
        true
    }

    fn swap<R: Rng>(&self, bins: &mut [Bin], rng: &mut R) -> bool {
        if bins.len() < 2 {
            return false;
        }

        let (a, b) = distinct_pair(bins.len(), rng);
        let i = rng.gen_range(0..bins[a].cuts().len());
        let j = rng.gen_range(0..bins[b].cuts().len());
        let (cut_a, cut_b) = (bins[a].cuts()[i], bins[b].cuts()[j]);
        if (cut_a - cut_b).abs() <= EPSILON {
            return false;
        }

        let (Some(stock_a), Some(stock_b)) = (
            self.stock_for(bins[a].used() - cut_a + cut_b),
            self.stock_for(bins[b].used() - cut_b + cut_a),
        ) else {
            return false;
        };

        // Cut counts are unchanged, so kerf charges cancel out.
        let before = bins[a].stock_length() + bins[b].stock_length();
        if stock_a + stock_b >= before - EPSILON {
            return false;
        }

        bins[a].replace(i, cut_b, self.kerf);
        bins[a].restock(stock_a);
        bins[b].replace(j, cut_a, self.kerf);
        bins[b].restock(stock_b);
        true
    }

    /// Moves a cut from `a` into `b`, ejecting one of `b`'s cuts into a third
    /// bin or a fresh one.
    fn eject<R: Rng>(&self, bins: &mut Vec<Bin>, rng: &mut R) -> bool {
        if bins.len() < 2 {
            return false;
        }

        let (a, b) = distinct_pair(bins.len(), rng);
        let target = other_or_fresh(bins.len(), &[a, b], rng);

        let i = rng.gen_range(0..bins[a].cuts().len());
        let j = rng.gen_range(0..bins[b].cuts().len());
        let (moved, ejected) = (bins[a].cuts()[i], bins[b].cuts()[j]);

        let Some(stock_b) = self.stock_for(bins[b].used() - ejected + moved) else {
            return false;
        };
        let (before, stock_c) = match target {
            Some(c) => {
                let Some(stock) =
                    self.stock_for(bins[c].used() + ejected + bins[c].extra_kerf(self.kerf))
                else {
                    return false;
                };
                (self.charge(bins[c].stock_length()), stock)
            }
            None => match self.stock_for(ejected) {
                Some(stock) => (0.0, stock),
                None => return false,
            },
        };

        let before =
            before + self.charge(bins[a].stock_length()) + self.charge(bins[b].stock_length());
        let after =
            self.charge_without(&bins[a], i) + self.charge(stock_b) + self.charge(stock_c);
        if after >= before - EPSILON {
            return false;
        }

        match target {
            Some(c) => grow_and_push(&mut bins[c], ejected, stock_c, self.kerf),
            None => bins.push(Bin::with_cut(stock_c, ejected)),
        }
        bins[b].replace(j, moved, self.kerf);
        bins[b].restock(stock_b);
        bins[a].remove(i, self.kerf);
        self.settle(bins, a);
        true
    }

    /// Drops bin `index` if empty, otherwise shrinks it.
    fn settle(&self, bins: &mut Vec<Bin>, index: usize) {
        if bins[index].is_empty() {
            bins.swap_remove(index);
        } else {
            right_size(&mut bins[index], self.catalog);
        }
    }
}

fn grow_and_push(bin: &mut Bin, cut: f64, stock_length: f64, kerf: f64) {
    if stock_length > bin.stock_length() {
        bin.restock(stock_length);
        bin.push(cut, kerf);
    } else {
        bin.push(cut, kerf);
        bin.restock(stock_length);
    }
}

/// A bin index below `len` not in `taken`, or `None` for a fresh bin. Every
/// choice is equally likely.
fn other_or_fresh<R: Rng>(len: usize, taken: &[usize], rng: &mut R) -> Option<usize> {
    let free = len.saturating_sub(taken.len());
    let pick = rng.gen_range(0..=free);
    (0..len).filter(|index| !taken.contains(index)).nth(pick)
}

/// Two different indices below `len`, which must be at least 2.
fn distinct_pair<R: Rng>(len: usize, rng: &mut R) -> (usize, usize) {
    let first = rng.gen_range(0..len);
    let second = rng.gen_range(0..len - 1);
    (first, if second >= first { second + 1 } else { second })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn neighbourhood(catalog: &StockCatalog, kerf: f64) -> Neighbourhood<'_> {
        Neighbourhood { catalog, kerf }
    }

    #[test]
    fn relocate_merges_into_larger_stock() {
        let catalog = StockCatalog::new([5.0, 8.0]).unwrap();
        let moves = neighbourhood(&catalog, 0.0);
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let mut bins = vec![Bin::with_cut(5.0, 4.0), Bin::with_cut(5.0, 4.0)];

        // A fresh-bin target is never better here, so retry until the merge is drawn.
        assert!((0..50).any(|_| moves.relocate(&mut bins, &mut rng)));
        assert_eq!(bins.len(), 1);
        assert_eq!(bins[0].stock_length(), 8.0);
        assert_eq!(bins[0].cuts(), &[4.0, 4.0]);
    }

    #[test]
    fn relocate_rejects_non_improving_move() {
        let catalog = StockCatalog::new([96.0]).unwrap();
        let moves = neighbourhood(&catalog, 0.125);
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let mut bins = vec![
            Bin::from_parts(96.0, vec![60.0, 30.0], 0.125),
            Bin::from_parts(96.0, vec![60.0, 30.0], 0.125),
        ];
        let before = bins.clone();

        for _ in 0..20 {
            assert!(!moves.relocate(&mut bins, &mut rng));
        }
        assert_eq!(bins, before);
    }

    #[test]
    fn relocate_splits_oversized_bin_into_fresh_stock() {
        let catalog = StockCatalog::new([50.0, 60.0, 130.0]).unwrap();
        let moves = neighbourhood(&catalog, 0.0);
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        // Moving 60 or 50 out of the 130 leaves 60 + 50 + 50 = 160.
        let mut bins = vec![
            Bin::from_parts(130.0, vec![60.0, 50.0], 0.0),
            Bin::with_cut(50.0, 45.0),
        ];

        assert!((0..200).any(|_| moves.relocate(&mut bins, &mut rng)));
        assert_eq!(bins.len(), 3);
        assert_eq!(bins.iter().map(Bin::stock_length).sum::<f64>(), 160.0);
        assert!(bins.iter().all(Bin::is_valid));
        assert_eq!(bins.iter().map(|bin| bin.cuts().len()).sum::<usize>(), 3);
    }

    #[test]
    fn local_search_splits_a_single_bin() {
        let instance = Instance::new([50.0, 45.0], [50.0, 130.0], 0.0).unwrap();
        let stop = CancellationToken::new();
        let limits = Limits {
            start: std::time::Instant::now(),
            budget: Duration::from_secs(60),
            stop: &stop,
        };
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let mut bins = vec![Bin::from_parts(130.0, vec![50.0, 45.0], 0.0)];

        local_search(&mut bins, &instance, &ApproxConfig::new(), &limits, &mut rng);

        assert_eq!(bins.len(), 2);
        assert!(bins.iter().all(|bin| bin.stock_length() == 50.0));
    }

    #[test]
    fn swap_lets_a_bin_shrink() {
        let catalog = StockCatalog::new([50.0, 100.0]).unwrap();
        let moves = neighbourhood(&catalog, 0.0);
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        // Swapping 60 and 40 puts 40+5 in a 50 and 60+30 in the 100.
        let mut bins = vec![
            Bin::from_parts(100.0, vec![60.0, 5.0], 0.0),
            Bin::from_parts(100.0, vec![40.0, 30.0], 0.0),
        ];

        let mut accepted = false;
        for _ in 0..100 {
            accepted |= moves.swap(&mut bins, &mut rng);
        }
        assert!(accepted);
        assert_eq!(bins.iter().map(Bin::stock_length).sum::<f64>(), 150.0);
        assert!(bins.iter().all(Bin::is_valid));
    }

    #[test]
    fn ejection_empties_a_bin() {
        let catalog = StockCatalog::new([10.0]).unwrap();
        let moves = neighbourhood(&catalog, 0.0);
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        // 3 fits where 5 was and 5 fits next to 4.
        let template = vec![
            Bin::with_cut(10.0, 3.0),
            Bin::from_parts(10.0, vec![5.0, 4.0], 0.0),
            Bin::from_parts(10.0, vec![4.0, 1.0], 0.0),
        ];

        let mut emptied = false;
        for _ in 0..500 {
            let mut bins = template.clone();
            if moves.eject(&mut bins, &mut rng) {
                assert!(bins.len() < template.len());
                assert!(bins.iter().all(Bin::is_valid));
                assert_eq!(bins.iter().map(|bin| bin.cuts().len()).sum::<usize>(), 5);
                emptied = true;
            }
        }
        assert!(emptied);
    }

    #[test]
    fn ejection_can_open_a_fresh_bin() {
        let catalog = StockCatalog::new([10.0, 50.0, 100.0]).unwrap();
        let moves = neighbourhood(&catalog, 0.0);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        // 12 takes the place of 40, shrinking that bin to a 50, and 40 gets a fresh 50.
        let template = vec![
            Bin::with_cut(50.0, 12.0),
            Bin::from_parts(100.0, vec![40.0, 20.0], 0.0),
        ];

        let mut accepted = false;
        for _ in 0..500 {
            let mut bins = template.clone();
            if moves.eject(&mut bins, &mut rng) {
                assert_eq!(bins.len(), 2);
                assert_eq!(bins.iter().map(Bin::stock_length).sum::<f64>(), 100.0);
                assert!(bins.iter().all(Bin::is_valid));
                assert_eq!(bins.iter().map(|bin| bin.cuts().len()).sum::<usize>(), 3);
                accepted = true;
            }
        }
        assert!(accepted);
    }

    #[test]
    fn other_or_fresh_skips_taken_bins() {
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let mut fresh = false;
        for _ in 0..200 {
            match other_or_fresh(3, &[0, 2], &mut rng) {
                Some(index) => assert_eq!(index, 1),
                None => fresh = true,
            }
        }
        assert!(fresh);
        assert!((0..20).all(|_| other_or_fresh(1, &[0], &mut rng).is_none()));
    }

    #[test]
    fn local_search_keeps_plan_valid() {
        let instance = Instance::new(
            [70.0, 62.0, 58.0, 50.0, 45.0, 40.0, 33.0, 30.0, 24.0, 18.0, 12.0],
            [96.0, 120.0, 144.0],
            0.125,
        )
        .unwrap();
        let stop = CancellationToken::new();
        let limits = Limits {
            start: std::time::Instant::now(),
            budget: Duration::from_secs(60),
            stop: &stop,
        };
        let mut rng = ChaCha8Rng::seed_from_u64(17);
        let mut bins: Vec<Bin> = instance
            .cuts()
            .iter()
            .map(|&cut| Bin::with_cut(144.0, cut))
            .collect();
        let before = Solution::from_bins(bins.clone(), 0.125).objective();

        local_search(&mut bins, &instance, &ApproxConfig::new(), &limits, &mut rng);
        let after = Solution::from_bins(bins.clone(), 0.125);

        assert!(after.objective() < before);
        assert!(after.is_valid());
        assert_eq!(after.cuts().count(), instance.len());
    }

    #[test]
    fn weights_pick_only_enabled_moves() {
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let weights = MoveWeights {
            relocate: 0,
            swap: 1,
            ejection: 0,
        };
        assert!((0..50).all(|_| weights.pick(&mut rng) == Move::Swap));
    }
}
