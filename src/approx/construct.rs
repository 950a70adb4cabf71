use super::*;

use crate::heuristic::Placement;
use rand::Rng;
use smallvec::SmallVec;

/// Relative jitter applied to cut lengths before ordering.
const ORDER_NOISE: f64 = 0.08;

/// Chance of swapping two neighbours after the noisy sort.
const SWAP_PROBABILITY: f64 = 0.1;

/// Largest number of top-ranked placements drawn from.
const MAX_CHOICES: usize = 3;

/// Randomized greedy packing of `cuts` on top of `bins`.
///
/// Cuts are taken roughly longest first. Each one goes to a placement drawn
/// uniformly from the best `k` candidates, ranked by best fit or in discovery
/// order (first fit). Afterwards every bin is shrunk to the smallest stock
/// that holds it.
pub(crate) fn build<R: Rng>(
    cuts: &[f64],
    mut bins: Vec<Bin>,
    instance: &Instance,
    rng: &mut R,
) -> Vec<Bin> {
    let catalog = instance.catalog();
    let kerf = instance.kerf();
    let best_fit = rng.gen_bool(0.5);
    let choices = rng.gen_range(1..=MAX_CHOICES);

    for cut in noisy_order(cuts, rng) {
        let mut candidates = candidates(&bins, catalog, cut, kerf);
        if best_fit {
            candidates.sort_by(|a, b| a.1.total_cmp(&b.1));
        }

        let placement = match candidates.len() {
            0 => Placement::Fresh(catalog.longest()),
            len => candidates[rng.gen_range(0..choices.min(len))].0,
        };

        match placement {
            Placement::Existing(index) => bins[index].push(cut, kerf),
            Placement::Fresh(stock_length) => bins.push(Bin::with_cut(stock_length, cut)),
        }
    }

    for bin in &mut bins {
        right_size(bin, catalog);
    }
    bins
}

fn noisy_order<R: Rng>(cuts: &[f64], rng: &mut R) -> Vec<f64> {
    let mut keyed: Vec<(f64, f64)> = cuts
        .iter()
        .map(|&cut| (cut * (1.0 + ORDER_NOISE * rng.gen_range(-1.0..=1.0)), cut))
        .collect();
    keyed.sort_by(|a, b| b.0.total_cmp(&a.0));

    for index in 1..keyed.len() {
        if rng.gen_bool(SWAP_PROBABILITY) {
            keyed.swap(index - 1, index);
        }
    }

    keyed.into_iter().map(|(_, cut)| cut).collect()
}

/// Every feasible placement with the space it would leave, open bins first.
fn candidates(
    bins: &[Bin],
    catalog: &StockCatalog,
    cut: f64,
    kerf: f64,
) -> SmallVec<[(Placement, f64); 8]> {
    let open = bins.iter().enumerate().filter_map(|(index, bin)| {
        let remaining = bin.remaining_after(cut, kerf);
        (remaining >= -EPSILON).then_some((Placement::Existing(index), remaining))
    });
    let fresh = catalog.lengths().iter().filter_map(|&stock_length| {
        let remaining = stock_length - cut;
        (remaining >= -EPSILON).then_some((Placement::Fresh(stock_length), remaining))
    });

    open.chain(fresh).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_every_cut_into_valid_bins() {
        let instance =
            Instance::new([52.0, 48.0, 48.0, 45.0, 36.0, 24.0, 24.0], [96.0, 120.0], 0.125)
                .unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(5);

        for _ in 0..50 {
            let bins = build(instance.cuts(), Vec::new(), &instance, &mut rng);
            let mut cuts: Vec<f64> = bins.iter().flat_map(|bin| bin.cuts().to_vec()).collect();
            cuts.sort_by(|a, b| b.total_cmp(a));

            assert_eq!(cuts, instance.cuts());
            assert!(bins.iter().all(|bin| bin.is_valid() && !bin.is_empty()));
        }
    }

    #[test]
    fn fills_existing_bins() {
        let instance = Instance::new([10.0, 10.0], [96.0], 0.0).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let kept = vec![Bin::with_cut(96.0, 50.0)];

        let bins = build(&[10.0, 10.0], kept, &instance, &mut rng);
        assert_eq!(bins[0].cuts()[0], 50.0);
        assert_eq!(bins.iter().map(|bin| bin.cuts().len()).sum::<usize>(), 3);
    }

    #[test]
    fn noise_keeps_multiset() {
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let mut order = noisy_order(&[5.0, 4.0, 3.0, 2.0, 1.0], &mut rng);
        order.sort_by(|a, b| b.total_cmp(a));
        assert_eq!(order, vec![5.0, 4.0, 3.0, 2.0, 1.0]);
    }
}
