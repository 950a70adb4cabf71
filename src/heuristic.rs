//! Best-Fit-Decreasing construction.
//!
//! This is the instant baseline: it is what the caller sees first, what the
//! exact solver uses as its initial incumbent and what the local search must
//! never do worse than.

use super::*;

use std::time::Instant;

/// Where the next cut goes.
#[derive(Copy, Clone, Debug, PartialEq)]
pub(crate) enum Placement {
    /// Into the open bin at this index.
    Existing(usize),
    /// Into a fresh bin of this stock length.
    Fresh(f64),
}

/// Packs the instance with Best-Fit-Decreasing.
///
/// Every open bin that can take the cut and every stock length that can hold
/// it alone are candidates; the one leaving the least space wins, and the
/// first one found wins a tie. Open bins are considered before new stock.
pub fn best_fit_decreasing(instance: &Instance) -> Solution {
    let kerf = instance.kerf();
    let mut bins: Vec<Bin> = Vec::new();

    for &cut in instance.cuts() {
        match best_fit(&bins, instance.catalog(), cut, kerf) {
            Some(Placement::Existing(index)) => bins[index].push(cut, kerf),
            Some(Placement::Fresh(stock_length)) => bins.push(Bin::with_cut(stock_length, cut)),
            // Instance validation guarantees the longest stock fits every cut.
            None => bins.push(Bin::with_cut(instance.catalog().longest(), cut)),
        }
    }

    Solution::from_bins(bins, kerf)
}

/// Validates raw input and packs it with Best-Fit-Decreasing.
///
/// Fails with [`Error::CutExceedsStock`] naming the offending cut when a cut
/// is longer than every stock length.
pub fn pack<C, S>(cuts: C, stock_lengths: S, kerf: f64) -> Result<Solution>
where
    C: IntoIterator<Item = f64>,
    S: IntoIterator<Item = f64>,
{
    let instance = Instance::new(cuts, stock_lengths, kerf)?;
    Ok(best_fit_decreasing(&instance))
}

/// Runs the heuristic and wraps it as a terminal result.
#[tracing::instrument(level = "debug", skip_all, fields(cuts = instance.len()))]
pub fn solve(instance: &Instance) -> SolverResult {
    let start = Instant::now();
    let solution = best_fit_decreasing(instance);
    tracing::debug!(
        bins = solution.bin_count,
        objective = solution.objective(),
        "heuristic packed"
    );

    SolverResult {
        solution,
        algorithm: Algorithm::BestFitDecreasing,
        termination: Termination::Completed,
        optimality: Optimality::NotProven,
        elapsed_ms: plan::elapsed_ms(start),
        stats: SolverStats::Heuristic,
    }
}

pub(crate) fn best_fit(
    bins: &[Bin],
    catalog: &StockCatalog,
    cut: f64,
    kerf: f64,
) -> Option<Placement> {
    let mut best: Option<(Placement, f64)> = None;

    for (index, bin) in bins.iter().enumerate() {
        let remaining = bin.remaining_after(cut, kerf);
        if remaining < -EPSILON {
            continue;
        }
        if best.map_or(true, |(_, least)| remaining < least) {
            best = Some((Placement::Existing(index), remaining));
        }
    }

    for &stock_length in catalog.lengths() {
        let remaining = stock_length - cut;
        if remaining < -EPSILON {
            continue;
        }
        if best.map_or(true, |(_, least)| remaining < least) {
            best = Some((Placement::Fresh(stock_length), remaining));
        }
    }

    best.map(|(placement, _)| placement)
}
