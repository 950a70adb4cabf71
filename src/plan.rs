use super::*;

use std::cmp::Ordering;

/// One piece of stock together with the cuts assigned to it.
#[cfg_attr(feature = "serialize", derive(Deserialize, Serialize))]
#[cfg_attr(feature = "serialize", serde(rename_all = "camelCase"))]
#[derive(Clone, Debug, PartialEq)]
pub struct Bin {
    stock_length: f64,
    cuts: Vec<f64>,
    used: f64,
    remaining: f64,
}

impl Bin {
    /// Creates an empty `Bin` of the given stock length.
    pub fn new(stock_length: f64) -> Self {
        Bin {
            stock_length,
            cuts: Vec::new(),
            used: 0.0,
            remaining: stock_length,
        }
    }

    /// Creates a `Bin` holding a single cut.
    pub fn with_cut(stock_length: f64, cut: f64) -> Self {
        Bin {
            stock_length,
            cuts: vec![cut],
            used: cut,
            remaining: stock_length - cut,
        }
    }

    pub(crate) fn from_parts(stock_length: f64, cuts: Vec<f64>, kerf: f64) -> Self {
        let mut bin = Bin {
            stock_length,
            cuts,
            used: 0.0,
            remaining: 0.0,
        };
        bin.recompute(kerf);
        bin
    }

    /// Length of the stock piece this bin was cut from.
    pub fn stock_length(&self) -> f64 {
        self.stock_length
    }

    /// Cuts in the order they are taken from the stock.
    pub fn cuts(&self) -> &[f64] {
        &self.cuts
    }

    /// Sum of the cuts plus kerf lost between them.
    pub fn used(&self) -> f64 {
        self.used
    }

    /// Stock left over. Never below `-EPSILON` for a valid bin.
    pub fn remaining(&self) -> f64 {
        self.remaining
    }

    /// Material lost to the blade inside this bin.
    pub fn kerf_loss(&self, kerf: f64) -> f64 {
        if self.cuts.len() <= 1 {
            0.0
        } else {
            (self.cuts.len() - 1) as f64 * kerf
        }
    }

    /// Kerf charged when one more cut is added to this bin.
    pub fn extra_kerf(&self, kerf: f64) -> f64 {
        if self.cuts.is_empty() {
            0.0
        } else {
            kerf
        }
    }

    /// Remaining space after adding `cut`. Negative means it does not fit.
    pub fn remaining_after(&self, cut: f64, kerf: f64) -> f64 {
        self.remaining - cut - self.extra_kerf(kerf)
    }

    /// Whether `cut` can be added without breaking the capacity invariant.
    pub fn fits(&self, cut: f64, kerf: f64) -> bool {
        self.remaining_after(cut, kerf) >= -EPSILON
    }

    /// Whether the bin holds no cuts.
    pub fn is_empty(&self) -> bool {
        self.cuts.is_empty()
    }

    /// Whether `remaining >= -EPSILON`.
    pub fn is_valid(&self) -> bool {
        self.remaining >= -EPSILON
    }

    /// Appends `cut`. Callers check `fits` first.
    pub(crate) fn push(&mut self, cut: f64, kerf: f64) {
        debug_assert!(self.fits(cut, kerf));
        self.used += cut + self.extra_kerf(kerf);
        self.remaining = self.stock_length - self.used;
        self.cuts.push(cut);
    }

    /// Removes and returns the cut at `index`.
    pub(crate) fn remove(&mut self, index: usize, kerf: f64) -> f64 {
        let cut = self.cuts.swap_remove(index);
        self.recompute(kerf);
        cut
    }

    /// Replaces the cut at `index` with `cut` and returns the old one.
    pub(crate) fn replace(&mut self, index: usize, cut: f64, kerf: f64) -> f64 {
        let old = std::mem::replace(&mut self.cuts[index], cut);
        self.recompute(kerf);
        old
    }

    /// Moves the contents onto a different stock length.
    pub(crate) fn restock(&mut self, stock_length: f64) {
        self.stock_length = stock_length;
        self.remaining = stock_length - self.used;
    }

    /// Used length the bin would have without the cut at `index`.
    pub(crate) fn used_without(&self, index: usize, kerf: f64) -> f64 {
        if self.cuts.len() <= 1 {
            0.0
        } else {
            self.used - self.cuts[index] - kerf
        }
    }

    fn recompute(&mut self, kerf: f64) {
        let total: f64 = self.cuts.iter().sum();
        self.used = total + self.kerf_loss(kerf);
        self.remaining = self.stock_length - self.used;
    }
}

/// A complete cutting plan together with its aggregate measures.
#[cfg_attr(feature = "serialize", derive(Deserialize, Serialize))]
#[cfg_attr(feature = "serialize", serde(rename_all = "camelCase"))]
#[derive(Clone, Debug, PartialEq)]
pub struct Solution {
    /// Stock pieces used by the plan.
    pub bins: Vec<Bin>,

    /// Number of stock pieces used.
    pub bin_count: usize,

    /// Length consumed by cuts and kerf.
    pub total_used: f64,

    /// Sum of the non-negative leftovers.
    pub total_waste: f64,

    /// Sum of the stock lengths used.
    pub total_stock_length: f64,

    /// Length lost to the blade.
    pub total_kerf_loss: f64,

    /// `total_used / total_stock_length`, or 0 for an empty plan.
    pub utilization: f64,

    /// Kerf this plan was evaluated with.
    pub kerf: f64,
}

impl Solution {
    /// Builds a `Solution` and its aggregates from finished bins.
    pub fn from_bins(bins: Vec<Bin>, kerf: f64) -> Self {
        let total_used = bins.iter().map(Bin::used).sum::<f64>();
        let total_waste = bins.iter().map(|bin| bin.remaining().max(0.0)).sum::<f64>();
        let total_stock_length = bins.iter().map(Bin::stock_length).sum::<f64>();
        let total_kerf_loss = bins.iter().map(|bin| bin.kerf_loss(kerf)).sum::<f64>();
        let utilization = if total_stock_length > 0.0 {
            total_used / total_stock_length
        } else {
            0.0
        };

        Solution {
            bin_count: bins.len(),
            bins,
            total_used,
            total_waste,
            total_stock_length,
            total_kerf_loss,
            utilization,
            kerf,
        }
    }

    /// Value being minimized: stock consumed plus a kerf charge per bin.
    pub fn objective(&self) -> f64 {
        self.total_stock_length + self.kerf * self.bin_count as f64
    }

    /// Orders plans by objective, then waste, then bin count. `Less` is better.
    pub fn compare(&self, other: &Solution) -> Ordering {
        let (left, right) = (self.objective(), other.objective());
        if left < right - EPSILON {
            return Ordering::Less;
        }
        if left > right + EPSILON {
            return Ordering::Greater;
        }

        if self.total_waste < other.total_waste - EPSILON {
            return Ordering::Less;
        }
        if self.total_waste > other.total_waste + EPSILON {
            return Ordering::Greater;
        }

        self.bin_count.cmp(&other.bin_count)
    }

    /// Whether this plan is strictly better than `other`.
    pub fn is_better_than(&self, other: &Solution) -> bool {
        self.compare(other) == Ordering::Less
    }

    /// Every cut in the plan, bin by bin.
    pub fn cuts(&self) -> impl Iterator<Item = f64> + '_ {
        self.bins.iter().flat_map(|bin| bin.cuts().iter().copied())
    }

    /// Whether every bin satisfies the capacity invariant.
    pub fn is_valid(&self) -> bool {
        self.bins.iter().all(Bin::is_valid)
    }
}

/// Which solver produced a result.
#[cfg_attr(feature = "serialize", derive(Deserialize, Serialize))]
#[cfg_attr(feature = "serialize", serde(rename_all = "snake_case"))]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Algorithm {
    /// Deterministic Best-Fit-Decreasing construction.
    BestFitDecreasing,
    /// Exact branch-and-bound search.
    BranchAndBound,
    /// Anytime randomized local search.
    AnytimeLocalSearch,
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Algorithm::BestFitDecreasing => write!(f, "best fit decreasing"),
            Algorithm::BranchAndBound => write!(f, "branch and bound"),
            Algorithm::AnytimeLocalSearch => write!(f, "anytime local search"),
        }
    }
}

/// Why a solver stopped.
#[cfg_attr(feature = "serialize", derive(Deserialize, Serialize))]
#[cfg_attr(feature = "serialize", serde(rename_all = "snake_case"))]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Termination {
    /// Ran to its natural end.
    Completed,
    /// The time budget ran out first.
    TimedOut,
    /// A cancellation request was observed first.
    Cancelled,
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::Completed => write!(f, "completed"),
            Termination::TimedOut => write!(f, "timed out"),
            Termination::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Whether a result is known to be optimal.
#[cfg_attr(feature = "serialize", derive(Deserialize, Serialize))]
#[cfg_attr(feature = "serialize", serde(rename_all = "snake_case"))]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Optimality {
    /// The whole search space was exhausted.
    ProvenOptimal,
    /// No proof available.
    NotProven,
}

/// Counters specific to the solver that produced a result.
#[cfg_attr(feature = "serialize", derive(Deserialize, Serialize))]
#[cfg_attr(
    feature = "serialize",
    serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")
)]
#[derive(Clone, Debug, PartialEq)]
pub enum SolverStats {
    /// The heuristic has no counters.
    Heuristic,
    /// Exact search counters.
    Exact {
        /// Search nodes visited.
        explored_nodes: u64,
        /// Name of the engine that ran the search.
        backend: String,
    },
    /// Local search counters.
    Approximate {
        /// Iterations started.
        iterations: u64,
        /// Times the incumbent improved.
        improvements: u64,
    },
}

/// Terminal output of a solver run.
#[cfg_attr(feature = "serialize", derive(Deserialize, Serialize))]
#[cfg_attr(feature = "serialize", serde(rename_all = "camelCase"))]
#[derive(Clone, Debug, PartialEq)]
pub struct SolverResult {
    /// Best plan found.
    pub solution: Solution,

    /// Solver that produced the plan.
    pub algorithm: Algorithm,

    /// Why the solver stopped.
    pub termination: Termination,

    /// Whether the plan is proven optimal.
    pub optimality: Optimality,

    /// Wall-clock time spent, in milliseconds.
    pub elapsed_ms: f64,

    /// Solver-specific counters.
    pub stats: SolverStats,
}

impl SolverResult {
    /// Objective of the contained plan.
    pub fn objective(&self) -> f64 {
        self.solution.objective()
    }

    /// Whether the run finished with an optimality proof.
    pub fn is_proven_optimal(&self) -> bool {
        self.termination == Termination::Completed && self.optimality == Optimality::ProvenOptimal
    }
}

pub(crate) fn elapsed_ms(start: std::time::Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}
