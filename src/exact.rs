//! Exact branch-and-bound over complete assignments of cuts to bins.
//!
//! Cuts are placed longest first, one per search level. At each level the
//! search tries every open bin that can take the cut (skipping bins that
//! would end up in an identical state) and then a fresh bin of every stock
//! length that can hold it. The Best-Fit-Decreasing plan is the initial
//! incumbent, so the bound prunes from the first node on.
//!
//! Deadline and cancellation are polled every `check_interval` nodes. When
//! either trips, the search unwinds and the incumbent is returned as
//! `timed_out` or `cancelled`; only an exhausted search is reported as
//! proven optimal.

use super::*;

use fnv::FnvHashMap;
use smallvec::{smallvec, SmallVec};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Lengths are compared on a 1e-4 grid when detecting repeated states.
const STATE_QUANTUM: f64 = 1e4;

/// Tuning for the exact solver.
#[cfg_attr(feature = "serialize", derive(Deserialize, Serialize))]
#[cfg_attr(feature = "serialize", serde(rename_all = "camelCase", default))]
#[derive(Clone, Debug, PartialEq)]
pub struct ExactConfig {
    /// Wall-clock budget in milliseconds. Zero returns the heuristic plan as timed out.
    pub time_budget_ms: u64,

    /// Nodes explored between deadline/cancellation checks. Rounded up to a power of two.
    pub check_interval: u64,

    /// Maximum number of remembered search states.
    pub memo_capacity: usize,
}

impl Default for ExactConfig {
    fn default() -> Self {
        Self {
            time_budget_ms: 3000,
            check_interval: 128,
            memo_capacity: 2_000_000,
        }
    }
}

impl ExactConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the time budget in milliseconds.
    pub fn with_time_budget_ms(mut self, ms: u64) -> Self {
        self.time_budget_ms = ms;
        self
    }

    /// Sets how many nodes are explored between checks.
    pub fn with_check_interval(mut self, nodes: u64) -> Self {
        self.check_interval = nodes.max(1).next_power_of_two();
        self
    }

    /// Sets the transposition table capacity.
    pub fn with_memo_capacity(mut self, entries: usize) -> Self {
        self.memo_capacity = entries;
        self
    }

    /// The time budget as a `Duration`.
    pub fn time_budget(&self) -> Duration {
        Duration::from_millis(self.time_budget_ms)
    }
}

/// Something that can run the exact search.
///
/// [`BranchAndBound`] is the portable implementation. Faster backends may be
/// plugged in through [`load_exact_engine`]; they must honour the same
/// contract: never worse than the heuristic, and proven optimal only after
/// an exhaustive search.
pub trait ExactEngine: Send + Sync {
    /// Short backend name recorded in the result statistics.
    fn name(&self) -> &str;

    /// Runs the search.
    fn solve(
        &self,
        instance: &Instance,
        config: &ExactConfig,
        stop: &CancellationToken,
    ) -> Result<SolverResult>;
}

/// Loads an optional accelerated engine, falling back to [`BranchAndBound`].
///
/// A loader failure is logged and never surfaced to the caller.
pub fn load_exact_engine<F>(loader: F) -> Arc<dyn ExactEngine>
where
    F: FnOnce() -> Result<Arc<dyn ExactEngine>>,
{
    match loader() {
        Ok(engine) => {
            tracing::debug!(engine = engine.name(), "loaded exact engine");
            engine
        }
        Err(err) => {
            tracing::warn!(%err, "using portable branch and bound");
            Arc::new(BranchAndBound)
        }
    }
}

/// The portable branch-and-bound engine.
#[derive(Copy, Clone, Debug, Default)]
pub struct BranchAndBound;

impl BranchAndBound {
    /// Name recorded in results.
    pub const NAME: &'static str = "portable";

    /// Searches for an optimal plan within the configured budget.
    #[tracing::instrument(level = "debug", skip_all, fields(cuts = instance.len()))]
    pub fn run(
        &self,
        instance: &Instance,
        config: &ExactConfig,
        stop: &CancellationToken,
    ) -> SolverResult {
        let start = Instant::now();
        let seed = heuristic::best_fit_decreasing(instance);

        if config.time_budget_ms == 0 {
            return finish(seed, Termination::TimedOut, 0, start);
        }

        let cuts = instance.cuts();
        let mut suffix = vec![0.0; cuts.len() + 1];
        for index in (0..cuts.len()).rev() {
            suffix[index] = suffix[index + 1] + cuts[index];
        }

        let mut search = Search {
            cuts,
            stock: instance.catalog().lengths(),
            kerf: instance.kerf(),
            longest: instance.catalog().longest(),
            suffix,
            arena: Vec::with_capacity(cuts.len()),
            stock_total: 0.0,
            incumbent_objective: seed.objective(),
            incumbent: seed,
            memo: FnvHashMap::default(),
            memo_capacity: config.memo_capacity,
            check_mask: config.check_interval.max(1).next_power_of_two() - 1,
            explored: 0,
            start,
            budget: config.time_budget(),
            stop,
            halted: None,
        };

        search.descend(0);

        let termination = search.halted.unwrap_or(Termination::Completed);
        tracing::debug!(
            explored = search.explored,
            %termination,
            objective = search.incumbent_objective,
            "exact search finished"
        );
        finish(search.incumbent, termination, search.explored, start)
    }
}

impl ExactEngine for BranchAndBound {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn solve(
        &self,
        instance: &Instance,
        config: &ExactConfig,
        stop: &CancellationToken,
    ) -> Result<SolverResult> {
        Ok(self.run(instance, config, stop))
    }
}

fn finish(
    solution: Solution,
    termination: Termination,
    explored_nodes: u64,
    start: Instant,
) -> SolverResult {
    let optimality = if termination == Termination::Completed {
        Optimality::ProvenOptimal
    } else {
        Optimality::NotProven
    };

    SolverResult {
        solution,
        algorithm: Algorithm::BranchAndBound,
        termination,
        optimality,
        elapsed_ms: plan::elapsed_ms(start),
        stats: SolverStats::Exact {
            explored_nodes,
            backend: BranchAndBound::NAME.to_string(),
        },
    }
}

fn quantize(value: f64) -> i64 {
    (value * STATE_QUANTUM).round() as i64
}

/// An open bin in the search arena.
#[derive(Clone, Debug, PartialEq)]
struct Slot {
    stock_length: f64,
    cuts: SmallVec<[f64; 8]>,
    used: f64,
    remaining: f64,
}

type StateKey = (usize, Vec<(i64, i64)>);

struct Search<'a> {
    cuts: &'a [f64],
    stock: &'a [f64],
    kerf: f64,
    longest: f64,
    // suffix[i] = sum of cuts[i..]
    suffix: Vec<f64>,
    arena: Vec<Slot>,
    stock_total: f64,
    incumbent: Solution,
    incumbent_objective: f64,
    memo: FnvHashMap<StateKey, f64>,
    memo_capacity: usize,
    check_mask: u64,
    explored: u64,
    start: Instant,
    budget: Duration,
    stop: &'a CancellationToken,
    halted: Option<Termination>,
}

/// What has to be put back when a branch returns.
#[derive(Copy, Clone, Debug)]
enum Undo {
    Placed {
        slot: usize,
        used: f64,
        remaining: f64,
    },
    Opened {
        stock_total: f64,
    },
}

/// Scope guard for one branch. Dropping it restores the arena exactly.
struct Restore<'s, 'a> {
    search: &'s mut Search<'a>,
    undo: Undo,
}

impl<'a> Deref for Restore<'_, 'a> {
    type Target = Search<'a>;

    fn deref(&self) -> &Search<'a> {
        self.search
    }
}

impl<'a> DerefMut for Restore<'_, 'a> {
    fn deref_mut(&mut self) -> &mut Search<'a> {
        self.search
    }
}

impl Drop for Restore<'_, '_> {
    fn drop(&mut self) {
        match self.undo {
            Undo::Placed {
                slot,
                used,
                remaining,
            } => {
                let slot = &mut self.search.arena[slot];
                slot.cuts.pop();
                slot.used = used;
                slot.remaining = remaining;
            }
            Undo::Opened { stock_total } => {
                self.search.arena.pop();
                self.search.stock_total = stock_total;
            }
        }
    }
}

impl<'a> Search<'a> {
    fn descend(&mut self, index: usize) {
        if self.should_halt() {
            return;
        }

        let bins = self.arena.len() as f64;
        let objective = self.stock_total + self.kerf * bins;

        let free: f64 = self.arena.iter().map(|slot| slot.remaining.max(0.0)).sum();
        let required = (self.suffix[index] - free).max(0.0);
        let min_new_bins = if required <= EPSILON {
            0.0
        } else {
            ((required - EPSILON) / self.longest).ceil()
        };
        let optimistic = self.stock_total + required + self.kerf * (bins + min_new_bins);
        if optimistic > self.incumbent_objective + EPSILON {
            return;
        }

        if index == self.cuts.len() {
            self.record();
            return;
        }

        if !self.remember(index, objective) {
            return;
        }

        let cut = self.cuts[index];
        let mut tried: SmallVec<[(i64, i64); 8]> = SmallVec::new();

        for slot in 0..self.arena.len() {
            let target = &self.arena[slot];
            let extra_kerf = if target.cuts.is_empty() { 0.0 } else { self.kerf };
            let after = target.remaining - cut - extra_kerf;
            if after < -EPSILON {
                continue;
            }

            let signature = (quantize(target.stock_length), quantize(after));
            if tried.contains(&signature) {
                continue;
            }
            tried.push(signature);

            self.place(slot, cut).descend(index + 1);
            if self.halted.is_some() {
                return;
            }
        }

        let stock = self.stock;
        for &stock_length in stock {
            if stock_length - cut < -EPSILON {
                continue;
            }

            self.open(stock_length, cut).descend(index + 1);
            if self.halted.is_some() {
                return;
            }
        }
    }

    fn should_halt(&mut self) -> bool {
        if self.halted.is_some() {
            return true;
        }

        if self.explored & self.check_mask == 0 {
            if self.stop.is_cancelled() {
                self.halted = Some(Termination::Cancelled);
                return true;
            }
            if self.start.elapsed() >= self.budget {
                self.halted = Some(Termination::TimedOut);
                return true;
            }
        }

        self.explored += 1;
        false
    }

    /// Records the state; returns `false` if an equal or better visit was seen.
    fn remember(&mut self, index: usize, objective: f64) -> bool {
        let mut pairs: Vec<(i64, i64)> = self
            .arena
            .iter()
            .map(|slot| (quantize(slot.stock_length), quantize(slot.remaining)))
            .collect();
        pairs.sort_unstable();
        let key = (index, pairs);

        if let Some(seen) = self.memo.get_mut(&key) {
            if *seen <= objective + EPSILON {
                return false;
            }
            *seen = objective;
            return true;
        }

        if self.memo.len() < self.memo_capacity {
            self.memo.insert(key, objective);
        }
        true
    }

    fn record(&mut self) {
        let kerf = self.kerf;
        let bins = self
            .arena
            .iter()
            .map(|slot| Bin::from_parts(slot.stock_length, slot.cuts.to_vec(), kerf))
            .collect();
        let candidate = Solution::from_bins(bins, kerf);

        if candidate.is_better_than(&self.incumbent) {
            self.incumbent_objective = candidate.objective();
            self.incumbent = candidate;
        }
    }

    fn place(&mut self, slot: usize, cut: f64) -> Restore<'_, 'a> {
        let kerf = self.kerf;
        let target = &mut self.arena[slot];
        let undo = Undo::Placed {
            slot,
            used: target.used,
            remaining: target.remaining,
        };

        let extra_kerf = if target.cuts.is_empty() { 0.0 } else { kerf };
        target.cuts.push(cut);
        target.used += cut + extra_kerf;
        target.remaining = target.stock_length - target.used;

        Restore { search: self, undo }
    }

    fn open(&mut self, stock_length: f64, cut: f64) -> Restore<'_, 'a> {
        let undo = Undo::Opened {
            stock_total: self.stock_total,
        };

        self.stock_total += stock_length;
        self.arena.push(Slot {
            stock_length,
            cuts: smallvec![cut],
            used: cut,
            remaining: stock_length - cut,
        });

        Restore { search: self, undo }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(instance: &Instance, config: &ExactConfig) -> SolverResult {
        BranchAndBound.run(instance, config, &CancellationToken::new())
    }

    #[test]
    fn proves_fixture_optimal() {
        let instance =
            Instance::new([52.0, 48.0, 48.0, 45.0, 36.0, 24.0, 24.0], [96.0, 120.0], 0.125)
                .unwrap();
        let heuristic = heuristic::best_fit_decreasing(&instance);
        let result = run(&instance, &ExactConfig::new().with_time_budget_ms(3000));

        assert_eq!(result.termination, Termination::Completed);
        assert_eq!(result.optimality, Optimality::ProvenOptimal);
        assert!(result.objective() <= heuristic.objective() + EPSILON);
        assert!(result.solution.is_valid());
        match result.stats {
            SolverStats::Exact {
                explored_nodes,
                ref backend,
            } => {
                assert!(explored_nodes > 0);
                assert_eq!(backend, BranchAndBound::NAME);
            }
            ref other => panic!("unexpected stats {other:?}"),
        }
    }

    #[test]
    fn beats_heuristic_when_a_longer_stock_is_cheaper() {
        // Best fit opens two 5s; one 8 holds both cuts.
        let instance = Instance::new([4.0, 4.0], [5.0, 8.0], 0.0).unwrap();
        let heuristic = heuristic::best_fit_decreasing(&instance);
        let result = run(&instance, &ExactConfig::new());

        assert_eq!(heuristic.objective(), 10.0);
        assert_eq!(result.objective(), 8.0);
        assert_eq!(result.solution.bin_count, 1);
        assert!(result.is_proven_optimal());
    }

    #[test]
    fn zero_budget_returns_heuristic_as_timed_out() {
        let instance = Instance::new(
            [84.0, 84.0, 84.0, 84.0, 72.0, 72.0, 72.0, 72.0, 66.0, 66.0],
            [96.0, 120.0, 144.0],
            0.125,
        )
        .unwrap();
        let result = run(&instance, &ExactConfig::new().with_time_budget_ms(0));

        assert_eq!(result.termination, Termination::TimedOut);
        assert_eq!(result.optimality, Optimality::NotProven);
        assert_eq!(result.solution, heuristic::best_fit_decreasing(&instance));
    }

    #[test]
    fn cancelled_before_first_check() {
        let instance = Instance::new([52.0, 48.0, 48.0, 45.0], [96.0, 120.0], 0.125).unwrap();
        let stop = CancellationToken::new();
        stop.cancel();

        let result = BranchAndBound.run(&instance, &ExactConfig::new(), &stop);
        assert_eq!(result.termination, Termination::Cancelled);
        assert_eq!(result.optimality, Optimality::NotProven);
        assert_eq!(result.solution, heuristic::best_fit_decreasing(&instance));
    }

    #[test]
    fn tiny_budget_never_regresses() {
        let instance = Instance::new(
            [
                84.0, 84.0, 84.0, 84.0, 72.0, 72.0, 72.0, 72.0, 66.0, 66.0, 66.0, 66.0, 60.0,
                60.0, 60.0, 60.0, 54.0, 54.0, 54.0, 54.0,
            ],
            [96.0, 120.0, 144.0],
            0.125,
        )
        .unwrap();
        let heuristic = heuristic::best_fit_decreasing(&instance);
        let result = run(&instance, &ExactConfig::new().with_time_budget_ms(1));

        assert_ne!(result.termination, Termination::Cancelled);
        assert!(result.objective() <= heuristic.objective() + EPSILON);
        assert!(result.solution.is_valid());
    }

    #[test]
    fn restore_guard_undoes_every_mutation() {
        let instance = Instance::new([50.0, 30.0], [96.0, 120.0], 0.5).unwrap();
        let stop = CancellationToken::new();
        let mut search = Search {
            cuts: instance.cuts(),
            stock: instance.catalog().lengths(),
            kerf: 0.5,
            longest: 120.0,
            suffix: vec![80.0, 30.0, 0.0],
            arena: Vec::new(),
            stock_total: 0.0,
            incumbent: heuristic::best_fit_decreasing(&instance),
            incumbent_objective: 0.0,
            memo: FnvHashMap::default(),
            memo_capacity: 16,
            check_mask: 127,
            explored: 0,
            start: Instant::now(),
            budget: Duration::from_secs(1),
            stop: &stop,
            halted: None,
        };

        {
            let mut opened = search.open(96.0, 50.0);
            assert_eq!(opened.arena.len(), 1);
            assert_eq!(opened.stock_total, 96.0);

            let before = opened.arena.clone();
            {
                let placed = opened.place(0, 30.0);
                assert_eq!(placed.arena[0].cuts.as_slice(), &[50.0, 30.0]);
                assert_eq!(placed.arena[0].used, 80.5);
                assert_eq!(placed.arena[0].remaining, 15.5);
            }
            assert_eq!(opened.arena, before);
        }

        assert!(search.arena.is_empty());
        assert_eq!(search.stock_total, 0.0);
    }

    #[test]
    fn memo_prunes_repeated_states() {
        let instance = Instance::new([10.0], [96.0], 0.0).unwrap();
        let stop = CancellationToken::new();
        let mut search = Search {
            cuts: instance.cuts(),
            stock: instance.catalog().lengths(),
            kerf: 0.0,
            longest: 96.0,
            suffix: vec![10.0, 0.0],
            arena: Vec::new(),
            stock_total: 0.0,
            incumbent: heuristic::best_fit_decreasing(&instance),
            incumbent_objective: 96.0,
            memo: FnvHashMap::default(),
            memo_capacity: 1,
            check_mask: 127,
            explored: 0,
            start: Instant::now(),
            budget: Duration::from_secs(1),
            stop: &stop,
            halted: None,
        };

        assert!(search.remember(0, 96.0));
        assert!(!search.remember(0, 96.0));
        assert!(search.remember(0, 90.0));
        // Full table: new states are explored but not stored.
        assert!(search.remember(1, 50.0));
        assert!(search.remember(1, 50.0));
    }

    #[test]
    fn unavailable_accelerator_falls_back() {
        let engine = load_exact_engine(|| Err(Error::EngineUnavailable("not built".into())));
        assert_eq!(engine.name(), BranchAndBound::NAME);

        let instance = Instance::new([4.0, 4.0], [5.0, 8.0], 0.0).unwrap();
        let result = engine
            .solve(&instance, &ExactConfig::new(), &CancellationToken::new())
            .unwrap();
        assert!(result.is_proven_optimal());
    }

    #[test]
    fn check_interval_rounds_to_power_of_two() {
        assert_eq!(ExactConfig::new().with_check_interval(100).check_interval, 128);
        assert_eq!(ExactConfig::new().with_check_interval(0).check_interval, 1);
    }
}
