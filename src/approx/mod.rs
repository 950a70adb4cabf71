//! Anytime approximate improvement.
//!
//! Every iteration builds a fresh plan with a randomized greedy constructor,
//! polishes it with first-improvement local search and, every few iterations,
//! tries a large neighbourhood move on the incumbent. The incumbent starts as
//! the Best-Fit-Decreasing plan and is only ever replaced by a plan that is
//! better by [`Solution::compare`], so the result is never worse than the
//! heuristic. Only strictly lower objectives are reported as improvements.
//!
//! All randomness comes from one [`ChaCha8Rng`] threaded through every call.
//! With `deterministic` set and an iteration cap that is reached before the
//! deadline, two runs with the same seed produce the same plan.

mod construct;
mod lns;
mod moves;

pub use moves::MoveWeights;

use super::*;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::time::{Duration, Instant};

/// Tuning for the approximate improver.
#[cfg_attr(feature = "serialize", derive(Deserialize, Serialize))]
#[cfg_attr(feature = "serialize", serde(rename_all = "camelCase", default))]
#[derive(Clone, Debug, PartialEq)]
pub struct ApproxConfig {
    /// Wall-clock budget in milliseconds.
    pub time_budget_ms: u64,

    /// Iterations after which the run completes.
    pub max_iterations: u64,

    /// Random seed.
    pub seed: u64,

    /// Use `seed` alone instead of mixing in fresh entropy.
    pub deterministic: bool,

    /// Minimum time between progress reports.
    pub progress_interval_ms: u64,

    /// Run a large neighbourhood move every this many iterations. Zero disables it.
    pub lns_interval: u64,

    /// Most bins destroyed by one large neighbourhood move.
    pub lns_max_destroy: usize,

    /// Destroy patterns remembered so they are not retried.
    pub lns_seen_capacity: usize,

    /// Consecutive rejected moves that end a local search.
    pub local_search_failures: u32,

    /// Relative frequency of each local move.
    pub move_weights: MoveWeights,
}

impl Default for ApproxConfig {
    fn default() -> Self {
        Self {
            time_budget_ms: 2500,
            max_iterations: 100_000,
            seed: 0,
            deterministic: false,
            progress_interval_ms: 220,
            lns_interval: 8,
            lns_max_destroy: 3,
            lns_seen_capacity: 4096,
            local_search_failures: 64,
            move_weights: MoveWeights::default(),
        }
    }
}

impl ApproxConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the time budget in milliseconds.
    pub fn with_time_budget_ms(mut self, ms: u64) -> Self {
        self.time_budget_ms = ms;
        self
    }

    /// Sets the iteration cap.
    pub fn with_max_iterations(mut self, iterations: u64) -> Self {
        self.max_iterations = iterations;
        self
    }

    /// Sets the random seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Makes runs reproducible from `seed` alone.
    pub fn with_deterministic(mut self, deterministic: bool) -> Self {
        self.deterministic = deterministic;
        self
    }

    /// Sets the progress report interval in milliseconds.
    pub fn with_progress_interval_ms(mut self, ms: u64) -> Self {
        self.progress_interval_ms = ms;
        self
    }

    /// Sets how often the large neighbourhood move runs.
    pub fn with_lns_interval(mut self, iterations: u64) -> Self {
        self.lns_interval = iterations;
        self
    }

    /// Sets the local move weights.
    pub fn with_move_weights(mut self, weights: MoveWeights) -> Self {
        self.move_weights = weights;
        self
    }

    /// The time budget as a `Duration`.
    pub fn time_budget(&self) -> Duration {
        Duration::from_millis(self.time_budget_ms)
    }

    fn rng(&self) -> ChaCha8Rng {
        if self.deterministic {
            ChaCha8Rng::seed_from_u64(self.seed)
        } else {
            ChaCha8Rng::seed_from_u64(self.seed ^ rand::random::<u64>())
        }
    }
}

/// Periodic snapshot of a running search.
#[derive(Clone, Debug, PartialEq)]
pub struct ProgressReport {
    /// Time since the run started.
    pub elapsed_ms: f64,
    /// Iterations started.
    pub iterations: u64,
    /// Improvements found.
    pub improvements: u64,
    /// Objective of the current incumbent.
    pub incumbent_objective: f64,
}

/// A new incumbent.
#[derive(Clone, Debug, PartialEq)]
pub struct ImprovementReport {
    /// The improved plan.
    pub candidate: Solution,
    /// Time since the run started.
    pub elapsed_ms: f64,
    /// Iterations completed when it was found.
    pub iterations: u64,
    /// Objective of `candidate`.
    pub objective: f64,
}

/// Receives events from a running [`AnytimeImprover`].
///
/// Both methods default to doing nothing.
pub trait SearchObserver {
    /// Called at most once per progress interval.
    fn on_progress(&mut self, _report: ProgressReport) {}

    /// Called for every new incumbent with a strictly lower objective.
    fn on_improvement(&mut self, _report: ImprovementReport) {}
}

impl SearchObserver for () {}

/// Stop conditions shared by every phase of one run.
pub(crate) struct Limits<'a> {
    start: Instant,
    budget: Duration,
    stop: &'a CancellationToken,
}

impl Limits<'_> {
    pub(crate) fn reached(&self) -> bool {
        self.stop.is_cancelled() || self.start.elapsed() >= self.budget
    }
}

/// The anytime improver.
#[derive(Clone, Debug, Default)]
pub struct AnytimeImprover {
    config: ApproxConfig,
}

impl AnytimeImprover {
    /// Creates an improver with the given configuration.
    pub fn new(config: ApproxConfig) -> Self {
        AnytimeImprover { config }
    }

    /// The configuration in use.
    pub fn config(&self) -> &ApproxConfig {
        &self.config
    }

    /// Improves on the heuristic until cancelled, out of time or out of iterations.
    #[tracing::instrument(
        level = "debug",
        skip_all,
        fields(cuts = instance.len(), seed = self.config.seed)
    )]
    pub fn run<O>(
        &self,
        instance: &Instance,
        stop: &CancellationToken,
        observer: &mut O,
    ) -> SolverResult
    where
        O: SearchObserver + ?Sized,
    {
        let config = &self.config;
        let limits = Limits {
            start: Instant::now(),
            budget: config.time_budget(),
            stop,
        };
        let progress_interval = Duration::from_millis(config.progress_interval_ms);

        let mut rng = config.rng();
        let mut lns = lns::LargeNeighbourhood::new(config.lns_max_destroy, config.lns_seen_capacity);
        let mut incumbent = heuristic::best_fit_decreasing(instance);
        let mut iterations = 0u64;
        let mut improvements = 0u64;
        let mut last_progress = limits.start;

        let termination = loop {
            if stop.is_cancelled() {
                break Termination::Cancelled;
            }
            if limits.start.elapsed() >= limits.budget {
                break Termination::TimedOut;
            }
            if iterations >= config.max_iterations {
                break Termination::Completed;
            }
            iterations += 1;

            let mut bins = construct::build(instance.cuts(), Vec::new(), instance, &mut rng);
            moves::local_search(&mut bins, instance, config, &limits, &mut rng);
            let mut candidate = Solution::from_bins(bins, instance.kerf());

            if config.lns_interval > 0 && iterations % config.lns_interval == 0 {
                if let Some(repaired) = lns.apply(&incumbent, instance, &mut rng) {
                    if repaired.is_better_than(&candidate) {
                        candidate = repaired;
                    }
                }
            }

            if candidate.is_better_than(&incumbent) {
                let lower = improves(&candidate, &incumbent);
                incumbent = candidate;

                if lower {
                    improvements += 1;
                    let objective = incumbent.objective();
                    tracing::debug!(iterations, objective, "improved");
                    observer.on_improvement(ImprovementReport {
                        candidate: incumbent.clone(),
                        elapsed_ms: plan::elapsed_ms(limits.start),
                        iterations,
                        objective,
                    });
                } else {
                    tracing::trace!(iterations, bins = incumbent.bin_count, "tie broken");
                }
            }

            if last_progress.elapsed() >= progress_interval {
                last_progress = Instant::now();
                observer.on_progress(ProgressReport {
                    elapsed_ms: plan::elapsed_ms(limits.start),
                    iterations,
                    improvements,
                    incumbent_objective: incumbent.objective(),
                });
            }
        };

        tracing::debug!(
            iterations,
            improvements,
            %termination,
            objective = incumbent.objective(),
            "approximate search finished"
        );

        SolverResult {
            solution: incumbent,
            algorithm: Algorithm::AnytimeLocalSearch,
            termination,
            optimality: Optimality::NotProven,
            elapsed_ms: plan::elapsed_ms(limits.start),
            stats: SolverStats::Approximate {
                iterations,
                improvements,
            },
        }
    }
}

/// Strictly lower objective, so reported objectives always decrease.
fn improves(candidate: &Solution, incumbent: &Solution) -> bool {
    candidate.objective() < incumbent.objective() - EPSILON
}

/// Re-sizes `bin` to the smallest stock that still holds its contents.
pub(crate) fn right_size(bin: &mut Bin, catalog: &StockCatalog) {
    if let Some(stock_length) = catalog.smallest_fitting(bin.used()) {
        if stock_length < bin.stock_length() - EPSILON {
            bin.restock(stock_length);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        progress: Vec<ProgressReport>,
        improvements: Vec<ImprovementReport>,
    }

    impl SearchObserver for Recorder {
        fn on_progress(&mut self, report: ProgressReport) {
            self.progress.push(report);
        }

        fn on_improvement(&mut self, report: ImprovementReport) {
            self.improvements.push(report);
        }
    }

    fn mixed_instance() -> Instance {
        Instance::new(
            [
                84.0, 72.0, 72.0, 66.0, 60.0, 54.0, 50.0, 48.0, 45.0, 40.0, 36.0, 30.0, 24.0, 24.0,
                18.0, 12.0, 70.0, 62.0, 58.0, 33.0,
            ],
            [96.0, 120.0, 144.0],
            0.125,
        )
        .unwrap()
    }

    fn sorted(mut cuts: Vec<f64>) -> Vec<f64> {
        cuts.sort_by(|a, b| b.total_cmp(a));
        cuts
    }

    #[test]
    fn never_worse_than_heuristic() {
        let instance = mixed_instance();
        let improver = AnytimeImprover::new(
            ApproxConfig::new()
                .with_time_budget_ms(60_000)
                .with_max_iterations(150)
                .with_seed(11)
                .with_deterministic(true),
        );
        let result = improver.run(&instance, &CancellationToken::new(), &mut ());
        let heuristic = heuristic::best_fit_decreasing(&instance);

        assert_eq!(result.termination, Termination::Completed);
        assert_eq!(result.optimality, Optimality::NotProven);
        assert!(result.objective() <= heuristic.objective() + EPSILON);
        assert!(result.solution.is_valid());
        assert_eq!(sorted(result.solution.cuts().collect()), instance.cuts());
    }

    #[test]
    fn improvements_strictly_decrease() {
        // Best fit opens four 5s here; two 8s are optimal.
        let instance = Instance::new([4.0, 4.0, 4.0, 4.0], [5.0, 8.0], 0.0).unwrap();
        let mut recorder = Recorder::default();
        let result = AnytimeImprover::new(
            ApproxConfig::new()
                .with_time_budget_ms(60_000)
                .with_max_iterations(400)
                .with_seed(3)
                .with_deterministic(true),
        )
        .run(&instance, &CancellationToken::new(), &mut recorder);

        let mut previous = heuristic::best_fit_decreasing(&instance).objective();
        for report in &recorder.improvements {
            assert!(report.objective < previous);
            assert!(report.candidate.is_valid());
            previous = report.objective;
        }
        assert_eq!(result.objective(), previous);
        assert_eq!(result.objective(), 16.0);
    }

    #[test]
    fn equal_objective_with_fewer_bins_is_kept() {
        // One 120 and two 60s cost the same; the single bin wins the tie.
        let instance = Instance::new([60.0, 60.0], [60.0, 120.0], 0.0).unwrap();
        let heuristic = heuristic::best_fit_decreasing(&instance);
        assert_eq!(heuristic.bin_count, 2);

        let mut recorder = Recorder::default();
        let result = AnytimeImprover::new(
            ApproxConfig::new()
                .with_time_budget_ms(60_000)
                .with_max_iterations(400)
                .with_lns_interval(1)
                .with_seed(8)
                .with_deterministic(true),
        )
        .run(&instance, &CancellationToken::new(), &mut recorder);

        assert_eq!(result.solution.bin_count, 1);
        assert!(result.solution.is_better_than(&heuristic));
        assert_eq!(result.objective(), heuristic.objective());
        assert!(recorder.improvements.is_empty());
    }

    #[test]
    fn deterministic_runs_agree() {
        let instance = mixed_instance();
        let config = ApproxConfig::new()
            .with_time_budget_ms(60_000)
            .with_max_iterations(200)
            .with_seed(42)
            .with_deterministic(true);

        let first = AnytimeImprover::new(config.clone()).run(&instance, &CancellationToken::new(), &mut ());
        let second = AnytimeImprover::new(config).run(&instance, &CancellationToken::new(), &mut ());

        assert_eq!(first.solution.bin_count, second.solution.bin_count);
        assert_eq!(first.solution.total_waste, second.solution.total_waste);
        assert_eq!(
            first.solution.total_stock_length,
            second.solution.total_stock_length
        );
        assert_eq!(first.solution, second.solution);
    }

    #[test]
    fn cancelled_before_start() {
        let instance = mixed_instance();
        let stop = CancellationToken::new();
        stop.cancel();

        let result = AnytimeImprover::default().run(&instance, &stop, &mut ());
        assert_eq!(result.termination, Termination::Cancelled);
        assert_eq!(result.solution, heuristic::best_fit_decreasing(&instance));
        assert_eq!(
            result.stats,
            SolverStats::Approximate {
                iterations: 0,
                improvements: 0
            }
        );
    }

    #[test]
    fn zero_budget_times_out() {
        let instance = mixed_instance();
        let result = AnytimeImprover::new(ApproxConfig::new().with_time_budget_ms(0)).run(
            &instance,
            &CancellationToken::new(),
            &mut (),
        );
        assert_eq!(result.termination, Termination::TimedOut);
    }

    #[test]
    fn progress_is_rate_limited() {
        let instance = mixed_instance();
        let mut recorder = Recorder::default();
        AnytimeImprover::new(
            ApproxConfig::new()
                .with_time_budget_ms(60_000)
                .with_max_iterations(50)
                .with_progress_interval_ms(0),
        )
        .run(&instance, &CancellationToken::new(), &mut recorder);

        // A zero interval reports after every iteration.
        assert_eq!(recorder.progress.len(), 50);
        assert!(recorder
            .progress
            .windows(2)
            .all(|pair| pair[0].iterations < pair[1].iterations));

        let mut recorder = Recorder::default();
        AnytimeImprover::new(
            ApproxConfig::new()
                .with_time_budget_ms(60_000)
                .with_max_iterations(50)
                .with_progress_interval_ms(60_000),
        )
        .run(&instance, &CancellationToken::new(), &mut recorder);
        assert!(recorder.progress.is_empty());
    }

    #[test]
    fn right_size_shrinks_to_smallest_fitting_stock() {
        let catalog = StockCatalog::new([96.0, 120.0, 144.0]).unwrap();
        let mut bin = Bin::from_parts(144.0, vec![50.0, 40.0], 0.125);
        right_size(&mut bin, &catalog);
        assert_eq!(bin.stock_length(), 96.0);
        assert!(bin.is_valid());
    }
}
