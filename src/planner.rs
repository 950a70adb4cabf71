use super::*;

/// Collects a planning problem and runs any of the solvers on it.
///
/// ```
/// use cut_planner_1d::{CancellationToken, Planner};
///
/// let result = Planner::new()
///     .add_stock_length(96.0)
///     .add_cut_quantity(40.0, 3)
///     .set_kerf(0.125)
///     .exact(&CancellationToken::new())
///     .unwrap();
///
/// assert!(result.is_proven_optimal());
/// assert_eq!(result.solution.bin_count, 2);
/// ```
#[derive(Clone, Debug)]
pub struct Planner {
    stock_lengths: Vec<f64>,
    cuts: Vec<f64>,
    kerf: f64,
    random_seed: u64,
    deterministic: bool,
    exact_config: ExactConfig,
    approx_config: ApproxConfig,
}

impl Default for Planner {
    fn default() -> Self {
        Self {
            stock_lengths: Default::default(),
            cuts: Default::default(),
            kerf: 0.0,
            random_seed: Default::default(),
            deterministic: false,
            exact_config: Default::default(),
            approx_config: Default::default(),
        }
    }
}

impl Planner {
    /// Create a new planner.
    pub fn new() -> Self {
        Default::default()
    }

    /// Add a stock length that cuts can be taken from. Supply is unlimited.
    pub fn add_stock_length(&mut self, length: f64) -> &mut Self {
        self.stock_lengths.push(length);
        self
    }

    /// Add stock lengths. Duplicates are merged when the plan is validated.
    pub fn add_stock_lengths<I>(&mut self, lengths: I) -> &mut Self
    where
        I: IntoIterator<Item = f64>,
    {
        self.stock_lengths.extend(lengths);
        self
    }

    /// Add one required cut.
    pub fn add_cut(&mut self, length: f64) -> &mut Self {
        self.cuts.push(length);
        self
    }

    /// Add required cuts.
    pub fn add_cuts<I>(&mut self, lengths: I) -> &mut Self
    where
        I: IntoIterator<Item = f64>,
    {
        self.cuts.extend(lengths);
        self
    }

    /// Add `quantity` cuts of the same length.
    pub fn add_cut_quantity(&mut self, length: f64, quantity: usize) -> &mut Self {
        self.cuts.extend(std::iter::repeat(length).take(quantity));
        self
    }

    /// Set the width lost between adjacent cuts in the same stock piece.
    pub fn set_kerf(&mut self, kerf: f64) -> &mut Self {
        self.kerf = kerf;
        self
    }

    /// Set the random seed used by the approximate solver.
    pub fn set_random_seed(&mut self, seed: u64) -> &mut Self {
        self.random_seed = seed;
        self
    }

    /// Make the approximate solver depend on the seed alone. With an
    /// iteration cap that is reached before the deadline, the same seed then
    /// gives the same plan for the same input.
    pub fn set_deterministic(&mut self, deterministic: bool) -> &mut Self {
        self.deterministic = deterministic;
        self
    }

    /// Set the exact solver configuration.
    pub fn set_exact_config(&mut self, config: ExactConfig) -> &mut Self {
        self.exact_config = config;
        self
    }

    /// Set the approximate solver configuration. Seed and determinism are
    /// taken from this planner.
    pub fn set_approx_config(&mut self, config: ApproxConfig) -> &mut Self {
        self.approx_config = config;
        self
    }

    /// Validate the collected input.
    pub fn instance(&self) -> Result<Instance> {
        Instance::new(
            self.cuts.iter().copied(),
            self.stock_lengths.iter().copied(),
            self.kerf,
        )
    }

    /// Plan with Best-Fit-Decreasing.
    pub fn heuristic(&self) -> Result<Solution> {
        Ok(heuristic::best_fit_decreasing(&self.instance()?))
    }

    /// Plan with branch and bound.
    pub fn exact(&self, stop: &CancellationToken) -> Result<SolverResult> {
        let instance = self.instance()?;
        Ok(BranchAndBound.run(&instance, &self.exact_config, stop))
    }

    /// Plan with the anytime improver, reporting to `observer`.
    pub fn approximate<O>(&self, stop: &CancellationToken, observer: &mut O) -> Result<SolverResult>
    where
        O: SearchObserver + ?Sized,
    {
        let instance = self.instance()?;
        let config = self
            .approx_config
            .clone()
            .with_seed(self.random_seed)
            .with_deterministic(self.deterministic);
        Ok(AnytimeImprover::new(config).run(&instance, stop, observer))
    }
}
