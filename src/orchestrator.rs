//! Runs the slow solvers in the background and owns the displayed plan.
//!
//! [`Orchestrator::plan`] answers immediately with the heuristic and hands the
//! same validated snapshot to the exact and approximate tiers on tokio's
//! blocking pool. Their messages come back over one channel and are applied
//! by [`Orchestrator::next_update`] or [`Orchestrator::poll_updates`]. The
//! displayed plan is only ever replaced by a strictly better one, so the order
//! in which tiers report does not matter.

use super::*;

use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

/// Which tiers a plan request starts.
#[cfg_attr(feature = "serialize", derive(Deserialize, Serialize))]
#[cfg_attr(feature = "serialize", serde(rename_all = "snake_case"))]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum SolverMode {
    /// Heuristic only.
    Heuristic,
    /// Heuristic, then the exact tier.
    Exact,
    /// Heuristic, then both tiers.
    #[default]
    Auto,
}

/// Orchestrator settings.
#[cfg_attr(feature = "serialize", derive(Deserialize, Serialize))]
#[cfg_attr(feature = "serialize", serde(rename_all = "camelCase", default))]
#[derive(Clone, Debug, PartialEq)]
pub struct OrchestratorConfig {
    /// Tiers to run.
    pub mode: SolverMode,

    /// Plans with more cuts than this skip the exact tier.
    pub max_cuts_for_exact: usize,

    /// Exact tier settings.
    pub exact: ExactConfig,

    /// Approximate tier settings. Its seed is offset per request.
    pub approx: ApproxConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        OrchestratorConfig {
            mode: SolverMode::Auto,
            max_cuts_for_exact: 16,
            exact: ExactConfig::default().with_time_budget_ms(20_000),
            approx: ApproxConfig::default().with_time_budget_ms(3000),
        }
    }
}

impl OrchestratorConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the mode.
    pub fn with_mode(mut self, mode: SolverMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the exact guardrail.
    pub fn with_max_cuts_for_exact(mut self, cuts: usize) -> Self {
        self.max_cuts_for_exact = cuts;
        self
    }

    /// Sets the exact tier configuration.
    pub fn with_exact(mut self, exact: ExactConfig) -> Self {
        self.exact = exact;
        self
    }

    /// Sets the approximate tier configuration.
    pub fn with_approx(mut self, approx: ApproxConfig) -> Self {
        self.approx = approx;
        self
    }
}

/// A background solver tier.
#[cfg_attr(feature = "serialize", derive(Deserialize, Serialize))]
#[cfg_attr(feature = "serialize", serde(rename_all = "snake_case"))]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Tier {
    /// Branch and bound.
    Exact,
    /// Anytime local search.
    Approximate,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Exact => write!(f, "exact"),
            Tier::Approximate => write!(f, "approx"),
        }
    }
}

/// Where the displayed plan came from.
#[cfg_attr(feature = "serialize", derive(Deserialize, Serialize))]
#[cfg_attr(feature = "serialize", serde(rename_all = "snake_case"))]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PlanSource {
    /// The heuristic, with background work pending or not requested.
    Heuristic,
    /// The heuristic, kept after the exact tier failed to beat it.
    HeuristicFallback,
    /// The exact tier.
    Exact,
    /// The approximate tier.
    Approximate,
}

/// The plan currently shown to the caller.
#[cfg_attr(feature = "serialize", derive(Serialize))]
#[cfg_attr(feature = "serialize", serde(rename_all = "camelCase"))]
#[derive(Clone, Debug, PartialEq)]
pub struct DisplayedPlan {
    /// The plan.
    pub solution: Solution,
    /// Solver that produced it.
    pub algorithm: Algorithm,
    /// Whether it is known to be optimal.
    pub optimality: Optimality,
    /// Which tier it came from.
    pub source: PlanSource,
    /// Human readable status line.
    pub status: String,
}

impl DisplayedPlan {
    fn from_heuristic(result: SolverResult) -> Self {
        DisplayedPlan {
            solution: result.solution,
            algorithm: result.algorithm,
            optimality: result.optimality,
            source: PlanSource::Heuristic,
            status: "heuristic plan".to_string(),
        }
    }

    /// Objective of the displayed plan.
    pub fn objective(&self) -> f64 {
        self.solution.objective()
    }
}

/// What happened to one tier when a plan was requested.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TierDispatch {
    /// Running under this request id.
    Dispatched(RequestId),
    /// Not run, with the reason.
    Skipped(String),
    /// Not part of the configured mode.
    NotRequested,
}

impl TierDispatch {
    /// The request id, if the tier is running.
    pub fn request_id(&self) -> Option<RequestId> {
        match self {
            TierDispatch::Dispatched(request_id) => Some(*request_id),
            _ => None,
        }
    }
}

/// Returned by [`Orchestrator::plan`].
#[derive(Clone, Debug, PartialEq)]
pub struct PlanTicket {
    /// The heuristic result, already displayed.
    pub heuristic: SolverResult,
    /// Exact tier dispatch.
    pub exact: TierDispatch,
    /// Approximate tier dispatch.
    pub approx: TierDispatch,
}

/// A change observed while applying background messages.
#[derive(Clone, Debug, PartialEq)]
pub enum PlanUpdate {
    /// Heartbeat from a running tier.
    Progress {
        /// Reporting tier.
        tier: Tier,
        /// Its request.
        request_id: RequestId,
        /// Iterations so far.
        iterations: u64,
        /// The tier's own incumbent objective.
        incumbent_objective: f64,
    },
    /// The displayed plan was replaced.
    Replaced {
        /// Tier that produced the new plan.
        tier: Tier,
        /// Its request.
        request_id: RequestId,
        /// New displayed objective.
        objective: f64,
    },
    /// A tier finished without beating the displayed plan.
    Retained {
        /// Finished tier.
        tier: Tier,
        /// Its request.
        request_id: RequestId,
        /// Status now shown.
        status: String,
    },
    /// A tier reported an error.
    Failed {
        /// Failed tier.
        tier: Tier,
        /// Its request.
        request_id: RequestId,
        /// Error text.
        message: String,
    },
}

#[derive(Debug, Default)]
struct InFlight {
    exact: Option<RequestId>,
    approx: Option<RequestId>,
}

impl InFlight {
    fn tier_of(&self, request_id: RequestId) -> Option<Tier> {
        if self.exact == Some(request_id) {
            Some(Tier::Exact)
        } else if self.approx == Some(request_id) {
            Some(Tier::Approximate)
        } else {
            None
        }
    }

    fn clear(&mut self, tier: Tier) {
        match tier {
            Tier::Exact => self.exact = None,
            Tier::Approximate => self.approx = None,
        }
    }
}

/// Coordinates the heuristic and the background tiers for one caller.
pub struct Orchestrator {
    config: OrchestratorConfig,
    runtime: Handle,
    engine: Arc<dyn ExactEngine>,
    registry: CancellationRegistry,
    next_request_id: RequestId,
    in_flight: InFlight,
    displayed: Option<DisplayedPlan>,
    sender: UnboundedSender<SolveMessage>,
    receiver: UnboundedReceiver<SolveMessage>,
}

impl Orchestrator {
    /// Creates an orchestrator that spawns onto `runtime`.
    pub fn new(config: OrchestratorConfig, runtime: Handle) -> Self {
        let (sender, receiver) = unbounded_channel();
        Orchestrator {
            config,
            runtime,
            engine: Arc::new(BranchAndBound),
            registry: CancellationRegistry::new(),
            next_request_id: 1,
            in_flight: InFlight::default(),
            displayed: None,
            sender,
            receiver,
        }
    }

    /// Uses `engine` for the exact tier.
    pub fn with_exact_engine(mut self, engine: Arc<dyn ExactEngine>) -> Self {
        self.engine = engine;
        self
    }

    /// Tries `loader` for the exact tier, keeping the portable engine if it fails.
    pub fn with_engine_loader<F>(self, loader: F) -> Self
    where
        F: FnOnce() -> Result<Arc<dyn ExactEngine>>,
    {
        self.with_exact_engine(load_exact_engine(loader))
    }

    /// The configuration in use.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// The plan currently displayed, if any.
    pub fn displayed(&self) -> Option<&DisplayedPlan> {
        self.displayed.as_ref()
    }

    /// Whether any tier is still running.
    pub fn is_busy(&self) -> bool {
        self.in_flight.exact.is_some() || self.in_flight.approx.is_some()
    }

    /// Starts a new plan.
    ///
    /// Running tiers are cancelled first. The heuristic plan is displayed
    /// before this returns. Invalid input is rejected before anything is
    /// dispatched and clears the displayed plan.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn plan<C, S>(&mut self, cuts: C, stock_lengths: S, kerf: f64) -> Result<PlanTicket>
    where
        C: IntoIterator<Item = f64>,
        S: IntoIterator<Item = f64>,
    {
        self.cancel_all();

        let instance = match Instance::new(cuts, stock_lengths, kerf) {
            Ok(instance) => Arc::new(instance),
            Err(err) => {
                // The displayed plan belongs to the previous input.
                tracing::debug!(%err, "plan input rejected");
                self.displayed = None;
                return Err(err);
            }
        };
        let heuristic = heuristic::solve(&instance);
        self.displayed = Some(DisplayedPlan::from_heuristic(heuristic.clone()));

        let exact = match self.config.mode {
            SolverMode::Heuristic => TierDispatch::NotRequested,
            SolverMode::Exact | SolverMode::Auto => {
                let limit = self.config.max_cuts_for_exact;
                if instance.len() > limit {
                    let reason = format!(
                        "exact skipped: {} cuts exceeds limit {}",
                        instance.len(),
                        limit
                    );
                    tracing::info!(%reason);
                    if let Some(displayed) = self.displayed.as_mut() {
                        displayed.status = reason.clone();
                    }
                    TierDispatch::Skipped(reason)
                } else {
                    TierDispatch::Dispatched(self.dispatch_exact(&instance))
                }
            }
        };

        let approx = match self.config.mode {
            SolverMode::Auto => TierDispatch::Dispatched(self.dispatch_approx(&instance)),
            SolverMode::Heuristic | SolverMode::Exact => TierDispatch::NotRequested,
        };

        Ok(PlanTicket {
            heuristic,
            exact,
            approx,
        })
    }

    /// Cancels one request. Unknown or finished ids are ignored.
    pub fn cancel(&mut self, request_id: RequestId) -> bool {
        if let Some(tier) = self.in_flight.tier_of(request_id) {
            self.in_flight.clear(tier);
        }
        self.registry.cancel(request_id)
    }

    /// Cancels every running tier.
    pub fn cancel_all(&mut self) {
        self.registry.cancel_all();
        self.in_flight = InFlight::default();
    }

    /// Waits for the next change. `None` once no tier is running.
    pub async fn next_update(&mut self) -> Option<PlanUpdate> {
        while self.is_busy() {
            let message = self.receiver.recv().await?;
            if let Some(update) = self.apply(message) {
                return Some(update);
            }
        }
        None
    }

    /// Applies every message that has already arrived.
    pub fn poll_updates(&mut self) -> Vec<PlanUpdate> {
        let mut updates = Vec::new();
        while let Ok(message) = self.receiver.try_recv() {
            updates.extend(self.apply(message));
        }
        updates
    }

    /// Waits until no tier is running, returning every change on the way.
    pub async fn settle(&mut self) -> Vec<PlanUpdate> {
        let mut updates = Vec::new();
        while let Some(update) = self.next_update().await {
            updates.push(update);
        }
        updates
    }

    fn issue_request_id(&mut self) -> RequestId {
        let request_id = self.next_request_id;
        self.next_request_id += 1;
        request_id
    }

    fn dispatch_exact(&mut self, instance: &Arc<Instance>) -> RequestId {
        let request_id = self.issue_request_id();
        let stop = self.registry.register(request_id);
        let instance = Arc::clone(instance);
        let engine = Arc::clone(&self.engine);
        let config = self.config.exact.clone();
        let sender = self.sender.clone();

        tracing::info!(
            request_id,
            cuts = instance.len(),
            budget_ms = config.time_budget_ms,
            engine = engine.name(),
            "dispatching exact tier"
        );
        self.spawn_worker(Tier::Exact, request_id, move || {
            worker::solve_exact(request_id, &instance, engine.as_ref(), &config, &stop, &sender)
        });

        self.in_flight.exact = Some(request_id);
        request_id
    }

    fn dispatch_approx(&mut self, instance: &Arc<Instance>) -> RequestId {
        let request_id = self.issue_request_id();
        let stop = self.registry.register(request_id);
        let instance = Arc::clone(instance);
        let mut config = self.config.approx.clone();
        config.seed = config
            .seed
            .wrapping_add(request_id)
            .wrapping_add(instance.len() as u64);
        let sender = self.sender.clone();

        tracing::info!(
            request_id,
            cuts = instance.len(),
            budget_ms = config.time_budget_ms,
            seed = config.seed,
            "dispatching approx tier"
        );
        self.spawn_worker(Tier::Approximate, request_id, move || {
            worker::solve_approximate(request_id, &instance, &config, &stop, &sender)
        });

        self.in_flight.approx = Some(request_id);
        request_id
    }

    /// Runs `job` on the blocking pool. A worker that dies without reporting
    /// is turned into an error message for its request.
    fn spawn_worker<F>(&self, tier: Tier, request_id: RequestId, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = self.runtime.spawn_blocking(job);
        let sender = self.sender.clone();
        self.runtime.spawn(async move {
            if let Err(err) = handle.await {
                tracing::error!(request_id, %tier, %err, "worker stopped without reporting");
                let message = SolveMessage::Error {
                    request_id,
                    message: format!("{tier} worker stopped: {err}"),
                };
                if sender.send(message).is_err() {
                    tracing::trace!(request_id, "receiver dropped");
                }
            }
        });
    }

    fn apply(&mut self, message: SolveMessage) -> Option<PlanUpdate> {
        let request_id = message.request_id();
        let Some(tier) = self.in_flight.tier_of(request_id) else {
            tracing::trace!(request_id, "discarding stale message");
            return None;
        };

        match message {
            SolveMessage::Progress {
                iterations,
                incumbent_objective,
                ..
            } => Some(PlanUpdate::Progress {
                tier,
                request_id,
                iterations,
                incumbent_objective,
            }),
            SolveMessage::Improvement {
                candidate,
                elapsed_ms,
                ..
            } => {
                let status = format!("{tier} improved plan after {elapsed_ms:.0} ms");
                self.offer(
                    tier,
                    request_id,
                    candidate,
                    Algorithm::AnytimeLocalSearch,
                    Optimality::NotProven,
                    status,
                )
            }
            SolveMessage::Done { result, .. } => {
                self.in_flight.clear(tier);
                self.registry.release(request_id);
                Some(self.finish(tier, request_id, result))
            }
            SolveMessage::Error { message, .. } => {
                self.in_flight.clear(tier);
                self.registry.release(request_id);
                tracing::warn!(request_id, %tier, %message, "tier failed");
                if let Some(displayed) = self.displayed.as_mut() {
                    displayed.status = format!("{tier} failed: {message}");
                }
                Some(PlanUpdate::Failed {
                    tier,
                    request_id,
                    message,
                })
            }
        }
    }

    fn finish(&mut self, tier: Tier, request_id: RequestId, result: SolverResult) -> PlanUpdate {
        let proven = result.is_proven_optimal();
        let objective = result.objective();
        let elapsed_ms = result.elapsed_ms;
        let termination = result.termination;

        if tier == Tier::Exact && proven {
            if let Some(approx) = self.in_flight.approx {
                tracing::info!(request_id = approx, "exact proved optimality, cancelling approx");
                self.cancel(approx);
            }
        }

        let status = match (tier, termination) {
            (Tier::Exact, Termination::Completed) => {
                format!("exact proved optimal in {elapsed_ms:.0} ms")
            }
            _ => format!("{tier} {termination} after {elapsed_ms:.0} ms"),
        };

        if let Some(update) = self.offer(
            tier,
            request_id,
            result.solution,
            result.algorithm,
            result.optimality,
            status.clone(),
        ) {
            return update;
        }

        let Some(displayed) = self.displayed.as_mut() else {
            return PlanUpdate::Retained {
                tier,
                request_id,
                status,
            };
        };

        let status = if proven && (displayed.objective() - objective).abs() <= EPSILON {
            displayed.optimality = Optimality::ProvenOptimal;
            format!("current plan proven optimal by exact in {elapsed_ms:.0} ms")
        } else {
            if tier == Tier::Exact && displayed.source == PlanSource::Heuristic {
                displayed.source = PlanSource::HeuristicFallback;
            }
            format!("{status}; current plan retained")
        };
        displayed.status = status.clone();

        PlanUpdate::Retained {
            tier,
            request_id,
            status,
        }
    }

    /// Displays `solution` if it is strictly better than the current plan.
    fn offer(
        &mut self,
        tier: Tier,
        request_id: RequestId,
        solution: Solution,
        algorithm: Algorithm,
        optimality: Optimality,
        status: String,
    ) -> Option<PlanUpdate> {
        if let Some(displayed) = &self.displayed {
            if !solution.is_better_than(&displayed.solution) {
                return None;
            }
        }

        let objective = solution.objective();
        tracing::info!(request_id, %tier, objective, "replacing displayed plan");
        self.displayed = Some(DisplayedPlan {
            solution,
            algorithm,
            optimality,
            source: match tier {
                Tier::Exact => PlanSource::Exact,
                Tier::Approximate => PlanSource::Approximate,
            },
            status,
        });

        Some(PlanUpdate::Replaced {
            tier,
            request_id,
            objective,
        })
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.registry.cancel_all();
    }
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("engine", &self.engine.name())
            .field("next_request_id", &self.next_request_id)
            .field("in_flight", &self.in_flight)
            .finish_non_exhaustive()
    }
}
