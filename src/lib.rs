//! cut-planner-1d works out how to cut linear cut lengths from a catalog of linear
//! stock lengths while wasting as little material and blade width (kerf) as possible.
//!
//! Three solvers share one plan model:
//!
//! - [`heuristic`]: Best-Fit-Decreasing, instant and deterministic. Always gives a usable plan.
//! - [`exact`]: branch-and-bound that proves optimality, or reports that it ran out of time.
//! - [`approx`]: anytime local search that keeps improving a plan until a deadline.
//!
//! The [`Orchestrator`] runs the slow solvers in the background on a tokio runtime and only
//! ever swaps the displayed plan for a strictly better one.
//!
//! ```
//! use cut_planner_1d::Planner;
//!
//! let solution = Planner::new()
//!     .add_stock_lengths([96.0, 120.0])
//!     .add_cuts([60.0, 60.0, 36.0])
//!     .set_kerf(0.125)
//!     .heuristic()
//!     .unwrap();
//!
//! assert_eq!(solution.bin_count, 3);
//! ```

#![deny(missing_docs)]

pub mod approx;
mod cancel;
pub mod exact;
pub mod heuristic;
mod instance;
mod orchestrator;
mod plan;
mod planner;
pub mod protocol;
pub mod worker;


pub use approx::{AnytimeImprover, ApproxConfig, ImprovementReport, ProgressReport, SearchObserver};
pub use cancel::{CancellationRegistry, CancellationToken};
pub use exact::{load_exact_engine, BranchAndBound, ExactConfig, ExactEngine};
pub use instance::{Instance, StockCatalog};
pub use orchestrator::{
    DisplayedPlan, Orchestrator, OrchestratorConfig, PlanSource, PlanTicket, PlanUpdate,
    SolverMode, Tier, TierDispatch,
};
pub use plan::{Algorithm, Bin, Optimality, Solution, SolverResult, SolverStats, Termination};
pub use planner::Planner;
pub use protocol::{RequestId, SolveMessage, SolveRequest};

#[cfg(feature = "serialize")]
use serde::{Deserialize, Serialize};
use std::fmt;

/// Numerical tolerance used for every capacity and objective comparison.
pub const EPSILON: f64 = 1e-9;

/// Which kind of length failed validation.
#[cfg_attr(feature = "serialize", derive(Deserialize, Serialize))]
#[cfg_attr(feature = "serialize", serde(rename_all = "snake_case"))]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LengthKind {
    /// A required cut length.
    Cut,
    /// A stock length.
    Stock,
}

impl fmt::Display for LengthKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LengthKind::Cut => write!(f, "cut"),
            LengthKind::Stock => write!(f, "stock"),
        }
    }
}

/// Error while planning.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// No stock lengths were supplied.
    #[error("no stock lengths available")]
    EmptyStock,

    /// No cuts were supplied.
    #[error("no cuts to plan")]
    NoCuts,

    /// A length was zero, negative or not a number.
    #[error("invalid {kind} length {value}")]
    InvalidLength {
        /// Whether the length was a cut or a stock length.
        kind: LengthKind,
        /// The offending value.
        value: f64,
    },

    /// Kerf was negative or not a number.
    #[error("kerf must be 0 or greater, got {0}")]
    InvalidKerf(f64),

    /// A cut is longer than every stock length.
    #[error("cut {cut:.3} exceeds all configured stock lengths (longest is {longest:.3})")]
    CutExceedsStock {
        /// The cut that does not fit.
        cut: f64,
        /// The longest stock length available.
        longest: f64,
    },

    /// An optional exact-solver backend could not be loaded.
    #[error("exact engine unavailable: {0}")]
    EngineUnavailable(String),
}

impl Error {
    /// Whether the error means the input itself can never be planned.
    pub fn is_infeasible_input(&self) -> bool {
        !matches!(self, Error::EngineUnavailable(_))
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
