//! Messages exchanged with background solver workers.
//!
//! A worker receives one [`SolveRequest`] and emits zero or more
//! progress/improvement messages followed by at most one terminal message
//! (`Done` or `Error`). A cancelled request emits no terminal message.

use super::*;

/// Identifies one background solve. Issued from a single increasing counter.
pub type RequestId = u64;

/// Input for one background solve.
#[cfg_attr(feature = "serialize", derive(Deserialize, Serialize))]
#[cfg_attr(feature = "serialize", serde(rename_all = "camelCase"))]
#[derive(Clone, Debug, PartialEq)]
pub struct SolveRequest {
    /// Id echoed in every message for this request.
    pub request_id: RequestId,

    /// Required cut lengths, in any order.
    pub cuts: Vec<f64>,

    /// Available stock lengths.
    pub stock_lengths: Vec<f64>,

    /// Blade width.
    pub kerf: f64,

    /// Wall-clock budget in milliseconds.
    pub time_budget_ms: u64,

    /// Random seed for the approximate tier.
    #[cfg_attr(feature = "serialize", serde(default, skip_serializing_if = "Option::is_none"))]
    pub seed: Option<u64>,
}

impl SolveRequest {
    /// Validates the request payload.
    pub fn instance(&self) -> Result<Instance> {
        Instance::new(
            self.cuts.iter().copied(),
            self.stock_lengths.iter().copied(),
            self.kerf,
        )
    }
}

/// Everything a worker can send back.
#[cfg_attr(feature = "serialize", derive(Deserialize, Serialize))]
#[cfg_attr(
    feature = "serialize",
    serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")
)]
#[derive(Clone, Debug, PartialEq)]
pub enum SolveMessage {
    /// Periodic heartbeat from the approximate tier.
    Progress {
        /// Request this belongs to.
        request_id: RequestId,
        /// Time since the worker started.
        elapsed_ms: f64,
        /// Iterations started so far.
        iterations: u64,
        /// Improvements found so far.
        improvements: u64,
        /// Objective of the current incumbent.
        incumbent_objective: f64,
    },

    /// A strictly better plan was found.
    Improvement {
        /// Request this belongs to.
        request_id: RequestId,
        /// The new incumbent.
        candidate: Solution,
        /// Time since the worker started.
        elapsed_ms: f64,
        /// Iterations completed when it was found.
        iterations: u64,
        /// Objective of `candidate`.
        objective: f64,
    },

    /// Terminal success.
    Done {
        /// Request this belongs to.
        request_id: RequestId,
        /// Final result.
        result: SolverResult,
    },

    /// Terminal failure, e.g. infeasible input.
    Error {
        /// Request this belongs to.
        request_id: RequestId,
        /// Human readable reason.
        message: String,
    },
}

impl SolveMessage {
    /// The request this message belongs to.
    pub fn request_id(&self) -> RequestId {
        match self {
            SolveMessage::Progress { request_id, .. }
            | SolveMessage::Improvement { request_id, .. }
            | SolveMessage::Done { request_id, .. }
            | SolveMessage::Error { request_id, .. } => *request_id,
        }
    }

    /// Whether no more messages follow for this request.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SolveMessage::Done { .. } | SolveMessage::Error { .. })
    }
}
