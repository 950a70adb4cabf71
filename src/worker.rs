//! Blocking entry points that turn a [`SolveRequest`] into [`SolveMessage`]s.
//!
//! These run on whatever thread calls them; the orchestrator puts them on
//! tokio's blocking pool. A request whose token is cancelled produces no
//! further messages, including no terminal one.

use super::*;

use tokio::sync::mpsc::UnboundedSender;

/// Runs the exact tier for `request`.
///
/// `request.time_budget_ms` overrides the budget in `config`.
pub fn run_exact(
    request: &SolveRequest,
    engine: &dyn ExactEngine,
    config: &ExactConfig,
    stop: &CancellationToken,
    sender: &UnboundedSender<SolveMessage>,
) {
    let config = config.clone().with_time_budget_ms(request.time_budget_ms);
    match request.instance() {
        Ok(instance) => solve_exact(request.request_id, &instance, engine, &config, stop, sender),
        Err(err) => Outbox::new(request.request_id, stop, sender).finish(Err(err)),
    }
}

/// Runs the approximate tier for `request`.
///
/// `request.time_budget_ms` and, when present, `request.seed` override `config`.
pub fn run_approximate(
    request: &SolveRequest,
    config: &ApproxConfig,
    stop: &CancellationToken,
    sender: &UnboundedSender<SolveMessage>,
) {
    let mut config = config.clone().with_time_budget_ms(request.time_budget_ms);
    if let Some(seed) = request.seed {
        config.seed = seed;
    }

    match request.instance() {
        Ok(instance) => solve_approximate(request.request_id, &instance, &config, stop, sender),
        Err(err) => Outbox::new(request.request_id, stop, sender).finish(Err(err)),
    }
}

#[tracing::instrument(level = "debug", skip_all, fields(request_id = request_id))]
pub(crate) fn solve_exact(
    request_id: RequestId,
    instance: &Instance,
    engine: &dyn ExactEngine,
    config: &ExactConfig,
    stop: &CancellationToken,
    sender: &UnboundedSender<SolveMessage>,
) {
    if stop.is_cancelled() {
        return;
    }
    Outbox::new(request_id, stop, sender).finish(engine.solve(instance, config, stop));
}

#[tracing::instrument(level = "debug", skip_all, fields(request_id = request_id))]
pub(crate) fn solve_approximate(
    request_id: RequestId,
    instance: &Instance,
    config: &ApproxConfig,
    stop: &CancellationToken,
    sender: &UnboundedSender<SolveMessage>,
) {
    if stop.is_cancelled() {
        return;
    }
    let mut outbox = Outbox::new(request_id, stop, sender);
    let result = AnytimeImprover::new(config.clone()).run(instance, stop, &mut outbox);
    outbox.finish(Ok(result));
}

/// Sends messages for one request unless it has been cancelled.
struct Outbox<'a> {
    request_id: RequestId,
    stop: &'a CancellationToken,
    sender: &'a UnboundedSender<SolveMessage>,
}

impl<'a> Outbox<'a> {
    fn new(
        request_id: RequestId,
        stop: &'a CancellationToken,
        sender: &'a UnboundedSender<SolveMessage>,
    ) -> Self {
        Outbox {
            request_id,
            stop,
            sender,
        }
    }

    fn send(&self, message: SolveMessage) {
        if self.stop.is_cancelled() {
            return;
        }
        if self.sender.send(message).is_err() {
            tracing::trace!(request_id = self.request_id, "receiver dropped");
        }
    }

    fn finish(&self, outcome: Result<SolverResult>) {
        match outcome {
            Ok(result) => {
                tracing::debug!(
                    termination = %result.termination,
                    objective = result.objective(),
                    elapsed_ms = result.elapsed_ms,
                    "worker finished"
                );
                self.send(SolveMessage::Done {
                    request_id: self.request_id,
                    result,
                });
            }
            Err(err) => {
                tracing::debug!(%err, "worker rejected request");
                self.send(SolveMessage::Error {
                    request_id: self.request_id,
                    message: err.to_string(),
                });
            }
        }
    }
}

impl SearchObserver for Outbox<'_> {
    fn on_progress(&mut self, report: ProgressReport) {
        self.send(SolveMessage::Progress {
            request_id: self.request_id,
            elapsed_ms: report.elapsed_ms,
            iterations: report.iterations,
            improvements: report.improvements,
            incumbent_objective: report.incumbent_objective,
        });
    }

    fn on_improvement(&mut self, report: ImprovementReport) {
        self.send(SolveMessage::Improvement {
            request_id: self.request_id,
            candidate: report.candidate,
            elapsed_ms: report.elapsed_ms,
            iterations: report.iterations,
            objective: report.objective,
        });
    }
}
