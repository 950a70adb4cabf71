//! cut-planner - plan linear cuts from stock lengths.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::io::Read;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc::unbounded_channel;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cut_planner_1d::{
    heuristic, worker, AnytimeImprover, BranchAndBound, CancellationToken, Instance,
    Orchestrator, OrchestratorConfig, PlanUpdate, SolveMessage, SolveRequest, Solution,
    Termination, EPSILON,
};

/// Plan linear cuts from stock lengths with as little waste as possible.
#[derive(Parser, Debug)]
#[command(name = "cut-planner")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Orchestrator configuration (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one solver on a request and print every message as a JSON line
    Solve {
        /// Solver to run
        #[arg(short, long, value_enum, default_value_t = SolveTier::Heuristic)]
        tier: SolveTier,

        /// Request file; stdin when absent
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// Run the full orchestration on a request and print the final plan
    Plan {
        /// Request file; stdin when absent
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// Compare the heuristic with the exact solver on random instances
    Compare {
        #[command(flatten)]
        sample: SampleArgs,

        /// Cut counts to test
        #[arg(long, value_delimiter = ',', default_value = "8,12,16,20")]
        sizes: Vec<usize>,

        /// Exact time budget per instance
        #[arg(long, default_value = "1200")]
        budget_ms: u64,
    },

    /// Compare the heuristic with the approximate improver on random instances
    BenchApprox {
        #[command(flatten)]
        sample: SampleArgs,

        /// Cut counts to test
        #[arg(long, value_delimiter = ',', default_value = "20,40,80")]
        sizes: Vec<usize>,

        /// Approximate time budget per instance
        #[arg(long, default_value = "1000")]
        budget_ms: u64,

        /// Iteration cap per instance
        #[arg(long, default_value = "2000")]
        iterations: u64,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum SolveTier {
    Heuristic,
    Exact,
    Approx,
}

#[derive(clap::Args, Debug)]
struct SampleArgs {
    /// Instances per size
    #[arg(long, default_value = "200")]
    samples: usize,

    /// Blade width
    #[arg(long, default_value = "0.125")]
    kerf: f64,

    /// Shortest random cut
    #[arg(long, default_value = "12")]
    min_cut: u32,

    /// Longest random cut
    #[arg(long, default_value = "96")]
    max_cut: u32,

    /// Stock lengths
    #[arg(long, value_delimiter = ',', default_value = "96,120,144")]
    stock: Vec<f64>,

    /// Random seed
    #[arg(long, default_value = "20260207")]
    seed: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => OrchestratorConfig::default(),
    };

    match args.command {
        Command::Solve { tier, input } => solve(tier, input.as_deref(), &config).await,
        Command::Plan { input } => plan(input.as_deref(), config).await,
        Command::Compare {
            sample,
            sizes,
            budget_ms,
        } => compare(&sample, &sizes, budget_ms, &config),
        Command::BenchApprox {
            sample,
            sizes,
            budget_ms,
            iterations,
        } => bench_approx(&sample, &sizes, budget_ms, iterations, &config),
    }
}

fn load_config(path: &Path) -> Result<OrchestratorConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Failed to parse {}", path.display()))
}

fn read_request(input: Option<&Path>) -> Result<SolveRequest> {
    let text = match input {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("Failed to read request from stdin")?;
            text
        }
    };
    serde_json::from_str(&text).context("Failed to parse request")
}

fn print_message(message: &SolveMessage) -> Result<()> {
    println!("{}", serde_json::to_string(message)?);
    Ok(())
}

async fn solve(tier: SolveTier, input: Option<&Path>, config: &OrchestratorConfig) -> Result<()> {
    let request = read_request(input)?;
    info!(request_id = request.request_id, cuts = request.cuts.len(), ?tier, "solving");

    if tier == SolveTier::Heuristic {
        let message = match request.instance() {
            Ok(instance) => SolveMessage::Done {
                request_id: request.request_id,
                result: heuristic::solve(&instance),
            },
            Err(err) => SolveMessage::Error {
                request_id: request.request_id,
                message: err.to_string(),
            },
        };
        return print_message(&message);
    }

    let (sender, mut receiver) = unbounded_channel();
    let stop = CancellationToken::new();
    let exact = config.exact.clone();
    let approx = config.approx.clone();

    let handle = tokio::task::spawn_blocking(move || match tier {
        SolveTier::Exact => worker::run_exact(&request, &BranchAndBound, &exact, &stop, &sender),
        _ => worker::run_approximate(&request, &approx, &stop, &sender),
    });

    while let Some(message) = receiver.recv().await {
        print_message(&message)?;
    }
    handle.await.context("Solver task failed")?;

    Ok(())
}

async fn plan(input: Option<&Path>, config: OrchestratorConfig) -> Result<()> {
    let request = read_request(input)?;
    let mut orchestrator = Orchestrator::new(config, tokio::runtime::Handle::current());

    let ticket = orchestrator.plan(
        request.cuts.iter().copied(),
        request.stock_lengths.iter().copied(),
        request.kerf,
    )?;
    info!(
        objective = ticket.heuristic.objective(),
        exact = ?ticket.exact,
        approx = ?ticket.approx,
        "heuristic plan ready"
    );

    while let Some(update) = orchestrator.next_update().await {
        match update {
            PlanUpdate::Progress { .. } => {}
            PlanUpdate::Replaced {
                tier, objective, ..
            } => info!(%tier, objective, "plan replaced"),
            PlanUpdate::Retained { tier, status, .. } => info!(%tier, %status, "plan retained"),
            PlanUpdate::Failed { tier, message, .. } => warn!(%tier, %message, "tier failed"),
        }
    }

    let displayed = orchestrator
        .displayed()
        .context("No plan was displayed")?;
    println!("{}", serde_json::to_string_pretty(displayed)?);
    Ok(())
}

fn random_instance(rng: &mut ChaCha8Rng, size: usize, sample: &SampleArgs) -> Result<Instance> {
    let low = sample.min_cut.min(sample.max_cut);
    let high = sample.min_cut.max(sample.max_cut);
    let cuts: Vec<f64> = (0..size)
        .map(|_| f64::from(rng.gen_range(low..=high)))
        .collect();
    Instance::new(cuts, sample.stock.iter().copied(), sample.kerf)
        .context("Random instance is not plannable; check --stock and --max-cut")
}

fn improvement(heuristic: &Solution, other: &Solution) -> f64 {
    let base = heuristic.objective();
    if base > EPSILON {
        (base - other.objective()) / base
    } else {
        0.0
    }
}

fn percentile(values: &mut [f64], fraction: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(f64::total_cmp);
    let rank = ((values.len() as f64 * fraction).ceil() as usize).clamp(1, values.len());
    values[rank - 1]
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn compare(
    sample: &SampleArgs,
    sizes: &[usize],
    budget_ms: u64,
    config: &OrchestratorConfig,
) -> Result<()> {
    let mut rng = ChaCha8Rng::seed_from_u64(sample.seed);
    let exact = config.exact.clone().with_time_budget_ms(budget_ms);
    let stop = CancellationToken::new();

    println!(
        "size,total,exact_completed,exact_timed_out,improved,equal,worse,improved_rate,avg_obj_improvement_pct,p95_obj_improvement_pct,bin_count_improved"
    );

    for &size in sizes {
        let (mut completed, mut timed_out) = (0usize, 0usize);
        let (mut improved, mut equal, mut worse, mut fewer_bins) = (0usize, 0usize, 0usize, 0usize);
        let mut lifts = Vec::new();

        for _ in 0..sample.samples {
            let instance = random_instance(&mut rng, size, sample)?;
            let baseline = heuristic::best_fit_decreasing(&instance);
            let result = BranchAndBound.run(&instance, &exact, &stop);

            if result.termination != Termination::Completed {
                timed_out += 1;
                continue;
            }
            completed += 1;

            let delta = baseline.objective() - result.objective();
            if delta > EPSILON {
                improved += 1;
                lifts.push(improvement(&baseline, &result.solution));
                if result.solution.bin_count < baseline.bin_count {
                    fewer_bins += 1;
                }
            } else if delta < -EPSILON {
                worse += 1;
            } else {
                equal += 1;
            }
        }

        let rate = if completed > 0 {
            improved as f64 / completed as f64
        } else {
            0.0
        };
        let average = mean(&lifts);
        let p95 = percentile(&mut lifts, 0.95);
        println!(
            "{size},{},{completed},{timed_out},{improved},{equal},{worse},{:.1}%,{:.2}%,{:.2}%,{fewer_bins}",
            sample.samples,
            rate * 100.0,
            average * 100.0,
            p95 * 100.0,
        );
        if worse > 0 {
            warn!(size, worse, "exact finished worse than the heuristic");
        }
    }

    Ok(())
}

fn bench_approx(
    sample: &SampleArgs,
    sizes: &[usize],
    budget_ms: u64,
    iterations: u64,
    config: &OrchestratorConfig,
) -> Result<()> {
    let mut rng = ChaCha8Rng::seed_from_u64(sample.seed);
    let stop = CancellationToken::new();

    println!("size,total,improved,improved_rate,avg_obj_improvement_pct,p95_obj_improvement_pct,timed_out,avg_elapsed_ms");

    for &size in sizes {
        let mut improved = 0usize;
        let mut timed_out = 0usize;
        let mut lifts = Vec::new();
        let mut elapsed = Vec::new();

        for index in 0..sample.samples {
            let instance = random_instance(&mut rng, size, sample)?;
            let baseline = heuristic::best_fit_decreasing(&instance);
            let improver = AnytimeImprover::new(
                config
                    .approx
                    .clone()
                    .with_time_budget_ms(budget_ms)
                    .with_max_iterations(iterations)
                    .with_seed(sample.seed.wrapping_add(index as u64))
                    .with_deterministic(true),
            );
            let result = improver.run(&instance, &stop, &mut ());

            if result.termination == Termination::TimedOut {
                timed_out += 1;
            }
            elapsed.push(result.elapsed_ms);
            let lift = improvement(&baseline, &result.solution);
            if lift > EPSILON {
                improved += 1;
                lifts.push(lift);
            }
        }

        let rate = if sample.samples > 0 {
            improved as f64 / sample.samples as f64
        } else {
            0.0
        };
        let average = mean(&lifts);
        let p95 = percentile(&mut lifts, 0.95);
        println!(
            "{size},{},{improved},{:.1}%,{:.2}%,{:.2}%,{timed_out},{:.1}",
            sample.samples,
            rate * 100.0,
            average * 100.0,
            p95 * 100.0,
            mean(&elapsed),
        );
    }

    Ok(())
}
