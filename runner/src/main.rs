//! Constellation Routing & Link-Attack Simulation CLI
//!
//! Runs the full phase pipeline once per expanded configuration and reports
//! how stealthy and how expensive flooding attacks on ISLs and on zone
//! bottlenecks are.
//!
//! Usage:
//!   lsn-sim --config config.json \
//!           --results-dir result_dumps \
//!           --output output/report.json

mod config;
mod report;

use anyhow::{Context, Result};
use clap::Parser;
use config::RunConfig;
use report::{Report, RunReport};
use sim_phases::{
    keys, AtkData, CoveragePhase, EdgePhase, GridPhase, LinkAttackPhase, LsnPhase, PairSelection,
    RoutingPhase, TrafficPhase, ZoneAtkData, ZoneAttackPhase,
};
use sim_pipeline::{Phase, PhaseSettings, Pipeline, PipelineError};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Chunk granularity exponents of the parallel phases
const ROUTING_GRANULARITY: u32 = 2;
const EDGES_GRANULARITY: u32 = 1;
const ATTACK_GRANULARITY: u32 = 3;
const ZONE_GRANULARITY: u32 = 4;

#[derive(Parser, Debug)]
#[command(
    name = "lsn-sim",
    about = "Simulate routing and link-flooding attacks over a satellite constellation"
)]
struct Args {
    /// Configuration JSON file (built-in reference configuration when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory for persisted phase outputs, one subdirectory per run
    #[arg(short, long, default_value = "result_dumps")]
    results_dir: PathBuf,

    /// Output JSON report
    #[arg(short, long, default_value = "output/report.json")]
    output: PathBuf,

    /// Worker threads for parallel phases (default: available parallelism)
    #[arg(long)]
    cores: Option<usize>,

    /// Reuse persisted phase outputs instead of recomputing them
    #[arg(long)]
    resume: bool,

    /// Route at most this many pairs, sampled evenly
    #[arg(long)]
    max_pairs: Option<usize>,

    /// Seed for the mixture routing strategy
    #[arg(long)]
    seed: Option<u64>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn core_count(&self) -> usize {
        self.cores
            .unwrap_or_else(|| std::thread::available_parallelism().map_or(1, NonZeroUsize::get))
    }

    fn settings(&self, parallel: Option<u32>) -> PhaseSettings {
        let settings = match parallel {
            Some(exponent) => PhaseSettings::parallel(self.core_count(), exponent),
            None => PhaseSettings::default(),
        };
        if self.resume {
            settings.inactive()
        } else {
            settings
        }
    }
}

fn build_phases(run: &RunConfig, args: &Args) -> Vec<Box<dyn Phase>> {
    let selection = PairSelection::AllPairs {
        max_pairs: args.max_pairs,
    };
    vec![
        Box::new(LsnPhase::new(args.settings(None), run.lsn.strategy())),
        Box::new(GridPhase::new(
            args.settings(None),
            run.grid.strategy(),
            run.gweight.strategy(),
        )),
        Box::new(CoveragePhase::new(args.settings(None), run.cover.strategy())),
        Box::new(RoutingPhase::new(
            args.settings(Some(ROUTING_GRANULARITY)),
            run.rout.strategy(args.seed),
            selection,
        )),
        Box::new(EdgePhase::new(
            args.settings(Some(EDGES_GRANULARITY)),
            run.edges.strategy(),
        )),
        Box::new(TrafficPhase::new(
            args.settings(None),
            run.bw_sel.strategy(),
            run.bw_asg.strategy(),
        )),
        Box::new(LinkAttackPhase::new(
            args.settings(Some(ATTACK_GRANULARITY)),
            run.link_attack(),
        )),
        Box::new(ZoneAttackPhase::new(
            args.settings(Some(ZONE_GRANULARITY)),
            run.zone_attack(),
        )),
    ]
}

/// Attach the failing phase and key to a pipeline error
fn pipeline_failure(err: PipelineError) -> anyhow::Error {
    let context = match err.location() {
        Some((phase, key)) => format!("Phase {} failed on property {}", phase, key),
        None => "Pipeline failed".to_string(),
    };
    anyhow::Error::new(err).context(context)
}

fn simulate(idx: usize, run: &RunConfig, args: &Args) -> Result<RunReport> {
    let dir = args.results_dir.join(format!("run-{:02}", idx + 1));
    let mut pipeline = Pipeline::new(build_phases(run, args), &dir).map_err(pipeline_failure)?;
    pipeline.run().map_err(pipeline_failure)?;
    info!("Computation finished");

    let atk = pipeline
        .store()
        .get::<AtkData>(keys::ATK_DATA)
        .map_err(pipeline_failure)?;
    let zatk = pipeline
        .store()
        .get::<ZoneAtkData>(keys::ZONE_ATK_DATA)
        .map_err(pipeline_failure)?;
    let detectability = report::detectability(&atk, run.bw_asg.udl_bw());
    let cost = report::cost(&atk, run.bw_asg.isl_bw());
    let zone_detectability = report::zone_detectability(&zatk, run.bw_asg.udl_bw());

    let label = run.rout.label();
    info!("{} Detectability PDF -> P(X<=0.1)={}", label, detectability);
    info!("{} Cost PDF -> P(X>=0.9)={}", label, cost);
    info!("{} Zone detectability PDF -> P(X<=0.1)={}", label, zone_detectability);

    Ok(RunReport {
        run: idx + 1,
        routing: label.to_string(),
        detectability,
        cost,
        zone_detectability,
        phases: pipeline.reports().to_vec(),
    })
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging; RUST_LOG overrides --verbose
    let level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("{}", "=".repeat(60));
    info!("LSN Routing & Link-Attack Simulator");
    info!("{}", "=".repeat(60));

    let config = match &args.config {
        Some(path) => config::load(path)?,
        None => config::default_config(),
    };
    let runs = config::expand(&config)?;
    info!("{} configuration(s), {} worker thread(s)", runs.len(), args.core_count());

    let mut reports = Vec::with_capacity(runs.len());
    for (idx, raw) in runs.into_iter().enumerate() {
        let run = RunConfig::from_value(raw).with_context(|| format!("Configuration number {}", idx + 1))?;

        info!("{}", "-".repeat(60));
        info!("Configuration number {} - {}", idx + 1, run.rout.label());

        let report = simulate(idx, &run, &args).with_context(|| format!("Configuration number {}", idx + 1))?;
        reports.push(report);
    }

    info!("\nWriting report to {:?}", args.output);
    let report = Report::new(reports);
    report.write(&args.output)?;

    // Summary
    info!("\n{}", "=".repeat(60));
    info!("SUMMARY");
    info!("{}", "=".repeat(60));
    for run in &report.runs {
        info!(
            "  {:>2} {:8} | detectability {} | cost {} | zone detectability {}",
            run.run, run.routing, run.detectability, run.cost, run.zone_detectability
        );
    }

    Ok(())
}
