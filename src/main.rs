use std::process::ExitCode;
use clap::Parser;
use log::{error, info};
use qmc_linopt::optimize::{OptimizationReport, RecordingMetrics};
use qmc_linopt::{read_config, CorrelatedSamplingCost, LinearOptimizer, OptimizableWfn, RunConfig, VmcSampler};

#[derive(Parser, Debug)]
#[command(version, about = "Linear-method optimization of an H2 trial wavefunction", long_about = None)]
struct Args {
    /// YAML run configuration; built-in defaults when omitted
    #[arg(short, long)]
    config: Option<String>,

    /// Override optimizer.max_iterations
    #[arg(long)]
    max_iterations: Option<usize>,

    /// Override sampling.seed
    #[arg(long)]
    seed: Option<u64>,
}

const HA_TO_EV: f64 = 27.21138602;

fn run(args: &Args) -> qmc_linopt::Result<(OptimizationReport, RecordingMetrics)> {
    let mut config = match &args.config {
        Some(path) => read_config(path)?,
        None => RunConfig::default(),
    };
    if let Some(n) = args.max_iterations {
        config.optimizer.max_iterations = n;
    }
    if let Some(seed) = args.seed {
        config.sampling.seed = seed;
    }
    config.validate()?;

    let wfn = config.system.build();
    info!("initial parameters [c, alpha, F] = {:?}", wfn.get_params());
    let sampler = VmcSampler::new(wfn.clone(), config.sampling.clone());
    let cost = CorrelatedSamplingCost::new(wfn, config.cost.clone());
    let mut optimizer = LinearOptimizer::new(sampler, cost)?
        .with_config(config.optimizer.clone())
        .with_stabilizer(config.stabilizer.clone())
        .with_eigen(config.eigen.clone())
        .with_sample_policy(config.sampling.policy())
        .with_metrics(RecordingMetrics::new());
    let report = optimizer.run()?;
    let (_, _, metrics) = optimizer.into_parts();
    Ok((report, metrics))
}

fn main() -> ExitCode {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .format_timestamp_millis()
        .init();

    let args = Args::parse();
    let (report, metrics) = match run(&args) {
        Ok(out) => out,
        Err(e) => {
            error!("optimization aborted: {}", e);
            return ExitCode::FAILURE;
        }
    };

    println!("Linear optimization of H2 (Psi_MO + c Psi_VB)");
    println!("----------------------------------------------");
    println!("{:>4} {:>12} {:>10} {:>12} {:>10} {:>4}", "iter", "energy", "variance", "cost", "shift", "fit");
    for r in &report.history {
        println!(
            "{:>4} {:>12.6} {:>10.5} {:>12.6} {:>10.2e} {:>4}",
            r.iteration,
            r.energy,
            r.variance,
            r.cost,
            r.shift,
            if r.fitted { "yes" } else { "no" }
        );
    }
    println!("Converged: {}", report.converged);
    println!("Final parameters [c, alpha, F]: {:?}", report.parameters);
    if let Some(cost) = report.final_cost() {
        println!("Final energy: {:.6} Ha", cost);
        println!("Binding energy: {:.6} eV", HA_TO_EV * (cost + 1.0));
    }
    println!("\nTime per stage:\n{}", metrics.summary());
    ExitCode::SUCCESS
}
