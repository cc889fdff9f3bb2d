//! Experiment Runner for the Deconvolution of Synthetic Images.
//!
//! This executable generates a reproducible deconvolution problem (a known object
//! blurred by a box PSF plus Gaussian noise), minimizes the weighted convolution
//! cost with L-BFGS from a zero start, and records the progress of the optimizer
//! at every accepted iterate: cost, gradient norm, step length, and the distance
//! between the current estimate and the true object.

use anyhow::{Context, Result, ensure};
use clap::Parser;
use fft_deconv::algorithms::{LbfgsConfig, LineSearchConfig};
use fft_deconv::convolution::Shape;
use fft_deconv::solvers::{IterationReport, SolveOptions, minimize};
use fft_deconv::utils::synthetic::SyntheticProblem;
use serde::Serialize;
use std::path::PathBuf;

/// Command-line arguments for the deconvolution experiment.
#[derive(Parser, Debug)]
#[clap(
    name = "deconvolve",
    about = "Deconvolves a synthetic image with L-BFGS and records the convergence history."
)]
struct DeconvolveArgs {
    /// Dimensions of the image, comma separated (e.g. 64,64).
    #[clap(long, value_delimiter = ',', default_value = "64,64")]
    dims: Vec<usize>,

    /// Dimensions of the box PSF, comma separated, one per image axis.
    #[clap(long, value_delimiter = ',', default_value = "5,5")]
    psf_dims: Vec<usize>,

    /// Standard deviation of the noise added to the blurred image.
    #[clap(long, default_value_t = 0.01)]
    sigma: f64,

    /// Seed of the noise generator.
    #[clap(long, default_value_t = 42)]
    seed: u64,

    /// Number of correction pairs kept by L-BFGS.
    #[clap(long, default_value_t = 5)]
    memory: usize,

    /// Convergence threshold on the gradient norm, relative to the initial one.
    #[clap(long, default_value_t = 1e-6)]
    grtol: f64,

    /// Maximum number of L-BFGS iterations.
    #[clap(long, default_value_t = 500)]
    max_iterations: usize,

    /// Keep the previous iterate in dedicated vectors instead of the spare
    /// history slot.
    #[clap(long)]
    no_save_memory: bool,

    /// Path to the output CSV file where results will be written.
    #[clap(long, value_name = "PATH")]
    output: PathBuf,
}

/// Represents a single row of data for the convergence history CSV.
#[derive(Debug, Serialize)]
struct IterationRecord {
    iteration: usize,
    evaluations: usize,
    restarts: usize,
    cost: f64,
    gnorm: f64,
    /// Length of the accepted step.
    step: f64,
    /// Root mean square difference between the estimate and the true object.
    rmse: f64,
}

impl IterationRecord {
    fn new(report: &IterationReport, rmse: f64) -> Self {
        Self {
            iteration: report.iteration,
            evaluations: report.evaluations,
            restarts: report.restarts,
            cost: report.cost,
            gnorm: report.gnorm,
            step: report.step,
            rmse,
        }
    }
}

fn rmse(a: &[f64], b: &[f64]) -> f64 {
    let sum: f64 = a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum();
    (sum / a.len() as f64).sqrt()
}

/// The main entry point for the deconvolution experiment.
fn main() -> Result<()> {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .try_init()?;
    let args = DeconvolveArgs::parse();
    ensure!(
        args.dims.len() == args.psf_dims.len(),
        "The PSF has rank {} but the image has rank {}",
        args.psf_dims.len(),
        args.dims.len()
    );

    // 1. Generate the problem.
    let shape = Shape::new(&args.dims).context("Invalid image dimensions")?;
    let psf_shape = Shape::new(&args.psf_dims).context("Invalid PSF dimensions")?;
    log::info!(
        "Generating a {} image blurred by a {} box PSF (sigma = {}, seed = {})...",
        shape,
        psf_shape,
        args.sigma,
        args.seed
    );
    let problem = SyntheticProblem::generate(shape, psf_shape, args.sigma, args.seed)
        .context("Failed to generate the synthetic problem")?;
    let mut cost = problem.cost()?;

    // 2. Minimize, recording every accepted iterate.
    let config = LbfgsConfig::default()
        .with_memory(args.memory)
        .with_gatol(0.0)
        .with_grtol(args.grtol)
        .with_save_memory(!args.no_save_memory)
        .with_line_search(LineSearchConfig::default());
    let options = SolveOptions::default().with_max_iterations(args.max_iterations);

    let mut x = vec![0.0; problem.shape.number_of_elements()];
    let mut records = Vec::new();
    let outcome = minimize(&mut cost, &mut x, &config, &options, |report, x| {
        if report.iteration % 10 == 0 || report.converged {
            log::info!(
                "Iteration {}: f = {:e}, |g| = {:e}",
                report.iteration,
                report.cost,
                report.gnorm
            );
        }
        records.push(IterationRecord::new(report, rmse(x, &problem.object)));
        true
    })
    .context("L-BFGS could not be started")?;

    log::info!(
        "Finished ({}) after {} iterations, {} evaluations and {} restarts. Final RMSE: {:e}",
        outcome.reason,
        outcome.state.iterations,
        outcome.state.evaluations,
        outcome.state.restarts,
        rmse(&x, &problem.object)
    );
    if !outcome.reason.is_converged() {
        log::warn!("The optimizer stopped before convergence: {}", outcome.reason);
    }

    // 3. Write results to CSV.
    log::info!("Writing results to {:?}...", &args.output);
    let mut writer = csv::Writer::from_path(&args.output)
        .with_context(|| format!("Failed to create {:?}", args.output))?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;

    log::info!("Deconvolution experiment complete.");
    Ok(())
}
