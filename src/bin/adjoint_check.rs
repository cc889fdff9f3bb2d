//! Experiment Runner for the Adjoint Consistency of the Convolution Operator.
//!
//! The gradient of the weighted convolution cost is exact only if the operator
//! used in the backward pass is the true adjoint of the forward one. This
//! executable measures the mismatch `|⟨H·x, y⟩ - ⟨x, H*·y⟩|` over many random
//! geometries (workspace size, input and output windows, PSF size and values) for
//! ranks 1 to 3, in single or double precision, and writes one row per trial.

use anyhow::{Context, Result, ensure};
use clap::{Parser, ValueEnum};
use fft_deconv::convolution::{Convolution, Shape};
use fft_deconv::vector::{Real, Vector};
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::Serialize;
use std::path::PathBuf;

/// The floating-point type of the arrays.
#[derive(ValueEnum, Clone, Debug, Copy)]
enum Precision {
    F32,
    F64,
}

/// Command-line arguments for the adjoint consistency experiment.
#[derive(Parser, Debug)]
#[clap(
    name = "adjoint-check",
    about = "Measures the adjoint mismatch of the FFT convolution on random geometries."
)]
struct AdjointArgs {
    /// The floating-point type of the arrays.
    #[clap(long, value_enum, default_value_t = Precision::F64)]
    precision: Precision,

    /// Number of random trials per rank.
    #[clap(long, default_value_t = 20)]
    trials: usize,

    /// Largest workspace dimension along any axis.
    #[clap(long, default_value_t = 32)]
    max_dim: usize,

    /// Seed of the random generator.
    #[clap(long, default_value_t = 42)]
    seed: u64,

    /// Path to the output CSV file where results will be written.
    #[clap(long, value_name = "PATH")]
    output: PathBuf,
}

/// Represents a single row of data for the adjoint consistency CSV.
#[derive(Debug, Serialize)]
struct AdjointResult {
    rank: usize,
    trial: usize,
    /// The workspace dimensions, formatted as `d0xd1x...`.
    workspace: String,
    input: String,
    output: String,
    psf: String,
    /// ⟨H·x, y⟩
    forward: f64,
    /// ⟨x, H*·y⟩
    adjoint: f64,
    /// The mismatch divided by `|H·x|·|y|`.
    relative_error: f64,
}

/// A random sub-window of `outer`: its dimensions and its offset.
fn random_window(rng: &mut StdRng, outer: &[usize]) -> (Vec<usize>, Vec<usize>) {
    let dims: Vec<usize> = outer.iter().map(|&d| rng.random_range(1..=d)).collect();
    let offset = outer
        .iter()
        .zip(&dims)
        .map(|(&d, &n)| rng.random_range(0..=d - n))
        .collect();
    (dims, offset)
}

fn random_array<T: Real>(rng: &mut StdRng, n: usize) -> Vec<T> {
    (0..n)
        .map(|_| T::from_double(2.0 * rng.random::<f64>() - 1.0))
        .collect()
}

/// Runs one trial of the given rank and precision.
fn run_trial<T: Real>(
    rng: &mut StdRng,
    rank: usize,
    trial: usize,
    max_dim: usize,
) -> Result<AdjointResult> {
    let work: Vec<usize> = (0..rank).map(|_| rng.random_range(1..=max_dim)).collect();
    let (input, input_offset) = random_window(rng, &work);
    let (output, output_offset) = random_window(rng, &work);
    let psf_dims: Vec<usize> = work.iter().map(|&d| rng.random_range(1..=d.min(7))).collect();

    let work = Shape::new(&work)?;
    let input = Shape::new(&input)?;
    let output = Shape::new(&output)?;
    let psf_shape = Shape::new(&psf_dims)?;
    let center: Vec<usize> = psf_dims.iter().map(|d| d / 2).collect();

    let mut cnvl = Convolution::<T>::new(
        work.clone(),
        input.clone(),
        &input_offset,
        output.clone(),
        &output_offset,
    )
    .with_context(|| format!("Invalid geometry for trial {} of rank {}", trial, rank))?;
    let psf: Vec<T> = random_array(rng, psf_shape.number_of_elements());
    cnvl.set_psf(&psf, &psf_shape, &center, false)?;

    let x: Vec<T> = random_array(rng, input.number_of_elements());
    let y: Vec<T> = random_array(rng, output.number_of_elements());
    let mut hx = vec![T::zero(); output.number_of_elements()];
    cnvl.apply(&x, &mut hx, false)?;
    let mut hty = vec![T::zero(); input.number_of_elements()];
    cnvl.apply(&y, &mut hty, true)?;

    let forward = hx.dot(&y);
    let adjoint = x.dot(&hty);
    let scale = hx.norm2() * y.norm2();
    let relative_error = if scale > 0.0 {
        (forward - adjoint).abs() / scale
    } else {
        (forward - adjoint).abs()
    };

    Ok(AdjointResult {
        rank,
        trial,
        workspace: work.to_string(),
        input: input.to_string(),
        output: output.to_string(),
        psf: psf_shape.to_string(),
        forward,
        adjoint,
        relative_error,
    })
}

/// The main entry point for the adjoint consistency experiment.
fn main() -> Result<()> {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .try_init()?;
    let args = AdjointArgs::parse();
    ensure!(args.max_dim >= 1, "--max-dim must be at least 1");
    log::info!(
        "Starting adjoint consistency check: {} trials per rank, {:?} precision",
        args.trials,
        args.precision
    );

    let mut rng = StdRng::seed_from_u64(args.seed);
    let mut results = Vec::with_capacity(3 * args.trials);
    for rank in 1..=3 {
        // Keep the 3-D workspaces small.
        let max_dim = if rank == 3 { args.max_dim.min(12) } else { args.max_dim };
        let mut worst: f64 = 0.0;
        for trial in 0..args.trials {
            let result = match args.precision {
                Precision::F32 => run_trial::<f32>(&mut rng, rank, trial, max_dim)?,
                Precision::F64 => run_trial::<f64>(&mut rng, rank, trial, max_dim)?,
            };
            worst = worst.max(result.relative_error);
            results.push(result);
        }
        log::info!("Rank {}: worst relative mismatch {:e}", rank, worst);
    }

    log::info!("Writing results to {:?}...", &args.output);
    let mut writer = csv::Writer::from_path(&args.output)?;
    for record in results {
        writer.serialize(record)?;
    }
    writer.flush()?;

    log::info!("Adjoint consistency check complete.");
    Ok(())
}
