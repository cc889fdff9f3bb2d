//! Integration test suite to verify the mathematical correctness of the convolution
//! operators, of the weighted cost and of the L-BFGS optimizer.
//!
//! # Test Methodology
//!
//! The convolution `H = R·F⁻¹·diag(MTF)·F·S` is never formed as a matrix, so its
//! correctness is checked through identities that any correct implementation must
//! satisfy:
//! 1.  **Adjoint identity:** For random `x` in the input space and `y` in the output
//!     space, `⟨H·x, y⟩ = ⟨x, H*·y⟩`. This holds for any PSF and any placement of the
//!     input and output windows, and is what makes the gradient of the weighted cost
//!     exact. It is checked for ranks 1, 2 and 3, and once in single precision.
//! 2.  **Gradient consistency:** The analytic gradient returned by
//!     `cost_and_gradient` must agree with central finite differences of `cost`.
//!     Since the cost is quadratic, central differences are exact up to rounding.
//! 3.  **Identity PSF:** A unit impulse centered at the origin must leave any input
//!     unchanged, which pins the pairing of the forward and backward transforms and
//!     the `1/N` scaling of the MTF.
//!
//! The optimizer is then validated end to end on problems whose solution is known:
//! an isotropic quadratic, which L-BFGS must solve in a handful of iterations, and
//! a synthetic deconvolution problem.
//!
//! All random inputs come from a generator with a fixed seed, so the tests are
//! deterministic.

use anyhow::{Context, Result, ensure};
use faer::Mat;
use fft_deconv::algorithms::LbfgsConfig;
use fft_deconv::convolution::{Convolution, Shape, WeightedConvolutionCost};
use fft_deconv::solvers::{DifferentiableCost, SolveOptions, StopReason, minimize};
use fft_deconv::utils::synthetic::SyntheticProblem;
use fft_deconv::vector::{Real, Vector};
use rand::{Rng, SeedableRng, rngs::StdRng};

/// Tolerance on the relative mismatch of the two sides of the adjoint identity.
///
/// Both sides are computed through one forward and one inverse FFT, whose rounding
/// errors grow like `log(N)·ε`. For the small workspaces used here this is far
/// below `1e-12`.
const ADJOINT_TOLERANCE: f64 = 1e-12;

/// Same as [`ADJOINT_TOLERANCE`] for single-precision arrays, where `ε ≈ 6e-8`.
const ADJOINT_TOLERANCE_F32: f64 = 1e-5;

/// Tolerance on the relative error of the identity convolution.
const IDENTITY_TOLERANCE: f64 = 1e-9;

/// Tolerance on the relative error between the analytic and finite-difference
/// gradients.
///
/// The finite-difference step `h = 1e-4` makes the rounding error of the central
/// difference of order `ε·|f|/h ≈ 1e-12·|f|`, while the truncation error vanishes
/// for a quadratic cost.
const GRADIENT_TOLERANCE: f64 = 1e-5;

/// Returns `n` uniform samples in `[-1, 1)`.
fn random_vector(rng: &mut StdRng, n: usize) -> Vec<f64> {
    (0..n).map(|_| 2.0 * rng.random::<f64>() - 1.0).collect()
}

/// Same as [`random_vector`], rounded to the element type `T`.
fn random_real<T: Real>(rng: &mut StdRng, n: usize) -> Vec<T> {
    random_vector(rng, n).into_iter().map(T::from_double).collect()
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Creates a convolution with the given workspace and windows, and a random PSF
/// centered in its own array.
///
/// The PSF has positive and negative entries, so its MTF is a generic complex
/// transfer function with no symmetry beyond the Hermitian one of real arrays.
fn create_random_convolution<T: Real>(
    rng: &mut StdRng,
    work: &[usize],
    input: (&[usize], &[usize]),
    output: (&[usize], &[usize]),
    psf_dims: &[usize],
) -> Result<Convolution<T>> {
    let mut cnvl = Convolution::<T>::new(
        Shape::new(work)?,
        Shape::new(input.0)?,
        input.1,
        Shape::new(output.0)?,
        output.1,
    )?;
    let psf_shape = Shape::new(psf_dims)?;
    let psf: Vec<T> = random_real(rng, psf_shape.number_of_elements());
    let center: Vec<usize> = psf_dims.iter().map(|d| d / 2).collect();
    cnvl.set_psf(&psf, &psf_shape, &center, false)
        .context("Failed to set the PSF")?;
    Ok(cnvl)
}

/// A macro to generate the adjoint identity test for one geometry and one element
/// type.
///
/// It draws a random PSF, a random `x` in the input space and a random `y` in the
/// output space, then compares `⟨H·x, y⟩` with `⟨x, H*·y⟩`. Inner products are
/// accumulated in double precision whatever the element type.
macro_rules! generate_adjoint_test {
    ($test_name:ident, $real:ty, $tolerance:expr, $work:expr, $input:expr, $input_offset:expr, $output:expr, $output_offset:expr, $psf:expr) => {
        #[test]
        fn $test_name() -> Result<()> {
            let mut rng = StdRng::seed_from_u64(42);
            let mut cnvl = create_random_convolution::<$real>(
                &mut rng,
                &$work,
                (&$input, &$input_offset),
                (&$output, &$output_offset),
                &$psf,
            )?;
            let n_in = cnvl.input_shape().number_of_elements();
            let n_out = cnvl.output_shape().number_of_elements();
            let x: Vec<$real> = random_real(&mut rng, n_in);
            let y: Vec<$real> = random_real(&mut rng, n_out);

            let mut hx: Vec<$real> = vec![0.0; n_out];
            cnvl.apply(&x, &mut hx, false)?;
            let mut hty: Vec<$real> = vec![0.0; n_in];
            cnvl.apply(&y, &mut hty, true)?;

            let lhs = hx.dot(&y);
            let rhs = x.dot(&hty);
            let scale = hx.norm2() * y.norm2();
            let rel_err = (lhs - rhs).abs() / scale;
            ensure!(
                rel_err < $tolerance,
                "<Hx, y> = {}, <x, H*y> = {}, relative mismatch {}",
                lhs,
                rhs,
                rel_err
            );
            Ok(())
        }
    };
}

// --- Test Suite ---
// Adjoint identity, for every rank, with full and windowed spaces.

generate_adjoint_test!(
    test_adjoint_1d_square,
    f64,
    ADJOINT_TOLERANCE,
    [16],
    [16],
    [0],
    [16],
    [0],
    [5]
);

generate_adjoint_test!(
    test_adjoint_1d_windowed,
    f64,
    ADJOINT_TOLERANCE,
    [12],
    [10],
    [1],
    [8],
    [3],
    [4]
);

generate_adjoint_test!(
    test_adjoint_2d_windowed,
    f64,
    ADJOINT_TOLERANCE,
    [8, 6],
    [8, 5],
    [0, 1],
    [6, 4],
    [1, 2],
    [3, 3]
);

generate_adjoint_test!(
    test_adjoint_3d_windowed,
    f64,
    ADJOINT_TOLERANCE,
    [6, 5, 4],
    [5, 5, 3],
    [1, 0, 0],
    [4, 3, 2],
    [2, 1, 1],
    [3, 2, 3]
);

generate_adjoint_test!(
    test_adjoint_2d_windowed_single_precision,
    f32,
    ADJOINT_TOLERANCE_F32,
    [8, 6],
    [8, 5],
    [0, 1],
    [6, 4],
    [1, 2],
    [3, 3]
);

// Identity PSF: a unit impulse at the origin.
#[test]
fn test_impulse_psf_is_identity() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(42);
    for dims in [vec![17], vec![6, 5], vec![4, 3, 5]] {
        let shape = Shape::new(&dims)?;
        let mut cnvl = Convolution::<f64>::square(shape.clone())?;
        let impulse_shape = Shape::new(&vec![1; dims.len()])?;
        cnvl.set_psf(&[1.0], &impulse_shape, &vec![0; dims.len()], false)?;

        let x = random_vector(&mut rng, shape.number_of_elements());
        let mut hx = vec![0.0; x.len()];
        cnvl.apply(&x, &mut hx, false)?;
        let err: f64 = x.iter().zip(&hx).map(|(a, b)| (a - b).powi(2)).sum();
        let rel_err = (err / dot(&x, &x)).sqrt();
        ensure!(
            rel_err < IDENTITY_TOLERANCE,
            "Identity convolution error too high for {}: {}",
            shape,
            rel_err
        );
    }
    Ok(())
}

// Gradient of the weighted cost against central finite differences.
#[test]
fn test_gradient_matches_finite_differences() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(42);
    let shape = Shape::new(&[4, 4])?;
    let psf_shape = Shape::new(&[3, 3])?;
    let psf = random_vector(&mut rng, 9);

    let mut cost = WeightedConvolutionCost::new(Convolution::<f64>::square(shape)?);
    cost.set_psf(&psf, &psf_shape, &[1, 1], false)?;
    cost.set_data(random_vector(&mut rng, 16))?;
    cost.set_weights((0..16).map(|_| rng.random::<f64>() + 0.5).collect())?;

    let alpha = 1.7;
    let x = random_vector(&mut rng, 16);
    let mut g = vec![0.0; 16];
    cost.cost_and_gradient(alpha, &x, &mut g, true)?;

    let h = 1e-4;
    let mut fd = vec![0.0; 16];
    let mut xp = x.clone();
    for i in 0..16 {
        xp[i] = x[i] + h;
        let fp = cost.cost(alpha, &xp)?;
        xp[i] = x[i] - h;
        let fm = cost.cost(alpha, &xp)?;
        xp[i] = x[i];
        fd[i] = (fp - fm) / (2.0 * h);
    }

    let err: f64 = g.iter().zip(&fd).map(|(a, b)| (a - b).powi(2)).sum();
    let rel_err = (err / dot(&g, &g)).sqrt();
    ensure!(
        rel_err < GRADIENT_TOLERANCE,
        "Analytic gradient differs from finite differences: {}",
        rel_err
    );
    Ok(())
}

/// f(x) = 0.5·|x|², with its minimum at the origin.
struct Isotropic;

impl DifferentiableCost<Mat<f64>> for Isotropic {
    fn evaluate(&mut self, x: &Mat<f64>, g: &mut Mat<f64>) -> fft_deconv::DeconvResult<f64> {
        Vector::copy_from(g, x);
        Ok(0.5 * Vector::dot(x, x))
    }
}

// L-BFGS on an isotropic quadratic: the first accepted step is exact.
#[test]
fn test_isotropic_quadratic_converges_quickly() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(42);
    let mut x = Mat::from_fn(50, 1, |_, _| rng.random::<f64>() + 0.1);
    let config = LbfgsConfig::default().with_gatol(0.0).with_grtol(1e-6);
    let mut first_gnorm = None;
    let outcome = minimize(
        &mut Isotropic,
        &mut x,
        &config,
        &SolveOptions::default(),
        |report, _| {
            first_gnorm.get_or_insert(report.gnorm);
            true
        },
    )?;
    ensure!(
        outcome.reason == StopReason::Converged,
        "Unexpected stop: {}",
        outcome.reason
    );
    ensure!(
        outcome.state.iterations <= config.memory + 1,
        "Too many iterations: {}",
        outcome.state.iterations
    );
    let ginit = first_gnorm.context("The observer was never called")?;
    ensure!(
        outcome.state.gnorm <= config.grtol * ginit,
        "Gradient norm {} above threshold",
        outcome.state.gnorm
    );
    Ok(())
}

// End-to-end deconvolution of a small synthetic image.
#[test]
fn test_deconvolution_end_to_end() -> Result<()> {
    let problem = SyntheticProblem::generate(Shape::new(&[8, 8])?, Shape::new(&[3, 3])?, 0.01, 42)?;
    let mut cost = problem.cost()?;

    let mut x = vec![0.0; problem.shape.number_of_elements()];
    let mut g = vec![0.0; x.len()];
    let initial_cost = cost.evaluate(&x, &mut g)?;

    let config = LbfgsConfig::default().with_gatol(0.0).with_grtol(1e-6);
    let options = SolveOptions::default().with_max_iterations(5000);
    let outcome = minimize(&mut cost, &mut x, &config, &options, |_, _| true)?;
    ensure!(
        outcome.reason.is_converged(),
        "Deconvolution did not converge: {} after {} iterations",
        outcome.reason,
        outcome.state.iterations
    );

    let final_cost = cost.evaluate(&x, &mut g)?;
    ensure!(
        final_cost < initial_cost,
        "Cost did not decrease: {} -> {}",
        initial_cost,
        final_cost
    );
    ensure!(
        (final_cost - outcome.cost).abs() <= 1e-12 * (1.0 + initial_cost),
        "Reported cost {} differs from the cost of the solution {}",
        outcome.cost,
        final_cost
    );
    Ok(())
}
