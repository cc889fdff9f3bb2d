//! Reverse-communication L-BFGS and FFT-based convolution costs for image
//! deconvolution.
//!
//! The crate has two halves that meet in [`solvers::minimize`]:
//!
//! - **Optimization** ([`algorithms`]): a limited-memory BFGS optimizer driven by
//!   reverse communication. The optimizer never calls the objective function; it
//!   returns an [`algorithms::OptimTask`] telling the caller to evaluate the cost
//!   and gradient at the current variables, to inspect a new iterate, or to stop.
//!   Steps are chosen by a Moré–Thuente line search enforcing the strong Wolfe
//!   conditions, and the search directions come from the two-loop recursion over
//!   the last `m` correction pairs.
//!
//! - **Convolution** ([`convolution`]): the periodic convolution `H` of an
//!   N-dimensional array by a PSF, computed in the Fourier domain, where the input
//!   and the output may be windows of a larger workspace. On top of it,
//!   [`convolution::WeightedConvolutionCost`] evaluates the weighted least-squares
//!   fidelity `alpha/2·|H·x - d|²_W` and its gradient `alpha·H*·W·(H·x - d)`.
//!
//! Any vector space implementing [`vector::Vector`] can be optimized: flat
//! `Vec<f32>`/`Vec<f64>` arrays as used by the convolution, and [`faer::Mat`].
//!
//! ## Example Usage
//!
//! Recover a 1-D signal blurred by a 3-tap PSF.
//!
//! ```rust
//! use fft_deconv::algorithms::LbfgsConfig;
//! use fft_deconv::convolution::{Convolution, Shape, WeightedConvolutionCost};
//! use fft_deconv::solvers::{minimize, SolveOptions};
//!
//! let shape = Shape::new(&[16]).unwrap();
//! let psf_shape = Shape::new(&[3]).unwrap();
//! let psf = [0.25, 0.5, 0.25];
//!
//! // Simulate the data.
//! let truth: Vec<f64> = (0..16).map(|i| if (4..10).contains(&i) { 1.0 } else { 0.0 }).collect();
//! let mut blur = Convolution::<f64>::square(shape.clone()).unwrap();
//! blur.set_psf(&psf, &psf_shape, &[1], false).unwrap();
//! let mut data = vec![0.0; 16];
//! blur.apply(&truth, &mut data, false).unwrap();
//!
//! // Fit the data.
//! let mut cost = WeightedConvolutionCost::new(Convolution::<f64>::square(shape).unwrap());
//! cost.set_psf(&psf, &psf_shape, &[1], false).unwrap();
//! cost.set_data(data).unwrap();
//!
//! let mut x = vec![0.0; 16];
//! let config = LbfgsConfig::default().with_grtol(1e-8);
//! let outcome = minimize(&mut cost, &mut x, &config, &SolveOptions::default(), |_, _| true).unwrap();
//! assert!(outcome.reason.is_converged());
//! assert!(outcome.cost < 1e-8);
//! ```

pub mod algorithms;
pub mod convolution;
pub mod error;
pub mod solvers;
pub mod utils;
pub mod vector;

pub use algorithms::{Lbfgs, LbfgsConfig, OptimTask};
pub use convolution::{Convolution, Shape, WeightedConvolutionCost};
pub use error::{DeconvError, DeconvErrorKind, DeconvResult};
pub use solvers::{DifferentiableCost, SolveOptions, StopReason, minimize};
pub use vector::{Real, Vector};
