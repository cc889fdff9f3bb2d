//! This module provides a high-level API that runs the reverse-communication
//! L-BFGS optimizer to completion on a differentiable cost.
//!
//! [`minimize`] owns the evaluation loop: it evaluates the cost when the optimizer
//! asks for it, reports every accepted iterate to an observer, and stops on
//! convergence, on a numerical failure, on an iteration or evaluation budget, or
//! when the observer asks for it.

use crate::algorithms::{Lbfgs, LbfgsConfig, OptimFailure, OptimTask, RunState};
use crate::convolution::WeightedConvolutionCost;
use crate::error::{DeconvErrorKind, DeconvResult};
use crate::vector::{Real, Vector};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A cost function whose gradient is available.
pub trait DifferentiableCost<V> {
    /// Returns the cost at `x` and stores its gradient in `g`.
    fn evaluate(&mut self, x: &V, g: &mut V) -> DeconvResult<f64>;
}

/// The weighted convolution cost with unit multiplier.
impl<T: Real> DifferentiableCost<Vec<T>> for WeightedConvolutionCost<T> {
    fn evaluate(&mut self, x: &Vec<T>, g: &mut Vec<T>) -> DeconvResult<f64> {
        self.cost_and_gradient(1.0, x, g, true)
    }
}

/// Budgets of a [`minimize`] run. `None` means unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SolveOptions {
    pub max_iterations: Option<usize>,
    pub max_evaluations: Option<usize>,
}

impl SolveOptions {
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = Some(max_iterations);
        self
    }

    pub fn with_max_evaluations(mut self, max_evaluations: usize) -> Self {
        self.max_evaluations = Some(max_evaluations);
        self
    }

    pub fn validate(&self) -> DeconvResult<()> {
        if self.max_evaluations == Some(0) {
            return Err(DeconvErrorKind::InvalidParameter {
                name: "max_evaluations",
                value: 0.0,
                reason: "at least one evaluation is required",
            }
            .into());
        }
        Ok(())
    }
}

/// Why [`minimize`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The gradient norm is below the convergence threshold.
    Converged,
    IterationLimit,
    EvaluationLimit,
    /// The observer asked to stop.
    Cancelled,
    /// The optimizer stopped on a warning; the variables are usable.
    Warning(OptimFailure),
    /// The optimizer stopped on an error.
    Failed(OptimFailure),
}

impl StopReason {
    pub fn is_converged(&self) -> bool {
        matches!(self, StopReason::Converged)
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Converged => f.write_str("converged"),
            StopReason::IterationLimit => f.write_str("too many iterations"),
            StopReason::EvaluationLimit => f.write_str("too many evaluations"),
            StopReason::Cancelled => f.write_str("cancelled"),
            StopReason::Warning(failure) => write!(f, "warning: {}", failure),
            StopReason::Failed(failure) => write!(f, "error: {}", failure),
        }
    }
}

/// What the observer of [`minimize`] receives at each accepted iterate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct IterationReport {
    pub iteration: usize,
    pub evaluations: usize,
    pub restarts: usize,
    pub cost: f64,
    pub gnorm: f64,
    /// Length of the accepted step.
    pub step: f64,
    /// `true` when the convergence criterion is met.
    pub converged: bool,
}

impl IterationReport {
    fn new(state: &RunState, cost: f64, converged: bool) -> Self {
        Self {
            iteration: state.iterations,
            evaluations: state.evaluations,
            restarts: state.restarts,
            cost,
            gnorm: state.gnorm,
            step: state.alpha,
            converged,
        }
    }
}

/// The result of a [`minimize`] run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MinimizeOutcome {
    pub reason: StopReason,
    /// The cost at the returned variables.
    pub cost: f64,
    pub state: RunState,
}

/// Minimizes `cost` starting from `x`, which is overwritten with the solution.
///
/// # Arguments
/// * `cost`: The cost function.
/// * `x`: The initial variables on entry, the final ones on return.
/// * `config`: The optimizer parameters.
/// * `options`: The iteration and evaluation budgets.
/// * `observer`: Called with every accepted iterate; returning `false` stops the
///   run.
///
/// # Errors
/// Configuration errors of the optimizer or of the cost are returned immediately.
/// Numerical failures of the optimizer are not errors: they are reported through
/// [`MinimizeOutcome::reason`].
///
/// # Example
///
/// ```
/// use fft_deconv::algorithms::LbfgsConfig;
/// use fft_deconv::error::DeconvResult;
/// use fft_deconv::solvers::{minimize, DifferentiableCost, SolveOptions};
///
/// /// f(x) = Σ (x_i - i)²
/// struct Shifted;
///
/// impl DifferentiableCost<Vec<f64>> for Shifted {
///     fn evaluate(&mut self, x: &Vec<f64>, g: &mut Vec<f64>) -> DeconvResult<f64> {
///         let mut f = 0.0;
///         for i in 0..x.len() {
///             let r = x[i] - i as f64;
///             g[i] = 2.0 * r;
///             f += r * r;
///         }
///         Ok(f)
///     }
/// }
///
/// let mut x = vec![0.0; 4];
/// let outcome = minimize(
///     &mut Shifted,
///     &mut x,
///     &LbfgsConfig::default(),
///     &SolveOptions::default(),
///     |_, _| true,
/// )
/// .unwrap();
/// assert!(outcome.reason.is_converged());
/// assert!((x[3] - 3.0).abs() < 1e-5);
/// ```
pub fn minimize<V, C, F>(
    cost: &mut C,
    x: &mut V,
    config: &LbfgsConfig,
    options: &SolveOptions,
    mut observer: F,
) -> DeconvResult<MinimizeOutcome>
where
    V: Vector,
    C: DifferentiableCost<V>,
    F: FnMut(&IterationReport, &V) -> bool,
{
    options.validate()?;
    let mut opt = Lbfgs::new(*config, x)?;
    let mut g = x.create();
    let mut f = 0.0;
    let mut task = opt.start();

    let reason = loop {
        match task {
            OptimTask::ComputeFg => {
                if options
                    .max_evaluations
                    .is_some_and(|max| opt.state().evaluations >= max)
                {
                    // Go back to the last accepted iterate.
                    if let Some(x0) = opt.line_search_origin() {
                        x.copy_from(x0);
                        f = opt.state().f0;
                    }
                    break StopReason::EvaluationLimit;
                }
                f = cost.evaluate(x, &mut g)?;
            }
            OptimTask::NewX | OptimTask::FinalX => {
                let converged = task == OptimTask::FinalX;
                let report = IterationReport::new(opt.state(), f, converged);
                let proceed = observer(&report, x);
                if converged {
                    break StopReason::Converged;
                }
                if !proceed {
                    break StopReason::Cancelled;
                }
                if options
                    .max_iterations
                    .is_some_and(|max| opt.state().iterations >= max)
                {
                    break StopReason::IterationLimit;
                }
            }
            OptimTask::Warning(failure) => break StopReason::Warning(failure),
            OptimTask::Error(failure) => break StopReason::Failed(failure),
        }
        task = opt.iterate(x, f, &g);
    };

    let state = *opt.state();
    log::debug!(
        "L-BFGS finished ({}) after {} iteration(s) and {} evaluation(s): f = {:e}.",
        reason,
        state.iterations,
        state.evaluations,
        f
    );
    Ok(MinimizeOutcome {
        reason,
        cost: f,
        state,
    })
}
