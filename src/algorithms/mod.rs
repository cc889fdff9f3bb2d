//! Low-level reverse-communication optimization machinery.
//!
//! ** NOTE: We recommend using the high-level function [`crate::solvers::minimize`]
//! instead. This module is intended for callers who need to own the evaluation loop
//! (for instance to interleave their own bookkeeping between evaluations).
//!
//! The module is organized leaf-first:
//! - [`line_search`]: a safeguarded Moré–Thuente line search driven by repeated
//!   `iterate` calls.
//! - [`inverse_hessian`]: the limited-memory inverse-Hessian approximation
//!   (ring buffer of `(s, y, rho)` pairs and Strang's two-loop recursion).
//! - [`lbfgs`]: the driver that turns both into a task-based protocol with the
//!   caller.
//!
//! None of these types ever evaluate the objective function. They return a task
//! ([`OptimTask`]) or a status ([`LineSearchStatus`]) and the caller is expected to
//! branch on it.

pub mod inverse_hessian;
pub mod lbfgs;
pub mod line_search;

pub use inverse_hessian::{InitialHessian, InverseHessian, Preconditioner};
pub use lbfgs::{Lbfgs, LbfgsConfig, RunState};
pub use line_search::{LineSearchConfig, MoreThuente};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The next action requested from the caller by the optimizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimTask {
    /// The caller must compute the cost and its gradient at the current variables
    /// and call `iterate` again.
    ComputeFg,
    /// A new iterate is available; the caller may inspect it and call `iterate`
    /// to continue.
    NewX,
    /// The convergence criterion is satisfied at the current variables.
    FinalX,
    /// The algorithm stopped on a warning; the current variables are usable.
    Warning(OptimFailure),
    /// The algorithm stopped on an error.
    Error(OptimFailure),
}

impl OptimTask {
    /// Returns `true` for tasks after which further iterations are pointless.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OptimTask::FinalX | OptimTask::Warning(_) | OptimTask::Error(_)
        )
    }
}

/// Why the optimizer stopped on a warning or an error.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimFailure {
    /// The base (unrestarted) inverse-Hessian approximation does not yield a
    /// sufficient descent direction, i.e. it is not positive definite.
    #[error("the initial inverse Hessian approximation is not positive definite")]
    BadPreconditioner,

    /// The line search terminated without finding an acceptable step.
    #[error("line search failure: {0}")]
    LineSearch(LineSearchStatus),

    /// `iterate` was called before `start`.
    #[error("the optimizer has not been started")]
    NotStarted,
}

/// The state reported by the line search after `start` or `iterate`.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LineSearchStatus {
    /// A new trial step must be evaluated.
    #[error("search in progress")]
    Search,
    /// The sufficient decrease and curvature conditions hold.
    #[error("convergence")]
    Convergence,
    /// Rounding errors prevent further progress; the current step is the best one.
    #[error("rounding errors prevent progress")]
    WarningRoundingErrors,
    /// The relative width of the bracketing interval is below `xtol`.
    #[error("xtol test satisfied")]
    WarningXtolTestSatisfied,
    /// The step is pinned at its upper bound.
    #[error("step at upper bound")]
    WarningStpEqStpmax,
    /// The step is pinned at its lower bound.
    #[error("step at lower bound")]
    WarningStpEqStpmin,
    /// The budget of trial steps for one search is exhausted.
    #[error("too many trial steps")]
    ErrorTooManyTrials,
    /// The initial step is below the lower bound.
    #[error("initial step below lower bound")]
    ErrorStpLtStpmin,
    /// The initial step is above the upper bound.
    #[error("initial step above upper bound")]
    ErrorStpGtStpmax,
    /// The initial directional derivative is not negative.
    #[error("initial directional derivative is not negative")]
    ErrorInitialDerivativeGeZero,
    /// `ftol` is negative.
    #[error("ftol < 0")]
    ErrorFtolLtZero,
    /// `gtol` is negative.
    #[error("gtol < 0")]
    ErrorGtolLtZero,
    /// `xtol` is negative.
    #[error("xtol < 0")]
    ErrorXtolLtZero,
    /// The lower step bound is negative.
    #[error("stpmin < 0")]
    ErrorStpminLtZero,
    /// The upper step bound is below the lower step bound.
    #[error("stpmax < stpmin")]
    ErrorStpmaxLtStpmin,
    /// `iterate` was called without a successful `start`.
    #[error("line search not started")]
    ErrorNotStarted,
}

impl LineSearchStatus {
    /// Returns `true` for statuses that end the search because of invalid input
    /// or an exhausted budget.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            LineSearchStatus::ErrorTooManyTrials
                | LineSearchStatus::ErrorStpLtStpmin
                | LineSearchStatus::ErrorStpGtStpmax
                | LineSearchStatus::ErrorInitialDerivativeGeZero
                | LineSearchStatus::ErrorFtolLtZero
                | LineSearchStatus::ErrorGtolLtZero
                | LineSearchStatus::ErrorXtolLtZero
                | LineSearchStatus::ErrorStpminLtZero
                | LineSearchStatus::ErrorStpmaxLtStpmin
                | LineSearchStatus::ErrorNotStarted
        )
    }

    /// Returns `true` for statuses that end the search with a usable step that
    /// does not satisfy the convergence conditions.
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            LineSearchStatus::WarningRoundingErrors
                | LineSearchStatus::WarningXtolTestSatisfied
                | LineSearchStatus::WarningStpEqStpmax
                | LineSearchStatus::WarningStpEqStpmin
        )
    }
}
