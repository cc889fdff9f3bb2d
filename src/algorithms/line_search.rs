//! Safeguarded line search of Moré & Thuente.
//!
//! The search looks for a step `stp > 0` satisfying the strong Wolfe conditions
//!
//! ```text
//! f(stp) <= f(0) + ftol * stp * f'(0)          (sufficient decrease)
//! |f'(stp)| <= gtol * |f'(0)|                  (curvature)
//! ```
//!
//! It is written in reverse-communication form: [`MoreThuente::start`] initializes
//! the search from `f(0)`, `f'(0)` and a first trial step, then the caller evaluates
//! the function at [`MoreThuente::step`] and reports the result through
//! [`MoreThuente::iterate`] until a status other than
//! [`LineSearchStatus::Search`] is returned.
//!
//! The step selection follows the `dcsrch`/`dcstep` routines of MINPACK-2: the
//! algorithm first extrapolates until an interval containing an acceptable step is
//! bracketed, then shrinks that interval with safeguarded cubic and quadratic
//! interpolations, falling back to bisection when the interval does not shrink
//! fast enough.
//!
//! ## Reference
//!
//! Moré, J. J. & Thuente, D. J. "Line search algorithms with guaranteed sufficient
//! decrease", ACM TOMS 20, pp. 286-307 (1994).

use super::LineSearchStatus;
use crate::error::{DeconvErrorKind, DeconvResult};
use serde::{Deserialize, Serialize};

const XTRAPL: f64 = 1.1;
const XTRAPU: f64 = 4.0;
const P66: f64 = 0.66;

/// Tuning parameters of the Moré–Thuente line search.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LineSearchConfig {
    /// Tolerance of the sufficient decrease condition.
    pub ftol: f64,
    /// Tolerance of the curvature condition.
    pub gtol: f64,
    /// Relative tolerance on the width of the bracketing interval.
    pub xtol: f64,
    /// Maximum number of trial steps evaluated in a single search.
    pub max_trials: usize,
}

impl Default for LineSearchConfig {
    fn default() -> Self {
        Self {
            ftol: 1e-3,
            gtol: 0.9,
            xtol: 0.1,
            max_trials: 40,
        }
    }
}

impl LineSearchConfig {
    pub fn with_ftol(mut self, ftol: f64) -> Self {
        self.ftol = ftol;
        self
    }

    pub fn with_gtol(mut self, gtol: f64) -> Self {
        self.gtol = gtol;
        self
    }

    pub fn with_xtol(mut self, xtol: f64) -> Self {
        self.xtol = xtol;
        self
    }

    pub fn with_max_trials(mut self, max_trials: usize) -> Self {
        self.max_trials = max_trials;
        self
    }

    /// Checks that `0 < ftol < gtol < 1`, `xtol >= 0` and `max_trials >= 1`.
    pub fn validate(&self) -> DeconvResult<()> {
        if !(self.ftol > 0.0 && self.ftol < 1.0) {
            return Err(DeconvErrorKind::InvalidParameter {
                name: "ftol",
                value: self.ftol,
                reason: "must lie in (0, 1)",
            }
            .into());
        }
        if !(self.gtol > self.ftol && self.gtol < 1.0) {
            return Err(DeconvErrorKind::InvalidParameter {
                name: "gtol",
                value: self.gtol,
                reason: "must lie in (ftol, 1)",
            }
            .into());
        }
        if !(self.xtol >= 0.0) {
            return Err(DeconvErrorKind::InvalidParameter {
                name: "xtol",
                value: self.xtol,
                reason: "must be non-negative",
            }
            .into());
        }
        if self.max_trials == 0 {
            return Err(DeconvErrorKind::InvalidParameter {
                name: "max_trials",
                value: 0.0,
                reason: "must be at least 1",
            }
            .into());
        }
        Ok(())
    }
}

/// A point of the one-dimensional search: step, function value, derivative.
#[derive(Debug, Clone, Copy)]
struct Endpoint {
    st: f64,
    f: f64,
    g: f64,
}

/// Progress of a search between `start` and the terminal status.
#[derive(Debug, Clone)]
struct Bracketing {
    brackt: bool,
    first_stage: bool,
    finit: f64,
    ginit: f64,
    gtest: f64,
    width: f64,
    width1: f64,
    /// Endpoint with the least function value so far.
    x: Endpoint,
    /// Other endpoint of the interval of uncertainty.
    y: Endpoint,
    stmin: f64,
    stmax: f64,
    stpmin: f64,
    stpmax: f64,
    trials: usize,
}

/// Reverse-communication Moré–Thuente line search.
#[derive(Debug, Clone)]
pub struct MoreThuente {
    config: LineSearchConfig,
    phase: Option<Bracketing>,
    stp: f64,
    status: LineSearchStatus,
}

impl Default for MoreThuente {
    fn default() -> Self {
        Self::new(LineSearchConfig::default())
    }
}

impl MoreThuente {
    pub fn new(config: LineSearchConfig) -> Self {
        Self {
            config,
            phase: None,
            stp: 0.0,
            status: LineSearchStatus::ErrorNotStarted,
        }
    }

    pub fn config(&self) -> &LineSearchConfig {
        &self.config
    }

    /// The step at which the function must be evaluated next (or the final step
    /// once the search has terminated).
    pub fn step(&self) -> f64 {
        self.stp
    }

    /// The status returned by the last call to `start` or `iterate`.
    pub fn status(&self) -> LineSearchStatus {
        self.status
    }

    /// Number of trial steps evaluated by the current search.
    pub fn trials(&self) -> usize {
        self.phase.as_ref().map_or(0, |p| p.trials)
    }

    /// Starts a new search.
    ///
    /// # Arguments
    /// * `f0`: The function value at step zero.
    /// * `g0`: The directional derivative at step zero (must be negative).
    /// * `stp`: The first trial step.
    /// * `stpmin`, `stpmax`: The bounds of the admissible steps.
    ///
    /// # Returns
    /// [`LineSearchStatus::Search`] on success, an error status otherwise.
    pub fn start(
        &mut self,
        f0: f64,
        g0: f64,
        stp: f64,
        stpmin: f64,
        stpmax: f64,
    ) -> LineSearchStatus {
        self.phase = None;
        self.stp = stp;
        let LineSearchConfig {
            ftol, gtol, xtol, ..
        } = self.config;

        let error = if stp < stpmin {
            Some(LineSearchStatus::ErrorStpLtStpmin)
        } else if stp > stpmax {
            Some(LineSearchStatus::ErrorStpGtStpmax)
        } else if g0 >= 0.0 {
            Some(LineSearchStatus::ErrorInitialDerivativeGeZero)
        } else if ftol < 0.0 {
            Some(LineSearchStatus::ErrorFtolLtZero)
        } else if gtol < 0.0 {
            Some(LineSearchStatus::ErrorGtolLtZero)
        } else if xtol < 0.0 {
            Some(LineSearchStatus::ErrorXtolLtZero)
        } else if stpmin < 0.0 {
            Some(LineSearchStatus::ErrorStpminLtZero)
        } else if stpmax < stpmin {
            Some(LineSearchStatus::ErrorStpmaxLtStpmin)
        } else {
            None
        };
        if let Some(status) = error {
            self.status = status;
            return status;
        }

        let origin = Endpoint {
            st: 0.0,
            f: f0,
            g: g0,
        };
        let width = stpmax - stpmin;
        self.phase = Some(Bracketing {
            brackt: false,
            first_stage: true,
            finit: f0,
            ginit: g0,
            gtest: ftol * g0,
            width,
            width1: width / 0.5,
            x: origin,
            y: origin,
            stmin: 0.0,
            stmax: stp + XTRAPU * stp,
            stpmin,
            stpmax,
            trials: 0,
        });
        self.status = LineSearchStatus::Search;
        self.status
    }

    /// Reports the function value `f` and directional derivative `g` at step `stp`
    /// (normally the value of [`MoreThuente::step`]).
    ///
    /// # Returns
    /// [`LineSearchStatus::Search`] if a new trial step is available through
    /// [`MoreThuente::step`], or a terminal status.
    pub fn iterate(&mut self, stp: f64, f: f64, g: f64) -> LineSearchStatus {
        let LineSearchConfig {
            gtol,
            xtol,
            max_trials,
            ..
        } = self.config;
        let Some(s) = self.phase.as_mut() else {
            self.status = LineSearchStatus::ErrorNotStarted;
            return self.status;
        };
        s.trials += 1;
        self.stp = stp;

        let ftest = s.finit + stp * s.gtest;
        if s.first_stage && f <= ftest && g >= 0.0 {
            s.first_stage = false;
        }

        // Later tests take precedence over earlier ones.
        let mut status = LineSearchStatus::Search;
        if s.brackt && (stp <= s.stmin || stp >= s.stmax) {
            status = LineSearchStatus::WarningRoundingErrors;
        }
        if s.brackt && s.stmax - s.stmin <= xtol * s.stmax {
            status = LineSearchStatus::WarningXtolTestSatisfied;
        }
        if stp == s.stpmax && f <= ftest && g <= s.gtest {
            status = LineSearchStatus::WarningStpEqStpmax;
        }
        if stp == s.stpmin && (f > ftest || g >= s.gtest) {
            status = LineSearchStatus::WarningStpEqStpmin;
        }
        if f <= ftest && g.abs() <= gtol * (-s.ginit) {
            status = LineSearchStatus::Convergence;
        }
        if status == LineSearchStatus::Search && s.trials >= max_trials {
            status = LineSearchStatus::ErrorTooManyTrials;
        }
        if status != LineSearchStatus::Search {
            log::trace!(
                "line search stopped after {} trial(s) at step {:e}: {}",
                s.trials,
                stp,
                status
            );
            self.phase = None;
            self.status = status;
            return status;
        }

        let trial = Endpoint { st: stp, f, g };
        let mut next = if s.first_stage && f <= s.x.f && f > ftest {
            // Use the modified function psi(stp) = f(stp) - f(0) - gtest*stp while
            // a lower value has been found but the decrease is not sufficient.
            let gtest = s.gtest;
            let shift = |e: Endpoint| Endpoint {
                st: e.st,
                f: e.f - e.st * gtest,
                g: e.g - gtest,
            };
            let unshift = |e: Endpoint| Endpoint {
                st: e.st,
                f: e.f + e.st * gtest,
                g: e.g + gtest,
            };
            let mut xm = shift(s.x);
            let mut ym = shift(s.y);
            let next = cstep(&mut xm, &mut ym, shift(trial), &mut s.brackt, s.stmin, s.stmax);
            s.x = unshift(xm);
            s.y = unshift(ym);
            next
        } else {
            cstep(&mut s.x, &mut s.y, trial, &mut s.brackt, s.stmin, s.stmax)
        };

        // Bisect if the interval did not shrink enough.
        if s.brackt {
            if (s.y.st - s.x.st).abs() >= P66 * s.width1 {
                next = s.x.st + 0.5 * (s.y.st - s.x.st);
            }
            s.width1 = s.width;
            s.width = (s.y.st - s.x.st).abs();
        }

        if s.brackt {
            s.stmin = s.x.st.min(s.y.st);
            s.stmax = s.x.st.max(s.y.st);
        } else {
            s.stmin = next + XTRAPL * (next - s.x.st);
            s.stmax = next + XTRAPU * (next - s.x.st);
        }

        next = next.max(s.stpmin).min(s.stpmax);

        // If no further progress is possible, fall back to the best step so far.
        if s.brackt && (next <= s.stmin || next >= s.stmax || s.stmax - s.stmin <= xtol * s.stmax)
        {
            next = s.x.st;
        }

        self.stp = next;
        self.status = LineSearchStatus::Search;
        self.status
    }
}

/// Computes a safeguarded step for the search and updates the interval of
/// uncertainty `[x.st, y.st]` with the trial point `t`.
///
/// `x` holds the step with the least function value, `y` the other endpoint.
/// Returns the new trial step.
fn cstep(
    x: &mut Endpoint,
    y: &mut Endpoint,
    t: Endpoint,
    brackt: &mut bool,
    stpmin: f64,
    stpmax: f64,
) -> f64 {
    let Endpoint {
        st: stx,
        f: fx,
        g: dx,
    } = *x;
    let Endpoint {
        st: sty,
        f: fy,
        g: dy,
    } = *y;
    let Endpoint {
        st: stp,
        f: fp,
        g: dp,
    } = t;
    let sgnd = dp * dx.signum();

    let stpf = if fp > fx {
        // Case 1: higher function value, the minimum is bracketed.
        let theta = 3.0 * (fx - fp) / (stp - stx) + dx + dp;
        let s = theta.abs().max(dx.abs()).max(dp.abs());
        let mut gamma = s * ((theta / s).powi(2) - (dx / s) * (dp / s)).sqrt();
        if stp < stx {
            gamma = -gamma;
        }
        let p = (gamma - dx) + theta;
        let q = ((gamma - dx) + gamma) + dp;
        let r = p / q;
        let stpc = stx + r * (stp - stx);
        let stpq = stx + ((dx / ((fx - fp) / (stp - stx) + dx)) / 2.0) * (stp - stx);
        *brackt = true;
        if (stpc - stx).abs() < (stpq - stx).abs() {
            stpc
        } else {
            stpc + (stpq - stpc) / 2.0
        }
    } else if sgnd < 0.0 {
        // Case 2: lower function value and derivatives of opposite sign.
        let theta = 3.0 * (fx - fp) / (stp - stx) + dx + dp;
        let s = theta.abs().max(dx.abs()).max(dp.abs());
        let mut gamma = s * ((theta / s).powi(2) - (dx / s) * (dp / s)).sqrt();
        if stp > stx {
            gamma = -gamma;
        }
        let p = (gamma - dp) + theta;
        let q = ((gamma - dp) + gamma) + dx;
        let r = p / q;
        let stpc = stp + r * (stx - stp);
        let stpq = stp + (dp / (dp - dx)) * (stx - stp);
        *brackt = true;
        if (stpc - stp).abs() > (stpq - stp).abs() {
            stpc
        } else {
            stpq
        }
    } else if dp.abs() < dx.abs() {
        // Case 3: lower function value, same-sign derivatives, decreasing slope.
        let theta = 3.0 * (fx - fp) / (stp - stx) + dx + dp;
        let s = theta.abs().max(dx.abs()).max(dp.abs());
        let mut gamma = s * ((theta / s).powi(2) - (dx / s) * (dp / s)).max(0.0).sqrt();
        if stp > stx {
            gamma = -gamma;
        }
        let p = (gamma - dp) + theta;
        let q = (gamma + (dx - dp)) + gamma;
        let r = p / q;
        let stpc = if r < 0.0 && gamma != 0.0 {
            stp + r * (stx - stp)
        } else if stp > stx {
            stpmax
        } else {
            stpmin
        };
        let stpq = stp + (dp / (dp - dx)) * (stx - stp);
        if *brackt {
            let stpf = if (stpc - stp).abs() < (stpq - stp).abs() {
                stpc
            } else {
                stpq
            };
            if stp > stx {
                stpf.min(stp + P66 * (sty - stp))
            } else {
                stpf.max(stp + P66 * (sty - stp))
            }
        } else {
            let stpf = if (stpc - stp).abs() > (stpq - stp).abs() {
                stpc
            } else {
                stpq
            };
            stpf.min(stpmax).max(stpmin)
        }
    } else if *brackt {
        // Case 4: lower function value, same-sign derivatives, slope does not
        // decrease; interpolate with the other endpoint.
        let theta = 3.0 * (fp - fy) / (sty - stp) + dy + dp;
        let s = theta.abs().max(dy.abs()).max(dp.abs());
        let mut gamma = s * ((theta / s).powi(2) - (dy / s) * (dp / s)).sqrt();
        if stp > sty {
            gamma = -gamma;
        }
        let p = (gamma - dp) + theta;
        let q = ((gamma - dp) + gamma) + dy;
        let r = p / q;
        stp + r * (sty - stp)
    } else if stp > stx {
        stpmax
    } else {
        stpmin
    };

    if fp > fx {
        *y = t;
    } else {
        if sgnd < 0.0 {
            *y = *x;
        }
        *x = t;
    }
    stpf
}
