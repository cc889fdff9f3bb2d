//! Reverse-communication driver of the limited-memory BFGS method.
//!
//! [`Lbfgs`] never evaluates the objective function. Each call to
//! [`Lbfgs::iterate`] receives the current variables together with the cost and
//! gradient the caller computed there, and returns the next [`OptimTask`]:
//!
//! ```text
//! let mut task = opt.start();
//! loop {
//!     match task {
//!         OptimTask::ComputeFg => f = cost.evaluate(&x, &mut g),
//!         OptimTask::NewX => { /* x is a new iterate, inspect it if needed */ }
//!         _ => break,
//!     }
//!     task = opt.iterate(&mut x, f, &g);
//! }
//! ```
//!
//! Directions are computed by the limited-memory inverse Hessian of
//! [`super::inverse_hessian`] and checked against the Zoutendijk condition
//! `p·g >= delta·|p|·|g|`; the history is dropped and the direction recomputed when
//! the condition fails. Steps along `-p` are chosen by the Moré–Thuente line search.

use super::inverse_hessian::{InitialHessian, InverseHessian};
use super::line_search::{LineSearchConfig, MoreThuente};
use super::{LineSearchStatus, OptimFailure, OptimTask};
use crate::error::{DeconvErrorKind, DeconvResult};
use crate::vector::Vector;
use serde::{Deserialize, Serialize};

/// Tuning parameters of the L-BFGS driver.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LbfgsConfig {
    /// History depth `m`, fixed for the lifetime of an optimizer.
    pub memory: usize,
    /// Threshold of the sufficient descent condition.
    pub delta: f64,
    /// Scale of the first step when there is no curvature information.
    pub epsilon: f64,
    /// Absolute tolerance on the gradient norm.
    pub gatol: f64,
    /// Tolerance on the gradient norm relative to the initial gradient norm.
    pub grtol: f64,
    /// Lower step bound, relative to the first trial step of each line search.
    pub stpmin: f64,
    /// Upper step bound, relative to the first trial step of each line search.
    pub stpmax: f64,
    /// Store the previous iterate in the spare slot of the history instead of in
    /// dedicated vectors. The effective history depth is then `m - 1`.
    pub save_memory: bool,
    pub line_search: LineSearchConfig,
}

impl Default for LbfgsConfig {
    fn default() -> Self {
        Self {
            memory: 5,
            delta: 0.01,
            epsilon: 1e-3,
            gatol: 0.0,
            grtol: 1e-6,
            stpmin: 1e-20,
            stpmax: 1e20,
            save_memory: true,
            line_search: LineSearchConfig::default(),
        }
    }
}

fn invalid(name: &'static str, value: f64, reason: &'static str) -> DeconvResult<()> {
    Err(DeconvErrorKind::InvalidParameter {
        name,
        value,
        reason,
    }
    .into())
}

fn check_delta(delta: f64) -> DeconvResult<()> {
    if !(delta > 0.0 && delta < 1.0) {
        return invalid("delta", delta, "must lie in (0, 1)");
    }
    Ok(())
}

fn check_tolerance(name: &'static str, value: f64) -> DeconvResult<()> {
    if !(value >= 0.0 && value.is_finite()) {
        return invalid(name, value, "must be finite and non-negative");
    }
    Ok(())
}

fn check_bounds(stpmin: f64, stpmax: f64) -> DeconvResult<()> {
    if !(stpmin >= 0.0) {
        return invalid("stpmin", stpmin, "must be non-negative");
    }
    if !(stpmax > stpmin) {
        return invalid("stpmax", stpmax, "must be greater than stpmin");
    }
    Ok(())
}

impl LbfgsConfig {
    pub fn with_memory(mut self, memory: usize) -> Self {
        self.memory = memory;
        self
    }

    pub fn with_delta(mut self, delta: f64) -> Self {
        self.delta = delta;
        self
    }

    pub fn with_epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon;
        self
    }

    pub fn with_gatol(mut self, gatol: f64) -> Self {
        self.gatol = gatol;
        self
    }

    pub fn with_grtol(mut self, grtol: f64) -> Self {
        self.grtol = grtol;
        self
    }

    pub fn with_step_bounds(mut self, stpmin: f64, stpmax: f64) -> Self {
        self.stpmin = stpmin;
        self.stpmax = stpmax;
        self
    }

    pub fn with_save_memory(mut self, save_memory: bool) -> Self {
        self.save_memory = save_memory;
        self
    }

    pub fn with_line_search(mut self, line_search: LineSearchConfig) -> Self {
        self.line_search = line_search;
        self
    }

    /// Checks every parameter, including those of the line search.
    pub fn validate(&self) -> DeconvResult<()> {
        if self.memory == 0 {
            return invalid("memory", 0.0, "must be at least 1");
        }
        check_delta(self.delta)?;
        check_tolerance("epsilon", self.epsilon)?;
        check_tolerance("gatol", self.gatol)?;
        check_tolerance("grtol", self.grtol)?;
        check_bounds(self.stpmin, self.stpmax)?;
        self.line_search.validate()
    }
}

/// Counters and scalars of one optimization run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RunState {
    /// Number of cost and gradient evaluations.
    pub evaluations: usize,
    /// Number of accepted steps.
    pub iterations: usize,
    /// Number of times the history was dropped.
    pub restarts: usize,
    /// Gradient norm at the first evaluation.
    pub ginit: f64,
    /// Gradient norm at the last evaluation.
    pub gnorm: f64,
    /// Gradient norm at the start of the current line search.
    pub g0norm: f64,
    /// Cost at the start of the current line search.
    pub f0: f64,
    /// Directional derivative at the start of the current line search.
    pub dg0: f64,
    /// Current step length.
    pub alpha: f64,
    /// Norm of the current search direction.
    pub pnorm: f64,
}

/// Where the variables and gradient at the start of the line search are kept.
enum Anchor<V> {
    Unset,
    Owned { x0: V, g0: V },
    /// Index of the lent slot of the history.
    Slot(usize),
}

/// The L-BFGS optimizer.
///
/// # Example
///
/// ```
/// use fft_deconv::algorithms::{Lbfgs, LbfgsConfig, OptimTask};
/// use fft_deconv::vector::Vector;
///
/// // Minimize 0.5·|x|².
/// let mut x = vec![1.0_f64, -2.0, 3.0];
/// let mut g = x.clone();
/// let mut f = 0.0;
/// let mut opt = Lbfgs::new(LbfgsConfig::default(), &x).unwrap();
/// let mut task = opt.start();
/// loop {
///     match task {
///         OptimTask::ComputeFg => {
///             g.copy_from(&x);
///             f = 0.5 * x.dot(&x);
///         }
///         OptimTask::NewX => {}
///         _ => break,
///     }
///     task = opt.iterate(&mut x, f, &g);
/// }
/// assert_eq!(task, OptimTask::FinalX);
/// assert!(x.norm2() < 1e-5);
/// ```
pub struct Lbfgs<V: Vector> {
    config: LbfgsConfig,
    hessian: InverseHessian<V>,
    line_search: MoreThuente,
    anchor: Anchor<V>,
    /// Search direction; the variables move along `-p`.
    p: V,
    state: RunState,
    task: Option<OptimTask>,
}

impl<V: Vector> Lbfgs<V> {
    /// Creates an optimizer for variables of the same space as `like`, with the
    /// default Shanno–Phua scaling of the base inverse Hessian.
    pub fn new(config: LbfgsConfig, like: &V) -> DeconvResult<Self> {
        Self::with_initial_hessian(config, InitialHessian::default(), like)
    }

    /// Same as [`Lbfgs::new`] with an explicit base inverse Hessian rule.
    pub fn with_initial_hessian(
        config: LbfgsConfig,
        rule: InitialHessian<V>,
        like: &V,
    ) -> DeconvResult<Self> {
        config.validate()?;
        Ok(Self {
            hessian: InverseHessian::new(config.memory, rule),
            line_search: MoreThuente::new(config.line_search),
            anchor: Anchor::Unset,
            p: like.create(),
            state: RunState::default(),
            task: None,
            config,
        })
    }

    pub fn config(&self) -> &LbfgsConfig {
        &self.config
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn hessian(&self) -> &InverseHessian<V> {
        &self.hessian
    }

    /// The current search direction.
    pub fn direction(&self) -> &V {
        &self.p
    }

    /// The variables at the start of the current line search, which are the best
    /// ones accepted so far.
    pub fn line_search_origin(&self) -> Option<&V> {
        self.anchor().map(|(x0, _)| x0)
    }

    /// The last task returned, `None` before [`Lbfgs::start`].
    pub fn task(&self) -> Option<OptimTask> {
        self.task
    }

    pub fn set_gatol(&mut self, gatol: f64) -> DeconvResult<()> {
        check_tolerance("gatol", gatol)?;
        self.config.gatol = gatol;
        Ok(())
    }

    pub fn set_grtol(&mut self, grtol: f64) -> DeconvResult<()> {
        check_tolerance("grtol", grtol)?;
        self.config.grtol = grtol;
        Ok(())
    }

    pub fn set_delta(&mut self, delta: f64) -> DeconvResult<()> {
        check_delta(delta)?;
        self.config.delta = delta;
        Ok(())
    }

    pub fn set_epsilon(&mut self, epsilon: f64) -> DeconvResult<()> {
        check_tolerance("epsilon", epsilon)?;
        self.config.epsilon = epsilon;
        Ok(())
    }

    pub fn set_step_bounds(&mut self, stpmin: f64, stpmax: f64) -> DeconvResult<()> {
        check_bounds(stpmin, stpmax)?;
        self.config.stpmin = stpmin;
        self.config.stpmax = stpmax;
        Ok(())
    }

    /// Gradient norm below which the variables are considered optimal:
    /// `max(0, gatol, grtol·ginit)`.
    pub fn gradient_threshold(&self) -> f64 {
        0.0_f64
            .max(self.config.gatol)
            .max(self.config.grtol * self.state.ginit)
    }

    /// Starts a new run: counters and history are reset.
    ///
    /// # Returns
    /// [`OptimTask::ComputeFg`]: the caller must evaluate the cost and gradient at
    /// the initial variables.
    pub fn start(&mut self) -> OptimTask {
        self.state = RunState::default();
        self.hessian.reset();
        self.set_task(OptimTask::ComputeFg)
    }

    /// Same as [`Lbfgs::start`] but the restart counter is incremented instead of
    /// cleared. Tolerances are left untouched.
    pub fn restart(&mut self) -> OptimTask {
        let restarts = self.state.restarts + 1;
        self.start();
        self.state.restarts = restarts;
        log::debug!("L-BFGS restarted by the caller ({} restart(s)).", restarts);
        OptimTask::ComputeFg
    }

    fn set_task(&mut self, task: OptimTask) -> OptimTask {
        self.task = Some(task);
        task
    }

    fn fail(&mut self, status: LineSearchStatus) -> OptimTask {
        let failure = OptimFailure::LineSearch(status);
        log::warn!(
            "L-BFGS stopped after {} iteration(s): {}",
            self.state.iterations,
            failure
        );
        if status.is_warning() {
            self.set_task(OptimTask::Warning(failure))
        } else {
            self.set_task(OptimTask::Error(failure))
        }
    }

    /// Variables and gradient at the start of the current line search.
    fn anchor(&self) -> Option<(&V, &V)> {
        match &self.anchor {
            Anchor::Unset => None,
            Anchor::Owned { x0, g0 } => Some((x0, g0)),
            Anchor::Slot(index) => Some(self.hessian.slot(*index)),
        }
    }

    /// Sets `x = x0 - alpha·p` for the current step.
    fn take_step(&self, x: &mut V) -> bool {
        match self.anchor() {
            Some((x0, _)) => {
                x.axpby(1.0, x0, -self.state.alpha, &self.p);
                true
            }
            None => false,
        }
    }

    /// Advances the algorithm.
    ///
    /// # Arguments
    /// * `x`: The current variables. Overwritten with the next trial point when
    ///   [`OptimTask::ComputeFg`] is returned.
    /// * `f`: The cost at `x`.
    /// * `g`: The gradient of the cost at `x`.
    ///
    /// `f` and `g` are only read when the previous task was
    /// [`OptimTask::ComputeFg`]; they must still be those of `x` otherwise.
    pub fn iterate(&mut self, x: &mut V, f: f64, g: &V) -> OptimTask {
        let Some(task) = self.task else {
            return OptimTask::Error(OptimFailure::NotStarted);
        };
        match task {
            OptimTask::ComputeFg => self.after_evaluation(x, f, g),
            OptimTask::NewX | OptimTask::FinalX => self.next_search(x, f, g),
            terminal => terminal,
        }
    }

    fn after_evaluation(&mut self, x: &mut V, f: f64, g: &V) -> OptimTask {
        self.state.evaluations += 1;
        if self.state.evaluations > 1 {
            // A line search is in progress.
            let pg = self.p.dot(g);
            let status = self.line_search.iterate(self.state.alpha, f, -pg);
            match status {
                LineSearchStatus::Search => {
                    self.state.alpha = self.line_search.step();
                    if !self.take_step(x) {
                        return self.set_task(OptimTask::Error(OptimFailure::NotStarted));
                    }
                    return self.set_task(OptimTask::ComputeFg);
                }
                LineSearchStatus::Convergence | LineSearchStatus::WarningRoundingErrors => {
                    self.state.iterations += 1;
                }
                other => return self.fail(other),
            }
        }

        self.state.gnorm = g.norm2();
        if self.state.evaluations == 1 {
            self.state.ginit = self.state.gnorm;
        }
        log::trace!(
            "L-BFGS iteration {}: f = {:e}, |g| = {:e}, step = {:e}",
            self.state.iterations,
            f,
            self.state.gnorm,
            self.state.alpha
        );
        if self.state.gnorm <= self.gradient_threshold() {
            self.set_task(OptimTask::FinalX)
        } else {
            self.set_task(OptimTask::NewX)
        }
    }

    fn next_search(&mut self, x: &mut V, f: f64, g: &V) -> OptimTask {
        if self.state.evaluations > 1 {
            match &self.anchor {
                Anchor::Owned { x0, g0 } => {
                    self.hessian.update(x, x0, g, g0);
                }
                Anchor::Slot(index) => {
                    self.hessian.update_from_slot(*index, x, g);
                }
                Anchor::Unset => {}
            }
        }

        // Find a sufficient descent direction, dropping the history if needed.
        let gnorm = self.state.gnorm;
        loop {
            self.hessian.apply(g, &mut self.p);
            let pnorm = self.p.norm2();
            let pg = self.p.dot(g);
            if pg >= self.config.delta * pnorm * gnorm {
                self.state.pnorm = pnorm;
                self.state.dg0 = -pg;
                break;
            }
            if self.hessian.mp() < 1 {
                log::warn!("L-BFGS: {}", OptimFailure::BadPreconditioner);
                return self.set_task(OptimTask::Error(OptimFailure::BadPreconditioner));
            }
            log::debug!(
                "Not a descent direction with {} pair(s), dropping the history.",
                self.hessian.mp()
            );
            self.hessian.reset();
            self.state.restarts += 1;
        }

        self.save_anchor(x, g);
        self.state.g0norm = gnorm;
        self.state.f0 = f;

        let alpha = if self.hessian.mp() >= 1 || self.hessian.is_user_rule() {
            1.0
        } else {
            let epsilon = self.config.epsilon;
            let xnorm = if epsilon > 0.0 && epsilon < 1.0 {
                x.norm2()
            } else {
                0.0
            };
            if xnorm > 0.0 {
                epsilon * xnorm / gnorm
            } else {
                1.0 / gnorm
            }
        };

        let status = self.line_search.start(
            self.state.f0,
            self.state.dg0,
            alpha,
            self.config.stpmin * alpha,
            self.config.stpmax * alpha,
        );
        if status != LineSearchStatus::Search {
            return self.fail(status);
        }
        self.state.alpha = self.line_search.step();
        if !self.take_step(x) {
            return self.set_task(OptimTask::Error(OptimFailure::NotStarted));
        }
        self.set_task(OptimTask::ComputeFg)
    }

    /// Stores `(x, g)` as the start of the next line search.
    fn save_anchor(&mut self, x: &V, g: &V) {
        if self.config.save_memory {
            let index = self.hessian.spare_slot(x);
            let (x0, g0) = self.hessian.slot_mut(index);
            x0.copy_from(x);
            g0.copy_from(g);
            self.anchor = Anchor::Slot(index);
        } else {
            if let Anchor::Owned { x0, g0 } = &mut self.anchor {
                x0.copy_from(x);
                g0.copy_from(g);
                return;
            }
            let mut x0 = x.create();
            let mut g0 = g.create();
            x0.copy_from(x);
            g0.copy_from(g);
            self.anchor = Anchor::Owned { x0, g0 };
        }
    }
}
