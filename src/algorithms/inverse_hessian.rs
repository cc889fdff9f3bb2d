//! Limited-memory approximation of the inverse Hessian.
//!
//! [`InverseHessian`] stores the `m` most recent pairs `(s, y)` of variable and
//! gradient differences in a ring buffer, together with `rho = 1 / (y·s)`, and
//! applies the corresponding BFGS approximation of the inverse Hessian with Strang's
//! two-loop recursion. The base approximation used between the two loops is chosen
//! by an [`InitialHessian`] rule.
//!
//! Slots of the ring buffer are allocated the first time they are written and are
//! never freed afterwards, not even by [`InverseHessian::reset`]. This lets the
//! driver borrow the slot that the next update will overwrite to store the previous
//! iterate (see [`InverseHessian::spare_slot`]).

use crate::vector::Vector;
use std::fmt;

/// A user supplied approximation of the inverse Hessian.
///
/// It must be symmetric and positive definite for the search directions to be
/// descent directions.
pub trait Preconditioner<V> {
    /// Computes `dst = M·src`.
    fn apply(&self, src: &V, dst: &mut V);
}

impl<V, F> Preconditioner<V> for F
where
    F: Fn(&V, &mut V),
{
    fn apply(&self, src: &V, dst: &mut V) {
        self(src, dst)
    }
}

/// The rule selecting the base approximation `H0` applied between the two loops.
pub enum InitialHessian<V> {
    /// `H0 = I`.
    Identity,
    /// `H0 = gamma·I` with `gamma = (s·y)/(y·y)` for the most recent pair
    /// (Shanno & Phua scaling).
    ShannoPhua,
    /// `H0` is a user supplied operator.
    User(Box<dyn Preconditioner<V>>),
}

impl<V> Default for InitialHessian<V> {
    fn default() -> Self {
        InitialHessian::ShannoPhua
    }
}

impl<V> fmt::Debug for InitialHessian<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitialHessian::Identity => f.write_str("Identity"),
            InitialHessian::ShannoPhua => f.write_str("ShannoPhua"),
            InitialHessian::User(_) => f.write_str("User(..)"),
        }
    }
}

/// The L-BFGS approximation of the inverse Hessian.
pub struct InverseHessian<V: Vector> {
    /// Capacity of the ring buffer.
    m: usize,
    s: Vec<V>,
    y: Vec<V>,
    rho: Vec<f64>,
    /// Scratch for the coefficients of the first loop.
    alpha: Vec<f64>,
    /// Slot of the most recent pair.
    mark: usize,
    /// Number of valid pairs.
    mp: usize,
    /// `(s·y)/(y·y)` for the most recent pair.
    gamma: f64,
    rule: InitialHessian<V>,
    scratch: Option<V>,
    /// Candidate pair, formed here when the next slot still holds a valid pair.
    pending: Option<(V, V)>,
}

impl<V: Vector> fmt::Debug for InverseHessian<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InverseHessian")
            .field("m", &self.m)
            .field("mp", &self.mp)
            .field("mark", &self.mark)
            .field("allocated", &self.s.len())
            .field("rule", &self.rule)
            .finish()
    }
}

impl<V: Vector> InverseHessian<V> {
    /// Creates an empty approximation that remembers at most `m` pairs.
    ///
    /// # Panics
    /// Panics if `m` is zero.
    pub fn new(m: usize, rule: InitialHessian<V>) -> Self {
        assert!(m >= 1, "The history depth must be at least 1.");
        Self {
            m,
            s: Vec::with_capacity(m),
            y: Vec::with_capacity(m),
            rho: vec![0.0; m],
            alpha: vec![0.0; m],
            mark: m - 1,
            mp: 0,
            gamma: 1.0,
            rule,
            scratch: None,
            pending: None,
        }
    }

    /// Maximum number of pairs.
    pub fn memory(&self) -> usize {
        self.m
    }

    /// Number of valid pairs currently stored.
    pub fn mp(&self) -> usize {
        self.mp
    }

    pub fn rule(&self) -> &InitialHessian<V> {
        &self.rule
    }

    pub fn set_rule(&mut self, rule: InitialHessian<V>) {
        self.rule = rule;
    }

    /// Returns `true` if the base approximation is supplied by the user.
    pub fn is_user_rule(&self) -> bool {
        matches!(self.rule, InitialHessian::User(_))
    }

    /// Forgets all pairs. Allocated slots are kept.
    pub fn reset(&mut self) {
        self.mp = 0;
    }

    /// Ring buffer index of the `k`-th most recent pair (`k = 1` is the newest).
    fn index_of(&self, k: usize) -> usize {
        (self.mark + self.m + 1 - k) % self.m
    }

    fn check_rank(&self, k: usize) {
        assert!(
            k >= 1 && k <= self.mp,
            "Invalid pair rank {} (only {} pair(s) stored).",
            k,
            self.mp
        );
    }

    /// Variable difference of the `k`-th most recent pair, `1 <= k <= mp`.
    pub fn s(&self, k: usize) -> &V {
        self.check_rank(k);
        &self.s[self.index_of(k)]
    }

    /// Gradient difference of the `k`-th most recent pair, `1 <= k <= mp`.
    pub fn y(&self, k: usize) -> &V {
        self.check_rank(k);
        &self.y[self.index_of(k)]
    }

    /// `1/(y·s)` for the `k`-th most recent pair, `1 <= k <= mp`.
    pub fn rho(&self, k: usize) -> f64 {
        self.check_rank(k);
        self.rho[self.index_of(k)]
    }

    /// Index of the slot that the next update writes into.
    fn next_slot(&self) -> usize {
        (self.mark + 1) % self.m
    }

    /// Makes sure the next slot is allocated, using `like` as a template.
    fn allocate_next(&mut self, like: &V) -> usize {
        let next = self.next_slot();
        // Slots are filled in ring order starting at 0, so the next one either
        // exists or is the first unallocated one.
        if next == self.s.len() {
            self.s.push(like.create());
            self.y.push(like.create());
        }
        next
    }

    /// Lends the slot that the next update overwrites.
    ///
    /// The slot is allocated if necessary and the number of valid pairs is capped
    /// to `m - 1` so that it no longer holds a pair. The returned index can then be
    /// used with [`InverseHessian::slot_mut`] to store `(x0, g0)` and with
    /// [`InverseHessian::update_from_slot`] to turn them into the next pair.
    pub fn spare_slot(&mut self, like: &V) -> usize {
        let slot = self.allocate_next(like);
        self.mp = self.mp.min(self.m - 1);
        slot
    }

    /// Contents of a slot as `(s, y)`.
    pub fn slot(&self, index: usize) -> (&V, &V) {
        (&self.s[index], &self.y[index])
    }

    /// Mutable contents of a slot as `(s, y)`.
    pub fn slot_mut(&mut self, index: usize) -> (&mut V, &mut V) {
        (&mut self.s[index], &mut self.y[index])
    }

    /// Adds the pair `s = x - x0`, `y = g - g0`.
    ///
    /// The pair is silently discarded unless `y·s > 0`. Returns `true` if the pair
    /// was accepted. A discarded pair leaves the stored pairs untouched, including
    /// the oldest one when the history is full.
    pub fn update(&mut self, x: &V, x0: &V, g: &V, g0: &V) -> bool {
        let slot = self.allocate_next(x);
        if self.mp < self.m {
            // The next slot holds no valid pair.
            difference(&mut self.s[slot], x, x0);
            difference(&mut self.y[slot], g, g0);
            return self.commit(slot);
        }

        let (s, y) = self
            .pending
            .get_or_insert_with(|| (x.create(), x.create()));
        difference(s, x, x0);
        difference(y, g, g0);
        let sy = s.dot(y);
        if !(sy > 0.0) {
            log::trace!("Rejected pair with s·y = {:e}.", sy);
            return false;
        }
        std::mem::swap(&mut self.s[slot], s);
        std::mem::swap(&mut self.y[slot], y);
        self.commit(slot)
    }

    /// Same as [`InverseHessian::update`] when `(x0, g0)` were stored in the slot
    /// returned by [`InverseHessian::spare_slot`].
    ///
    /// # Panics
    /// Panics if `slot` is not the slot that the next update overwrites.
    pub fn update_from_slot(&mut self, slot: usize, x: &V, g: &V) -> bool {
        assert_eq!(
            slot,
            self.next_slot(),
            "Slot {} is not the spare slot of the history.",
            slot
        );
        let s = &mut self.s[slot];
        s.scale(-1.0);
        s.axpy(1.0, x);
        let y = &mut self.y[slot];
        y.scale(-1.0);
        y.axpy(1.0, g);
        self.commit(slot)
    }

    fn commit(&mut self, slot: usize) -> bool {
        let sy = self.s[slot].dot(&self.y[slot]);
        if !(sy > 0.0) {
            log::trace!("Rejected pair with s·y = {:e}.", sy);
            return false;
        }
        let yy = self.y[slot].dot(&self.y[slot]);
        self.rho[slot] = 1.0 / sy;
        self.gamma = sy / yy;
        self.mark = slot;
        self.mp = (self.mp + 1).min(self.m);
        true
    }

    /// Computes `p = H·g` with the two-loop recursion.
    pub fn apply(&mut self, g: &V, p: &mut V) {
        p.copy_from(g);

        for k in 1..=self.mp {
            let j = self.index_of(k);
            let a = self.rho[j] * self.s[j].dot(p);
            self.alpha[j] = a;
            p.axpy(-a, &self.y[j]);
        }

        match &self.rule {
            InitialHessian::Identity => {}
            InitialHessian::ShannoPhua => {
                if self.mp > 0 {
                    p.scale(self.gamma);
                }
            }
            InitialHessian::User(op) => {
                let q = self.scratch.get_or_insert_with(|| p.create());
                q.copy_from(p);
                op.apply(q, p);
            }
        }

        for k in (1..=self.mp).rev() {
            let j = self.index_of(k);
            let beta = self.rho[j] * self.y[j].dot(p);
            p.axpy(self.alpha[j] - beta, &self.s[j]);
        }
    }
}

/// `dst = a - b`.
fn difference<V: Vector>(dst: &mut V, a: &V, b: &V) {
    dst.copy_from(a);
    dst.axpy(-1.0, b);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dense_apply(a: &[[f64; 3]; 3], x: &[f64]) -> Vec<f64> {
        (0..3)
            .map(|i| (0..3).map(|j| a[i][j] * x[j]).sum())
            .collect()
    }

    #[test]
    fn test_empty_history_is_identity() {
        let mut h = InverseHessian::<Vec<f64>>::new(3, InitialHessian::ShannoPhua);
        let g = vec![1.0, -2.0, 0.5];
        let mut p = g.create();
        h.apply(&g, &mut p);
        assert_eq!(p, g);
    }

    #[test]
    fn test_non_positive_curvature_is_rejected() {
        let mut h = InverseHessian::<Vec<f64>>::new(3, InitialHessian::default());
        let x0 = vec![0.0, 0.0];
        let g0 = vec![1.0, 1.0];
        // s = (1, 0), y = (-1, 0): y·s < 0.
        assert!(!h.update(&vec![1.0, 0.0], &x0, &vec![0.0, 1.0], &g0));
        assert_eq!(h.mp(), 0);
        // y·s = 0.
        assert!(!h.update(&vec![1.0, 0.0], &x0, &vec![1.0, 2.0], &g0));
        assert_eq!(h.mp(), 0);
    }

    #[test]
    fn test_secant_equation_for_newest_pair() {
        let a = [[4.0, 1.0, 0.0], [1.0, 3.0, 0.5], [0.0, 0.5, 2.0]];
        let mut h = InverseHessian::<Vec<f64>>::new(5, InitialHessian::ShannoPhua);
        let mut x0 = vec![0.0; 3];
        let mut g0 = dense_apply(&a, &x0);
        for x in [vec![1.0, 0.0, 0.0], vec![1.0, 1.0, 0.0], vec![0.5, 1.0, 1.0]] {
            let g = dense_apply(&a, &x);
            assert!(h.update(&x, &x0, &g, &g0));
            x0 = x;
            g0 = g;
        }
        assert_eq!(h.mp(), 3);

        // H·y_k = s_k for the most recent pair.
        let mut p = vec![0.0; 3];
        let y = h.y(1).clone();
        h.apply(&y, &mut p);
        for (pi, si) in p.iter().zip(h.s(1)) {
            assert!((pi - si).abs() < 1e-12, "{:?} != {:?}", p, h.s(1));
        }
        assert!((h.rho(1) * h.s(1).dot(h.y(1)) - 1.0).abs() < 1e-15);
    }

    #[test]
    fn test_ring_buffer_keeps_newest_pairs() {
        let mut h = InverseHessian::<Vec<f64>>::new(2, InitialHessian::Identity);
        let zero = vec![0.0];
        for k in 1..=3 {
            let v = vec![k as f64];
            assert!(h.update(&v, &zero, &v, &zero));
        }
        assert_eq!(h.mp(), 2);
        assert_eq!(h.s(1), &vec![3.0]);
        assert_eq!(h.s(2), &vec![2.0]);

        h.reset();
        assert_eq!(h.mp(), 0);
        assert_eq!(h.memory(), 2);
    }

    #[test]
    fn test_rejected_pair_keeps_full_history() {
        let mut h = InverseHessian::<Vec<f64>>::new(2, InitialHessian::ShannoPhua);
        let zero = vec![0.0, 0.0];
        assert!(h.update(&vec![1.0, 0.0], &zero, &vec![2.0, 0.0], &zero));
        assert!(h.update(&vec![0.0, 1.0], &zero, &vec![0.0, 3.0], &zero));
        assert_eq!(h.mp(), 2);

        // s = (5, 5), y = (-1, -1): y·s < 0.
        assert!(!h.update(&vec![5.0, 5.0], &zero, &vec![-1.0, -1.0], &zero));
        assert_eq!(h.mp(), 2);
        assert_eq!(h.s(1), &vec![0.0, 1.0]);
        assert_eq!(h.y(1), &vec![0.0, 3.0]);
        assert_eq!(h.s(2), &vec![1.0, 0.0]);
        assert_eq!(h.y(2), &vec![2.0, 0.0]);
        for k in 1..=h.mp() {
            assert!((h.rho(k) * h.s(k).dot(h.y(k)) - 1.0).abs() < 1e-15);
        }

        // The next accepted pair replaces the oldest one.
        assert!(h.update(&vec![1.0, 1.0], &zero, &vec![1.0, 1.0], &zero));
        assert_eq!(h.s(1), &vec![1.0, 1.0]);
        assert_eq!(h.s(2), &vec![0.0, 1.0]);
        assert_eq!(h.y(2), &vec![0.0, 3.0]);
    }

    #[test]
    fn test_spare_slot_matches_owned_update() {
        let x0 = vec![1.0, 2.0];
        let g0 = vec![0.5, -1.0];
        let x = vec![2.0, 1.5];
        let g = vec![1.5, -0.5];

        let mut owned = InverseHessian::<Vec<f64>>::new(2, InitialHessian::ShannoPhua);
        assert!(owned.update(&x, &x0, &g, &g0));

        let mut lent = InverseHessian::<Vec<f64>>::new(2, InitialHessian::ShannoPhua);
        let slot = lent.spare_slot(&x0);
        {
            let (s, y) = lent.slot_mut(slot);
            s.copy_from(&x0);
            y.copy_from(&g0);
        }
        assert!(lent.update_from_slot(slot, &x, &g));

        assert_eq!(owned.s(1), lent.s(1));
        assert_eq!(owned.y(1), lent.y(1));
        assert_eq!(owned.rho(1), lent.rho(1));
    }

    #[test]
    fn test_spare_slot_caps_history() {
        let mut h = InverseHessian::<Vec<f64>>::new(2, InitialHessian::ShannoPhua);
        let zero = vec![0.0];
        h.update(&vec![1.0], &zero, &vec![1.0], &zero);
        h.update(&vec![2.0], &zero, &vec![2.0], &zero);
        assert_eq!(h.mp(), 2);
        let slot = h.spare_slot(&zero);
        assert_eq!(h.mp(), 1);
        // The oldest pair is the one lent out.
        assert_eq!(h.slot(slot).0, &vec![1.0]);
    }

    #[test]
    fn test_user_preconditioner() {
        let diag = vec![2.0, 0.5];
        let rule = InitialHessian::User(Box::new(move |src: &Vec<f64>, dst: &mut Vec<f64>| {
            for i in 0..src.len() {
                dst[i] = diag[i] * src[i];
            }
        }));
        let mut h = InverseHessian::<Vec<f64>>::new(3, rule);
        assert!(h.is_user_rule());
        let mut p = vec![0.0; 2];
        h.apply(&vec![1.0, 4.0], &mut p);
        assert_eq!(p, vec![2.0, 2.0]);
    }
}
