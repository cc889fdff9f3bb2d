//! This module defines the vector-space contract consumed by the optimizer.
//!
//! The L-BFGS machinery never looks at individual entries of the variables it
//! optimizes. Everything it needs is a handful of vector-space operations: create a
//! vector of the same space, copy, dot product, Euclidean norm, and affine
//! combinations. Formalizing this as the [`Vector`] trait lets the same driver run
//! on plain `Vec<f64>` images, single-precision `Vec<f32>` images, or `faer`
//! matrices without any change to the algorithm.
//!
//! Reductions (`dot`, `norm2`) are always accumulated and returned in `f64`, even
//! for single-precision storage, so that the optimizer's scalar logic is carried
//! out in double precision.

use faer::{Mat, Scale};
use rustfft::{FftNum, num_traits::Float};

/// Real floating-point element types supported by the FFT-based operators.
///
/// Implemented for `f32` and `f64`. The conversions are exact for `f64` and round
/// to nearest for `f32`.
pub trait Real: FftNum + Float {
    /// Converts a double-precision value to this type.
    fn from_double(value: f64) -> Self;

    /// Converts this value to double precision.
    fn to_double(self) -> f64;
}

impl Real for f32 {
    #[inline]
    fn from_double(value: f64) -> Self {
        value as f32
    }

    #[inline]
    fn to_double(self) -> f64 {
        self as f64
    }
}

impl Real for f64 {
    #[inline]
    fn from_double(value: f64) -> Self {
        value
    }

    #[inline]
    fn to_double(self) -> f64 {
        self
    }
}

/// An element of a real vector space.
///
/// Two vectors belong to the same space when they have the same length. Mixing
/// vectors of different spaces is a programming error and panics.
///
/// # Example
///
/// ```
/// use fft_deconv::vector::Vector;
///
/// let x = vec![3.0_f64, 4.0];
/// let mut y = x.create();
/// y.axpby(2.0, &x, 0.0, &x);
/// assert_eq!(y, vec![6.0, 8.0]);
/// assert_eq!(x.norm2(), 5.0);
/// ```
pub trait Vector {
    /// Returns the number of scalar entries of the vector.
    fn len(&self) -> usize;

    /// Returns `true` if the vector has no entries.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Creates a new zero vector of the same space.
    fn create(&self) -> Self
    where
        Self: Sized;

    /// Overwrites `self` with the contents of `src`.
    fn copy_from(&mut self, src: &Self);

    /// Returns the inner product `<self, other>`.
    fn dot(&self, other: &Self) -> f64;

    /// Returns the Euclidean norm of the vector.
    fn norm2(&self) -> f64 {
        self.dot(self).sqrt()
    }

    /// Computes `self = alpha * self`.
    fn scale(&mut self, alpha: f64);

    /// Computes `self = self + alpha * x`.
    fn axpy(&mut self, alpha: f64, x: &Self);

    /// Computes `self = a * x + b * y`.
    fn axpby(&mut self, a: f64, x: &Self, b: f64, y: &Self);
}

#[inline]
fn check_same_space(expected: usize, actual: usize) {
    assert_eq!(
        expected, actual,
        "Vector space mismatch: expected {} entries but got {}.",
        expected, actual,
    );
}

impl<T: Real> Vector for Vec<T> {
    #[inline]
    fn len(&self) -> usize {
        self.as_slice().len()
    }

    fn create(&self) -> Self {
        vec![T::zero(); self.as_slice().len()]
    }

    fn copy_from(&mut self, src: &Self) {
        check_same_space(self.as_slice().len(), src.as_slice().len());
        self.copy_from_slice(src);
    }

    fn dot(&self, other: &Self) -> f64 {
        check_same_space(self.as_slice().len(), other.as_slice().len());
        self.iter()
            .zip(other.iter())
            .map(|(&a, &b)| a.to_double() * b.to_double())
            .sum()
    }

    fn scale(&mut self, alpha: f64) {
        if alpha == 1.0 {
            return;
        }
        if alpha == 0.0 {
            self.fill(T::zero());
            return;
        }
        let alpha = T::from_double(alpha);
        self.iter_mut().for_each(|v| *v = *v * alpha);
    }

    fn axpy(&mut self, alpha: f64, x: &Self) {
        check_same_space(self.as_slice().len(), x.as_slice().len());
        if alpha == 0.0 {
            return;
        }
        let alpha = T::from_double(alpha);
        for (v, &xi) in self.iter_mut().zip(x.iter()) {
            *v = *v + alpha * xi;
        }
    }

    fn axpby(&mut self, a: f64, x: &Self, b: f64, y: &Self) {
        check_same_space(self.as_slice().len(), x.as_slice().len());
        check_same_space(self.as_slice().len(), y.as_slice().len());
        let (a, b) = (T::from_double(a), T::from_double(b));
        for ((v, &xi), &yi) in self.iter_mut().zip(x.iter()).zip(y.iter()) {
            *v = a * xi + b * yi;
        }
    }
}

/// Implementation of `Vector` for `faer`'s owned dense matrix (`Mat`).
///
/// All entries are treated as one flat vector, so a single-column matrix is the
/// usual choice, but any shape works as long as both operands share it.
impl Vector for Mat<f64> {
    #[inline]
    fn len(&self) -> usize {
        self.nrows() * self.ncols()
    }

    fn create(&self) -> Self {
        Mat::zeros(self.nrows(), self.ncols())
    }

    fn copy_from(&mut self, src: &Self) {
        check_same_shape(self, src);
        self.as_mut().copy_from(src.as_ref());
    }

    fn dot(&self, other: &Self) -> f64 {
        check_same_shape(self, other);
        (0..self.ncols())
            .map(|j| self.col(j).transpose() * other.col(j))
            .sum()
    }

    fn norm2(&self) -> f64 {
        self.norm_l2()
    }

    fn scale(&mut self, alpha: f64) {
        *self *= Scale(alpha);
    }

    fn axpy(&mut self, alpha: f64, x: &Self) {
        check_same_shape(self, x);
        if alpha == 0.0 {
            return;
        }
        *self += x * Scale(alpha);
    }

    fn axpby(&mut self, a: f64, x: &Self, b: f64, y: &Self) {
        check_same_shape(self, x);
        check_same_shape(self, y);
        *self = x * Scale(a) + y * Scale(b);
    }
}

fn check_same_shape(a: &Mat<f64>, b: &Mat<f64>) {
    assert!(
        a.nrows() == b.nrows() && a.ncols() == b.ncols(),
        "Vector space mismatch: expected a {}x{} matrix but got {}x{}.",
        a.nrows(),
        a.ncols(),
        b.nrows(),
        b.ncols(),
    );
}
