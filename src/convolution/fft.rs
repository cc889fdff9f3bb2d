//! In-place N-dimensional complex FFT built from one-dimensional `rustfft` plans.
//!
//! The transform along the first axis works directly on the contiguous lines of
//! the buffer. Along the other axes each line is gathered into a small buffer,
//! transformed and scattered back. Plans and scratch buffers are created once, so
//! transforms never allocate.
//!
//! Neither direction is normalized: `inverse(forward(z)) = N·z` with `N` the number
//! of elements.

use super::shape::Shape;
use crate::vector::Real;
use rustfft::num_complex::Complex;
use rustfft::num_traits::Zero;
use rustfft::{Fft, FftPlanner};
use std::fmt;
use std::sync::Arc;

#[derive(Clone, Copy)]
enum Direction {
    Forward,
    Inverse,
}

pub struct FftNd<T: Real> {
    dims: Vec<usize>,
    strides: Vec<usize>,
    len: usize,
    forward: Vec<Arc<dyn Fft<T>>>,
    inverse: Vec<Arc<dyn Fft<T>>>,
    line: Vec<Complex<T>>,
    scratch: Vec<Complex<T>>,
}

impl<T: Real> fmt::Debug for FftNd<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FftNd").field("dims", &self.dims).finish()
    }
}

impl<T: Real> FftNd<T> {
    /// Plans the transforms for arrays of the given shape.
    pub fn new(shape: &Shape) -> Self {
        let mut planner = FftPlanner::<T>::new();
        let mut forward = Vec::with_capacity(shape.rank());
        let mut inverse = Vec::with_capacity(shape.rank());
        let mut scratch_len = 0;
        for &n in shape.dims() {
            let f = planner.plan_fft_forward(n);
            let i = planner.plan_fft_inverse(n);
            scratch_len = scratch_len
                .max(f.get_inplace_scratch_len())
                .max(i.get_inplace_scratch_len());
            forward.push(f);
            inverse.push(i);
        }
        let longest = shape.dims().iter().copied().max().unwrap_or(1);
        Self {
            dims: shape.dims().to_vec(),
            strides: shape.strides(),
            len: shape.number_of_elements(),
            forward,
            inverse,
            line: vec![Complex::zero(); longest],
            scratch: vec![Complex::zero(); scratch_len],
        }
    }

    /// Number of complex elements of the transformed arrays.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Forward transform (negative exponent) in place.
    pub fn forward(&mut self, data: &mut [Complex<T>]) {
        self.transform(data, Direction::Forward);
    }

    /// Unnormalized inverse transform (positive exponent) in place.
    pub fn inverse(&mut self, data: &mut [Complex<T>]) {
        self.transform(data, Direction::Inverse);
    }

    fn transform(&mut self, data: &mut [Complex<T>], direction: Direction) {
        assert_eq!(
            data.len(),
            self.len,
            "FFT buffer has {} element(s) but {} were expected.",
            data.len(),
            self.len
        );
        for axis in 0..self.dims.len() {
            let n = self.dims[axis];
            if n == 1 {
                continue;
            }
            let plan = match direction {
                Direction::Forward => Arc::clone(&self.forward[axis]),
                Direction::Inverse => Arc::clone(&self.inverse[axis]),
            };
            if axis == 0 {
                // Lines along the first axis are contiguous.
                plan.process_with_scratch(data, &mut self.scratch);
                continue;
            }
            let stride = self.strides[axis];
            let block = stride * n;
            let line = &mut self.line[..n];
            for base in (0..self.len).step_by(block) {
                for first in base..base + stride {
                    for (i, v) in line.iter_mut().enumerate() {
                        *v = data[first + i * stride];
                    }
                    plan.process_with_scratch(line, &mut self.scratch);
                    for (i, v) in line.iter().enumerate() {
                        data[first + i * stride] = *v;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn naive_dft_2d(data: &[Complex<f64>], d0: usize, d1: usize) -> Vec<Complex<f64>> {
        let mut out = vec![Complex::zero(); d0 * d1];
        for k1 in 0..d1 {
            for k0 in 0..d0 {
                let mut sum = Complex::zero();
                for i1 in 0..d1 {
                    for i0 in 0..d0 {
                        let phase = -2.0
                            * std::f64::consts::PI
                            * ((k0 * i0) as f64 / d0 as f64 + (k1 * i1) as f64 / d1 as f64);
                        sum += data[i0 + d0 * i1] * Complex::new(phase.cos(), phase.sin());
                    }
                }
                out[k0 + d0 * k1] = sum;
            }
        }
        out
    }

    #[test]
    fn test_forward_matches_naive_dft() {
        let shape = Shape::new(&[4, 3]).unwrap();
        let mut fft = FftNd::<f64>::new(&shape);
        let data: Vec<Complex<f64>> = (0..12)
            .map(|i| Complex::new(i as f64 * 0.5 - 1.0, (i % 5) as f64))
            .collect();
        let expected = naive_dft_2d(&data, 4, 3);
        let mut z = data.clone();
        fft.forward(&mut z);
        for (a, b) in z.iter().zip(&expected) {
            assert!((*a - *b).norm() < 1e-10, "{} != {}", a, b);
        }
    }

    #[test]
    fn test_inverse_is_unnormalized() {
        let shape = Shape::new(&[2, 3, 4]).unwrap();
        let mut fft = FftNd::<f64>::new(&shape);
        let data: Vec<Complex<f64>> = (0..24)
            .map(|i| Complex::new((i as f64).sin(), (i as f64).cos()))
            .collect();
        let mut z = data.clone();
        fft.forward(&mut z);
        fft.inverse(&mut z);
        for (a, b) in z.iter().zip(&data) {
            assert!((*a / 24.0 - *b).norm() < 1e-12);
        }
    }
}
