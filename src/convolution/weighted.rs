//! Weighted least-squares data fidelity for a convolution model.
//!
//! The cost of an object `x` is
//!
//! ```text
//! J(x) = alpha/2 · Σ_i w_i·((H·x)_i - d_i)²
//! ```
//!
//! where `H` is a [`Convolution`], `d` the data and `w` the statistical weights
//! (all equal to one when no weights are set). Its gradient
//! `alpha·H*·W·(H·x - d)` is computed together with the cost by one forward and
//! one adjoint convolution: the weighted residuals are written back into the
//! workspace in place of the model, which is then convolved with the conjugate
//! MTF.

use super::operator::Convolution;
use super::shape::Shape;
use crate::error::{DeconvErrorKind, DeconvResult};
use crate::vector::Real;
use rustfft::num_complex::Complex;
use rustfft::num_traits::Zero;

#[derive(Debug)]
pub struct WeightedConvolutionCost<T: Real> {
    cnvl: Convolution<T>,
    data: Option<Vec<T>>,
    weights: Option<Vec<T>>,
}

impl<T: Real> WeightedConvolutionCost<T> {
    pub fn new(cnvl: Convolution<T>) -> Self {
        Self {
            cnvl,
            data: None,
            weights: None,
        }
    }

    pub fn convolution(&self) -> &Convolution<T> {
        &self.cnvl
    }

    pub fn convolution_mut(&mut self) -> &mut Convolution<T> {
        &mut self.cnvl
    }

    /// The shape of the objects `x`.
    pub fn input_shape(&self) -> &Shape {
        self.cnvl.input_shape()
    }

    /// The shape of the data.
    pub fn output_shape(&self) -> &Shape {
        self.cnvl.output_shape()
    }

    pub fn data(&self) -> Option<&[T]> {
        self.data.as_deref()
    }

    pub fn weights(&self) -> Option<&[T]> {
        self.weights.as_deref()
    }

    /// Sets the data, which must belong to the output space of the convolution.
    pub fn set_data(&mut self, data: Vec<T>) -> DeconvResult<()> {
        self.output_shape().check_len("data", data.len())?;
        self.data = Some(data);
        Ok(())
    }

    /// Sets the weights, which must be finite, non-negative and belong to the
    /// output space of the convolution.
    pub fn set_weights(&mut self, weights: Vec<T>) -> DeconvResult<()> {
        self.output_shape().check_len("weights", weights.len())?;
        if let Some((index, value)) = weights
            .iter()
            .map(|w| w.to_double())
            .enumerate()
            .find(|(_, w)| !(w.is_finite() && *w >= 0.0))
        {
            return Err(DeconvErrorKind::InvalidWeight { index, value }.into());
        }
        self.weights = Some(weights);
        Ok(())
    }

    /// Removes the weights: every datum then has unit weight.
    pub fn clear_weights(&mut self) {
        self.weights = None;
    }

    /// See [`Convolution::set_psf`].
    pub fn set_psf(
        &mut self,
        psf: &[T],
        psf_shape: &Shape,
        offset: &[usize],
        normalize: bool,
    ) -> DeconvResult<()> {
        self.cnvl.set_psf(psf, psf_shape, offset, normalize)
    }

    /// Returns the model `H·x` in the output space.
    pub fn model(&mut self, x: &[T]) -> DeconvResult<Vec<T>> {
        self.cnvl.push(x, false)?;
        self.cnvl.convolve(false)?;
        let mut dst = vec![T::zero(); self.output_shape().number_of_elements()];
        self.cnvl.pull(&mut dst, false)?;
        Ok(dst)
    }

    /// Returns the cost at `x`.
    pub fn cost(&mut self, alpha: f64, x: &[T]) -> DeconvResult<f64> {
        let Some(data) = self.data.as_deref() else {
            return Err(DeconvErrorKind::DataNotSet.into());
        };
        self.cnvl.push(x, false)?;
        self.cnvl.convolve(false)?;
        let z = self.cnvl.workspace();
        let mut sum = 0.0;
        match self.weights.as_deref() {
            None => {
                for (j, k) in self.cnvl.output_window().indices() {
                    let r = z[k].re.to_double() - data[j].to_double();
                    sum += r * r;
                }
            }
            Some(w) => {
                for (j, k) in self.cnvl.output_window().indices() {
                    let r = z[k].re.to_double() - data[j].to_double();
                    sum += w[j].to_double() * r * r;
                }
            }
        }
        Ok(alpha * sum / 2.0)
    }

    /// Returns the cost at `x` and stores its gradient in `gx`, or adds it to `gx`
    /// if `clr` is false.
    pub fn cost_and_gradient(
        &mut self,
        alpha: f64,
        x: &[T],
        gx: &mut [T],
        clr: bool,
    ) -> DeconvResult<f64> {
        let Some(data) = self.data.as_deref() else {
            return Err(DeconvErrorKind::DataNotSet.into());
        };
        self.cnvl.input_shape().check_len("gradient", gx.len())?;
        self.cnvl.push(x, false)?;
        self.cnvl.convolve(false)?;

        // Replace the model by alpha·W·(H·x - d) in the output window and zero
        // the rest of the workspace before the adjoint convolution.
        let q = T::from_double(alpha);
        let weights = self.weights.as_deref();
        let (window, z) = self.cnvl.output_window_and_workspace();
        let mut sum = 0.0;
        let mut next = 0;
        for (j, k) in window.indices() {
            z[next..k].fill(Complex::zero());
            let r = z[k].re - data[j];
            let wr = match weights {
                Some(w) => w[j] * r,
                None => r,
            };
            sum += r.to_double() * wr.to_double();
            z[k] = Complex::new(q * wr, T::zero());
            next = k + 1;
        }
        z[next..].fill(Complex::zero());

        self.cnvl.convolve(true)?;
        if clr {
            self.cnvl.pull(gx, true)?;
        } else {
            self.cnvl.pull_add(gx, true)?;
        }
        Ok(alpha * sum / 2.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape(dims: &[usize]) -> Shape {
        Shape::new(dims).unwrap()
    }

    fn identity_cost(n: usize) -> WeightedConvolutionCost<f64> {
        let mut cnvl = Convolution::<f64>::square(shape(&[n])).unwrap();
        cnvl.set_psf(&[1.0], &shape(&[1]), &[0], false).unwrap();
        WeightedConvolutionCost::new(cnvl)
    }

    #[test]
    fn test_data_must_be_set() {
        let mut cost = identity_cost(4);
        let err = cost.cost(1.0, &[0.0; 4]).unwrap_err();
        assert_eq!(err.kind(), &DeconvErrorKind::DataNotSet);
    }

    #[test]
    fn test_weights_are_validated() {
        let mut cost = identity_cost(3);
        let err = cost.set_weights(vec![1.0, -0.5, 1.0]).unwrap_err();
        assert_eq!(
            err.kind(),
            &DeconvErrorKind::InvalidWeight {
                index: 1,
                value: -0.5
            }
        );
        assert!(cost.set_weights(vec![1.0, f64::NAN, 1.0]).is_err());
        assert!(cost.set_weights(vec![1.0; 2]).is_err());
        cost.set_weights(vec![0.0, 1.0, 2.0]).unwrap();
        assert!(cost.weights().is_some());
        cost.clear_weights();
        assert!(cost.weights().is_none());
    }

    #[test]
    fn test_identity_cost_and_gradient() {
        let mut cost = identity_cost(3);
        cost.set_data(vec![1.0, 2.0, 3.0]).unwrap();
        cost.set_weights(vec![1.0, 0.0, 2.0]).unwrap();
        let x = [2.0, 0.0, 0.0];
        // r = (1, -2, -3), w·r² = (1, 0, 18).
        let mut g = vec![10.0; 3];
        let f = cost.cost_and_gradient(2.0, &x, &mut g, true).unwrap();
        assert!((f - 19.0).abs() < 1e-12);
        assert!((cost.cost(2.0, &x).unwrap() - 19.0).abs() < 1e-12);
        let expected = [2.0, 0.0, -12.0];
        for (a, b) in g.iter().zip(&expected) {
            assert!((a - b).abs() < 1e-12, "{:?}", g);
        }

        // Accumulation.
        cost.cost_and_gradient(2.0, &x, &mut g, false).unwrap();
        for (a, b) in g.iter().zip(&expected) {
            assert!((a - 2.0 * b).abs() < 1e-12, "{:?}", g);
        }
    }

    #[test]
    fn test_cost_only_counts_the_output_window() {
        // Workspace of 6 samples, data on samples 2..5.
        let mut cnvl = Convolution::<f64>::with_output(shape(&[6]), shape(&[3]), &[2]).unwrap();
        cnvl.set_psf(&[1.0], &shape(&[1]), &[0], false).unwrap();
        let mut cost = WeightedConvolutionCost::new(cnvl);
        cost.set_data(vec![1.0, 1.0, 1.0]).unwrap();
        let x = [100.0, -50.0, 2.0, 3.0, 4.0, 100.0];
        // Residuals (1, 2, 3): only the window contributes.
        assert!((cost.cost(1.0, &x).unwrap() - 7.0).abs() < 1e-10);
        assert_eq!(cost.model(&x).unwrap().len(), 3);

        // The gradient vanishes outside of the window.
        let mut g = vec![0.0; 6];
        cost.cost_and_gradient(1.0, &x, &mut g, true).unwrap();
        let expected = [0.0, 0.0, 1.0, 2.0, 3.0, 0.0];
        for (a, b) in g.iter().zip(&expected) {
            assert!((a - b).abs() < 1e-10, "{:?}", g);
        }
    }
}
