//! Synthetic deconvolution problems.
//!
//! A problem is made of a piecewise constant object, a uniform (box) PSF, and data
//! obtained by blurring the object with the periodic convolution and adding white
//! Gaussian noise. The random generator is seeded, so a given set of parameters
//! always yields the same problem.

use crate::convolution::{Convolution, Shape, WeightedConvolutionCost};
use crate::error::{DeconvErrorKind, DeconvResult};
use rand::{Rng, SeedableRng, rngs::StdRng};
use rand_distr::{Distribution, Normal};

/// Builds a test object: a bright box over the central half of every axis on a
/// faint background, plus one point source near the origin.
pub fn test_pattern(shape: &Shape) -> Vec<f64> {
    let dims = shape.dims();
    let mut object = vec![0.1; shape.number_of_elements()];
    let mut counter = vec![0; dims.len()];
    for value in object.iter_mut() {
        let inside = counter
            .iter()
            .zip(dims)
            .all(|(&i, &d)| 4 * i >= d && 4 * i < 3 * d);
        if inside {
            *value = 1.0;
        }
        for (count, &d) in counter.iter_mut().zip(dims) {
            *count += 1;
            if *count < d {
                break;
            }
            *count = 0;
        }
    }
    // Point source at (d/8, d/8, ...).
    let strides = shape.strides();
    let k: usize = dims.iter().zip(&strides).map(|(d, s)| (d / 8) * s).sum();
    object[k] = 2.0;
    object
}

/// Returns a uniform PSF of the given shape, whose elements sum to one, together
/// with the position of its center.
pub fn box_psf(shape: &Shape) -> (Vec<f64>, Vec<usize>) {
    let n = shape.number_of_elements();
    let psf = vec![1.0 / n as f64; n];
    let center = shape.dims().iter().map(|d| d / 2).collect();
    (psf, center)
}

/// Draws `n` independent samples of a centered Gaussian of standard deviation
/// `sigma`.
///
/// # Errors
/// Returns `InvalidParameter` if `sigma` is negative or not finite.
pub fn gaussian_noise<R: Rng>(rng: &mut R, n: usize, sigma: f64) -> DeconvResult<Vec<f64>> {
    let invalid = || DeconvErrorKind::InvalidParameter {
        name: "sigma",
        value: sigma,
        reason: "must be finite and non-negative",
    };
    // `Normal::new` accepts an infinite deviation.
    if !sigma.is_finite() {
        return Err(invalid().into());
    }
    let normal = Normal::new(0.0, sigma).map_err(|_| invalid())?;
    Ok(normal.sample_iter(rng).take(n).collect())
}

/// A blurred and noisy observation of a known object.
#[derive(Debug, Clone)]
pub struct SyntheticProblem {
    pub shape: Shape,
    pub object: Vec<f64>,
    pub psf: Vec<f64>,
    pub psf_shape: Shape,
    pub psf_center: Vec<usize>,
    pub data: Vec<f64>,
    /// Standard deviation of the noise.
    pub sigma: f64,
}

impl SyntheticProblem {
    /// Generates a problem.
    ///
    /// # Arguments
    /// * `shape`: The shape of the object and of the data.
    /// * `psf_shape`: The shape of the box PSF.
    /// * `sigma`: The standard deviation of the noise.
    /// * `seed`: The seed of the noise generator.
    pub fn generate(shape: Shape, psf_shape: Shape, sigma: f64, seed: u64) -> DeconvResult<Self> {
        let object = test_pattern(&shape);
        let (psf, psf_center) = box_psf(&psf_shape);

        let mut cnvl = Convolution::<f64>::square(shape.clone())?;
        cnvl.set_psf(&psf, &psf_shape, &psf_center, false)?;
        let mut data = vec![0.0; shape.number_of_elements()];
        cnvl.apply(&object, &mut data, false)?;

        let mut rng = StdRng::seed_from_u64(seed);
        let noise = gaussian_noise(&mut rng, data.len(), sigma)?;
        for (d, e) in data.iter_mut().zip(noise) {
            *d += e;
        }

        Ok(Self {
            shape,
            object,
            psf,
            psf_shape,
            psf_center,
            data,
            sigma,
        })
    }

    /// Builds the data-fidelity cost of the problem, with uniform weights.
    pub fn cost(&self) -> DeconvResult<WeightedConvolutionCost<f64>> {
        let cnvl = Convolution::<f64>::square(self.shape.clone())?;
        let mut cost = WeightedConvolutionCost::new(cnvl);
        cost.set_psf(&self.psf, &self.psf_shape, &self.psf_center, true)?;
        cost.set_data(self.data.clone())?;
        Ok(cost)
    }
}
