//! FFT-based convolution operator.
//!
//! The operator models `H = R·F⁻¹·diag(MTF)·F·S`, the periodic approximation of a
//! convolution by a point-spread function (PSF):
//! - `S` embeds a vector of the input space into a zero-padded complex workspace,
//! - `F` is the forward FFT of the workspace and `F⁻¹` the unnormalized inverse FFT,
//! - `MTF = F(psf)/N`, where `N` is the number of elements of the workspace,
//! - `R` extracts the real part of a window of the workspace into the output space.
//!
//! The adjoint `H* = S*·F⁻¹·diag(conj(MTF))·F·R*` is applied by the very same
//! [`Convolution::convolve`] routine with `conj = true`, since the adjoint of a
//! multiplication by a complex transfer function is the multiplication by its
//! conjugate.
//!
//! The workspace is allocated once, when the operator is built, and every push,
//! convolve and pull works on it in place.

use super::fft::FftNd;
use super::shape::{Shape, Window};
use crate::error::{DeconvErrorKind, DeconvResult};
use crate::vector::Real;
use rustfft::num_complex::Complex;
use rustfft::num_traits::Zero;

#[derive(Debug)]
pub struct Convolution<T: Real> {
    work: Shape,
    input: Window,
    output: Window,
    fft: FftNd<T>,
    /// Complex workspace, one entry per frequency.
    z: Vec<Complex<T>>,
    mtf: Option<Vec<Complex<T>>>,
}

impl<T: Real> Convolution<T> {
    /// Creates a convolution whose input and output spaces are windows of the
    /// workspace.
    ///
    /// # Arguments
    /// * `work`: The shape of the workspace (the period of the convolution).
    /// * `input`, `input_offset`: The input space and its position in the workspace.
    /// * `output`, `output_offset`: The output space and its position in the
    ///   workspace.
    ///
    /// # Errors
    /// Fails if the ranks differ, or if a space is out of the workspace.
    pub fn new(
        work: Shape,
        input: Shape,
        input_offset: &[usize],
        output: Shape,
        output_offset: &[usize],
    ) -> DeconvResult<Self> {
        let input = Window::new(&work, &input, input_offset)?;
        let output = Window::new(&work, &output, output_offset)?;
        let n = work.number_of_elements();
        log::debug!(
            "Convolution over a {} workspace (input {} at {:?}, output {} at {:?}).",
            work,
            input.inner(),
            input.offset(),
            output.inner(),
            output.offset()
        );
        Ok(Self {
            fft: FftNd::new(&work),
            z: vec![Complex::zero(); n],
            mtf: None,
            work,
            input,
            output,
        })
    }

    /// Creates a convolution whose input, output and workspace share `shape`.
    pub fn square(shape: Shape) -> DeconvResult<Self> {
        let zeros = vec![0; shape.rank()];
        Self::new(shape.clone(), shape.clone(), &zeros, shape, &zeros)
    }

    /// Creates a convolution whose workspace is the input space and whose output
    /// space is a window of it at `output_offset`.
    pub fn with_output(input: Shape, output: Shape, output_offset: &[usize]) -> DeconvResult<Self> {
        let zeros = vec![0; input.rank()];
        Self::new(input.clone(), input, &zeros, output, output_offset)
    }

    pub fn work_shape(&self) -> &Shape {
        &self.work
    }

    pub fn input_shape(&self) -> &Shape {
        self.input.inner()
    }

    pub fn output_shape(&self) -> &Shape {
        self.output.inner()
    }

    pub fn input_window(&self) -> &Window {
        &self.input
    }

    pub fn output_window(&self) -> &Window {
        &self.output
    }

    /// Number of frequencies, which is also the number of elements of the
    /// workspace.
    pub fn number_of_frequencies(&self) -> usize {
        self.z.len()
    }

    pub fn workspace(&self) -> &[Complex<T>] {
        &self.z
    }

    pub fn workspace_mut(&mut self) -> &mut [Complex<T>] {
        &mut self.z
    }

    /// The output window together with the workspace, borrowed at the same time.
    pub fn output_window_and_workspace(&mut self) -> (&Window, &mut [Complex<T>]) {
        (&self.output, &mut self.z)
    }

    pub fn mtf(&self) -> Option<&[Complex<T>]> {
        self.mtf.as_deref()
    }

    fn window(&self, adjoint: bool) -> &Window {
        if adjoint { &self.output } else { &self.input }
    }

    /// Copies `src` into the real part of the workspace, zeroing everything else.
    ///
    /// Applies `S` (`src` in the input space) if `adjoint` is false and `R*` (`src`
    /// in the output space) otherwise.
    pub fn push(&mut self, src: &[T], adjoint: bool) -> DeconvResult<()> {
        let what = if adjoint { "output vector" } else { "input vector" };
        self.window(adjoint).inner().check_len(what, src.len())?;
        let window = if adjoint { &self.output } else { &self.input };
        if window.is_full() {
            for (z, &x) in self.z.iter_mut().zip(src) {
                *z = Complex::new(x, T::zero());
            }
            return Ok(());
        }
        self.z.fill(Complex::zero());
        for (j, k) in window.indices() {
            self.z[k] = Complex::new(src[j], T::zero());
        }
        Ok(())
    }

    /// Copies the real part of the workspace into `dst`.
    ///
    /// Applies `R` (`dst` in the output space) if `adjoint` is false and `S*`
    /// (`dst` in the input space) otherwise.
    pub fn pull(&self, dst: &mut [T], adjoint: bool) -> DeconvResult<()> {
        let window = self.window(!adjoint);
        let what = if adjoint { "input vector" } else { "output vector" };
        window.inner().check_len(what, dst.len())?;
        for (j, k) in window.indices() {
            dst[j] = self.z[k].re;
        }
        Ok(())
    }

    /// Same as [`Convolution::pull`] but adds the real part of the workspace to
    /// `dst`.
    pub fn pull_add(&self, dst: &mut [T], adjoint: bool) -> DeconvResult<()> {
        let window = self.window(!adjoint);
        let what = if adjoint { "input vector" } else { "output vector" };
        window.inner().check_len(what, dst.len())?;
        for (j, k) in window.indices() {
            dst[j] = dst[j] + self.z[k].re;
        }
        Ok(())
    }

    /// Forward FFT of the workspace in place.
    pub fn forward_fft(&mut self) {
        self.fft.forward(&mut self.z);
    }

    /// Unnormalized inverse FFT of the workspace in place.
    pub fn backward_fft(&mut self) {
        self.fft.inverse(&mut self.z);
    }

    /// Computes `F⁻¹·diag(MTF)·F·z` in place, or `F⁻¹·diag(conj(MTF))·F·z` if
    /// `conj` is true, where `z` is the workspace.
    pub fn convolve(&mut self, conj: bool) -> DeconvResult<()> {
        let Some(mtf) = self.mtf.as_ref() else {
            return Err(DeconvErrorKind::MtfNotSet.into());
        };
        self.fft.forward(&mut self.z);
        if conj {
            for (z, h) in self.z.iter_mut().zip(mtf) {
                *z = *z * h.conj();
            }
        } else {
            for (z, h) in self.z.iter_mut().zip(mtf) {
                *z = *z * *h;
            }
        }
        self.fft.inverse(&mut self.z);
        Ok(())
    }

    /// Applies `H` (or `H*` if `adjoint` is true) to `src` and stores the result
    /// in `dst`.
    pub fn apply(&mut self, src: &[T], dst: &mut [T], adjoint: bool) -> DeconvResult<()> {
        self.push(src, adjoint)?;
        self.convolve(adjoint)?;
        self.pull(dst, adjoint)
    }

    /// Sets the PSF.
    ///
    /// Element `i` of the PSF is stored at the workspace position
    /// `(i - offset) mod dim` along each axis, so `offset` is the position of the
    /// center of the PSF in its own array.
    ///
    /// # Arguments
    /// * `psf`, `psf_shape`: The PSF, stored flat with the first axis fastest.
    /// * `offset`: The center of the PSF, `offset[d] < psf_shape[d]`.
    /// * `normalize`: Scale the PSF so that its elements sum to one.
    ///
    /// # Errors
    /// Fails if the PSF does not fit into the workspace, if the offset is out of
    /// range, or if `normalize` is requested for a PSF of zero sum.
    pub fn set_psf(
        &mut self,
        psf: &[T],
        psf_shape: &Shape,
        offset: &[usize],
        normalize: bool,
    ) -> DeconvResult<()> {
        self.work.check_rank("PSF", psf_shape)?;
        psf_shape.check_len("PSF", psf.len())?;
        if offset.len() != psf_shape.rank() {
            return Err(DeconvErrorKind::RankMismatch {
                what: "PSF offset",
                expected: psf_shape.rank(),
                actual: offset.len(),
            }
            .into());
        }
        for axis in 0..psf_shape.rank() {
            let (len, dim) = (psf_shape.dim(axis), self.work.dim(axis));
            if len > dim {
                return Err(DeconvErrorKind::RegionOverflow {
                    axis,
                    offset: 0,
                    len,
                    dim,
                }
                .into());
            }
            if offset[axis] >= len {
                return Err(DeconvErrorKind::OffsetOutOfRange {
                    axis,
                    offset: offset[axis],
                    dim: len,
                }
                .into());
            }
        }

        let scale = if normalize {
            let sum: f64 = psf.iter().map(|v| v.to_double()).sum();
            if sum == 0.0 {
                return Err(DeconvErrorKind::ZeroPsfSum.into());
            }
            1.0 / sum
        } else {
            1.0
        };

        // Place the PSF in the MTF buffer with its center at the origin.
        let n = self.number_of_frequencies();
        let mut mtf = self
            .mtf
            .take()
            .unwrap_or_else(|| vec![Complex::zero(); n]);
        mtf.fill(Complex::zero());
        let dims = self.work.dims();
        let strides = self.work.strides();
        let mut counter = vec![0; psf_shape.rank()];
        for &value in psf {
            let k: usize = (0..dims.len())
                .map(|d| ((counter[d] + dims[d] - offset[d]) % dims[d]) * strides[d])
                .sum();
            mtf[k] = Complex::new(T::from_double(value.to_double() * scale), T::zero());
            for (d, count) in counter.iter_mut().enumerate() {
                *count += 1;
                if *count < psf_shape.dim(d) {
                    break;
                }
                *count = 0;
            }
        }
        self.compute_mtf(mtf);
        Ok(())
    }

    /// Sets the PSF from a workspace-sized array whose center is already at the
    /// origin.
    pub fn set_psf_in_workspace(&mut self, psf: &[T]) -> DeconvResult<()> {
        self.work.check_len("PSF", psf.len())?;
        let n = self.number_of_frequencies();
        let mut mtf = self
            .mtf
            .take()
            .unwrap_or_else(|| vec![Complex::zero(); n]);
        for (h, &v) in mtf.iter_mut().zip(psf) {
            *h = Complex::new(v, T::zero());
        }
        self.compute_mtf(mtf);
        Ok(())
    }

    /// Sets the MTF directly. It must already include the `1/N` scaling.
    pub fn set_mtf(&mut self, mtf: Vec<Complex<T>>) -> DeconvResult<()> {
        self.work.check_len("MTF", mtf.len())?;
        self.mtf = Some(mtf);
        Ok(())
    }

    /// Transforms `buf`, which holds the centered PSF, into the MTF.
    fn compute_mtf(&mut self, mut buf: Vec<Complex<T>>) {
        let scale = T::from_double(1.0 / buf.len() as f64);
        for h in buf.iter_mut() {
            *h = Complex::new(h.re * scale, T::zero());
        }
        self.fft.forward(&mut buf);
        log::debug!("MTF computed over a {} workspace.", self.work);
        self.mtf = Some(buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape(dims: &[usize]) -> Shape {
        Shape::new(dims).unwrap()
    }

    #[test]
    fn test_convolve_requires_mtf() {
        let mut cnvl = Convolution::<f64>::square(shape(&[4])).unwrap();
        let err = cnvl.convolve(false).unwrap_err();
        assert_eq!(err.kind(), &DeconvErrorKind::MtfNotSet);
    }

    #[test]
    fn test_shift_impulse_moves_data_forward() {
        // An impulse at workspace index 1 shifts the data forward by one sample.
        // With a forward transform in place of the inverse, the result would be
        // reversed instead.
        let mut cnvl = Convolution::<f64>::square(shape(&[5])).unwrap();
        cnvl.set_psf_in_workspace(&[0.0, 1.0, 0.0, 0.0, 0.0]).unwrap();
        let x = [1.0, 2.0, 3.0, 4.0, 5.0];
        let mut y = [0.0; 5];
        cnvl.apply(&x, &mut y, false).unwrap();
        let expected = [5.0, 1.0, 2.0, 3.0, 4.0];
        for (a, b) in y.iter().zip(&expected) {
            assert!((a - b).abs() < 1e-12, "{:?} != {:?}", y, expected);
        }
        // The adjoint shifts backward.
        cnvl.apply(&x, &mut y, true).unwrap();
        let expected = [2.0, 3.0, 4.0, 5.0, 1.0];
        for (a, b) in y.iter().zip(&expected) {
            assert!((a - b).abs() < 1e-12, "{:?} != {:?}", y, expected);
        }
    }

    #[test]
    fn test_matches_naive_circular_convolution_2d() {
        let (d0, d1) = (5, 4);
        let mut cnvl = Convolution::<f64>::square(shape(&[d0, d1])).unwrap();
        let psf = [0.1, 0.2, 0.3, 0.4, 0.5, 0.6];
        let off = [1, 1];
        cnvl.set_psf(&psf, &shape(&[3, 2]), &off, false).unwrap();

        let x: Vec<f64> = (0..d0 * d1).map(|i| ((i * 7) % 11) as f64 - 3.0).collect();
        let mut y = vec![0.0; d0 * d1];
        cnvl.apply(&x, &mut y, false).unwrap();

        for i1 in 0..d1 {
            for i0 in 0..d0 {
                let mut expected = 0.0;
                for p1 in 0..2 {
                    for p0 in 0..3 {
                        // Tap (p0, p1) sits at (p0 - 1, p1 - 1) relative to the center.
                        let j0 = (i0 + d0 + off[0] - p0) % d0;
                        let j1 = (i1 + d1 + off[1] - p1) % d1;
                        expected += psf[p0 + 3 * p1] * x[j0 + d0 * j1];
                    }
                }
                let got = y[i0 + d0 * i1];
                assert!((got - expected).abs() < 1e-12, "({}, {}): {} != {}", i0, i1, got, expected);
            }
        }
    }

    #[test]
    fn test_windowed_push_pull() {
        let mut cnvl =
            Convolution::<f64>::with_output(shape(&[4, 3]), shape(&[2, 2]), &[1, 1]).unwrap();
        assert_eq!(cnvl.number_of_frequencies(), 12);
        cnvl.push(&[1.0, 2.0, 3.0, 4.0], true).unwrap();
        let mut x = vec![0.0; 12];
        cnvl.pull(&mut x, true).unwrap();
        let mut expected = vec![0.0; 12];
        expected[5] = 1.0;
        expected[6] = 2.0;
        expected[9] = 3.0;
        expected[10] = 4.0;
        assert_eq!(x, expected);

        let mut y = vec![0.0; 4];
        cnvl.pull(&mut y, false).unwrap();
        assert_eq!(y, vec![1.0, 2.0, 3.0, 4.0]);
        cnvl.pull_add(&mut y, false).unwrap();
        assert_eq!(y, vec![2.0, 4.0, 6.0, 8.0]);
    }

    #[test]
    fn test_size_checks() {
        let mut cnvl = Convolution::<f64>::with_output(shape(&[8]), shape(&[4]), &[2]).unwrap();
        let err = cnvl.push(&[0.0; 4], false).unwrap_err();
        assert_eq!(
            err.kind(),
            &DeconvErrorKind::SizeMismatch {
                what: "input vector",
                expected: 8,
                actual: 4
            }
        );
        assert!(Convolution::<f64>::with_output(shape(&[8]), shape(&[4]), &[5]).is_err());
    }

    #[test]
    fn test_normalized_psf() {
        let mut cnvl = Convolution::<f64>::square(shape(&[6])).unwrap();
        let err = cnvl
            .set_psf(&[1.0, -1.0], &shape(&[2]), &[0], true)
            .unwrap_err();
        assert_eq!(err.kind(), &DeconvErrorKind::ZeroPsfSum);
        cnvl.set_psf(&[2.0, 2.0, 4.0], &shape(&[3]), &[1], true)
            .unwrap();
        // A normalized PSF preserves the sum of the data.
        let x = [1.0, 0.0, 3.0, 0.0, 0.0, 2.0];
        let mut y = [0.0; 6];
        cnvl.apply(&x, &mut y, false).unwrap();
        assert!((y.iter().sum::<f64>() - 6.0).abs() < 1e-12);
        // The zero frequency of the MTF is 1/N.
        let mtf = cnvl.mtf().unwrap();
        assert!((mtf[0].re - 1.0 / 6.0).abs() < 1e-15);
    }
}
