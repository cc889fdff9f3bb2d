//! FFT-based convolution operators and the weighted data-fidelity cost built on
//! them.
//!
//! - [`shape`]: array shapes and the windowed indexing shared by all ranks.
//! - [`fft`]: the in-place N-dimensional FFT.
//! - [`operator`]: the periodic convolution `H` and its adjoint.
//! - [`weighted`]: the weighted least-squares cost `alpha/2·|H·x - d|²_W`.

pub mod fft;
pub mod operator;
pub mod shape;
pub mod weighted;

pub use operator::Convolution;
pub use shape::{Shape, Window, WindowIndices};
pub use weighted::WeightedConvolutionCost;
