//! Common utilities shared by the binaries and the tests.
//!
//! - **`synthetic`**: Builds reproducible deconvolution problems (a known object
//!   blurred by a box PSF plus seeded Gaussian noise) and the matching weighted
//!   convolution cost.

pub mod synthetic;
