//! This module defines the configuration error types for the library.
//!
//! Configuration mistakes (incompatible shapes, out-of-range offsets, a convolution
//! applied before its transfer function exists, invalid tuning parameters) are
//! centralized into a single enum, [`DeconvErrorKind`], wrapped by the public
//! [`DeconvError`]. They are detected eagerly and are never retried.
//!
//! Numerical failures of the optimizer are *not* errors: they are reported as
//! terminal [`crate::algorithms::OptimTask`] values the caller branches on.
use thiserror::Error;

/// Represents all configuration errors raised by the convolution operators, the
/// weighted cost and the optimizer setup.
#[derive(Error, Debug)]
#[error(transparent)]
pub struct DeconvError(#[from] DeconvErrorKind);

impl DeconvError {
    /// Returns the precise kind of this error.
    pub fn kind(&self) -> &DeconvErrorKind {
        &self.0
    }
}

/// The distinct kinds of configuration errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeconvErrorKind {
    /// Two shapes that must have the same number of axes do not.
    #[error("Rank mismatch: {what} has {actual} dimension(s) but {expected} were expected.")]
    RankMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// A shape has a zero-length axis.
    #[error("Invalid shape: dimension {axis} of {what} is zero.")]
    ZeroDimension { what: &'static str, axis: usize },

    /// A flat array does not have the number of elements its space requires.
    #[error("Size mismatch: {what} has {actual} element(s) but {expected} were expected.")]
    SizeMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// An embedding offset lies outside of the workspace.
    #[error("Out of range offset {offset} along dimension {axis} (workspace dimension is {dim}).")]
    OffsetOutOfRange {
        axis: usize,
        offset: usize,
        dim: usize,
    },

    /// An embedded region extends beyond the workspace.
    #[error(
        "Region beyond workspace along dimension {axis}: offset {offset} + length {len} > {dim}."
    )]
    RegionOverflow {
        axis: usize,
        offset: usize,
        len: usize,
        dim: usize,
    },

    /// `convolve` was called before any PSF or MTF was set.
    #[error("The PSF (or the MTF) must be set before applying the convolution.")]
    MtfNotSet,

    /// The weighted cost was evaluated before the data were set.
    #[error("The data must be set before evaluating the cost.")]
    DataNotSet,

    /// The PSF could not be normalized because its elements sum to zero.
    #[error("The PSF cannot be normalized: the sum of its elements is zero.")]
    ZeroPsfSum,

    /// A statistical weight is negative or not finite.
    #[error("Invalid weight {value} at index {index}: weights must be finite and non-negative.")]
    InvalidWeight { index: usize, value: f64 },

    /// A tuning parameter lies outside of its admissible range.
    #[error("Invalid parameter `{name}` = {value}: {reason}.")]
    InvalidParameter {
        name: &'static str,
        value: f64,
        reason: &'static str,
    },
}

// Manually implement PartialEq for the public error type.
// We compare the inner `DeconvErrorKind`.
impl PartialEq for DeconvError {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

/// Shorthand for the results of fallible setup operations.
pub type DeconvResult<T> = Result<T, DeconvError>;
