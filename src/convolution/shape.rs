//! Shapes of N-dimensional arrays and rectangular windows inside them.
//!
//! All arrays are stored flat with the first axis varying fastest, so the flat
//! index of `(i_0, i_1, ..., i_{r-1})` is `i_0 + d_0·(i_1 + d_1·(i_2 + ...))`.
//!
//! The embedding and extraction loops of the convolution operator, as well as the
//! masking loop of the weighted cost, are all expressed with one iterator,
//! [`WindowIndices`], which walks a window in storage order and yields the flat
//! index inside the window together with the flat index inside the enclosing
//! array. The same code therefore serves every rank.

use crate::error::{DeconvErrorKind, DeconvResult};
use std::fmt;

/// The dimensions of an N-dimensional array.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Shape {
    dims: Vec<usize>,
}

impl Shape {
    /// Creates a shape.
    ///
    /// # Errors
    /// Fails if `dims` is empty or if any dimension is zero.
    pub fn new(dims: &[usize]) -> DeconvResult<Self> {
        if dims.is_empty() {
            return Err(DeconvErrorKind::RankMismatch {
                what: "shape",
                expected: 1,
                actual: 0,
            }
            .into());
        }
        if let Some(axis) = dims.iter().position(|&d| d == 0) {
            return Err(DeconvErrorKind::ZeroDimension {
                what: "shape",
                axis,
            }
            .into());
        }
        Ok(Self {
            dims: dims.to_vec(),
        })
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn dim(&self, axis: usize) -> usize {
        self.dims[axis]
    }

    /// Total number of elements.
    pub fn number_of_elements(&self) -> usize {
        self.dims.iter().product()
    }

    /// Distance in the flat storage between two neighbors along each axis.
    pub fn strides(&self) -> Vec<usize> {
        let mut strides = Vec::with_capacity(self.dims.len());
        let mut stride = 1;
        for &d in &self.dims {
            strides.push(stride);
            stride *= d;
        }
        strides
    }

    /// Checks that `len` matches the number of elements.
    pub(crate) fn check_len(&self, what: &'static str, len: usize) -> DeconvResult<()> {
        let expected = self.number_of_elements();
        if len != expected {
            return Err(DeconvErrorKind::SizeMismatch {
                what,
                expected,
                actual: len,
            }
            .into());
        }
        Ok(())
    }

    pub(crate) fn check_rank(&self, what: &'static str, other: &Shape) -> DeconvResult<()> {
        if other.rank() != self.rank() {
            return Err(DeconvErrorKind::RankMismatch {
                what,
                expected: self.rank(),
                actual: other.rank(),
            }
            .into());
        }
        Ok(())
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims: Vec<String> = self.dims.iter().map(|d| d.to_string()).collect();
        write!(f, "{}", dims.join("x"))
    }
}

/// A rectangular region of shape `inner` placed at `offset` inside `outer`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Window {
    outer: Shape,
    inner: Shape,
    offset: Vec<usize>,
    strides: Vec<usize>,
    start: usize,
}

impl Window {
    /// Creates a window.
    ///
    /// # Errors
    /// Fails if the ranks differ, if `offset[d] >= outer[d]` or if
    /// `offset[d] + inner[d] > outer[d]` for some axis `d`.
    pub fn new(outer: &Shape, inner: &Shape, offset: &[usize]) -> DeconvResult<Self> {
        outer.check_rank("embedded region", inner)?;
        if offset.len() != outer.rank() {
            return Err(DeconvErrorKind::RankMismatch {
                what: "offset",
                expected: outer.rank(),
                actual: offset.len(),
            }
            .into());
        }
        for axis in 0..outer.rank() {
            let (dim, off, len) = (outer.dim(axis), offset[axis], inner.dim(axis));
            if off >= dim {
                return Err(DeconvErrorKind::OffsetOutOfRange {
                    axis,
                    offset: off,
                    dim,
                }
                .into());
            }
            if off + len > dim {
                return Err(DeconvErrorKind::RegionOverflow {
                    axis,
                    offset: off,
                    len,
                    dim,
                }
                .into());
            }
        }
        let strides = outer.strides();
        let start = offset.iter().zip(&strides).map(|(o, s)| o * s).sum();
        Ok(Self {
            outer: outer.clone(),
            inner: inner.clone(),
            offset: offset.to_vec(),
            strides,
            start,
        })
    }

    /// The window covering all of `shape`.
    pub fn full(shape: &Shape) -> Self {
        Self {
            outer: shape.clone(),
            inner: shape.clone(),
            offset: vec![0; shape.rank()],
            strides: shape.strides(),
            start: 0,
        }
    }

    pub fn outer(&self) -> &Shape {
        &self.outer
    }

    pub fn inner(&self) -> &Shape {
        &self.inner
    }

    pub fn offset(&self) -> &[usize] {
        &self.offset
    }

    /// Returns `true` if the window covers the whole enclosing array.
    pub fn is_full(&self) -> bool {
        self.inner == self.outer
    }

    /// Iterates over `(j, k)` where `j` is the flat index inside the window and
    /// `k` the flat index of the same element in the enclosing array. Both
    /// increase strictly.
    pub fn indices(&self) -> WindowIndices<'_> {
        WindowIndices {
            window: self,
            counter: vec![0; self.inner.rank()],
            j: 0,
            k: self.start,
            remaining: self.inner.number_of_elements(),
        }
    }
}

/// Iterator returned by [`Window::indices`].
#[derive(Debug, Clone)]
pub struct WindowIndices<'a> {
    window: &'a Window,
    counter: Vec<usize>,
    j: usize,
    k: usize,
    remaining: usize,
}

impl Iterator for WindowIndices<'_> {
    type Item = (usize, usize);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let item = (self.j, self.k);
        self.remaining -= 1;
        self.j += 1;
        let dims = self.window.inner.dims();
        for (axis, count) in self.counter.iter_mut().enumerate() {
            let stride = self.window.strides[axis];
            *count += 1;
            if *count < dims[axis] {
                self.k += stride;
                break;
            }
            // Carry: rewind this axis and move on to the next one.
            *count = 0;
            self.k -= (dims[axis] - 1) * stride;
        }
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for WindowIndices<'_> {}
