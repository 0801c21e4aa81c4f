//! Core tensor data structure.
//!
//! # Host Tensors
//!
//! A [`Tensor`] is a shape plus a flat row-major buffer. It carries no axis
//! semantics of its own: which dimension is the batch, the width or the
//! feature maps is described by a [`Space`](crate::space::Space) travelling
//! next to it in the layer [`Meta`](crate::meta::Meta).
//!
//! ## Design Highlights
//! - `Tensor<T>` is generic, but the numerical layers work on [`Ten64`]
//! - Shape is a `Vec<usize>` enforced at runtime
//! - The `tensor!` macro builds tensors from nested literals
//!
//! ## Example
//!
//! ```rust
//! use csm::tensors::Tensor;
//! let t = Tensor::new(vec![2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
//! assert_eq!(t.shape, vec![2, 3]);
//! ```

use crate::error::{Error, Result};

/// Represents an N-dimensional tensor with a shape and flat row-major data.
///
/// - `shape` defines the structure, e.g. `[2, 3]` for a 2×3 matrix.
/// - `data` holds the flattened content in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor<T> {
    pub shape: Vec<usize>,
    pub data: Vec<T>,
}

/// The tensor type every layer computes with.
pub type Ten64 = Tensor<f64>;

impl<T> Tensor<T> {
    /// Creates a new tensor with the given shape and flat data.
    ///
    /// # Panics
    /// Panics if the number of elements in `data` does not match the shape product.
    pub fn new(shape: impl Into<Vec<usize>>, data: Vec<T>) -> Self {
        let shape = shape.into();
        assert_eq!(
            shape.iter().product::<usize>(),
            data.len(),
            "shape {:?} is incompatible with {} data elements",
            shape,
            data.len()
        );
        Self { shape, data }
    }

    /// Fallible [`Tensor::new`].
    ///
    /// # Errors
    /// [`Error::ShapeMismatch`] if `data` does not fill `shape` exactly.
    pub fn try_new(shape: impl Into<Vec<usize>>, data: Vec<T>) -> Result<Self> {
        let shape = shape.into();
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(Error::mismatch("tensor data", [expected], [data.len()]));
        }
        Ok(Self { shape, data })
    }

    /// Builds a tensor by evaluating `f` at every flat index.
    pub fn from_fn(shape: impl Into<Vec<usize>>, f: impl FnMut(usize) -> T) -> Self {
        let shape = shape.into();
        let len = shape.iter().product();
        Self {
            data: (0..len).map(f).collect(),
            shape,
        }
    }

    /// Number of elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of dimensions.
    #[inline]
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Reinterprets the buffer under a new shape with the same element count.
    ///
    /// # Errors
    /// [`Error::ShapeMismatch`] if the element counts differ.
    pub fn reshape(self, shape: impl Into<Vec<usize>>) -> Result<Self> {
        Self::try_new(shape, self.data)
    }

    /// Applies `f` to every element.
    pub fn map<U>(&self, f: impl Fn(&T) -> U) -> Tensor<U> {
        Tensor {
            shape: self.shape.clone(),
            data: self.data.iter().map(f).collect(),
        }
    }

    /// Combines two tensors of identical shape elementwise.
    ///
    /// # Panics
    /// Panics if shapes do not match.
    pub fn zip_map<U, V>(&self, other: &Tensor<U>, f: impl Fn(&T, &U) -> V) -> Tensor<V> {
        assert_eq!(self.shape, other.shape, "shape mismatch");
        Tensor {
            shape: self.shape.clone(),
            data: self.data.iter().zip(&other.data).map(|(a, b)| f(a, b)).collect(),
        }
    }

    /// Replaces this tensor's data with another tensor of the same shape.
    ///
    /// # Panics
    /// Panics if shapes do not match.
    pub fn update(&mut self, mut other: Tensor<T>) {
        assert_eq!(self.shape, other.shape, "shape mismatch");
        std::mem::swap(&mut self.data, &mut other.data);
    }
}

impl<T: Clone> Tensor<T> {
    /// A tensor of `shape` with every element set to `value`.
    pub fn filled(shape: impl Into<Vec<usize>>, value: T) -> Self {
        let shape = shape.into();
        let len = shape.iter().product();
        Self {
            data: vec![value; len],
            shape,
        }
    }
}

impl Ten64 {
    pub fn zeros(shape: impl Into<Vec<usize>>) -> Self {
        Self::filled(shape, 0.0)
    }

    pub fn ones(shape: impl Into<Vec<usize>>) -> Self {
        Self::filled(shape, 1.0)
    }

    pub fn zeros_like(other: &Self) -> Self {
        Self::zeros(other.shape.clone())
    }

    pub fn ones_like(other: &Self) -> Self {
        Self::ones(other.shape.clone())
    }

    /// Sum of all elements.
    pub fn sum(&self) -> f64 {
        self.data.iter().sum()
    }
}

/// Defines a tensor from nested arrays of numbers.
///
/// Supports arbitrary dimensionality as long as sublists are uniform in shape.
///
/// # Example
/// ```
/// use csm::tensor;
/// let t = tensor!([[1.0, 2.0], [3.0, 4.0]]);
/// assert_eq!(t.shape, vec![2, 2]);
/// ```
#[macro_export]
macro_rules! tensor {
    ($lit:literal) => {
        $crate::tensors::Tensor::new(Vec::<usize>::new(), vec![$lit])
    };

    ([ $( [ $( $inner:tt )* ] ),+ $(,)? ]) => {{
        let children = vec![ $( $crate::tensor!([ $( $inner )* ]) ),+ ];
        let first_shape = &children[0].shape;
        assert!(children.iter().all(|c| c.shape == *first_shape),
            "ragged tensor literal (rows have mismatched shapes)");
        let mut shape = vec![children.len()];
        shape.extend_from_slice(first_shape);
        let mut data = Vec::with_capacity(children.len() * children[0].data.len());
        for c in children { data.extend(c.data); }
        $crate::tensors::Tensor::new(shape, data)
    }};

    ([ $( $value:expr ),+ $(,)? ]) => {{
        let data = vec![ $( $value ),+ ];
        $crate::tensors::Tensor::new(vec![data.len()], data)
    }};
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn macro_builds_row_major_data() {
        let t = tensor!([[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
        assert_eq!(t.shape, vec![2, 3]);
        assert_eq!(t.data, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn macro_accepts_signed_entries() {
        let t = tensor!([[-1.0, 0.5], [2.0, -0.25]]);
        assert_eq!(t.shape, vec![2, 2]);
        assert_eq!(t.data, vec![-1.0, 0.5, 2.0, -0.25]);
        assert_eq!(tensor!([3.0, -4.0]).shape, vec![2]);
    }

    #[test]
    fn new_panics_on_shape_mismatch() {
        let result = std::panic::catch_unwind(|| Tensor::new(vec![2, 2], vec![1.0, 2.0, 3.0]));
        assert!(result.is_err());
    }

    #[test]
    fn try_new_reports_mismatch() {
        assert_matches!(
            Tensor::try_new(vec![2, 2], vec![1.0]),
            Err(Error::ShapeMismatch { .. })
        );
    }

    #[test]
    fn reshape_keeps_data_order() {
        let t = tensor!([[1.0, 2.0], [3.0, 4.0]]).reshape(vec![4]).unwrap();
        assert_eq!(t.shape, vec![4]);
        assert_eq!(t.data, vec![1.0, 2.0, 3.0, 4.0]);
        assert!(t.reshape(vec![3]).is_err());
    }
}
