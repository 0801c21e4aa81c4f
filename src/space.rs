//! Semantic axis layouts.
//!
//! A [`Space`] names the dimensions of a tensor. Each tensor dimension is
//! bound to a *group* of one or more primitive [`Axis`] names; a group with
//! several axes is those axes merged in row-major order. Layers read the
//! incoming space, [`transform`](Space::transform) the tensor into the
//! layout their kernel wants, and publish the space of their output.
//!
//! ```rust
//! use csm::space::{Axis, Space};
//! use csm::tensors::Tensor;
//!
//! let x = Tensor::from_fn(vec![2, 3], |i| i as f64);
//! let space = Space::infer(&x, &[Axis::Batch, Axis::Width]).unwrap();
//! let (y, y_space) = space.transform(&x, &[[Axis::Width], [Axis::Batch]]).unwrap();
//! assert_eq!(y.shape, vec![3, 2]);
//! assert_eq!(y.data, vec![0.0, 3.0, 1.0, 4.0, 2.0, 5.0]);
//! assert_eq!(y_space.shape(), vec![3, 2]);
//! ```

use core::fmt;
use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::tensors::Tensor;

/// A primitive axis name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Axis {
    /// `b`: one entry per sentence in the batch.
    Batch,
    /// `w`: position along the sentence.
    Width,
    /// `f`: feature maps (convolution output channels).
    FeatureMap,
    /// `d`: embedding depth.
    Depth,
    /// `c`: output classes.
    Class,
}

impl Axis {
    pub const fn name(self) -> char {
        match self {
            Self::Batch => 'b',
            Self::Width => 'w',
            Self::FeatureMap => 'f',
            Self::Depth => 'd',
            Self::Class => 'c',
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl TryFrom<char> for Axis {
    type Error = char;

    fn try_from(value: char) -> Result<Self, Self::Error> {
        match value {
            'b' => Ok(Self::Batch),
            'w' => Ok(Self::Width),
            'f' => Ok(Self::FeatureMap),
            'd' => Ok(Self::Depth),
            'c' => Ok(Self::Class),
            other => Err(other),
        }
    }
}

/// The axis layout of one tensor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Space {
    axes: Vec<Vec<Axis>>,
    extents: BTreeMap<Axis, usize>,
}

impl Space {
    /// Binds `axes` to the dimensions of `tensor`, one name per dimension.
    ///
    /// # Errors
    /// - [`Error::Shape`] if the number of names differs from the tensor rank
    /// - [`Error::DuplicateAxis`] if a name repeats
    pub fn infer<T>(tensor: &Tensor<T>, axes: &[Axis]) -> Result<Self> {
        Self::from_shape(&tensor.shape, axes)
    }

    /// Like [`Space::infer`] but from a bare shape.
    ///
    /// # Errors
    /// See [`Space::infer`].
    pub fn from_shape(shape: &[usize], axes: &[Axis]) -> Result<Self> {
        if shape.len() != axes.len() {
            return Err(Error::Shape {
                axes: axes.len(),
                rank: shape.len(),
            });
        }
        let mut extents = BTreeMap::new();
        for (&axis, &extent) in axes.iter().zip(shape) {
            if extents.insert(axis, extent).is_some() {
                return Err(Error::DuplicateAxis(axis));
            }
        }
        Ok(Self {
            axes: axes.iter().map(|&a| vec![a]).collect(),
            extents,
        })
    }

    /// Axis groups, one per tensor dimension.
    pub fn axes(&self) -> &[Vec<Axis>] {
        &self.axes
    }

    /// Primitive axes in storage order.
    pub fn flat_axes(&self) -> Vec<Axis> {
        self.axes.iter().flatten().copied().collect()
    }

    /// Primitive axes other than `excluded`, in storage order.
    pub fn axes_except(&self, excluded: &[Axis]) -> Vec<Axis> {
        self.axes
            .iter()
            .flatten()
            .copied()
            .filter(|a| !excluded.contains(a))
            .collect()
    }

    pub fn contains(&self, axis: Axis) -> bool {
        self.extents.contains_key(&axis)
    }

    /// Extent of a primitive axis.
    ///
    /// # Errors
    /// [`Error::Axis`] if the axis is absent.
    pub fn extent(&self, axis: Axis) -> Result<usize> {
        self.extents.get(&axis).copied().ok_or(Error::Axis(axis))
    }

    /// Extent of a primitive axis, or 1 if absent.
    pub fn extent_or_one(&self, axis: Axis) -> usize {
        self.extents.get(&axis).copied().unwrap_or(1)
    }

    /// Tensor shape implied by this space.
    pub fn shape(&self) -> Vec<usize> {
        self.axes
            .iter()
            .map(|group| group.iter().map(|a| self.extents[a]).product())
            .collect()
    }

    /// Total element count.
    pub fn size(&self) -> usize {
        self.extents.values().product()
    }

    /// The same layout with one axis resized.
    ///
    /// # Errors
    /// [`Error::Axis`] if the axis is absent.
    pub fn with_extent(&self, axis: Axis, extent: usize) -> Result<Self> {
        let mut out = self.clone();
        *out.extents.get_mut(&axis).ok_or(Error::Axis(axis))? = extent;
        Ok(out)
    }

    /// The same layout with an extra trailing dimension.
    ///
    /// # Errors
    /// [`Error::DuplicateAxis`] if the axis already exists.
    pub fn with_trailing_axis(&self, axis: Axis, extent: usize) -> Result<Self> {
        if self.contains(axis) {
            return Err(Error::DuplicateAxis(axis));
        }
        let mut out = self.clone();
        out.axes.push(vec![axis]);
        out.extents.insert(axis, extent);
        Ok(out)
    }

    /// Builds a space from explicit groups and extents.
    ///
    /// # Errors
    /// [`Error::DuplicateAxis`] if an axis appears twice.
    pub fn from_groups<G: AsRef<[Axis]>>(groups: &[G], extents: &[(Axis, usize)]) -> Result<Self> {
        let mut map = BTreeMap::new();
        for &(axis, extent) in extents {
            if map.insert(axis, extent).is_some() {
                return Err(Error::DuplicateAxis(axis));
            }
        }
        let mut seen = Vec::new();
        for &axis in groups.iter().flat_map(|g| g.as_ref()) {
            if seen.contains(&axis) {
                return Err(Error::DuplicateAxis(axis));
            }
            if !map.contains_key(&axis) {
                return Err(Error::Axis(axis));
            }
            seen.push(axis);
        }
        if seen.len() != map.len() {
            let missing = map.keys().find(|a| !seen.contains(a)).copied();
            if let Some(axis) = missing {
                return Err(Error::Axis(axis));
            }
        }
        Ok(Self {
            axes: groups.iter().map(|g| g.as_ref().to_vec()).collect(),
            extents: map,
        })
    }

    /// The space [`Space::transform`] would produce for `target`, without
    /// touching any data.
    ///
    /// # Errors
    /// See [`Space::transform`].
    pub fn regroup<G: AsRef<[Axis]>>(&self, target: &[G]) -> Result<Self> {
        let mut order: Vec<Axis> = Vec::with_capacity(self.extents.len());
        for group in target {
            let group = group.as_ref();
            if group.is_empty() {
                return Err(Error::Shape {
                    axes: 0,
                    rank: target.len(),
                });
            }
            for &axis in group {
                if !self.contains(axis) {
                    return Err(Error::Axis(axis));
                }
                if order.contains(&axis) {
                    return Err(Error::DuplicateAxis(axis));
                }
                order.push(axis);
            }
        }
        for (&axis, &extent) in &self.extents {
            if !order.contains(&axis) && extent != 1 {
                return Err(Error::Axis(axis));
            }
        }

        let extents = order.iter().map(|a| (*a, self.extents[a])).collect();
        Ok(Self {
            axes: target.iter().map(|g| g.as_ref().to_vec()).collect(),
            extents,
        })
    }

    /// The same layout with `axis` appended at extent 1 if it is absent.
    pub fn ensure_axis(&self, axis: Axis) -> Self {
        let mut out = self.clone();
        if !out.contains(axis) {
            out.axes.push(vec![axis]);
            out.extents.insert(axis, 1);
        }
        out
    }

    /// Rearranges `tensor` (laid out as `self`) into the `target` grouping.
    ///
    /// Each entry of `target` becomes one dimension of the result, holding the
    /// listed primitive axes merged in row-major order. Axes of extent 1 may
    /// be left out of `target`; they are dropped.
    ///
    /// # Errors
    /// - [`Error::ShapeMismatch`] if `tensor` is not shaped like `self`
    /// - [`Error::Axis`] if `target` names an absent axis or leaves out an
    ///   axis whose extent is not 1
    /// - [`Error::Shape`] if `target` contains an empty group
    /// - [`Error::DuplicateAxis`] if `target` names an axis twice
    pub fn transform<T: Copy, G: AsRef<[Axis]>>(
        &self,
        tensor: &Tensor<T>,
        target: &[G],
    ) -> Result<(Tensor<T>, Self)> {
        let shape = self.shape();
        if tensor.shape != shape {
            return Err(Error::mismatch("space transform", shape, tensor.shape.clone()));
        }

        let out_space = self.regroup(target)?;
        let order = out_space.flat_axes();
        let source = self.flat_axes();

        let kept: Vec<Axis> = source.iter().copied().filter(|a| order.contains(a)).collect();
        if kept == order {
            // storage order unchanged, only the grouping differs
            let data = tensor.data.clone();
            return Ok((Tensor::new(out_space.shape(), data), out_space));
        }

        // stride of every source primitive axis
        let mut strides = BTreeMap::new();
        let mut stride = 1;
        for &axis in source.iter().rev() {
            strides.insert(axis, stride);
            stride *= self.extents[&axis];
        }

        let limits: Vec<usize> = order.iter().map(|a| self.extents[a]).collect();
        let steps: Vec<usize> = order.iter().map(|a| strides[a]).collect();
        let mut data = Vec::with_capacity(tensor.data.len());
        if !tensor.data.is_empty() {
            let mut idx = vec![0usize; order.len()];
            loop {
                let offset: usize = idx.iter().zip(&steps).map(|(i, s)| i * s).sum();
                data.push(tensor.data[offset]);
                if !next_index(&mut idx, &limits) {
                    break;
                }
            }
        }

        Ok((Tensor::new(out_space.shape(), data), out_space))
    }

    /// Rearranges `tensor` (laid out as `self`) into the layout of `other`.
    ///
    /// # Errors
    /// See [`Space::transform`]; additionally [`Error::ShapeMismatch`] if the
    /// two spaces disagree on an extent.
    pub fn transform_to<T: Copy>(&self, tensor: &Tensor<T>, other: &Self) -> Result<Tensor<T>> {
        for (axis, &extent) in &other.extents {
            if let Some(&mine) = self.extents.get(axis) {
                if mine != extent {
                    return Err(Error::mismatch("space transform", [extent], [mine]));
                }
            }
        }
        let (out, _) = self.transform(tensor, &other.axes)?;
        Ok(out)
    }
}

impl fmt::Display for Space {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, group) in self.axes.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            for axis in group {
                write!(f, "{axis}")?;
            }
        }
        write!(f, "]")
    }
}

#[inline]
fn next_index(idx: &mut [usize], limits: &[usize]) -> bool {
    for d in (0..idx.len()).rev() {
        idx[d] += 1;
        if idx[d] < limits[d] {
            return true;
        }
        idx[d] = 0;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn bwfd() -> (Tensor<f64>, Space) {
        let x = Tensor::from_fn(vec![2, 3, 2, 4], |i| i as f64);
        let space = Space::infer(&x, &[Axis::Batch, Axis::Width, Axis::FeatureMap, Axis::Depth])
            .unwrap();
        (x, space)
    }

    #[test]
    fn infer_rejects_wrong_rank() {
        let x = Tensor::<f64>::zeros(vec![2, 3]);
        assert_matches!(
            Space::infer(&x, &[Axis::Batch]),
            Err(Error::Shape { axes: 1, rank: 2 })
        );
    }

    #[test]
    fn infer_rejects_duplicate_names() {
        let x = Tensor::<f64>::zeros(vec![2, 3]);
        assert_matches!(
            Space::infer(&x, &[Axis::Batch, Axis::Batch]),
            Err(Error::DuplicateAxis(Axis::Batch))
        );
    }

    #[test]
    fn transform_permutes_and_merges() {
        let (x, space) = bwfd();
        let (y, y_space) = space
            .transform(
                &x,
                &[
                    vec![Axis::Batch, Axis::FeatureMap, Axis::Depth],
                    vec![Axis::Width],
                ],
            )
            .unwrap();
        assert_eq!(y.shape, vec![16, 3]);
        assert_eq!(y_space.flat_axes(), vec![Axis::Batch, Axis::FeatureMap, Axis::Depth, Axis::Width]);

        // element (b=1, w=2, f=1, d=3) lives at 1*24 + 2*8 + 1*4 + 3 in the source
        let source = 24 + 16 + 4 + 3;
        let target = (8 + 4 + 3) * 3 + 2;
        assert_eq!(y.data[target], x.data[source]);
    }

    #[test]
    fn transform_round_trips_through_another_layout() {
        let (x, space) = bwfd();
        let (y, y_space) = space
            .transform(&x, &[[Axis::Depth], [Axis::Width], [Axis::Batch], [Axis::FeatureMap]])
            .unwrap();
        let back = y_space.transform_to(&y, &space).unwrap();
        assert_eq!(back, x);
    }

    #[test]
    fn transform_reports_absent_axis() {
        let (x, space) = bwfd();
        assert_matches!(
            space.transform(&x, &[vec![Axis::Class], vec![Axis::Batch, Axis::Width, Axis::FeatureMap, Axis::Depth]]),
            Err(Error::Axis(Axis::Class))
        );
    }

    #[test]
    fn transform_refuses_to_drop_data() {
        let (x, space) = bwfd();
        assert_matches!(
            space.transform(&x, &[[Axis::Batch], [Axis::Width], [Axis::Depth]]),
            Err(Error::Axis(Axis::FeatureMap))
        );
    }

    #[test]
    fn transform_drops_unit_axes() {
        let x = Tensor::from_fn(vec![3, 1, 2], |i| i as f64);
        let space = Space::infer(&x, &[Axis::Width, Axis::FeatureMap, Axis::Batch]).unwrap();
        let (y, y_space) = space.transform(&x, &[[Axis::Batch], [Axis::Width]]).unwrap();
        assert_eq!(y.shape, vec![2, 3]);
        assert!(!y_space.contains(Axis::FeatureMap));
        assert_eq!(y.data, vec![0.0, 2.0, 4.0, 1.0, 3.0, 5.0]);
    }

    #[test]
    fn display_shows_groups() {
        let (x, space) = bwfd();
        let (_, merged) = space
            .transform(&x, &[vec![Axis::Batch, Axis::Width], vec![Axis::FeatureMap, Axis::Depth]])
            .unwrap();
        assert_eq!(merged.to_string(), "[bw, fd]");
    }
}
