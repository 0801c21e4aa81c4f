//! Pooling layers: k-max selection along the width and pairwise folding.

use core::marker::PhantomData;

use super::{
    FpropState, Layer, LayerConfig, LayerSpec, Saved, check_lengths, delta_in, foreign_state,
    groups,
};
use crate::backend::Device;
use crate::error::{Error, Result};
use crate::mapping::ComponentKind;
use crate::meta::Meta;
use crate::space::{Axis, Space};
use crate::tensors::Ten64;

/// Builder for [`KMaxPooling`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KMaxPoolingConfig {
    pub k: usize,
}

impl KMaxPoolingConfig {
    /// # Errors
    /// [`Error::Configuration`] if `k` is zero.
    pub fn build<D: Device>(self) -> Result<KMaxPooling<D>> {
        if self.k == 0 {
            return Err(Error::config("KMaxPooling", "k must be positive"));
        }
        Ok(KMaxPooling {
            config: self,
            _device: PhantomData,
        })
    }
}

/// Keeps the `k` largest values of every row along the width, in their
/// original order.
///
/// Only the first `lengths[b]` positions of a row compete. A row with fewer
/// valid positions keeps all of them and pads the rest with zeros.
#[derive(Debug, Clone)]
pub struct KMaxPooling<D: Device> {
    config: KMaxPoolingConfig,
    _device: PhantomData<D>,
}

impl<D: Device> KMaxPooling<D> {
    pub fn config(&self) -> KMaxPoolingConfig {
        self.config
    }

    /// Input space as `[b][rest][w]`, and the output space.
    fn spaces(&self, input: &Space) -> Result<(Space, Space)> {
        let arranged = input.regroup(&groups(input, &[Axis::Batch], &[Axis::Width]))?;
        let output = arranged.with_extent(Axis::Width, self.config.k)?;
        Ok((arranged, output))
    }
}

/// Positions of the `k` largest among `row[..valid]`, ascending.
fn top_k(row: &[f64], valid: usize, k: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..valid).collect();
    // stable sort: equal values keep the earlier position first
    order.sort_by(|&a, &b| row[b].total_cmp(&row[a]));
    order.truncate(k);
    order.sort_unstable();
    order
}

impl<D: Device> Layer<D> for KMaxPooling<D> {
    fn kind(&self) -> ComponentKind {
        ComponentKind::KMaxPooling
    }

    fn fprop(&self, x: &D::Array, meta: Meta) -> Result<(D::Array, Meta, FpropState<D>)> {
        let (arranged, output) = self.spaces(&meta.space_below)?;
        let batch = arranged.extent(Axis::Batch)?;
        let width = arranged.extent(Axis::Width)?;
        check_lengths(&meta, batch, width)?;
        let x = meta.space_below.transform_to(D::host(x), &arranged)?;

        let k = self.config.k;
        let rows_per_batch = arranged.size() / (batch * width).max(1);
        let mut y = Ten64::zeros(output.shape());
        let mut selection = vec![None; y.len()];
        for b in 0..batch {
            let valid = meta.lengths[b].min(width);
            for r in 0..rows_per_batch {
                let row_index = b * rows_per_batch + r;
                let row = &x.data[row_index * width..][..width];
                for (slot, pos) in top_k(row, valid, k).into_iter().enumerate() {
                    y.data[row_index * k + slot] = row[pos];
                    selection[row_index * k + slot] = Some(row_index * width + pos);
                }
            }
        }

        let mut out_meta = meta.clone().with_space(output).produced(ComponentKind::KMaxPooling);
        out_meta.lengths.iter_mut().for_each(|l| *l = (*l).min(k));
        Ok((D::from_host(y), out_meta, FpropState::new(meta, Saved::Selection(selection))))
    }

    fn bprop(&self, delta: &D::Array, meta: Meta, state: &FpropState<D>) -> Result<(D::Array, Meta)> {
        let Saved::Selection(selection) = &state.saved else {
            foreign_state(self.kind())
        };
        let (arranged, output) = self.spaces(&state.meta.space_below)?;
        let delta = delta_in::<D>(delta, &meta, &output)?;
        let mut dx = Ten64::zeros(arranged.shape());
        for (d, source) in delta.data.iter().zip(selection) {
            if let Some(source) = *source {
                dx.data[source] += d;
            }
        }
        let dx = arranged.transform_to(&dx, &state.meta.space_below)?;
        Ok((D::from_host(dx), state.meta.clone()))
    }

    fn describe(&self) -> LayerSpec {
        LayerSpec::new(LayerConfig::KMaxPooling(self.config), Vec::new())
    }
}

/// Builder for [`MaxFolding`] and [`SumFolding`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FoldingConfig {
    /// The axis whose adjacent pairs are combined.
    pub axis: Axis,
}

impl Default for FoldingConfig {
    fn default() -> Self {
        Self {
            axis: Axis::FeatureMap,
        }
    }
}

impl FoldingConfig {
    pub fn along(axis: Axis) -> Self {
        Self { axis }
    }

    pub fn build_max<D: Device>(self) -> MaxFolding<D> {
        MaxFolding {
            config: self,
            _device: PhantomData,
        }
    }

    pub fn build_sum<D: Device>(self) -> SumFolding<D> {
        SumFolding {
            config: self,
            _device: PhantomData,
        }
    }

    /// Input space as `[axis][rest]`, and the output space.
    fn spaces(&self, input: &Space) -> Result<(Space, Space)> {
        let arranged = input.regroup(&groups(input, &[self.axis], &[]))?;
        let extent = arranged.extent(self.axis)?;
        if extent % 2 != 0 {
            return Err(Error::mismatch("folding extent", [extent + 1], [extent]));
        }
        let output = arranged.with_extent(self.axis, extent / 2)?;
        Ok((arranged, output))
    }
}

/// Halves an axis by taking the larger of each adjacent pair `(2i, 2i + 1)`.
#[derive(Debug, Clone)]
pub struct MaxFolding<D: Device> {
    config: FoldingConfig,
    _device: PhantomData<D>,
}

impl<D: Device> MaxFolding<D> {
    pub fn new() -> Self {
        FoldingConfig::default().build_max()
    }

    pub fn config(&self) -> FoldingConfig {
        self.config
    }
}

impl<D: Device> Default for MaxFolding<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: Device> Layer<D> for MaxFolding<D> {
    fn kind(&self) -> ComponentKind {
        ComponentKind::MaxFolding
    }

    fn fprop(&self, x: &D::Array, meta: Meta) -> Result<(D::Array, Meta, FpropState<D>)> {
        let (arranged, output) = self.config.spaces(&meta.space_below)?;
        let x = meta.space_below.transform_to(D::host(x), &arranged)?;

        let half = output.extent(self.config.axis)?;
        let cols = output.size() / half.max(1);
        let mut y = Ten64::zeros(output.shape());
        let mut switches = vec![false; y.len()];
        for i in 0..half {
            let first = &x.data[2 * i * cols..][..cols];
            let second = &x.data[(2 * i + 1) * cols..][..cols];
            for j in 0..cols {
                let out = i * cols + j;
                switches[out] = second[j] > first[j];
                y.data[out] = first[j].max(second[j]);
            }
        }

        let out_meta = meta.clone().with_space(output).produced(ComponentKind::MaxFolding);
        Ok((D::from_host(y), out_meta, FpropState::new(meta, Saved::Switches(switches))))
    }

    fn bprop(&self, delta: &D::Array, meta: Meta, state: &FpropState<D>) -> Result<(D::Array, Meta)> {
        let Saved::Switches(switches) = &state.saved else {
            foreign_state(self.kind())
        };
        let (arranged, output) = self.config.spaces(&state.meta.space_below)?;
        let delta = delta_in::<D>(delta, &meta, &output)?;
        let half = output.extent(self.config.axis)?;
        let cols = output.size() / half.max(1);
        let mut dx = Ten64::zeros(arranged.shape());
        for (out, (&d, &second)) in delta.data.iter().zip(switches).enumerate() {
            let (i, j) = (out / cols, out % cols);
            let row = 2 * i + usize::from(second);
            dx.data[row * cols + j] = d;
        }
        let dx = arranged.transform_to(&dx, &state.meta.space_below)?;
        Ok((D::from_host(dx), state.meta.clone()))
    }

    fn describe(&self) -> LayerSpec {
        LayerSpec::new(LayerConfig::MaxFolding(self.config), Vec::new())
    }
}

/// Halves an axis by summing each adjacent pair `(2i, 2i + 1)`.
#[derive(Debug, Clone)]
pub struct SumFolding<D: Device> {
    config: FoldingConfig,
    _device: PhantomData<D>,
}

impl<D: Device> SumFolding<D> {
    pub fn new() -> Self {
        FoldingConfig::default().build_sum()
    }

    pub fn config(&self) -> FoldingConfig {
        self.config
    }
}

impl<D: Device> Default for SumFolding<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: Device> Layer<D> for SumFolding<D> {
    fn kind(&self) -> ComponentKind {
        ComponentKind::SumFolding
    }

    fn fprop(&self, x: &D::Array, meta: Meta) -> Result<(D::Array, Meta, FpropState<D>)> {
        let (arranged, output) = self.config.spaces(&meta.space_below)?;
        let x = meta.space_below.transform_to(D::host(x), &arranged)?;

        let half = output.extent(self.config.axis)?;
        let cols = output.size() / half.max(1);
        let mut y = Ten64::zeros(output.shape());
        for i in 0..half {
            for j in 0..cols {
                y.data[i * cols + j] = x.data[2 * i * cols + j] + x.data[(2 * i + 1) * cols + j];
            }
        }

        let out_meta = meta.clone().with_space(output).produced(ComponentKind::SumFolding);
        Ok((D::from_host(y), out_meta, FpropState::new(meta, Saved::Nothing)))
    }

    fn bprop(&self, delta: &D::Array, meta: Meta, state: &FpropState<D>) -> Result<(D::Array, Meta)> {
        let (arranged, output) = self.config.spaces(&state.meta.space_below)?;
        let delta = delta_in::<D>(delta, &meta, &output)?;
        let half = output.extent(self.config.axis)?;
        let cols = output.size() / half.max(1);
        let mut dx = Ten64::zeros(arranged.shape());
        for i in 0..half {
            let row = &delta.data[i * cols..][..cols];
            dx.data[2 * i * cols..][..cols].copy_from_slice(row);
            dx.data[(2 * i + 1) * cols..][..cols].copy_from_slice(row);
        }
        let dx = arranged.transform_to(&dx, &state.meta.space_below)?;
        Ok((D::from_host(dx), state.meta.clone()))
    }

    fn describe(&self) -> LayerSpec {
        LayerSpec::new(LayerConfig::SumFolding(self.config), Vec::new())
    }
}
