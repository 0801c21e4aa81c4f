//! Metadata travelling alongside every activation and delta.

use crate::mapping::ComponentKind;
use crate::space::{Axis, Space};

/// Layout and per-sentence lengths of the tensor it accompanies.
///
/// Forward passes receive and return a `Meta` describing the input and
/// output respectively. Backward passes receive the meta of the delta and
/// return one describing the delta with respect to the layer input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Meta {
    pub space_below: Space,
    /// Number of valid width positions per batch entry.
    pub lengths: Vec<usize>,
    /// Kind of the layer that produced the current activation, if any.
    pub produced_by: Option<ComponentKind>,
    /// Set by a cost whose delta is already taken w.r.t. softmax logits.
    pub logit_delta: bool,
}

impl Meta {
    pub fn new(space_below: Space, lengths: Vec<usize>) -> Self {
        Self {
            space_below,
            lengths,
            produced_by: None,
            logit_delta: false,
        }
    }

    /// A meta whose lengths cover the full width of every batch entry.
    pub fn full_width(space_below: Space) -> Self {
        let width = space_below.extent_or_one(Axis::Width);
        let batch = space_below.extent_or_one(Axis::Batch);
        Self::new(space_below, vec![width; batch])
    }

    pub fn with_space(mut self, space_below: Space) -> Self {
        self.space_below = space_below;
        self
    }

    pub(crate) fn produced(mut self, kind: ComponentKind) -> Self {
        self.produced_by = Some(kind);
        self
    }
}
