//! Token to index encoding.

use core::marker::PhantomData;
use std::collections::BTreeMap;

use crate::backend::Device;
use crate::error::Result;
use crate::mapping::{ComponentId, ComponentKind};
use crate::meta::Meta;
use crate::space::{Axis, Space};
use crate::tensors::Tensor;

/// Fills positions past the end of a sentence.
pub const PADDING: usize = 0;

/// Stands in for every word missing from the vocabulary.
pub const UNKNOWN: usize = 1;

/// Maps raw tokens to the indices a [`WordEmbedding`](super::WordEmbedding)
/// looks up.
///
/// Indices `0` and `1` are reserved for [`PADDING`] and [`UNKNOWN`]; the
/// vocabulary occupies `2..` in order of first appearance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DictionaryEncoding<D: Device> {
    vocabulary: BTreeMap<String, usize>,
    _device: PhantomData<D>,
}

impl<D: Device> DictionaryEncoding<D> {
    pub fn new<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut vocabulary = BTreeMap::new();
        for word in words {
            let next = vocabulary.len() + 2;
            vocabulary.entry(word.into()).or_insert(next);
        }
        Self {
            vocabulary,
            _device: PhantomData,
        }
    }

    pub fn id(&self) -> ComponentId {
        ComponentId::new(ComponentKind::DictionaryEncoding, D::BACKEND)
    }

    /// Number of indices in use, reserved ones included. This is the
    /// smallest vocabulary size an embedding over this encoding accepts.
    pub fn len(&self) -> usize {
        self.vocabulary.len() + 2
    }

    pub fn is_empty(&self) -> bool {
        self.vocabulary.is_empty()
    }

    pub fn index_of(&self, word: &str) -> usize {
        self.vocabulary.get(word).copied().unwrap_or(UNKNOWN)
    }

    /// Encodes a batch of tokenised sentences into a `(b, w)` index tensor
    /// padded to the longest sentence, with `lengths` set per sentence.
    ///
    /// # Errors
    /// Never in practice; the layout is built through [`Space::infer`].
    pub fn encode<S: AsRef<str>>(&self, sentences: &[Vec<S>]) -> Result<(D::Array, Meta)> {
        let batch = sentences.len();
        let width = sentences.iter().map(Vec::len).max().unwrap_or(0);
        let mut x = Tensor::filled(vec![batch, width], PADDING as f64);
        for (row, sentence) in x.data.chunks_mut(width.max(1)).zip(sentences) {
            for (slot, word) in row.iter_mut().zip(sentence) {
                *slot = self.index_of(word.as_ref()) as f64;
            }
        }
        let space = Space::infer(&x, &[Axis::Batch, Axis::Width])?;
        let lengths = sentences.iter().map(Vec::len).collect();
        Ok((D::from_host(x), Meta::new(space, lengths)))
    }
}
