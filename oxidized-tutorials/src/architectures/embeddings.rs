use std::fmt::Debug;

use candle_core::Tensor;
use candle_nn::VarBuilder;

use crate::error::BoxedError;

/// Input layer of an encoder, mapping token identifiers to vectors.
pub trait Embeddings {
    /// Embed token identifiers.
    ///
    /// * `token_ids` - Token identifiers.
    ///   *Shape:* `(batch_size, seq_len)`
    /// * `train` - Whether to apply dropout.
    ///
    /// Returns: embeddings.
    /// *Shape:* `(batch_size, seq_len, width)`
    fn forward(&self, token_ids: &Tensor, train: bool) -> Result<Tensor, BoxedError>;
}

/// Configuration of an [`Embeddings`] layer.
pub trait BuildEmbeddings: Debug {
    fn build(&self, vb: VarBuilder) -> Result<Box<dyn Embeddings>, BoxedError>;
}
