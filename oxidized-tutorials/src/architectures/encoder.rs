use std::fmt::Debug;

use candle_core::Tensor;
use candle_nn::VarBuilder;

use crate::error::BoxedError;
use crate::layers::attention::AttentionMask;

/// Hidden representations produced by an encoder.
///
/// Holds the embedding output followed by the output of every layer.
pub struct EncoderOutput {
    layer_outputs: Vec<Tensor>,
}

impl EncoderOutput {
    pub fn new(layer_outputs: Vec<Tensor>) -> Self {
        Self { layer_outputs }
    }

    /// Embedding output and layer outputs, in order of application.
    pub fn layer_outputs(&self) -> &[Tensor] {
        &self.layer_outputs
    }

    /// Output of the last layer, `None` for an empty encoder output.
    pub fn last_layer_output(&self) -> Option<&Tensor> {
        self.layer_outputs.last()
    }
}

/// Stack of layers on top of token embeddings.
pub trait Encoder {
    /// Encode token identifiers.
    ///
    /// * `token_ids` - Token identifiers.
    ///   *Shape:* `(batch_size, seq_len)`
    /// * `attention_mask` - Keys whose mask element is `false` are not
    ///   attended to.
    ///   *Shape:* `(batch_size, seq_len)`
    /// * `train` - Whether to apply dropout.
    /// * `use_causal_mask` - Positions only attend to themselves and
    ///   preceding positions when `true`.
    fn forward_t(
        &self,
        token_ids: &Tensor,
        attention_mask: &AttentionMask,
        train: bool,
        use_causal_mask: bool,
    ) -> Result<EncoderOutput, BoxedError>;
}

/// A single layer of an [`Encoder`].
pub trait EncoderLayer {
    /// Apply the layer.
    ///
    /// * `input` - Hidden representations.
    ///   *Shape:* `(batch_size, seq_len, width)`
    /// * `attention_mask` - See [`Encoder::forward_t`].
    /// * `train` - Whether to apply dropout.
    /// * `use_causal_mask` - See [`Encoder::forward_t`].
    ///
    /// Returns: hidden representations.
    /// *Shape:* `(batch_size, seq_len, width)`
    fn forward_t(
        &self,
        input: &Tensor,
        attention_mask: &AttentionMask,
        train: bool,
        use_causal_mask: bool,
    ) -> Result<Tensor, BoxedError>;
}

/// Configuration of an encoder layer. Encoders build one layer per
/// hidden layer from it.
pub trait BuildEncoderLayer: Debug {
    fn build_encoder_layer(&self, vb: VarBuilder) -> Result<Box<dyn EncoderLayer>, BoxedError>;
}
