use candle_core::{ModuleT, Tensor};
use candle_nn::VarBuilder;
use snafu::{ResultExt, Snafu};

use crate::architectures::{BuildEncoderLayer, EncoderLayer};
use crate::error::BoxedError;
use crate::layers::attention::{AttentionMask, SelfAttention, SelfAttentionConfig, SelfAttentionError};
use crate::layers::build_module::BuildModule;
use crate::layers::feedforward::{
    PointwiseFeedForward, PointwiseFeedForwardConfig, PointwiseFeedForwardError,
};
use crate::layers::identity::Identity;

/// Transformer layer configuration.
#[derive(Debug)]
pub struct TransformerLayerConfig {
    attention: SelfAttentionConfig,
    attn_residual_layer_norm: Box<dyn BuildModule>,
    feedforward: PointwiseFeedForwardConfig,
    ffn_residual_layer_norm: Box<dyn BuildModule>,
}

impl TransformerLayerConfig {
    /// Attention layer configuration.
    ///
    /// Default: `SelfAttentionConfig::default()`
    pub fn attention(mut self, attention: SelfAttentionConfig) -> Self {
        self.attention = attention;
        self
    }

    /// Normalization of the attention output after the residual connection.
    ///
    /// Default: `Identity`
    pub fn attn_residual_layer_norm(mut self, layer_norm: Box<dyn BuildModule>) -> Self {
        self.attn_residual_layer_norm = layer_norm;
        self
    }

    /// Feed-forward layer configuration.
    ///
    /// Default: `PointwiseFeedForwardConfig::default()`
    pub fn feedforward(mut self, feedforward: PointwiseFeedForwardConfig) -> Self {
        self.feedforward = feedforward;
        self
    }

    /// Normalization of the feed-forward output after the residual connection.
    ///
    /// Default: `Identity`
    pub fn ffn_residual_layer_norm(mut self, layer_norm: Box<dyn BuildModule>) -> Self {
        self.ffn_residual_layer_norm = layer_norm;
        self
    }

    /// Build a transformer layer.
    pub fn build(&self, vb: VarBuilder) -> Result<TransformerLayer, TransformerLayerError> {
        Ok(TransformerLayer {
            mha: self
                .attention
                .build(vb.push_prefix("attention"))
                .context(BuildAttentionSnafu)?,
            attn_residual_layer_norm: self
                .attn_residual_layer_norm
                .build(vb.push_prefix("attn_residual_layer_norm"))
                .context(BuildLayerNormSnafu)?,
            ffn: self
                .feedforward
                .build(vb.push_prefix("ffn"))
                .context(BuildFeedForwardSnafu)?,
            ffn_residual_layer_norm: self
                .ffn_residual_layer_norm
                .build(vb.push_prefix("ffn_residual_layer_norm"))
                .context(BuildLayerNormSnafu)?,
        })
    }
}

impl Default for TransformerLayerConfig {
    fn default() -> Self {
        Self {
            attention: SelfAttentionConfig::default(),
            attn_residual_layer_norm: Box::new(Identity),
            feedforward: PointwiseFeedForwardConfig::default(),
            ffn_residual_layer_norm: Box::new(Identity),
        }
    }
}

impl BuildEncoderLayer for TransformerLayerConfig {
    fn build_encoder_layer(&self, vb: VarBuilder) -> Result<Box<dyn EncoderLayer>, BoxedError> {
        Ok(Box::new(self.build(vb)?))
    }
}

/// Errors for transformer layers.
#[derive(Debug, Snafu)]
pub enum TransformerLayerError {
    #[snafu(display("Cannot build attention layer"))]
    BuildAttention { source: SelfAttentionError },

    #[snafu(display("Cannot build feed-forward layer"))]
    BuildFeedForward { source: PointwiseFeedForwardError },

    #[snafu(display("Cannot build layer norm"))]
    BuildLayerNorm { source: BoxedError },

    #[snafu(display("Cannot apply point-wise feed-forward layer"))]
    FeedForward { source: candle_core::Error },

    #[snafu(display("Cannot apply residual connection"))]
    Residual { source: candle_core::Error },

    #[snafu(display("Cannot apply self-attention"))]
    SelfAttention { source: SelfAttentionError },
}

/// Transformer encoder layer.
///
/// The layer normalizations are applied after each residual connection:
///
/// `x = norm1(x + attention(x))`
/// `x = norm2(x + ffn(x))`
///
/// See [Vaswani et al. (2017)](https://arxiv.org/abs/1706.03762).
pub struct TransformerLayer {
    mha: SelfAttention,
    attn_residual_layer_norm: Box<dyn ModuleT>,
    ffn: PointwiseFeedForward,
    ffn_residual_layer_norm: Box<dyn ModuleT>,
}

impl TransformerLayer {
    /// Apply the transformer layer to the given hidden representations.
    ///
    /// For docs see the `EncoderLayer` trait.
    pub fn forward(
        &self,
        input: &Tensor,
        attention_mask: &AttentionMask,
        train: bool,
        use_causal_mask: bool,
    ) -> Result<Tensor, TransformerLayerError> {
        let attn_out = self
            .mha
            .forward_t(input, attention_mask, train, use_causal_mask)
            .context(SelfAttentionSnafu)?;

        let residual = (input + attn_out)
            .and_then(|xs| self.attn_residual_layer_norm.forward_t(&xs, train))
            .context(ResidualSnafu)?;

        let ffn_out = self
            .ffn
            .forward_t(&residual, train)
            .context(FeedForwardSnafu)?;

        (residual + ffn_out)
            .and_then(|xs| self.ffn_residual_layer_norm.forward_t(&xs, train))
            .context(ResidualSnafu)
    }
}

impl EncoderLayer for TransformerLayer {
    fn forward_t(
        &self,
        input: &Tensor,
        attention_mask: &AttentionMask,
        train: bool,
        use_causal_mask: bool,
    ) -> Result<Tensor, BoxedError> {
        Ok(self.forward(input, attention_mask, train, use_causal_mask)?)
    }
}

#[cfg(test)]
mod tests {
    use candle_core::{DType, Device, IndexOp, Tensor};
    use candle_nn::{VarBuilder, VarMap};
    use snafu::{report, ResultExt, Whatever};

    use super::TransformerLayerConfig;
    use crate::layers::attention::{AttentionMask, SelfAttentionConfig};
    use crate::layers::feedforward::PointwiseFeedForwardConfig;
    use crate::layers::layer_norm::LayerNormConfig;
    use crate::util::tests::{assert_tensor_eq, f32_array};

    #[test]
    #[report]
    fn causal_layer_output_does_not_depend_on_future() -> Result<(), Whatever> {
        let device = Device::Cpu;
        let var_map = VarMap::new();
        let vb = VarBuilder::from_varmap(&var_map, DType::F32, &device);
        let layer = TransformerLayerConfig::default()
            .attention(SelfAttentionConfig::default().hidden_width(8).n_heads(2))
            .feedforward(
                PointwiseFeedForwardConfig::default()
                    .hidden_width(8)
                    .intermediate_width(16),
            )
            .attn_residual_layer_norm(Box::new(LayerNormConfig::default().size(8)))
            .ffn_residual_layer_norm(Box::new(LayerNormConfig::default().size(8)))
            .build(vb)
            .whatever_context("Cannot build transformer layer")?;

        let input = Tensor::randn(0f32, 1f32, (1, 4, 8), &device)
            .whatever_context("Cannot create input")?;
        let changed_last = Tensor::randn(0f32, 1f32, (1, 1, 8), &device)
            .and_then(|last| Tensor::cat(&[&input.i((.., ..3, ..))?, &last], 1))
            .whatever_context("Cannot create changed input")?;
        let mask = AttentionMask::all_visible(1, 4, &device)
            .whatever_context("Cannot create attention mask")?;

        let output = layer
            .forward(&input, &mask, false, true)
            .whatever_context("Cannot apply layer")?;
        let changed_output = layer
            .forward(&changed_last, &mask, false, true)
            .whatever_context("Cannot apply layer")?;

        assert_eq!(output.dims(), &[1, 4, 8]);
        assert_tensor_eq!(
            output.i((.., ..3, ..)).whatever_context("Cannot slice output")?,
            f32_array(
                &changed_output
                    .i((.., ..3, ..))
                    .whatever_context("Cannot slice output")?
            ),
            epsilon = 1e-5,
        );

        Ok(())
    }
}
