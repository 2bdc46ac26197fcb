//! Transformer encoder.

use candle_core::Tensor;
use candle_nn::VarBuilder;
use snafu::{ResultExt, Snafu};

use crate::architectures::{
    BuildArchitecture, BuildEmbeddings, BuildEncoderLayer, Embeddings, Encoder, EncoderLayer,
    EncoderOutput,
};
use crate::error::BoxedError;
use crate::layers::attention::AttentionMask;
use crate::layers::transformer::TransformerLayerConfig;
use crate::models::transformer_lm::TransformerLmEmbeddingsConfig;

/// Transformer encoder configuration.
#[derive(Debug)]
pub struct TransformerEncoderConfig {
    embeddings: Box<dyn BuildEmbeddings>,
    layer: Box<dyn BuildEncoderLayer>,
    n_hidden_layers: usize,
}

impl TransformerEncoderConfig {
    /// Encoder embeddings.
    ///
    /// Default: `TransformerLmEmbeddingsConfig::default()`
    pub fn embeddings(mut self, embeddings: Box<dyn BuildEmbeddings>) -> Self {
        self.embeddings = embeddings;
        self
    }

    /// Encoder layer.
    ///
    /// Default: `TransformerLayerConfig::default()`
    pub fn layer(mut self, layer: Box<dyn BuildEncoderLayer>) -> Self {
        self.layer = layer;
        self
    }

    /// Number of hidden layers.
    ///
    /// Default: `2`
    pub fn n_hidden_layers(mut self, n_hidden_layers: usize) -> Self {
        self.n_hidden_layers = n_hidden_layers;
        self
    }
}

impl Default for TransformerEncoderConfig {
    fn default() -> Self {
        Self {
            embeddings: Box::<TransformerLmEmbeddingsConfig>::default(),
            layer: Box::<TransformerLayerConfig>::default(),
            n_hidden_layers: 2,
        }
    }
}

impl BuildArchitecture for TransformerEncoderConfig {
    type Architecture = TransformerEncoder;

    fn build(&self, vb: VarBuilder) -> Result<Self::Architecture, BoxedError> {
        let embeddings = self
            .embeddings
            .build(vb.push_prefix("embeddings"))
            .context(BuildEmbeddingsSnafu)?;

        let layers = (0..self.n_hidden_layers)
            .map(|n| {
                self.layer
                    .build_encoder_layer(vb.push_prefix(format!("layer_{n}")))
                    .context(BuildTransformerLayerSnafu)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(TransformerEncoder { embeddings, layers })
    }
}

/// Transformer encoder errors.
#[derive(Debug, Snafu)]
pub enum TransformerEncoderError {
    #[snafu(display("Cannot build embeddings"))]
    BuildEmbeddings { source: BoxedError },

    #[snafu(display("Cannot build transformer layer"))]
    BuildTransformerLayer { source: BoxedError },

    #[snafu(display("Cannot apply embeddings"))]
    Embedding { source: BoxedError },

    #[snafu(display("Cannot apply transformer layer"))]
    TransformerLayer { source: BoxedError },
}

/// Encoder using the transformer architecture.
pub struct TransformerEncoder {
    embeddings: Box<dyn Embeddings>,
    layers: Vec<Box<dyn EncoderLayer>>,
}

impl Encoder for TransformerEncoder {
    fn forward_t(
        &self,
        token_ids: &Tensor,
        attention_mask: &AttentionMask,
        train: bool,
        use_causal_mask: bool,
    ) -> Result<EncoderOutput, BoxedError> {
        let embeddings = self
            .embeddings
            .forward(token_ids, train)
            .context(EmbeddingSnafu)?;

        let mut layer_output = embeddings.clone();
        let mut layer_outputs = Vec::with_capacity(self.layers.len() + 1);
        layer_outputs.push(embeddings);
        for layer in &self.layers {
            layer_output = layer
                .forward_t(&layer_output, attention_mask, train, use_causal_mask)
                .context(TransformerLayerSnafu)?;
            layer_outputs.push(layer_output.clone());
        }

        Ok(EncoderOutput::new(layer_outputs))
    }
}

#[cfg(test)]
mod tests {
    use candle_core::{DType, Device, Tensor};
    use candle_nn::{VarBuilder, VarMap};
    use snafu::{report, FromString, ResultExt, Whatever};

    use super::TransformerEncoderConfig;
    use crate::architectures::{BuildArchitecture, Encoder};
    use crate::layers::attention::{AttentionMask, SelfAttentionConfig};
    use crate::layers::embeddings::SinusoidalPositionalEncodingConfig;
    use crate::layers::feedforward::PointwiseFeedForwardConfig;
    use crate::layers::transformer::TransformerLayerConfig;
    use crate::models::transformer_lm::TransformerLmEmbeddingsConfig;

    #[test]
    #[report]
    fn encoder_returns_all_layer_outputs() -> Result<(), Whatever> {
        let device = Device::Cpu;
        let var_map = VarMap::new();
        let vb = VarBuilder::from_varmap(&var_map, DType::F32, &device);
        let encoder = TransformerEncoderConfig::default()
            .embeddings(Box::new(
                TransformerLmEmbeddingsConfig::default()
                    .n_tokens(12)
                    .width(8)
                    .positional_encoding(
                        SinusoidalPositionalEncodingConfig::default()
                            .width(8)
                            .max_len(32),
                    ),
            ))
            .layer(Box::new(
                TransformerLayerConfig::default()
                    .attention(SelfAttentionConfig::default().hidden_width(8).n_heads(2))
                    .feedforward(
                        PointwiseFeedForwardConfig::default()
                            .hidden_width(8)
                            .intermediate_width(8),
                    ),
            ))
            .n_hidden_layers(3)
            .build(vb)
            .map_err(|e| Whatever::with_source(e, "Cannot build encoder".to_string()))?;

        let ids = Tensor::new(&[[1u32, 2, 3], [4, 5, 6]], &device)
            .whatever_context("Cannot create ids")?;
        let mask = AttentionMask::all_visible(2, 3, &device)
            .whatever_context("Cannot create attention mask")?;
        let output = encoder
            .forward_t(&ids, &mask, false, true)
            .map_err(|e| Whatever::with_source(e, "Cannot encode".to_string()))?;

        assert_eq!(output.layer_outputs().len(), 4);
        assert_eq!(
            output
                .last_layer_output()
                .map(|output| output.dims().to_vec()),
            Some(vec![2, 3, 8])
        );
        Ok(())
    }
}
