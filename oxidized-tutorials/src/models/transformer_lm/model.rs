use candle_core::{Module, Tensor};
use candle_nn::{init::Init, Linear, VarBuilder};
use serde::{Deserialize, Serialize};
use snafu::{ensure, OptionExt, ResultExt, Snafu};

use crate::architectures::{BuildArchitecture, Encoder};
use crate::error::BoxedError;
use crate::layers::activation::Activation;
use crate::layers::attention::{AttentionMask, AttentionMaskError, SDPAConfig, SelfAttentionConfig};
use crate::layers::dropout::DropoutConfig;
use crate::layers::embeddings::SinusoidalPositionalEncodingConfig;
use crate::layers::feedforward::PointwiseFeedForwardConfig;
use crate::layers::layer_norm::LayerNormConfig;
use crate::layers::transformer::TransformerLayerConfig;
use crate::models::transformer_lm::{
    TransformerEncoder, TransformerEncoderConfig, TransformerLmEmbeddingsConfig,
};

/// Transformer language model configuration.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct TransformerLmConfig {
    activation: Activation,
    dropout: f32,
    init_range: f64,
    intermediate_width: usize,
    layer_norm_eps: f64,
    max_len: usize,
    model_width: usize,
    n_heads: usize,
    n_layers: usize,
    n_tokens: usize,
}

impl TransformerLmConfig {
    /// Activation of the feed-forward layers.
    ///
    /// Default: `Activation::Relu`
    pub fn activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    /// Dropout probability used throughout the model.
    ///
    /// Default: `0.2`
    pub fn dropout(mut self, dropout: f32) -> Self {
        self.dropout = dropout;
        self
    }

    /// Token embeddings and decoder weights are initialized uniformly in
    /// `[-init_range, init_range]`.
    ///
    /// Default: `0.1`
    pub fn init_range(mut self, init_range: f64) -> Self {
        self.init_range = init_range;
        self
    }

    /// Width of the feed-forward layers.
    ///
    /// Default: `200`
    pub fn intermediate_width(mut self, intermediate_width: usize) -> Self {
        self.intermediate_width = intermediate_width;
        self
    }

    /// Layer norm epsilon.
    ///
    /// Default: `1e-5`
    pub fn layer_norm_eps(mut self, layer_norm_eps: f64) -> Self {
        self.layer_norm_eps = layer_norm_eps;
        self
    }

    /// Maximum sequence length.
    ///
    /// Default: `5000`
    pub fn max_len(mut self, max_len: usize) -> Self {
        self.max_len = max_len;
        self
    }

    /// Width of the embeddings and hidden representations.
    ///
    /// Default: `200`
    pub fn model_width(mut self, model_width: usize) -> Self {
        self.model_width = model_width;
        self
    }

    /// Number of attention heads.
    ///
    /// Default: `2`
    pub fn n_heads(mut self, n_heads: usize) -> Self {
        self.n_heads = n_heads;
        self
    }

    /// Number of transformer layers.
    ///
    /// Default: `2`
    pub fn n_layers(mut self, n_layers: usize) -> Self {
        self.n_layers = n_layers;
        self
    }

    /// Vocabulary size.
    ///
    /// Default: `28_782`
    pub fn n_tokens(mut self, n_tokens: usize) -> Self {
        self.n_tokens = n_tokens;
        self
    }

    fn dropout_config(&self) -> Box<DropoutConfig> {
        Box::new(DropoutConfig::default().p(self.dropout))
    }

    fn layer_norm_config(&self) -> Box<LayerNormConfig> {
        Box::new(
            LayerNormConfig::default()
                .size(self.model_width)
                .eps(self.layer_norm_eps),
        )
    }

    fn encoder_config(&self) -> TransformerEncoderConfig {
        let embeddings = TransformerLmEmbeddingsConfig::default()
            .init_range(self.init_range)
            .n_tokens(self.n_tokens)
            .width(self.model_width)
            .positional_encoding(
                SinusoidalPositionalEncodingConfig::default()
                    .dropout(self.dropout_config())
                    .max_len(self.max_len)
                    .width(self.model_width),
            );

        let layer = TransformerLayerConfig::default()
            .attention(
                SelfAttentionConfig::default()
                    .attention_scorer(Box::new(
                        SDPAConfig::default().dropout(self.dropout_config()),
                    ))
                    .dropout(self.dropout_config())
                    .hidden_width(self.model_width)
                    .n_heads(self.n_heads),
            )
            .attn_residual_layer_norm(self.layer_norm_config())
            .feedforward(
                PointwiseFeedForwardConfig::default()
                    .activation(Box::new(self.activation))
                    .activation_dropout(self.dropout_config())
                    .dropout(self.dropout_config())
                    .hidden_width(self.model_width)
                    .intermediate_width(self.intermediate_width),
            )
            .ffn_residual_layer_norm(self.layer_norm_config());

        TransformerEncoderConfig::default()
            .embeddings(Box::new(embeddings))
            .layer(Box::new(layer))
            .n_hidden_layers(self.n_layers)
    }
}

impl Default for TransformerLmConfig {
    fn default() -> Self {
        Self {
            activation: Activation::Relu,
            dropout: 0.2,
            init_range: 0.1,
            intermediate_width: 200,
            layer_norm_eps: 1e-5,
            max_len: 5000,
            model_width: 200,
            n_heads: 2,
            n_layers: 2,
            n_tokens: 28_782,
        }
    }
}

impl BuildArchitecture for TransformerLmConfig {
    type Architecture = TransformerLm;

    fn build(&self, vb: VarBuilder) -> Result<Self::Architecture, BoxedError> {
        ensure!(
            self.n_heads > 0 && self.model_width % self.n_heads == 0,
            IncorrectNHeadsSnafu {
                model_width: self.model_width,
                n_heads: self.n_heads,
            }
        );

        let encoder = self
            .encoder_config()
            .build(vb.push_prefix("encoder"))
            .context(BuildEncoderSnafu)?;

        let decoder_vb = vb.push_prefix("decoder");
        let weight = decoder_vb
            .get_with_hints(
                (self.n_tokens, self.model_width),
                "weight",
                Init::Uniform {
                    lo: -self.init_range,
                    up: self.init_range,
                },
            )
            .context(BuildDecoderSnafu)?;
        let bias = decoder_vb
            .get_with_hints(self.n_tokens, "bias", Init::Const(0.))
            .context(BuildDecoderSnafu)?;

        Ok(TransformerLm {
            decoder: Linear::new(weight, Some(bias)),
            encoder,
        })
    }
}

/// Transformer language model errors.
#[derive(Debug, Snafu)]
pub enum TransformerLmError {
    #[snafu(display("Cannot create attention mask"))]
    AttentionMask { source: AttentionMaskError },

    #[snafu(display("Cannot build decoder"))]
    BuildDecoder { source: candle_core::Error },

    #[snafu(display("Cannot build encoder"))]
    BuildEncoder { source: BoxedError },

    #[snafu(display("Cannot compute logits for the output vocabulary"))]
    ComputeLogits { source: candle_core::Error },

    #[snafu(display("Cannot encode input"))]
    Encode { source: BoxedError },

    #[snafu(display(
        "Model width ({model_width}) must be a multiple of the number of heads ({n_heads})"
    ))]
    IncorrectNHeads { model_width: usize, n_heads: usize },

    #[snafu(display("Invalid input shape"))]
    InputShape { source: candle_core::Error },

    #[snafu(display("Nothing to decode, the encoder does not have any outputs"))]
    NoOutputs,
}

/// Transformer language model.
///
/// Token embeddings scaled by `sqrt(model_width)` and sinusoidal positional
/// encodings are fed to a stack of post-norm transformer layers with a
/// causal mask. A linear decoder maps the last hidden representations to
/// logits over the vocabulary.
pub struct TransformerLm {
    decoder: Linear,
    encoder: TransformerEncoder,
}

impl TransformerLm {
    /// Compute next-token logits.
    ///
    /// The logits at position `t` only depend on the tokens at positions
    /// `<= t`.
    ///
    /// * `token_ids` - Token identifiers.
    ///   *Shape:* `(batch_size, seq_len)`
    /// * `train` - Whether to apply dropout.
    ///
    /// Returns: logits.
    /// *Shape:* `(batch_size, seq_len, n_tokens)`
    pub fn forward_t(&self, token_ids: &Tensor, train: bool) -> Result<Tensor, TransformerLmError> {
        let (batch_size, seq_len) = token_ids.dims2().context(InputShapeSnafu)?;
        let attention_mask = AttentionMask::all_visible(batch_size, seq_len, token_ids.device())
            .context(AttentionMaskSnafu)?;

        let encoder_output = self
            .encoder
            .forward_t(token_ids, &attention_mask, train, true)
            .context(EncodeSnafu)?;
        let last_layer = encoder_output
            .last_layer_output()
            .context(NoOutputsSnafu)?;

        self.decoder
            .forward(last_layer)
            .context(ComputeLogitsSnafu)
    }
}

#[cfg(test)]
mod tests {
    use candle_core::{DType, Device, IndexOp, Tensor};
    use candle_nn::{VarBuilder, VarMap};
    use snafu::{report, FromString, ResultExt, Whatever};

    use super::TransformerLmConfig;
    use crate::architectures::BuildArchitecture;
    use crate::util::device::tests::test_devices;
    use crate::util::tests::{assert_tensor_eq, f32_array};

    fn config() -> TransformerLmConfig {
        TransformerLmConfig::default()
            .n_tokens(20)
            .model_width(8)
            .intermediate_width(16)
            .n_heads(2)
            .max_len(32)
    }

    #[test]
    #[report]
    fn logits_do_not_depend_on_future_tokens() -> Result<(), Whatever> {
        for device in test_devices() {
            let var_map = VarMap::new();
            let vb = VarBuilder::from_varmap(&var_map, DType::F32, &device);
            let lm = config().build(vb).map_err(|e| Whatever::with_source(e, "Cannot build model".to_string()))?;

            let ids = Tensor::new(&[[1u32, 5, 7, 2]], &device)
                .whatever_context("Cannot create ids")?;
            let changed_ids = Tensor::new(&[[1u32, 5, 7, 19]], &device)
                .whatever_context("Cannot create ids")?;

            let logits = lm
                .forward_t(&ids, false)
                .whatever_context("Cannot compute logits")?;
            let changed_logits = lm
                .forward_t(&changed_ids, false)
                .whatever_context("Cannot compute logits")?;

            assert_eq!(logits.dims(), &[1, 4, 20]);
            assert_tensor_eq!(
                logits.i((.., ..3)).whatever_context("Cannot slice logits")?,
                f32_array(
                    &changed_logits
                        .i((.., ..3))
                        .whatever_context("Cannot slice logits")?
                ),
                epsilon = 1e-5,
            );
        }

        Ok(())
    }

    #[test]
    fn lm_rejects_indivisible_heads() {
        let vb = VarBuilder::zeros(DType::F32, &Device::Cpu);
        assert!(config().model_width(9).n_heads(2).build(vb).is_err());
    }

    #[test]
    #[report]
    fn decoder_bias_starts_at_zero() -> Result<(), Whatever> {
        let var_map = VarMap::new();
        let vb = VarBuilder::from_varmap(&var_map, DType::F32, &Device::Cpu);
        config().build(vb).map_err(|e| Whatever::with_source(e, "Cannot build model".to_string()))?;
        let bias_sum = var_map
            .data()
            .lock()
            .unwrap()
            .get("decoder.bias")
            .map(|bias| bias.as_tensor().abs().and_then(|bias| bias.sum_all()))
            .transpose()
            .whatever_context("Cannot sum bias")?
            .map(|sum| sum.to_scalar::<f32>())
            .transpose()
            .whatever_context("Cannot convert sum")?;
        assert_eq!(bias_sum, Some(0.0));
        Ok(())
    }

    #[test]
    fn lm_config_deserializes_with_defaults() {
        let config: TransformerLmConfig =
            serde_json::from_str(r#"{"n_tokens": 100, "activation": "gelu"}"#).unwrap();
        assert_eq!(
            config,
            TransformerLmConfig::default()
                .n_tokens(100)
                .activation(crate::layers::activation::Activation::Gelu)
        );
    }
}
