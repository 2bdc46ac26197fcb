use candle_core::{Module, ModuleT, Tensor};
use candle_nn::{linear, Linear, VarBuilder};
use snafu::{ensure, ResultExt, Snafu};

use crate::error::BoxedError;
use crate::layers::attention::{AttentionMask, AttentionScorer, BuildAttentionScorer, SDPAConfig};
use crate::layers::build_module::BuildModule;
use crate::layers::identity::Identity;

/// Self-attention configuration.
#[derive(Debug)]
pub struct SelfAttentionConfig {
    attention_scorer: Box<dyn BuildAttentionScorer>,
    dropout: Box<dyn BuildModule>,
    hidden_width: usize,
    n_heads: usize,
}

impl SelfAttentionConfig {
    /// Attention scorer.
    ///
    /// Default: `SDPAConfig::default()`
    pub fn attention_scorer(mut self, attention_scorer: Box<dyn BuildAttentionScorer>) -> Self {
        self.attention_scorer = attention_scorer;
        self
    }

    /// Dropout applied to the output of the attention layer.
    ///
    /// Default: `Identity`
    pub fn dropout(mut self, dropout: Box<dyn BuildModule>) -> Self {
        self.dropout = dropout;
        self
    }

    /// Hidden width of the attention layer input and output.
    ///
    /// Default: `200`
    pub fn hidden_width(mut self, hidden_width: usize) -> Self {
        self.hidden_width = hidden_width;
        self
    }

    /// Number of attention heads.
    ///
    /// Default: `2`
    pub fn n_heads(mut self, n_heads: usize) -> Self {
        self.n_heads = n_heads;
        self
    }

    /// Build a self-attention layer.
    pub fn build(&self, vb: VarBuilder) -> Result<SelfAttention, SelfAttentionError> {
        ensure!(
            self.n_heads > 0 && self.hidden_width % self.n_heads == 0,
            IncorrectNHeadsSnafu {
                hidden_width: self.hidden_width,
                n_heads: self.n_heads,
            }
        );

        let hidden_width = self.hidden_width;
        Ok(SelfAttention {
            attention_scorer: self
                .attention_scorer
                .build(vb.clone())
                .context(BuildAttentionScorerSnafu)?,
            dropout: self
                .dropout
                .build(vb.push_prefix("dropout"))
                .context(BuildDropoutSnafu)?,
            n_heads: self.n_heads,
            query: linear(hidden_width, hidden_width, vb.push_prefix("query"))
                .context(SelfAttentionConstructionSnafu)?,
            key: linear(hidden_width, hidden_width, vb.push_prefix("key"))
                .context(SelfAttentionConstructionSnafu)?,
            value: linear(hidden_width, hidden_width, vb.push_prefix("value"))
                .context(SelfAttentionConstructionSnafu)?,
            output: linear(hidden_width, hidden_width, vb.push_prefix("output"))
                .context(SelfAttentionConstructionSnafu)?,
        })
    }
}

impl Default for SelfAttentionConfig {
    fn default() -> Self {
        Self {
            attention_scorer: Box::<SDPAConfig>::default(),
            dropout: Box::new(Identity),
            hidden_width: 200,
            n_heads: 2,
        }
    }
}

/// Errors for self-attention.
#[derive(Debug, Snafu)]
pub enum SelfAttentionError {
    #[snafu(display("Cannot apply attention scorer"))]
    AttentionScorer { source: BoxedError },

    #[snafu(display("Cannot build attention scorer"))]
    BuildAttentionScorer { source: BoxedError },

    #[snafu(display("Cannot build dropout"))]
    BuildDropout { source: BoxedError },

    #[snafu(display("Cannot combine heads"))]
    CombineHeads { source: candle_core::Error },

    #[snafu(display(
        "Hidden width ({hidden_width}) must be a multiple of the number of heads ({n_heads})"
    ))]
    IncorrectNHeads { hidden_width: usize, n_heads: usize },

    #[snafu(display("Cannot apply output layer"))]
    Output { source: candle_core::Error },

    #[snafu(display("Cannot calculate key, query, or value"))]
    Qkv { source: candle_core::Error },

    #[snafu(display("Cannot construct layer"))]
    SelfAttentionConstruction { source: candle_core::Error },

    #[snafu(display("Cannot split heads"))]
    SplitHeads { source: candle_core::Error },
}

/// Transformer self-attention layer.
///
/// See [Vaswani et al., 2017](https://arxiv.org/abs/1706.03762).
pub struct SelfAttention {
    attention_scorer: Box<dyn AttentionScorer>,
    dropout: Box<dyn ModuleT>,
    n_heads: usize,
    query: Linear,
    key: Linear,
    value: Linear,
    output: Linear,
}

impl SelfAttention {
    /// Apply self-attention to the input.
    ///
    /// * `input` - Input to apply self-attention to.
    ///   *Shape:* `(batch_size, seq_len, width)`
    /// * `attention_mask` - Attention mask. Sequence elements for which
    ///   the corresponding mask element is set to `false` are ignored in attention.
    /// * `train` - Whether the model is trained.
    /// * `use_causal_mask` - Mask out succeeding sequence elements when `true`.
    ///
    /// Returns: Self-attention output.
    /// *Shape:* `(batch_size, seq_len, width)`
    pub fn forward_t(
        &self,
        input: &Tensor,
        attention_mask: &AttentionMask,
        train: bool,
        use_causal_mask: bool,
    ) -> Result<Tensor, SelfAttentionError> {
        let query = self
            .query
            .forward(input)
            .context(QkvSnafu)?
            .split_heads(self.n_heads)?;
        let key = self
            .key
            .forward(input)
            .context(QkvSnafu)?
            .split_heads(self.n_heads)?;
        let value = self
            .value
            .forward(input)
            .context(QkvSnafu)?
            .split_heads(self.n_heads)?;

        let attn = self
            .attention_scorer
            .forward(&query, &key, &value, attention_mask, train, use_causal_mask)
            .context(AttentionScorerSnafu)?
            .combine_heads()?;

        self.output
            .forward(&attn)
            .and_then(|xs| self.dropout.forward_t(&xs, train))
            .context(OutputSnafu)
    }
}

trait CombineHeads {
    fn combine_heads(&self) -> Result<Tensor, SelfAttentionError>;
}

impl CombineHeads for Tensor {
    fn combine_heads(&self) -> Result<Tensor, SelfAttentionError> {
        let (batch_size, n_heads, seq_len, head_width) =
            self.dims4().context(CombineHeadsSnafu)?;
        self.transpose(1, 2)
            .and_then(|heads| heads.reshape((batch_size, seq_len, n_heads * head_width)))
            .context(CombineHeadsSnafu)
    }
}

trait SplitHeads {
    fn split_heads(&self, n_heads: usize) -> Result<Tensor, SelfAttentionError>;
}

impl SplitHeads for Tensor {
    fn split_heads(&self, n_heads: usize) -> Result<Tensor, SelfAttentionError> {
        let (batch_size, seq_len, model_width) = self.dims3().context(SplitHeadsSnafu)?;
        let head_width = model_width / n_heads;
        self.reshape((batch_size, seq_len, n_heads, head_width))
            .and_then(|heads| heads.transpose(1, 2))
            .context(SplitHeadsSnafu)
    }
}

#[cfg(test)]
mod tests {
    use candle_core::{DType, Device, Tensor};
    use candle_nn::{VarBuilder, VarMap};
    use snafu::{report, ResultExt, Whatever};

    use super::{SelfAttentionConfig, SelfAttentionError};
    use crate::layers::attention::AttentionMask;

    #[test]
    fn self_attention_rejects_indivisible_heads() {
        let vb = VarBuilder::zeros(DType::F32, &Device::Cpu);
        let result = SelfAttentionConfig::default()
            .hidden_width(10)
            .n_heads(3)
            .build(vb);
        assert!(matches!(
            result,
            Err(SelfAttentionError::IncorrectNHeads {
                hidden_width: 10,
                n_heads: 3
            })
        ));
    }

    #[test]
    #[report]
    fn self_attention_preserves_shape() -> Result<(), Whatever> {
        let device = Device::Cpu;
        let var_map = VarMap::new();
        let vb = VarBuilder::from_varmap(&var_map, DType::F32, &device);
        let attention = SelfAttentionConfig::default()
            .hidden_width(8)
            .n_heads(2)
            .build(vb)
            .whatever_context("Cannot build self-attention")?;
        let input = Tensor::randn(0f32, 1f32, (3, 5, 8), &device)
            .whatever_context("Cannot create input")?;
        let mask = AttentionMask::all_visible(3, 5, &device)
            .whatever_context("Cannot create attention mask")?;
        let output = attention
            .forward_t(&input, &mask, false, true)
            .whatever_context("Cannot apply self-attention")?;
        assert_eq!(output.dims(), &[3, 5, 8]);
        Ok(())
    }
}
