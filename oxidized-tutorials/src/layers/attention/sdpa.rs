use candle_core::{ModuleT, Tensor, D};
use candle_nn::ops::softmax;
use candle_nn::VarBuilder;
use snafu::{ResultExt, Snafu};

use crate::error::BoxedError;
use crate::layers::attention::{
    AttentionMask, AttentionScorer, BuildAttentionScorer, CausalMask, CausalMaskError,
    SelfAttentionMask, SelfAttentionMaskError,
};
use crate::layers::build_module::BuildModule;
use crate::layers::identity::Identity;

/// Configuration for scaled dot-product attention.
#[derive(Debug)]
pub struct SDPAConfig {
    dropout: Box<dyn BuildModule>,
}

impl SDPAConfig {
    /// Dropout to apply to the attention weights.
    ///
    /// Default: `Identity`.
    pub fn dropout(mut self, dropout: Box<dyn BuildModule>) -> Self {
        self.dropout = dropout;
        self
    }
}

impl Default for SDPAConfig {
    fn default() -> Self {
        Self {
            dropout: Box::new(Identity),
        }
    }
}

impl BuildAttentionScorer for SDPAConfig {
    fn build(&self, vb: VarBuilder) -> Result<Box<dyn AttentionScorer>, BoxedError> {
        Ok(Box::new(SDPA {
            dropout: self.dropout.build(vb).context(BuildDropoutSnafu)?,
        }))
    }
}

/// Errors for scaled dot-product attention.
#[derive(Debug, Snafu)]
pub enum SDPAError {
    #[snafu(display("Cannot calculate attention scores"))]
    AttentionScores { source: candle_core::Error },

    #[snafu(display("Cannot weigh representations using attention mask"))]
    AttentionWeight { source: candle_core::Error },

    #[snafu(display("Cannot build dropout module"))]
    BuildDropout { source: BoxedError },

    #[snafu(display("Cannot create causal mask"))]
    CausalMask { source: CausalMaskError },

    #[snafu(display("Cannot apply dropout"))]
    Dropout { source: candle_core::Error },

    #[snafu(display("Cannot apply self-attention mask"))]
    SelfAttentionMask { source: SelfAttentionMaskError },

    #[snafu(display("Cannot apply softmax temperature"))]
    Temperature { source: candle_core::Error },
}

/// Scaled dot-product attention.
///
/// See [Vaswani et al., 2017](https://arxiv.org/abs/1706.03762).
pub struct SDPA {
    dropout: Box<dyn ModuleT>,
}

impl AttentionScorer for SDPA {
    fn forward(
        &self,
        query: &Tensor,
        key: &Tensor,
        value: &Tensor,
        attention_mask: &AttentionMask,
        train: bool,
        use_causal_mask: bool,
    ) -> Result<Tensor, BoxedError> {
        self.forward_default(query, key, value, attention_mask, train, use_causal_mask)
            .boxed()
    }
}

impl SDPA {
    /// Reference implementation.
    ///
    /// For docs see the `AttentionScorer` trait.
    fn forward_default(
        &self,
        query: &Tensor,
        key: &Tensor,
        value: &Tensor,
        attention_mask: &AttentionMask,
        train: bool,
        use_causal_mask: bool,
    ) -> Result<Tensor, SDPAError> {
        // Calculate attention scores.
        let query = query.contiguous().context(AttentionScoresSnafu)?;
        let mut attn_scores = key
            .contiguous()
            .and_then(|key| key.transpose(3, 2))
            .and_then(|key| query.broadcast_matmul(&key))
            .context(AttentionScoresSnafu)?;

        let head_width = key.dim(3).context(TemperatureSnafu)?;
        let temperature = (head_width as f64).sqrt();
        attn_scores = (attn_scores / temperature).context(TemperatureSnafu)?;

        let mut combined_mask =
            SelfAttentionMask::try_from(attention_mask).context(SelfAttentionMaskSnafu)?;
        if use_causal_mask {
            let causal_mask =
                SelfAttentionMask::causal_mask(&query, key).context(CausalMaskSnafu)?;
            combined_mask = combined_mask
                .intersect(&causal_mask)
                .context(SelfAttentionMaskSnafu)?;
        }

        attn_scores = combined_mask
            .apply_logit_mask(&attn_scores)
            .context(SelfAttentionMaskSnafu)?;

        // Apply attention weights.
        let attn_weights = softmax(&attn_scores, D::Minus1)
            .context(AttentionWeightSnafu)
            .and_then(|weights| self.dropout.forward_t(&weights, train).context(DropoutSnafu))?;
        value
            .contiguous()
            .and_then(|value| attn_weights.broadcast_matmul(&value))
            .context(AttentionWeightSnafu)
    }
}
