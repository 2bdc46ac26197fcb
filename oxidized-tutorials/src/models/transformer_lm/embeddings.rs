use candle_core::{Module, Tensor};
use candle_nn::{init::Init, Embedding, VarBuilder};
use snafu::{ResultExt, Snafu};

use crate::architectures::{BuildEmbeddings, Embeddings};
use crate::error::BoxedError;
use crate::layers::embeddings::{
    SinusoidalPositionalEncoding, SinusoidalPositionalEncodingConfig,
    SinusoidalPositionalEncodingError,
};

/// Configuration of the language model embeddings.
#[derive(Debug)]
pub struct TransformerLmEmbeddingsConfig {
    init_range: f64,
    n_tokens: usize,
    positional_encoding: SinusoidalPositionalEncodingConfig,
    width: usize,
}

impl TransformerLmEmbeddingsConfig {
    /// Token embeddings are initialized uniformly in
    /// `[-init_range, init_range]`.
    ///
    /// Default: `0.1`
    pub fn init_range(mut self, init_range: f64) -> Self {
        self.init_range = init_range;
        self
    }

    /// Vocabulary size.
    ///
    /// Default: `28_782`
    pub fn n_tokens(mut self, n_tokens: usize) -> Self {
        self.n_tokens = n_tokens;
        self
    }

    /// Positional encoding configuration.
    ///
    /// Default: `SinusoidalPositionalEncodingConfig::default()`
    pub fn positional_encoding(
        mut self,
        positional_encoding: SinusoidalPositionalEncodingConfig,
    ) -> Self {
        self.positional_encoding = positional_encoding;
        self
    }

    /// Embedding width.
    ///
    /// Default: `200`
    pub fn width(mut self, width: usize) -> Self {
        self.width = width;
        self
    }

    /// Build the embeddings.
    pub fn build(
        &self,
        vb: VarBuilder,
    ) -> Result<TransformerLmEmbeddings, TransformerLmEmbeddingsError> {
        let weight = vb
            .push_prefix("token_embeddings")
            .get_with_hints(
                (self.n_tokens, self.width),
                "weight",
                Init::Uniform {
                    lo: -self.init_range,
                    up: self.init_range,
                },
            )
            .context(BuildTokenEmbeddingsSnafu)?;

        Ok(TransformerLmEmbeddings {
            positional_encoding: self
                .positional_encoding
                .build(vb.push_prefix("positional_encoding"))
                .context(BuildPositionalEncodingSnafu)?,
            scale: (self.width as f64).sqrt(),
            token_embeddings: Embedding::new(weight, self.width),
        })
    }
}

impl Default for TransformerLmEmbeddingsConfig {
    fn default() -> Self {
        Self {
            init_range: 0.1,
            n_tokens: 28_782,
            positional_encoding: SinusoidalPositionalEncodingConfig::default(),
            width: 200,
        }
    }
}

impl BuildEmbeddings for TransformerLmEmbeddingsConfig {
    fn build(&self, vb: VarBuilder) -> Result<Box<dyn Embeddings>, BoxedError> {
        Ok(Box::new(TransformerLmEmbeddingsConfig::build(self, vb)?))
    }
}

/// Language model embedding errors.
#[derive(Debug, Snafu)]
pub enum TransformerLmEmbeddingsError {
    #[snafu(display("Cannot build positional encoding"))]
    BuildPositionalEncoding {
        source: SinusoidalPositionalEncodingError,
    },

    #[snafu(display("Cannot build token embeddings"))]
    BuildTokenEmbeddings { source: candle_core::Error },

    #[snafu(display("Cannot apply positional encoding"))]
    PositionalEncoding {
        source: SinusoidalPositionalEncodingError,
    },

    #[snafu(display("Cannot look up token embeddings"))]
    TokenEmbeddings { source: candle_core::Error },
}

/// Token embeddings scaled by `sqrt(width)`, followed by sinusoidal
/// positional encodings.
pub struct TransformerLmEmbeddings {
    positional_encoding: SinusoidalPositionalEncoding,
    scale: f64,
    token_embeddings: Embedding,
}

impl TransformerLmEmbeddings {
    /// Embed token identifiers.
    ///
    /// * `token_ids` - Token identifiers.
    ///   *Shape:* `(batch_size, seq_len)`
    /// * `train` - Whether to apply dropout.
    ///
    /// Returns: embeddings.
    /// *Shape:* `(batch_size, seq_len, width)`
    pub fn forward_t(
        &self,
        token_ids: &Tensor,
        train: bool,
    ) -> Result<Tensor, TransformerLmEmbeddingsError> {
        let embeddings = self
            .token_embeddings
            .forward(token_ids)
            .and_then(|embeddings| embeddings * self.scale)
            .context(TokenEmbeddingsSnafu)?;
        self.positional_encoding
            .forward_t(&embeddings, train)
            .context(PositionalEncodingSnafu)
    }
}

impl Embeddings for TransformerLmEmbeddings {
    fn forward(&self, token_ids: &Tensor, train: bool) -> Result<Tensor, BoxedError> {
        Ok(self.forward_t(token_ids, train)?)
    }
}

#[cfg(test)]
mod tests {
    use candle_core::{DType, Device, IndexOp, Tensor};
    use candle_nn::{VarBuilder, VarMap};
    use snafu::{report, OptionExt, ResultExt, Whatever};

    use super::TransformerLmEmbeddingsConfig;
    use crate::layers::embeddings::SinusoidalPositionalEncodingConfig;
    use crate::util::tests::{assert_tensor_eq, f32_array};

    #[test]
    #[report]
    fn embeddings_are_scaled_and_positioned() -> Result<(), Whatever> {
        let device = Device::Cpu;
        let var_map = VarMap::new();
        let vb = VarBuilder::from_varmap(&var_map, DType::F32, &device);
        let embeddings = TransformerLmEmbeddingsConfig::default()
            .n_tokens(10)
            .width(4)
            .positional_encoding(
                SinusoidalPositionalEncodingConfig::default()
                    .width(4)
                    .max_len(16),
            )
            .build(vb)
            .whatever_context("Cannot build embeddings")?;

        let weight = var_map
            .data()
            .lock()
            .unwrap()
            .get("token_embeddings.weight")
            .map(|var| var.as_tensor().clone())
            .whatever_context("Missing token embeddings")?;
        let max_abs = weight
            .abs()
            .and_then(|weight| weight.flatten_all())
            .and_then(|weight| weight.max(0))
            .and_then(|weight| weight.to_scalar::<f32>())
            .whatever_context("Cannot compute maximum")?;
        assert!(max_abs <= 0.1);

        let ids = Tensor::new(&[[3u32, 1]], &device).whatever_context("Cannot create ids")?;
        let output = embeddings
            .forward_t(&ids, false)
            .whatever_context("Cannot embed")?;

        // Width 4 scales embeddings by 2.
        let expected = weight
            .i(1)
            .and_then(|embedding| embedding * 2.0)
            .and_then(|embedding| {
                embedding + embeddings.positional_encoding.encodings().i(1)?
            })
            .whatever_context("Cannot compute expected embedding")?;
        assert_tensor_eq!(
            output.i((0, 1)).whatever_context("Cannot slice output")?,
            f32_array(&expected),
            epsilon = 1e-5,
        );
        Ok(())
    }
}
