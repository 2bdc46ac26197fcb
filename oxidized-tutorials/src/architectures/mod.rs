//! Model-level traits shared by the language models.

use candle_nn::VarBuilder;

mod embeddings;
pub use embeddings::{BuildEmbeddings, Embeddings};

mod encoder;
pub use encoder::{BuildEncoderLayer, Encoder, EncoderLayer, EncoderOutput};

use crate::error::BoxedError;

/// Model configuration that can construct the model.
///
/// Parameters are created in, or loaded from, the `VarBuilder`.
pub trait BuildArchitecture {
    /// Model built by this configuration.
    type Architecture;

    /// Construct the model.
    fn build(&self, vb: VarBuilder) -> Result<Self::Architecture, BoxedError>;
}
