//! Transformer language model over word-level tokens.

mod embeddings;
pub use embeddings::{
    TransformerLmEmbeddings, TransformerLmEmbeddingsConfig, TransformerLmEmbeddingsError,
};

mod encoder;
pub use encoder::{TransformerEncoder, TransformerEncoderConfig, TransformerEncoderError};

mod model;
pub use model::{TransformerLm, TransformerLmConfig, TransformerLmError};
