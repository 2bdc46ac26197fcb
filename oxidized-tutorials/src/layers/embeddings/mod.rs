mod sinusoidal;
pub use sinusoidal::{
    SinusoidalPositionalEncoding, SinusoidalPositionalEncodingConfig,
    SinusoidalPositionalEncodingError,
};
