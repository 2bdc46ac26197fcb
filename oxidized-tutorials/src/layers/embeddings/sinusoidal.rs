use candle_core::{ModuleT, Tensor};
use candle_nn::VarBuilder;
use snafu::{ensure, ResultExt, Snafu};

use crate::error::BoxedError;
use crate::layers::build_module::BuildModule;
use crate::layers::identity::Identity;

/// Configuration for sinusoidal positional encodings.
#[derive(Debug)]
pub struct SinusoidalPositionalEncodingConfig {
    base: f32,
    dropout: Box<dyn BuildModule>,
    max_len: usize,
    width: usize,
}

impl SinusoidalPositionalEncodingConfig {
    /// Base of the wavelengths.
    ///
    /// The wavelengths form a geometric progression from `2π` to
    /// `base * 2π`.
    ///
    /// Default: `10_000`
    pub fn base(mut self, base: f32) -> Self {
        self.base = base;
        self
    }

    /// Dropout applied after adding the encodings.
    ///
    /// Default: `Identity`
    pub fn dropout(mut self, dropout: Box<dyn BuildModule>) -> Self {
        self.dropout = dropout;
        self
    }

    /// Number of positions to precompute encodings for.
    ///
    /// Default: `5000`
    pub fn max_len(mut self, max_len: usize) -> Self {
        self.max_len = max_len;
        self
    }

    /// Width of the encodings. Must be even.
    ///
    /// Default: `200`
    pub fn width(mut self, width: usize) -> Self {
        self.width = width;
        self
    }

    /// Build sinusoidal positional encodings.
    pub fn build(
        &self,
        vb: VarBuilder,
    ) -> Result<SinusoidalPositionalEncoding, SinusoidalPositionalEncodingError> {
        ensure!(
            self.width % 2 == 0,
            OddWidthSnafu { width: self.width }
        );

        let half_width = self.width / 2;
        let mut encodings = Vec::with_capacity(self.max_len * self.width);
        for pos in 0..self.max_len {
            for i in 0..half_width {
                // 1 / base^(2i/d)
                let inv_freq = (-(self.base.ln()) * (2 * i) as f32 / self.width as f32).exp();
                let angle = pos as f32 * inv_freq;
                encodings.push(angle.sin());
                encodings.push(angle.cos());
            }
        }

        let encodings = Tensor::from_vec(encodings, (self.max_len, self.width), vb.device())
            .and_then(|encodings| encodings.to_dtype(vb.dtype()))
            .context(CreateEncodingsSnafu)?;

        Ok(SinusoidalPositionalEncoding {
            dropout: self.dropout.build(vb).context(BuildDropoutSnafu)?,
            encodings,
        })
    }
}

impl Default for SinusoidalPositionalEncodingConfig {
    fn default() -> Self {
        Self {
            base: 10_000.,
            dropout: Box::new(Identity),
            max_len: 5000,
            width: 200,
        }
    }
}

/// Errors for sinusoidal positional encodings.
#[derive(Debug, Snafu)]
pub enum SinusoidalPositionalEncodingError {
    #[snafu(display("Cannot add positional encodings to input"))]
    AddEncodings { source: candle_core::Error },

    #[snafu(display("Cannot build dropout"))]
    BuildDropout { source: BoxedError },

    #[snafu(display("Cannot create positional encodings"))]
    CreateEncodings { source: candle_core::Error },

    #[snafu(display("Cannot apply dropout"))]
    Dropout { source: candle_core::Error },

    #[snafu(display("Invalid input shape"))]
    InputShape { source: candle_core::Error },

    #[snafu(display("Encoding width must be even, was {width}"))]
    OddWidth { width: usize },

    #[snafu(display("Sequence length {seq_len} exceeds the maximum length {max_len}"))]
    SeqTooLong { max_len: usize, seq_len: usize },
}

/// Sinusoidal positional encodings (Vaswani et al., 2017).
///
/// Even dimensions use `sin(pos / base^(2i/d))`, odd dimensions use
/// `cos(pos / base^(2i/d))`.
///
/// Paper: https://arxiv.org/abs/1706.03762
pub struct SinusoidalPositionalEncoding {
    dropout: Box<dyn ModuleT>,
    encodings: Tensor,
}

impl SinusoidalPositionalEncoding {
    /// Precomputed encodings.
    ///
    /// *Shape:* `(max_len, width)`
    pub fn encodings(&self) -> &Tensor {
        &self.encodings
    }

    /// Add positional encodings to the input.
    ///
    /// * `input` - Input embeddings.
    ///   *Shape:* `(batch_size, seq_len, width)`
    /// * `train` - Whether to apply dropout.
    ///
    /// Returns: Input with positional encodings added.
    /// *Shape:* `(batch_size, seq_len, width)`
    pub fn forward_t(
        &self,
        input: &Tensor,
        train: bool,
    ) -> Result<Tensor, SinusoidalPositionalEncodingError> {
        let (_, seq_len, _) = input.dims3().context(InputShapeSnafu)?;
        let max_len = self.encodings.dim(0).context(InputShapeSnafu)?;
        ensure!(seq_len <= max_len, SeqTooLongSnafu { max_len, seq_len });

        let output = self
            .encodings
            .narrow(0, 0, seq_len)
            .and_then(|encodings| encodings.unsqueeze(0))
            .and_then(|encodings| input.broadcast_add(&encodings))
            .context(AddEncodingsSnafu)?;

        self.dropout
            .forward_t(&output, train)
            .context(DropoutSnafu)
    }
}

#[cfg(test)]
mod tests {
    use candle_core::{DType, Device, IndexOp, Tensor};
    use candle_nn::VarBuilder;
    use ndarray::array;
    use snafu::{report, ResultExt, Whatever};

    use super::{SinusoidalPositionalEncodingConfig, SinusoidalPositionalEncodingError};
    use crate::util::tests::{assert_tensor_eq, f32_array};

    #[test]
    #[report]
    fn sinusoidal_encodings_have_correct_values() -> Result<(), Whatever> {
        let vb = VarBuilder::zeros(DType::F32, &Device::Cpu);
        let encoding = SinusoidalPositionalEncodingConfig::default()
            .width(4)
            .max_len(8)
            .build(vb)
            .whatever_context("Cannot build positional encodings")?;

        assert_tensor_eq!(
            encoding
                .encodings()
                .i(..3)
                .whatever_context("Cannot slice encodings")?,
            array![
                [0.0000f32, 1.0000, 0.0000, 1.0000],
                [0.8415, 0.5403, 0.0100, 0.9999],
                [0.9093, -0.4161, 0.0200, 0.9998],
            ],
            epsilon = 1e-4,
        );

        Ok(())
    }

    #[test]
    #[report]
    fn sinusoidal_encodings_are_added_to_input() -> Result<(), Whatever> {
        let vb = VarBuilder::zeros(DType::F32, &Device::Cpu);
        let encoding = SinusoidalPositionalEncodingConfig::default()
            .width(4)
            .max_len(8)
            .build(vb)
            .whatever_context("Cannot build positional encodings")?;
        let input = Tensor::ones((2, 3, 4), DType::F32, &Device::Cpu)
            .whatever_context("Cannot create input")?;
        let output = encoding
            .forward_t(&input, false)
            .whatever_context("Cannot apply positional encodings")?;

        let expected = encoding
            .encodings()
            .i(..3)
            .and_then(|encodings| encodings + 1.0)
            .whatever_context("Cannot compute expected output")?;
        assert_tensor_eq!(
            output.i(1).whatever_context("Cannot slice output")?,
            f32_array(&expected),
            epsilon = 1e-6,
        );

        Ok(())
    }

    #[test]
    fn sinusoidal_encodings_reject_long_sequences() {
        let vb = VarBuilder::zeros(DType::F32, &Device::Cpu);
        let encoding = SinusoidalPositionalEncodingConfig::default()
            .width(4)
            .max_len(2)
            .build(vb)
            .unwrap();
        let input = Tensor::ones((1, 3, 4), DType::F32, &Device::Cpu).unwrap();
        assert!(matches!(
            encoding.forward_t(&input, false),
            Err(SinusoidalPositionalEncodingError::SeqTooLong {
                max_len: 2,
                seq_len: 3
            })
        ));
    }

    #[test]
    fn sinusoidal_encodings_reject_odd_width() {
        let vb = VarBuilder::zeros(DType::F32, &Device::Cpu);
        assert!(matches!(
            SinusoidalPositionalEncodingConfig::default()
                .width(5)
                .build(vb),
            Err(SinusoidalPositionalEncodingError::OddWidth { width: 5 })
        ));
    }
}
