use candle_core::{DType, Device, Module, ModuleT, Tensor};
use candle_nn::ops::log_softmax;
use candle_nn::{linear, Dropout, Linear, VarBuilder};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

use crate::architectures::BuildArchitecture;
use crate::data::names::N_LETTERS;
use crate::error::BoxedError;

/// Character RNN configuration.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct CharRnnConfig {
    dropout: f32,
    hidden_size: usize,
    input_size: usize,
    n_categories: usize,
    output_size: usize,
}

impl CharRnnConfig {
    /// Dropout probability applied before the output distribution.
    ///
    /// Default: `0.1`
    pub fn dropout(mut self, dropout: f32) -> Self {
        self.dropout = dropout;
        self
    }

    /// Size of the hidden state.
    ///
    /// Default: `128`
    pub fn hidden_size(mut self, hidden_size: usize) -> Self {
        self.hidden_size = hidden_size;
        self
    }

    /// Size of the one-hot letter input.
    ///
    /// Default: `N_LETTERS`
    pub fn input_size(mut self, input_size: usize) -> Self {
        self.input_size = input_size;
        self
    }

    /// Number of categories the model is conditioned on.
    ///
    /// Default: `18`
    pub fn n_categories(mut self, n_categories: usize) -> Self {
        self.n_categories = n_categories;
        self
    }

    /// Number of output classes.
    ///
    /// Default: `N_LETTERS`
    pub fn output_size(mut self, output_size: usize) -> Self {
        self.output_size = output_size;
        self
    }
}

impl Default for CharRnnConfig {
    fn default() -> Self {
        Self {
            dropout: 0.1,
            hidden_size: 128,
            input_size: N_LETTERS,
            n_categories: 18,
            output_size: N_LETTERS,
        }
    }
}

impl BuildArchitecture for CharRnnConfig {
    type Architecture = CharRnn;

    fn build(&self, vb: VarBuilder) -> Result<Self::Architecture, BoxedError> {
        let combined_size = self.n_categories + self.input_size + self.hidden_size;
        Ok(CharRnn {
            device: vb.device().clone(),
            dropout: Dropout::new(self.dropout),
            hidden_size: self.hidden_size,
            i2h: linear(combined_size, self.hidden_size, vb.push_prefix("i2h"))
                .context(BuildLinearSnafu)?,
            i2o: linear(combined_size, self.output_size, vb.push_prefix("i2o"))
                .context(BuildLinearSnafu)?,
            input_size: self.input_size,
            n_categories: self.n_categories,
            o2o: linear(
                self.hidden_size + self.output_size,
                self.output_size,
                vb.push_prefix("o2o"),
            )
            .context(BuildLinearSnafu)?,
        })
    }
}

/// Character RNN errors.
#[derive(Debug, Snafu)]
pub enum CharRnnError {
    #[snafu(display("Cannot build linear layer"))]
    BuildLinear { source: candle_core::Error },

    #[snafu(display("Cannot combine category, input, and hidden state"))]
    Combine { source: candle_core::Error },

    #[snafu(display("Cannot create hidden state"))]
    InitHidden { source: candle_core::Error },

    #[snafu(display("Cannot compute output distribution"))]
    Output { source: candle_core::Error },

    #[snafu(display("Cannot compute hidden state"))]
    UpdateHidden { source: candle_core::Error },
}

/// Recurrent network that generates names one letter at a time,
/// conditioned on a category.
///
/// At every step the category, the current letter and the hidden state
/// are concatenated. Two linear layers compute the next hidden state and
/// an intermediate output, a third layer combines both into the
/// distribution over the next letter:
///
/// `combined = [category; input; hidden]`
/// `hidden' = i2h(combined)`
/// `output = log_softmax(dropout(o2o([hidden'; i2o(combined)])))`
pub struct CharRnn {
    device: Device,
    dropout: Dropout,
    hidden_size: usize,
    i2h: Linear,
    i2o: Linear,
    input_size: usize,
    n_categories: usize,
    o2o: Linear,
}

impl CharRnn {
    /// Device the parameters are stored on.
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Apply one step of the network.
    ///
    /// * `category` - One-hot category.
    ///   *Shape:* `(batch_size, n_categories)`
    /// * `input` - One-hot current letter.
    ///   *Shape:* `(batch_size, input_size)`
    /// * `hidden` - Hidden state.
    ///   *Shape:* `(batch_size, hidden_size)`
    /// * `train` - Whether to apply dropout.
    ///
    /// Returns: log-probabilities of the next letter with shape
    /// `(batch_size, output_size)` and the next hidden state with shape
    /// `(batch_size, hidden_size)`.
    pub fn forward_t(
        &self,
        category: &Tensor,
        input: &Tensor,
        hidden: &Tensor,
        train: bool,
    ) -> Result<(Tensor, Tensor), CharRnnError> {
        let combined = Tensor::cat(&[category, input, hidden], 1).context(CombineSnafu)?;
        let hidden = self.i2h.forward(&combined).context(UpdateHiddenSnafu)?;
        let output = self
            .i2o
            .forward(&combined)
            .and_then(|output| Tensor::cat(&[&hidden, &output], 1))
            .and_then(|output_combined| self.o2o.forward(&output_combined))
            .and_then(|output| self.dropout.forward_t(&output, train))
            .and_then(|output| log_softmax(&output, 1))
            .context(OutputSnafu)?;
        Ok((output, hidden))
    }

    /// Initial hidden state.
    ///
    /// *Shape:* `(batch_size, hidden_size)`
    pub fn init_hidden(&self, batch_size: usize) -> Result<Tensor, CharRnnError> {
        Tensor::zeros((batch_size, self.hidden_size), DType::F32, &self.device)
            .context(InitHiddenSnafu)
    }

    /// Size of the one-hot letter input.
    pub fn input_size(&self) -> usize {
        self.input_size
    }

    /// Number of categories the model is conditioned on.
    pub fn n_categories(&self) -> usize {
        self.n_categories
    }
}

#[cfg(test)]
mod tests {
    use candle_core::{DType, Device, IndexOp, Tensor};
    use candle_nn::{VarBuilder, VarMap};
    use snafu::{report, FromString, ResultExt, Whatever};

    use super::CharRnnConfig;
    use crate::architectures::BuildArchitecture;
    use crate::data::names::{category_tensor, input_tensor, N_LETTERS};

    #[test]
    #[report]
    fn char_rnn_step_outputs_log_probabilities() -> Result<(), Whatever> {
        let device = Device::Cpu;
        let var_map = VarMap::new();
        let vb = VarBuilder::from_varmap(&var_map, DType::F32, &device);
        let rnn = CharRnnConfig::default()
            .n_categories(3)
            .hidden_size(16)
            .build(vb)
            .map_err(|e| Whatever::with_source(e, "Cannot build model".to_string()))?;

        let category = category_tensor(2, 3, &device).whatever_context("Cannot encode")?;
        let input = input_tensor("A", &device)
            .whatever_context("Cannot encode")?
            .i(0)
            .whatever_context("Cannot select letter")?;
        let hidden = rnn.init_hidden(1).whatever_context("Cannot create hidden")?;

        let (output, hidden) = rnn
            .forward_t(&category, &input, &hidden, false)
            .whatever_context("Cannot apply model")?;
        assert_eq!(output.dims(), &[1, N_LETTERS]);
        assert_eq!(hidden.dims(), &[1, 16]);

        let total = output
            .exp()
            .and_then(|probs| probs.sum_all())
            .and_then(|total| total.to_scalar::<f32>())
            .whatever_context("Cannot sum probabilities")?;
        assert!((total - 1.0).abs() < 1e-5);

        // Weights and biases of i2h, i2o, and o2o.
        assert_eq!(var_map.all_vars().len(), 6);
        Ok(())
    }

    #[test]
    #[report]
    fn char_rnn_hidden_state_is_zero_initially() -> Result<(), Whatever> {
        let vb = VarBuilder::zeros(DType::F32, &Device::Cpu);
        let rnn = CharRnnConfig::default()
            .build(vb)
            .map_err(|e| Whatever::with_source(e, "Cannot build model".to_string()))?;
        let hidden = rnn.init_hidden(2).whatever_context("Cannot create hidden")?;
        assert_eq!(hidden.dims(), &[2, 128]);
        let total = hidden
            .abs()
            .and_then(|hidden| hidden.sum_all())
            .and_then(|total| total.to_scalar::<f32>())
            .whatever_context("Cannot sum hidden state")?;
        assert_eq!(total, 0.0);
        Ok(())
    }

    #[test]
    fn char_rnn_config_deserializes_with_defaults() {
        let config: CharRnnConfig = serde_json::from_str(r#"{"n_categories": 5}"#).unwrap();
        assert_eq!(config, CharRnnConfig::default().n_categories(5));
    }

    #[test]
    #[report]
    fn char_rnn_accepts_batches() -> Result<(), Whatever> {
        let device = Device::Cpu;
        let vb = VarBuilder::zeros(DType::F32, &device);
        let rnn = CharRnnConfig::default()
            .n_categories(2)
            .hidden_size(4)
            .build(vb)
            .map_err(|e| Whatever::with_source(e, "Cannot build model".to_string()))?;
        let category = Tensor::zeros((3, 2), DType::F32, &device).whatever_context("Tensor")?;
        let input =
            Tensor::zeros((3, N_LETTERS), DType::F32, &device).whatever_context("Tensor")?;
        let hidden = rnn.init_hidden(3).whatever_context("Cannot create hidden")?;
        let (output, _) = rnn
            .forward_t(&category, &input, &hidden, false)
            .whatever_context("Cannot apply model")?;
        assert_eq!(output.dims(), &[3, N_LETTERS]);
        Ok(())
    }
}
