use candle_core::{Module, ModuleT, Tensor};
use candle_nn::{linear, Linear, VarBuilder};
use snafu::{ResultExt, Snafu};

use crate::error::BoxedError;
use crate::layers::activation::Activation;
use crate::layers::build_module::BuildModule;
use crate::layers::identity::Identity;

/// Point-wise feed-forward layer configuration.
#[derive(Debug)]
pub struct PointwiseFeedForwardConfig {
    activation: Box<dyn BuildModule>,
    activation_dropout: Box<dyn BuildModule>,
    dropout: Box<dyn BuildModule>,
    hidden_width: usize,
    intermediate_width: usize,
}

impl PointwiseFeedForwardConfig {
    /// Activation function.
    ///
    /// Default: `Activation::Relu`
    pub fn activation(mut self, activation: Box<dyn BuildModule>) -> Self {
        self.activation = activation;
        self
    }

    /// Dropout applied to the output of the activation function.
    ///
    /// Default: `Identity`
    pub fn activation_dropout(mut self, activation_dropout: Box<dyn BuildModule>) -> Self {
        self.activation_dropout = activation_dropout;
        self
    }

    /// Dropout applied to the output of the layer.
    ///
    /// Default: `Identity`
    pub fn dropout(mut self, dropout: Box<dyn BuildModule>) -> Self {
        self.dropout = dropout;
        self
    }

    /// Hidden width, dimensionality of the layer input and output.
    ///
    /// Default: `200`
    pub fn hidden_width(mut self, hidden_width: usize) -> Self {
        self.hidden_width = hidden_width;
        self
    }

    /// Intermediate width inside the feed-forward layer.
    ///
    /// Default: `200`
    pub fn intermediate_width(mut self, intermediate_width: usize) -> Self {
        self.intermediate_width = intermediate_width;
        self
    }

    /// Build a point-wise feed-forward layer.
    pub fn build(&self, vb: VarBuilder) -> Result<PointwiseFeedForward, PointwiseFeedForwardError> {
        Ok(PointwiseFeedForward {
            activation: self
                .activation
                .build(vb.clone())
                .context(BuildActivationSnafu)?,
            activation_dropout: self
                .activation_dropout
                .build(vb.clone())
                .context(BuildDropoutSnafu)?,
            dropout: self.dropout.build(vb.clone()).context(BuildDropoutSnafu)?,
            intermediate: linear(
                self.hidden_width,
                self.intermediate_width,
                vb.push_prefix("intermediate"),
            )
            .context(BuildLinearSnafu)?,
            output: linear(
                self.intermediate_width,
                self.hidden_width,
                vb.push_prefix("output"),
            )
            .context(BuildLinearSnafu)?,
        })
    }
}

impl Default for PointwiseFeedForwardConfig {
    fn default() -> Self {
        Self {
            activation: Box::new(Activation::Relu),
            activation_dropout: Box::new(Identity),
            dropout: Box::new(Identity),
            hidden_width: 200,
            intermediate_width: 200,
        }
    }
}

/// Point-wise feed-forward layer errors.
#[derive(Debug, Snafu)]
pub enum PointwiseFeedForwardError {
    #[snafu(display("Cannot build activation"))]
    BuildActivation { source: BoxedError },

    #[snafu(display("Cannot build dropout"))]
    BuildDropout { source: BoxedError },

    #[snafu(display("Cannot build linear layer"))]
    BuildLinear { source: candle_core::Error },
}

/// Point-wise feed-forward layer (_Vaswani et al., 2017_).
///
/// This layer is applied pointwise, meaning that the same
/// transformation is applied to each sequence element. This
/// transformation is:
///
/// `g(xW_1 + b_1)W_2 + b_2`
///
/// `W_1` and `b_1` transform the input to an intermediate width, `g` is a
/// non-linear activation function and `W_2` and `b_2` transform the output
/// of the activation back to the input width. Dropout can be applied to
/// the output of `g` and to the output of the layer.
///
/// * _Vaswani et al., 2017_: https://arxiv.org/abs/1706.03762
pub struct PointwiseFeedForward {
    activation: Box<dyn ModuleT>,
    activation_dropout: Box<dyn ModuleT>,
    dropout: Box<dyn ModuleT>,
    intermediate: Linear,
    output: Linear,
}

impl ModuleT for PointwiseFeedForward {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor, candle_core::Error> {
        let hidden = self.intermediate.forward(xs)?;
        let hidden = self.activation.forward_t(&hidden, train)?;
        let hidden = self.activation_dropout.forward_t(&hidden, train)?;
        let output = self.output.forward(&hidden)?;
        self.dropout.forward_t(&output, train)
    }
}

#[cfg(test)]
mod tests {
    use candle_core::{DType, Device, ModuleT, Tensor};
    use candle_nn::{VarBuilder, VarMap};
    use snafu::{report, ResultExt, Whatever};

    use super::PointwiseFeedForwardConfig;

    #[test]
    #[report]
    fn feed_forward_preserves_hidden_width() -> Result<(), Whatever> {
        let var_map = VarMap::new();
        let vb = VarBuilder::from_varmap(&var_map, DType::F32, &Device::Cpu);
        let ffn = PointwiseFeedForwardConfig::default()
            .hidden_width(8)
            .intermediate_width(16)
            .build(vb)
            .whatever_context("Cannot build feed-forward layer")?;
        let input = Tensor::ones((2, 3, 8), DType::F32, &Device::Cpu)
            .whatever_context("Cannot create input")?;
        let output = ffn
            .forward_t(&input, false)
            .whatever_context("Cannot apply feed-forward layer")?;
        assert_eq!(output.dims(), &[2, 3, 8]);

        let mut names = var_map
            .data()
            .lock()
            .unwrap()
            .keys()
            .cloned()
            .collect::<Vec<_>>();
        names.sort();
        assert_eq!(
            names,
            [
                "intermediate.bias",
                "intermediate.weight",
                "output.bias",
                "output.weight"
            ]
        );
        Ok(())
    }
}
