use candle_core::ModuleT;
use candle_nn::{Dropout, VarBuilder};

use crate::error::BoxedError;
use crate::layers::build_module::BuildModule;

/// Dropout configuration.
#[derive(Clone, Debug)]
pub struct DropoutConfig {
    p: f32,
}

impl DropoutConfig {
    /// Dropout probability.
    ///
    /// Default: `0.0`
    pub fn p(mut self, p: f32) -> Self {
        self.p = p;
        self
    }
}

impl Default for DropoutConfig {
    fn default() -> Self {
        Self { p: 0.0 }
    }
}

impl BuildModule for DropoutConfig {
    fn build(&self, _vb: VarBuilder) -> Result<Box<dyn ModuleT>, BoxedError> {
        Ok(Box::new(Dropout::new(self.p)))
    }
}

#[cfg(test)]
mod tests {
    use candle_core::{DType, Device, ModuleT, Tensor};
    use candle_nn::VarBuilder;
    use snafu::{report, FromString, ResultExt, Whatever};

    use super::DropoutConfig;
    use crate::layers::build_module::BuildModule;
    use crate::util::tests::{assert_tensor_eq, f32_array};

    #[test]
    #[report]
    fn dropout_is_inactive_outside_training() -> Result<(), Whatever> {
        let vb = VarBuilder::zeros(DType::F32, &Device::Cpu);
        let dropout = DropoutConfig::default()
            .p(0.9)
            .build(vb)
            .map_err(|e| Whatever::with_source(e, "Cannot build dropout".to_string()))?;
        let input = Tensor::arange(0f32, 8f32, &Device::Cpu)
            .and_then(|xs| xs.reshape((2, 4)))
            .whatever_context("Cannot create input")?;
        let output = dropout
            .forward_t(&input, false)
            .whatever_context("Cannot apply dropout")?;
        assert_tensor_eq!(output, f32_array(&input), epsilon = 1e-6);
        Ok(())
    }
}
