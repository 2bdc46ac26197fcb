use candle_core::{Module, ModuleT, Tensor};
use candle_nn::VarBuilder;

use crate::error::BoxedError;
use crate::layers::build_module::BuildModule;

/// No-op module.
///
/// Used as the default wherever a layer takes an optional dropout or
/// normalization.
#[derive(Clone, Debug)]
pub struct Identity;

impl BuildModule for Identity {
    fn build(&self, _vb: VarBuilder) -> Result<Box<dyn ModuleT>, BoxedError> {
        Ok(Box::new(Identity))
    }
}

impl Module for Identity {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        Ok(xs.clone())
    }
}

#[cfg(test)]
mod tests {
    use candle_core::{DType, Device, ModuleT, Tensor};
    use candle_nn::VarBuilder;
    use snafu::{report, FromString, ResultExt, Whatever};

    use super::Identity;
    use crate::layers::build_module::BuildModule;

    #[test]
    #[report]
    fn identity_returns_input_in_training() -> Result<(), Whatever> {
        let identity = Identity
            .build(VarBuilder::zeros(DType::F32, &Device::Cpu))
            .map_err(|e| Whatever::with_source(e, "Cannot build identity".to_string()))?;
        let input = Tensor::arange(0f32, 6f32, &Device::Cpu).whatever_context("Cannot create input")?;
        let output = identity
            .forward_t(&input, true)
            .and_then(|output| output.to_vec1::<f32>())
            .whatever_context("Cannot apply identity")?;
        assert_eq!(output, [0., 1., 2., 3., 4., 5.]);
        Ok(())
    }
}
