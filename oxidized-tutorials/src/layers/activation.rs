use candle_core::ModuleT;
use candle_nn::{Activation as CandleActivation, VarBuilder};
use serde::{Deserialize, Serialize};

use crate::error::BoxedError;
use crate::layers::build_module::BuildModule;

/// Non-linearity of the feed-forward layers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    /// GELU (_Hendrycks and Gimpel, 2016_).
    Gelu,

    /// `max(0, x)`, used by the language model.
    #[default]
    Relu,

    /// `x * sigmoid(x)`.
    Silu,
}

impl BuildModule for Activation {
    fn build(&self, _vb: VarBuilder) -> Result<Box<dyn ModuleT>, BoxedError> {
        let activation = match self {
            Activation::Gelu => CandleActivation::Gelu,
            Activation::Relu => CandleActivation::Relu,
            Activation::Silu => CandleActivation::Silu,
        };
        Ok(Box::new(activation))
    }
}
