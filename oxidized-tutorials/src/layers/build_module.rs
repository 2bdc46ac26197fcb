use std::fmt::Debug;

use candle_core::ModuleT;
use candle_nn::VarBuilder;

use crate::error::BoxedError;

/// Configuration of a pluggable sub-module, such as an activation,
/// a dropout or a normalization layer.
pub trait BuildModule: Debug {
    /// Construct the module, taking its parameters (if any) from `vb`.
    fn build(&self, vb: VarBuilder) -> Result<Box<dyn ModuleT>, BoxedError>;
}
