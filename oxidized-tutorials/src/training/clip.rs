use candle_core::backprop::GradStore;
use candle_core::Var;

/// Clip gradients to a maximum global L2 norm.
///
/// When the norm over all gradients exceeds `max_norm`, every gradient is
/// scaled by `max_norm / (norm + 1e-6)`. Variables without a gradient are
/// ignored.
///
/// Returns: the gradient norm before clipping.
pub fn clip_grad_norm(
    vars: &[Var],
    grads: &mut GradStore,
    max_norm: f64,
) -> Result<f64, candle_core::Error> {
    let mut sum_sq = 0f64;
    for var in vars {
        if let Some(grad) = grads.get(var) {
            sum_sq += grad
                .sqr()?
                .sum_all()?
                .to_dtype(candle_core::DType::F64)?
                .to_scalar::<f64>()?;
        }
    }
    let norm = sum_sq.sqrt();

    let clip_coef = max_norm / (norm + 1e-6);
    if clip_coef < 1.0 {
        for var in vars {
            if let Some(grad) = grads.get(var) {
                let clipped = (grad * clip_coef)?;
                grads.insert(var, clipped);
            }
        }
    }

    Ok(norm)
}
