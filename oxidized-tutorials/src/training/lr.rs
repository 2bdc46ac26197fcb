use candle_nn::Optimizer;

/// Step learning rate schedule.
///
/// The learning rate is decayed by `gamma` every `step_size` epochs:
/// `lr = base_lr * gamma^(epoch / step_size)`.
#[derive(Clone, Debug)]
pub struct StepLr {
    base_lr: f64,
    epoch: usize,
    gamma: f64,
    step_size: usize,
}

impl StepLr {
    /// Create a schedule.
    ///
    /// * `base_lr` - Learning rate of the first epoch.
    /// * `step_size` - Number of epochs between decays.
    /// * `gamma` - Multiplicative decay.
    pub fn new(base_lr: f64, step_size: usize, gamma: f64) -> Self {
        StepLr {
            base_lr,
            epoch: 0,
            gamma,
            step_size: step_size.max(1),
        }
    }

    /// Current learning rate.
    pub fn lr(&self) -> f64 {
        self.base_lr * self.gamma.powi((self.epoch / self.step_size) as i32)
    }

    /// Advance by one epoch and apply the new learning rate.
    pub fn step(&mut self, optimizer: &mut impl Optimizer) {
        self.epoch += 1;
        optimizer.set_learning_rate(self.lr());
    }
}
