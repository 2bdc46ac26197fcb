use std::time::{Duration, Instant};

use candle_core::{Device, Tensor, Var};
use candle_nn::loss::cross_entropy;
use candle_nn::{Optimizer, VarMap, SGD};
use serde::{Deserialize, Serialize};
use snafu::{ensure, ResultExt, Snafu};
use tracing::info;

use crate::data::corpus::{batchify, Batch, BpttBatches, CorpusError};
use crate::models::transformer_lm::{TransformerLm, TransformerLmError};
use crate::training::{clip_grad_norm, LossHistory, StepLr};

/// Language model trainer configuration.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct LmTrainerConfig {
    bptt: usize,
    epochs: usize,
    eval_batch_size: usize,
    learning_rate: f64,
    log_interval: usize,
    lr_gamma: f64,
    lr_step_size: usize,
    max_grad_norm: f64,
    train_batch_size: usize,
}

impl LmTrainerConfig {
    /// Maximum number of steps per batch.
    ///
    /// Default: `35`
    pub fn bptt(mut self, bptt: usize) -> Self {
        self.bptt = bptt;
        self
    }

    /// Number of epochs.
    ///
    /// Default: `3`
    pub fn epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    /// Number of streams for evaluation data.
    ///
    /// Default: `10`
    pub fn eval_batch_size(mut self, eval_batch_size: usize) -> Self {
        self.eval_batch_size = eval_batch_size;
        self
    }

    /// Initial SGD learning rate.
    ///
    /// Default: `5.0`
    pub fn learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    /// Number of batches between progress logs.
    ///
    /// Default: `200`
    pub fn log_interval(mut self, log_interval: usize) -> Self {
        self.log_interval = log_interval;
        self
    }

    /// Learning rate decay.
    ///
    /// Default: `0.95`
    pub fn lr_gamma(mut self, lr_gamma: f64) -> Self {
        self.lr_gamma = lr_gamma;
        self
    }

    /// Number of epochs between learning rate decays.
    ///
    /// Default: `1`
    pub fn lr_step_size(mut self, lr_step_size: usize) -> Self {
        self.lr_step_size = lr_step_size;
        self
    }

    /// Maximum global gradient norm.
    ///
    /// Default: `0.5`
    pub fn max_grad_norm(mut self, max_grad_norm: f64) -> Self {
        self.max_grad_norm = max_grad_norm;
        self
    }

    /// Number of streams for training data.
    ///
    /// Default: `20`
    pub fn train_batch_size(mut self, train_batch_size: usize) -> Self {
        self.train_batch_size = train_batch_size;
        self
    }
}

impl Default for LmTrainerConfig {
    fn default() -> Self {
        Self {
            bptt: 35,
            epochs: 3,
            eval_batch_size: 10,
            learning_rate: 5.0,
            log_interval: 200,
            lr_gamma: 0.95,
            lr_step_size: 1,
            max_grad_norm: 0.5,
            train_batch_size: 20,
        }
    }
}

/// Language model trainer errors.
#[derive(Debug, Snafu)]
pub enum LmTrainerError {
    #[snafu(display("Cannot apply model"))]
    ApplyModel { source: TransformerLmError },

    #[snafu(display("Cannot get batch"))]
    Batch { source: CorpusError },

    #[snafu(display("Cannot clip gradients"))]
    ClipGradients { source: candle_core::Error },

    #[snafu(display("Cannot create optimizer"))]
    CreateOptimizer { source: candle_core::Error },

    #[snafu(display("Evaluation data must have at least two steps, has {n_steps}"))]
    EvalTooShort { n_steps: usize },

    #[snafu(display("Cannot compute loss"))]
    Loss { source: candle_core::Error },

    #[snafu(display("Cannot copy parameters"))]
    Parameters { source: candle_core::Error },

    #[snafu(display("Cannot update parameters"))]
    Update { source: candle_core::Error },
}

/// Summary of a training epoch.
#[derive(Clone, Debug)]
pub struct EpochReport {
    pub elapsed: Duration,
    pub epoch: usize,
    pub learning_rate: f64,
    pub train_loss: f32,
    pub valid_loss: f32,
}

impl EpochReport {
    /// Validation perplexity.
    pub fn valid_ppl(&self) -> f32 {
        self.valid_loss.exp()
    }
}

/// Result of fitting a language model.
#[derive(Clone, Debug)]
pub struct FitReport {
    /// Lowest validation loss, the parameters of this epoch are restored.
    pub best_valid_loss: f32,
    pub epochs: Vec<EpochReport>,

    /// Training losses, one point per `log_interval` batches.
    pub history: LossHistory,
}

/// Trainer for the transformer language model.
#[derive(Clone, Debug, Default)]
pub struct LmTrainer {
    config: LmTrainerConfig,
}

impl LmTrainer {
    /// Create a trainer.
    pub fn new(config: LmTrainerConfig) -> Self {
        LmTrainer { config }
    }

    /// Trainer configuration.
    pub fn config(&self) -> &LmTrainerConfig {
        &self.config
    }

    /// Arrange evaluation data in `eval_batch_size` streams.
    pub fn batchify_eval(&self, ids: &[u32], device: &Device) -> Result<Tensor, LmTrainerError> {
        batchify(ids, self.config.eval_batch_size, device).context(BatchSnafu)
    }

    /// Arrange training data in `train_batch_size` streams.
    pub fn batchify_train(&self, ids: &[u32], device: &Device) -> Result<Tensor, LmTrainerError> {
        batchify(ids, self.config.train_batch_size, device).context(BatchSnafu)
    }

    /// Create the optimizer for the model variables.
    pub fn optimizer(&self, var_map: &VarMap) -> Result<SGD, LmTrainerError> {
        SGD::new(var_map.all_vars(), self.config.learning_rate).context(CreateOptimizerSnafu)
    }

    /// Train for one epoch.
    ///
    /// * `train_data` - Batched training data.
    ///   *Shape:* `(batch_size, n_steps)`
    ///
    /// Returns: the mean training loss of the epoch.
    pub fn train_epoch(
        &self,
        model: &TransformerLm,
        vars: &[Var],
        optimizer: &mut SGD,
        train_data: &Tensor,
        epoch: usize,
        history: &mut LossHistory,
    ) -> Result<f32, LmTrainerError> {
        let batches = BpttBatches::new(train_data, self.config.bptt).context(BatchSnafu)?;
        let n_batches = batches.n_batches();
        let log_interval = self.config.log_interval.max(1);

        let mut epoch_loss = 0f32;
        let mut interval_loss = 0f32;
        let mut interval_start = Instant::now();
        for (batch_idx, batch) in batches.enumerate() {
            let batch = batch.context(BatchSnafu)?;
            let loss = batch_loss(model, &batch, true)?;

            let mut grads = loss.backward().context(UpdateSnafu)?;
            clip_grad_norm(vars, &mut grads, self.config.max_grad_norm)
                .context(ClipGradientsSnafu)?;
            optimizer.step(&grads).context(UpdateSnafu)?;

            let loss = loss.to_scalar::<f32>().context(LossSnafu)?;
            epoch_loss += loss;
            interval_loss += loss;
            history.observe(loss);

            if batch_idx % log_interval == 0 && batch_idx > 0 {
                let ms_per_batch =
                    interval_start.elapsed().as_secs_f64() * 1000. / log_interval as f64;
                let cur_loss = interval_loss / log_interval as f32;
                info!(
                    "| epoch {epoch:3} | {batch_idx:5}/{n_batches:5} batches | lr {:02.2} | ms/batch {ms_per_batch:5.2} | loss {cur_loss:5.2} | ppl {:8.2}",
                    optimizer.learning_rate(),
                    cur_loss.exp()
                );
                interval_loss = 0.;
                interval_start = Instant::now();
            }
        }

        Ok(epoch_loss / n_batches.max(1) as f32)
    }

    /// Evaluate the model.
    ///
    /// Batch losses are weighted by their number of steps.
    ///
    /// * `eval_data` - Batched evaluation data.
    ///   *Shape:* `(batch_size, n_steps)`
    ///
    /// Returns: `sum(seq_len * loss) / (n_steps - 1)`
    pub fn evaluate(&self, model: &TransformerLm, eval_data: &Tensor) -> Result<f32, LmTrainerError> {
        let (_, n_steps) = eval_data.dims2().context(LossSnafu)?;
        ensure!(n_steps > 1, EvalTooShortSnafu { n_steps });
        let batches = BpttBatches::new(eval_data, self.config.bptt).context(BatchSnafu)?;

        let mut total_loss = 0f32;
        for batch in batches {
            let batch = batch.context(BatchSnafu)?;
            let loss = batch_loss(model, &batch, false)?
                .to_scalar::<f32>()
                .context(LossSnafu)?;
            total_loss += batch.seq_len() as f32 * loss;
        }

        Ok(total_loss / (n_steps - 1) as f32)
    }

    /// Train the model, keeping the parameters with the lowest validation
    /// loss.
    ///
    /// After every epoch the model is evaluated on the validation data and
    /// the learning rate is decayed. When training finishes, the parameters
    /// of the best epoch are restored.
    pub fn fit(
        &self,
        model: &TransformerLm,
        var_map: &VarMap,
        train_data: &Tensor,
        valid_data: &Tensor,
    ) -> Result<FitReport, LmTrainerError> {
        let vars = var_map.all_vars();
        let mut optimizer = self.optimizer(var_map)?;
        let mut scheduler = StepLr::new(
            self.config.learning_rate,
            self.config.lr_step_size,
            self.config.lr_gamma,
        );
        let mut history = LossHistory::new(self.config.log_interval);

        let mut best: Option<(f32, Vec<Tensor>)> = None;
        let mut epochs = Vec::with_capacity(self.config.epochs);
        for epoch in 1..=self.config.epochs {
            let epoch_start = Instant::now();
            let learning_rate = optimizer.learning_rate();
            let train_loss = self.train_epoch(
                model,
                &vars,
                &mut optimizer,
                train_data,
                epoch,
                &mut history,
            )?;
            let valid_loss = self.evaluate(model, valid_data)?;
            let elapsed = epoch_start.elapsed();

            info!("{}", "-".repeat(89));
            info!(
                "| end of epoch {epoch:3} | time: {:5.2}s | valid loss {valid_loss:5.2} | valid ppl {:8.2}",
                elapsed.as_secs_f64(),
                valid_loss.exp()
            );
            info!("{}", "-".repeat(89));

            if best
                .as_ref()
                .map_or(true, |(best_loss, _)| valid_loss < *best_loss)
            {
                best = Some((valid_loss, snapshot(&vars)?));
            }

            scheduler.step(&mut optimizer);

            epochs.push(EpochReport {
                elapsed,
                epoch,
                learning_rate,
                train_loss,
                valid_loss,
            });
        }

        let best_valid_loss = match best {
            Some((best_loss, params)) => {
                restore(&vars, &params)?;
                best_loss
            }
            None => f32::INFINITY,
        };

        Ok(FitReport {
            best_valid_loss,
            epochs,
            history,
        })
    }
}

/// Mean cross-entropy of next-token predictions.
fn batch_loss(model: &TransformerLm, batch: &Batch, train: bool) -> Result<Tensor, LmTrainerError> {
    let logits = model
        .forward_t(&batch.input, train)
        .context(ApplyModelSnafu)?;
    let (batch_size, seq_len, n_tokens) = logits.dims3().context(LossSnafu)?;
    logits
        .reshape((batch_size * seq_len, n_tokens))
        .and_then(|logits| cross_entropy(&logits, &batch.targets.flatten_all()?))
        .context(LossSnafu)
}

fn snapshot(vars: &[Var]) -> Result<Vec<Tensor>, LmTrainerError> {
    vars.iter()
        .map(|var| var.as_tensor().copy())
        .collect::<Result<_, _>>()
        .context(ParametersSnafu)
}

fn restore(vars: &[Var], params: &[Tensor]) -> Result<(), LmTrainerError> {
    for (var, param) in vars.iter().zip(params) {
        var.set(param).context(ParametersSnafu)?;
    }
    Ok(())
}
