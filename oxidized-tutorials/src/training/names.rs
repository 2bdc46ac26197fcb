use std::time::Instant;

use candle_core::{IndexOp, Tensor};
use candle_nn::loss::nll;
use candle_nn::{Optimizer, VarMap, SGD};
use rand::SeedableRng;
use rand_pcg::Pcg32;
use serde::{Deserialize, Serialize};
use snafu::{OptionExt, ResultExt, Snafu};
use tracing::{debug, info};

use crate::data::names::{NameCorpus, NamesError, TrainingExample};
use crate::models::char_rnn::{CharRnn, CharRnnConfig, CharRnnError};
use crate::training::{format_elapsed, LossHistory};

/// Configuration stored in a name generator checkpoint.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct NamesCheckpointConfig {
    /// Categories in the order of their indices.
    pub categories: Vec<String>,

    pub model: CharRnnConfig,
}

impl NamesCheckpointConfig {
    /// Get the index of a category.
    pub fn category_index(&self, category: &str) -> Option<usize> {
        self.categories
            .iter()
            .position(|candidate| candidate == category)
    }
}

/// Name generator trainer configuration.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct NamesTrainerConfig {
    learning_rate: f64,
    n_iters: usize,
    plot_every: usize,
    print_every: usize,
    seed: u64,
}

impl NamesTrainerConfig {
    /// SGD learning rate.
    ///
    /// Default: `0.0005`
    pub fn learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    /// Number of training iterations, one name per iteration.
    ///
    /// Default: `100_000`
    pub fn n_iters(mut self, n_iters: usize) -> Self {
        self.n_iters = n_iters;
        self
    }

    /// Number of iterations averaged into one loss history point.
    ///
    /// Default: `500`
    pub fn plot_every(mut self, plot_every: usize) -> Self {
        self.plot_every = plot_every;
        self
    }

    /// Number of iterations between progress logs.
    ///
    /// Default: `5_000`
    pub fn print_every(mut self, print_every: usize) -> Self {
        self.print_every = print_every;
        self
    }

    /// Seed for drawing training examples.
    ///
    /// Default: `42`
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

impl Default for NamesTrainerConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.0005,
            n_iters: 100_000,
            plot_every: 500,
            print_every: 5_000,
            seed: 42,
        }
    }
}

/// Name generator trainer errors.
#[derive(Debug, Snafu)]
pub enum NamesTrainerError {
    #[snafu(display("Cannot apply model"))]
    ApplyModel { source: CharRnnError },

    #[snafu(display("Cannot create optimizer"))]
    CreateOptimizer { source: candle_core::Error },

    #[snafu(display("Training example does not contain any letters"))]
    EmptyExample,

    #[snafu(display("Cannot draw training example"))]
    Example { source: NamesError },

    #[snafu(display("Cannot compute loss"))]
    Loss { source: candle_core::Error },

    #[snafu(display("Cannot update parameters"))]
    Update { source: candle_core::Error },
}

/// Trainer for the character RNN.
///
/// The network is trained with teacher forcing: at every step the input is
/// the ground-truth letter, not the letter predicted in the previous step.
#[derive(Clone, Debug, Default)]
pub struct NamesTrainer {
    config: NamesTrainerConfig,
}

impl NamesTrainer {
    /// Create a trainer.
    pub fn new(config: NamesTrainerConfig) -> Self {
        NamesTrainer { config }
    }

    /// Train the model on random examples from the corpus.
    ///
    /// * `model` - Model to train.
    /// * `var_map` - Variables of the model.
    /// * `corpus` - Corpus to draw examples from.
    ///
    /// Returns: the loss history, one point per `plot_every` iterations.
    pub fn train(
        &self,
        model: &CharRnn,
        var_map: &VarMap,
        corpus: &NameCorpus,
    ) -> Result<LossHistory, NamesTrainerError> {
        let mut optimizer =
            SGD::new(var_map.all_vars(), self.config.learning_rate).context(CreateOptimizerSnafu)?;
        let mut rng = Pcg32::seed_from_u64(self.config.seed);
        let mut history = LossHistory::new(self.config.plot_every);
        let print_every = self.config.print_every.max(1);
        let n_iters = self.config.n_iters;

        info!(
            n_iters,
            n_categories = corpus.n_categories(),
            n_names = corpus.n_names(),
            "training name generator"
        );

        let start = Instant::now();
        for iter in 1..=n_iters {
            let example = corpus
                .random_training_example(&mut rng, model.device())
                .context(ExampleSnafu)?;
            let loss = self.train_step(model, &mut optimizer, &example)?;
            history.observe(loss);

            if iter % print_every == 0 {
                debug!(category = %example.category, name = %example.name, "last example");
                info!(
                    "{} ({} {}%) {:.4}",
                    format_elapsed(start.elapsed()),
                    iter,
                    iter * 100 / n_iters,
                    loss
                );
            }
        }

        Ok(history)
    }

    /// Apply one parameter update for a training example.
    ///
    /// Returns: the loss averaged over the letters of the name.
    pub fn train_step(
        &self,
        model: &CharRnn,
        optimizer: &mut SGD,
        example: &TrainingExample,
    ) -> Result<f32, NamesTrainerError> {
        let name_len = example.input_tensor.dim(0).context(LossSnafu)?;
        let mut hidden = model.init_hidden(1).context(ApplyModelSnafu)?;
        let mut loss: Option<Tensor> = None;

        for pos in 0..name_len {
            let input = example.input_tensor.i(pos).context(LossSnafu)?;
            let (output, next_hidden) = model
                .forward_t(&example.category_tensor, &input, &hidden, true)
                .context(ApplyModelSnafu)?;
            hidden = next_hidden;

            let step_loss = example
                .target_tensor
                .narrow(0, pos, 1)
                .and_then(|target| nll(&output, &target))
                .context(LossSnafu)?;
            loss = Some(match loss {
                Some(loss) => (loss + step_loss).context(LossSnafu)?,
                None => step_loss,
            });
        }

        let loss = loss.context(EmptyExampleSnafu)?;
        optimizer.backward_step(&loss).context(UpdateSnafu)?;

        let loss = loss.to_scalar::<f32>().context(LossSnafu)?;
        Ok(loss / name_len as f32)
    }
}
