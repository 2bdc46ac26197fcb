use candle_core::{IndexOp, Tensor};
use candle_nn::ops::softmax;
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use serde::{Deserialize, Serialize};
use snafu::{ensure, ResultExt, Snafu};

use super::{CharRnn, CharRnnError};
use crate::data::names::{category_tensor, index_to_letter, input_tensor, NamesError};

/// Sampling errors.
#[derive(Debug, Snafu)]
pub enum SampleError {
    #[snafu(display("Cannot apply model"))]
    ApplyModel { source: CharRnnError },

    #[snafu(display("Cannot encode sampling input"))]
    Encode { source: NamesError },

    #[snafu(display("Cannot pick next letter"))]
    PickLetter { source: candle_core::Error },

    #[snafu(display("Temperature must be positive, was {temperature}"))]
    Temperature { temperature: f32 },

    #[snafu(display("Cannot sample from letter distribution"))]
    Weights {
        source: rand::distributions::WeightedError,
    },
}

/// Strategy for picking the next letter.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingStrategy {
    /// Pick the most probable letter.
    #[default]
    Greedy,

    /// Sample from the distribution with the log-probabilities divided by
    /// the temperature.
    Temperature(f32),
}

/// Sampling configuration.
#[derive(Clone, Debug)]
pub struct SampleConfig {
    dropout: bool,
    max_length: usize,
    strategy: SamplingStrategy,
}

impl SampleConfig {
    /// Apply dropout while generating, as during training.
    ///
    /// Default: `false`
    pub fn dropout(mut self, dropout: bool) -> Self {
        self.dropout = dropout;
        self
    }

    /// Maximum number of letters generated after the start letter.
    ///
    /// Default: `20`
    pub fn max_length(mut self, max_length: usize) -> Self {
        self.max_length = max_length;
        self
    }

    /// Strategy for picking the next letter.
    ///
    /// Default: `SamplingStrategy::Greedy`
    pub fn strategy(mut self, strategy: SamplingStrategy) -> Self {
        self.strategy = strategy;
        self
    }
}

impl Default for SampleConfig {
    fn default() -> Self {
        Self {
            dropout: false,
            max_length: 20,
            strategy: SamplingStrategy::Greedy,
        }
    }
}

impl CharRnn {
    /// Generate a name for a category.
    ///
    /// Generation starts from `start_letter` and stops when the model
    /// predicts the end of the name or `max_length` letters were generated.
    /// Dropout is only applied when enabled in `config`.
    ///
    /// * `category_index` - Index of the category to condition on.
    /// * `start_letter` - First letter of the name.
    /// * `config` - Sampling configuration.
    /// * `rng` - Random number generator for temperature sampling.
    pub fn sample(
        &self,
        category_index: usize,
        start_letter: char,
        config: &SampleConfig,
        rng: &mut impl Rng,
    ) -> Result<String, SampleError> {
        if let SamplingStrategy::Temperature(temperature) = config.strategy {
            ensure!(temperature > 0.0, TemperatureSnafu { temperature });
        }

        let category = category_tensor(category_index, self.n_categories(), self.device())
            .context(EncodeSnafu)?;
        let mut input = letter_input(start_letter, self)?;
        let mut hidden = self.init_hidden(1).context(ApplyModelSnafu)?;
        let mut name = String::from(start_letter);

        for _ in 0..config.max_length {
            let (output, next_hidden) = self
                .forward_t(&category, &input, &hidden, config.dropout)
                .context(ApplyModelSnafu)?;
            hidden = next_hidden;

            let index = pick_letter(&output, config.strategy, rng)?;
            // The end-of-sequence marker has no letter.
            let Some(letter) = index_to_letter(index) else {
                break;
            };
            name.push(letter);
            input = letter_input(letter, self)?;
        }

        Ok(name)
    }

    /// Generate one name per start letter.
    pub fn samples(
        &self,
        category_index: usize,
        start_letters: &str,
        config: &SampleConfig,
        rng: &mut impl Rng,
    ) -> Result<Vec<String>, SampleError> {
        start_letters
            .chars()
            .map(|start_letter| self.sample(category_index, start_letter, config, rng))
            .collect()
    }
}

fn letter_input(letter: char, model: &CharRnn) -> Result<Tensor, SampleError> {
    let mut buf = [0u8; 4];
    input_tensor(letter.encode_utf8(&mut buf), model.device())
        .context(EncodeSnafu)?
        .i(0)
        .context(PickLetterSnafu)
}

fn pick_letter(
    log_probs: &Tensor,
    strategy: SamplingStrategy,
    rng: &mut impl Rng,
) -> Result<usize, SampleError> {
    match strategy {
        SamplingStrategy::Greedy => log_probs
            .argmax(1)
            .and_then(|index| index.i(0))
            .and_then(|index| index.to_scalar::<u32>())
            .map(|index| index as usize)
            .context(PickLetterSnafu),
        SamplingStrategy::Temperature(temperature) => {
            let probs = (log_probs / temperature as f64)
                .and_then(|logits| softmax(&logits, 1))
                .and_then(|probs| probs.i(0))
                .and_then(|probs| probs.to_vec1::<f32>())
                .context(PickLetterSnafu)?;
            let dist = WeightedIndex::new(&probs).context(WeightsSnafu)?;
            Ok(dist.sample(rng))
        }
    }
}
