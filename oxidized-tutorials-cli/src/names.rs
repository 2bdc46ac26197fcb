use std::path::PathBuf;

use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use clap::{Args, Subcommand};
use oxidized_tutorials::architectures::BuildArchitecture;
use oxidized_tutorials::data::names::NameCorpus;
use oxidized_tutorials::models::char_rnn::{
    CharRnn, CharRnnConfig, SampleConfig, SamplingStrategy,
};
use oxidized_tutorials::training::{
    Checkpoint, NamesCheckpointConfig, NamesTrainer, NamesTrainerConfig,
};
use rand::SeedableRng;
use rand_pcg::Pcg32;
use serde::Deserialize;
use snafu::{whatever, FromString, OptionExt, ResultExt, Whatever};
use tracing::info;

use crate::config::read_config;

/// Configuration file of `names train`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct NamesConfig {
    model: CharRnnConfig,
    trainer: NamesTrainerConfig,
}

#[derive(Debug, Subcommand)]
pub enum NamesCommand {
    /// Train the name generator on a directory of `<Category>.txt` files.
    Train(TrainArgs),

    /// Generate names with a trained name generator.
    Sample(SampleArgs),
}

#[derive(Args, Debug)]
pub struct TrainArgs {
    /// Directory with one `<Category>.txt` file per category.
    #[arg(long, default_value = "data/names")]
    data_dir: PathBuf,

    /// JSON file with `model` and `trainer` configuration.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of training iterations.
    #[arg(long)]
    n_iters: Option<usize>,

    /// Seed for picking training examples.
    #[arg(long)]
    seed: Option<u64>,

    /// Checkpoint directory.
    #[arg(long, default_value = "names-checkpoint")]
    output: PathBuf,

    /// Write the loss history to this CSV file.
    #[arg(long)]
    history: Option<PathBuf>,

    /// Sample names after training, e.g. `Russian:RUS`.
    #[arg(long = "sample", value_name = "CATEGORY:LETTERS")]
    samples: Vec<String>,
}

#[derive(Args, Debug)]
pub struct SampleArgs {
    /// Checkpoint directory.
    #[arg(long, default_value = "names-checkpoint")]
    checkpoint: PathBuf,

    /// Category to generate names for.
    #[arg(long)]
    category: String,

    /// A name is generated for each start letter.
    #[arg(long, default_value = "ABC")]
    start_letters: String,

    /// Maximum length of a generated name.
    #[arg(long, default_value_t = 20)]
    max_length: usize,

    /// Sample from the temperature-scaled distribution instead of picking
    /// the most probable letter.
    #[arg(long)]
    temperature: Option<f32>,

    /// Seed for temperature sampling.
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Apply dropout while generating.
    #[arg(long)]
    dropout: bool,
}

impl NamesCommand {
    pub fn run(self, device: &Device) -> Result<(), Whatever> {
        match self {
            NamesCommand::Train(args) => train(args, device),
            NamesCommand::Sample(args) => sample(args, device),
        }
    }
}

fn train(args: TrainArgs, device: &Device) -> Result<(), Whatever> {
    let NamesConfig { model, mut trainer } = read_config(args.config.as_deref())?;
    if let Some(n_iters) = args.n_iters {
        trainer = trainer.n_iters(n_iters);
    }
    if let Some(seed) = args.seed {
        trainer = trainer.seed(seed);
    }

    let corpus = NameCorpus::from_dir(&args.data_dir).whatever_context("Cannot read names")?;
    info!(
        n_categories = corpus.n_categories(),
        n_names = corpus.n_names(),
        "read names"
    );

    let config = model.n_categories(corpus.n_categories());
    let var_map = VarMap::new();
    let vb = VarBuilder::from_varmap(&var_map, DType::F32, device);
    let rnn = config
        .build(vb)
        .map_err(|e| Whatever::with_source(e, "Cannot build name generator".to_string()))?;

    let history = NamesTrainer::new(trainer)
        .train(&rnn, &var_map, &corpus)
        .whatever_context("Cannot train name generator")?;
    if let Some(path) = &args.history {
        history
            .write_csv(path)
            .whatever_context("Cannot write loss history")?;
    }

    let checkpoint_config = NamesCheckpointConfig {
        categories: corpus.categories().to_vec(),
        model: config,
    };
    Checkpoint::new(&args.output)
        .save(&var_map, &checkpoint_config)
        .whatever_context("Cannot save checkpoint")?;

    let sample_config = SampleConfig::default();
    let mut rng = Pcg32::seed_from_u64(0);
    for request in &args.samples {
        let Some((category, start_letters)) = request.split_once(':') else {
            whatever!("Sample must be formatted as CATEGORY:LETTERS, was '{request}'");
        };
        let category_index = checkpoint_config
            .category_index(category)
            .with_whatever_context(|| format!("Unknown category '{category}'"))?;
        print_samples(
            &rnn,
            category,
            category_index,
            start_letters,
            &sample_config,
            &mut rng,
        )?;
    }

    Ok(())
}

fn sample(args: SampleArgs, device: &Device) -> Result<(), Whatever> {
    let checkpoint = Checkpoint::new(&args.checkpoint);
    let config: NamesCheckpointConfig = checkpoint
        .config()
        .whatever_context("Cannot read checkpoint configuration")?;
    let category_index = config
        .category_index(&args.category)
        .with_whatever_context(|| {
            format!(
                "Unknown category '{}', known categories: {}",
                args.category,
                config.categories.join(", ")
            )
        })?;
    let (rnn, _var_map) = checkpoint
        .load_model(&config.model, device)
        .whatever_context("Cannot load name generator")?;

    let strategy = match args.temperature {
        Some(temperature) => SamplingStrategy::Temperature(temperature),
        None => SamplingStrategy::Greedy,
    };
    let sample_config = SampleConfig::default()
        .dropout(args.dropout)
        .max_length(args.max_length)
        .strategy(strategy);
    let mut rng = Pcg32::seed_from_u64(args.seed);

    print_samples(
        &rnn,
        &args.category,
        category_index,
        &args.start_letters,
        &sample_config,
        &mut rng,
    )
}

fn print_samples(
    rnn: &CharRnn,
    category: &str,
    category_index: usize,
    start_letters: &str,
    config: &SampleConfig,
    rng: &mut Pcg32,
) -> Result<(), Whatever> {
    let names = rnn
        .samples(category_index, start_letters, config, rng)
        .with_whatever_context(|_| format!("Cannot sample names for '{category}'"))?;
    println!("{category}:");
    for name in names {
        println!("{name}");
    }
    Ok(())
}
