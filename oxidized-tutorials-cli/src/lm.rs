use std::path::PathBuf;

use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use clap::{Args, Subcommand, ValueEnum};
use oxidized_tutorials::architectures::BuildArchitecture;
use oxidized_tutorials::data::corpus::{build_vocab, data_process, Split};
use oxidized_tutorials::models::transformer_lm::TransformerLmConfig;
use oxidized_tutorials::tokenizers::{BasicEnglishTokenizer, VocabBuilder};
use oxidized_tutorials::training::{Checkpoint, LmTrainer, LmTrainerConfig};
use serde::Deserialize;
use snafu::{FromString, ResultExt, Whatever};
use tracing::info;

use crate::config::read_config;
use crate::corpus::CorpusArgs;

/// Configuration file of `lm train`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LmConfig {
    model: TransformerLmConfig,
    trainer: LmTrainerConfig,
}

#[derive(Debug, Subcommand)]
pub enum LmCommand {
    /// Train the language model on WikiText.
    Train(TrainArgs),

    /// Evaluate a trained language model on a WikiText split.
    Evaluate(EvaluateArgs),
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum EvalSplit {
    Valid,
    Test,
}

impl From<EvalSplit> for Split {
    fn from(split: EvalSplit) -> Self {
        match split {
            EvalSplit::Valid => Split::Valid,
            EvalSplit::Test => Split::Test,
        }
    }
}

#[derive(Args, Debug)]
pub struct TrainArgs {
    #[command(flatten)]
    corpus: CorpusArgs,

    /// JSON file with `model` and `trainer` configuration.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of training epochs.
    #[arg(long)]
    epochs: Option<usize>,

    /// Checkpoint directory.
    #[arg(long, default_value = "lm-checkpoint")]
    output: PathBuf,

    /// Write the training loss history to this CSV file.
    #[arg(long)]
    history: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct EvaluateArgs {
    #[command(flatten)]
    corpus: CorpusArgs,

    /// Checkpoint directory.
    #[arg(long, default_value = "lm-checkpoint")]
    checkpoint: PathBuf,

    /// Split to evaluate on.
    #[arg(long, value_enum, default_value_t = EvalSplit::Test)]
    split: EvalSplit,

    /// Number of evaluation streams.
    #[arg(long, default_value_t = 10)]
    batch_size: usize,

    /// Sequence length per evaluation step.
    #[arg(long, default_value_t = 35)]
    bptt: usize,
}

impl LmCommand {
    pub fn run(self, device: &Device) -> Result<(), Whatever> {
        match self {
            LmCommand::Train(args) => train(args, device),
            LmCommand::Evaluate(args) => evaluate(args, device),
        }
    }
}

fn train(args: TrainArgs, device: &Device) -> Result<(), Whatever> {
    let LmConfig { model, trainer } = read_config(args.config.as_deref())?;
    let trainer = match args.epochs {
        Some(epochs) => trainer.epochs(epochs),
        None => trainer,
    };
    let trainer = LmTrainer::new(trainer);

    let corpus = args.corpus.load()?;
    let tokenizer = BasicEnglishTokenizer::new().whatever_context("Cannot create tokenizer")?;
    let vocab = build_vocab(
        corpus.split(Split::Train),
        &tokenizer,
        &VocabBuilder::default(),
    )
    .whatever_context("Cannot build vocabulary")?;
    info!(n_tokens = vocab.len(), "built vocabulary");

    let encode = |split: Split| {
        data_process(corpus.split(split), &tokenizer, &vocab)
            .with_whatever_context(|_| format!("Cannot encode {split:?} split"))
    };
    let train_data = trainer
        .batchify_train(&encode(Split::Train)?, device)
        .whatever_context("Cannot batch training data")?;
    let valid_data = trainer
        .batchify_eval(&encode(Split::Valid)?, device)
        .whatever_context("Cannot batch validation data")?;
    let test_data = trainer
        .batchify_eval(&encode(Split::Test)?, device)
        .whatever_context("Cannot batch test data")?;

    let config = model.n_tokens(vocab.len());
    let var_map = VarMap::new();
    let vb = VarBuilder::from_varmap(&var_map, DType::F32, device);
    let lm = config
        .build(vb)
        .map_err(|e| Whatever::with_source(e, "Cannot build language model".to_string()))?;

    let report = trainer
        .fit(&lm, &var_map, &train_data, &valid_data)
        .whatever_context("Cannot train language model")?;
    if let Some(path) = &args.history {
        report
            .history
            .write_csv(path)
            .whatever_context("Cannot write loss history")?;
    }

    let test_loss = trainer
        .evaluate(&lm, &test_data)
        .whatever_context("Cannot evaluate language model")?;
    info!("{}", "=".repeat(89));
    info!(
        "| End of training | test loss {:5.2} | test ppl {:8.2} |",
        test_loss,
        test_loss.exp()
    );
    info!("{}", "=".repeat(89));

    let checkpoint = Checkpoint::new(&args.output);
    checkpoint
        .save(&var_map, &config)
        .whatever_context("Cannot save checkpoint")?;
    checkpoint
        .save_vocab(&vocab)
        .whatever_context("Cannot save vocabulary")?;

    Ok(())
}

fn evaluate(args: EvaluateArgs, device: &Device) -> Result<(), Whatever> {
    let checkpoint = Checkpoint::new(&args.checkpoint);
    let config: TransformerLmConfig = checkpoint
        .config()
        .whatever_context("Cannot read checkpoint configuration")?;
    let vocab = checkpoint
        .vocab()
        .whatever_context("Cannot read checkpoint vocabulary")?;
    let (lm, _var_map) = checkpoint
        .load_model(&config, device)
        .whatever_context("Cannot load language model")?;

    let trainer = LmTrainer::new(
        LmTrainerConfig::default()
            .bptt(args.bptt)
            .eval_batch_size(args.batch_size),
    );
    let corpus = args.corpus.load()?;
    let tokenizer = BasicEnglishTokenizer::new().whatever_context("Cannot create tokenizer")?;
    let split = Split::from(args.split);
    let ids = data_process(corpus.split(split), &tokenizer, &vocab)
        .whatever_context("Cannot encode split")?;
    let data = trainer
        .batchify_eval(&ids, device)
        .whatever_context("Cannot batch evaluation data")?;

    let loss = trainer
        .evaluate(&lm, &data)
        .whatever_context("Cannot evaluate language model")?;
    info!(
        "| {:?} | loss {:5.2} | ppl {:8.2} |",
        split,
        loss,
        loss.exp()
    );

    Ok(())
}
