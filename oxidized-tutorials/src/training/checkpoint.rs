use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use serde::de::DeserializeOwned;
use serde::Serialize;
use snafu::{ResultExt, Snafu};
use tracing::info;

use crate::architectures::BuildArchitecture;
use crate::error::BoxedError;
use crate::tokenizers::{Vocab, VocabError};

/// Model parameters file within a checkpoint.
pub const MODEL_FILE: &str = "model.safetensors";

/// Configuration file within a checkpoint.
pub const CONFIG_FILE: &str = "config.json";

/// Vocabulary file within a checkpoint.
pub const VOCAB_FILE: &str = "vocab.json";

/// Checkpoint errors.
#[derive(Debug, Snafu)]
pub enum CheckpointError {
    #[snafu(display("Cannot build model"))]
    BuildModel { source: BoxedError },

    #[snafu(display("Cannot create checkpoint directory '{}'", path.display()))]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Cannot deserialize configuration '{}'", path.display()))]
    DeserializeConfig {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[snafu(display("Cannot load parameters from '{}'", path.display()))]
    LoadParameters {
        path: PathBuf,
        source: candle_core::Error,
    },

    #[snafu(display("Cannot load vocabulary"))]
    LoadVocab { source: VocabError },

    #[snafu(display("Cannot open configuration '{}'", path.display()))]
    OpenConfig {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Cannot save parameters to '{}'", path.display()))]
    SaveParameters {
        path: PathBuf,
        source: candle_core::Error,
    },

    #[snafu(display("Cannot save vocabulary"))]
    SaveVocab { source: VocabError },

    #[snafu(display("Cannot serialize configuration to '{}'", path.display()))]
    SerializeConfig {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[snafu(display("Cannot write configuration '{}'", path.display()))]
    WriteConfig {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Checkpoint directory.
///
/// A checkpoint stores the model parameters as safetensors, the
/// configuration as JSON and optionally a vocabulary.
#[derive(Clone, Debug)]
pub struct Checkpoint {
    dir: PathBuf,
}

impl Checkpoint {
    /// Open a checkpoint in the given directory.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Checkpoint {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Save parameters and configuration.
    pub fn save<C>(&self, var_map: &VarMap, config: &C) -> Result<(), CheckpointError>
    where
        C: Serialize,
    {
        fs::create_dir_all(&self.dir).context(CreateDirSnafu { path: &self.dir })?;

        write_config(&self.dir.join(CONFIG_FILE), config)?;

        let model_path = self.dir.join(MODEL_FILE);
        var_map
            .save(&model_path)
            .context(SaveParametersSnafu { path: &model_path })?;

        info!(dir = %self.dir.display(), "saved checkpoint");

        Ok(())
    }

    /// Save a vocabulary.
    pub fn save_vocab(&self, vocab: &Vocab) -> Result<(), CheckpointError> {
        fs::create_dir_all(&self.dir).context(CreateDirSnafu { path: &self.dir })?;
        vocab
            .to_json_file(self.dir.join(VOCAB_FILE))
            .context(SaveVocabSnafu)
    }

    /// Load the configuration.
    pub fn config<C>(&self) -> Result<C, CheckpointError>
    where
        C: DeserializeOwned,
    {
        let config_path = self.dir.join(CONFIG_FILE);
        let reader = BufReader::new(
            File::open(&config_path).context(OpenConfigSnafu { path: &config_path })?,
        );
        serde_json::from_reader(reader).context(DeserializeConfigSnafu { path: &config_path })
    }

    /// Build a model and load its parameters.
    ///
    /// Returns the model and the variables that hold its parameters.
    pub fn load_model<B>(
        &self,
        config: &B,
        device: &Device,
    ) -> Result<(B::Architecture, VarMap), CheckpointError>
    where
        B: BuildArchitecture,
    {
        let mut var_map = VarMap::new();
        let vb = VarBuilder::from_varmap(&var_map, DType::F32, device);
        let model = config.build(vb).context(BuildModelSnafu)?;

        let model_path = self.dir.join(MODEL_FILE);
        var_map
            .load(&model_path)
            .context(LoadParametersSnafu { path: &model_path })?;

        Ok((model, var_map))
    }

    /// Load the vocabulary.
    pub fn vocab(&self) -> Result<Vocab, CheckpointError> {
        Vocab::from_json_file(self.dir.join(VOCAB_FILE)).context(LoadVocabSnafu)
    }
}

fn write_config<C>(path: &Path, config: &C) -> Result<(), CheckpointError>
where
    C: Serialize,
{
    let mut writer =
        BufWriter::new(File::create(path).context(OpenConfigSnafu { path })?);
    serde_json::to_writer_pretty(&mut writer, config).context(SerializeConfigSnafu { path })?;
    writer.flush().context(WriteConfigSnafu { path })
}
