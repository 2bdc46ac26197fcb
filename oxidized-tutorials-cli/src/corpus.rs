use std::path::PathBuf;

use clap::Args;
use oxidized_tutorials::data::corpus::{WikiText, WikiTextFiles};
use oxidized_tutorials::repository::{HfHubRepo, LocalRepo, RepoType};
use snafu::{ResultExt, Whatever};
use tracing::info;

/// Location of the WikiText splits.
#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
pub struct CorpusSource {
    /// Directory with the extracted WikiText files.
    #[arg(long)]
    corpus_dir: Option<PathBuf>,

    /// Hugging Face Hub dataset with the WikiText files.
    #[arg(long)]
    hf_dataset: Option<String>,
}

/// WikiText corpus arguments.
#[derive(Args, Debug)]
pub struct CorpusArgs {
    #[command(flatten)]
    source: CorpusSource,

    /// Revision of the Hugging Face Hub dataset.
    #[arg(long, requires = "hf_dataset")]
    revision: Option<String>,

    /// Training split file within the corpus.
    #[arg(long, default_value = "wiki.train.tokens")]
    train_file: String,

    /// Validation split file within the corpus.
    #[arg(long, default_value = "wiki.valid.tokens")]
    valid_file: String,

    /// Test split file within the corpus.
    #[arg(long, default_value = "wiki.test.tokens")]
    test_file: String,
}

impl CorpusArgs {
    /// Read the corpus splits.
    pub fn load(&self) -> Result<WikiText, Whatever> {
        let files = WikiTextFiles {
            train: self.train_file.clone(),
            valid: self.valid_file.clone(),
            test: self.test_file.clone(),
        };

        match (&self.source.corpus_dir, &self.source.hf_dataset) {
            (Some(dir), _) => {
                info!(dir = %dir.display(), "reading corpus");
                WikiText::from_repo(&LocalRepo::new(dir), &files)
                    .whatever_context("Cannot read corpus")
            }
            (None, Some(name)) => {
                info!(%name, "reading corpus from Hugging Face Hub");
                let repo = HfHubRepo::new(name, self.revision.as_deref(), RepoType::Dataset)
                    .whatever_context("Cannot open Hugging Face Hub dataset")?;
                WikiText::from_repo(&repo, &files).whatever_context("Cannot read corpus")
            }
            (None, None) => snafu::whatever!("Either --corpus-dir or --hf-dataset is required"),
        }
    }
}
