//! Word-level language modeling corpus.
//!
//! The corpus is stored as one flat sequence of token identifiers. For
//! training it is split into `batch_size` contiguous streams, which are
//! then consumed in chunks of at most `bptt` steps.

use std::fs;
use std::path::PathBuf;

use candle_core::{Device, Tensor};
use serde::{Deserialize, Serialize};
use snafu::{ensure, OptionExt, ResultExt, Snafu};
use tracing::debug;

use crate::error::BoxedError;
use crate::repository::Repo;
use crate::tokenizers::{Tokenizer, Vocab, VocabBuilder, VocabError};

/// Corpus errors.
#[derive(Debug, Snafu)]
pub enum CorpusError {
    #[snafu(display("Cannot build vocabulary"))]
    BuildVocab { source: VocabError },

    #[snafu(display("Cannot create batch tensor"))]
    CreateBatch { source: candle_core::Error },

    #[snafu(display("Cannot encode tokens"))]
    EncodeTokens { source: VocabError },

    #[snafu(display("Batch offset {offset} is out of range for {n_steps} steps"))]
    OffsetOutOfRange { offset: usize, n_steps: usize },

    #[snafu(display("Cannot look up split file '{file}'"))]
    LookupSplit { file: String, source: BoxedError },

    #[snafu(display("Split file '{file}' is not in the repository"))]
    MissingSplit { file: String },

    #[snafu(display("Cannot read split file '{}'", path.display()))]
    ReadSplit {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Corpus has {n_ids} tokens, need at least {batch_size} for batching"))]
    TooFewTokens { n_ids: usize, batch_size: usize },
}

/// Corpus split.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Split {
    Train,
    Valid,
    Test,
}

/// File names of the WikiText splits within a repository.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct WikiTextFiles {
    pub train: String,
    pub valid: String,
    pub test: String,
}

impl WikiTextFiles {
    fn file(&self, split: Split) -> &str {
        match split {
            Split::Train => &self.train,
            Split::Valid => &self.valid,
            Split::Test => &self.test,
        }
    }
}

impl Default for WikiTextFiles {
    fn default() -> Self {
        Self {
            train: "wiki.train.tokens".to_string(),
            valid: "wiki.valid.tokens".to_string(),
            test: "wiki.test.tokens".to_string(),
        }
    }
}

/// Raw lines of the WikiText splits.
#[derive(Clone, Debug)]
pub struct WikiText {
    train: Vec<String>,
    valid: Vec<String>,
    test: Vec<String>,
}

impl WikiText {
    /// Read the splits from a repository.
    pub fn from_repo(repo: &impl Repo, files: &WikiTextFiles) -> Result<Self, CorpusError> {
        Ok(WikiText {
            train: read_split(repo, files.file(Split::Train))?,
            valid: read_split(repo, files.file(Split::Valid))?,
            test: read_split(repo, files.file(Split::Test))?,
        })
    }

    /// Create a corpus from in-memory splits.
    pub fn from_lines(train: Vec<String>, valid: Vec<String>, test: Vec<String>) -> Self {
        WikiText { train, valid, test }
    }

    /// Get the lines of a split.
    pub fn split(&self, split: Split) -> &[String] {
        match split {
            Split::Train => &self.train,
            Split::Valid => &self.valid,
            Split::Test => &self.test,
        }
    }
}

fn read_split(repo: &impl Repo, file: &str) -> Result<Vec<String>, CorpusError> {
    let path = repo
        .file(file)
        .context(LookupSplitSnafu { file })?
        .context(MissingSplitSnafu { file })?;
    let contents = fs::read_to_string(&path).context(ReadSplitSnafu { path: &path })?;
    let lines = contents.lines().map(str::to_owned).collect::<Vec<_>>();
    debug!(file, n_lines = lines.len(), "read corpus split");
    Ok(lines)
}

/// Build a vocabulary from tokenized lines.
pub fn build_vocab(
    lines: &[String],
    tokenizer: &impl Tokenizer,
    builder: &VocabBuilder,
) -> Result<Vocab, CorpusError> {
    builder
        .build(lines.iter().flat_map(|line| tokenizer.tokenize(line)))
        .context(BuildVocabSnafu)
}

/// Tokenize and encode lines into one flat identifier sequence.
///
/// Lines without tokens are dropped.
pub fn data_process(
    lines: &[String],
    tokenizer: &impl Tokenizer,
    vocab: &Vocab,
) -> Result<Vec<u32>, CorpusError> {
    let mut ids = Vec::new();
    for line in lines {
        let tokens = tokenizer.tokenize(line);
        ids.extend(vocab.encode(&tokens).context(EncodeTokensSnafu)?);
    }
    Ok(ids)
}

/// Arrange a flat identifier sequence in `batch_size` contiguous streams.
///
/// Trailing identifiers that do not fill a complete step are dropped.
///
/// Returns: batched identifiers.
/// *Shape:* `(batch_size, n_steps)`
pub fn batchify(ids: &[u32], batch_size: usize, device: &Device) -> Result<Tensor, CorpusError> {
    let n_ids = ids.len();
    ensure!(
        batch_size > 0 && n_ids >= batch_size,
        TooFewTokensSnafu { n_ids, batch_size }
    );
    let n_steps = n_ids / batch_size;
    Tensor::from_slice(&ids[..n_steps * batch_size], (batch_size, n_steps), device)
        .context(CreateBatchSnafu)
}

/// Input and target chunk of a batched corpus.
#[derive(Clone, Debug)]
pub struct Batch {
    /// *Shape:* `(batch_size, seq_len)`
    pub input: Tensor,

    /// Input shifted by one step.
    ///
    /// *Shape:* `(batch_size, seq_len)`
    pub targets: Tensor,
}

impl Batch {
    /// Number of steps in the chunk.
    pub fn seq_len(&self) -> usize {
        self.input.dims().last().copied().unwrap_or(0)
    }
}

/// Get the chunk starting at step `offset`.
///
/// The chunk has `min(bptt, n_steps - 1 - offset)` steps.
pub fn get_batch(source: &Tensor, offset: usize, bptt: usize) -> Result<Batch, CorpusError> {
    let (_, n_steps) = source.dims2().context(CreateBatchSnafu)?;
    ensure!(
        offset + 1 < n_steps,
        OffsetOutOfRangeSnafu { offset, n_steps }
    );
    let seq_len = bptt.min(n_steps - 1 - offset);
    Ok(Batch {
        input: source
            .narrow(1, offset, seq_len)
            .context(CreateBatchSnafu)?,
        targets: source
            .narrow(1, offset + 1, seq_len)
            .context(CreateBatchSnafu)?,
    })
}

/// Iterator over the chunks of a batched corpus.
pub struct BpttBatches<'a> {
    bptt: usize,
    n_steps: usize,
    offset: usize,
    source: &'a Tensor,
}

impl<'a> BpttBatches<'a> {
    /// Iterate over `source` in chunks of at most `bptt` steps.
    ///
    /// * `source` - Batched corpus.
    ///   *Shape:* `(batch_size, n_steps)`
    pub fn new(source: &'a Tensor, bptt: usize) -> Result<Self, CorpusError> {
        let (_, n_steps) = source.dims2().context(CreateBatchSnafu)?;
        Ok(BpttBatches {
            bptt: bptt.max(1),
            n_steps,
            offset: 0,
            source,
        })
    }

    /// Total number of chunks.
    pub fn n_batches(&self) -> usize {
        self.n_steps.saturating_sub(1).div_ceil(self.bptt)
    }
}

impl<'a> Iterator for BpttBatches<'a> {
    type Item = Result<Batch, CorpusError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset + 1 >= self.n_steps {
            return None;
        }

        let batch = get_batch(self.source, self.offset, self.bptt);
        self.offset += self.bptt;
        Some(batch)
    }
}
