use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use snafu::{ensure, OptionExt, ResultExt, Snafu};

/// Vocabulary errors.
#[derive(Debug, Snafu)]
pub enum VocabError {
    #[snafu(display("Default token '{token}' is not in the vocabulary"))]
    DefaultTokenMissing { token: String },

    #[snafu(display("Duplicate token '{token}' in serialized vocabulary"))]
    DuplicateToken { token: String },

    #[snafu(display("Cannot open vocabulary file"))]
    OpenVocab { source: std::io::Error },

    #[snafu(display("Cannot deserialize vocabulary"))]
    DeserializeVocab { source: serde_json::Error },

    #[snafu(display("Cannot serialize vocabulary"))]
    SerializeVocab { source: serde_json::Error },

    #[snafu(display("Token '{token}' is unknown and the vocabulary has no default token"))]
    UnknownToken { token: String },

    #[snafu(display("Cannot write vocabulary file"))]
    WriteVocab { source: std::io::Error },
}

/// Vocabulary builder.
///
/// Special tokens are placed first, the remaining tokens are ordered by
/// descending frequency. Ties are broken by the lexicographic order of the
/// tokens.
#[derive(Clone, Debug)]
pub struct VocabBuilder {
    default_token: Option<String>,
    min_freq: usize,
    specials: Vec<String>,
}

impl VocabBuilder {
    /// Token whose identifier is used for unknown tokens.
    ///
    /// Default: `Some("<unk>")`
    pub fn default_token(mut self, default_token: Option<String>) -> Self {
        self.default_token = default_token;
        self
    }

    /// Minimum frequency of a token to be added to the vocabulary.
    ///
    /// Default: `1`
    pub fn min_freq(mut self, min_freq: usize) -> Self {
        self.min_freq = min_freq;
        self
    }

    /// Special tokens, added before all other tokens.
    ///
    /// Default: `["<unk>"]`
    pub fn specials(mut self, specials: Vec<String>) -> Self {
        self.specials = specials;
        self
    }

    /// Build a vocabulary from a token stream.
    pub fn build<I, T>(&self, tokens: I) -> Result<Vocab, VocabError>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for token in tokens {
            *counts.entry(token.as_ref().to_owned()).or_default() += 1;
        }
        for special in &self.specials {
            counts.remove(special);
        }

        let mut counts = counts
            .into_iter()
            .filter(|(_, count)| *count >= self.min_freq)
            .collect::<Vec<_>>();
        counts.sort_unstable_by(|(token_a, count_a), (token_b, count_b)| {
            count_b.cmp(count_a).then_with(|| token_a.cmp(token_b))
        });

        let mut seen = HashSet::new();
        let mut tokens = self
            .specials
            .iter()
            .filter(|special| seen.insert(special.as_str()))
            .cloned()
            .collect::<Vec<_>>();
        tokens.extend(counts.into_iter().map(|(token, _)| token));

        Vocab::new(tokens, self.default_token.clone())
    }
}

impl Default for VocabBuilder {
    fn default() -> Self {
        Self {
            default_token: Some("<unk>".to_string()),
            min_freq: 1,
            specials: vec!["<unk>".to_string()],
        }
    }
}

#[derive(Deserialize, Serialize)]
struct SerializedVocab {
    default_token: Option<String>,
    tokens: Vec<String>,
}

/// Vocabulary mapping tokens to identifiers.
///
/// The vocabulary is immutable after construction.
#[derive(Clone, Debug)]
pub struct Vocab {
    default_id: Option<u32>,
    ids: HashMap<String, u32>,
    tokens: Vec<String>,
}

impl Vocab {
    /// Create a vocabulary from tokens ordered by identifier.
    ///
    /// * `tokens` - Tokens, the identifier of a token is its index.
    /// * `default_token` - Token whose identifier is used for unknown tokens.
    pub fn new(tokens: Vec<String>, default_token: Option<String>) -> Result<Self, VocabError> {
        let mut ids = HashMap::with_capacity(tokens.len());
        for (id, token) in tokens.iter().enumerate() {
            ensure!(
                ids.insert(token.clone(), id as u32).is_none(),
                DuplicateTokenSnafu { token }
            );
        }

        let default_id = default_token
            .map(|token| {
                ids.get(&token)
                    .copied()
                    .context(DefaultTokenMissingSnafu { token })
            })
            .transpose()?;

        Ok(Vocab {
            default_id,
            ids,
            tokens,
        })
    }

    /// Read a vocabulary from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, VocabError> {
        let reader = BufReader::new(File::open(path).context(OpenVocabSnafu)?);
        let serialized: SerializedVocab =
            serde_json::from_reader(reader).context(DeserializeVocabSnafu)?;
        Self::new(serialized.tokens, serialized.default_token)
    }

    /// Write the vocabulary to a JSON file.
    pub fn to_json_file(&self, path: impl AsRef<Path>) -> Result<(), VocabError> {
        let mut writer = BufWriter::new(File::create(path).context(OpenVocabSnafu)?);
        let serialized = SerializedVocab {
            default_token: self
                .default_id
                .map(|id| self.tokens[id as usize].clone()),
            tokens: self.tokens.clone(),
        };
        serde_json::to_writer(&mut writer, &serialized).context(SerializeVocabSnafu)?;
        writer.flush().context(WriteVocabSnafu)
    }

    /// Identifier used for unknown tokens.
    pub fn default_id(&self) -> Option<u32> {
        self.default_id
    }

    /// Encode tokens as identifiers.
    pub fn encode<T>(&self, tokens: &[T]) -> Result<Vec<u32>, VocabError>
    where
        T: AsRef<str>,
    {
        tokens
            .iter()
            .map(|token| self.token_to_id(token.as_ref()))
            .collect()
    }

    /// Decode identifiers to tokens.
    ///
    /// Returns `None` if any identifier is out of range.
    pub fn decode(&self, ids: &[u32]) -> Option<Vec<&str>> {
        ids.iter().map(|&id| self.id_to_token(id)).collect()
    }

    /// Look up the token for an identifier.
    pub fn id_to_token(&self, id: u32) -> Option<&str> {
        self.tokens.get(id as usize).map(String::as_str)
    }

    /// Check whether the vocabulary is empty.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Number of tokens in the vocabulary.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Look up the identifier of a token.
    ///
    /// Unknown tokens map to the default identifier. It is an error to look
    /// up an unknown token when there is no default identifier.
    pub fn token_to_id(&self, token: &str) -> Result<u32, VocabError> {
        self.ids
            .get(token)
            .copied()
            .or(self.default_id)
            .context(UnknownTokenSnafu { token })
    }

    /// Tokens ordered by identifier.
    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }
}

#[cfg(test)]
mod tests {
    use std::env;

    use snafu::{report, ResultExt, Whatever};

    use super::{Vocab, VocabBuilder, VocabError};

    fn tokens() -> Vec<&'static str> {
        "the cat sat on the mat the cat ran <unk>"
            .split_whitespace()
            .collect()
    }

    #[test]
    #[report]
    fn vocab_orders_by_frequency_then_token() -> Result<(), Whatever> {
        let vocab = VocabBuilder::default()
            .build(tokens())
            .whatever_context("Cannot build vocabulary")?;
        assert_eq!(
            vocab.tokens(),
            ["<unk>", "the", "cat", "mat", "on", "ran", "sat"]
        );
        Ok(())
    }

    #[test]
    #[report]
    fn vocab_maps_unknown_tokens_to_default() -> Result<(), Whatever> {
        let vocab = VocabBuilder::default()
            .build(tokens())
            .whatever_context("Cannot build vocabulary")?;
        assert_eq!(
            vocab
                .encode(&["the", "dog", "sat"])
                .whatever_context("Cannot encode tokens")?,
            [1, 0, 6]
        );
        assert_eq!(vocab.decode(&[2, 3]), Some(vec!["cat", "mat"]));
        assert_eq!(vocab.decode(&[2, 42]), None);
        Ok(())
    }

    #[test]
    #[report]
    fn vocab_applies_min_freq() -> Result<(), Whatever> {
        let vocab = VocabBuilder::default()
            .min_freq(2)
            .build(tokens())
            .whatever_context("Cannot build vocabulary")?;
        assert_eq!(vocab.tokens(), ["<unk>", "the", "cat"]);
        Ok(())
    }

    #[test]
    fn vocab_without_default_rejects_unknown_tokens() {
        let vocab = VocabBuilder::default()
            .specials(vec![])
            .default_token(None)
            .build(["a", "b"])
            .unwrap();
        assert!(matches!(
            vocab.token_to_id("c"),
            Err(VocabError::UnknownToken { .. })
        ));
    }

    #[test]
    #[report]
    fn vocab_keeps_first_occurrence_of_repeated_specials() -> Result<(), Whatever> {
        let vocab = VocabBuilder::default()
            .specials(vec![
                "<unk>".to_string(),
                "<pad>".to_string(),
                "<unk>".to_string(),
            ])
            .build(["a", "b", "a"])
            .whatever_context("Cannot build vocabulary")?;
        assert_eq!(vocab.tokens(), ["<unk>", "<pad>", "a", "b"]);
        Ok(())
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn vocab_reports_failed_writes() {
        let vocab = VocabBuilder::default().build(tokens()).unwrap();
        assert!(matches!(
            vocab.to_json_file("/dev/full"),
            Err(VocabError::WriteVocab { .. })
        ));
    }

    #[test]
    fn vocab_requires_default_token_in_vocabulary() {
        assert!(matches!(
            Vocab::new(vec!["a".to_string()], Some("<unk>".to_string())),
            Err(VocabError::DefaultTokenMissing { .. })
        ));
    }

    #[test]
    #[report]
    fn vocab_survives_json_file() -> Result<(), Whatever> {
        let vocab = VocabBuilder::default()
            .build(tokens())
            .whatever_context("Cannot build vocabulary")?;
        let path = env::temp_dir().join(format!("vocab-{}.json", std::process::id()));
        vocab
            .to_json_file(&path)
            .whatever_context("Cannot write vocabulary")?;
        let restored = Vocab::from_json_file(&path).whatever_context("Cannot read vocabulary")?;
        std::fs::remove_file(&path).whatever_context("Cannot remove vocabulary file")?;

        assert_eq!(restored.tokens(), vocab.tokens());
        assert_eq!(restored.default_id(), Some(0));
        Ok(())
    }
}
