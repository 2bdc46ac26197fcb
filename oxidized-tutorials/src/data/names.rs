//! Names grouped by language category.
//!
//! Each category is read from a text file with one name per line. Names
//! are folded to ASCII and encoded as one-hot letter tensors for the
//! character-level generator.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use candle_core::{Device, Tensor};
use rand::seq::SliceRandom;
use rand::Rng;
use snafu::{ensure, OptionExt, ResultExt, Snafu};
use tokenizers::normalizers::{StripAccents, NFD};
use tokenizers::{NormalizedString, Normalizer};
use tracing::{debug, warn};

use crate::error::BoxedError;

/// Letters that can occur in a name.
pub const ALL_LETTERS: &str = "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ .,;'-";

/// Number of letter classes, including the end-of-sequence marker.
pub const N_LETTERS: usize = ALL_LETTERS.len() + 1;

/// Index of the end-of-sequence marker.
pub const EOS_INDEX: usize = N_LETTERS - 1;

const DATA_URL: &str = "https://download.pytorch.org/tutorial/data.zip";

/// Name data errors.
#[derive(Debug, Snafu)]
pub enum NamesError {
    #[snafu(display("Category index {index} is out of range for {n_categories} categories"))]
    CategoryIndex { index: usize, n_categories: usize },

    #[snafu(display("Cannot create tensor"))]
    CreateTensor { source: candle_core::Error },

    #[snafu(display(
        "No name files (*.txt) found in '{}', download {DATA_URL} and extract it, \
         the name files are in data/names",
        dir.display()
    ))]
    DataNotFound { dir: PathBuf },

    #[snafu(display("Name must contain at least one letter"))]
    EmptyName,

    #[snafu(display("No category contains names"))]
    NoCategories,

    #[snafu(display("Cannot normalize name"))]
    Normalize { source: BoxedError },

    #[snafu(display("Cannot read name directory '{}'", dir.display()))]
    ReadDir {
        dir: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Cannot read names from '{}'", path.display()))]
    ReadNames {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Unknown category: {category}"))]
    UnknownCategory { category: String },

    #[snafu(display("Letter '{letter}' is not in the alphabet"))]
    UnknownLetter { letter: char },
}

/// Fold a Unicode string to the name alphabet.
///
/// Characters are decomposed, combining marks are removed and characters
/// outside of [`ALL_LETTERS`] are dropped.
pub fn unicode_to_ascii(s: &str) -> Result<String, NamesError> {
    let mut normalized = NormalizedString::from(s);
    NFD.normalize(&mut normalized).context(NormalizeSnafu)?;
    StripAccents
        .normalize(&mut normalized)
        .context(NormalizeSnafu)?;
    Ok(normalized
        .get()
        .chars()
        .filter(|&c| letter_to_index(c).is_some())
        .collect())
}

/// Get the index of a letter in the alphabet.
pub fn letter_to_index(letter: char) -> Option<usize> {
    if letter.is_ascii() {
        ALL_LETTERS.find(letter)
    } else {
        None
    }
}

/// Get the letter for an index, `None` for the end-of-sequence marker or
/// out-of-range indices.
pub fn index_to_letter(index: usize) -> Option<char> {
    ALL_LETTERS.as_bytes().get(index).map(|&b| b as char)
}

/// One-hot encoding of a category.
///
/// *Shape:* `(1, n_categories)`
pub fn category_tensor(
    index: usize,
    n_categories: usize,
    device: &Device,
) -> Result<Tensor, NamesError> {
    ensure!(
        index < n_categories,
        CategoryIndexSnafu {
            index,
            n_categories
        }
    );
    let mut one_hot = vec![0f32; n_categories];
    one_hot[index] = 1.0;
    Tensor::from_vec(one_hot, (1, n_categories), device).context(CreateTensorSnafu)
}

/// One-hot encoding of the letters of a name.
///
/// *Shape:* `(name_len, 1, N_LETTERS)`
pub fn input_tensor(name: &str, device: &Device) -> Result<Tensor, NamesError> {
    let indices = letter_indices(name)?;
    let mut one_hot = vec![0f32; indices.len() * N_LETTERS];
    for (pos, idx) in indices.iter().enumerate() {
        one_hot[pos * N_LETTERS + idx] = 1.0;
    }
    Tensor::from_vec(one_hot, (indices.len(), 1, N_LETTERS), device).context(CreateTensorSnafu)
}

/// Letter indices of the second letter onwards, followed by the
/// end-of-sequence marker.
///
/// *Shape:* `(name_len,)`
pub fn target_tensor(name: &str, device: &Device) -> Result<Tensor, NamesError> {
    let targets = letter_indices(name)?
        .into_iter()
        .skip(1)
        .chain([EOS_INDEX])
        .map(|idx| idx as u32)
        .collect::<Vec<_>>();
    let len = targets.len();
    Tensor::from_vec(targets, len, device).context(CreateTensorSnafu)
}

fn letter_indices(name: &str) -> Result<Vec<usize>, NamesError> {
    ensure!(!name.is_empty(), EmptyNameSnafu);
    name.chars()
        .map(|letter| letter_to_index(letter).context(UnknownLetterSnafu { letter }))
        .collect()
}

/// A randomly drawn training example.
#[derive(Clone, Debug)]
pub struct TrainingExample {
    pub category: String,
    pub name: String,

    /// *Shape:* `(1, n_categories)`
    pub category_tensor: Tensor,

    /// *Shape:* `(name_len, 1, N_LETTERS)`
    pub input_tensor: Tensor,

    /// *Shape:* `(name_len,)`
    pub target_tensor: Tensor,
}

/// Names per category.
///
/// Categories are ordered by the order in which they were loaded, the
/// category index is the position in this order.
#[derive(Clone, Debug)]
pub struct NameCorpus {
    categories: Vec<String>,
    category_indices: HashMap<String, usize>,
    names: Vec<Vec<String>>,
}

impl NameCorpus {
    /// Load names from a directory of `<category>.txt` files.
    ///
    /// Files are read in file name order. Names are folded to ASCII, names
    /// that become empty are dropped and categories without names are
    /// skipped.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self, NamesError> {
        let dir = dir.as_ref();
        let mut paths = match fs::read_dir(dir) {
            Ok(entries) => entries
                .map(|entry| entry.map(|entry| entry.path()))
                .collect::<Result<Vec<_>, _>>()
                .context(ReadDirSnafu { dir })?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return DataNotFoundSnafu { dir }.fail()
            }
            Err(err) => return Err(err).context(ReadDirSnafu { dir }),
        };
        paths.retain(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "txt"));
        paths.sort();

        ensure!(!paths.is_empty(), DataNotFoundSnafu { dir });

        let mut categories = Vec::with_capacity(paths.len());
        for path in paths {
            let category = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default();
            let contents = fs::read_to_string(&path).context(ReadNamesSnafu { path: &path })?;
            debug!(category, path = %path.display(), "read names");
            categories.push((category, contents.lines().map(str::to_owned).collect()));
        }

        Self::from_categories(categories)
    }

    /// Create a corpus from in-memory categories.
    ///
    /// Names are trimmed and folded to ASCII in the same way as in
    /// [`NameCorpus::from_dir`].
    pub fn from_categories<I>(categories: I) -> Result<Self, NamesError>
    where
        I: IntoIterator<Item = (String, Vec<String>)>,
    {
        let mut corpus = NameCorpus {
            categories: Vec::new(),
            category_indices: HashMap::new(),
            names: Vec::new(),
        };

        for (category, raw_names) in categories {
            let mut names = Vec::with_capacity(raw_names.len());
            for raw_name in raw_names {
                let name = unicode_to_ascii(raw_name.trim())?;
                if !name.is_empty() {
                    names.push(name);
                }
            }

            if names.is_empty() {
                warn!(category, "skipping category without names");
                continue;
            }

            if let Some(&index) = corpus.category_indices.get(&category) {
                corpus.names[index].extend(names);
            } else {
                corpus
                    .category_indices
                    .insert(category.clone(), corpus.categories.len());
                corpus.categories.push(category);
                corpus.names.push(names);
            }
        }

        ensure!(!corpus.categories.is_empty(), NoCategoriesSnafu);

        Ok(corpus)
    }

    /// Category names.
    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    /// Get the index of a category.
    pub fn category_index(&self, category: &str) -> Result<usize, NamesError> {
        self.category_indices
            .get(category)
            .copied()
            .context(UnknownCategorySnafu { category })
    }

    /// Number of categories.
    pub fn n_categories(&self) -> usize {
        self.categories.len()
    }

    /// Names of a category.
    pub fn names(&self, category: &str) -> Result<&[String], NamesError> {
        let index = self.category_index(category)?;
        Ok(&self.names[index])
    }

    /// Total number of names.
    pub fn n_names(&self) -> usize {
        self.names.iter().map(Vec::len).sum()
    }

    /// Draw a random category and a random name from that category.
    pub fn random_training_example(
        &self,
        rng: &mut impl Rng,
        device: &Device,
    ) -> Result<TrainingExample, NamesError> {
        let category_idx = rng.gen_range(0..self.categories.len());
        let name = self.names[category_idx]
            .choose(rng)
            .context(EmptyNameSnafu)?;

        Ok(TrainingExample {
            category: self.categories[category_idx].clone(),
            name: name.clone(),
            category_tensor: category_tensor(category_idx, self.n_categories(), device)?,
            input_tensor: input_tensor(name, device)?,
            target_tensor: target_tensor(name, device)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;

    use candle_core::{Device, IndexOp};
    use ndarray::array;
    use rand::SeedableRng;
    use rand_pcg::Pcg32;
    use rstest::rstest;
    use snafu::{report, ResultExt, Whatever};

    use super::{
        category_tensor, input_tensor, letter_to_index, target_tensor, unicode_to_ascii,
        NameCorpus, NamesError, EOS_INDEX, N_LETTERS,
    };
    use crate::util::tests::assert_tensor_eq;

    fn corpus() -> NameCorpus {
        NameCorpus::from_categories([
            (
                "Polish".to_string(),
                vec!["Ślusàrski".to_string(), "Nowak".to_string()],
            ),
            ("Empty".to_string(), vec!["  ".to_string(), "ß".to_string()]),
            ("Italian".to_string(), vec!["Rossi".to_string()]),
        ])
        .unwrap()
    }

    #[test]
    fn alphabet_has_eos_marker() {
        assert_eq!(N_LETTERS, 59);
        assert_eq!(EOS_INDEX, 58);
    }

    #[rstest]
    #[case("Ślusàrski", "Slusarski")]
    #[case("Nguyễn", "Nguyen")]
    #[case("O'Néal", "O'Neal")]
    #[case("Zhang3", "Zhang")]
    fn unicode_to_ascii_folds_names(#[case] name: &str, #[case] expected: &str) {
        assert_eq!(unicode_to_ascii(name).unwrap(), expected);
    }

    #[rstest]
    #[case('a', Some(0))]
    #[case('Z', Some(51))]
    #[case(' ', Some(52))]
    #[case('-', Some(57))]
    #[case('3', None)]
    #[case('é', None)]
    fn letters_are_indexed(#[case] letter: char, #[case] expected: Option<usize>) {
        assert_eq!(letter_to_index(letter), expected);
    }

    #[test]
    fn corpus_skips_empty_categories() {
        let corpus = corpus();
        assert_eq!(corpus.categories(), ["Polish", "Italian"]);
        assert_eq!(corpus.names("Polish").unwrap(), ["Slusarski", "Nowak"]);
        assert_eq!(corpus.category_index("Italian").unwrap(), 1);
        assert!(matches!(
            corpus.names("Empty"),
            Err(NamesError::UnknownCategory { .. })
        ));
    }

    #[test]
    #[report]
    fn category_tensor_is_one_hot() -> Result<(), Whatever> {
        let tensor = category_tensor(1, 3, &Device::Cpu).whatever_context("Cannot encode")?;
        assert_tensor_eq!(tensor, array![[0f32, 1., 0.]]);
        Ok(())
    }

    #[test]
    #[report]
    fn input_tensor_is_one_hot_per_letter() -> Result<(), Whatever> {
        let tensor = input_tensor("ab", &Device::Cpu).whatever_context("Cannot encode")?;
        assert_eq!(tensor.dims(), &[2, 1, N_LETTERS]);
        let argmax = tensor
            .argmax(2)
            .and_then(|xs| xs.flatten_all())
            .and_then(|xs| xs.to_vec1::<u32>())
            .whatever_context("Cannot take argmax")?;
        assert_eq!(argmax, [0, 1]);
        let total = tensor
            .sum_all()
            .and_then(|xs| xs.to_scalar::<f32>())
            .whatever_context("Cannot sum")?;
        assert_eq!(total, 2.0);
        Ok(())
    }

    #[test]
    #[report]
    fn target_tensor_is_shifted_with_eos() -> Result<(), Whatever> {
        let tensor = target_tensor("abc", &Device::Cpu).whatever_context("Cannot encode")?;
        assert_eq!(
            tensor.to_vec1::<u32>().whatever_context("Cannot convert")?,
            [1, 2, EOS_INDEX as u32]
        );
        Ok(())
    }

    #[test]
    fn encoders_reject_unknown_letters() {
        assert!(matches!(
            input_tensor("a3", &Device::Cpu),
            Err(NamesError::UnknownLetter { letter: '3' })
        ));
        assert!(matches!(
            target_tensor("", &Device::Cpu),
            Err(NamesError::EmptyName)
        ));
    }

    #[test]
    #[report]
    fn random_training_example_is_consistent() -> Result<(), Whatever> {
        let corpus = corpus();
        let mut rng = Pcg32::seed_from_u64(42);
        for _ in 0..10 {
            let example = corpus
                .random_training_example(&mut rng, &Device::Cpu)
                .whatever_context("Cannot draw example")?;
            let names = corpus
                .names(&example.category)
                .whatever_context("Unknown category")?;
            assert!(names.contains(&example.name));

            let category_idx = corpus
                .category_index(&example.category)
                .whatever_context("Unknown category")?;
            let hot = example
                .category_tensor
                .i((0, category_idx))
                .and_then(|xs| xs.to_scalar::<f32>())
                .whatever_context("Cannot index category tensor")?;
            assert_eq!(hot, 1.0);
            assert_eq!(example.input_tensor.dims()[0], example.name.len());
            assert_eq!(example.target_tensor.dims(), &[example.name.len()]);
        }
        Ok(())
    }

    #[test]
    #[report]
    fn corpus_loads_from_dir() -> Result<(), Whatever> {
        let dir = env::temp_dir().join(format!("names-{}", std::process::id()));
        fs::create_dir_all(&dir).whatever_context("Cannot create directory")?;
        fs::write(dir.join("Korean.txt"), "Ahn\nBaik\n").whatever_context("Cannot write")?;
        fs::write(dir.join("Czech.txt"), "Abl\n\nAdsit\n").whatever_context("Cannot write")?;
        fs::write(dir.join("README.md"), "not names").whatever_context("Cannot write")?;

        let corpus = NameCorpus::from_dir(&dir);
        fs::remove_dir_all(&dir).whatever_context("Cannot remove directory")?;
        let corpus = corpus.whatever_context("Cannot load corpus")?;

        assert_eq!(corpus.categories(), ["Czech", "Korean"]);
        assert_eq!(corpus.names("Czech").unwrap(), ["Abl", "Adsit"]);
        assert_eq!(corpus.n_names(), 4);
        Ok(())
    }

    #[test]
    fn missing_data_is_reported() {
        let dir = env::temp_dir().join(format!("names-missing-{}", std::process::id()));
        let err = NameCorpus::from_dir(&dir).unwrap_err();
        assert!(matches!(err, NamesError::DataNotFound { .. }));
        assert!(err.to_string().contains("data.zip"));
    }

    #[test]
    fn directory_without_name_files_is_reported() {
        let dir = env::temp_dir().join(format!("names-empty-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("README.md"), "Not a name file\n").unwrap();

        let result = NameCorpus::from_dir(&dir);
        fs::remove_dir_all(&dir).unwrap();

        let err = result.unwrap_err();
        assert!(matches!(err, NamesError::DataNotFound { .. }));
        assert!(err.to_string().contains("data.zip"));
    }
}
